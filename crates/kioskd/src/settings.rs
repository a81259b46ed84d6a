//! Operating settings: late cutoff, auto window and the camera list.
//!
//! Stored as one JSON document, loaded lazily and rewritten whole on every
//! mutation under a single lock.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const TIME_FORMAT: &str = "%H:%M";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings format error: {0}")]
    Format(#[from] serde_json::Error),
    #[error("invalid time {0:?}, expected HH:MM")]
    InvalidTime(String),
    #[error("camera name and URL are required")]
    MissingCameraField,
    #[error("camera already exists")]
    DuplicateCamera,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub id: u32,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatingSettings {
    #[serde(rename = "late_time", with = "hh_mm")]
    pub late_cutoff: NaiveTime,
    #[serde(rename = "auto_start_time", with = "hh_mm")]
    pub auto_window_start: NaiveTime,
    #[serde(rename = "auto_end_time", with = "hh_mm")]
    pub auto_window_end: NaiveTime,
    #[serde(rename = "cctv_cameras", default)]
    pub cameras: Vec<CameraDescriptor>,
    /// Next camera id to hand out; ids are never reused.
    #[serde(default = "first_camera_id")]
    pub next_camera_id: u32,
}

fn first_camera_id() -> u32 {
    1
}

impl Default for OperatingSettings {
    fn default() -> Self {
        Self {
            late_cutoff: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            auto_window_start: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
            auto_window_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
            cameras: Vec::new(),
            next_camera_id: first_camera_id(),
        }
    }
}

impl OperatingSettings {
    /// Whether `now` lies in the auto window, both ends inclusive.
    pub fn within_window(&self, now: NaiveTime) -> bool {
        self.auto_window_start <= now && now <= self.auto_window_end
    }

    pub fn window_label(&self) -> String {
        format!(
            "{} - {}",
            self.auto_window_start.format(TIME_FORMAT),
            self.auto_window_end.format(TIME_FORMAT)
        )
    }
}

/// Parse an `HH:MM` time.
pub fn parse_time(raw: &str) -> Result<NaiveTime, SettingsError> {
    NaiveTime::parse_from_str(raw.trim(), TIME_FORMAT)
        .map_err(|_| SettingsError::InvalidTime(raw.to_string()))
}

pub fn format_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

mod hh_mm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_time(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_time(&raw).map_err(serde::de::Error::custom)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    cached: Mutex<Option<OperatingSettings>>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cached: Mutex::new(None),
        }
    }

    /// Current settings, loading them on first use.
    pub fn current(&self) -> OperatingSettings {
        self.with(|s| s.clone())
    }

    /// Update cutoff and window; `None` keeps the current value. The camera
    /// list is preserved.
    pub fn update_times(
        &self,
        late_cutoff: Option<NaiveTime>,
        auto_window_start: Option<NaiveTime>,
        auto_window_end: Option<NaiveTime>,
    ) -> Result<OperatingSettings, SettingsError> {
        self.mutate(|s| {
            if let Some(t) = late_cutoff {
                s.late_cutoff = t;
            }
            if let Some(t) = auto_window_start {
                s.auto_window_start = t;
            }
            if let Some(t) = auto_window_end {
                s.auto_window_end = t;
            }
            Ok(())
        })
    }

    pub fn cameras(&self) -> Vec<CameraDescriptor> {
        self.with(|s| s.cameras.clone())
    }

    pub fn camera(&self, id: u32) -> Option<CameraDescriptor> {
        self.with(|s| s.cameras.iter().find(|c| c.id == id).cloned())
    }

    /// Add a camera, rejecting a duplicate name or URL.
    pub fn add_camera(&self, name: &str, url: &str) -> Result<CameraDescriptor, SettingsError> {
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || url.is_empty() {
            return Err(SettingsError::MissingCameraField);
        }
        let settings = self.mutate(|s| {
            if s.cameras.iter().any(|c| c.name == name || c.url == url) {
                return Err(SettingsError::DuplicateCamera);
            }
            s.cameras.push(CameraDescriptor {
                id: s.next_camera_id,
                name: name.to_string(),
                url: url.to_string(),
            });
            s.next_camera_id += 1;
            Ok(())
        })?;
        settings
            .cameras
            .last()
            .cloned()
            .ok_or(SettingsError::MissingCameraField)
    }

    /// Remove camera `id`. Returns whether a camera was removed; an
    /// unknown id is not an error and leaves the list untouched.
    pub fn remove_camera(&self, id: u32) -> Result<bool, SettingsError> {
        let mut removed = false;
        self.mutate(|s| {
            let before = s.cameras.len();
            s.cameras.retain(|c| c.id != id);
            removed = s.cameras.len() != before;
            Ok(())
        })?;
        Ok(removed)
    }

    /// Apply `f` to a copy and persist it; memory is updated only after the
    /// save succeeds.
    fn mutate(
        &self,
        f: impl FnOnce(&mut OperatingSettings) -> Result<(), SettingsError>,
    ) -> Result<OperatingSettings, SettingsError> {
        self.with(|current| {
            let mut next = current.clone();
            f(&mut next)?;
            if next != *current {
                save(&self.path, &next)?;
                *current = next.clone();
            }
            Ok(next)
        })
    }

    fn with<R>(&self, f: impl FnOnce(&mut OperatingSettings) -> R) -> R {
        let mut guard = self.cached.lock().unwrap_or_else(|p| p.into_inner());
        f(guard.get_or_insert_with(|| load(&self.path)))
    }
}

fn load(path: &Path) -> OperatingSettings {
    match fs::read(path) {
        Ok(raw) => match serde_json::from_slice(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "invalid settings file, using defaults");
                OperatingSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => OperatingSettings::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read settings, using defaults");
            OperatingSettings::default()
        }
    }
}

fn save(path: &Path, settings: &OperatingSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(settings)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    tracing::debug!(path = %path.display(), "settings saved");
    Ok(())
}
