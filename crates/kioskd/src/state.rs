use crate::admin::AdminStore;
use crate::attended::AttendedSet;
use crate::config::Config;
use crate::recorder::Recorder;
use crate::registry::{Registry, RegistryError};
use crate::settings::SettingsStore;
use crate::streams::StreamRegistry;
use chrono::NaiveDate;
use kiosk_core::Identity;
use kiosk_stream::StreamOptions;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Process-wide state shared by the engine thread and the HTTP handlers.
///
/// Every aggregate serializes its own mutation: the registry behind an
/// `RwLock`, the attended set, recorder and settings behind internal locks.
pub struct Kiosk {
    registry: RwLock<Registry>,
    pub attended: AttendedSet,
    pub recorder: Recorder,
    pub settings: SettingsStore,
    pub admin: AdminStore,
    pub photos_dir: PathBuf,
    pub streams: Arc<StreamRegistry>,
    pub stream_options: StreamOptions,
    pub stream_channel_depth: usize,
}

impl Kiosk {
    /// Open (or initialise) all persisted state under the configured data dir.
    pub fn open(config: &Config, today: NaiveDate) -> Result<Self, RegistryError> {
        let photos_dir = config.photos_dir();
        fs::create_dir_all(&photos_dir)?;
        fs::create_dir_all(config.attendance_dir())?;

        Ok(Self {
            registry: RwLock::new(Registry::load(&config.registry_path())?),
            attended: AttendedSet::load(&config.attended_snapshot_path(), today),
            recorder: Recorder::new(config.attendance_dir()),
            settings: SettingsStore::new(config.settings_path()),
            admin: AdminStore::new(config.admin_path()),
            photos_dir,
            streams: Arc::new(StreamRegistry::new()),
            stream_options: config.stream_options(),
            stream_channel_depth: config.stream_channel_depth,
        })
    }

    pub fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn registry_mut(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn identity(&self, employee_id: &str) -> Option<Identity> {
        self.registry().get(employee_id).cloned()
    }

    /// Employee id to phone number, for report joins.
    pub fn phone_book(&self) -> HashMap<String, String> {
        self.registry()
            .all()
            .iter()
            .map(|i| (i.employee_id.clone(), i.phone.clone()))
            .collect()
    }
}
