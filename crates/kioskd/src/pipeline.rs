//! Per-frame orchestration (locate, match, mark) and enrollment.
//!
//! A `Pipeline` is owned by the engine thread: it holds the face locator,
//! which cannot leave that thread, and the signature gallery.

use crate::recorder::{AttendanceStatus, RecordOutcome};
use crate::registry::RegistryError;
use crate::state::Kiosk;
use chrono::NaiveDateTime;
use image::{DynamicImage, GrayImage, ImageFormat};
use kiosk_core::signature::{to_grayscale, SignatureError};
use kiosk_core::{FaceLocator, FaceRect, Identity, Matcher, Signature, SignatureStore};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("Employee ID {0} already exists")]
    Duplicate(String),
    #[error("Invalid image: {0}")]
    InvalidImage(#[from] SignatureError),
    #[error("No face detected")]
    NoFace,
    #[error("failed to store photo: {0}")]
    Photo(String),
    #[error("failed to update registry: {0}")]
    Registry(#[from] RegistryError),
}

/// Enrollment form fields; the image travels separately.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrollRequest {
    pub employee_id: String,
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
}

/// Face box in `top/right/bottom/left` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaceBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl From<FaceRect> for FaceBox {
    fn from(r: FaceRect) -> Self {
        Self {
            top: r.y,
            right: r.right(),
            bottom: r.bottom(),
            left: r.x,
        }
    }
}

/// Attendance mark created by a detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkSummary {
    pub status: AttendanceStatus,
    pub minutes_late: u32,
}

impl From<&RecordOutcome> for MarkSummary {
    fn from(o: &RecordOutcome) -> Self {
        Self {
            status: o.status,
            minutes_late: o.minutes_late,
        }
    }
}

/// One located face and what happened to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub name: String,
    #[serde(rename = "emp_id")]
    pub employee_id: Option<String>,
    pub score: f32,
    #[serde(rename = "box")]
    pub face_box: FaceBox,
    /// This call created the day's attendance mark for the identity.
    pub attended: bool,
    /// The identity had already been marked today before this detection.
    pub already_attended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark: Option<MarkSummary>,
    /// Document write failure; the mark still counts for deduplication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_error: Option<String>,
}

pub struct Pipeline {
    locator: Box<dyn FaceLocator>,
    matcher: Box<dyn Matcher>,
    store: SignatureStore,
}

impl Pipeline {
    pub fn new(locator: Box<dyn FaceLocator>, matcher: Box<dyn Matcher>, store: SignatureStore) -> Self {
        Self {
            locator,
            matcher,
            store,
        }
    }

    /// Build the gallery from the current registry.
    pub fn load(mut locator: Box<dyn FaceLocator>, matcher: Box<dyn Matcher>, kiosk: &Kiosk) -> Self {
        let store = SignatureStore::load(kiosk.registry().all(), locator.as_mut());
        Self::new(locator, matcher, store)
    }

    pub fn signature_count(&self) -> usize {
        self.store.len()
    }

    /// Locate every face in `image`, identify it, and mark first arrivals.
    pub fn process(&mut self, image: &DynamicImage, at: NaiveDateTime, kiosk: &Kiosk) -> Vec<Detection> {
        let gray = to_grayscale(image);
        let rects = self.locator.locate(&gray);
        tracing::debug!(faces = rects.len(), "frame processed");

        rects
            .into_iter()
            .filter_map(|rect| match Signature::from_face(&gray, &rect) {
                Ok(sig) => Some(self.identify(rect, &sig, at, kiosk)),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping face");
                    None
                }
            })
            .collect()
    }

    fn identify(&self, rect: FaceRect, sig: &Signature, at: NaiveDateTime, kiosk: &Kiosk) -> Detection {
        let result = self.matcher.best_match(sig, &self.store);
        let mut detection = Detection {
            name: "Unknown".to_string(),
            employee_id: None,
            score: result.score,
            face_box: rect.into(),
            attended: false,
            already_attended: false,
            mark: None,
            record_error: None,
        };

        let Some(identity) = result.employee_id.as_deref().and_then(|id| kiosk.identity(id)) else {
            return detection;
        };
        detection.name = identity.name.clone();
        detection.employee_id = Some(identity.employee_id.clone());

        // The claim is the single check-and-insert; the document follows it.
        if !kiosk.attended.try_claim(&identity.employee_id, at.date()) {
            detection.already_attended = true;
            return detection;
        }
        detection.attended = true;

        let cutoff = kiosk.settings.current().late_cutoff;
        match kiosk.recorder.record(&identity, at, cutoff) {
            Ok(outcome) => {
                tracing::debug!(document = %outcome.document.display(), "attendance row written");
                detection.mark = Some(MarkSummary::from(&outcome));
            }
            Err(e) => {
                tracing::error!(employee_id = %identity.employee_id, error = %e, "failed to record attendance");
                detection.record_error = Some(e.to_string());
            }
        }
        detection
    }

    /// Enroll a new identity from `image`.
    ///
    /// Nothing is written unless the id is new and a face is found. Only the
    /// first located face is used.
    pub fn enroll(
        &mut self,
        request: &EnrollRequest,
        image: &DynamicImage,
        at: NaiveDateTime,
        kiosk: &Kiosk,
    ) -> Result<Identity, EnrollmentError> {
        let employee_id = request.employee_id.trim();
        let name = request.name.trim();
        if employee_id.is_empty() {
            return Err(EnrollmentError::MissingField("Employee ID"));
        }
        if name.is_empty() {
            return Err(EnrollmentError::MissingField("Name"));
        }
        if kiosk.registry().contains(employee_id) {
            return Err(EnrollmentError::Duplicate(employee_id.to_string()));
        }

        let gray = to_grayscale(image);
        let rect = self.first_face(&gray)?;
        let signature = Signature::from_face(&gray, &rect)?;

        let (photo_path, file) = reserve_photo(&kiosk.photos_dir, employee_id, name)?;
        let mut writer = BufWriter::new(file);
        let written = image
            .to_rgb8()
            .write_to(&mut writer, ImageFormat::Jpeg)
            .map_err(|e| e.to_string())
            .and_then(|()| writer.flush().map_err(|e| e.to_string()));
        if let Err(e) = written {
            remove_photo(&photo_path);
            return Err(EnrollmentError::Photo(e));
        }

        let identity = Identity {
            employee_id: employee_id.to_string(),
            name: name.to_string(),
            phone: request.phone.trim().to_string(),
            address: request.address.trim().to_string(),
            photo_path: photo_path.clone(),
            registered_at: at,
        };

        if let Err(e) = kiosk.registry_mut().append(identity.clone()) {
            remove_photo(&photo_path);
            return Err(e.into());
        }
        self.store.upsert(employee_id, signature);

        tracing::info!(employee_id, name, photo = %photo_path.display(), "employee enrolled");
        Ok(identity)
    }

    fn first_face(&mut self, gray: &GrayImage) -> Result<FaceRect, EnrollmentError> {
        self.locator
            .locate(gray)
            .into_iter()
            .next()
            .ok_or(EnrollmentError::NoFace)
    }
}

/// Upper bound on `-N` suffixes tried for one photo name.
const MAX_PHOTO_ATTEMPTS: u32 = 1000;

/// `<employee_id>_<name>.jpg` with spaces as underscores and anything
/// outside `[A-Za-z0-9_-]` dropped. Attempts after the first get a `-N`
/// suffix, since sanitised names of distinct employees can coincide.
pub fn photo_filename(employee_id: &str, name: &str, attempt: u32) -> String {
    fn clean(s: &str) -> String {
        s.chars()
            .map(|c| if c == ' ' { '_' } else { c })
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
            .collect()
    }
    match attempt {
        0 => format!("{}_{}.jpg", clean(employee_id), clean(name)),
        n => format!("{}_{}-{}.jpg", clean(employee_id), clean(name), n + 1),
    }
}

/// Create a photo file that no other identity owns. Existing photos are
/// never opened for writing.
fn reserve_photo(dir: &Path, employee_id: &str, name: &str) -> Result<(PathBuf, File), EnrollmentError> {
    for attempt in 0..MAX_PHOTO_ATTEMPTS {
        let path = dir.join(photo_filename(employee_id, name, attempt));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(EnrollmentError::Photo(format!("{}: {e}", path.display()))),
        }
    }
    Err(EnrollmentError::Photo(format!(
        "no free photo name for {employee_id} in {}",
        dir.display()
    )))
}

fn remove_photo(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove orphaned photo");
    }
}
