use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Axis-aligned face rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Intersect with an image of the given dimensions.
    ///
    /// Returns `None` when nothing of the rectangle lies inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceRect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(FaceRect::new(self.x, self.y, w, h))
    }
}

/// An enrolled person, one row of the employee registry.
///
/// Field names follow the registry's on-disk CSV header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "Employee_ID")]
    pub employee_id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Phone", default)]
    pub phone: String,
    #[serde(rename = "Address", default)]
    pub address: String,
    #[serde(rename = "Photo_Path")]
    pub photo_path: PathBuf,
    #[serde(rename = "Registration_Date", with = "registration_date")]
    pub registered_at: NaiveDateTime,
}

/// `YYYY-MM-DD HH:MM:SS`, the registry's timestamp format.
mod registration_date {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(raw.trim(), FORMAT).map_err(serde::de::Error::custom)
    }
}

/// Result of matching a candidate face against the signature gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Employee id of the accepted match, if the best score cleared the threshold.
    pub employee_id: Option<String>,
    /// Best score seen across the gallery, roughly in [-1, 1].
    pub score: f32,
}

impl MatchResult {
    pub fn no_match(score: f32) -> Self {
        Self {
            employee_id: None,
            score,
        }
    }

    pub fn matched(&self) -> bool {
        self.employee_id.is_some()
    }
}
