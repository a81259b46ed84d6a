//! Attendance recorder: appends marks to per-day spreadsheet documents.
//!
//! Layout: `<dir>/<YYYY-MM>/attendance_<YYYY-MM-DD>.xlsx`, one worksheet per
//! identity with a styled header row, one row per mark.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use kiosk_core::Identity;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use umya_spreadsheet::structs::{HorizontalAlignmentValues, PatternValues};
use umya_spreadsheet::{Spreadsheet, Worksheet};

pub const HEADER: [&str; 6] = ["Date", "Time", "Employee ID", "Name", "Status", "Minutes Late"];

const HEADER_FILL: &str = "FF4472C4";
const HEADER_FONT: &str = "FFFFFFFF";
const LATE_FILL: &str = "FFFFF3CD";

/// Excel's worksheet-name limit.
const SHEET_NAME_MAX: usize = 31;
const NAME_PREFIX_MAX: usize = 20;
/// Upper bound on ` (N)` suffixes tried for one identity's worksheet.
const MAX_SHEET_ATTEMPTS: u32 = 100;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("attendance I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("attendance document error: {0}")]
    Document(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttendanceStatus {
    Present,
    Late,
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => f.write_str("Present"),
            Self::Late => f.write_str("Late"),
        }
    }
}

/// Result of one successful `record` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordOutcome {
    pub document: PathBuf,
    pub status: AttendanceStatus,
    pub minutes_late: u32,
}

/// Status and whole minutes late for an arrival against `cutoff`.
///
/// Late only when strictly after the cutoff; minutes are floored.
pub fn classify_arrival(arrival: NaiveTime, cutoff: NaiveTime) -> (AttendanceStatus, u32) {
    if arrival > cutoff {
        let seconds = arrival.signed_duration_since(cutoff).num_seconds();
        (AttendanceStatus::Late, (seconds / 60) as u32)
    } else {
        (AttendanceStatus::Present, 0)
    }
}

/// Worksheet name for an identity: `<id>_<first 20 chars of name>`,
/// stripped of characters Excel rejects and cut to 31 characters.
pub fn sheet_name(identity: &Identity) -> String {
    let name: String = identity.name.chars().take(NAME_PREFIX_MAX).collect();
    let raw = format!("{}_{}", identity.employee_id, name);
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .take(SHEET_NAME_MAX)
        .collect();
    let trimmed = cleaned.trim_matches('\'');
    if trimmed.is_empty() {
        "attendance".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Path of the document holding marks for `date`.
pub fn document_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(date.format("%Y-%m").to_string())
        .join(format!("attendance_{}.xlsx", date.format("%Y-%m-%d")))
}

pub struct Recorder {
    dir: PathBuf,
    // Serializes every read-modify-write of a document.
    write_lock: Mutex<()>,
}

impl Recorder {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one mark for `identity` at `at` to that day's document.
    ///
    /// Any failure leaves the previous document contents in place.
    pub fn record(
        &self,
        identity: &Identity,
        at: NaiveDateTime,
        cutoff: NaiveTime,
    ) -> Result<RecordOutcome, AttendanceError> {
        let date = at.date();
        let (status, minutes_late) = classify_arrival(at.time(), cutoff);
        let path = document_path(&self.dir, date);

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut book = open_document(&path)?;
        let sheet = sheet_for(&mut book, identity)?;

        let row = sheet.get_highest_row() + 1;
        let values = [
            date.format("%Y-%m-%d").to_string(),
            at.format("%H:%M:%S").to_string(),
            identity.employee_id.clone(),
            identity.name.clone(),
            status.to_string(),
        ];
        for (i, value) in values.iter().enumerate() {
            sheet.get_cell_mut((i as u32 + 1, row)).set_value_string(value);
        }
        let minutes_cell = sheet.get_cell_mut((6, row));
        if minutes_late > 0 {
            minutes_cell.set_value_number(minutes_late as f64);
        } else {
            minutes_cell.set_value_string("");
        }

        if status == AttendanceStatus::Late {
            for col in 1..=HEADER.len() as u32 {
                let fill = sheet.get_cell_mut((col, row)).get_style_mut().get_fill_mut().get_pattern_fill_mut();
                fill.get_foreground_color_mut().set_argb(LATE_FILL);
                fill.set_pattern_type(PatternValues::Solid);
            }
        }

        save_document(&book, &path)?;

        tracing::info!(
            employee_id = %identity.employee_id,
            status = %status,
            minutes_late,
            document = %path.display(),
            "attendance recorded"
        );

        Ok(RecordOutcome {
            document: path,
            status,
            minutes_late,
        })
    }
}

/// Read an attendance document.
pub fn read_document(path: &Path) -> Result<Spreadsheet, AttendanceError> {
    let bytes = fs::read(path)?;
    umya_spreadsheet::reader::xlsx::read_reader(Cursor::new(bytes), true)
        .map_err(|e| AttendanceError::Document(format!("{}: {e}", path.display())))
}

fn open_document(path: &Path) -> Result<Spreadsheet, AttendanceError> {
    if path.exists() {
        read_document(path)
    } else {
        Ok(umya_spreadsheet::new_file_empty_worksheet())
    }
}

fn save_document(book: &Spreadsheet, path: &Path) -> Result<(), AttendanceError> {
    let mut buf = Cursor::new(Vec::new());
    umya_spreadsheet::writer::xlsx::write_writer(book, &mut buf)
        .map_err(|e| AttendanceError::Document(e.to_string()))?;
    let tmp = path.with_extension("xlsx.tmp");
    fs::write(&tmp, buf.into_inner())?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// `base`, or `base (N)` cut so the whole name fits Excel's limit.
fn sheet_candidate(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        return base.to_string();
    }
    let suffix = format!(" ({})", attempt + 1);
    let keep = SHEET_NAME_MAX.saturating_sub(suffix.len());
    let head: String = base.chars().take(keep).collect();
    format!("{head}{suffix}")
}

/// The worksheet holding `identity`'s marks, created with the styled header
/// row when missing.
///
/// Distinct ids can sanitise to the same name. A sheet whose first mark
/// belongs to another employee is skipped for the next ` (N)` candidate.
fn sheet_for<'a>(book: &'a mut Spreadsheet, identity: &Identity) -> Result<&'a mut Worksheet, AttendanceError> {
    let base = sheet_name(identity);
    for attempt in 0..MAX_SHEET_ATTEMPTS {
        let name = sheet_candidate(&base, attempt);
        let existing = book
            .get_sheet_collection()
            .iter()
            .position(|s| s.get_name().eq_ignore_ascii_case(&name));

        let Some(index) = existing else {
            return new_sheet(book, &name);
        };
        let owner = book.get_sheet_collection()[index].get_value((3, 2));
        if owner.is_empty() || owner == identity.employee_id {
            return book
                .get_sheet_mut(&index)
                .ok_or_else(|| AttendanceError::Document(format!("worksheet {name} vanished")));
        }
    }
    Err(AttendanceError::Document(format!(
        "no free worksheet name for {}",
        identity.employee_id
    )))
}

fn new_sheet<'a>(book: &'a mut Spreadsheet, name: &str) -> Result<&'a mut Worksheet, AttendanceError> {
    let sheet = book
        .new_sheet(name)
        .map_err(|e| AttendanceError::Document(format!("failed to create worksheet {name}: {e}")))?;
    for (i, title) in HEADER.iter().enumerate() {
        let cell = sheet.get_cell_mut((i as u32 + 1, 1));
        cell.set_value_string(*title);
        let style = cell.get_style_mut();
        style.get_font_mut().set_bold(true);
        style.get_font_mut().get_color_mut().set_argb(HEADER_FONT);
        style
            .get_fill_mut()
            .get_pattern_fill_mut()
            .get_foreground_color_mut()
            .set_argb(HEADER_FILL);
        style
            .get_fill_mut()
            .get_pattern_fill_mut()
            .set_pattern_type(PatternValues::Solid);
        style
            .get_alignment_mut()
            .set_horizontal(HorizontalAlignmentValues::Center);
    }
    Ok(sheet)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str, name: &str) -> Identity {
        Identity {
            employee_id: id.into(),
            name: name.into(),
            phone: "555-0100".into(),
            address: String::new(),
            photo_path: PathBuf::from("/photos/x.jpg"),
            registered_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
    }

    fn hm(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_classify_boundary() {
        let cutoff = hm(9, 0, 0);
        assert_eq!(classify_arrival(hm(9, 0, 0), cutoff), (AttendanceStatus::Present, 0));
        assert_eq!(classify_arrival(hm(8, 59, 59), cutoff), (AttendanceStatus::Present, 0));
        assert_eq!(classify_arrival(hm(9, 1, 0), cutoff), (AttendanceStatus::Late, 1));
        assert_eq!(classify_arrival(hm(9, 0, 59), cutoff), (AttendanceStatus::Late, 0));
        assert_eq!(classify_arrival(hm(10, 30, 30), cutoff), (AttendanceStatus::Late, 90));
    }

    #[test]
    fn test_colliding_sheet_names_stay_separate() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path().to_path_buf());
        let date = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        let slash = identity("A/B", "Ann");
        let plain = identity("AB", "Ann");

        recorder.record(&slash, date.and_hms_opt(8, 0, 0).unwrap(), hm(9, 0, 0)).unwrap();
        recorder.record(&plain, date.and_hms_opt(8, 5, 0).unwrap(), hm(9, 0, 0)).unwrap();
        recorder.record(&slash, date.and_hms_opt(17, 0, 0).unwrap(), hm(9, 0, 0)).unwrap();

        let book = read_document(&document_path(dir.path(), date)).unwrap();
        let owners: Vec<(String, String, u32)> = book
            .get_sheet_collection()
            .iter()
            .map(|s| (s.get_name().to_string(), s.get_value((3, 2)), s.get_highest_row()))
            .collect();
        assert_eq!(
            owners,
            vec![
                ("AB_Ann".to_string(), "A/B".to_string(), 3),
                ("AB_Ann (2)".to_string(), "AB".to_string(), 2),
            ]
        );
    }

    #[test]
    fn test_sheet_candidate_fits_limit() {
        assert_eq!(sheet_candidate("E1_Ann", 0), "E1_Ann");
        assert_eq!(sheet_candidate("E1_Ann", 1), "E1_Ann (2)");
        let long = "X".repeat(31);
        let candidate = sheet_candidate(&long, 11);
        assert_eq!(candidate.chars().count(), 31);
        assert!(candidate.ends_with(" (12)"));
    }

    #[test]
    fn test_sheet_name_sanitised() {
        assert_eq!(sheet_name(&identity("E001", "Ada Lovelace")), "E001_Ada Lovelace");
        let long = identity("E002", "Maximiliana Featherstonehaugh-Smythe");
        assert_eq!(sheet_name(&long), "E002_Maximiliana Feathers");
        assert_eq!(sheet_name(&identity("A/B", "x:y?")), "AB_xy");
        let very_long = identity("EMPLOYEE-0000000001", "Bartholomew Cavendish");
        assert!(sheet_name(&very_long).chars().count() <= 31);
    }

    #[test]
    fn test_document_path_layout() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 7).unwrap();
        assert_eq!(
            document_path(Path::new("/data/attendance"), date),
            PathBuf::from("/data/attendance/2024-05/attendance_2024-05-07.xlsx")
        );
    }

    #[test]
    fn test_record_writes_rows() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path().to_path_buf());
        let date = NaiveDate::from_ymd_opt(2024, 5, 7).unwrap();
        let ada = identity("E001", "Ada");
        let bob = identity("E002", "Bob");

        let late = recorder
            .record(&ada, date.and_hms_opt(9, 1, 0).unwrap(), hm(9, 0, 0))
            .unwrap();
        assert_eq!(late.status, AttendanceStatus::Late);
        assert_eq!(late.minutes_late, 1);
        assert!(late.document.exists());

        let on_time = recorder
            .record(&bob, date.and_hms_opt(8, 45, 0).unwrap(), hm(9, 0, 0))
            .unwrap();
        assert_eq!(on_time.document, late.document);

        let book = read_document(&late.document).unwrap();
        let names: Vec<String> = book
            .get_sheet_collection()
            .iter()
            .map(|s| s.get_name().to_string())
            .collect();
        assert_eq!(names, vec!["E001_Ada".to_string(), "E002_Bob".to_string()]);

        let sheet = &book.get_sheet_collection()[0];
        assert_eq!(sheet.get_value((1, 1)), "Date");
        assert_eq!(sheet.get_value((1, 2)), "2024-05-07");
        assert_eq!(sheet.get_value((2, 2)), "09:01:00");
        assert_eq!(sheet.get_value((5, 2)), "Late");
        assert_eq!(sheet.get_value((6, 2)), "1");

        let sheet = &book.get_sheet_collection()[1];
        assert_eq!(sheet.get_value((5, 2)), "Present");
        assert_eq!(sheet.get_value((6, 2)), "");
    }

    #[test]
    fn test_unreadable_document_fails() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path().to_path_buf());
        let date = NaiveDate::from_ymd_opt(2024, 5, 7).unwrap();
        let path = document_path(dir.path(), date);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not a workbook").unwrap();

        let result = recorder.record(&identity("E001", "Ada"), date.and_hms_opt(9, 0, 0).unwrap(), hm(9, 0, 0));
        assert!(matches!(result, Err(AttendanceError::Document(_))));
        assert_eq!(fs::read(&path).unwrap(), b"not a workbook");
    }
}
