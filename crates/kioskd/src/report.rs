//! Read-only iteration over recorded attendance marks, and CSV export.

use crate::recorder::{document_path, read_document, AttendanceError};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const CSV_HEADER: [&str; 7] = [
    "Date",
    "Time",
    "Employee ID",
    "Name",
    "Phone",
    "Status",
    "Minutes Late",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    Month,
    Year,
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            other => Err(format!("unknown report granularity: {other}")),
        }
    }
}

impl Granularity {
    /// `attendance_<period>.csv` for the period containing `date`.
    pub fn filename(&self, date: NaiveDate) -> String {
        let period = match self {
            Self::Day => date.format("%Y-%m-%d"),
            Self::Month => date.format("%Y-%m"),
            Self::Year => date.format("%Y"),
        };
        format!("attendance_{period}.csv")
    }
}

/// One attendance mark joined with the identity's phone number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "Employee ID")]
    pub employee_id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Phone")]
    pub phone: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Minutes Late")]
    pub minutes_late: String,
}

/// Documents covering the period of `granularity` containing `date`,
/// in chronological order.
pub fn documents_for(dir: &Path, granularity: Granularity, date: NaiveDate) -> Vec<PathBuf> {
    match granularity {
        Granularity::Day => {
            let path = document_path(dir, date);
            if path.is_file() {
                vec![path]
            } else {
                Vec::new()
            }
        }
        Granularity::Month => month_documents(&dir.join(date.format("%Y-%m").to_string())),
        Granularity::Year => {
            let prefix = format!("{}-", date.format("%Y"));
            sorted_entries(dir, |name, path| path.is_dir() && name.starts_with(&prefix))
                .iter()
                .flat_map(|month| month_documents(month))
                .collect()
        }
    }
}

fn month_documents(month_dir: &Path) -> Vec<PathBuf> {
    sorted_entries(month_dir, |name, path| {
        path.is_file() && name.starts_with("attendance_") && name.ends_with(".xlsx")
    })
}

fn sorted_entries(dir: &Path, keep: impl Fn(&str, &Path) -> bool) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| keep(n, p))
        })
        .collect();
    paths.sort();
    paths
}

/// Lazily walks documents, worksheets and rows in document order.
///
/// A document is opened only once the previous one is exhausted. Rows
/// whose first cell is empty are skipped.
pub struct ReportRows {
    pending: VecDeque<PathBuf>,
    rows: VecDeque<ReportRow>,
    phones: HashMap<String, String>,
}

impl ReportRows {
    pub fn new(documents: Vec<PathBuf>, phones: HashMap<String, String>) -> Self {
        Self {
            pending: documents.into(),
            rows: VecDeque::new(),
            phones,
        }
    }

    fn load(&mut self, path: &Path) -> Result<(), AttendanceError> {
        let book = read_document(path)?;
        for sheet in book.get_sheet_collection() {
            for row in 2..=sheet.get_highest_row() {
                let date = sheet.get_value((1, row));
                if date.is_empty() {
                    continue;
                }
                let employee_id = sheet.get_value((3, row));
                self.rows.push_back(ReportRow {
                    date,
                    time: sheet.get_value((2, row)),
                    phone: self.phones.get(&employee_id).cloned().unwrap_or_default(),
                    employee_id,
                    name: sheet.get_value((4, row)),
                    status: sheet.get_value((5, row)),
                    minutes_late: sheet.get_value((6, row)),
                });
            }
        }
        Ok(())
    }
}

impl Iterator for ReportRows {
    type Item = Result<ReportRow, AttendanceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.rows.pop_front() {
                return Some(Ok(row));
            }
            let path = self.pending.pop_front()?;
            if let Err(e) = self.load(&path) {
                return Some(Err(e));
            }
        }
    }
}

/// Serialise `rows` as CSV with the report header. Returns the text and
/// the number of records written.
pub fn write_csv(
    rows: impl Iterator<Item = Result<ReportRow, AttendanceError>>,
) -> Result<(String, usize), AttendanceError> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.write_record(CSV_HEADER).map_err(csv_error)?;
    let mut count = 0;
    for row in rows {
        writer.serialize(row?).map_err(csv_error)?;
        count += 1;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AttendanceError::Document(e.to_string()))?;
    let text = String::from_utf8(bytes).map_err(|e| AttendanceError::Document(e.to_string()))?;
    Ok((text, count))
}

fn csv_error(e: csv::Error) -> AttendanceError {
    AttendanceError::Document(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::Recorder;
    use chrono::NaiveTime;
    use kiosk_core::Identity;

    fn identity(id: &str, name: &str) -> Identity {
        Identity {
            employee_id: id.into(),
            name: name.into(),
            phone: String::new(),
            address: String::new(),
            photo_path: PathBuf::from("/photos/x.jpg"),
            registered_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
    }

    fn seed(dir: &Path) {
        let recorder = Recorder::new(dir.to_path_buf());
        let cutoff = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let marks = [
            ("E001", "Ada", (2024, 4, 30), (8, 50, 0)),
            ("E001", "Ada", (2024, 5, 2), (9, 10, 0)),
            ("E002", "Bob", (2024, 5, 2), (8, 30, 0)),
            ("E002", "Bob", (2024, 5, 3), (8, 40, 0)),
            ("E001", "Ada", (2023, 12, 29), (8, 0, 0)),
        ];
        for (id, name, (y, mo, d), (h, mi, s)) in marks {
            let at = NaiveDate::from_ymd_opt(y, mo, d)
                .unwrap()
                .and_hms_opt(h, mi, s)
                .unwrap();
            recorder.record(&identity(id, name), at, cutoff).unwrap();
        }
    }

    fn phones() -> HashMap<String, String> {
        HashMap::from([("E001".to_string(), "555-0100".to_string())])
    }

    fn collect(dir: &Path, granularity: Granularity, date: NaiveDate) -> Vec<ReportRow> {
        ReportRows::new(documents_for(dir, granularity, date), phones())
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_granularity_parse_and_filename() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        assert_eq!("Month".parse::<Granularity>().unwrap(), Granularity::Month);
        assert!("week".parse::<Granularity>().is_err());
        assert_eq!(Granularity::Day.filename(date), "attendance_2024-05-02.csv");
        assert_eq!(Granularity::Month.filename(date), "attendance_2024-05.csv");
        assert_eq!(Granularity::Year.filename(date), "attendance_2024.csv");
    }

    #[test]
    fn test_day_report_joins_phone() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let rows = collect(dir.path(), Granularity::Day, NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].employee_id, "E001");
        assert_eq!(rows[0].phone, "555-0100");
        assert_eq!(rows[0].status, "Late");
        assert_eq!(rows[0].minutes_late, "10");
        assert_eq!(rows[1].phone, "");
        assert_eq!(rows[1].minutes_late, "");
    }

    #[test]
    fn test_month_and_year_ranges() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let may = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        let month = collect(dir.path(), Granularity::Month, may);
        assert_eq!(month.len(), 3);
        assert_eq!(month[2].date, "2024-05-03");

        let year = collect(dir.path(), Granularity::Year, may);
        assert_eq!(year.len(), 4);
        assert_eq!(year[0].date, "2024-04-30");
    }

    #[test]
    fn test_missing_period_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        assert!(documents_for(dir.path(), Granularity::Year, date).is_empty());
        let (csv, count) = write_csv(ReportRows::new(Vec::new(), HashMap::new())).unwrap();
        assert_eq!(count, 0);
        assert_eq!(csv.trim(), "Date,Time,Employee ID,Name,Phone,Status,Minutes Late");
    }

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let rows = ReportRows::new(documents_for(dir.path(), Granularity::Day, date), phones());
        let (csv, count) = write_csv(rows).unwrap();
        assert_eq!(count, 2);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[1], "2024-05-02,09:10:00,E001,Ada,555-0100,Late,10");
        assert_eq!(lines[2], "2024-05-02,08:30:00,E002,Bob,,Present,");
    }

    #[test]
    fn test_corrupt_document_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let path = document_path(dir.path(), date);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"junk").unwrap();
        let mut rows = ReportRows::new(documents_for(dir.path(), Granularity::Day, date), HashMap::new());
        assert!(matches!(rows.next(), Some(Err(AttendanceError::Document(_)))));
        assert!(rows.next().is_none());
    }
}
