//! Employee registry: the persisted list of enrolled identities (CSV).

use kiosk_core::Identity;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

const HEADER: [&str; 6] = [
    "Employee_ID",
    "Name",
    "Phone",
    "Address",
    "Photo_Path",
    "Registration_Date",
];

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("registry format error: {0}")]
    Csv(#[from] csv::Error),
    #[error("employee ID {0} already exists")]
    Duplicate(String),
}

/// All enrolled identities, in enrollment order. Append-only.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    identities: Vec<Identity>,
}

impl Registry {
    /// Load the registry, creating an empty file with a header if absent.
    ///
    /// Malformed rows are skipped with a warning.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut writer = csv::Writer::from_path(path)?;
            writer.write_record(HEADER)?;
            writer.flush()?;
        }

        let mut reader = csv::Reader::from_path(path)?;
        let mut identities = Vec::new();
        for (line, row) in reader.deserialize::<Identity>().enumerate() {
            match row {
                Ok(identity) => identities.push(identity),
                Err(e) => tracing::warn!(line = line + 2, error = %e, "skipping malformed registry row"),
            }
        }

        tracing::info!(path = %path.display(), identities = identities.len(), "registry loaded");
        Ok(Self {
            path: path.to_path_buf(),
            identities,
        })
    }

    pub fn all(&self) -> &[Identity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn get(&self, employee_id: &str) -> Option<&Identity> {
        self.identities.iter().find(|i| i.employee_id == employee_id)
    }

    pub fn contains(&self, employee_id: &str) -> bool {
        self.get(employee_id).is_some()
    }

    /// Phone number for `employee_id`, empty when unknown.
    pub fn phone_of(&self, employee_id: &str) -> String {
        self.get(employee_id).map(|i| i.phone.clone()).unwrap_or_default()
    }

    /// Append one identity to the file and to memory.
    ///
    /// Rejects duplicate ids without touching the file.
    pub fn append(&mut self, identity: Identity) -> Result<(), RegistryError> {
        if self.contains(&identity.employee_id) {
            return Err(RegistryError::Duplicate(identity.employee_id));
        }

        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.serialize(&identity)?;
        writer.flush()?;

        tracing::info!(employee_id = %identity.employee_id, "identity appended to registry");
        self.identities.push(identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn identity(id: &str, phone: &str) -> Identity {
        Identity {
            employee_id: id.into(),
            name: format!("Worker {id}"),
            phone: phone.into(),
            address: "12 Mill Lane, Springfield".into(),
            photo_path: PathBuf::from(format!("/photos/{id}.jpg")),
            registered_at: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(9, 15, 30)
                .unwrap(),
        }
    }

    #[test]
    fn test_load_creates_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registration.csv");
        let registry = Registry::load(&path).unwrap();
        assert!(registry.is_empty());
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents.trim(),
            "Employee_ID,Name,Phone,Address,Photo_Path,Registration_Date"
        );
    }

    #[test]
    fn test_append_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registration.csv");
        let mut registry = Registry::load(&path).unwrap();
        registry.append(identity("E001", "555-0100")).unwrap();
        registry.append(identity("E002", "555-0101")).unwrap();

        let reloaded = Registry::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.all()[0], identity("E001", "555-0100"));
        assert_eq!(reloaded.phone_of("E002"), "555-0101");
        assert!(fs::read_to_string(&path).unwrap().contains("2024-03-01 09:15:30"));
    }

    #[test]
    fn test_duplicate_rejected_without_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registration.csv");
        let mut registry = Registry::load(&path).unwrap();
        registry.append(identity("E001", "1")).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let err = registry.append(identity("E001", "2")).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(id) if id == "E001"));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_malformed_rows_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registration.csv");
        fs::write(
            &path,
            "Employee_ID,Name,Phone,Address,Photo_Path,Registration_Date\n\
             E1,Ann,1,Addr,/p/1.jpg,2024-01-01 08:00:00\n\
             E2,Bob,2,Addr,/p/2.jpg,not-a-date\n",
        )
        .unwrap();
        let registry = Registry::load(&path).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("E1"));
        assert_eq!(registry.phone_of("E9"), "");
    }
}
