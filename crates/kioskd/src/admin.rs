//! Admin credential store: one username with an Argon2id password hash.
//!
//! When no credential file exists the fixed default pair is accepted.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "admin";

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("admin store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("admin store format error: {0}")]
    Format(#[from] serde_json::Error),
    #[error("all fields required")]
    MissingField,
    #[error("incorrect old password")]
    IncorrectPassword,
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Which credential a successful login matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Default,
    Custom,
}

/// Stored credential; `password_hash` is a PHC string carrying its own salt
/// and parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Credential {
    username: String,
    password_hash: String,
}

impl Credential {
    fn new(username: &str, password: &str) -> Result<Self, AdminError> {
        Ok(Self {
            username: username.to_string(),
            password_hash: hash_password(password)?,
        })
    }

    fn matches(&self, username: &str, password: &str) -> Result<bool, AdminError> {
        Ok(verify_password(password, &self.password_hash)? && self.username == username)
    }
}

fn hash_password(password: &str) -> Result<String, AdminError> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>()).map_err(|e| AdminError::Hash(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AdminError::Hash(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool, AdminError> {
    let parsed = PasswordHash::new(hash).map_err(|e| AdminError::Hash(format!("invalid stored hash: {e}")))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AdminError::Hash(e.to_string())),
    }
}

pub struct AdminStore {
    path: PathBuf,
}

impl AdminStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Check a login. Returns the credential kind that matched, if any.
    pub fn verify(&self, username: &str, password: &str) -> Option<AuthKind> {
        let stored = self.load().and_then(|cred| match cred {
            Some(cred) => cred.matches(username, password).map(Some),
            None => Ok(None),
        });
        match stored {
            Ok(Some(matched)) => matched.then_some(AuthKind::Custom),
            Ok(None) => (username == DEFAULT_USERNAME && password == DEFAULT_PASSWORD)
                .then_some(AuthKind::Default),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "admin store unreadable, rejecting login");
                None
            }
        }
    }

    /// Replace the stored credential.
    pub fn save(&self, username: &str, password: &str) -> Result<(), AdminError> {
        if username.is_empty() || password.is_empty() {
            return Err(AdminError::MissingField);
        }
        let cred = Credential::new(username, password)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&cred)?)?;
        fs::rename(&tmp, &self.path)?;
        tracing::info!(username, "admin credentials updated");
        Ok(())
    }

    /// Change credentials after re-checking `current_username`/`old_password`.
    pub fn change(
        &self,
        current_username: &str,
        old_password: &str,
        new_username: &str,
        new_password: &str,
    ) -> Result<(), AdminError> {
        if old_password.is_empty() || new_username.is_empty() || new_password.is_empty() {
            return Err(AdminError::MissingField);
        }
        if self.verify(current_username, old_password).is_none() {
            return Err(AdminError::IncorrectPassword);
        }
        self.save(new_username, new_password)
    }

    fn load(&self) -> Result<Option<Credential>, AdminError> {
        match fs::read(&self.path) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, AdminStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AdminStore::new(dir.path().join("admin.json"));
        (dir, store)
    }

    #[test]
    fn test_default_credentials() {
        let (_dir, store) = store();
        assert_eq!(store.verify("admin", "admin"), Some(AuthKind::Default));
        assert_eq!(store.verify("admin", "wrong"), None);
    }

    #[test]
    fn test_custom_replaces_default() {
        let (_dir, store) = store();
        store.save("manager", "s3cret").unwrap();
        assert_eq!(store.verify("manager", "s3cret"), Some(AuthKind::Custom));
        assert_eq!(store.verify("admin", "admin"), None);
    }

    #[test]
    fn test_stored_hash_is_argon2id() {
        let (dir, store) = store();
        store.save("manager", "s3cret").unwrap();
        let cred: Credential =
            serde_json::from_slice(&fs::read(dir.path().join("admin.json")).unwrap()).unwrap();
        assert!(cred.password_hash.starts_with("$argon2id$"));
        assert!(verify_password("s3cret", &cred.password_hash).unwrap());
        assert!(!verify_password("S3cret", &cred.password_hash).unwrap());
    }

    #[test]
    fn test_corrupt_hash_rejects_login() {
        let (dir, store) = store();
        fs::write(
            dir.path().join("admin.json"),
            r#"{"username":"manager","password_hash":"not-a-phc-string"}"#,
        )
        .unwrap();
        assert_eq!(store.verify("manager", "anything"), None);
        assert_eq!(store.verify("admin", "admin"), None);
    }

    #[test]
    fn test_hash_is_salted() {
        let (dir, store) = store();
        store.save("manager", "s3cret").unwrap();
        let raw = fs::read_to_string(dir.path().join("admin.json")).unwrap();
        assert!(!raw.contains("s3cret"));
        let first: Credential = serde_json::from_str(&raw).unwrap();
        store.save("manager", "s3cret").unwrap();
        let second: Credential =
            serde_json::from_slice(&fs::read(dir.path().join("admin.json")).unwrap()).unwrap();
        assert_ne!(first.password_hash, second.password_hash);
    }

    #[test]
    fn test_change_requires_old_password() {
        let (_dir, store) = store();
        let err = store.change("admin", "nope", "boss", "pw").unwrap_err();
        assert!(matches!(err, AdminError::IncorrectPassword));
        assert!(matches!(
            store.change("admin", "admin", "", "pw"),
            Err(AdminError::MissingField)
        ));
        store.change("admin", "admin", "boss", "pw").unwrap();
        assert_eq!(store.verify("boss", "pw"), Some(AuthKind::Custom));
    }
}
