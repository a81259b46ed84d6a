//! In-memory signature gallery, keyed by employee id.

use crate::detector::FaceLocator;
use crate::signature::{self, Signature};
use crate::types::Identity;

/// One signature per enrolled identity, in registry order.
#[derive(Debug, Default, Clone)]
pub struct SignatureStore {
    entries: Vec<(String, Signature)>,
}

impl SignatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the gallery from the registry, re-deriving each signature from
    /// the identity's stored photo.
    ///
    /// Identities whose photo is missing, unreadable or shows no face get no
    /// signature and are never matched. Only the first detected face of a
    /// photo is used.
    pub fn load(identities: &[Identity], locator: &mut dyn FaceLocator) -> Self {
        let mut store = Self::new();

        for identity in identities {
            let image = match image::open(&identity.photo_path) {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(
                        employee_id = %identity.employee_id,
                        path = %identity.photo_path.display(),
                        error = %e,
                        "photo unreadable; identity will not be matchable"
                    );
                    continue;
                }
            };

            let gray = signature::to_grayscale(&image);
            let Some(rect) = locator.locate(&gray).into_iter().next() else {
                tracing::warn!(
                    employee_id = %identity.employee_id,
                    "no face in enrollment photo; identity will not be matchable"
                );
                continue;
            };

            match Signature::from_face(&gray, &rect) {
                Ok(sig) => store.upsert(&identity.employee_id, sig),
                Err(e) => tracing::warn!(employee_id = %identity.employee_id, error = %e, "signature extraction failed"),
            }
        }

        tracing::info!(
            identities = identities.len(),
            signatures = store.len(),
            "signature store loaded"
        );
        store
    }

    /// Insert or replace the signature for `employee_id`.
    pub fn upsert(&mut self, employee_id: &str, signature: Signature) {
        match self.entries.iter_mut().find(|(id, _)| id == employee_id) {
            Some((_, existing)) => *existing = signature,
            None => self.entries.push((employee_id.to_string(), signature)),
        }
    }

    pub fn get(&self, employee_id: &str) -> Option<&Signature> {
        self.entries
            .iter()
            .find(|(id, _)| id == employee_id)
            .map(|(_, sig)| sig)
    }

    pub fn contains(&self, employee_id: &str) -> bool {
        self.get(employee_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Signature)> {
        self.entries.iter().map(|(id, sig)| (id.as_str(), sig))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FaceRect;
    use chrono::NaiveDate;
    use image::{GrayImage, Luma};
    use std::path::{Path, PathBuf};

    /// Reports a fixed rectangle for every image wider than `min_width`.
    struct FixedLocator {
        rect: FaceRect,
        min_width: u32,
    }

    impl FaceLocator for FixedLocator {
        fn locate(&mut self, gray: &GrayImage) -> Vec<FaceRect> {
            if gray.width() > self.min_width {
                vec![self.rect]
            } else {
                vec![]
            }
        }
    }

    fn identity(id: &str, photo: PathBuf) -> Identity {
        Identity {
            employee_id: id.into(),
            name: format!("Name {id}"),
            phone: String::new(),
            address: String::new(),
            photo_path: photo,
            registered_at: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        }
    }

    fn write_photo(dir: &Path, name: &str, width: u32) -> PathBuf {
        let path = dir.join(name);
        GrayImage::from_fn(width, 200, |x, y| Luma([((x * 3 + y) % 256) as u8]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_upsert_replaces() {
        let mut store = SignatureStore::new();
        store.upsert("E1", Signature::from_image(GrayImage::from_pixel(100, 100, Luma([1]))));
        store.upsert("E1", Signature::from_image(GrayImage::from_pixel(100, 100, Luma([2]))));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("E1").unwrap().as_image().get_pixel(0, 0)[0], 2);
    }

    #[test]
    fn test_iter_keeps_insertion_order() {
        let mut store = SignatureStore::new();
        for id in ["B", "A", "C"] {
            store.upsert(id, Signature::from_image(GrayImage::new(100, 100)));
        }
        let ids: Vec<&str> = store.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_load_skips_unmatchable_identities() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_photo(dir.path(), "good.png", 300);
        let faceless = write_photo(dir.path(), "faceless.png", 100);
        let identities = vec![
            identity("E1", good),
            identity("E2", faceless),
            identity("E3", dir.path().join("missing.png")),
        ];

        let mut locator = FixedLocator { rect: FaceRect::new(20, 20, 120, 120), min_width: 200 };
        let store = SignatureStore::load(&identities, &mut locator);

        assert_eq!(store.len(), 1);
        assert!(store.contains("E1"));
        assert!(!store.contains("E2"));
        assert!(!store.contains("E3"));
        assert_eq!(store.get("E1").unwrap().as_image().dimensions(), (100, 100));
    }
}
