//! kiosk-core: face location and matching for the attendance kiosk.
//!
//! Faces are located with a classical funnel-structured cascade, reduced to
//! fixed 100×100 grayscale signatures, and compared by template correlation.

pub mod detector;
pub mod matcher;
pub mod signature;
pub mod store;
pub mod types;

pub use detector::{CascadeLocator, FaceLocator};
pub use matcher::{Matcher, TemplateMatcher, ACCEPT_THRESHOLD};
pub use signature::{Signature, SIGNATURE_SIZE};
pub use store::SignatureStore;
pub use types::{FaceRect, Identity, MatchResult};
