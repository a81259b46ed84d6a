//! kiosk-stream: live camera ingestion for the attendance kiosk.
//!
//! Turns a camera URL into a lazy sequence of JPEG frames, either by
//! splitting a push-style MJPEG HTTP response on JPEG markers or by pulling
//! frames from a capture backend (V4L2 device or ffmpeg) and re-encoding them.

pub mod camera;
pub mod capture;
pub mod frame;
pub mod mjpeg;
pub mod stream;

pub use stream::{classify, open, FrameSource, FrameStream, SourceKind, StreamEnd, StreamOptions};
