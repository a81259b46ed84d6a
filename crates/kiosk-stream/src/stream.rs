//! Camera URL classification and the lazy frame sequence.

use crate::camera::DeviceCapture;
use crate::capture::FfmpegCapture;
use crate::mjpeg::MjpegSource;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// URL substrings (matched case-insensitively) that mark a push-style MJPEG endpoint.
pub const MJPEG_HINTS: [&str; 5] = ["mjpeg", "video", ":4747", ":8080", "droidcam"];

/// Why a frame sequence ended.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    #[error("stream cancelled")]
    Cancelled,
    #[error("remote closed the stream")]
    RemoteClosed,
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("server answered HTTP {0}")]
    Rejected(u16),
    #[error("read timed out")]
    Timeout,
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("capture could not be opened: {0}")]
    OpenFailed(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

impl StreamEnd {
    pub(crate) fn from_io(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => StreamEnd::Timeout,
            std::io::ErrorKind::UnexpectedEof => StreamEnd::RemoteClosed,
            _ => StreamEnd::ReadFailed(e.to_string()),
        }
    }
}

/// How a camera URL is ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Push-style multipart MJPEG over HTTP, split on JPEG markers.
    Mjpeg,
    /// Local V4L2 device node, read frame by frame.
    Device,
    /// Any other URL (RTSP, HTTP video, files), decoded by an ffmpeg process.
    Capture,
}

/// Pick the ingestion mode for a camera URL.
///
/// Local device nodes are checked first: `/dev/video0` would otherwise hit
/// the `video` hint.
pub fn classify(url: &str) -> SourceKind {
    if url.starts_with("/dev/video") {
        return SourceKind::Device;
    }
    let lower = url.to_ascii_lowercase();
    if MJPEG_HINTS.iter().any(|hint| lower.contains(hint)) {
        SourceKind::Mjpeg
    } else {
        SourceKind::Capture
    }
}

/// Tunables for opening a stream.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Connect timeout (and per-read timeout) for MJPEG sources.
    pub connect_timeout: Duration,
    /// ffmpeg binary used for generic capture.
    pub ffmpeg_bin: String,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            ffmpeg_bin: "ffmpeg".to_string(),
        }
    }
}

/// A blocking producer of JPEG frames.
pub trait FrameSource {
    /// Block until the next frame is available, or report why there is none.
    fn next_frame(&mut self, cancel: &CancellationToken) -> Result<Vec<u8>, StreamEnd>;
}

enum State {
    Pending,
    Open(Box<dyn FrameSource>),
    Ended(StreamEnd),
}

/// Lazy, non-restartable sequence of JPEG frames from one camera URL.
///
/// The source is opened on the first poll. The sequence ends on the first
/// failure, remote close or cancellation; [`FrameStream::end_reason`] then
/// says which. Open a new stream to retry.
pub struct FrameStream {
    url: String,
    kind: SourceKind,
    options: StreamOptions,
    cancel: CancellationToken,
    state: State,
    frames: u64,
}

/// Prepare a frame sequence for `url`. Nothing is connected until the first poll.
pub fn open(url: &str, options: StreamOptions, cancel: CancellationToken) -> FrameStream {
    FrameStream {
        url: url.to_string(),
        kind: classify(url),
        options,
        cancel,
        state: State::Pending,
        frames: 0,
    }
}

impl FrameStream {
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Frames delivered so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Why the sequence ended, once it has.
    pub fn end_reason(&self) -> Option<&StreamEnd> {
        match &self.state {
            State::Ended(reason) => Some(reason),
            _ => None,
        }
    }

    fn connect(&self) -> Result<Box<dyn FrameSource>, StreamEnd> {
        tracing::info!(url = %self.url, kind = ?self.kind, "opening camera stream");
        let source: Box<dyn FrameSource> = match self.kind {
            SourceKind::Mjpeg => Box::new(MjpegSource::connect(&self.url, self.options.connect_timeout)?),
            SourceKind::Device => Box::new(DeviceCapture::open(&self.url)?),
            SourceKind::Capture => Box::new(FfmpegCapture::open(&self.options.ffmpeg_bin, &self.url, &self.cancel)?),
        };
        Ok(source)
    }

    fn end(&mut self, reason: StreamEnd) {
        tracing::info!(url = %self.url, frames = self.frames, reason = %reason, "camera stream ended");
        self.state = State::Ended(reason);
    }
}

impl Iterator for FrameStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if matches!(self.state, State::Ended(_)) {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.end(StreamEnd::Cancelled);
            return None;
        }

        if matches!(self.state, State::Pending) {
            match self.connect() {
                Ok(source) => self.state = State::Open(source),
                Err(reason) => {
                    self.end(reason);
                    return None;
                }
            }
        }

        let State::Open(source) = &mut self.state else {
            return None;
        };
        match source.next_frame(&self.cancel) {
            Ok(frame) => {
                self.frames += 1;
                Some(frame)
            }
            Err(reason) => {
                self.end(reason);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_mjpeg_hints() {
        assert_eq!(classify("http://10.0.0.5:4747/mjpegfeed"), SourceKind::Mjpeg);
        assert_eq!(classify("http://cam.local:8080/shot"), SourceKind::Mjpeg);
        assert_eq!(classify("http://phone/VIDEO"), SourceKind::Mjpeg);
        assert_eq!(classify("http://DroidCam.lan/feed"), SourceKind::Mjpeg);
    }

    #[test]
    fn test_classify_capture() {
        assert_eq!(classify("rtsp://admin:pw@10.0.0.9:554/stream1"), SourceKind::Capture);
        assert_eq!(classify("http://cam.local/live.h264"), SourceKind::Capture);
    }

    #[test]
    fn test_classify_device() {
        assert_eq!(classify("/dev/video0"), SourceKind::Device);
    }

    #[test]
    fn test_cancelled_before_open() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut stream = open("rtsp://10.0.0.1/none", StreamOptions::default(), cancel);
        assert_eq!(stream.next(), None);
        assert_eq!(stream.end_reason(), Some(&StreamEnd::Cancelled));
        assert_eq!(stream.next(), None);
    }

    #[test]
    fn test_open_failure_ends_silently() {
        let options = StreamOptions {
            ffmpeg_bin: "/nonexistent/ffmpeg".into(),
            ..StreamOptions::default()
        };
        let mut stream = open("rtsp://10.0.0.1/none", options, CancellationToken::new());
        assert_eq!(stream.next(), None);
        assert!(matches!(stream.end_reason(), Some(StreamEnd::OpenFailed(_))));
        assert_eq!(stream.frames(), 0);
    }

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = vec![0xFF, 0xD8];
        v.extend_from_slice(body);
        v.extend_from_slice(&[0xFF, 0xD9]);
        v
    }

    /// Serve one multipart MJPEG response carrying `images`, then close.
    fn serve_mjpeg(images: Vec<Vec<u8>>) -> String {
        use std::io::{Read, Write};
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let mut response = b"HTTP/1.1 200 OK\r\n\
                Content-Type: multipart/x-mixed-replace; boundary=cam\r\n\
                Connection: close\r\n\r\n"
                .to_vec();
            for image in images {
                response.extend_from_slice(b"--cam\r\nContent-Type: image/jpeg\r\n\r\n");
                response.extend_from_slice(&image);
                response.extend_from_slice(b"\r\n");
            }
            socket.write_all(&response).unwrap();
        });
        format!("http://{addr}/video")
    }

    #[test]
    fn test_mjpeg_stream_over_http() {
        let url = serve_mjpeg(vec![jpeg(b"first"), jpeg(b"second")]);
        let mut stream = open(&url, StreamOptions::default(), CancellationToken::new());
        assert_eq!(stream.kind(), SourceKind::Mjpeg);

        let frames: Vec<Vec<u8>> = stream.by_ref().collect();
        assert_eq!(frames, vec![jpeg(b"first"), jpeg(b"second")]);
        assert_eq!(stream.frames(), 2);
        assert_eq!(stream.end_reason(), Some(&StreamEnd::RemoteClosed));
    }

    #[test]
    fn test_mjpeg_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let mut stream = open(&format!("http://{addr}/mjpeg"), StreamOptions::default(), CancellationToken::new());
        assert_eq!(stream.next(), None);
        assert!(matches!(stream.end_reason(), Some(StreamEnd::ConnectFailed(_))));
    }

    #[test]
    fn test_io_error_mapping() {
        use std::io::{Error, ErrorKind};
        assert_eq!(StreamEnd::from_io(Error::from(ErrorKind::TimedOut)), StreamEnd::Timeout);
        assert_eq!(StreamEnd::from_io(Error::from(ErrorKind::UnexpectedEof)), StreamEnd::RemoteClosed);
        assert!(matches!(
            StreamEnd::from_io(Error::from(ErrorKind::ConnectionReset)),
            StreamEnd::ReadFailed(_)
        ));
    }
}
