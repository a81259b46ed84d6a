//! MJPEG push-mode ingestion.
//!
//! Reads a multipart MJPEG HTTP response as a raw byte stream and cuts it
//! into JPEG images by scanning for start-of-image / end-of-image markers.
//! Multipart headers and boundaries between images are skipped implicitly.

use crate::stream::{FrameSource, StreamEnd};
use std::io::Read;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Bytes requested from the socket per read.
const CHUNK_SIZE: usize = 4096;
/// Give up when this many bytes accumulate without a complete image.
const MAX_BUFFERED: usize = 8 * 1024 * 1024;

/// Incremental JPEG splitter over an accumulating byte buffer.
#[derive(Debug, Default)]
pub struct JpegScanner {
    buf: Vec<u8>,
}

impl JpegScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes currently held, waiting for a complete image.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete `FFD8 … FFD9` span, trimming everything consumed.
    ///
    /// Bytes before the start marker are discarded. The end marker is only
    /// searched for after the start marker, so a stray end marker cannot wedge
    /// the scanner.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let Some(start) = find(&self.buf, &SOI) else {
            // Keep a trailing 0xFF: it may be the first half of a split marker.
            let keep = usize::from(self.buf.last() == Some(&0xFF));
            let drop = self.buf.len() - keep;
            self.buf.drain(..drop);
            return None;
        };
        if start > 0 {
            self.buf.drain(..start);
        }

        let end = find(&self.buf[SOI.len()..], &EOI)? + SOI.len() + EOI.len();
        let frame: Vec<u8> = self.buf.drain(..end).collect();
        Some(frame)
    }
}

fn find(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == needle)
}

/// Streaming HTTP MJPEG source.
pub struct MjpegSource {
    reader: Box<dyn Read + Send>,
    scanner: JpegScanner,
    chunk: Vec<u8>,
}

impl MjpegSource {
    /// Issue the streaming GET. `timeout` bounds both the connect and each read.
    pub fn connect(url: &str, timeout: Duration) -> Result<Self, StreamEnd> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .build();

        let response = agent.get(url).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => StreamEnd::Rejected(code),
            ureq::Error::Transport(t) => StreamEnd::ConnectFailed(t.to_string()),
        })?;

        tracing::info!(
            url,
            content_type = response.content_type(),
            "MJPEG stream connected"
        );

        Ok(Self::from_reader(response.into_reader()))
    }

    /// Build a source over an already-open byte stream.
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            scanner: JpegScanner::new(),
            chunk: vec![0u8; CHUNK_SIZE],
        }
    }
}

impl FrameSource for MjpegSource {
    fn next_frame(&mut self, cancel: &CancellationToken) -> Result<Vec<u8>, StreamEnd> {
        loop {
            if let Some(frame) = self.scanner.next_frame() {
                return Ok(frame);
            }
            if cancel.is_cancelled() {
                return Err(StreamEnd::Cancelled);
            }
            if self.scanner.buffered() > MAX_BUFFERED {
                return Err(StreamEnd::Decode(format!(
                    "no complete JPEG within {MAX_BUFFERED} bytes"
                )));
            }

            let n = self.reader.read(&mut self.chunk).map_err(StreamEnd::from_io)?;
            if n == 0 {
                return Err(StreamEnd::RemoteClosed);
            }
            self.scanner.push(&self.chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = SOI.to_vec();
        v.extend_from_slice(body);
        v.extend_from_slice(&EOI);
        v
    }

    fn part(image: &[u8]) -> Vec<u8> {
        let mut v = b"--myboundary\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        v.extend_from_slice(image);
        v.extend_from_slice(b"\r\n");
        v
    }

    #[test]
    fn test_single_frame() {
        let mut s = JpegScanner::new();
        s.push(&part(&jpeg(b"abc")));
        assert_eq!(s.next_frame(), Some(jpeg(b"abc")));
        assert_eq!(s.next_frame(), None);
    }

    #[test]
    fn test_two_frames_one_chunk() {
        let mut s = JpegScanner::new();
        let mut data = part(&jpeg(b"one"));
        data.extend(part(&jpeg(b"two")));
        s.push(&data);
        assert_eq!(s.next_frame(), Some(jpeg(b"one")));
        assert_eq!(s.next_frame(), Some(jpeg(b"two")));
        assert_eq!(s.next_frame(), None);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let data = part(&jpeg(b"split-body"));
        let mut s = JpegScanner::new();
        let mut frames = Vec::new();
        for byte in &data {
            s.push(std::slice::from_ref(byte));
            if let Some(f) = s.next_frame() {
                frames.push(f);
            }
        }
        assert_eq!(frames, vec![jpeg(b"split-body")]);
    }

    #[test]
    fn test_stray_end_marker_before_start() {
        let mut s = JpegScanner::new();
        let mut data = vec![0x00, 0xFF, 0xD9, 0x11];
        data.extend(jpeg(b"ok"));
        s.push(&data);
        assert_eq!(s.next_frame(), Some(jpeg(b"ok")));
    }

    #[test]
    fn test_garbage_is_trimmed() {
        let mut s = JpegScanner::new();
        s.push(&[0x01; 1000]);
        assert_eq!(s.next_frame(), None);
        assert_eq!(s.buffered(), 0);
    }

    #[test]
    fn test_incomplete_frame_waits() {
        let mut s = JpegScanner::new();
        s.push(&[0x10, 0xFF, 0xD8, 0x01, 0x02]);
        assert_eq!(s.next_frame(), None);
        assert_eq!(s.buffered(), 4);
        s.push(&[0xFF, 0xD9]);
        assert_eq!(s.next_frame(), Some(vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]));
    }

    #[test]
    fn test_source_ends_on_close() {
        let mut data = part(&jpeg(b"a"));
        data.extend(part(&jpeg(b"b")));
        let mut source = MjpegSource::from_reader(Box::new(Cursor::new(data)));
        let cancel = CancellationToken::new();

        assert_eq!(source.next_frame(&cancel).unwrap(), jpeg(b"a"));
        assert_eq!(source.next_frame(&cancel).unwrap(), jpeg(b"b"));
        assert!(matches!(source.next_frame(&cancel), Err(StreamEnd::RemoteClosed)));
    }

    #[test]
    fn test_source_honours_cancel() {
        let mut source = MjpegSource::from_reader(Box::new(Cursor::new(vec![0u8; 64])));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(source.next_frame(&cancel), Err(StreamEnd::Cancelled)));
    }
}
