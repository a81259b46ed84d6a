//! V4L2 pull-mode capture via the `v4l` crate.

use crate::frame;
use crate::stream::{FrameSource, StreamEnd};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// A single mapped buffer: the driver never queues stale frames ahead of us.
const CAPTURE_BUFFERS: u32 = 1;

/// Longest wait for a dequeued buffer. A device silent for longer is treated
/// as stalled and the stream ends, which also bounds how long a cancelled
/// stream can stay blocked.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// Negotiated pixel format for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG: every buffer is a complete JPEG.
    Mjpeg,
}

/// Open V4L2 device streaming into one mmap buffer.
pub struct DeviceCapture {
    stream: MmapStream<'static>,
    // Keeps the device handle open for the lifetime of the stream.
    _device: Device,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl DeviceCapture {
    /// Open a V4L2 device by path (e.g., "/dev/video0") at 640x480.
    pub fn open(device_path: &str) -> Result<Self, StreamEnd> {
        if !Path::new(device_path).exists() {
            return Err(StreamEnd::OpenFailed(format!("device not found: {device_path}")));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                StreamEnd::OpenFailed(format!("{device_path}: device busy"))
            } else {
                StreamEnd::OpenFailed(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| StreamEnd::OpenFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(StreamEnd::OpenFailed(format!("{device_path}: not a capture device")));
        }

        let mut fmt = device
            .format()
            .map_err(|e| StreamEnd::OpenFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = frame::OUTPUT_WIDTH;
        fmt.height = frame::OUTPUT_HEIGHT;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| StreamEnd::OpenFailed(format!("failed to set format: {e}")))?;

        let pixel_format = if negotiated.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if negotiated.fourcc == FourCC::new(b"MJPG") {
            PixelFormat::Mjpeg
        } else {
            return Err(StreamEnd::OpenFailed(format!(
                "unsupported pixel format: {:?} (need YUYV or MJPG)",
                negotiated.fourcc
            )));
        };

        let mut stream = MmapStream::with_buffers(&device, BufType::VideoCapture, CAPTURE_BUFFERS)
            .map_err(|e| StreamEnd::OpenFailed(format!("failed to create mmap stream: {e}")))?;
        stream.set_timeout(DEQUEUE_TIMEOUT);

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "camera device opened"
        );

        Ok(Self {
            stream,
            _device: device,
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }

    fn to_jpeg(&self, buf: &[u8]) -> Result<Vec<u8>, StreamEnd> {
        let rgb = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height)
                .map_err(|e| StreamEnd::Decode(e.to_string()))?,
            PixelFormat::Mjpeg => image::load_from_memory(buf)
                .map_err(|e| StreamEnd::Decode(e.to_string()))?
                .to_rgb8(),
        };
        frame::encode_output_frame(&rgb).map_err(|e| StreamEnd::Decode(e.to_string()))
    }
}

impl FrameSource for DeviceCapture {
    fn next_frame(&mut self, cancel: &CancellationToken) -> Result<Vec<u8>, StreamEnd> {
        if cancel.is_cancelled() {
            return Err(StreamEnd::Cancelled);
        }
        let (buf, meta) = CaptureStream::next(&mut self.stream).map_err(|e| {
            if cancel.is_cancelled() {
                StreamEnd::Cancelled
            } else {
                StreamEnd::from_io(e)
            }
        })?;
        tracing::trace!(seq = meta.sequence, bytes = buf.len(), "dequeued buffer");
        // Copy out before converting: the mapped buffer is requeued on the next poll.
        let raw = buf.to_vec();
        self.to_jpeg(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device() {
        let result = DeviceCapture::open("/dev/video-does-not-exist");
        assert!(matches!(result, Err(StreamEnd::OpenFailed(msg)) if msg.contains("not found")));
    }
}
