//! Generic pull-mode capture through an `ffmpeg` child process.
//!
//! ffmpeg decodes whatever the URL points at (RTSP, HTTP video, files),
//! scales to the output size and writes raw RGB24 frames to its stdout;
//! each frame is then re-encoded as JPEG. A watcher thread kills the child
//! as soon as the stream is cancelled, so a stalled read never outlives it.

use crate::frame::{self, OUTPUT_HEIGHT, OUTPUT_WIDTH};
use crate::stream::{FrameSource, StreamEnd};
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const FRAME_BYTES: usize = (OUTPUT_WIDTH * OUTPUT_HEIGHT * 3) as usize;

/// How often the watcher checks for cancellation.
const WATCH_INTERVAL: Duration = Duration::from_millis(50);

/// Running ffmpeg decoder for one camera URL.
pub struct FfmpegCapture {
    child: Arc<Mutex<Child>>,
    // Cancelled by the stream's token or when the capture drops.
    stop: CancellationToken,
    stdout: ChildStdout,
    buf: Vec<u8>,
    frames: u64,
}

impl FfmpegCapture {
    /// Spawn `ffmpeg_bin` reading `url`. Cancelling `cancel` kills the child,
    /// which unblocks a pending read.
    pub fn open(ffmpeg_bin: &str, url: &str, cancel: &CancellationToken) -> Result<Self, StreamEnd> {
        let mut child = Command::new(ffmpeg_bin)
            .args(capture_args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| StreamEnd::OpenFailed(format!("{ffmpeg_bin}: {e}")))?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            return Err(StreamEnd::OpenFailed("ffmpeg stdout unavailable".into()));
        };

        tracing::debug!(url, pid = child.id(), "ffmpeg capture started");

        let child = Arc::new(Mutex::new(child));
        let stop = cancel.child_token();
        if let Err(e) = spawn_watcher(Arc::clone(&child), stop.clone()) {
            let mut child = lock_child(&child);
            let _ = child.kill();
            let _ = child.wait();
            return Err(StreamEnd::OpenFailed(format!("failed to spawn capture watcher: {e}")));
        }

        Ok(Self {
            child,
            stop,
            stdout,
            buf: vec![0u8; FRAME_BYTES],
            frames: 0,
        })
    }
}

fn lock_child(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(|p| p.into_inner())
}

fn spawn_watcher(child: Arc<Mutex<Child>>, stop: CancellationToken) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("ffmpeg-watch".into())
        .spawn(move || {
            while !stop.is_cancelled() {
                std::thread::sleep(WATCH_INTERVAL);
            }
            let mut child = lock_child(&child);
            if let Ok(None) = child.try_wait() {
                tracing::debug!(pid = child.id(), "killing ffmpeg capture");
                let _ = child.kill();
            }
        })
        .map(|_| ())
}

/// ffmpeg arguments: minimal input buffering so frames are never stale,
/// scale to the output size, raw RGB24 on stdout.
fn capture_args(url: &str) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-fflags", "nobuffer", "-flags", "low_delay"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if url.to_ascii_lowercase().starts_with("rtsp://") {
        args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
    }
    args.extend(
        [
            "-i".to_string(),
            url.to_string(),
            "-an".to_string(),
            "-vf".to_string(),
            format!("scale={OUTPUT_WIDTH}:{OUTPUT_HEIGHT}"),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "pipe:1".to_string(),
        ],
    );
    args
}

impl FrameSource for FfmpegCapture {
    fn next_frame(&mut self, cancel: &CancellationToken) -> Result<Vec<u8>, StreamEnd> {
        if cancel.is_cancelled() {
            return Err(StreamEnd::Cancelled);
        }

        if let Err(e) = self.stdout.read_exact(&mut self.buf) {
            if cancel.is_cancelled() {
                return Err(StreamEnd::Cancelled);
            }
            // ffmpeg exits without output when it cannot open the input.
            if self.frames == 0 && e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Err(StreamEnd::OpenFailed("capture produced no frames".into()));
            }
            return Err(StreamEnd::from_io(e));
        }
        self.frames += 1;

        let rgb = frame::rgb_from_raw(self.buf.clone(), OUTPUT_WIDTH, OUTPUT_HEIGHT)
            .map_err(|e| StreamEnd::Decode(e.to_string()))?;
        frame::encode_output_frame(&rgb).map_err(|e| StreamEnd::Decode(e.to_string()))
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        self.stop.cancel();
        let mut child = lock_child(&self.child);
        let _ = child.kill();
        let _ = child.wait();
    }
}
