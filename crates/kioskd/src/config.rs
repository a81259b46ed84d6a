use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of all persisted state (registry, photos, attendance documents, settings).
    pub data_dir: PathBuf,
    /// Path to the SeetaFace cascade model used by the face locator.
    pub model_path: PathBuf,
    /// HTTP listen address.
    pub listen_addr: SocketAddr,
    /// Connect (and per-read) timeout for MJPEG camera streams.
    pub stream_connect_timeout: Duration,
    /// Frames buffered between a stream's ingest thread and its HTTP response.
    pub stream_channel_depth: usize,
    /// ffmpeg binary used for pull-mode camera capture.
    pub ffmpeg_bin: String,
}

impl Config {
    /// Load configuration from `KIOSK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("KIOSK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("attendance-kiosk")
            });

        let model_path = std::env::var("KIOSK_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models/seeta_fd_frontal_v1.0.bin"));

        let listen_addr = std::env::var("KIOSK_LISTEN_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 5000)));

        Self {
            data_dir,
            model_path,
            listen_addr,
            stream_connect_timeout: Duration::from_secs(env_u64("KIOSK_STREAM_CONNECT_TIMEOUT_SECS", 5)),
            stream_channel_depth: env_usize("KIOSK_STREAM_CHANNEL_DEPTH", 2).max(1),
            ffmpeg_bin: std::env::var("KIOSK_FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
        }
    }

    /// Configuration rooted at `data_dir`, everything else default.
    #[cfg(test)]
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            model_path: data_dir.join("models/seeta_fd_frontal_v1.0.bin"),
            data_dir,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            stream_connect_timeout: Duration::from_secs(5),
            stream_channel_depth: 2,
            ffmpeg_bin: "ffmpeg".to_string(),
        }
    }

    pub fn photos_dir(&self) -> PathBuf {
        self.data_dir.join("photos")
    }

    pub fn attendance_dir(&self) -> PathBuf {
        self.data_dir.join("attendance")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("registration.csv")
    }

    pub fn attended_snapshot_path(&self) -> PathBuf {
        self.data_dir.join("attendance_cache.json")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn admin_path(&self) -> PathBuf {
        self.data_dir.join("admin.json")
    }

    pub fn stream_options(&self) -> kiosk_stream::StreamOptions {
        kiosk_stream::StreamOptions {
            connect_timeout: self.stream_connect_timeout,
            ffmpeg_bin: self.ffmpeg_bin.clone(),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_under_data_dir() {
        let config = Config::with_data_dir(PathBuf::from("/srv/kiosk"));
        assert_eq!(config.registry_path(), PathBuf::from("/srv/kiosk/registration.csv"));
        assert_eq!(config.attendance_dir(), PathBuf::from("/srv/kiosk/attendance"));
        assert!(config.model_path.starts_with("/srv/kiosk/models"));
    }
}
