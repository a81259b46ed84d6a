//! Open live streams per camera, so removing a camera can stop its viewers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct StreamRegistry {
    next_id: AtomicU64,
    open: Mutex<HashMap<u32, HashMap<u64, CancellationToken>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new stream for `camera_id`. The stream is forgotten when the
    /// returned guard drops.
    pub fn register(self: &Arc<Self>, camera_id: u32) -> StreamGuard {
        let token = CancellationToken::new();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .entry(camera_id)
            .or_default()
            .insert(id, token.clone());
        tracing::debug!(camera_id, stream = id, "stream registered");
        StreamGuard {
            registry: Arc::clone(self),
            camera_id,
            id,
            token,
        }
    }

    /// Cancel every open stream of `camera_id`. Returns how many were open.
    pub fn cancel_camera(&self, camera_id: u32) -> usize {
        let Some(streams) = self.lock().remove(&camera_id) else {
            return 0;
        };
        for token in streams.values() {
            token.cancel();
        }
        tracing::info!(camera_id, streams = streams.len(), "camera streams cancelled");
        streams.len()
    }

    #[cfg(test)]
    pub fn open_count(&self, camera_id: u32) -> usize {
        self.lock().get(&camera_id).map_or(0, HashMap::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, HashMap<u64, CancellationToken>>> {
        self.open.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn unregister(&self, camera_id: u32, id: u64) {
        let mut open = self.lock();
        if let Some(streams) = open.get_mut(&camera_id) {
            streams.remove(&id);
            if streams.is_empty() {
                open.remove(&camera_id);
            }
        }
    }
}

/// Registration of one open stream.
pub struct StreamGuard {
    registry: Arc<StreamRegistry>,
    camera_id: u32,
    id: u64,
    token: CancellationToken,
}

impl StreamGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.camera_id, self.id);
    }
}
