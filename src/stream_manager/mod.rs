//! StreamManager - per-camera live stream sessions
//!
//! ## Guarantees
//!
//! - At most one open capture per camera address at any observable instant
//! - Starting a stream replaces the previous session; the old resource is
//!   released before the new one is opened
//! - Every session's cleanup runs exactly once, however it ends
//! - `connected=true` on a camera record implies a live handle for it
//!
//! ## Flow
//!
//! ```text
//! start(address)
//!   → registry.video_source()        NotFound / NotResolved, no side effects
//!   → release previous handle        record: discovered
//!   → source.open(url)               outside any lock
//!   → register handle                record: connected (StreamCancelled if stopped meanwhile)
//!   → FrameSequence (check → read → encode, per frame)
//! ```

mod capture;
mod ffmpeg;
mod frames;
mod handle;

pub use capture::{CaptureControl, CaptureError, FrameReader, RawFrame, VideoCapture, VideoSource};
pub use ffmpeg::{FfmpegSource, MjpegSplitter};
pub use frames::{encode_frame, FrameSequence, MJPEG_BOUNDARY, MJPEG_CONTENT_TYPE};
pub use handle::{HandleTable, StreamHandle};

use crate::camera_registry::CameraRegistry;
use crate::error::{Error, Result};
use handle::StartingGuard;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle of one camera's stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Idle,
    Starting,
    Active,
    Stopping,
}

/// Owns the capture handles for all cameras
pub struct StreamManager {
    registry: Arc<CameraRegistry>,
    handles: Arc<HandleTable>,
    source: Arc<dyn VideoSource>,
}

impl StreamManager {
    pub fn new(registry: Arc<CameraRegistry>, source: Arc<dyn VideoSource>) -> Self {
        let handles = registry.handle_table();
        Self {
            registry,
            handles,
            source,
        }
    }

    /// Open a fresh session for `address`, replacing any existing one
    pub async fn start(&self, address: &str) -> Result<FrameSequence> {
        let url = self.registry.video_source(address)?;
        let session_id = Uuid::new_v4();

        let (starting, superseded) = self.handles.with_lock(|map| {
            let starting = StartingGuard::begin(&self.handles, map, address);
            let superseded = map.take(address);
            if superseded.is_some() {
                self.registry.mark_session_ended(address);
            }
            (starting, superseded)
        });
        if let Some(old) = superseded {
            tracing::info!(
                address = %address,
                session_id = %old.session_id(),
                "Releasing previous stream session"
            );
            self.handles.dispose(old);
        }

        let capture = match self.source.open(&url).await {
            Ok(capture) => capture,
            Err(e) => {
                let message = e.to_string();
                let recorded = self.handles.with_lock(|map| {
                    // a stop or a concurrent start already owns the outcome
                    if starting.is_cancelled(map) || map.contains(address) {
                        false
                    } else {
                        self.registry.mark_open_failed(address, &message);
                        true
                    }
                });
                tracing::warn!(
                    address = %address,
                    error = %message,
                    recorded = recorded,
                    "Stream open failed"
                );
                return Err(e.into());
            }
        };

        let handle = StreamHandle::new(address, session_id, capture.control);
        let registered = self.handles.with_lock(|map| {
            if starting.is_cancelled(map) {
                Err((map.detach(handle), Error::StreamCancelled(address.to_string())))
            } else if self.registry.mark_session_started(address) {
                Ok(map.insert(handle))
            } else {
                Err((map.detach(handle), Error::NotFound(address.to_string())))
            }
        });
        drop(starting);

        match registered {
            Ok(displaced) => {
                if let Some(other) = displaced {
                    tracing::info!(
                        address = %address,
                        session_id = %other.session_id(),
                        "Concurrent stream session replaced"
                    );
                    self.handles.dispose(other);
                }
            }
            Err((orphan, err)) => {
                // stopped, re-resolved or removed while the capture was opening
                tracing::info!(
                    address = %address,
                    session_id = %session_id,
                    reason = err.code(),
                    "Opened capture discarded"
                );
                self.handles.dispose(orphan);
                return Err(err);
            }
        }

        tracing::info!(address = %address, session_id = %session_id, "Stream session started");

        Ok(FrameSequence::new(
            address,
            session_id,
            capture.reader,
            self.handles.clone(),
            self.registry.clone(),
        ))
    }

    /// Tear down the session for `address`. Idempotent; returns whether a
    /// session was running or starting. A `start` still opening its capture
    /// fails with `StreamCancelled`. The record is always left disconnected.
    pub fn stop(&self, address: &str) -> bool {
        let stopped = self.handles.release_with(address, |_| {
            self.registry.mark_session_ended(address);
        });
        if stopped {
            tracing::info!(address = %address, "Stream session stopped");
        } else {
            tracing::debug!(address = %address, "Stop requested with no active session");
        }
        stopped
    }

    /// Stop every session (shutdown)
    pub fn stop_all(&self) -> usize {
        let count = self.handles.release_all_with(|addresses| {
            for address in addresses {
                self.registry.mark_session_ended(address);
            }
        });
        if count > 0 {
            tracing::info!(count = count, "All stream sessions stopped");
        }
        count
    }

    pub fn state(&self, address: &str) -> StreamState {
        self.handles.state(address)
    }

    pub fn active_addresses(&self) -> Vec<String> {
        self.handles.active_addresses()
    }
}
