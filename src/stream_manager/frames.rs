//! FrameSequence - one consumer's view of a live stream session
//!
//! Each step checks the session under the handle lock, then reads and encodes
//! outside it. Cleanup runs exactly once, on whichever comes first: deactivation,
//! end of stream, read failure or the sequence being dropped.

use super::capture::{FrameReader, RawFrame};
use super::handle::HandleTable;
use crate::camera_registry::CameraRegistry;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub const MJPEG_BOUNDARY: &str = "frame";

/// Content type for an HTTP body built from [`FrameSequence::into_stream`]
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Wrap one JPEG as a multipart/x-mixed-replace part
pub fn encode_frame(frame: &RawFrame) -> Bytes {
    let mut part = BytesMut::with_capacity(frame.data.len() + 64);
    part.extend_from_slice(b"--");
    part.extend_from_slice(MJPEG_BOUNDARY.as_bytes());
    part.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(&frame.data);
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

#[derive(Debug)]
enum EndReason {
    Deactivated,
    EndOfStream,
    ReadFailed,
    Dropped,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Deactivated => "deactivated",
            Self::EndOfStream => "end_of_stream",
            Self::ReadFailed => "read_failed",
            Self::Dropped => "consumer_dropped",
        };
        f.write_str(s)
    }
}

/// Releases the session's handle and idles its record, once
struct SessionGuard {
    address: String,
    session_id: Uuid,
    handles: Arc<HandleTable>,
    registry: Arc<CameraRegistry>,
    finished: bool,
}

impl SessionGuard {
    fn finish(&mut self, reason: EndReason) {
        if self.finished {
            return;
        }
        self.finished = true;

        // A superseded or stopped session finds nothing here; its record belongs to someone else now
        let taken = self.handles.with_lock(|map| {
            let handle = map.take_session(&self.address, self.session_id);
            if handle.is_some() {
                self.registry.mark_session_ended(&self.address);
            }
            handle
        });

        match taken {
            Some(handle) => {
                self.handles.dispose(handle);
                tracing::info!(
                    address = %self.address,
                    session_id = %self.session_id,
                    reason = %reason,
                    "Stream session ended"
                );
            }
            None => {
                tracing::debug!(
                    address = %self.address,
                    session_id = %self.session_id,
                    reason = %reason,
                    "Stream session already released"
                );
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.finish(EndReason::Dropped);
    }
}

/// Lazily produced, encoded frames of one stream session
pub struct FrameSequence {
    reader: Box<dyn FrameReader>,
    guard: SessionGuard,
    frames: u64,
}

impl FrameSequence {
    pub(crate) fn new(
        address: &str,
        session_id: Uuid,
        reader: Box<dyn FrameReader>,
        handles: Arc<HandleTable>,
        registry: Arc<CameraRegistry>,
    ) -> Self {
        Self {
            reader,
            guard: SessionGuard {
                address: address.to_string(),
                session_id,
                handles,
                registry,
                finished: false,
            },
            frames: 0,
        }
    }

    pub fn address(&self) -> &str {
        &self.guard.address
    }

    pub fn session_id(&self) -> Uuid {
        self.guard.session_id
    }

    pub fn frames_yielded(&self) -> u64 {
        self.frames
    }

    /// Next encoded part, or `None` once the session has ended
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        if self.guard.finished {
            return None;
        }
        if !self
            .guard
            .handles
            .is_active(&self.guard.address, self.guard.session_id)
        {
            self.guard.finish(EndReason::Deactivated);
            return None;
        }

        match self.reader.read_frame().await {
            Ok(Some(frame)) => {
                self.frames += 1;
                Some(encode_frame(&frame))
            }
            Ok(None) => {
                self.guard.finish(EndReason::EndOfStream);
                None
            }
            Err(e) => {
                tracing::warn!(
                    address = %self.guard.address,
                    session_id = %self.guard.session_id,
                    frames = self.frames,
                    error = %e,
                    "Frame read failed"
                );
                self.guard.finish(EndReason::ReadFailed);
                None
            }
        }
    }

    /// Adapt into a `Stream` of multipart parts (see [`MJPEG_CONTENT_TYPE`])
    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        futures::stream::unfold(self, |mut seq| async move {
            let part = seq.next_frame().await?;
            Some((part, seq))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_layout() {
        let frame = RawFrame {
            data: Bytes::from_static(b"\xFF\xD8jpeg\xFF\xD9"),
        };
        let part = encode_frame(&frame);
        assert_eq!(
            part.as_ref(),
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8jpeg\xFF\xD9\r\n".as_slice()
        );
        assert!(MJPEG_CONTENT_TYPE.ends_with(MJPEG_BOUNDARY));
    }
}
