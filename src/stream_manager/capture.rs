//! Video capture abstraction
//!
//! An opened capture is split in two: the [`FrameReader`] travels with the
//! frame sequence and is only touched outside the handle lock, while the
//! [`CaptureControl`] stays in the handle table so `stop()` can release the
//! resource even while a read is in flight.

use async_trait::async_trait;
use bytes::Bytes;

/// Capture-level failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// Resource refused to open
    #[error("Stream open failed: {0}")]
    Open(String),

    /// Mid-session read failure
    #[error("Stream read failed: {0}")]
    Read(String),

    /// Best-effort release failure (logged, never propagated)
    #[error("Resource release failed: {0}")]
    Release(String),
}

/// One raw frame as produced by the capture (a JPEG image)
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Bytes,
}

/// An open capture resource
pub struct VideoCapture {
    pub reader: Box<dyn FrameReader>,
    pub control: Box<dyn CaptureControl>,
}

/// Opens capture resources for video-source URLs
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn open(&self, url: &str) -> Result<VideoCapture, CaptureError>;
}

/// Read side of a capture
#[async_trait]
pub trait FrameReader: Send {
    /// Next frame; `Ok(None)` at end of stream. No timeout is applied.
    async fn read_frame(&mut self) -> Result<Option<RawFrame>, CaptureError>;
}

/// Release side of a capture
pub trait CaptureControl: Send {
    fn release(&mut self) -> Result<(), CaptureError>;
}
