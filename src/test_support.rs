//! Test doubles for the adapter and capture seams

use crate::camera_registry::CameraRegistry;
use crate::device_adapter::{DeviceAdapter, ResolveError};
use crate::stream_manager::{
    CaptureControl, CaptureError, FrameReader, RawFrame, StreamManager, VideoCapture, VideoSource,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const CAM: &str = "10.0.0.5";
pub const CAM_URL: &str = "rtsp://admin:pw@10.0.0.5:554/stream1";
pub const JPEG: &[u8] = b"\xFF\xD8fake-jpeg\xFF\xD9";

/// DeviceAdapter returning a fixed outcome
pub struct StubAdapter {
    outcome: Result<String, ResolveError>,
    calls: AtomicUsize,
}

impl StubAdapter {
    pub fn ok(url: &str) -> Self {
        Self {
            outcome: Ok(url.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: ResolveError) -> Self {
        Self {
            outcome: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceAdapter for StubAdapter {
    async fn resolve(
        &self,
        _address: &str,
        _username: &str,
        _password: &str,
    ) -> Result<String, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

/// What a scripted reader does after its fixed frames run out
#[derive(Debug, Clone, Copy)]
pub enum Ending {
    EndOfStream,
    ReadFailure,
    Endless,
}

/// VideoSource yielding a fixed script and counting opens/releases
pub struct ScriptedSource {
    frames: usize,
    ending: Ending,
    fail_open: bool,
    fail_release: bool,
    open_delay: Duration,
    gate: Option<Arc<Notify>>,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(frames: usize, ending: Ending) -> Self {
        Self {
            frames,
            ending,
            fail_open: false,
            fail_release: false,
            open_delay: Duration::ZERO,
            gate: None,
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn endless() -> Self {
        Self::new(0, Ending::Endless)
    }

    pub fn refusing() -> Self {
        Self {
            fail_open: true,
            ..Self::endless()
        }
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Each read waits for one `notify_one()` on `gate`
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoSource for ScriptedSource {
    async fn open(&self, _url: &str) -> Result<VideoCapture, CaptureError> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if self.fail_open {
            return Err(CaptureError::Open("connection refused".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(VideoCapture {
            reader: Box::new(ScriptedReader {
                remaining: self.frames,
                ending: self.ending,
                gate: self.gate.clone(),
            }),
            control: Box::new(CountingControl {
                released: self.released.clone(),
                fail: self.fail_release,
                done: false,
            }),
        })
    }
}

struct ScriptedReader {
    remaining: usize,
    ending: Ending,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl FrameReader for ScriptedReader {
    async fn read_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        match &self.gate {
            Some(gate) => gate.notified().await,
            None => tokio::task::yield_now().await,
        }
        let frame = RawFrame {
            data: Bytes::from_static(JPEG),
        };
        if self.remaining > 0 {
            self.remaining -= 1;
            return Ok(Some(frame));
        }
        match self.ending {
            Ending::EndOfStream => Ok(None),
            Ending::ReadFailure => Err(CaptureError::Read("connection reset".to_string())),
            Ending::Endless => Ok(Some(frame)),
        }
    }
}

struct CountingControl {
    released: Arc<AtomicUsize>,
    fail: bool,
    done: bool,
}

impl CaptureControl for CountingControl {
    fn release(&mut self) -> Result<(), CaptureError> {
        if !self.done {
            self.done = true;
            self.released.fetch_add(1, Ordering::SeqCst);
        }
        if self.fail {
            return Err(CaptureError::Release("device already closed".to_string()));
        }
        Ok(())
    }
}

/// Registry with `CAM` discovered and resolved, plus a manager over `source`
pub async fn resolved_camera(source: Arc<ScriptedSource>) -> (Arc<CameraRegistry>, Arc<StreamManager>) {
    let registry = Arc::new(CameraRegistry::new(Arc::new(StubAdapter::ok(CAM_URL))));
    registry.apply_discovery(&[CAM.to_string()]);
    registry
        .resolve(CAM, "admin", "pw")
        .await
        .expect("stub resolve");
    let manager = Arc::new(StreamManager::new(registry.clone(), source));
    (registry, manager)
}
