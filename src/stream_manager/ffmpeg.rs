//! FfmpegSource - RTSP capture via an ffmpeg MJPEG image pipe
//!
//! - `-rtsp_transport tcp`: TCP interleaved RTSP (more reliable than UDP)
//! - `-f image2pipe -vcodec mjpeg`: a continuous run of JPEG images on stdout
//! - `kill_on_drop(true)`: a dropped Child never leaves an orphan ffmpeg behind

use super::capture::{CaptureControl, CaptureError, FrameReader, RawFrame, VideoCapture, VideoSource};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

const READ_CHUNK: usize = 64 * 1024;
/// 1枚分としてこれを超えたら壊れたストリームとみなす
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;
const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// VideoSource backed by an ffmpeg child process
pub struct FfmpegSource {
    binary: String,
    open_timeout: Duration,
    quality: u8,
}

impl FfmpegSource {
    /// # Arguments
    /// * `binary` - ffmpeg executable (path or name on PATH)
    /// * `open_timeout` - time allowed for the first frame to arrive
    /// * `quality` - mjpeg `-q:v` (2 = best, 31 = worst)
    pub fn new(binary: impl Into<String>, open_timeout: Duration, quality: u8) -> Self {
        Self {
            binary: binary.into(),
            open_timeout,
            quality,
        }
    }

    fn spawn(&self, url: &str) -> Result<Child, CaptureError> {
        let quality = self.quality.to_string();
        Command::new(&self.binary)
            .args([
                "-rtsp_transport", "tcp",
                "-i", url,
                "-f", "image2pipe",
                "-vcodec", "mjpeg",
                "-q:v", quality.as_str(),
                "-loglevel", "error",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::Open(format!("ffmpeg spawn failed: {}", e)))
    }
}

#[async_trait]
impl VideoSource for FfmpegSource {
    /// The capture counts as open once the first complete JPEG arrives
    async fn open(&self, url: &str) -> Result<VideoCapture, CaptureError> {
        let mut child = self.spawn(url)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Open("ffmpeg stdout unavailable".to_string()))?;
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut last = None;
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(line = %line, "ffmpeg");
                    last = Some(line);
                }
                last
            })
        });

        let mut reader = FfmpegReader {
            stdout,
            splitter: MjpegSplitter::default(),
            chunk: vec![0u8; READ_CHUNK],
            pending: None,
        };

        let failure = match tokio::time::timeout(self.open_timeout, reader.next_jpeg()).await {
            Ok(Ok(Some(first))) => {
                reader.pending = Some(first);
                None
            }
            Ok(Ok(None)) => Some("ffmpeg exited before the first frame".to_string()),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "no frame within {}s",
                self.open_timeout.as_secs_f32()
            )),
        };

        if let Some(reason) = failure {
            let _ = child.start_kill();
            let detail = last_stderr_line(stderr_task).await;
            return Err(CaptureError::Open(match detail {
                Some(line) => format!("{} ({})", reason, line),
                None => reason,
            }));
        }

        Ok(VideoCapture {
            reader: Box::new(reader),
            control: Box::new(FfmpegControl { child: Some(child) }),
        })
    }
}

async fn last_stderr_line(task: Option<JoinHandle<Option<String>>>) -> Option<String> {
    let task = task?;
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .ok()
        .and_then(|joined| joined.ok())
        .flatten()
}

struct FfmpegReader {
    stdout: ChildStdout,
    splitter: MjpegSplitter,
    chunk: Vec<u8>,
    pending: Option<Bytes>,
}

impl FfmpegReader {
    async fn next_jpeg(&mut self) -> Result<Option<Bytes>, CaptureError> {
        loop {
            if let Some(frame) = self.splitter.next_frame() {
                return Ok(Some(frame));
            }
            if self.splitter.overflowed() {
                return Err(CaptureError::Read(format!(
                    "no JPEG end marker within {} bytes",
                    self.splitter.buffered()
                )));
            }
            let n = self
                .stdout
                .read(&mut self.chunk)
                .await
                .map_err(|e| CaptureError::Read(format!("ffmpeg pipe: {}", e)))?;
            if n == 0 {
                return Ok(None);
            }
            self.splitter.push(&self.chunk[..n]);
        }
    }
}

#[async_trait]
impl FrameReader for FfmpegReader {
    async fn read_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        if let Some(data) = self.pending.take() {
            return Ok(Some(RawFrame { data }));
        }
        Ok(self.next_jpeg().await?.map(|data| RawFrame { data }))
    }
}

struct FfmpegControl {
    child: Option<Child>,
}

impl CaptureControl for FfmpegControl {
    fn release(&mut self) -> Result<(), CaptureError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!(status = %status, "ffmpeg already exited");
            return Ok(());
        }
        // Killing makes the reader's pipe hit EOF; the dropped Child is reaped by tokio
        child
            .start_kill()
            .map_err(|e| CaptureError::Release(format!("ffmpeg kill failed: {}", e)))
    }
}

/// Splits a byte stream of concatenated JPEG images at SOI/EOI markers
#[derive(Debug)]
pub struct MjpegSplitter {
    buf: BytesMut,
    limit: usize,
}

impl Default for MjpegSplitter {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }
}

impl MjpegSplitter {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            limit,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete image, discarding any bytes before its SOI marker
    pub fn next_frame(&mut self) -> Option<Bytes> {
        match find_marker(&self.buf, SOI) {
            Some(start) => {
                let _ = self.buf.split_to(start);
            }
            None => {
                // keep a trailing 0xFF, it may be the first half of the next SOI
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let discard = self.buf.len() - keep;
                let _ = self.buf.split_to(discard);
                return None;
            }
        }

        let end = find_marker(&self.buf[SOI.len()..], EOI)? + SOI.len() + EOI.len();
        Some(self.buf.split_to(end).freeze())
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// An open image has grown past the limit without its EOI
    pub fn overflowed(&self) -> bool {
        self.buf.len() > self.limit
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}
