use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Raw BGR frame captured from a video source.
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The source could not be opened at all. Fatal to a pipeline session.
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    /// A finite source has been fully consumed (after the single rewind a
    /// loopable source is allowed).
    #[error("end of stream")]
    EndOfStream,
    /// The device produced an error mid-stream.
    #[error(transparent)]
    Read(#[from] anyhow::Error),
}

/// Blocking, exclusively-owned frame source.
///
/// Implementations are not safe for concurrent invocation; callers serialize
/// access through the [`SharedSource`] guard. `read` blocks until the next
/// frame is available or the stream ends.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<Frame, CaptureError>;

    /// Target (width, height) of frames produced by this source.
    fn dimensions(&self) -> (i32, i32);
}

/// Single mutual-exclusion guard around the capture device.
///
/// Both the inference loop and the snapshot-on-alert path acquire this lock,
/// which makes the device-exclusivity requirement explicit rather than
/// accidental.
pub type SharedSource = Arc<Mutex<Box<dyn FrameSource>>>;

pub fn shared(source: Box<dyn FrameSource>) -> SharedSource {
    Arc::new(Mutex::new(source))
}
