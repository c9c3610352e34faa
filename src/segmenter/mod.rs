//! Segmentation and calibration capability
//!
//! A segmenter turns a frame into a foreground alpha mask, or estimates
//! chroma-key parameters from a frame of a physical green screen. Both
//! operations are non-blocking: they return task handles that the
//! orchestrator polls on later ticks.

pub mod estimate;
pub mod worker;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use thiserror::Error;

use crate::geometry::EdgeInsets;
use crate::provider::FramePixels;
use crate::Millis;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum InferenceError {
    /// The request was dropped before producing a result (shutdown,
    /// backpressure). Not worth logging.
    #[error("request cancelled")]
    Cancelled,
    #[error("inference backend error: {0}")]
    Backend(String),
    #[error("frame has no readable buffer")]
    NoBuffer,
}

impl InferenceError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, InferenceError::Cancelled)
    }
}

/// Poll result of an [`AsyncTask`].
#[derive(Debug)]
pub enum TaskPoll<T> {
    /// Still running; poll again next tick.
    Pending,
    Ready(T),
}

/// One-shot result handle resolved on a later tick.
///
/// Dropping the sender without sending resolves the task as
/// [`InferenceError::Cancelled`].
pub struct AsyncTask<T> {
    rx: Receiver<Result<T, InferenceError>>,
}

impl<T> AsyncTask<T> {
    /// A connected (completer, task) pair.
    pub fn pair() -> (TaskCompleter<T>, AsyncTask<T>) {
        let (tx, rx) = bounded(1);
        (TaskCompleter { tx }, AsyncTask { rx })
    }

    /// An already-resolved task, for synchronous implementations.
    pub fn ready(result: Result<T, InferenceError>) -> AsyncTask<T> {
        let (tx, rx) = bounded(1);
        let _ = tx.send(result);
        AsyncTask { rx }
    }

    pub fn poll(&self) -> TaskPoll<Result<T, InferenceError>> {
        match self.rx.try_recv() {
            Ok(result) => TaskPoll::Ready(result),
            Err(TryRecvError::Empty) => TaskPoll::Pending,
            Err(TryRecvError::Disconnected) => TaskPoll::Ready(Err(InferenceError::Cancelled)),
        }
    }
}

/// Sending half of an [`AsyncTask`].
pub struct TaskCompleter<T> {
    tx: Sender<Result<T, InferenceError>>,
}

impl<T> TaskCompleter<T> {
    pub fn complete(self, result: Result<T, InferenceError>) {
        let _ = self.tx.send(result);
    }
}

/// Per-pixel foreground alpha aligned to a source frame.
///
/// `0` is background, `255` fully presenter.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl SegmentationMask {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width * height) as usize);
        Self {
            width,
            height,
            data,
        }
    }

    /// Nearest-neighbor sample at normalized coordinates.
    pub fn sample(&self, x: f32, y: f32) -> u8 {
        if self.width == 0 || self.height == 0 {
            return 0;
        }
        let px = ((x * self.width as f32) as u32).min(self.width - 1);
        let py = ((y * self.height as f32) as u32).min(self.height - 1);
        self.data[(py * self.width + px) as usize]
    }
}

/// Result of a green-screen parameter estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationEstimate {
    /// 0-100 score; below 50 the estimate is not trustworthy.
    pub confidence: f32,
    /// Echo of the request's `is_initial` flag: whether this estimate
    /// would start an auto-adjust session.
    pub session_start: bool,
    /// Estimated screen color, 0-255 per channel.
    pub key_rgb: [u8; 3],
    /// Lower chroma-distance threshold, 0-255.
    pub threshold_low: u8,
    /// Upper chroma-distance threshold, 0-255.
    pub threshold_high: u8,
}

pub type SegmentationTask = AsyncTask<SegmentationMask>;
pub type CalibrationTask = AsyncTask<CalibrationEstimate>;
pub type GestureTask = AsyncTask<()>;

/// Person segmentation and green-screen estimation over camera frames.
pub trait Segmenter {
    /// Whether this segmenter supports green-screen estimation.
    fn can_estimate(&self) -> bool;

    /// Produce a foreground mask for `frame`.
    fn segment(&mut self, frame: &FramePixels, timestamp: Millis) -> SegmentationTask;

    /// Estimate chroma-key parameters from `frame`, sampling inside the
    /// given crop insets. `is_initial` marks the first estimation of an
    /// auto-adjust session and is echoed back as `session_start`.
    fn estimate_calibration(
        &mut self,
        frame: &FramePixels,
        timestamp: Millis,
        is_initial: bool,
        crop: EdgeInsets,
    ) -> CalibrationTask;

    /// Release backend resources. Idempotent.
    fn destroy(&mut self);
}

/// Optional per-frame gesture recognition; each dispatch runs under a
/// frame hold that the orchestrator releases on completion.
pub trait GestureRecognizer {
    fn process(&mut self, frame: &FramePixels, timestamp: Millis) -> GestureTask;
}
