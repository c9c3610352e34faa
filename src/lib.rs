//! Real-time presenter video pipeline.
//!
//! This crate drives the camera-to-peer video path of a virtual-camera
//! presentation tool: it pulls frames from a [`provider::VideoProvider`],
//! decides per tick whether the presenter must be segmented from their
//! background, calibrates chroma-key parameters against a physical green
//! screen, and composites an encoder-friendly output stream for a remote
//! peer while feeding the local render surface.
//!
//! All pipeline logic runs on a single render-driving callback
//! ([`presenter::Presenter::advance`]); segmentation and calibration are
//! dispatched to worker threads and their results polled on later ticks,
//! so the render loop never blocks.

pub mod chroma;
pub mod geometry;
pub mod observe;
pub mod presenter;
pub mod provider;
pub mod segmenter;
pub mod settings;
pub mod stage;
pub mod surface;

#[cfg(test)]
pub(crate) mod testing;

/// Millisecond timestamps in the host's render-callback timeline.
///
/// All timers (calibration cooldown, device-settle debounce) are deadlines
/// in this timeline, so the pipeline is deterministic under test.
pub type Millis = f64;

pub use chroma::ChromaParameters;
pub use presenter::{
    BackgroundStyle, BlurAmount, ChromaMode, Paint, Presenter, PresenterOptions, Shape,
};
pub use provider::{FrameDescriptor, FrameHandle, FramePixels, VideoProvider};
pub use segmenter::{CalibrationEstimate, SegmentationMask, Segmenter};
pub use stage::{NoticeSink, PresenterContext, StageAccessor};
pub use surface::RenderSurface;
