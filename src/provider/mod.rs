//! Video provider capability
//!
//! A provider owns decoded camera frames and hands the pipeline opaque
//! handles with reference-counted lifetime control. Frame geometry is
//! normalized into a [`FrameDescriptor`] at this boundary so nothing
//! downstream probes frame objects for their dimensions.

#[cfg(feature = "camera-nokhwa")]
pub mod camera;

use std::sync::Arc;

use crate::geometry::Size;
use crate::Millis;

/// Opaque identifier of a live decoded frame inside its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(pub u64);

/// Normalized frame geometry plus its handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameDescriptor {
    pub width: u32,
    pub height: u32,
    pub handle: FrameHandle,
}

impl FrameDescriptor {
    pub fn size(&self) -> Size {
        Size::new(self.width as f32, self.height as f32)
    }
}

/// A readable RGBA copy of a frame's contents.
///
/// The pixel data is shared, so cloning is cheap and a copy handed to a
/// worker thread stays valid after the source frame is released.
#[derive(Debug, Clone)]
pub struct FramePixels {
    pub width: u32,
    pub height: u32,
    pub rgba: Arc<Vec<u8>>,
}

impl FramePixels {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Self {
        debug_assert_eq!(rgba.len(), (width * height * 4) as usize);
        Self {
            width,
            height,
            rgba: Arc::new(rgba),
        }
    }

    /// Solid-color pixels, handy for placeholders and tests.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..(width * height) {
            data.extend_from_slice(&rgba);
        }
        Self::new(width, height, data)
    }
}

/// Source of decoded camera frames with provider-managed lifetimes.
///
/// Lifetime contract: a frame stays valid while it is the current frame or
/// carries at least one `protect` hold. `detach` releases a frame the
/// pipeline no longer displays; some platforms cap live frames at two, so
/// superseded frames must be detached promptly.
pub trait VideoProvider {
    /// Native size of the video, zero until the first frame arrives.
    fn size(&self) -> Size;

    /// Whether the provider is delivering frames.
    fn active(&self) -> bool;

    /// Advance to the newest decoded frame. Returns whether the current
    /// contents changed since the last call.
    fn render(&mut self, timestamp: Millis) -> bool;

    /// The frame that should currently be displayed.
    fn current_frame(&self) -> Option<FrameDescriptor>;

    /// Take a hold on `frame`, keeping it alive past supersession.
    fn protect(&mut self, frame: FrameHandle);

    /// Release a hold taken with [`VideoProvider::protect`].
    fn unprotect(&mut self, frame: FrameHandle);

    /// Release a frame that has been superseded by newer contents.
    fn detach(&mut self, frame: FrameHandle);

    /// Whether this provider can expose readable pixel buffers at all.
    fn can_provide_buffer(&self) -> bool {
        false
    }

    /// Whether readable buffers are currently being produced.
    fn buffer_mode(&self) -> bool {
        false
    }

    /// Request (or stop requesting) readable pixel buffers. Takes effect
    /// for frames decoded after the call.
    fn set_desired_buffer_mode(&mut self, readable: bool) {
        let _ = readable;
    }

    /// Readable pixels for `frame`, when buffer mode is on and the frame
    /// is still live.
    fn frame_pixels(&self, frame: FrameHandle) -> Option<FramePixels>;

    /// Stop producing frames and release every buffer. Idempotent.
    fn destroy(&mut self);
}
