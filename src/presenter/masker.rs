//! Output compositor
//!
//! Produces a second, encoder-compatible composited stream from the
//! presenter's frames for transmission to the peer. Two execution paths
//! are fixed at construction: a dedicated compositing surface, or a 2D
//! canvas fallback for platforms where GPU canvas capture leaks memory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use image::imageops::FilterType;
use image::RgbaImage;

use super::{BackgroundStyle, Paint, Shape};
use crate::provider::{FrameDescriptor, FramePixels};
use crate::geometry::{Rect, Size};
use crate::segmenter::SegmentationMask;
use crate::surface::{Canvas, FilterSpec, RenderSurface, SegmentationFilterConfig};
use crate::Millis;

/// Output widths are padded to this block size so the encoder does not
/// reconfigure on every scale change.
pub const OUTPUT_WIDTH_ALIGNMENT: u32 = 80;

/// Smallest usable scale (20 pixels at 1280 wide).
pub const MIN_USER_SCALE: f32 = 0.0156;

const REFERENCE_ASPECT: f32 = 1.777_778;
const CAPTURE_FPS: u32 = 30;

/// One composited frame delivered to the peer transport.
#[derive(Debug, Clone)]
pub struct OutputFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Arc<Vec<u8>>,
    pub timestamp: Millis,
}

/// Video track captured from the masker's canvas.
///
/// Clones share the underlying capture; `stop` ends delivery for all of
/// them.
#[derive(Clone)]
pub struct OutputTrack {
    rx: Receiver<OutputFrame>,
    live: Arc<AtomicBool>,
}

impl OutputTrack {
    pub fn try_recv(&self) -> Option<OutputFrame> {
        self.rx.try_recv().ok()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.live.store(false, Ordering::Release);
    }
}

struct CaptureStream {
    #[allow(dead_code)]
    fps: u32,
    tx: Sender<OutputFrame>,
    track: OutputTrack,
}

impl CaptureStream {
    fn new(fps: u32) -> Self {
        let (tx, rx) = bounded(2);
        Self {
            fps,
            tx,
            track: OutputTrack {
                rx,
                live: Arc::new(AtomicBool::new(true)),
            },
        }
    }
}

/// Cached canvas holding the mask rendered as a green overlay. The
/// allocation is rebuilt only when the mask dimensions change; the pixel
/// contents are rewritten every frame.
struct MaskCanvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// Style inputs the masker needs from the presenter per render.
#[derive(Debug, Clone, Copy)]
pub struct MaskerStyle {
    pub physical_green_screen: bool,
    pub background_style: BackgroundStyle,
    pub background_paint: Option<Paint>,
}

/// The frame being fed to the masker, with pixels when the CPU path (or a
/// buffered provider) has them.
pub struct MaskerFrame<'a> {
    pub descriptor: FrameDescriptor,
    pub pixels: Option<&'a FramePixels>,
}

/// Secondary compositor feeding the peer connection.
pub struct Masker {
    canvas: Canvas,
    surface: Option<Box<dyn RenderSurface>>,
    uses_surface: bool,
    mask_canvas: Option<MaskCanvas>,
    size: Size,
    stream: Option<CaptureStream>,
    destroyed: bool,
}

impl Masker {
    /// Path selection happens here, once: a compositing surface when the
    /// platform can capture it safely, the 2D canvas otherwise.
    pub fn new(surface: Option<Box<dyn RenderSurface>>) -> Self {
        Self {
            canvas: Canvas::new(0, 0),
            uses_surface: surface.is_some(),
            surface,
            mask_canvas: None,
            size: Size::ZERO,
            stream: None,
            destroyed: false,
        }
    }

    /// Whether this masker draws from pixel buffers (the canvas fallback)
    /// rather than driving a compositing surface.
    pub fn needs_pixel_buffers(&self) -> bool {
        !self.uses_surface
    }

    /// Target output dimensions for a source size and user scale: width
    /// padded to the 80-pixel block, height from the 16:9 reference
    /// ratio, forced even.
    pub fn output_size(source_width: u32, source_height: u32, user_scale: f32) -> (u32, u32) {
        let scaled = user_scale.clamp(MIN_USER_SCALE, 1.0);
        if scaled >= 1.0 {
            return (source_width, source_height);
        }
        let width = ((source_width as f32 * scaled) / OUTPUT_WIDTH_ALIGNMENT as f32).ceil() as u32
            * OUTPUT_WIDTH_ALIGNMENT;
        let mut height = (width as f32 / REFERENCE_ASPECT).floor() as u32;
        if height & 1 == 1 {
            height += 1;
        }
        (width, height)
    }

    /// Filter configuration for the compositing surface. Only ever the
    /// segmentation filter: cosmetic filters must run on the remote end
    /// so the peer receives an un-stylized, correctly keyable frame.
    pub fn filter_config(style: &MaskerStyle) -> SegmentationFilterConfig {
        let (background_style, paint) = if style.physical_green_screen {
            // No need to bake a green background over a physical screen;
            // the remote side chroma-keys it, and applies paint itself.
            (BackgroundStyle::Show, None)
        } else if style.background_style == BackgroundStyle::Hide {
            // Fill the background with pure green locally; the remote
            // side applies the paint.
            (BackgroundStyle::Hide, None)
        } else {
            (style.background_style, style.background_paint)
        };
        SegmentationFilterConfig {
            style: background_style,
            paint,
            // Send the full frame; the remote side applies the shape mask.
            shape: Shape::Rectangle,
            blur: None,
        }
    }

    /// Composite one frame. Synchronous and side-effecting: resizes the
    /// canvas when the target dimensions change, draws frame and mask,
    /// and pushes a captured frame to the output track if one is live.
    pub fn render(
        &mut self,
        frame: MaskerFrame<'_>,
        mask: Option<&Arc<SegmentationMask>>,
        user_scale: f32,
        style: &MaskerStyle,
        timestamp: Millis,
    ) {
        if self.destroyed {
            return;
        }

        let (width, height) = Self::output_size(
            frame.descriptor.width,
            frame.descriptor.height,
            user_scale,
        );
        let target = Size::new(width as f32, height as f32);
        if target != self.size {
            self.size = target;
            self.canvas.resize(width, height);
            if let Some(surface) = self.surface.as_mut() {
                surface.set_frame(Rect::new(0.0, 0.0, target.width, target.height));
            }
        }

        if self.uses_surface {
            let Some(surface) = self.surface.as_mut() else {
                return;
            };
            surface.set_contents(Some(frame.descriptor.handle));
            surface.set_contents_dirty();
            surface.set_mask(mask.cloned());
            surface.set_filters(vec![FilterSpec::Segmentation(Self::filter_config(style))]);
            surface.render(timestamp);
        } else {
            let Some(pixels) = frame.pixels else {
                // CPU path needs a readable buffer; nothing to draw.
                return;
            };
            self.draw_frame(pixels, width, height);
            if let Some(mask) = mask {
                self.draw_mask_overlay(mask, width, height);
            }
        }

        self.push_capture_frame(timestamp);
    }

    /// Scale the frame pixels into the canvas.
    fn draw_frame(&mut self, pixels: &FramePixels, width: u32, height: u32) {
        let Some(source) =
            RgbaImage::from_raw(pixels.width, pixels.height, pixels.rgba.as_ref().clone())
        else {
            log::warn!(
                "frame buffer size mismatch: {}x{} with {} bytes",
                pixels.width,
                pixels.height,
                pixels.rgba.len()
            );
            return;
        };
        let scaled = if pixels.width == width && pixels.height == height {
            source
        } else {
            image::imageops::resize(&source, width, height, FilterType::Triangle)
        };
        self.canvas.write_pixels(scaled.into_raw());
    }

    /// Draw the mask as a green fill whose alpha is `255 - mask`,
    /// composited over the frame canvas.
    fn draw_mask_overlay(&mut self, mask: &SegmentationMask, width: u32, height: u32) {
        if mask.width == 0 || mask.height == 0 {
            return;
        }
        let rebuild = match &self.mask_canvas {
            Some(cached) => cached.width != mask.width || cached.height != mask.height,
            None => true,
        };
        if rebuild {
            self.mask_canvas = Some(MaskCanvas {
                width: mask.width,
                height: mask.height,
                pixels: vec![0; (mask.width * mask.height * 4) as usize],
            });
        }
        let Some(mask_canvas) = self.mask_canvas.as_mut() else {
            return;
        };
        for (index, value) in mask.data.iter().enumerate() {
            let out = index * 4;
            mask_canvas.pixels[out] = 0;
            mask_canvas.pixels[out + 1] = 255;
            mask_canvas.pixels[out + 2] = 0;
            mask_canvas.pixels[out + 3] = 255 - value;
        }

        let (mask_width, mask_height) = (mask.width, mask.height);
        let mask_pixels = &mask_canvas.pixels;
        self.canvas.with_pixels_mut(|canvas_width, canvas_height, pixels| {
            debug_assert_eq!(canvas_width, width);
            debug_assert_eq!(canvas_height, height);
            for y in 0..canvas_height {
                let src_y = (y * mask_height / canvas_height.max(1)).min(mask_height - 1);
                for x in 0..canvas_width {
                    let src_x = (x * mask_width / canvas_width.max(1)).min(mask_width - 1);
                    let src = ((src_y * mask_width + src_x) * 4) as usize;
                    let alpha = mask_pixels[src + 3] as u32;
                    if alpha == 0 {
                        continue;
                    }
                    let dst = ((y * canvas_width + x) * 4) as usize;
                    for channel in 0..3 {
                        let overlay = mask_pixels[src + channel] as u32;
                        let existing = pixels[dst + channel] as u32;
                        pixels[dst + channel] =
                            ((overlay * alpha + existing * (255 - alpha)) / 255) as u8;
                    }
                }
            }
        });
    }

    fn push_capture_frame(&mut self, timestamp: Millis) {
        let Some(stream) = &self.stream else {
            return;
        };
        if !stream.track.is_live() {
            return;
        }
        let (width, height) = self.canvas.dimensions();
        // Bounded channel: drop the frame if the consumer is behind.
        let _ = stream.tx.try_send(OutputFrame {
            width,
            height,
            rgba: self.canvas.snapshot(),
            timestamp,
        });
    }

    /// The capture track, created lazily and cached.
    pub fn output_track(&mut self) -> OutputTrack {
        let stream = self
            .stream
            .get_or_insert_with(|| CaptureStream::new(CAPTURE_FPS));
        stream.track.clone()
    }

    /// Release the capture stream and its track. Idempotent.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.track.stop();
        }
    }

    /// Stop capture and drop the compositing surface. Idempotent.
    pub fn destroy(&mut self) {
        self.stop();
        self.surface = None;
        self.destroyed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style() -> MaskerStyle {
        MaskerStyle {
            physical_green_screen: false,
            background_style: BackgroundStyle::Hide,
            background_paint: None,
        }
    }

    #[test]
    fn output_width_block_aligned_and_height_even() {
        let mut scale = MIN_USER_SCALE;
        while scale <= 1.0 {
            let (width, height) = Masker::output_size(1280, 720, scale);
            assert_eq!(width % OUTPUT_WIDTH_ALIGNMENT, 0, "scale {scale}");
            assert_eq!(height % 2, 0, "scale {scale}");
            scale += 0.013;
        }
        let (width, height) = Masker::output_size(1280, 720, 1.0);
        assert_eq!((width, height), (1280, 720));
    }

    #[test]
    fn out_of_range_scales_are_clamped() {
        assert_eq!(
            Masker::output_size(1280, 720, 0.0),
            Masker::output_size(1280, 720, MIN_USER_SCALE)
        );
        assert_eq!(Masker::output_size(1280, 720, 4.0), (1280, 720));
    }

    #[test]
    fn physical_screen_passes_frame_through() {
        let config = Masker::filter_config(&MaskerStyle {
            physical_green_screen: true,
            background_style: BackgroundStyle::Hide,
            background_paint: Some(Paint::color([1.0, 0.0, 0.0, 1.0])),
        });
        assert_eq!(config.style, BackgroundStyle::Show);
        assert!(config.paint.is_none());
        assert_eq!(config.shape, Shape::Rectangle);
    }

    #[test]
    fn hidden_background_drops_paint_for_remote() {
        let config = Masker::filter_config(&MaskerStyle {
            physical_green_screen: false,
            background_style: BackgroundStyle::Hide,
            background_paint: Some(Paint::color([1.0, 0.0, 0.0, 1.0])),
        });
        assert_eq!(config.style, BackgroundStyle::Hide);
        assert!(config.paint.is_none());
    }

    #[test]
    fn cpu_path_composites_green_over_background() {
        let mut masker = Masker::new(None);
        let track = masker.output_track();

        let pixels = FramePixels::solid(160, 90, [200, 50, 50, 255]);
        let descriptor = FrameDescriptor {
            width: 160,
            height: 90,
            handle: crate::provider::FrameHandle(1),
        };
        // Mask: everything background (0) -> full green overlay.
        let mask = Arc::new(SegmentationMask::new(4, 4, vec![0; 16]));

        masker.render(
            MaskerFrame {
                descriptor,
                pixels: Some(&pixels),
            },
            Some(&mask),
            1.0,
            &style(),
            16.0,
        );

        let frame = track.try_recv().expect("captured frame");
        assert_eq!((frame.width, frame.height), (160, 90));
        assert_eq!(frame.rgba[0], 0);
        assert_eq!(frame.rgba[1], 255);
        assert_eq!(frame.rgba[2], 0);
    }

    #[test]
    fn cpu_path_keeps_presenter_pixels_where_masked_in() {
        let mut masker = Masker::new(None);
        let track = masker.output_track();

        let pixels = FramePixels::solid(160, 90, [200, 50, 50, 255]);
        let descriptor = FrameDescriptor {
            width: 160,
            height: 90,
            handle: crate::provider::FrameHandle(1),
        };
        // Fully presenter: overlay alpha 0 everywhere.
        let mask = Arc::new(SegmentationMask::new(4, 4, vec![255; 16]));

        masker.render(
            MaskerFrame {
                descriptor,
                pixels: Some(&pixels),
            },
            Some(&mask),
            1.0,
            &style(),
            16.0,
        );

        let frame = track.try_recv().expect("captured frame");
        assert_eq!(frame.rgba[0], 200);
        assert_eq!(frame.rgba[1], 50);
    }

    #[test]
    fn canvas_resizes_only_when_dimensions_change() {
        let mut masker = Masker::new(None);
        let pixels = FramePixels::solid(1280, 720, [1, 2, 3, 255]);
        let descriptor = FrameDescriptor {
            width: 1280,
            height: 720,
            handle: crate::provider::FrameHandle(1),
        };

        masker.render(
            MaskerFrame {
                descriptor,
                pixels: Some(&pixels),
            },
            None,
            0.5,
            &style(),
            0.0,
        );
        let first = masker.canvas.dimensions();

        masker.render(
            MaskerFrame {
                descriptor,
                pixels: Some(&pixels),
            },
            None,
            0.5,
            &style(),
            16.0,
        );
        assert_eq!(masker.canvas.dimensions(), first);

        masker.render(
            MaskerFrame {
                descriptor,
                pixels: Some(&pixels),
            },
            None,
            0.25,
            &style(),
            33.0,
        );
        assert_ne!(masker.canvas.dimensions(), first);
    }

    #[test]
    fn stop_and_destroy_are_idempotent() {
        let mut masker = Masker::new(None);
        let track = masker.output_track();
        assert!(track.is_live());

        masker.stop();
        masker.stop();
        assert!(!track.is_live());

        masker.destroy();
        masker.destroy();

        // A destroyed masker silently ignores renders.
        let pixels = FramePixels::solid(16, 9, [0, 0, 0, 255]);
        masker.render(
            MaskerFrame {
                descriptor: FrameDescriptor {
                    width: 16,
                    height: 9,
                    handle: crate::provider::FrameHandle(1),
                },
                pixels: Some(&pixels),
            },
            None,
            1.0,
            &style(),
            0.0,
        );
        assert!(track.try_recv().is_none());
    }

    #[test]
    fn output_track_is_cached() {
        let mut masker = Masker::new(None);
        let first = masker.output_track();
        let second = masker.output_track();

        let pixels = FramePixels::solid(16, 10, [9, 9, 9, 255]);
        masker.render(
            MaskerFrame {
                descriptor: FrameDescriptor {
                    width: 16,
                    height: 10,
                    handle: crate::provider::FrameHandle(1),
                },
                pixels: Some(&pixels),
            },
            None,
            1.0,
            &style(),
            0.0,
        );

        // Both handles view the same capture.
        assert!(first.try_recv().is_some() || second.try_recv().is_some());
    }
}
