//! Render surface capability
//!
//! The pipeline drives external graphics surfaces; it never implements
//! them. A surface accepts frame contents, an optional segmentation mask,
//! a normalized content rect and a filter stack, mirroring what the stage
//! renderer expects from a video layer.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::chroma::ChromaParameters;
use crate::geometry::{Rect, Size};
use crate::presenter::{BackgroundStyle, Paint, Shape};
use crate::provider::FrameHandle;
use crate::segmenter::SegmentationMask;
use crate::Millis;

/// Configuration of the segmentation-aware background filter.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationFilterConfig {
    pub style: BackgroundStyle,
    pub paint: Option<Paint>,
    pub shape: Shape,
    /// Blur strength when `style` is [`BackgroundStyle::Blur`].
    pub blur: Option<crate::presenter::BlurAmount>,
}

/// A filter installed on a render surface.
///
/// Cosmetic filters are opaque to the pipeline; it only needs to know
/// which entries are cosmetic so the masker can exclude them.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSpec {
    /// Background handling driven by the segmentation mask.
    Segmentation(SegmentationFilterConfig),
    /// Chroma keying against a physical green screen.
    Chroma(ChromaParameters),
    /// An opaque visual effect applied locally only.
    Cosmetic { id: uuid::Uuid, name: String },
}

impl FilterSpec {
    pub fn is_cosmetic(&self) -> bool {
        matches!(self, FilterSpec::Cosmetic { .. })
    }
}

/// External graphics surface consumed by the pipeline.
pub trait RenderSurface {
    fn set_contents(&mut self, contents: Option<FrameHandle>);

    /// Mark the current contents as needing re-upload without changing
    /// which frame is displayed.
    fn set_contents_dirty(&mut self);

    fn set_mask(&mut self, mask: Option<Arc<SegmentationMask>>);

    fn set_content_rect(&mut self, rect: Rect);

    fn set_filters(&mut self, filters: Vec<FilterSpec>);

    fn set_hidden(&mut self, hidden: bool);

    /// Placement of the surface on the stage, in stage pixels.
    fn set_frame(&mut self, frame: Rect);

    fn set_opacity(&mut self, opacity: f32);

    /// Enable or disable the drop shadow. Surfaces without shadow support
    /// may ignore this.
    fn set_shadow(&mut self, enabled: bool) {
        let _ = enabled;
    }

    /// Draw the current state. The masker calls this once per fed frame.
    fn render(&mut self, timestamp: Millis);
}

/// Pixel target shared between the masker and (on the surface path) the
/// external compositing surface bound to it.
///
/// Cheap to clone; all clones view the same backing.
#[derive(Clone)]
pub struct Canvas {
    inner: Rc<RefCell<CanvasBacking>>,
}

struct CanvasBacking {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CanvasBacking {
                width,
                height,
                pixels: vec![0; (width * height * 4) as usize],
            })),
        }
    }

    pub fn size(&self) -> Size {
        let backing = self.inner.borrow();
        Size::new(backing.width as f32, backing.height as f32)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let backing = self.inner.borrow();
        (backing.width, backing.height)
    }

    /// Reallocate the backing. Callers resize only when dimensions change.
    pub fn resize(&self, width: u32, height: u32) {
        let mut backing = self.inner.borrow_mut();
        backing.width = width;
        backing.height = height;
        backing.pixels = vec![0; (width * height * 4) as usize];
    }

    /// Replace the backing pixels. `pixels` must match the canvas size.
    pub fn write_pixels(&self, pixels: Vec<u8>) {
        let mut backing = self.inner.borrow_mut();
        debug_assert_eq!(
            pixels.len(),
            (backing.width * backing.height * 4) as usize
        );
        backing.pixels = pixels;
    }

    /// Run `f` over the backing pixels in place.
    pub fn with_pixels_mut<R>(&self, f: impl FnOnce(u32, u32, &mut [u8]) -> R) -> R {
        let mut backing = self.inner.borrow_mut();
        let (width, height) = (backing.width, backing.height);
        f(width, height, &mut backing.pixels)
    }

    /// Snapshot the backing pixels.
    pub fn snapshot(&self) -> Arc<Vec<u8>> {
        Arc::new(self.inner.borrow().pixels.clone())
    }
}
