//! Foreground occlusion binder
//!
//! Maintains a second render surface mirroring a constrained subset of
//! the presenter's visual state, so other stage content can render
//! strictly between the presenter's background and their visible body.
//! The copy never paints a background of its own.

use std::sync::Arc;

use uuid::Uuid;

use super::{BackgroundStyle, BlurAmount, Paint, Shape};
use crate::chroma::ChromaParameters;
use crate::geometry::Rect;
use crate::provider::FrameHandle;
use crate::segmenter::SegmentationMask;
use crate::stage::StageObjectId;
use crate::surface::{FilterSpec, RenderSurface, SegmentationFilterConfig};

/// The presenter state the foreground copy renders with.
///
/// An explicit value type rather than a view onto the presenter: the two
/// overridden fields are fixed at construction, everything else is copied.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenterRenderView {
    /// Always [`BackgroundStyle::Hide`] for the foreground copy.
    pub background_style: BackgroundStyle,
    /// Always `None` for the foreground copy.
    pub background_paint: Option<Paint>,
    pub shape: Shape,
    pub polygon_sides: u32,
    pub physical_green_screen: bool,
    pub chroma: ChromaParameters,
    pub blur_amount: BlurAmount,
}

impl PresenterRenderView {
    /// View for the foreground copy: real fields, with the background
    /// hidden and unpainted so the copy never redundantly paints one.
    pub fn for_foreground(
        shape: Shape,
        polygon_sides: u32,
        physical_green_screen: bool,
        chroma: ChromaParameters,
        blur_amount: BlurAmount,
    ) -> Self {
        Self {
            background_style: BackgroundStyle::Hide,
            background_paint: None,
            shape,
            polygon_sides,
            physical_green_screen,
            chroma,
            blur_amount,
        }
    }
}

/// Binds the foreground copy's surface to the presenter.
pub struct ForegroundBinder {
    id: StageObjectId,
    surface: Box<dyn RenderSurface>,
    hidden: bool,
}

impl ForegroundBinder {
    pub fn new(surface: Box<dyn RenderSurface>) -> Self {
        let mut binder = Self {
            id: Uuid::new_v4(),
            surface,
            hidden: true,
        };
        binder.surface.set_hidden(true);
        binder
    }

    /// Stage identifier of the foreground copy.
    pub fn id(&self) -> StageObjectId {
        self.id
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /*
     * Mirrored presenter state
     */

    pub fn mirror_contents(&mut self, contents: Option<FrameHandle>) {
        self.surface.set_contents(contents);
    }

    pub fn mirror_contents_dirty(&mut self) {
        self.surface.set_contents_dirty();
    }

    pub fn mirror_mask(&mut self, mask: Option<Arc<SegmentationMask>>) {
        self.surface.set_mask(mask);
    }

    pub fn mirror_content_rect(&mut self, rect: Rect) {
        self.surface.set_content_rect(rect);
    }

    pub fn mirror_geometry(&mut self, frame: Rect, opacity: f32) {
        self.surface.set_frame(frame);
        self.surface.set_opacity(opacity);
    }

    /// Refresh the copy's filter stack from a render view.
    pub fn apply_view(&mut self, view: &PresenterRenderView) {
        let mut filters = vec![FilterSpec::Segmentation(SegmentationFilterConfig {
            style: view.background_style,
            paint: view.background_paint,
            shape: view.shape,
            blur: None,
        })];
        if view.physical_green_screen {
            filters.push(FilterSpec::Chroma(view.chroma));
        }
        self.surface.set_filters(filters);
    }

    /*
     * Visibility
     */

    /// Re-evaluate whether the copy should draw: only when the
    /// presenter's video is enabled and exactly one object sits directly
    /// between the presenter and this copy in the stage order. Returns
    /// whether the hidden state changed.
    pub fn update_visibility(
        &mut self,
        video_enabled: bool,
        ordered_objects: &[StageObjectId],
        presenter_id: StageObjectId,
    ) -> bool {
        let visible = if !video_enabled {
            false
        } else {
            let background = ordered_objects.iter().position(|id| *id == presenter_id);
            let foreground = ordered_objects.iter().position(|id| *id == self.id);
            matches!(
                (background, foreground),
                (Some(bg), Some(fg)) if fg == bg + 2
            )
        };

        let hidden = !visible;
        if hidden == self.hidden {
            return false;
        }
        self.hidden = hidden;
        self.surface.set_hidden(hidden);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestSurface;

    fn binder() -> (ForegroundBinder, crate::testing::SurfaceHandle) {
        let (surface, handle) = TestSurface::create();
        (ForegroundBinder::new(surface), handle)
    }

    #[test]
    fn view_overrides_background_fields() {
        let view = PresenterRenderView::for_foreground(
            Shape::Circle,
            6,
            true,
            ChromaParameters::default(),
            BlurAmount::Small,
        );
        assert_eq!(view.background_style, BackgroundStyle::Hide);
        assert!(view.background_paint.is_none());
        assert_eq!(view.shape, Shape::Circle);
    }

    #[test]
    fn hidden_without_object_in_between() {
        let (mut binder, _handle) = binder();
        let presenter = Uuid::new_v4();

        // Adjacent: nothing between presenter and copy.
        let objects = vec![presenter, binder.id()];
        binder.update_visibility(true, &objects, presenter);
        assert!(binder.is_hidden());
    }

    #[test]
    fn visible_with_exactly_one_object_between() {
        let (mut binder, handle) = binder();
        let presenter = Uuid::new_v4();
        let sandwiched = Uuid::new_v4();

        let objects = vec![presenter, sandwiched, binder.id()];
        let changed = binder.update_visibility(true, &objects, presenter);
        assert!(changed);
        assert!(!binder.is_hidden());
        assert_eq!(handle.state().hidden, Some(false));
    }

    #[test]
    fn hidden_when_video_disabled() {
        let (mut binder, _handle) = binder();
        let presenter = Uuid::new_v4();
        let sandwiched = Uuid::new_v4();

        let objects = vec![presenter, sandwiched, binder.id()];
        binder.update_visibility(false, &objects, presenter);
        assert!(binder.is_hidden());
    }

    #[test]
    fn hidden_when_wider_gap() {
        let (mut binder, _handle) = binder();
        let presenter = Uuid::new_v4();

        let objects = vec![
            presenter,
            Uuid::new_v4(),
            Uuid::new_v4(),
            binder.id(),
        ];
        binder.update_visibility(true, &objects, presenter);
        assert!(binder.is_hidden());
    }

    #[test]
    fn update_reports_changes_only() {
        let (mut binder, _handle) = binder();
        let presenter = Uuid::new_v4();
        let objects = vec![presenter, Uuid::new_v4(), binder.id()];

        assert!(binder.update_visibility(true, &objects, presenter));
        assert!(!binder.update_visibility(true, &objects, presenter));
    }
}
