//! Presenter object
//!
//! The stage object representing a live camera presenter. Owns the video
//! provider, the segmenter, the output masker and the foreground binder,
//! and derives per-tick rendering decisions from its visual configuration.

pub mod calibration;
pub mod foreground;
pub mod masker;
mod pipeline;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chroma::ChromaParameters;
use crate::geometry::{
    aspect_fit, content_rect_from_crop_insets, polygon_bounding_size, EdgeInsets, Rect, Size,
};
use crate::observe::{Observable, ObserverId};
use crate::provider::{FrameHandle, VideoProvider};
use crate::segmenter::{
    CalibrationTask, GestureRecognizer, GestureTask, SegmentationMask, SegmentationTask, Segmenter,
};
use crate::settings::{SettingsStore, CHROMA_SETTINGS_KEY};
use crate::stage::{Notice, NoticeSink, PresenterContext, StageAccessor, StageObjectId};
use crate::surface::{FilterSpec, RenderSurface, SegmentationFilterConfig};

use calibration::CalibrationMachine;
use foreground::ForegroundBinder;
use masker::Masker;

/// How the presenter's camera background is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackgroundStyle {
    /// Show the full camera frame.
    #[default]
    Show,
    /// Remove the background entirely (virtual green screen).
    Hide,
    /// Blur the background behind the presenter.
    Blur,
}

impl BackgroundStyle {
    pub fn all() -> &'static [BackgroundStyle] {
        &[
            BackgroundStyle::Show,
            BackgroundStyle::Hide,
            BackgroundStyle::Blur,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackgroundStyle::Show => "Show",
            BackgroundStyle::Hide => "Hide",
            BackgroundStyle::Blur => "Blur",
        }
    }
}

/// Outline shape of the presenter cutout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Shape {
    #[default]
    Rectangle,
    Circle,
    Polygon,
}

impl Shape {
    pub fn all() -> &'static [Shape] {
        &[Shape::Rectangle, Shape::Circle, Shape::Polygon]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Shape::Rectangle => "Rectangle",
            Shape::Circle => "Circle",
            Shape::Polygon => "Polygon",
        }
    }
}

/// How chroma-key parameters are chosen when a physical green screen is
/// in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChromaMode {
    /// Periodically re-estimated from the camera.
    #[default]
    Automatic,
    /// Fixed by the user.
    Manual,
}

/// Strength of the background blur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlurAmount {
    #[default]
    Small,
    Large,
}

/// A solid paint applied over the (hidden or shown) background.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Paint {
    /// RGBA, each channel in `[0, 1]`.
    pub color: [f32; 4],
}

impl Paint {
    pub fn color(color: [f32; 4]) -> Self {
        Self { color }
    }
}

const MIN_POLYGON_SIDES: u32 = 3;
const MAX_POLYGON_SIDES: u32 = 10;
const DEFAULT_POLYGON_SIDES: u32 = 6;

const DEFAULT_Z_INDEX: i32 = 0;
const DEFAULT_FOREGROUND_Z_INDEX: i32 = 100;

/// Construction options for a [`Presenter`].
pub struct PresenterOptions {
    /// Whether this presenter runs segmentation and gesture recognition
    /// locally (the local presenter does; remote ones are pre-masked).
    pub local_inference: bool,
    /// Compositing surface for the masker's accelerated path; `None`
    /// selects the CPU canvas fallback (platforms where GPU canvas
    /// capture leaks).
    pub masker_surface: Option<Box<dyn RenderSurface>>,
    /// Surface for the foreground occlusion copy, when the stage supports
    /// sandwiching content between the presenter's background and body.
    pub foreground_surface: Option<Box<dyn RenderSurface>>,
}

impl Default for PresenterOptions {
    fn default() -> Self {
        Self {
            local_inference: true,
            masker_surface: None,
            foreground_surface: None,
        }
    }
}

pub(crate) struct PendingSegmentation {
    pub frame: crate::provider::FrameDescriptor,
    pub task: SegmentationTask,
}

pub(crate) struct PendingGesture {
    pub frame: FrameHandle,
    pub task: GestureTask,
}

pub(crate) struct PendingCalibration {
    pub task: CalibrationTask,
}

/// The live camera presenter.
pub struct Presenter {
    id: StageObjectId,
    context: PresenterContext,

    provider: Option<Box<dyn VideoProvider>>,
    segmenter: Option<Box<dyn Segmenter>>,
    gesture_recognizer: Option<Box<dyn GestureRecognizer>>,
    surface: Box<dyn RenderSurface>,
    masker: Option<Masker>,
    foreground: Option<ForegroundBinder>,

    // Visual configuration
    shape: Shape,
    polygon_sides: u32,
    background_style: BackgroundStyle,
    background_paint: Option<Paint>,
    physical_green_screen: bool,
    chroma_mode: ChromaMode,
    blur_amount: BlurAmount,
    force_segmentation_for_alpha: bool,
    mirror_video: bool,
    crop_insets: EdgeInsets,
    effect: Option<FilterSpec>,
    shadow_enabled: bool,
    scale: f32,
    video_enabled: bool,
    using_reduced_video_frame: bool,
    masker_needs_render: bool,
    z_index: i32,
    foreground_z_index: i32,

    // Derived state
    segmentation_required: Observable<bool>,
    chroma: Observable<ChromaParameters>,
    should_use_masker_output: bool,
    local_segmentation_enabled: bool,
    video_ready: bool,

    // Pipeline state
    pub(crate) last_camera_size: Size,
    pub(crate) displayed_frame: Option<FrameHandle>,
    pub(crate) current_mask: Option<Arc<SegmentationMask>>,
    pub(crate) pending_segmentation: Option<PendingSegmentation>,
    pub(crate) pending_gesture: Option<PendingGesture>,
    pub(crate) pending_calibration: Option<PendingCalibration>,
    pub(crate) calibration: CalibrationMachine,
    destroyed: bool,
}

impl Presenter {
    pub fn new(
        context: PresenterContext,
        surface: Box<dyn RenderSurface>,
        options: PresenterOptions,
    ) -> Self {
        let PresenterOptions {
            local_inference,
            masker_surface,
            foreground_surface,
        } = options;

        let restored_chroma = context
            .settings
            .borrow()
            .get(CHROMA_SETTINGS_KEY)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();

        let masker = local_inference.then(|| {
            if masker_surface.is_some() {
                log::info!("masker using compositing surface path");
            } else {
                log::info!("masker using 2D canvas fallback");
            }
            Masker::new(masker_surface)
        });

        let mut presenter = Self {
            id: Uuid::new_v4(),
            context,
            provider: None,
            segmenter: None,
            gesture_recognizer: None,
            surface,
            masker,
            foreground: foreground_surface.map(ForegroundBinder::new),
            shape: Shape::default(),
            polygon_sides: DEFAULT_POLYGON_SIDES,
            background_style: BackgroundStyle::default(),
            background_paint: None,
            physical_green_screen: true,
            chroma_mode: ChromaMode::default(),
            blur_amount: BlurAmount::default(),
            force_segmentation_for_alpha: false,
            mirror_video: false,
            crop_insets: EdgeInsets::ZERO,
            effect: None,
            shadow_enabled: false,
            scale: 0.8,
            video_enabled: true,
            using_reduced_video_frame: false,
            masker_needs_render: false,
            z_index: DEFAULT_Z_INDEX,
            foreground_z_index: DEFAULT_FOREGROUND_Z_INDEX,
            segmentation_required: Observable::new(false),
            chroma: Observable::new(restored_chroma),
            should_use_masker_output: false,
            local_segmentation_enabled: local_inference,
            video_ready: false,
            last_camera_size: Size::ZERO,
            displayed_frame: None,
            current_mask: None,
            pending_segmentation: None,
            pending_gesture: None,
            pending_calibration: None,
            calibration: CalibrationMachine::new(),
            destroyed: false,
        };
        presenter.segmentation_requirements_changed();
        presenter.update_display_filters();
        presenter.update_surface_visibility();
        presenter
    }

    pub fn id(&self) -> StageObjectId {
        self.id
    }

    /// Stage identifier of the foreground copy, when one exists.
    pub fn foreground_id(&self) -> Option<StageObjectId> {
        self.foreground.as_ref().map(|binder| binder.id())
    }

    /*
     * Collaborators
     */

    pub fn set_video_provider(&mut self, provider: Option<Box<dyn VideoProvider>>) {
        if let Some(mut previous) = self.provider.take() {
            self.release_pending_holds_on(previous.as_mut());
            previous.destroy();
        }
        self.displayed_frame = None;
        self.provider = provider;
        if self.provider.is_some() {
            // Give the camera a moment to stabilize before estimating.
            self.calibration.note_device_settled();
        } else {
            self.video_ready = false;
            self.update_surface_visibility();
        }
    }

    pub fn has_video_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn set_segmenter(&mut self, segmenter: Option<Box<dyn Segmenter>>) {
        if let Some(mut previous) = self.segmenter.take() {
            previous.destroy();
        }
        self.segmenter = segmenter;
        self.refresh_calibration_eligibility();
    }

    pub fn set_gesture_recognizer(&mut self, recognizer: Option<Box<dyn GestureRecognizer>>) {
        self.gesture_recognizer = recognizer;
    }

    /*
     * Visual configuration
     */

    pub fn background_style(&self) -> BackgroundStyle {
        self.background_style
    }

    pub fn set_background_style(&mut self, style: BackgroundStyle) {
        if self.background_style == style {
            return;
        }
        self.background_style = style;
        self.segmentation_requirements_changed();
        self.update_display_filters();
        self.update_layer_shadow();
    }

    pub fn background_paint(&self) -> Option<Paint> {
        self.background_paint
    }

    pub fn set_background_paint(&mut self, paint: Option<Paint>) {
        if self.background_paint == paint {
            return;
        }
        self.background_paint = paint;
        self.segmentation_requirements_changed();
        self.update_display_filters();
        self.update_layer_shadow();
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn set_shape(&mut self, shape: Shape) {
        if self.shape == shape {
            return;
        }
        self.shape = shape;
        self.update_display_filters();
        self.update_layout();
    }

    pub fn polygon_sides(&self) -> u32 {
        self.polygon_sides
    }

    pub fn set_polygon_sides(&mut self, sides: u32) {
        let sides = sides.clamp(MIN_POLYGON_SIDES, MAX_POLYGON_SIDES);
        if self.polygon_sides == sides {
            return;
        }
        self.polygon_sides = sides;
        self.update_layout();
    }

    pub fn physical_green_screen(&self) -> bool {
        self.physical_green_screen
    }

    pub fn set_physical_green_screen(&mut self, value: bool) {
        if self.physical_green_screen == value {
            return;
        }
        self.physical_green_screen = value;
        self.segmentation_requirements_changed();
        self.calibration.mark_initial_pending();
        self.refresh_calibration_eligibility();
        self.update_display_filters();
    }

    pub fn chroma_mode(&self) -> ChromaMode {
        self.chroma_mode
    }

    pub fn set_chroma_mode(&mut self, mode: ChromaMode) {
        if self.chroma_mode == mode {
            return;
        }
        self.chroma_mode = mode;
        if mode == ChromaMode::Automatic {
            self.calibration.mark_initial_pending();
        }
        self.refresh_calibration_eligibility();
    }

    pub fn blur_amount(&self) -> BlurAmount {
        self.blur_amount
    }

    pub fn set_blur_amount(&mut self, amount: BlurAmount) {
        if self.blur_amount == amount {
            return;
        }
        self.blur_amount = amount;
        self.update_display_filters();
    }

    pub fn force_segmentation_for_alpha(&self) -> bool {
        self.force_segmentation_for_alpha
    }

    pub fn set_force_segmentation_for_alpha(&mut self, value: bool) {
        if self.force_segmentation_for_alpha == value {
            return;
        }
        self.force_segmentation_for_alpha = value;
        self.segmentation_requirements_changed();
    }

    pub fn mirror_video(&self) -> bool {
        self.mirror_video
    }

    pub fn set_mirror_video(&mut self, mirror: bool) {
        if self.mirror_video == mirror {
            return;
        }
        self.mirror_video = mirror;
        self.rebuild_content_rect();
    }

    pub fn crop_insets(&self) -> EdgeInsets {
        self.crop_insets
    }

    pub fn set_crop_insets(&mut self, crop: EdgeInsets) {
        let crop = crop.clamped();
        if self.crop_insets == crop {
            return;
        }
        self.crop_insets = crop;
        self.update_layout();
    }

    pub fn effect(&self) -> Option<&FilterSpec> {
        self.effect.as_ref()
    }

    /// Install (or clear) the cosmetic effect. At most one is active; it
    /// never reaches the masker's surface.
    pub fn set_effect(&mut self, effect: Option<FilterSpec>) {
        debug_assert!(effect.as_ref().map_or(true, FilterSpec::is_cosmetic));
        if self.effect == effect {
            return;
        }
        self.effect = effect;
        self.update_display_filters();
        self.update_layer_shadow();
    }

    pub fn shadow_enabled(&self) -> bool {
        self.shadow_enabled
    }

    pub fn set_shadow_enabled(&mut self, enabled: bool) {
        if self.shadow_enabled == enabled {
            return;
        }
        self.shadow_enabled = enabled;
        self.update_layer_shadow();
    }

    /// Shadow is meaningless when the background fills the frame edge to
    /// edge with nothing behind it.
    pub fn can_enable_shadow(&self) -> bool {
        self.effect.is_none()
            && (self.background_style != BackgroundStyle::Hide || self.background_paint.is_some())
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled
    }

    pub fn set_video_enabled(&mut self, enabled: bool) {
        if self.video_enabled == enabled {
            return;
        }
        self.video_enabled = enabled;
        self.update_surface_visibility();
        self.update_foreground_visibility();
        if enabled {
            // Re-enabling behaves like a reconnect: wait for the camera
            // to stabilize before estimating again.
            self.calibration.note_device_settled();
        }
    }

    /// The device feeding the provider reconnected or unmuted.
    pub fn note_device_settled(&mut self) {
        self.calibration.note_device_settled();
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale.clamp(0.0, 1.0);
    }

    pub fn set_using_reduced_video_frame(&mut self, reduced: bool) {
        if self.using_reduced_video_frame == reduced {
            return;
        }
        self.using_reduced_video_frame = reduced;
        self.update_output_video_track();
    }

    /// Whether the peer connection currently consumes the masker output.
    pub fn set_masker_needs_render(&mut self, needs_render: bool) {
        self.masker_needs_render = needs_render;
    }

    /*
     * Z ordering
     */

    pub fn z_index(&self) -> i32 {
        self.z_index
    }

    pub fn foreground_z_index(&self) -> i32 {
        self.foreground_z_index
    }

    pub fn set_z_index(&mut self, value: i32) {
        if self.z_index == value {
            return;
        }
        self.z_index = value;
        self.renormalize_z_indices();
        self.update_foreground_visibility();
    }

    pub fn set_foreground_z_index(&mut self, value: i32) {
        if self.foreground_z_index == value {
            return;
        }
        self.foreground_z_index = value;
        self.renormalize_z_indices();
        self.update_foreground_visibility();
    }

    /// Keep the foreground copy strictly above the presenter.
    fn renormalize_z_indices(&mut self) {
        self.z_index = self.z_index.min(self.foreground_z_index - 1);
        self.foreground_z_index = self.foreground_z_index.max(self.z_index + 1);
    }

    /// The stage's object ordering changed.
    pub fn stage_order_changed(&mut self) {
        self.update_foreground_visibility();
    }

    /*
     * Derived state
     */

    pub fn segmentation_required(&self) -> bool {
        self.segmentation_required.value()
    }

    pub fn observe_segmentation_required(
        &mut self,
        observer: impl FnMut(&bool) + 'static,
    ) -> ObserverId {
        self.segmentation_required.observe(observer)
    }

    pub fn unobserve_segmentation_required(&mut self, id: ObserverId) -> bool {
        self.segmentation_required.unobserve(id)
    }

    pub fn chroma_parameters(&self) -> ChromaParameters {
        self.chroma.value()
    }

    pub fn observe_chroma_parameters(
        &mut self,
        observer: impl FnMut(&ChromaParameters) + 'static,
    ) -> ObserverId {
        self.chroma.observe(observer)
    }

    /// Apply new chroma parameters, refresh the display filter and persist
    /// them for the next session.
    pub fn apply_chroma_parameters(&mut self, params: ChromaParameters) {
        if !self.chroma.set(params) {
            return;
        }
        self.update_display_filters();
        match serde_json::to_value(params) {
            Ok(value) => self
                .context
                .settings
                .borrow_mut()
                .set(CHROMA_SETTINGS_KEY, value),
            Err(err) => log::error!("failed to serialize chroma parameters: {err}"),
        }
    }

    fn compute_segmentation_required(&self) -> bool {
        if self.physical_green_screen {
            // The chroma filter keys the physical screen out; no mask.
            return false;
        }
        if self.background_style != BackgroundStyle::Show {
            return true;
        }
        if self.background_paint.is_some() {
            return true;
        }
        if self.force_segmentation_for_alpha {
            return true;
        }
        // Showing the unpainted background only needs a mask when media
        // is sandwiched between the background and the foreground copy.
        !self.foreground_hidden()
    }

    pub(crate) fn segmentation_requirements_changed(&mut self) {
        let required = self.compute_segmentation_required();
        self.segmentation_required.set(required);
        self.update_output_video_track();
    }

    fn foreground_hidden(&self) -> bool {
        self.foreground
            .as_ref()
            .map(|binder| binder.is_hidden())
            .unwrap_or(true)
    }

    /// Whether the peer needs the masker's composited output rather than
    /// the raw camera track.
    pub fn style_requires_masking(&self) -> bool {
        if self.physical_green_screen {
            // The other end can de-chroma it.
            return false;
        }
        if self.background_paint.is_none() && self.background_style == BackgroundStyle::Show {
            // Revealing the full camera frame untinted; send as-is.
            return false;
        }
        true
    }

    pub fn should_use_masker_output(&self) -> bool {
        self.should_use_masker_output
    }

    fn update_output_video_track(&mut self) {
        self.should_use_masker_output =
            self.using_reduced_video_frame || self.style_requires_masking();
    }

    /// The masker track feeding the peer connection, when masking is in
    /// use. The raw camera track is owned by the media stack outside this
    /// pipeline.
    pub fn output_track(&mut self) -> Option<masker::OutputTrack> {
        if !self.video_enabled || !self.should_use_masker_output {
            return None;
        }
        self.masker.as_mut().map(|masker| masker.output_track())
    }

    pub(crate) fn calibration_eligible(&self) -> bool {
        self.physical_green_screen
            && self.chroma_mode == ChromaMode::Automatic
            && self
                .segmenter
                .as_ref()
                .map(|segmenter| segmenter.can_estimate())
                .unwrap_or(false)
    }

    pub(crate) fn refresh_calibration_eligibility(&mut self) {
        let eligible = self.calibration_eligible();
        self.calibration.eligibility_changed(eligible);
    }

    /*
     * Surface updates
     */

    fn update_surface_visibility(&mut self) {
        let hidden = !self.video_ready || !self.video_enabled;
        self.surface.set_hidden(hidden);
    }

    pub(crate) fn set_video_ready(&mut self, ready: bool) {
        if self.video_ready == ready {
            return;
        }
        self.video_ready = ready;
        self.update_surface_visibility();
        self.update_foreground_visibility();
    }

    pub fn video_ready(&self) -> bool {
        self.video_ready
    }

    fn update_layer_shadow(&mut self) {
        let shadow = self.can_enable_shadow() && self.shadow_enabled;
        self.surface.set_shadow(shadow);
    }

    /// Filter stack for the display surface: the segmentation-aware
    /// background filter, chroma keying when a physical screen is in use,
    /// then the cosmetic effect.
    fn update_display_filters(&mut self) {
        let mut filters = vec![FilterSpec::Segmentation(SegmentationFilterConfig {
            style: self.background_style,
            paint: self.background_paint,
            shape: self.shape,
            blur: (self.background_style == BackgroundStyle::Blur).then_some(self.blur_amount),
        })];
        if self.physical_green_screen {
            filters.push(FilterSpec::Chroma(self.chroma.value()));
        }
        if let Some(effect) = &self.effect {
            filters.push(effect.clone());
        }
        self.surface.set_filters(filters);

        if let Some(binder) = self.foreground.as_mut() {
            binder.apply_view(&foreground::PresenterRenderView::for_foreground(
                self.shape,
                self.polygon_sides,
                self.physical_green_screen,
                self.chroma.value(),
                self.blur_amount,
            ));
        }
    }

    /// Aspect-fit the camera into the stage.
    pub fn scaled_camera_size(&self) -> Size {
        let stage_size = self.context.stage.size();
        let video_size = self
            .provider
            .as_ref()
            .map(|provider| provider.size())
            .filter(|size| !size.is_zero())
            .unwrap_or(stage_size);
        aspect_fit(video_size, stage_size)
    }

    /// Display size of the presenter layer for the current shape.
    pub fn display_size(&self) -> Size {
        let natural = self.scaled_camera_size();
        match self.shape {
            Shape::Circle => {
                let side = natural.width.min(natural.height);
                Size::new(side, side)
            }
            Shape::Polygon => polygon_bounding_size(self.polygon_sides, natural.height),
            Shape::Rectangle => Size::new(
                natural.width * (1.0 - (self.crop_insets.left + self.crop_insets.right)),
                natural.height * (1.0 - (self.crop_insets.top + self.crop_insets.bottom)),
            ),
        }
    }

    pub fn content_rect(&self) -> Rect {
        content_rect_from_crop_insets(self.crop_insets, self.mirror_video)
    }

    /// Reposition the surface and refresh the content rect. Invoked when
    /// the shape, crop, stage or camera size changes.
    pub(crate) fn update_layout(&mut self) {
        let stage_size = self.context.stage.size();
        let display = self.display_size();
        let frame = Rect::new(
            (stage_size.width - display.width) / 2.0,
            (stage_size.height - display.height) / 2.0,
            display.width,
            display.height,
        );
        self.surface.set_frame(frame);
        self.rebuild_content_rect();

        if let Some(binder) = self.foreground.as_mut() {
            binder.mirror_geometry(frame, 1.0);
        }
    }

    fn rebuild_content_rect(&mut self) {
        let rect = self.content_rect();
        self.surface.set_content_rect(rect);
        if let Some(binder) = self.foreground.as_mut() {
            binder.mirror_content_rect(rect);
        }
    }

    pub(crate) fn update_foreground_visibility(&mut self) {
        let Some(binder) = self.foreground.as_mut() else {
            return;
        };
        let objects = self.context.stage.ordered_objects();
        let changed = binder.update_visibility(self.video_enabled, &objects, self.id);
        if changed {
            // A newly (in)visible foreground changes whether segmentation
            // is needed at all.
            self.segmentation_requirements_changed();
        }
    }

    /*
     * Notices
     */

    pub(crate) fn notify_calibration_fallback(&self) {
        self.context.notices.notify(Notice {
            title: "Green screen".to_string(),
            body: "We were unable to automatically adjust settings for your green screen. \
                   Chroma keying has been switched to manual adjustment."
                .to_string(),
        });
    }

    /*
     * Teardown
     */

    /// Tear the presenter down. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        if let Some(provider) = self.provider.as_mut() {
            if let Some(pending) = self.pending_segmentation.take() {
                provider.unprotect(pending.frame.handle);
            }
            if let Some(pending) = self.pending_gesture.take() {
                provider.unprotect(pending.frame);
            }
        }
        self.pending_segmentation = None;
        self.pending_gesture = None;
        self.pending_calibration = None;
        self.calibration.reset();

        if let Some(mut segmenter) = self.segmenter.take() {
            segmenter.destroy();
        }
        if let Some(mut masker) = self.masker.take() {
            masker.destroy();
        }
        if let Some(mut provider) = self.provider.take() {
            provider.destroy();
        }
        self.gesture_recognizer = None;
        self.displayed_frame = None;
        self.current_mask = None;
        self.surface.set_contents(None);
        self.surface.set_mask(None);
        if let Some(binder) = self.foreground.as_mut() {
            binder.mirror_contents(None);
            binder.mirror_mask(None);
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn release_pending_holds_on(&mut self, provider: &mut dyn VideoProvider) {
        if let Some(pending) = self.pending_segmentation.take() {
            provider.unprotect(pending.frame.handle);
        }
        if let Some(pending) = self.pending_gesture.take() {
            provider.unprotect(pending.frame);
        }
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsStore;
    use crate::testing::{test_context, TestProvider, TestSegmenter, TestSurface};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn presenter() -> Presenter {
        let ctx = test_context();
        let (surface, _handle) = TestSurface::create();
        Presenter::new(ctx.context, surface, PresenterOptions::default())
    }

    #[test]
    fn physical_green_screen_never_requires_segmentation() {
        let mut presenter = presenter();
        assert!(presenter.physical_green_screen());

        for style in BackgroundStyle::all() {
            presenter.set_background_style(*style);
            presenter.set_background_paint(Some(Paint::color([1.0, 0.0, 0.0, 1.0])));
            assert!(!presenter.segmentation_required(), "style {style:?}");
        }
    }

    #[test]
    fn virtual_green_screen_requires_segmentation() {
        let mut presenter = presenter();
        presenter.set_physical_green_screen(false);

        presenter.set_background_style(BackgroundStyle::Hide);
        assert!(presenter.segmentation_required());

        presenter.set_background_style(BackgroundStyle::Blur);
        assert!(presenter.segmentation_required());

        presenter.set_background_style(BackgroundStyle::Show);
        assert!(!presenter.segmentation_required());

        presenter.set_background_paint(Some(Paint::color([0.2, 0.2, 0.2, 1.0])));
        assert!(presenter.segmentation_required());

        presenter.set_background_paint(None);
        presenter.set_force_segmentation_for_alpha(true);
        assert!(presenter.segmentation_required());
    }

    #[test]
    fn segmentation_observers_fire_synchronously() {
        let mut presenter = presenter();
        presenter.set_physical_green_screen(false);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        presenter.observe_segmentation_required(move |required| {
            sink.borrow_mut().push(*required);
        });

        presenter.set_background_style(BackgroundStyle::Hide);
        // The observer ran before the setter returned.
        assert_eq!(*seen.borrow(), vec![true]);

        // Idempotent set: no duplicate notification.
        presenter.set_background_style(BackgroundStyle::Hide);
        assert_eq!(*seen.borrow(), vec![true]);
    }

    #[test]
    fn z_indices_keep_foreground_above_background() {
        let mut presenter = presenter();

        // Deterministic pseudo-random assignment sequence.
        let mut seed: i64 = 0x2545_f491;
        for step in 0..200 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let value = (seed >> 33) as i32 % 50;
            if step % 2 == 0 {
                presenter.set_z_index(value);
            } else {
                presenter.set_foreground_z_index(value);
            }
            assert!(
                presenter.foreground_z_index() > presenter.z_index(),
                "violated after setting {value} at step {step}"
            );
        }
    }

    #[test]
    fn shadow_requires_visible_background() {
        let mut presenter = presenter();
        assert!(presenter.can_enable_shadow());

        presenter.set_background_style(BackgroundStyle::Hide);
        assert!(!presenter.can_enable_shadow());

        presenter.set_background_paint(Some(Paint::color([0.0, 0.0, 1.0, 1.0])));
        assert!(presenter.can_enable_shadow());

        presenter.set_effect(Some(FilterSpec::Cosmetic {
            id: Uuid::new_v4(),
            name: "vignette".to_string(),
        }));
        assert!(!presenter.can_enable_shadow());
    }

    #[test]
    fn masking_needed_exactly_when_frame_is_not_directly_usable() {
        let mut presenter = presenter();

        // Physical green screen: the remote end de-chromas the raw frame.
        assert!(!presenter.style_requires_masking());

        presenter.set_physical_green_screen(false);
        // Full unpainted camera frame can be sent as-is.
        assert!(!presenter.style_requires_masking());

        presenter.set_background_style(BackgroundStyle::Hide);
        assert!(presenter.style_requires_masking());
        assert!(presenter.should_use_masker_output());

        presenter.set_background_style(BackgroundStyle::Show);
        presenter.set_background_paint(Some(Paint::color([0.0, 0.5, 0.5, 1.0])));
        assert!(presenter.style_requires_masking());

        presenter.set_background_paint(None);
        assert!(!presenter.should_use_masker_output());
        presenter.set_using_reduced_video_frame(true);
        assert!(presenter.should_use_masker_output());
    }

    #[test]
    fn polygon_sides_are_clamped() {
        let mut presenter = presenter();
        presenter.set_polygon_sides(2);
        assert_eq!(presenter.polygon_sides(), 3);
        presenter.set_polygon_sides(99);
        assert_eq!(presenter.polygon_sides(), 10);
    }

    #[test]
    fn chroma_parameters_restored_from_settings() {
        let ctx = test_context();
        let stored = ChromaParameters::new([0.1, 0.8, 0.1], 0.25, 0.45);
        ctx.settings.borrow_mut().set(
            CHROMA_SETTINGS_KEY,
            serde_json::to_value(stored).unwrap(),
        );

        let (surface, _handle) = TestSurface::create();
        let presenter = Presenter::new(ctx.context, surface, PresenterOptions::default());
        assert_eq!(presenter.chroma_parameters(), stored);
    }

    #[test]
    fn display_size_follows_shape() {
        let ctx = test_context();
        let (surface, _handle) = TestSurface::create();
        let mut presenter =
            Presenter::new(ctx.context, surface, PresenterOptions::default());
        let (provider, handle) = TestProvider::create();
        presenter.set_video_provider(Some(provider));
        handle.push_frame(1280, 720);

        // 1280x720 aspect-fits a 1920x1080 stage at 1920x1080.
        let rect = presenter.display_size();
        assert_eq!(rect, Size::new(1920.0, 1080.0));

        presenter.set_shape(Shape::Circle);
        let circle = presenter.display_size();
        assert_eq!(circle, Size::new(1080.0, 1080.0));

        presenter.set_shape(Shape::Rectangle);
        presenter.set_crop_insets(EdgeInsets::new(0.0, 0.1, 0.0, 0.1));
        let cropped = presenter.display_size();
        assert!((cropped.width - 1920.0 * 0.8).abs() < 0.01);
    }

    #[test]
    fn mirroring_flips_the_content_rect() {
        let mut presenter = presenter();
        presenter.set_mirror_video(true);
        let rect = presenter.content_rect();
        assert!(rect.width < 0.0);
        assert!((rect.x - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn visible_foreground_forces_segmentation() {
        let ctx = test_context();
        let (surface, _surface_handle) = TestSurface::create();
        let (foreground_surface, _foreground_handle) = TestSurface::create();
        let mut presenter = Presenter::new(
            ctx.context.clone(),
            surface,
            PresenterOptions {
                foreground_surface: Some(foreground_surface),
                ..PresenterOptions::default()
            },
        );
        presenter.set_physical_green_screen(false);
        assert!(!presenter.segmentation_required());

        let foreground_id = presenter.foreground_id().expect("binder exists");
        ctx.stage
            .objects
            .borrow_mut()
            .extend([presenter.id(), Uuid::new_v4(), foreground_id]);
        presenter.stage_order_changed();

        assert!(presenter.segmentation_required());

        // Moving the objects apart hides the copy again.
        ctx.stage
            .objects
            .borrow_mut()
            .insert(1, Uuid::new_v4());
        presenter.stage_order_changed();
        assert!(!presenter.segmentation_required());
    }

    #[test]
    fn destroying_segmenter_disables_estimation() {
        let mut presenter = presenter();
        let (segmenter, handle) = TestSegmenter::create();
        presenter.set_segmenter(Some(segmenter));
        assert!(presenter.calibration_eligible());

        presenter.set_segmenter(None);
        assert!(handle.is_destroyed());
        assert!(!presenter.calibration_eligible());
    }
}
