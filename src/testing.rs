//! Shared test doubles
//!
//! Scripted collaborators used across the pipeline tests: a provider with
//! call accounting, a segmenter whose tasks complete on demand, a
//! recording surface, and a canned stage/notice/settings context.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::geometry::{EdgeInsets, Rect, Size};
use crate::provider::{FrameDescriptor, FrameHandle, FramePixels, VideoProvider};
use crate::segmenter::{
    AsyncTask, CalibrationEstimate, CalibrationTask, GestureRecognizer, GestureTask,
    SegmentationMask, SegmentationTask, Segmenter, TaskCompleter,
};
use crate::settings::MemorySettings;
use crate::stage::{Notice, NoticeSink, PresenterContext, StageAccessor, StageObjectId};
use crate::surface::{FilterSpec, RenderSurface};
use crate::Millis;

/*
 * Surface
 */

#[derive(Default, Clone)]
pub(crate) struct SurfaceState {
    pub contents: Option<FrameHandle>,
    pub contents_sets: u32,
    pub dirty_marks: u32,
    pub mask: Option<Arc<SegmentationMask>>,
    pub mask_sets: u32,
    pub content_rect: Option<Rect>,
    pub filters: Vec<FilterSpec>,
    pub hidden: Option<bool>,
    pub frame: Option<Rect>,
    pub frame_sets: u32,
    pub opacity: Option<f32>,
    pub shadow: Option<bool>,
    pub renders: u32,
}

#[derive(Clone)]
pub(crate) struct SurfaceHandle {
    state: Rc<RefCell<SurfaceState>>,
}

impl SurfaceHandle {
    pub fn state(&self) -> SurfaceState {
        self.state.borrow().clone()
    }
}

pub(crate) struct TestSurface {
    state: Rc<RefCell<SurfaceState>>,
}

impl TestSurface {
    pub fn create() -> (Box<dyn RenderSurface>, SurfaceHandle) {
        let state = Rc::new(RefCell::new(SurfaceState::default()));
        (
            Box::new(TestSurface {
                state: state.clone(),
            }),
            SurfaceHandle { state },
        )
    }
}

impl RenderSurface for TestSurface {
    fn set_contents(&mut self, contents: Option<FrameHandle>) {
        let mut state = self.state.borrow_mut();
        state.contents = contents;
        state.contents_sets += 1;
    }

    fn set_contents_dirty(&mut self) {
        self.state.borrow_mut().dirty_marks += 1;
    }

    fn set_mask(&mut self, mask: Option<Arc<SegmentationMask>>) {
        let mut state = self.state.borrow_mut();
        state.mask = mask;
        state.mask_sets += 1;
    }

    fn set_content_rect(&mut self, rect: Rect) {
        self.state.borrow_mut().content_rect = Some(rect);
    }

    fn set_filters(&mut self, filters: Vec<FilterSpec>) {
        self.state.borrow_mut().filters = filters;
    }

    fn set_hidden(&mut self, hidden: bool) {
        self.state.borrow_mut().hidden = Some(hidden);
    }

    fn set_frame(&mut self, frame: Rect) {
        let mut state = self.state.borrow_mut();
        state.frame = Some(frame);
        state.frame_sets += 1;
    }

    fn set_opacity(&mut self, opacity: f32) {
        self.state.borrow_mut().opacity = Some(opacity);
    }

    fn set_shadow(&mut self, enabled: bool) {
        self.state.borrow_mut().shadow = Some(enabled);
    }

    fn render(&mut self, _timestamp: Millis) {
        self.state.borrow_mut().renders += 1;
    }
}

/*
 * Provider
 */

#[derive(Default)]
pub(crate) struct ProviderState {
    pub size: Size,
    pub active: bool,
    pub can_buffer: bool,
    pub buffer_mode: bool,
    pub current: Option<FrameDescriptor>,
    pub pending_new: bool,
    pub frames: HashMap<u64, (u32, u32)>,
    pub protect_calls: HashMap<u64, u32>,
    pub unprotect_calls: HashMap<u64, u32>,
    pub detached: Vec<u64>,
    pub buffer_mode_sets: Vec<bool>,
    pub destroyed: bool,
    next_handle: u64,
}

impl ProviderState {
    /// Queue a new current frame; the next `render` reports new contents.
    pub fn push_frame(&mut self, width: u32, height: u32) -> FrameHandle {
        let handle = FrameHandle(self.next_handle);
        self.next_handle += 1;
        self.frames.insert(handle.0, (width, height));
        self.current = Some(FrameDescriptor {
            width,
            height,
            handle,
        });
        self.size = Size::new(width as f32, height as f32);
        self.pending_new = true;
        handle
    }

    /// Whether every protect call has a matching unprotect.
    pub fn holds_balanced(&self) -> bool {
        let handles: std::collections::HashSet<u64> = self
            .protect_calls
            .keys()
            .chain(self.unprotect_calls.keys())
            .copied()
            .collect();
        handles.iter().all(|handle| {
            self.protect_calls.get(handle).copied().unwrap_or(0)
                == self.unprotect_calls.get(handle).copied().unwrap_or(0)
        })
    }

    pub fn protect_total(&self) -> u32 {
        self.protect_calls.values().sum()
    }

    pub fn unprotect_total(&self) -> u32 {
        self.unprotect_calls.values().sum()
    }
}

#[derive(Clone)]
pub(crate) struct ProviderHandle {
    state: Rc<RefCell<ProviderState>>,
}

impl ProviderHandle {
    pub fn push_frame(&self, width: u32, height: u32) -> FrameHandle {
        self.state.borrow_mut().push_frame(width, height)
    }

    pub fn set_active(&self, active: bool) {
        self.state.borrow_mut().active = active;
    }

    pub fn borrow(&self) -> std::cell::Ref<'_, ProviderState> {
        self.state.borrow()
    }

    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, ProviderState> {
        self.state.borrow_mut()
    }
}

pub(crate) struct TestProvider {
    state: Rc<RefCell<ProviderState>>,
}

impl TestProvider {
    pub fn create() -> (Box<dyn VideoProvider>, ProviderHandle) {
        let state = Rc::new(RefCell::new(ProviderState {
            active: true,
            can_buffer: true,
            ..ProviderState::default()
        }));
        (
            Box::new(TestProvider {
                state: state.clone(),
            }),
            ProviderHandle { state },
        )
    }
}

impl VideoProvider for TestProvider {
    fn size(&self) -> Size {
        self.state.borrow().size
    }

    fn active(&self) -> bool {
        self.state.borrow().active
    }

    fn render(&mut self, _timestamp: Millis) -> bool {
        let mut state = self.state.borrow_mut();
        std::mem::take(&mut state.pending_new)
    }

    fn current_frame(&self) -> Option<FrameDescriptor> {
        self.state.borrow().current
    }

    fn protect(&mut self, frame: FrameHandle) {
        *self
            .state
            .borrow_mut()
            .protect_calls
            .entry(frame.0)
            .or_insert(0) += 1;
    }

    fn unprotect(&mut self, frame: FrameHandle) {
        *self
            .state
            .borrow_mut()
            .unprotect_calls
            .entry(frame.0)
            .or_insert(0) += 1;
    }

    fn detach(&mut self, frame: FrameHandle) {
        self.state.borrow_mut().detached.push(frame.0);
    }

    fn can_provide_buffer(&self) -> bool {
        self.state.borrow().can_buffer
    }

    fn buffer_mode(&self) -> bool {
        self.state.borrow().buffer_mode
    }

    fn set_desired_buffer_mode(&mut self, readable: bool) {
        let mut state = self.state.borrow_mut();
        state.buffer_mode = readable;
        state.buffer_mode_sets.push(readable);
    }

    fn frame_pixels(&self, frame: FrameHandle) -> Option<FramePixels> {
        let state = self.state.borrow();
        if !state.buffer_mode {
            return None;
        }
        let (width, height) = state.frames.get(&frame.0)?;
        Some(FramePixels::solid(*width, *height, [0, 220, 30, 255]))
    }

    fn destroy(&mut self) {
        let mut state = self.state.borrow_mut();
        state.destroyed = true;
        state.active = false;
        state.current = None;
    }
}

/*
 * Segmenter
 */

#[derive(Debug, Clone, Copy)]
pub(crate) struct EstimateRequest {
    pub timestamp: Millis,
    pub is_initial: bool,
    pub crop: EdgeInsets,
}

#[derive(Default)]
pub(crate) struct SegmenterState {
    pub can_estimate: bool,
    pub segment_requests: Vec<Millis>,
    pub segment_completers: Vec<TaskCompleter<SegmentationMask>>,
    pub estimate_requests: Vec<EstimateRequest>,
    pub estimate_completers: Vec<TaskCompleter<CalibrationEstimate>>,
    pub destroyed: bool,
}

#[derive(Clone)]
pub(crate) struct SegmenterHandle {
    state: Rc<RefCell<SegmenterState>>,
}

impl SegmenterHandle {
    pub fn segment_request_count(&self) -> usize {
        self.state.borrow().segment_requests.len()
    }

    pub fn estimate_request_count(&self) -> usize {
        self.state.borrow().estimate_requests.len()
    }

    pub fn last_estimate_request(&self) -> Option<EstimateRequest> {
        self.state.borrow().estimate_requests.last().copied()
    }

    /// Complete the oldest outstanding segmentation request.
    pub fn complete_segmentation(
        &self,
        result: Result<SegmentationMask, crate::segmenter::InferenceError>,
    ) {
        let completer = self.state.borrow_mut().segment_completers.remove(0);
        completer.complete(result);
    }

    /// Complete the oldest outstanding estimation request.
    pub fn complete_estimate(
        &self,
        result: Result<CalibrationEstimate, crate::segmenter::InferenceError>,
    ) {
        let completer = self.state.borrow_mut().estimate_completers.remove(0);
        completer.complete(result);
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.borrow().destroyed
    }
}

pub(crate) struct TestSegmenter {
    state: Rc<RefCell<SegmenterState>>,
}

impl TestSegmenter {
    pub fn create() -> (Box<dyn Segmenter>, SegmenterHandle) {
        let state = Rc::new(RefCell::new(SegmenterState {
            can_estimate: true,
            ..SegmenterState::default()
        }));
        (
            Box::new(TestSegmenter {
                state: state.clone(),
            }),
            SegmenterHandle { state },
        )
    }
}

impl Segmenter for TestSegmenter {
    fn can_estimate(&self) -> bool {
        self.state.borrow().can_estimate
    }

    fn segment(&mut self, _frame: &FramePixels, timestamp: Millis) -> SegmentationTask {
        let (completer, task) = AsyncTask::pair();
        let mut state = self.state.borrow_mut();
        state.segment_requests.push(timestamp);
        state.segment_completers.push(completer);
        task
    }

    fn estimate_calibration(
        &mut self,
        _frame: &FramePixels,
        timestamp: Millis,
        is_initial: bool,
        crop: EdgeInsets,
    ) -> CalibrationTask {
        let (completer, task) = AsyncTask::pair();
        let mut state = self.state.borrow_mut();
        state.estimate_requests.push(EstimateRequest {
            timestamp,
            is_initial,
            crop,
        });
        state.estimate_completers.push(completer);
        task
    }

    fn destroy(&mut self) {
        let mut state = self.state.borrow_mut();
        state.destroyed = true;
        state.segment_completers.clear();
        state.estimate_completers.clear();
    }
}

/*
 * Gesture recognizer
 */

#[derive(Default)]
pub(crate) struct RecognizerState {
    pub requests: Vec<Millis>,
    pub completers: Vec<TaskCompleter<()>>,
}

#[derive(Clone)]
pub(crate) struct RecognizerHandle {
    state: Rc<RefCell<RecognizerState>>,
}

impl RecognizerHandle {
    pub fn request_count(&self) -> usize {
        self.state.borrow().requests.len()
    }

    pub fn complete_next(&self, result: Result<(), crate::segmenter::InferenceError>) {
        let completer = self.state.borrow_mut().completers.remove(0);
        completer.complete(result);
    }
}

pub(crate) struct TestRecognizer {
    state: Rc<RefCell<RecognizerState>>,
}

impl TestRecognizer {
    pub fn create() -> (Box<dyn GestureRecognizer>, RecognizerHandle) {
        let state = Rc::new(RefCell::new(RecognizerState::default()));
        (
            Box::new(TestRecognizer {
                state: state.clone(),
            }),
            RecognizerHandle { state },
        )
    }
}

impl GestureRecognizer for TestRecognizer {
    fn process(&mut self, _frame: &FramePixels, timestamp: Millis) -> GestureTask {
        let (completer, task) = AsyncTask::pair();
        let mut state = self.state.borrow_mut();
        state.requests.push(timestamp);
        state.completers.push(completer);
        task
    }
}

/*
 * Stage, notices, context
 */

pub(crate) struct TestStage {
    pub size: Cell<Size>,
    pub objects: RefCell<Vec<StageObjectId>>,
}

impl TestStage {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            size: Cell::new(Size::new(1920.0, 1080.0)),
            objects: RefCell::new(Vec::new()),
        })
    }
}

impl StageAccessor for TestStage {
    fn size(&self) -> Size {
        self.size.get()
    }

    fn ordered_objects(&self) -> Vec<StageObjectId> {
        self.objects.borrow().clone()
    }
}

pub(crate) struct TestNotices {
    pub notices: RefCell<Vec<Notice>>,
}

impl TestNotices {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            notices: RefCell::new(Vec::new()),
        })
    }

    pub fn count(&self) -> usize {
        self.notices.borrow().len()
    }
}

impl NoticeSink for TestNotices {
    fn notify(&self, notice: Notice) {
        self.notices.borrow_mut().push(notice);
    }
}

pub(crate) struct TestContext {
    pub context: PresenterContext,
    pub stage: Rc<TestStage>,
    pub notices: Rc<TestNotices>,
    pub settings: Rc<RefCell<MemorySettings>>,
}

pub(crate) fn test_context() -> TestContext {
    let stage = TestStage::new();
    let notices = TestNotices::new();
    let settings = Rc::new(RefCell::new(MemorySettings::new()));
    let context = PresenterContext::new(stage.clone(), notices.clone(), settings.clone());
    TestContext {
        context,
        stage,
        notices,
        settings,
    }
}
