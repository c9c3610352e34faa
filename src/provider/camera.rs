//! Camera-backed video provider
//!
//! Captures frames on a background thread with nokhwa and exposes them
//! through the [`VideoProvider`] capability: the capture thread writes
//! into a triple buffer, and `render` promotes the newest decoded frame
//! into the provider's reference-counted frame table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use parking_lot::Mutex;

use super::{FrameDescriptor, FrameHandle, FramePixels, VideoProvider};
use crate::geometry::Size;
use crate::Millis;

/// Some platforms keep at most this many decoded frames alive at once;
/// the orchestrator detaches superseded frames to stay under it.
pub const MAX_LIVE_FRAMES: usize = 2;

/// Information about an available camera.
#[derive(Clone, Debug)]
pub struct CameraDeviceInfo {
    pub index: u32,
    pub name: String,
}

/// List cameras available to nokhwa.
pub fn available_cameras() -> Vec<CameraDeviceInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(list) => list
            .iter()
            .enumerate()
            .map(|(index, info)| CameraDeviceInfo {
                index: index as u32,
                name: info.human_name(),
            })
            .collect(),
        Err(err) => {
            log::warn!("failed to enumerate cameras: {err:?}");
            Vec::new()
        }
    }
}

/// A decoded frame as written by the capture thread.
struct CapturedFrame {
    rgba: Arc<Vec<u8>>,
    width: u32,
    height: u32,
    frame_number: u64,
}

/// State shared with the capture thread.
struct CaptureShared {
    slots: [Mutex<Option<CapturedFrame>>; 3],
    latest_slot: AtomicU64,
    frame_count: AtomicU64,
    running: AtomicBool,
}

/// A live frame in the provider's table.
struct FrameEntry {
    rgba: Arc<Vec<u8>>,
    width: u32,
    height: u32,
    protects: u32,
    released: bool,
}

/// Camera capture provider with reference-counted frame lifetimes.
pub struct CameraVideoProvider {
    shared: Arc<CaptureShared>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
    frames: HashMap<FrameHandle, FrameEntry>,
    next_handle: u64,
    current: Option<FrameHandle>,
    last_frame_number: Option<u64>,
    size: Size,
    buffer_mode: bool,
}

impl CameraVideoProvider {
    /// Start capturing from the camera at `camera_index`.
    pub fn new(camera_index: u32) -> Result<Self> {
        let shared = Arc::new(CaptureShared {
            slots: [Mutex::new(None), Mutex::new(None), Mutex::new(None)],
            latest_slot: AtomicU64::new(0),
            frame_count: AtomicU64::new(0),
            running: AtomicBool::new(true),
        });

        let thread_shared = shared.clone();
        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || capture_thread(camera_index, thread_shared))
            .map_err(|err| anyhow!("failed to spawn capture thread: {err}"))?;

        Ok(Self {
            shared,
            thread_handle: Some(thread_handle),
            frames: HashMap::new(),
            next_handle: 0,
            current: None,
            last_frame_number: None,
            size: Size::ZERO,
            buffer_mode: false,
        })
    }

    fn remove_if_unreferenced(&mut self, handle: FrameHandle) {
        let remove = match self.frames.get(&handle) {
            Some(entry) => entry.released && entry.protects == 0,
            None => false,
        };
        if remove {
            self.frames.remove(&handle);
        }
    }

    fn live_frame_count(&self) -> usize {
        self.frames.values().filter(|entry| !entry.released).count()
    }

    fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl VideoProvider for CameraVideoProvider {
    fn size(&self) -> Size {
        self.size
    }

    fn active(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
            && self.shared.frame_count.load(Ordering::Relaxed) > 0
    }

    fn render(&mut self, _timestamp: Millis) -> bool {
        if !self.shared.running.load(Ordering::Acquire) {
            return false;
        }

        let slot = (self.shared.latest_slot.load(Ordering::Acquire) % 3) as usize;
        let captured = self.shared.slots[slot].lock();
        let Some(frame) = captured.as_ref() else {
            return false;
        };
        if self.last_frame_number == Some(frame.frame_number) {
            return false;
        }

        self.last_frame_number = Some(frame.frame_number);
        self.size = Size::new(frame.width as f32, frame.height as f32);

        let handle = FrameHandle(self.next_handle);
        self.next_handle += 1;
        self.frames.insert(
            handle,
            FrameEntry {
                rgba: frame.rgba.clone(),
                width: frame.width,
                height: frame.height,
                protects: 0,
                released: false,
            },
        );
        drop(captured);

        self.current = Some(handle);
        if self.live_frame_count() > MAX_LIVE_FRAMES {
            log::debug!(
                "{} live camera frames, expected at most {MAX_LIVE_FRAMES}",
                self.live_frame_count()
            );
        }
        true
    }

    fn current_frame(&self) -> Option<FrameDescriptor> {
        let handle = self.current?;
        let entry = self.frames.get(&handle)?;
        Some(FrameDescriptor {
            width: entry.width,
            height: entry.height,
            handle,
        })
    }

    fn protect(&mut self, frame: FrameHandle) {
        match self.frames.get_mut(&frame) {
            Some(entry) => entry.protects += 1,
            None => log::debug!("protect on unknown frame {frame:?}"),
        }
    }

    fn unprotect(&mut self, frame: FrameHandle) {
        if let Some(entry) = self.frames.get_mut(&frame) {
            entry.protects = entry.protects.saturating_sub(1);
        }
        self.remove_if_unreferenced(frame);
    }

    fn detach(&mut self, frame: FrameHandle) {
        if let Some(entry) = self.frames.get_mut(&frame) {
            entry.released = true;
        }
        if self.current == Some(frame) {
            self.current = None;
        }
        self.remove_if_unreferenced(frame);
    }

    fn can_provide_buffer(&self) -> bool {
        true
    }

    fn buffer_mode(&self) -> bool {
        self.buffer_mode
    }

    fn set_desired_buffer_mode(&mut self, readable: bool) {
        self.buffer_mode = readable;
    }

    fn frame_pixels(&self, frame: FrameHandle) -> Option<FramePixels> {
        if !self.buffer_mode {
            return None;
        }
        let entry = self.frames.get(&frame)?;
        Some(FramePixels {
            width: entry.width,
            height: entry.height,
            rgba: entry.rgba.clone(),
        })
    }

    fn destroy(&mut self) {
        self.stop();
        self.frames.clear();
        self.current = None;
        self.size = Size::ZERO;
    }
}

impl Drop for CameraVideoProvider {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the camera, preferring high frame rate, falling back through
/// progressively looser format requests.
fn open_camera(camera_index: u32) -> Result<Camera> {
    let index = CameraIndex::Index(camera_index);
    let requests = [
        RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbAFormat>(RequestedFormatType::HighestResolution(
            Resolution::new(1280, 720),
        )),
        RequestedFormat::new::<RgbAFormat>(RequestedFormatType::None),
    ];

    let mut last_err = None;
    for requested in requests {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

fn capture_thread(camera_index: u32, shared: Arc<CaptureShared>) {
    log::info!("starting camera capture thread (camera {camera_index})");

    let mut camera = match open_camera(camera_index) {
        Ok(camera) => camera,
        Err(err) => {
            log::error!("failed to open camera {camera_index}: {err:?}");
            shared.running.store(false, Ordering::Release);
            return;
        }
    };

    log::info!(
        "camera opened: {} ({}x{})",
        camera.info().human_name(),
        camera.resolution().width(),
        camera.resolution().height()
    );

    let mut write_slot: u64 = 0;
    while shared.running.load(Ordering::Acquire) {
        let frame = match camera.frame() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("failed to capture frame: {err:?}");
                std::thread::sleep(std::time::Duration::from_millis(10));
                continue;
            }
        };

        let image = match frame.decode_image::<RgbAFormat>() {
            Ok(image) => image,
            Err(err) => {
                log::warn!("failed to decode frame: {err:?}");
                continue;
            }
        };

        let frame_number = shared.frame_count.fetch_add(1, Ordering::Relaxed);
        let captured = CapturedFrame {
            width: image.width(),
            height: image.height(),
            rgba: Arc::new(image.into_raw()),
            frame_number,
        };

        let slot = (write_slot % 3) as usize;
        *shared.slots[slot].lock() = Some(captured);
        shared.latest_slot.store(write_slot, Ordering::Release);
        write_slot = write_slot.wrapping_add(1);
    }

    log::info!("camera capture thread stopped");
}
