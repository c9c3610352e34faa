//! Worker-thread segmenter
//!
//! Runs person segmentation through ONNX Runtime on a dedicated thread fed
//! by a bounded channel, so a slow inference never blocks the render loop.
//! Green-screen estimation runs on the same thread but needs no model.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use ndarray::Array4;

use super::estimate::estimate_green_screen;
use super::{
    AsyncTask, CalibrationEstimate, CalibrationTask, InferenceError, SegmentationMask,
    SegmentationTask, Segmenter, TaskCompleter,
};
use crate::geometry::EdgeInsets;
use crate::provider::FramePixels;
use crate::Millis;

const SEG_WIDTH: u32 = 256;
const SEG_HEIGHT: u32 = 256;

enum Job {
    Segment {
        frame: FramePixels,
        completer: TaskCompleter<SegmentationMask>,
    },
    Estimate {
        frame: FramePixels,
        is_initial: bool,
        crop: EdgeInsets,
        completer: TaskCompleter<CalibrationEstimate>,
    },
}

/// ONNX-Runtime-backed [`Segmenter`].
pub struct OrtSegmenter {
    job_tx: Option<Sender<Job>>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl OrtSegmenter {
    /// Spawn the worker thread, loading the segmentation model from
    /// `model_path`. A missing model disables segmentation but leaves
    /// estimation available.
    pub fn new(model_path: PathBuf) -> Result<Self, InferenceError> {
        let (job_tx, job_rx) = bounded::<Job>(2);
        let running = Arc::new(AtomicBool::new(false));

        let thread_running = running.clone();
        let thread_handle = std::thread::Builder::new()
            .name("segmentation-worker".to_string())
            .spawn(move || worker_thread(model_path, job_rx, thread_running))
            .map_err(|err| {
                InferenceError::Backend(format!("failed to spawn worker thread: {err}"))
            })?;

        Ok(Self {
            job_tx: Some(job_tx),
            thread_handle: Some(thread_handle),
            running,
        })
    }

    /// Whether the segmentation model is loaded and serving.
    pub fn is_ready(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn submit(&self, job: Job) {
        let Some(tx) = &self.job_tx else {
            // Completers drop here, resolving the tasks as cancelled.
            return;
        };
        if let Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) = tx.try_send(job) {
            // Backpressure: drop the job, the task resolves as cancelled.
        }
    }
}

impl Segmenter for OrtSegmenter {
    fn can_estimate(&self) -> bool {
        self.job_tx.is_some()
    }

    fn segment(&mut self, frame: &FramePixels, _timestamp: Millis) -> SegmentationTask {
        let (completer, task) = AsyncTask::pair();
        self.submit(Job::Segment {
            frame: frame.clone(),
            completer,
        });
        task
    }

    fn estimate_calibration(
        &mut self,
        frame: &FramePixels,
        _timestamp: Millis,
        is_initial: bool,
        crop: EdgeInsets,
    ) -> CalibrationTask {
        let (completer, task) = AsyncTask::pair();
        self.submit(Job::Estimate {
            frame: frame.clone(),
            is_initial,
            crop,
            completer,
        });
        task
    }

    fn destroy(&mut self) {
        self.job_tx = None;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OrtSegmenter {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn worker_thread(model_path: PathBuf, job_rx: Receiver<Job>, running: Arc<AtomicBool>) {
    log::info!("segmentation worker started");

    let mut session = match init_session(&model_path) {
        Ok(session) => {
            running.store(true, Ordering::Release);
            log::info!("segmentation model loaded from {model_path:?}");
            Some(session)
        }
        Err(err) => {
            log::warn!("segmentation model unavailable: {err}. Estimation only.");
            None
        }
    };

    while let Ok(job) = job_rx.recv() {
        match job {
            Job::Segment { frame, completer } => {
                let result = match session.as_mut() {
                    Some(session) => run_segmentation(session, &frame),
                    None => Err(InferenceError::Backend(
                        "segmentation model not loaded".to_string(),
                    )),
                };
                completer.complete(result);
            }
            Job::Estimate {
                frame,
                is_initial,
                crop,
                completer,
            } => {
                completer.complete(estimate_green_screen(&frame, crop, is_initial));
            }
        }
    }

    running.store(false, Ordering::Release);
    log::info!("segmentation worker stopped");
}

fn init_session(model_path: &PathBuf) -> Result<ort::session::Session, InferenceError> {
    if !model_path.exists() {
        return Err(InferenceError::Backend(format!(
            "model not found: {model_path:?}"
        )));
    }

    ort::init()
        .with_name("PresenterPipeline")
        .commit()
        .map_err(|err| InferenceError::Backend(format!("failed to initialize ORT: {err}")))?;

    ort::session::Session::builder()
        .map_err(|err| InferenceError::Backend(format!("failed to create session builder: {err}")))?
        .with_intra_threads(2)
        .map_err(|err| InferenceError::Backend(format!("failed to set threads: {err}")))?
        .commit_from_file(model_path)
        .map_err(|err| InferenceError::Backend(format!("failed to load model: {err}")))
}

fn run_segmentation(
    session: &mut ort::session::Session,
    frame: &FramePixels,
) -> Result<SegmentationMask, InferenceError> {
    let input = preprocess_nhwc(frame, SEG_WIDTH, SEG_HEIGHT);
    let input_array =
        Array4::from_shape_vec((1, SEG_HEIGHT as usize, SEG_WIDTH as usize, 3), input)
            .map_err(|err| InferenceError::Backend(format!("failed to shape input: {err}")))?;
    let input_tensor = ort::value::Tensor::from_array(input_array)
        .map_err(|err| InferenceError::Backend(format!("failed to create tensor: {err}")))?;

    let inputs = ort::inputs![input_tensor]
        .map_err(|err| InferenceError::Backend(format!("failed to build inputs: {err}")))?;
    let outputs = session
        .run(inputs)
        .map_err(|err| InferenceError::Backend(format!("inference failed: {err}")))?;

    let output = outputs
        .iter()
        .next()
        .ok_or_else(|| InferenceError::Backend("no output from model".to_string()))?;
    let data = output
        .1
        .try_extract_tensor::<f32>()
        .map_err(|err| InferenceError::Backend(format!("failed to extract output: {err}")))?;

    let mask = data
        .iter()
        .map(|&v| (v.clamp(0.0, 1.0) * 255.0) as u8)
        .collect();
    Ok(SegmentationMask::new(SEG_WIDTH, SEG_HEIGHT, mask))
}

/// Resize to the model's input size and convert to NHWC float RGB.
fn preprocess_nhwc(frame: &FramePixels, target_width: u32, target_height: u32) -> Vec<f32> {
    let mut output = vec![0.0f32; (target_width * target_height * 3) as usize];
    let x_ratio = frame.width as f32 / target_width as f32;
    let y_ratio = frame.height as f32 / target_height as f32;

    for y in 0..target_height {
        for x in 0..target_width {
            let src_x = (x as f32 * x_ratio) as u32;
            let src_y = (y as f32 * y_ratio) as u32;
            let src_idx = ((src_y * frame.width + src_x) * 4) as usize;
            if src_idx + 2 >= frame.rgba.len() {
                continue;
            }
            let out_idx = ((y * target_width + x) * 3) as usize;
            output[out_idx] = frame.rgba[src_idx] as f32 / 255.0;
            output[out_idx + 1] = frame.rgba[src_idx + 1] as f32 / 255.0;
            output[out_idx + 2] = frame.rgba[src_idx + 2] as f32 / 255.0;
        }
    }

    output
}
