//! Frame pipeline orchestration
//!
//! Per-tick driver of the presenter video path. `advance` never blocks:
//! segmentation, calibration and gesture recognition are dispatched as
//! tasks and their results picked up on later ticks. Completion handlers
//! re-read current configuration rather than trusting state captured at
//! dispatch time, so superseded results are discarded, not cancelled.

use std::sync::Arc;

use super::calibration::CONFIDENCE_THRESHOLD;
use super::masker::{Masker, MaskerFrame, MaskerStyle};
use super::{ChromaMode, PendingCalibration, PendingGesture, PendingSegmentation, Presenter};
use crate::chroma::ChromaParameters;
use crate::provider::{FrameDescriptor, VideoProvider};
use crate::segmenter::{CalibrationEstimate, GestureRecognizer, Segmenter, TaskPoll};
use crate::surface::RenderSurface;
use crate::Millis;

impl Presenter {
    /// Advance the pipeline by one render tick.
    ///
    /// Tolerates an absent provider, segmenter or track at any time; every
    /// stage begins with a guard.
    pub fn advance(&mut self, timestamp: Millis) {
        if self.is_destroyed() {
            return;
        }

        // Resolve work dispatched on earlier ticks before producing more.
        self.poll_gesture();
        self.poll_segmentation(timestamp);
        self.poll_calibration(timestamp);

        let eligible = self.calibration_eligible();
        self.calibration.tick(timestamp, eligible);

        let active = match self.provider.as_ref() {
            Some(provider) => provider.active(),
            None => return,
        };
        self.set_video_ready(active);
        if !active {
            return;
        }

        let rendered = match self.provider.as_mut() {
            Some(provider) => provider.render(timestamp),
            None => return,
        };
        if !rendered {
            return;
        }

        let (frame, provider_size) = match self.provider.as_ref() {
            Some(provider) => match provider.current_frame() {
                Some(frame) => (frame, provider.size()),
                None => return,
            },
            None => return,
        };

        if provider_size != self.last_camera_size {
            self.last_camera_size = provider_size;
            self.update_layout();
        }

        // Release the superseded frame immediately; some platforms keep
        // at most two decoded frames alive.
        if let Some(previous) = self.displayed_frame {
            if previous != frame.handle {
                if let Some(provider) = self.provider.as_mut() {
                    provider.detach(previous);
                }
            }
        }

        self.dispatch_gesture(frame, timestamp);

        let needs_segmentation = self.segmentation_required() && self.local_segmentation_enabled;

        self.maybe_dispatch_calibration(frame, timestamp);

        if !needs_segmentation {
            // Fast path: display the frame as-is. The readable buffer is
            // only kept on while a calibration request is waiting for one,
            // or while the canvas-path masker draws from it.
            let desired_buffer = self.calibration.is_armed()
                || (self.masker_feed_wanted()
                    && self
                        .masker
                        .as_ref()
                        .map(Masker::needs_pixel_buffers)
                        .unwrap_or(false));
            if let Some(provider) = self.provider.as_mut() {
                if provider.can_provide_buffer() && provider.buffer_mode() != desired_buffer {
                    provider.set_desired_buffer_mode(desired_buffer);
                }
            }
            self.display_frame(frame);
            if self.masker_feed_wanted() {
                self.feed_masker(frame, None, timestamp);
            }
            return;
        }

        // Segmented path.
        if let Some(provider) = self.provider.as_mut() {
            if provider.can_provide_buffer() && !provider.buffer_mode() {
                provider.set_desired_buffer_mode(true);
            }
        }
        if self.pending_segmentation.is_some() {
            // One request in flight at a time; this frame is skipped.
            return;
        }
        if self.segmenter.is_none() {
            return;
        }
        let Some(provider) = self.provider.as_mut() else {
            return;
        };
        provider.protect(frame.handle);
        let pixels = provider.frame_pixels(frame.handle);
        match (pixels, self.segmenter.as_mut()) {
            (Some(pixels), Some(segmenter)) => {
                let task = segmenter.segment(&pixels, timestamp);
                self.pending_segmentation = Some(PendingSegmentation { frame, task });
            }
            _ => {
                // No readable buffer yet; release the hold and retry on
                // the next tick once the provider has switched modes.
                provider.unprotect(frame.handle);
            }
        }
    }

    /*
     * Gesture recognition
     */

    fn dispatch_gesture(&mut self, frame: FrameDescriptor, timestamp: Millis) {
        if self.gesture_recognizer.is_none() || self.pending_gesture.is_some() {
            return;
        }
        let Some(provider) = self.provider.as_mut() else {
            return;
        };
        provider.protect(frame.handle);
        let pixels = provider.frame_pixels(frame.handle);
        match (pixels, self.gesture_recognizer.as_mut()) {
            (Some(pixels), Some(recognizer)) => {
                let task = recognizer.process(&pixels, timestamp);
                self.pending_gesture = Some(PendingGesture {
                    frame: frame.handle,
                    task,
                });
            }
            _ => {
                provider.unprotect(frame.handle);
            }
        }
    }

    fn poll_gesture(&mut self) {
        let Some(pending) = self.pending_gesture.take() else {
            return;
        };
        match pending.task.poll() {
            TaskPoll::Pending => self.pending_gesture = Some(pending),
            TaskPoll::Ready(result) => {
                if let Err(err) = result {
                    if !err.is_cancellation() {
                        log::debug!("gesture recognition failed: {err}");
                    }
                }
                // The hold is released on every outcome.
                if let Some(provider) = self.provider.as_mut() {
                    provider.unprotect(pending.frame);
                }
            }
        }
    }

    /*
     * Segmentation
     */

    fn poll_segmentation(&mut self, timestamp: Millis) {
        let Some(pending) = self.pending_segmentation.take() else {
            return;
        };
        match pending.task.poll() {
            TaskPoll::Pending => {
                self.pending_segmentation = Some(pending);
            }
            TaskPoll::Ready(Ok(mask)) => {
                // Re-read the current requirement; the configuration may
                // have changed while the request was out.
                let still_required =
                    self.segmentation_required() && self.local_segmentation_enabled;
                if !still_required {
                    if let Some(provider) = self.provider.as_mut() {
                        provider.detach(pending.frame.handle);
                        provider.unprotect(pending.frame.handle);
                    }
                    return;
                }

                let mask = Arc::new(mask);
                if self.displayed_frame == Some(pending.frame.handle) {
                    self.surface.set_contents_dirty();
                    if let Some(binder) = self.foreground.as_mut() {
                        binder.mirror_contents_dirty();
                    }
                } else {
                    self.surface.set_contents(Some(pending.frame.handle));
                    self.displayed_frame = Some(pending.frame.handle);
                    if let Some(binder) = self.foreground.as_mut() {
                        binder.mirror_contents(Some(pending.frame.handle));
                    }
                }
                self.surface.set_mask(Some(mask.clone()));
                if let Some(binder) = self.foreground.as_mut() {
                    binder.mirror_mask(Some(mask.clone()));
                }
                self.current_mask = Some(mask.clone());

                if self.masker_feed_wanted() {
                    self.feed_masker(pending.frame, Some(&mask), timestamp);
                }

                if let Some(provider) = self.provider.as_mut() {
                    provider.unprotect(pending.frame.handle);
                }
            }
            TaskPoll::Ready(Err(err)) => {
                if !err.is_cancellation() {
                    log::warn!("segmentation failed: {err}");
                }
                // The source frame is always released to prevent a leak.
                if let Some(provider) = self.provider.as_mut() {
                    provider.detach(pending.frame.handle);
                    provider.unprotect(pending.frame.handle);
                }
            }
        }
    }

    /*
     * Calibration
     */

    fn maybe_dispatch_calibration(&mut self, frame: FrameDescriptor, timestamp: Millis) {
        if !self.calibration.is_armed() || self.pending_calibration.is_some() {
            return;
        }
        if self.segmenter.is_none() {
            return;
        }
        let Some(provider) = self.provider.as_mut() else {
            return;
        };
        if provider.can_provide_buffer() && !provider.buffer_mode() {
            // Switch the provider into buffered mode and estimate once a
            // readable frame comes through.
            provider.set_desired_buffer_mode(true);
            return;
        }
        let Some(pixels) = provider.frame_pixels(frame.handle) else {
            log::info!("green screen estimate waiting for a readable buffer");
            return;
        };

        let is_initial = self.calibration.begin_dispatch();
        let crop = self.crop_insets();
        let Some(segmenter) = self.segmenter.as_mut() else {
            return;
        };
        let task = segmenter.estimate_calibration(&pixels, timestamp, is_initial, crop);
        self.pending_calibration = Some(PendingCalibration { task });
    }

    fn poll_calibration(&mut self, now: Millis) {
        let Some(pending) = self.pending_calibration.take() else {
            return;
        };
        match pending.task.poll() {
            TaskPoll::Pending => {
                self.pending_calibration = Some(pending);
            }
            TaskPoll::Ready(Ok(estimate)) => {
                if !self.calibration.is_in_flight() {
                    // Eligibility was lost while the request was out.
                    log::debug!("discarding stale green screen estimate");
                    return;
                }
                self.handle_calibration_estimate(estimate, now);
            }
            TaskPoll::Ready(Err(err)) => {
                if !err.is_cancellation() {
                    log::error!("green screen estimation failed: {err}");
                }
                if self.calibration.is_in_flight() {
                    self.calibration.complete_failed();
                }
            }
        }
    }

    fn handle_calibration_estimate(&mut self, estimate: CalibrationEstimate, now: Millis) {
        if estimate.confidence < CONFIDENCE_THRESHOLD {
            if estimate.session_start {
                log::error!(
                    "cannot start green screen auto-adjust, estimate scored {:.0}",
                    estimate.confidence
                );
                // Permanent degrade: switch to manual keying and tell the
                // user. No retry until they opt back into Automatic.
                self.calibration.complete_failed();
                self.set_chroma_mode(ChromaMode::Manual);
                self.notify_calibration_fallback();
            } else {
                log::info!(
                    "skipping green screen re-estimation, scored {:.0}",
                    estimate.confidence
                );
                let eligible = self.calibration_eligible();
                self.calibration.complete_discarded(now, eligible);
            }
            return;
        }

        let params = ChromaParameters::from_estimate(
            estimate.key_rgb,
            estimate.threshold_low,
            estimate.threshold_high,
        );
        self.apply_chroma_parameters(params);
        let eligible = self.calibration_eligible();
        self.calibration.complete_applied(now, eligible);
    }

    /*
     * Display & masker feed
     */

    fn display_frame(&mut self, frame: FrameDescriptor) {
        if self.displayed_frame == Some(frame.handle) {
            self.surface.set_contents_dirty();
            if let Some(binder) = self.foreground.as_mut() {
                binder.mirror_contents_dirty();
            }
        } else {
            self.surface.set_contents(Some(frame.handle));
            self.displayed_frame = Some(frame.handle);
            if let Some(binder) = self.foreground.as_mut() {
                binder.mirror_contents(Some(frame.handle));
            }
        }
    }

    fn masker_feed_wanted(&self) -> bool {
        self.masker_needs_render && self.should_use_masker_output() && self.masker.is_some()
    }

    fn masker_user_scale(&self) -> f32 {
        if self.using_reduced_video_frame {
            self.scale()
        } else {
            1.0
        }
    }

    fn feed_masker(
        &mut self,
        frame: FrameDescriptor,
        mask: Option<&Arc<crate::segmenter::SegmentationMask>>,
        timestamp: Millis,
    ) {
        let pixels = self
            .provider
            .as_ref()
            .and_then(|provider| provider.frame_pixels(frame.handle));
        let style = MaskerStyle {
            physical_green_screen: self.physical_green_screen(),
            background_style: self.background_style(),
            background_paint: self.background_paint(),
        };
        let user_scale = self.masker_user_scale();
        let Some(masker) = self.masker.as_mut() else {
            return;
        };
        masker.render(
            MaskerFrame {
                descriptor: frame,
                pixels: pixels.as_ref(),
            },
            mask,
            user_scale,
            &style,
            timestamp,
        );
    }
}
