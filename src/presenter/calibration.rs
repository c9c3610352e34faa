//! Green-screen calibration state machine
//!
//! Governs when automatic chroma recalibration may be requested. The
//! machine never dispatches anything itself; the orchestrator asks it for
//! permission each tick and reports completions back.

use crate::Millis;

/// Estimates scoring below this 0-100 confidence are not applied.
pub const CONFIDENCE_THRESHOLD: f32 = 50.0;

/// Delay between calibrations while auto-adjust is active.
pub const COOLDOWN_MS: Millis = 60_000.0;

/// Settle time after a device reconnect/unmute before estimating; the
/// first frames off a camera are often black or dimmed.
pub const SETTLE_DEBOUNCE_MS: Millis = 1_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationState {
    /// Not eligible, or waiting for eligibility to return.
    Idle,
    /// Eligible with no request in flight; the next tick may dispatch.
    Armed,
    /// A request is outstanding.
    InFlight { is_initial: bool },
    /// Calibrated; re-arms when the cooldown expires.
    Cooldown { until: Millis },
}

#[derive(Debug)]
pub struct CalibrationMachine {
    state: CalibrationState,
    /// Whether the next dispatch is the first of an auto-adjust session.
    initial_pending: bool,
    settle_requested: bool,
    settle_deadline: Option<Millis>,
}

impl CalibrationMachine {
    pub fn new() -> Self {
        Self {
            state: CalibrationState::Idle,
            initial_pending: false,
            settle_requested: false,
            settle_deadline: None,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == CalibrationState::Armed
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, CalibrationState::InFlight { .. })
    }

    pub fn cooldown_armed(&self) -> bool {
        matches!(self.state, CalibrationState::Cooldown { .. })
    }

    /// The next dispatch (if any) starts a fresh auto-adjust session.
    pub fn mark_initial_pending(&mut self) {
        self.initial_pending = true;
    }

    /// A device reconnected or unmuted; re-evaluate after the settle
    /// debounce. Replaces any debounce already pending.
    pub fn note_device_settled(&mut self) {
        self.settle_requested = true;
    }

    /// Service timers against the render-callback timeline.
    pub fn tick(&mut self, now: Millis, eligible: bool) {
        if self.settle_requested {
            self.settle_requested = false;
            self.settle_deadline = Some(now + SETTLE_DEBOUNCE_MS);
        }
        if let Some(deadline) = self.settle_deadline {
            if now >= deadline {
                self.settle_deadline = None;
                // A settled device starts a fresh session, unless one is
                // already running.
                if eligible && !self.is_in_flight() && !self.cooldown_armed() {
                    self.initial_pending = true;
                }
                self.re_evaluate(eligible);
            }
        }
        if let CalibrationState::Cooldown { until } = self.state {
            if now >= until {
                self.re_evaluate(eligible);
            }
        }
    }

    /// Eligibility inputs changed (physical screen, chroma mode, segmenter
    /// availability). Cancels any running cooldown.
    pub fn eligibility_changed(&mut self, eligible: bool) {
        self.re_evaluate(eligible);
    }

    fn re_evaluate(&mut self, eligible: bool) {
        if self.is_in_flight() {
            if !eligible {
                // The outstanding request completes as stale.
                self.state = CalibrationState::Idle;
                self.initial_pending = false;
            }
            return;
        }
        if eligible {
            // Arming out of idle begins a new auto-adjust session; its
            // first estimate carries the initial flag.
            if self.state == CalibrationState::Idle {
                self.initial_pending = true;
            }
            self.state = CalibrationState::Armed;
        } else {
            self.state = CalibrationState::Idle;
            self.initial_pending = false;
        }
    }

    /// Record a dispatch. Only valid while armed. Returns the `is_initial`
    /// flag the request must carry.
    pub fn begin_dispatch(&mut self) -> bool {
        debug_assert!(self.is_armed());
        let is_initial = self.initial_pending;
        self.initial_pending = false;
        self.state = CalibrationState::InFlight { is_initial };
        is_initial
    }

    /// A usable estimate was applied; schedule the periodic refresh.
    pub fn complete_applied(&mut self, now: Millis, eligible: bool) {
        self.finish_with_cooldown(now, eligible);
    }

    /// A low-confidence estimate during an active session was discarded;
    /// retry on the normal schedule without disturbing the calibration.
    pub fn complete_discarded(&mut self, now: Millis, eligible: bool) {
        self.finish_with_cooldown(now, eligible);
    }

    /// The request failed, or a low-confidence initial estimate aborted
    /// the session. No retry beyond the normal eligibility re-check.
    pub fn complete_failed(&mut self) {
        self.state = CalibrationState::Idle;
    }

    fn finish_with_cooldown(&mut self, now: Millis, eligible: bool) {
        self.state = if eligible {
            CalibrationState::Cooldown {
                until: now + COOLDOWN_MS,
            }
        } else {
            CalibrationState::Idle
        };
    }

    /// Cancel timers and return to idle. Used at teardown.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for CalibrationMachine {
    fn default() -> Self {
        Self::new()
    }
}
