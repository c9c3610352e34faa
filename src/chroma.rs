//! Chroma key parameters
//!
//! Key color and distance thresholds consumed by the chroma render filter
//! and produced by green-screen calibration. Persisted to user settings
//! under a single key and restored at presenter initialization.

use serde::{Deserialize, Serialize};

/// Parameters for chroma-distance keying.
///
/// `range_low`/`range_high` bound the smoothstep over the chroma distance
/// from `key_rgb`; the invariant `0.0 <= range_low <= range_high <= 1.0`
/// always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChromaParameters {
    key_rgb: [f32; 3],
    range_low: f32,
    range_high: f32,
}

impl Default for ChromaParameters {
    fn default() -> Self {
        Self {
            key_rgb: [0.0, 1.0, 0.0],
            range_low: 0.4,
            range_high: 0.5,
        }
    }
}

impl ChromaParameters {
    pub fn new(key_rgb: [f32; 3], range_low: f32, range_high: f32) -> Self {
        let low = range_low.clamp(0.0, 1.0);
        let high = range_high.clamp(0.0, 1.0);
        Self {
            key_rgb: key_rgb.map(|c| c.clamp(0.0, 1.0)),
            range_low: low.min(high),
            range_high: high.max(low),
        }
    }

    /// Build parameters from a calibration estimate's 0-255 key color and
    /// 0-255 lower/upper thresholds.
    pub fn from_estimate(key_rgb: [u8; 3], lower: u8, upper: u8) -> Self {
        Self::new(
            key_rgb.map(|c| c as f32 / 255.0),
            lower as f32 / 255.0,
            upper as f32 / 255.0,
        )
    }

    pub fn key_rgb(&self) -> [f32; 3] {
        self.key_rgb
    }

    pub fn range_low(&self) -> f32 {
        self.range_low
    }

    pub fn range_high(&self) -> f32 {
        self.range_high
    }

    pub fn set_key_rgb(&mut self, key_rgb: [f32; 3]) {
        self.key_rgb = key_rgb.map(|c| c.clamp(0.0, 1.0));
    }

    /// Clamp into `[0, 1]`; raises `range_high` if needed to keep ordering.
    pub fn set_range_low(&mut self, value: f32) {
        self.range_low = value.clamp(0.0, 1.0);
        self.range_high = self.range_high.max(self.range_low);
    }

    /// Clamp into `[0, 1]`; lowers `range_low` if needed to keep ordering.
    pub fn set_range_high(&mut self, value: f32) {
        self.range_high = value.clamp(0.0, 1.0);
        self.range_low = self.range_low.min(self.range_high);
    }
}
