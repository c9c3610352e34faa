//! Green-screen parameter estimation
//!
//! Estimates the chroma key color and distance thresholds from a frame of
//! a physical green screen, with a 0-100 confidence score. Works in the
//! same CC (chroma) space as the chroma render filter, so the thresholds
//! it produces feed the filter directly.

use super::{CalibrationEstimate, InferenceError};
use crate::geometry::EdgeInsets;
use crate::provider::FramePixels;

const HISTOGRAM_BINS: usize = 32;
const CC_RANGE: f32 = 0.6;
const CLUSTER_RADIUS: f32 = 0.08;
const MAX_SAMPLES: usize = 10_000;
// Chroma magnitude at which a key color counts as fully saturated; a
// neutral (gray) dominant color must score zero confidence.
const FULL_CHROMA_STRENGTH: f32 = 0.25;
const THRESHOLD_BASE_MARGIN: f32 = 0.05;

/// Convert RGB in `[0, 1]` to the chroma plane used by the key filter.
pub(crate) fn rgb_to_cc(r: f32, g: f32, b: f32) -> (f32, f32) {
    let y = 0.2989 * r + 0.5866 * g + 0.1145 * b;
    ((b - y) * 0.5647, (r - y) * 0.7132)
}

/// Estimate chroma-key parameters from `frame`.
///
/// Samples the crop-inset-reduced region, finds the dominant chroma
/// cluster, and scores confidence by how much of the region the cluster
/// covers and how saturated the dominant color is.
pub fn estimate_green_screen(
    frame: &FramePixels,
    crop: EdgeInsets,
    session_start: bool,
) -> Result<CalibrationEstimate, InferenceError> {
    let crop = crop.clamped();
    let x0 = (frame.width as f32 * crop.left) as u32;
    let x1 = (frame.width as f32 * (1.0 - crop.right)) as u32;
    let y0 = (frame.height as f32 * crop.top) as u32;
    let y1 = (frame.height as f32 * (1.0 - crop.bottom)) as u32;
    if x1 <= x0 || y1 <= y0 {
        return Err(InferenceError::Backend(
            "empty sample region after crop".to_string(),
        ));
    }

    let region_pixels = ((x1 - x0) as usize) * ((y1 - y0) as usize);
    let step = ((region_pixels / MAX_SAMPLES) as f32).sqrt().ceil().max(1.0) as u32;

    // Pass 1: histogram over the chroma plane.
    let mut histogram = vec![0u32; HISTOGRAM_BINS * HISTOGRAM_BINS];
    let mut samples: Vec<([f32; 3], (f32, f32))> = Vec::new();
    let mut y = y0;
    while y < y1 {
        let mut x = x0;
        while x < x1 {
            let idx = ((y * frame.width + x) * 4) as usize;
            if idx + 2 >= frame.rgba.len() {
                break;
            }
            let r = frame.rgba[idx] as f32 / 255.0;
            let g = frame.rgba[idx + 1] as f32 / 255.0;
            let b = frame.rgba[idx + 2] as f32 / 255.0;
            let cc = rgb_to_cc(r, g, b);
            histogram[bin_index(cc)] += 1;
            samples.push(([r, g, b], cc));
            x += step;
        }
        y += step;
    }
    if samples.is_empty() {
        return Err(InferenceError::Backend("no samples in region".to_string()));
    }

    // Pass 2: cluster around the dominant bin's center.
    let dominant = histogram
        .iter()
        .enumerate()
        .max_by_key(|(_, count)| **count)
        .map(|(index, _)| index)
        .unwrap_or(0);
    let center = bin_center(dominant);

    let mut key_rgb = [0.0f32; 3];
    let mut key_cc = (0.0f32, 0.0f32);
    let mut in_cluster = 0usize;
    for (rgb, cc) in &samples {
        if cc_distance(*cc, center) <= CLUSTER_RADIUS {
            for (accum, channel) in key_rgb.iter_mut().zip(rgb.iter()) {
                *accum += channel;
            }
            key_cc.0 += cc.0;
            key_cc.1 += cc.1;
            in_cluster += 1;
        }
    }
    if in_cluster == 0 {
        return Err(InferenceError::Backend("empty chroma cluster".to_string()));
    }
    let n = in_cluster as f32;
    for channel in key_rgb.iter_mut() {
        *channel /= n;
    }
    key_cc.0 /= n;
    key_cc.1 /= n;

    // Spread of the cluster sets the lower threshold; the upper threshold
    // leaves headroom for the smoothstep falloff.
    let mut mean_dist = 0.0f32;
    let mut mean_sq = 0.0f32;
    let mut spread_count = 0usize;
    for (_, cc) in &samples {
        let d = cc_distance(*cc, key_cc);
        if d <= CLUSTER_RADIUS {
            mean_dist += d;
            mean_sq += d * d;
            spread_count += 1;
        }
    }
    let spread_n = spread_count.max(1) as f32;
    mean_dist /= spread_n;
    let variance = (mean_sq / spread_n - mean_dist * mean_dist).max(0.0);
    let threshold_low = (mean_dist + 3.0 * variance.sqrt() + THRESHOLD_BASE_MARGIN).min(0.9);
    let threshold_high = (threshold_low * 1.3 + 0.02).min(1.0);

    let coverage = in_cluster as f32 / samples.len() as f32;
    let chroma_strength = cc_distance(key_cc, (0.0, 0.0));
    let saturation = (chroma_strength / FULL_CHROMA_STRENGTH).clamp(0.0, 1.0);
    let confidence = (100.0 * coverage * saturation).clamp(0.0, 100.0);

    Ok(CalibrationEstimate {
        confidence,
        session_start,
        key_rgb: key_rgb.map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8),
        threshold_low: (threshold_low * 255.0).round() as u8,
        threshold_high: (threshold_high * 255.0).round() as u8,
    })
}

fn bin_index(cc: (f32, f32)) -> usize {
    let to_bin = |v: f32| {
        (((v + CC_RANGE) / (2.0 * CC_RANGE) * HISTOGRAM_BINS as f32) as isize)
            .clamp(0, HISTOGRAM_BINS as isize - 1) as usize
    };
    to_bin(cc.1) * HISTOGRAM_BINS + to_bin(cc.0)
}

fn bin_center(index: usize) -> (f32, f32) {
    let bin_size = 2.0 * CC_RANGE / HISTOGRAM_BINS as f32;
    let cb = (index % HISTOGRAM_BINS) as f32 * bin_size - CC_RANGE + bin_size / 2.0;
    let cr = (index / HISTOGRAM_BINS) as f32 * bin_size - CC_RANGE + bin_size / 2.0;
    (cb, cr)
}

fn cc_distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    let db = a.0 - b.0;
    let dr = a.1 - b.1;
    (db * db + dr * dr).sqrt()
}
