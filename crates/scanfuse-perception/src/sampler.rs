//! Range Sampler.
//!
//! Reduces one raw scan (up to [`MAX_SCAN_SAMPLES`] polar samples in device
//! units) to a [`Profile`]: a map from quantised forward angle to the
//! closest valid return in that bucket.
//!
//! Per sample:
//!
//! ```text
//! angle    = normalize(-raw_angle_deg)            // device is clockwise
//! distance = raw_distance_q2 / 4                  // mm
//! keep if  -90 <= angle <= 90  and  MIN <= distance <= MAX
//! bucket   = round(angle / resolution) * resolution
//! profile[bucket] = min(profile[bucket], distance)
//! ```
//!
//! # Example
//!
//! ```rust
//! use scanfuse_perception::sampler::{RangeSampler, SamplerConfig};
//! use scanfuse_types::PolarSample;
//!
//! let sampler = RangeSampler::new(SamplerConfig::default());
//! let profile = sampler.reduce(&[
//!     PolarSample::from_device(0.0, 1000.0),
//!     PolarSample::from_device(0.2, 900.0),
//! ]);
//! assert_eq!(profile.get(0), Some(900.0));
//! ```
//!
//! [`MAX_SCAN_SAMPLES`]: scanfuse_types::MAX_SCAN_SAMPLES

use std::collections::BTreeMap;

use scanfuse_types::PolarSample;

/// Half-width of the published field of view (degrees either side of
/// forward).
pub const FORWARD_HALF_ANGLE_DEG: f32 = 90.0;

/// Magnitude above which [`normalize_angle`] pre-reduces its input so the
/// ±360 stepping stays bounded.
const PRE_REDUCE_LIMIT_DEG: f32 = 3600.0;

// ────────────────────────────────────────────────────────────────────────────
// Angle helpers
// ────────────────────────────────────────────────────────────────────────────

/// Normalise an angle into `(-180, 180]` by stepping ±360.
///
/// Stepping (rather than `rem_euclid`) keeps `-180` mapped to `+180` and
/// leaves in-range values bit-for-bit untouched. Non-finite input is
/// returned as NaN.
pub fn normalize_angle(angle_deg: f32) -> f32 {
    if !angle_deg.is_finite() {
        return f32::NAN;
    }
    let mut angle = if angle_deg.abs() > PRE_REDUCE_LIMIT_DEG {
        angle_deg % 360.0
    } else {
        angle_deg
    };
    while angle <= -180.0 {
        angle += 360.0;
    }
    while angle > 180.0 {
        angle -= 360.0;
    }
    angle
}

/// Convert a clockwise device angle into the forward, counter-clockwise
/// convention used everywhere else.
pub fn device_to_forward(device_deg: f32) -> f32 {
    normalize_angle(-device_deg)
}

/// Round `angle_deg` to the nearest multiple of `resolution_deg` and return
/// it as an integer bucket key (degrees).
pub fn quantize(angle_deg: f32, resolution_deg: f32) -> i32 {
    ((angle_deg / resolution_deg).round() * resolution_deg) as i32
}

// ────────────────────────────────────────────────────────────────────────────
// Profile
// ────────────────────────────────────────────────────────────────────────────

/// The current cycle's quantised angle → nearest distance map.
///
/// Holds at most one distance per bucket; inserting into an occupied bucket
/// keeps the smaller distance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    buckets: BTreeMap<i32, f32>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `distance_mm` at `bucket_deg`, keeping the closer of the new
    /// and any existing value.
    pub fn insert_nearest(&mut self, bucket_deg: i32, distance_mm: f32) {
        self.buckets
            .entry(bucket_deg)
            .and_modify(|d| {
                if distance_mm < *d {
                    *d = distance_mm;
                }
            })
            .or_insert(distance_mm);
    }

    pub fn get(&self, bucket_deg: i32) -> Option<f32> {
        self.buckets.get(&bucket_deg).copied()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Iterate `(bucket angle, distance)` in ascending angle order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, f32)> + '_ {
        self.buckets.iter().map(|(&a, &d)| (a, d))
    }
}

impl FromIterator<(i32, f32)> for Profile {
    fn from_iter<I: IntoIterator<Item = (i32, f32)>>(iter: I) -> Self {
        let mut profile = Profile::new();
        for (bucket, distance) in iter {
            profile.insert_nearest(bucket, distance);
        }
        profile
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RangeSampler
// ────────────────────────────────────────────────────────────────────────────

/// Filtering and downsampling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    /// Bucket width in degrees (e.g. 1.0 or 5.0).
    pub resolution_deg: f32,
    /// Returns closer than this are discarded (mm).
    pub min_distance_mm: f32,
    /// Returns further than this are discarded (mm).
    pub max_distance_mm: f32,
}

impl SamplerConfig {
    /// Build a config; a non-positive or non-finite resolution falls back to
    /// 1°.
    pub fn new(resolution_deg: f32, min_distance_mm: f32, max_distance_mm: f32) -> Self {
        let resolution_deg = if resolution_deg.is_finite() && resolution_deg > 0.0 {
            resolution_deg
        } else {
            1.0
        };
        Self {
            resolution_deg,
            min_distance_mm,
            max_distance_mm,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::new(1.0, 100.0, 3000.0)
    }
}

/// Stateless scan reducer.
#[derive(Debug, Clone, Copy)]
pub struct RangeSampler {
    config: SamplerConfig,
}

impl RangeSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Reduce one scan to a forward-hemisphere profile.
    pub fn reduce(&self, samples: &[PolarSample]) -> Profile {
        let mut profile = Profile::new();
        for sample in samples {
            if let Some((bucket, distance)) = self.bucket_sample(sample) {
                profile.insert_nearest(bucket, distance);
            }
        }
        profile
    }

    /// Convert and filter a single sample; `None` if it is rejected.
    fn bucket_sample(&self, sample: &PolarSample) -> Option<(i32, f32)> {
        let angle = device_to_forward(sample.angle_deg());
        let distance = sample.distance_mm();

        let in_view = (-FORWARD_HALF_ANGLE_DEG..=FORWARD_HALF_ANGLE_DEG).contains(&angle);
        let in_range =
            (self.config.min_distance_mm..=self.config.max_distance_mm).contains(&distance);
        if !(in_view && in_range) {
            return None;
        }
        Some((self.hemisphere_bucket(angle), distance))
    }

    /// Like [`quantize`], but steps one bucket towards forward when rounding
    /// would land outside ±90° (resolutions that do not divide 90).
    fn hemisphere_bucket(&self, angle: f32) -> i32 {
        let resolution = self.config.resolution_deg;
        let mut steps = (angle / resolution).round();
        if (steps * resolution).abs() > FORWARD_HALF_ANGLE_DEG {
            steps -= steps.signum();
        }
        (steps * resolution) as i32
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
