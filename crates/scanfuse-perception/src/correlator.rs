//! Detection Correlator.
//!
//! Attaches a range to a camera [`Detection`] by finding the profile bucket
//! angularly closest to the detection's angle. The lookup tries the index's
//! O(1) [`exact`][AngularIndex::exact] bucket first and only widens to
//! [`nearest`][AngularIndex::nearest] when the exact hit is missing or a
//! neighbouring bucket could still hold a closer point. The answer is
//! always the one a linear scan of the whole profile would give.

use scanfuse_types::{Detection, TrackedObject, object_id};
use tracing::trace;

use crate::angular_index::{AngularIndex, IndexHit};
use crate::sampler::Profile;

/// Which index lookup produced a [`Correlation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPath {
    Exact,
    Nearest,
}

/// A detection paired with the profile point it was matched to.
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    pub detection: Detection,
    pub matched_angle_deg: f32,
    pub distance_mm: f32,
    pub error_deg: f32,
    pub via: MatchPath,
}

impl Correlation {
    /// Identity slot this correlation writes to.
    pub fn object_id(&self) -> String {
        object_id(&self.detection.label, self.detection.angle_deg)
    }

    /// Cache entry for this correlation, stamped at `now_ms`.
    ///
    /// The object keeps the camera angle; the matched profile angle only
    /// decides which distance is attached.
    pub fn into_tracked(self, now_ms: u64) -> TrackedObject {
        TrackedObject {
            id: self.object_id(),
            label: self.detection.label,
            confidence: self.detection.confidence,
            angle_deg: self.detection.angle_deg,
            distance_mm: self.distance_mm,
            area: self.detection.area,
            last_update_ms: now_ms,
        }
    }
}

/// Matches detections against a profile within `max_angle_diff_deg`.
#[derive(Debug, Clone, Copy)]
pub struct Correlator {
    max_angle_diff_deg: f32,
}

impl Correlator {
    pub fn new(max_angle_diff_deg: f32) -> Self {
        Self { max_angle_diff_deg }
    }

    pub fn max_angle_diff_deg(&self) -> f32 {
        self.max_angle_diff_deg
    }

    /// Build an index over `profile` whose search radius covers this
    /// correlator's tolerance.
    pub fn index(&self, profile: &Profile, bucket_width_deg: f32) -> AngularIndex {
        AngularIndex::for_tolerance(profile, bucket_width_deg, self.max_angle_diff_deg)
    }

    /// Match one detection, or `None` if nothing lies within tolerance.
    ///
    /// `index` must have been built with a radius of at least
    /// [`AngularIndex::radius_for`] this correlator's tolerance, as
    /// [`Correlator::index`] does.
    pub fn correlate(&self, index: &AngularIndex, detection: &Detection) -> Option<Correlation> {
        let angle = detection.angle_deg;
        if !angle.is_finite() {
            return None;
        }

        let (hit, via) = match index.exact(angle) {
            Some(hit) if hit.error_deg < index.margin(angle) => (hit, MatchPath::Exact),
            _ => (index.nearest(angle)?, MatchPath::Nearest),
        };

        if !self.accepts(&hit) {
            trace!(
                label = %detection.label,
                angle_deg = angle,
                error_deg = hit.error_deg,
                "detection outside angular tolerance"
            );
            return None;
        }

        Some(Correlation {
            detection: detection.clone(),
            matched_angle_deg: hit.angle_deg,
            distance_mm: hit.distance_mm,
            error_deg: hit.error_deg,
            via,
        })
    }

    /// Match a whole batch, dropping detections that find no range.
    pub fn correlate_all<'a>(
        &'a self,
        index: &'a AngularIndex,
        detections: &'a [Detection],
    ) -> impl Iterator<Item = Correlation> + 'a {
        detections.iter().filter_map(|d| self.correlate(index, d))
    }

    fn accepts(&self, hit: &IndexHit) -> bool {
        hit.error_deg <= self.max_angle_diff_deg && hit.distance_mm > 0.0
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(10.0)
    }
}
