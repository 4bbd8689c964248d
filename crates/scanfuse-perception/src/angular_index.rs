//! Angular Index.
//!
//! A bucketed view over a [`Profile`] that answers "which profile point is
//! angularly closest to this query" without scanning the whole profile.
//!
//! Profile points are grouped by `round(angle / width)`. Two lookups are
//! offered:
//!
//! - [`AngularIndex::exact`] – the query's own bucket only, O(1).
//! - [`AngularIndex::nearest`] – the query's bucket plus `radius` buckets on
//!   each side, returning the candidate with the smallest angular error
//!   (ties go to the smaller distance). The search never leaves the span of
//!   occupied buckets, so its cost is bounded by the profile width whatever
//!   the radius.
//!
//! The index is rebuilt from scratch every cycle and never mutated
//! afterwards.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use crate::sampler::Profile;

/// A profile point returned by an index lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexHit {
    /// Angle of the matched profile bucket (degrees).
    pub angle_deg: f32,
    pub distance_mm: f32,
    /// `|query − angle_deg|`.
    pub error_deg: f32,
}

impl IndexHit {
    fn new(query_deg: f32, angle: i32, distance_mm: f32) -> Self {
        let angle_deg = angle as f32;
        Self {
            angle_deg,
            distance_mm,
            error_deg: (query_deg - angle_deg).abs(),
        }
    }

    /// Smaller angular error wins; equal errors prefer the closer obstacle.
    fn beats(&self, other: &IndexHit) -> bool {
        self.error_deg < other.error_deg
            || (self.error_deg == other.error_deg && self.distance_mm < other.distance_mm)
    }
}

/// Bucketed nearest-angle lookup over one cycle's profile.
#[derive(Debug, Clone)]
pub struct AngularIndex {
    width_deg: f32,
    radius: i32,
    buckets: HashMap<i32, Vec<(i32, f32)>>,
    /// Lowest and highest occupied bucket.
    span: Option<(i32, i32)>,
}

impl AngularIndex {
    /// Index `profile` with buckets `width_deg` wide, searching `radius`
    /// buckets either side in [`nearest`][Self::nearest].
    pub fn build(profile: &Profile, width_deg: f32, radius: u32) -> Self {
        let width_deg = if width_deg.is_finite() && width_deg > 0.0 {
            width_deg
        } else {
            1.0
        };
        let mut buckets: HashMap<i32, Vec<(i32, f32)>> = HashMap::new();
        for (angle, distance) in profile.iter() {
            let bucket = Self::bucket_for(angle as f32, width_deg);
            buckets.entry(bucket).or_default().push((angle, distance));
        }
        let span = buckets
            .keys()
            .fold(None, |span: Option<(i32, i32)>, &b| match span {
                Some((lo, hi)) => Some((lo.min(b), hi.max(b))),
                None => Some((b, b)),
            });
        Self {
            width_deg,
            radius: radius.min(i32::MAX as u32) as i32,
            buckets,
            span,
        }
    }

    /// Index `profile` with a search radius wide enough that every point within
    /// `tolerance_deg` of a query is considered by [`nearest`][Self::nearest].
    pub fn for_tolerance(profile: &Profile, width_deg: f32, tolerance_deg: f32) -> Self {
        let mut index = Self::build(profile, width_deg, 1);
        index.radius = Self::radius_for(tolerance_deg, index.width_deg);
        index
    }

    /// Bucket radius covering `tolerance_deg` at the given width (at least 1).
    pub fn radius_for(tolerance_deg: f32, width_deg: f32) -> i32 {
        if !tolerance_deg.is_finite() || tolerance_deg <= 0.0 {
            return 1;
        }
        ((tolerance_deg / width_deg).ceil() as i32).saturating_add(1).max(1)
    }

    pub fn width_deg(&self) -> f32 {
        self.width_deg
    }

    pub fn radius(&self) -> i32 {
        self.radius
    }

    /// Total number of indexed profile points.
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Best point in the query's own bucket.
    pub fn exact(&self, angle_deg: f32) -> Option<IndexHit> {
        if !angle_deg.is_finite() {
            return None;
        }
        let bucket = Self::bucket_for(angle_deg, self.width_deg);
        Self::best_in(angle_deg, self.buckets.get(&bucket).into_iter().flatten(), None)
    }

    /// Best point within `radius` buckets of the query.
    pub fn nearest(&self, angle_deg: f32) -> Option<IndexHit> {
        if !angle_deg.is_finite() {
            return None;
        }
        self.search_range(angle_deg)
            .filter_map(|b| self.buckets.get(&b))
            .fold(None, |best, points| Self::best_in(angle_deg, points.iter(), best))
    }

    /// Buckets [`nearest`][Self::nearest] visits: `radius` either side of the
    /// query, clipped to the occupied span. Empty when nothing overlaps.
    fn search_range(&self, angle_deg: f32) -> RangeInclusive<i32> {
        let Some((first, last)) = self.span else {
            return RangeInclusive::new(1, 0);
        };
        let center = Self::bucket_for(angle_deg, self.width_deg);
        let lo = center.saturating_sub(self.radius).max(first);
        let hi = center.saturating_add(self.radius).min(last);
        lo..=hi
    }

    /// Angular distance from `angle_deg` to the nearer edge of its own bucket.
    ///
    /// Any point outside the query's bucket is at least this far away, so an
    /// [`exact`][Self::exact] hit strictly closer than the margin is the
    /// global optimum.
    pub fn margin(&self, angle_deg: f32) -> f32 {
        let bucket = Self::bucket_for(angle_deg, self.width_deg) as f32;
        let lo = (bucket - 0.5) * self.width_deg;
        let hi = (bucket + 0.5) * self.width_deg;
        (angle_deg - lo).min(hi - angle_deg).max(0.0)
    }

    fn bucket_for(angle_deg: f32, width_deg: f32) -> i32 {
        (angle_deg / width_deg).round() as i32
    }

    fn best_in<'a>(
        query_deg: f32,
        points: impl Iterator<Item = &'a (i32, f32)>,
        seed: Option<IndexHit>,
    ) -> Option<IndexHit> {
        points.fold(seed, |best, &(angle, distance)| {
            let hit = IndexHit::new(query_deg, angle, distance);
            match best {
                Some(b) if !hit.beats(&b) => Some(b),
                _ => Some(hit),
            }
        })
    }
}
