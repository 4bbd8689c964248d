//! `scanfuse-perception` – range reduction and detection correlation.
//!
//! Turns a raw 360° scan into a compact picture of what is in front of the
//! sensor, and attaches ranges to camera detections.
//!
//! # Modules
//!
//! - [`sampler`] – [`RangeSampler`][sampler::RangeSampler]: normalises,
//!   filters and downsamples one scan into a forward-hemisphere
//!   [`Profile`][sampler::Profile] (closest return per angle bucket).
//! - [`angular_index`] – [`AngularIndex`][angular_index::AngularIndex]:
//!   bucketed nearest-angle lookup over a profile.
//! - [`correlator`] – [`Correlator`][correlator::Correlator]: matches a
//!   [`Detection`][scanfuse_types::Detection] against the index within an
//!   angular tolerance.

pub mod angular_index;
pub mod correlator;
pub mod sampler;

pub use angular_index::{AngularIndex, IndexHit};
pub use correlator::{Correlation, Correlator, MatchPath};
pub use sampler::{Profile, RangeSampler, SamplerConfig, normalize_angle, quantize};
