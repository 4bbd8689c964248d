use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on the number of samples a single scan may carry.
pub const MAX_SCAN_SAMPLES: usize = 8192;

/// Fixed-point scale of [`PolarSample::angle_q14`]: `2^14` units per 360°.
const ANGLE_Q14_SCALE: f32 = (1u32 << 14) as f32;

/// Fixed-point scale of [`PolarSample::distance_q2`]: 4 units per millimetre.
const DISTANCE_Q2_SCALE: f32 = 4.0;

/// One raw rangefinder reading, in device fixed-point units.
///
/// The device measures angles clockwise from the front of the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolarSample {
    /// Angle in q14 fixed point (`raw * 360 / 2^14` degrees).
    pub angle_q14: u16,
    /// Distance in q2 fixed point (`raw / 4` millimetres). Zero means "no return".
    pub distance_q2: u32,
}

impl PolarSample {
    /// Encode a clockwise device angle (degrees) and a distance (mm).
    ///
    /// Used by simulated drivers and tests; real drivers hand over the raw
    /// words unchanged.
    pub fn from_device(angle_cw_deg: f32, distance_mm: f32) -> Self {
        let wrapped = angle_cw_deg.rem_euclid(360.0);
        let q14 = (wrapped * ANGLE_Q14_SCALE / 360.0).round() as u32 % (1 << 14);
        Self {
            angle_q14: q14 as u16,
            distance_q2: (distance_mm.max(0.0) * DISTANCE_Q2_SCALE).round() as u32,
        }
    }

    /// Device angle in degrees, clockwise from front, in `[0, 360)`.
    pub fn angle_deg(&self) -> f32 {
        f32::from(self.angle_q14) * 360.0 / ANGLE_Q14_SCALE
    }

    /// Distance in millimetres.
    pub fn distance_mm(&self) -> f32 {
        self.distance_q2 as f32 / DISTANCE_Q2_SCALE
    }
}

/// Health status reported by a rangefinder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceHealth {
    Ok,
    /// Degraded; carries the vendor error code.
    Warning(u16),
    /// Faulted; carries the vendor error code.
    Error(u16),
}

impl std::fmt::Display for DeviceHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceHealth::Ok => write!(f, "OK"),
            DeviceHealth::Warning(code) => write!(f, "WARNING (code {code})"),
            DeviceHealth::Error(code) => write!(f, "ERROR (code {code})"),
        }
    }
}

/// A labelled 2-D camera detection with a horizontal angle estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f32,
    /// Horizontal angle, counter-clockwise positive, 0° = forward.
    pub angle_deg: f32,
    /// Bounding-box area in px².
    pub area: f32,
}

/// Identity of a tracked object: label plus the detection angle truncated
/// to whole degrees.
///
/// Two detections with the same label inside the same whole degree share a
/// slot; anything else gets a fresh one.
pub fn object_id(label: &str, angle_deg: f32) -> String {
    format!("{label}_{}", angle_deg.trunc() as i32)
}

/// A fused detection held by the object cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub id: String,
    pub label: String,
    pub confidence: f32,
    /// Camera angle of the detection (degrees).
    pub angle_deg: f32,
    /// Range attached by correlation (mm).
    pub distance_mm: f32,
    pub area: f32,
    /// Wall-clock time of the last successful correlation (ms since epoch).
    pub last_update_ms: u64,
}

/// One entry of an objects-out message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectReport {
    pub label: String,
    pub confidence: f32,
    pub angle_deg: f32,
    pub distance_mm: f32,
    pub area: f32,
    /// Last update of this object (ms since epoch).
    pub timestamp: u64,
}

impl From<&TrackedObject> for ObjectReport {
    fn from(obj: &TrackedObject) -> Self {
        Self {
            label: obj.label.clone(),
            confidence: obj.confidence,
            angle_deg: obj.angle_deg,
            distance_mm: obj.distance_mm,
            area: obj.area,
            timestamp: obj.last_update_ms,
        }
    }
}

/// Objects-out message: a full snapshot of the object cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectsMessage {
    /// Always `"OBJECTS"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Publish time (ms since epoch).
    pub timestamp: u64,
    /// `true` when the heartbeat timer triggered this publish rather than a
    /// fresh correlation.
    pub forced: bool,
    pub objects: Vec<ObjectReport>,
}

impl ObjectsMessage {
    pub const KIND: &'static str = "OBJECTS";

    pub fn new(timestamp: u64, forced: bool, objects: Vec<ObjectReport>) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            timestamp,
            forced,
            objects,
        }
    }
}

/// Workspace error type spanning device faults, transport failures and
/// configuration problems.
#[derive(Error, Debug)]
pub enum FuseError {
    #[error("Device init failed on {component}: {details}")]
    DeviceInit { component: String, details: String },

    #[error("Device reported unhealthy status: {0}")]
    DeviceUnhealthy(DeviceHealth),

    #[error("Scan acquisition failed: {0}")]
    Acquisition(String),

    #[error("Giving up after {failures} consecutive acquisition failures")]
    AcquisitionExhausted { failures: usize },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
