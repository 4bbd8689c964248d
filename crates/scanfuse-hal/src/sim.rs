//! In-process simulated rangefinder for CI/CD testing without hardware.
//!
//! [`SimRangefinder`] runs in one of two modes, or both:
//!
//! - **Scripted** – a queue of scans and injected failures is replayed in
//!   order, one entry per [`grab_scan`][Rangefinder::grab_scan] call.
//! - **Synthetic room** – once the script is exhausted, a full 360° scan is
//!   rendered from a list of [`Obstacle`]s.
//!
//! With neither a room nor remaining script entries the last scripted scan
//! is repeated.
//!
//! # Example
//!
//! ```rust
//! use scanfuse_hal::sim::{Obstacle, SimRangefinder};
//! use scanfuse_hal::Rangefinder;
//!
//! let mut lidar = SimRangefinder::new("sim_lidar")
//!     .with_room(vec![Obstacle::new(0.0, 1000.0)])
//!     .build();
//!
//! lidar.connect().expect("sim connect must succeed");
//! lidar.start_scan().expect("sim start must succeed");
//! let scan = lidar.grab_scan().expect("sim scan must succeed");
//! assert!(!scan.is_empty());
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use scanfuse_types::{DeviceHealth, FuseError, MAX_SCAN_SAMPLES, PolarSample};

use crate::rangefinder::Rangefinder;

/// Angular step of a rendered synthetic-room scan (degrees).
const ROOM_STEP_DEG: f32 = 0.5;

// ────────────────────────────────────────────────────────────────────────────
// Obstacles
// ────────────────────────────────────────────────────────────────────────────

/// A reflector in the synthetic room.
///
/// Angles use the forward convention: counter-clockwise positive, 0° straight
/// ahead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub angle_deg: f32,
    pub distance_mm: f32,
    /// Angular extent centred on `angle_deg`.
    pub width_deg: f32,
}

impl Obstacle {
    /// A 3°-wide obstacle at the given bearing and range.
    pub fn new(angle_deg: f32, distance_mm: f32) -> Self {
        Self {
            angle_deg,
            distance_mm,
            width_deg: 3.0,
        }
    }

    pub fn with_width(mut self, width_deg: f32) -> Self {
        self.width_deg = width_deg.max(0.0);
        self
    }

    fn covers(&self, angle_deg: f32) -> bool {
        let mut diff = (angle_deg - self.angle_deg).rem_euclid(360.0);
        if diff > 180.0 {
            diff = 360.0 - diff;
        }
        diff <= self.width_deg / 2.0
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Call counters
// ────────────────────────────────────────────────────────────────────────────

/// Shared call counters so tests can observe the driver after handing it
/// to a session.
#[derive(Debug, Clone, Default)]
pub struct SimCounters {
    connects: Arc<AtomicUsize>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    grabs: Arc<AtomicUsize>,
}

impl SimCounters {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn grabs(&self) -> usize {
        self.grabs.load(Ordering::SeqCst)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRangefinder
// ────────────────────────────────────────────────────────────────────────────

enum ScanStep {
    Scan(Vec<PolarSample>),
    Fail(String),
}

/// Builder for a [`SimRangefinder`].
pub struct SimRangefinderBuilder {
    inner: SimRangefinder,
}

impl SimRangefinderBuilder {
    /// Report `health` from [`Rangefinder::health`].
    pub fn with_health(mut self, health: DeviceHealth) -> Self {
        self.inner.health = health;
        self
    }

    /// Make [`Rangefinder::connect`] fail.
    pub fn failing_connect(mut self) -> Self {
        self.inner.fail_connect = true;
        self
    }

    /// Queue a scan built from `(clockwise device angle °, distance mm)`
    /// pairs.
    pub fn with_scan(mut self, points: &[(f32, f32)]) -> Self {
        let samples = points
            .iter()
            .map(|&(angle, dist)| PolarSample::from_device(angle, dist))
            .collect();
        self.inner.script.push_back(ScanStep::Scan(samples));
        self
    }

    /// Queue a scan of raw samples.
    pub fn with_raw_scan(mut self, samples: Vec<PolarSample>) -> Self {
        self.inner.script.push_back(ScanStep::Scan(samples));
        self
    }

    /// Queue a transient acquisition failure.
    pub fn with_failure(mut self) -> Self {
        self.inner
            .script
            .push_back(ScanStep::Fail("simulated read timeout".to_string()));
        self
    }

    /// Queue `n` consecutive transient failures.
    pub fn with_failures(mut self, n: usize) -> Self {
        for _ in 0..n {
            self = self.with_failure();
        }
        self
    }

    /// Render scans from `obstacles` once the script is exhausted.
    pub fn with_room(mut self, obstacles: Vec<Obstacle>) -> Self {
        self.inner.room = Some(obstacles);
        self
    }

    /// Block each [`grab_scan`][Rangefinder::grab_scan] for `period`, like a
    /// motor spinning at `1 / period` revolutions per second.
    pub fn with_scan_period(mut self, period: Duration) -> Self {
        self.inner.scan_period = period;
        self
    }

    pub fn build(self) -> SimRangefinder {
        self.inner
    }
}

/// A simulated rangefinder.  Construct with [`SimRangefinder::new`].
pub struct SimRangefinder {
    id: String,
    health: DeviceHealth,
    fail_connect: bool,
    connected: bool,
    scanning: bool,
    script: VecDeque<ScanStep>,
    room: Option<Vec<Obstacle>>,
    last_scan: Vec<PolarSample>,
    scan_period: Duration,
    counters: SimCounters,
}

impl SimRangefinder {
    /// Start building a healthy simulated device with the given identifier.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(id: impl Into<String>) -> SimRangefinderBuilder {
        SimRangefinderBuilder {
            inner: Self {
                id: id.into(),
                health: DeviceHealth::Ok,
                fail_connect: false,
                connected: false,
                scanning: false,
                script: VecDeque::new(),
                room: None,
                last_scan: Vec::new(),
                scan_period: Duration::ZERO,
                counters: SimCounters::default(),
            },
        }
    }

    /// Handle to this device's call counters.
    pub fn counters(&self) -> SimCounters {
        self.counters.clone()
    }

    /// Render one full revolution of the synthetic room.
    ///
    /// Directions without an obstacle report distance 0 ("no return").
    fn render_room(obstacles: &[Obstacle]) -> Vec<PolarSample> {
        let steps = (360.0 / ROOM_STEP_DEG) as usize;
        (0..steps.min(MAX_SCAN_SAMPLES))
            .map(|i| {
                let device_deg = i as f32 * ROOM_STEP_DEG;
                // Device angles are clockwise; obstacles are counter-clockwise.
                let forward_deg = -device_deg;
                let distance = obstacles
                    .iter()
                    .filter(|o| o.covers(forward_deg))
                    .map(|o| o.distance_mm)
                    .fold(0.0_f32, |best, d| if best == 0.0 { d } else { best.min(d) });
                PolarSample::from_device(device_deg, distance)
            })
            .collect()
    }
}

impl Rangefinder for SimRangefinder {
    fn id(&self) -> &str {
        &self.id
    }

    fn connect(&mut self) -> Result<(), FuseError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(FuseError::DeviceInit {
                component: self.id.clone(),
                details: "simulated connect failure".to_string(),
            });
        }
        self.connected = true;
        Ok(())
    }

    fn health(&mut self) -> Result<DeviceHealth, FuseError> {
        if !self.connected {
            return Err(FuseError::DeviceInit {
                component: self.id.clone(),
                details: "health queried before connect".to_string(),
            });
        }
        Ok(self.health)
    }

    fn start_scan(&mut self) -> Result<(), FuseError> {
        if !self.connected {
            return Err(FuseError::DeviceInit {
                component: self.id.clone(),
                details: "start_scan before connect".to_string(),
            });
        }
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        self.scanning = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        self.scanning = false;
    }

    fn grab_scan(&mut self) -> Result<Vec<PolarSample>, FuseError> {
        self.counters.grabs.fetch_add(1, Ordering::SeqCst);
        if !self.scanning {
            return Err(FuseError::Acquisition(format!(
                "{} is not scanning",
                self.id
            )));
        }
        if !self.scan_period.is_zero() {
            std::thread::sleep(self.scan_period);
        }
        match self.script.pop_front() {
            Some(ScanStep::Scan(samples)) => {
                self.last_scan = samples.clone();
                Ok(samples)
            }
            Some(ScanStep::Fail(reason)) => Err(FuseError::Acquisition(reason)),
            None => match &self.room {
                Some(obstacles) => Ok(Self::render_room(obstacles)),
                None => Ok(self.last_scan.clone()),
            },
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn started(builder: SimRangefinderBuilder) -> SimRangefinder {
        let mut dev = builder.build();
        dev.connect().unwrap();
        dev.start_scan().unwrap();
        dev
    }

    #[test]
    fn scripted_scans_replay_in_order() {
        let mut dev = started(
            SimRangefinder::new("sim")
                .with_scan(&[(0.0, 1000.0)])
                .with_failure()
                .with_scan(&[(10.0, 500.0), (20.0, 600.0)]),
        );

        assert_eq!(dev.grab_scan().unwrap().len(), 1);
        assert!(matches!(dev.grab_scan(), Err(FuseError::Acquisition(_))));
        assert_eq!(dev.grab_scan().unwrap().len(), 2);
        // Script exhausted: last scan repeats.
        assert_eq!(dev.grab_scan().unwrap().len(), 2);
    }

    #[test]
    fn grab_without_start_fails() {
        let mut dev = SimRangefinder::new("sim").with_scan(&[(0.0, 1.0)]).build();
        dev.connect().unwrap();
        assert!(dev.grab_scan().is_err());
    }

    #[test]
    fn failing_connect_reports_device_init() {
        let mut dev = SimRangefinder::new("sim").failing_connect().build();
        assert!(matches!(dev.connect(), Err(FuseError::DeviceInit { .. })));
        assert_eq!(dev.counters().connects(), 1);
    }

    #[test]
    fn configured_health_is_reported() {
        let mut dev = SimRangefinder::new("sim")
            .with_health(DeviceHealth::Warning(7))
            .build();
        dev.connect().unwrap();
        assert_eq!(dev.health().unwrap(), DeviceHealth::Warning(7));
    }

    #[test]
    fn room_renders_obstacle_in_front() {
        let mut dev = started(
            SimRangefinder::new("sim").with_room(vec![Obstacle::new(0.0, 1200.0)]),
        );
        let scan = dev.grab_scan().unwrap();
        assert_eq!(scan.len(), 720);

        let front = scan
            .iter()
            .find(|s| s.angle_q14 == 0)
            .expect("scan must contain the 0° sample");
        assert!((front.distance_mm() - 1200.0).abs() < 0.5);

        let behind = scan
            .iter()
            .find(|s| (s.angle_deg() - 180.0).abs() < 0.01)
            .expect("scan must contain the 180° sample");
        assert_eq!(behind.distance_q2, 0);
    }

    #[test]
    fn room_uses_counter_clockwise_bearings() {
        // Obstacle 45° to the left is 315° in the clockwise device frame.
        let mut dev = started(
            SimRangefinder::new("sim").with_room(vec![Obstacle::new(45.0, 800.0).with_width(1.0)]),
        );
        let scan = dev.grab_scan().unwrap();
        let hits: Vec<f32> = scan
            .iter()
            .filter(|s| s.distance_q2 > 0)
            .map(|s| s.angle_deg())
            .collect();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|a| (a - 315.0).abs() < 0.6));
    }

    #[test]
    fn overlapping_obstacles_report_the_nearest() {
        let mut dev = started(SimRangefinder::new("sim").with_room(vec![
            Obstacle::new(0.0, 2000.0).with_width(10.0),
            Obstacle::new(0.0, 700.0),
        ]));
        let scan = dev.grab_scan().unwrap();
        let front = scan.iter().find(|s| s.angle_q14 == 0).unwrap();
        assert!((front.distance_mm() - 700.0).abs() < 0.5);
    }

    #[test]
    fn counters_track_lifecycle_calls() {
        let mut dev = started(SimRangefinder::new("sim").with_scan(&[(0.0, 1.0)]));
        let counters = dev.counters();
        dev.grab_scan().unwrap();
        dev.stop();
        dev.stop();
        assert_eq!(counters.connects(), 1);
        assert_eq!(counters.starts(), 1);
        assert_eq!(counters.stops(), 2);
        assert_eq!(counters.grabs(), 1);
    }

    #[test]
    fn scan_period_paces_grabs() {
        let mut dev = started(
            SimRangefinder::new("sim")
                .with_scan(&[(0.0, 1.0)])
                .with_scan_period(Duration::from_millis(20)),
        );
        let start = std::time::Instant::now();
        dev.grab_scan().unwrap();
        dev.grab_scan().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
