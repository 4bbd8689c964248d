//! [`AcquisitionLoop`] – the scan → profile → correlate → publish driver.
//!
//! One thread owns the whole pipeline. Each cycle:
//!
//! 1. **Acquire** – grab one revolution from the [`DeviceSession`].
//! 2. **Reduce** – [`RangeSampler`] turns it into a forward profile, and an
//!    [`AngularIndex`][scanfuse_perception::AngularIndex] is built over it.
//! 3. **Publish profile** – if profile publishing is enabled.
//! 4. **Correlate** – the newest detections batch is matched against this
//!    cycle's profile; matches are upserted into the [`ObjectCache`].
//! 5. **Age** – expired objects are evicted.
//! 6. **Publish objects** – if anything was refreshed, or the heartbeat is
//!    due.
//!
//! A failed acquire skips the rest of the cycle and runs the recovery
//! sequence (stop, wait, restart); the loop stays [`LoopState::Recovering`]
//! until the next successful acquire. After `max_consecutive_failures`
//! failures in a row the loop gives up with
//! [`FuseError::AcquisitionExhausted`].
//!
//! # Control
//!
//! [`LoopControl`] carries the two flags other threads may touch: the run
//! flag and the profile-publishing flag. Both are read once at the top of
//! each cycle, before the device read; a change made while a read is in
//! flight takes effect on the next cycle.
//!
//! # Time
//!
//! Object ageing and the objects heartbeat run on the clock's monotonic
//! timeline. Wall-clock time only stamps outgoing messages.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use scanfuse_hal::{DeviceSession, Rangefinder};
use scanfuse_middleware::Transport;
use scanfuse_perception::{Correlator, RangeSampler, SamplerConfig};
use scanfuse_types::{FuseError, PolarSample};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::failure_guard::{FailureGuard, Verdict};
use crate::object_cache::ObjectCache;
use crate::publisher::{GatewayConfig, PublishOutcome, PublisherGateway};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`AcquisitionLoop`].
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub sampler: SamplerConfig,
    /// Largest accepted gap between a detection angle and its profile match.
    pub max_angle_diff_deg: f32,
    pub max_object_age_ms: u64,
    /// Longest gap between objects publish attempts.
    pub force_publish_ms: u64,
    /// Consecutive acquire failures that end the run.
    pub max_consecutive_failures: usize,
    /// Pause between stopping and restarting the device during recovery.
    pub recovery_delay: Duration,
    pub detection_poll: Duration,
    /// Log a status line every this many cycles (0 disables).
    pub status_every_cycles: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::default(),
            max_angle_diff_deg: 10.0,
            max_object_age_ms: 500,
            force_publish_ms: 1_000,
            max_consecutive_failures: 3,
            recovery_delay: Duration::from_millis(500),
            detection_poll: Duration::from_millis(1),
            status_every_cycles: 30,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared control flags
// ─────────────────────────────────────────────────────────────────────────────

/// Flags shared with signal handlers. Clones share the same flags.
#[derive(Debug, Clone)]
pub struct LoopControl {
    running: Arc<AtomicBool>,
    publish_profile: Arc<AtomicBool>,
}

impl LoopControl {
    pub fn new(publish_profile: bool) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            publish_profile: Arc::new(AtomicBool::new(publish_profile)),
        }
    }

    /// Ask the loop to finish its current cycle and shut down.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flip profile publishing. Returns the new state.
    pub fn toggle_profile(&self) -> bool {
        !self.publish_profile.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn profile_enabled(&self) -> bool {
        self.publish_profile.load(Ordering::SeqCst)
    }
}

impl Default for LoopControl {
    fn default() -> Self {
        Self::new(true)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle phase of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Scanning,
    /// Restarted after a failed acquire; back to scanning on the next good
    /// one.
    Recovering,
    ShuttingDown,
}

/// What one successful cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Wall-clock time of the cycle.
    pub now_ms: u64,
    pub profile_points: usize,
    pub profile: PublishOutcome,
    pub detections: usize,
    pub matched: usize,
    pub evicted: usize,
    /// `None` when no objects publish was attempted this cycle.
    pub objects: Option<PublishOutcome>,
}

/// Outcome of [`AcquisitionLoop::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Cycle(CycleReport),
    /// The acquire failed and the device was restarted.
    Recovered { consecutive_failures: usize },
}

/// Running totals over the loop's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub profile_messages: u64,
    pub objects_messages: u64,
    pub matched: u64,
    pub unmatched: u64,
    pub recoveries: u64,
    pub evicted: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// AcquisitionLoop
// ─────────────────────────────────────────────────────────────────────────────

/// The pipeline driver.
///
/// Fields are dropped in declaration order, so the device session is
/// released before the gateway closes the transport.
pub struct AcquisitionLoop {
    session: DeviceSession,
    gateway: PublisherGateway,
    sampler: RangeSampler,
    correlator: Correlator,
    cache: ObjectCache,
    guard: FailureGuard,
    clock: Box<dyn Clock>,
    control: LoopControl,
    config: LoopConfig,
    state: LoopState,
    stats: LoopStats,
    profile_was_enabled: bool,
}

impl AcquisitionLoop {
    /// Bring the device up and wire the pipeline.
    ///
    /// # Errors
    ///
    /// Any device connect, health or start failure (see
    /// [`DeviceSession::open`]). The transport is closed before returning.
    pub fn init(
        device: Box<dyn Rangefinder>,
        transport: Box<dyn Transport>,
        clock: Box<dyn Clock>,
        control: LoopControl,
        config: LoopConfig,
    ) -> Result<Self, FuseError> {
        let gateway = PublisherGateway::new(
            transport,
            GatewayConfig {
                force_publish_ms: config.force_publish_ms,
                detection_poll: config.detection_poll,
            },
            clock.monotonic_ms(),
        );
        let session = DeviceSession::open(device)?;
        let correlator = Correlator::new(config.max_angle_diff_deg);

        info!(
            device = session.id(),
            resolution_deg = config.sampler.resolution_deg,
            max_angle_diff_deg = correlator.max_angle_diff_deg(),
            max_object_age_ms = config.max_object_age_ms,
            "acquisition loop ready"
        );

        Ok(Self {
            session,
            gateway,
            sampler: RangeSampler::new(config.sampler),
            correlator,
            cache: ObjectCache::new(config.max_object_age_ms),
            guard: FailureGuard::new(config.max_consecutive_failures),
            clock,
            profile_was_enabled: control.profile_enabled(),
            control,
            config,
            state: LoopState::Scanning,
            stats: LoopStats::default(),
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    pub fn control(&self) -> &LoopControl {
        &self.control
    }

    /// Run cycles until stopped or until the retry budget is spent, then
    /// shut down.
    ///
    /// # Errors
    ///
    /// [`FuseError::AcquisitionExhausted`] when the device fails
    /// `max_consecutive_failures` times in a row. Resources are released
    /// either way.
    pub fn run(&mut self) -> Result<LoopStats, FuseError> {
        let result = loop {
            if !self.control.is_running() {
                info!("stop requested");
                break Ok(());
            }
            if let Err(e) = self.step() {
                break Err(e);
            }
        };
        self.shutdown();
        result.map(|()| self.stats.clone())
    }

    /// Run one cycle (or one recovery).
    pub fn step(&mut self) -> Result<Step, FuseError> {
        let profile_enabled = self.control.profile_enabled();
        match self.session.grab() {
            Ok(scan) => {
                self.guard.record_success();
                if self.state == LoopState::Recovering {
                    info!("acquisition recovered");
                    self.state = LoopState::Scanning;
                }
                Ok(Step::Cycle(self.process(&scan, profile_enabled)))
            }
            Err(e) => self.handle_acquire_failure(e),
        }
    }

    /// Release the device, then the transport. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.state == LoopState::ShuttingDown {
            return;
        }
        self.state = LoopState::ShuttingDown;
        self.session.release();
        self.gateway.close();
        info!(
            cycles = self.stats.cycles,
            profile_messages = self.stats.profile_messages,
            objects_messages = self.stats.objects_messages,
            recoveries = self.stats.recoveries,
            "acquisition loop shut down"
        );
    }

    fn handle_acquire_failure(&mut self, error: FuseError) -> Result<Step, FuseError> {
        match self.guard.record_failure() {
            Verdict::GiveUp => {
                let failures = self.guard.consecutive();
                error!(%error, failures, "acquisition failed repeatedly, giving up");
                Err(FuseError::AcquisitionExhausted { failures })
            }
            Verdict::Retry => {
                let failures = self.guard.consecutive();
                warn!(
                    %error,
                    failures,
                    threshold = self.guard.threshold(),
                    "acquisition failed, restarting scan"
                );
                self.state = LoopState::Recovering;
                if let Err(e) = self.session.recover(self.config.recovery_delay) {
                    // The next grab will fail too and count against the budget.
                    warn!(error = %e, "scan restart failed");
                }
                self.stats.recoveries += 1;
                Ok(Step::Recovered {
                    consecutive_failures: failures,
                })
            }
        }
    }

    fn process(&mut self, scan: &[PolarSample], profile_enabled: bool) -> CycleReport {
        let now = self.clock.stamp();

        let profile = self.sampler.reduce(scan);
        let index = self
            .correlator
            .index(&profile, self.sampler.config().resolution_deg);

        if profile_enabled != self.profile_was_enabled {
            info!(enabled = profile_enabled, "profile publishing toggled");
            self.profile_was_enabled = profile_enabled;
        }
        let profile_outcome = self.gateway.publish_profile(&profile, profile_enabled);

        let detections = self.gateway.poll_detections();
        let mut matched = 0;
        for correlation in self.correlator.correlate_all(&index, &detections) {
            debug!(
                label = %correlation.detection.label,
                camera_deg = correlation.detection.angle_deg,
                matched_deg = correlation.matched_angle_deg,
                error_deg = correlation.error_deg,
                distance_mm = correlation.distance_mm,
                via = ?correlation.via,
                "detection matched"
            );
            self.cache
                .upsert(correlation.into_tracked(now.wall_ms), now.monotonic_ms);
            matched += 1;
        }

        let evicted = self.cache.evict_expired(now.monotonic_ms);

        let objects = if matched > 0 || self.gateway.objects_due(now.monotonic_ms) {
            let forced = matched == 0;
            Some(
                self.gateway
                    .publish_objects(&self.cache.snapshot(), now, forced),
            )
        } else {
            None
        };

        let report = CycleReport {
            now_ms: now.wall_ms,
            profile_points: profile.len(),
            profile: profile_outcome,
            detections: detections.len(),
            matched,
            evicted,
            objects,
        };
        self.record(&report);
        report
    }

    fn record(&mut self, report: &CycleReport) {
        let stats = &mut self.stats;
        stats.cycles += 1;
        if report.profile == PublishOutcome::Sent {
            stats.profile_messages += 1;
        }
        if report.objects == Some(PublishOutcome::Sent) {
            stats.objects_messages += 1;
        }
        stats.matched += report.matched as u64;
        stats.unmatched += (report.detections - report.matched) as u64;
        stats.evicted += report.evicted as u64;

        let every = self.config.status_every_cycles;
        if every > 0 && stats.cycles % every == 0 {
            info!(
                cycles = stats.cycles,
                profile_points = report.profile_points,
                profile_enabled = self.profile_was_enabled,
                objects = self.cache.len(),
                profile_messages = stats.profile_messages,
                objects_messages = stats.objects_messages,
                matched = stats.matched,
                unmatched = stats.unmatched,
                recoveries = stats.recoveries,
                send_failures = self.gateway.send_failures(),
                "status"
            );
        }
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use scanfuse_hal::SimRangefinder;
    use scanfuse_middleware::Channel;
    use serde_json::Value;
    use std::sync::Mutex;

    /// Transport double shared between the loop and the test body.
    #[derive(Clone, Default)]
    struct MockTransport {
        sent: Arc<Mutex<Vec<(Channel, String)>>>,
        inbound: Arc<Mutex<Option<String>>>,
        fail_sends: bool,
        closed: Arc<AtomicBool>,
    }

    impl MockTransport {
        fn push_detections(&self, json: &str) {
            *self.inbound.lock().unwrap() = Some(json.to_string());
        }

        fn sent_on(&self, channel: Channel) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(c, _)| *c == channel)
                .map(|(_, p)| p.clone())
                .collect()
        }
    }

    impl Transport for MockTransport {
        fn publish(&mut self, channel: Channel, payload: &str) -> Result<(), FuseError> {
            if self.fail_sends {
                return Err(FuseError::Transport("send queue full".to_string()));
            }
            self.sent.lock().unwrap().push((channel, payload.to_string()));
            Ok(())
        }

        fn poll(&mut self, _channel: Channel, _timeout: Duration) -> Result<Option<String>, FuseError> {
            Ok(self.inbound.lock().unwrap().take())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn config() -> LoopConfig {
        LoopConfig {
            recovery_delay: Duration::ZERO,
            detection_poll: Duration::ZERO,
            status_every_cycles: 0,
            ..LoopConfig::default()
        }
    }

    fn build(
        device: SimRangefinder,
        transport: &MockTransport,
        clock: &ManualClock,
    ) -> AcquisitionLoop {
        AcquisitionLoop::init(
            Box::new(device),
            Box::new(transport.clone()),
            Box::new(clock.clone()),
            LoopControl::default(),
            config(),
        )
        .unwrap()
    }

    #[test]
    fn end_to_end_detection_gets_range() {
        let transport = MockTransport::default();
        let clock = ManualClock::new(1_000);
        let device = SimRangefinder::new("sim").with_scan(&[(0.0, 1000.0)]).build();
        let mut lp = build(device, &transport, &clock);

        transport.push_detections(
            r#"{"detections":[{"angle_deg":1.0,"label":"x","confidence":0.9,"area":50}]}"#,
        );
        let Step::Cycle(report) = lp.step().unwrap() else {
            panic!("expected a cycle");
        };
        assert_eq!(report.matched, 1);
        assert_eq!(report.objects, Some(PublishOutcome::Sent));

        assert_eq!(transport.sent_on(Channel::Profile), vec!["LIDAR_DATA 0,1000;"]);

        let objects = transport.sent_on(Channel::Objects);
        assert_eq!(objects.len(), 1);
        let v: Value = serde_json::from_str(&objects[0]).unwrap();
        assert_eq!(v["type"], "OBJECTS");
        assert_eq!(v["forced"], false);
        let entries = v["objects"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["label"], "x");
        assert_eq!(entries[0]["distance_mm"], 1000.0);
        assert_eq!(entries[0]["angle_deg"], 1.0);
    }

    #[test]
    fn unmatched_detection_is_dropped_quietly() {
        let transport = MockTransport::default();
        let clock = ManualClock::new(1_000);
        let device = SimRangefinder::new("sim").with_scan(&[(0.0, 1000.0)]).build();
        let mut lp = build(device, &transport, &clock);

        transport.push_detections(r#"{"detections":[{"angle_deg":45.0,"label":"far"}]}"#);
        let Step::Cycle(report) = lp.step().unwrap() else {
            panic!("expected a cycle");
        };
        assert_eq!(report.detections, 1);
        assert_eq!(report.matched, 0);
        assert_eq!(report.objects, None);
        assert!(lp.cache().is_empty());
        assert_eq!(lp.stats().unmatched, 1);
    }

    fn objects_payloads(transport: &MockTransport) -> Vec<Value> {
        transport
            .sent_on(Channel::Objects)
            .iter()
            .map(|p| serde_json::from_str(p).unwrap())
            .collect()
    }

    #[test]
    fn heartbeat_attempts_with_empty_cache_send_nothing() {
        let transport = MockTransport::default();
        let clock = ManualClock::new(0);
        let device = SimRangefinder::new("sim").with_scan(&[(0.0, 1000.0)]).build();
        let mut lp = build(device, &transport, &clock);

        let mut attempts = 0;
        for _ in 0..20 {
            clock.advance(100);
            if let Step::Cycle(report) = lp.step().unwrap() {
                if let Some(outcome) = report.objects {
                    assert_eq!(outcome, PublishOutcome::Empty);
                    attempts += 1;
                }
            }
        }
        // 2000 ms with a 1000 ms heartbeat.
        assert_eq!(attempts, 2);
        assert!(transport.sent_on(Channel::Objects).is_empty(), "empty cache sends nothing");
    }

    #[test]
    fn heartbeat_republishes_live_objects_every_window() {
        let transport = MockTransport::default();
        let clock = ManualClock::new(50_000);
        let device = SimRangefinder::new("sim").with_scan(&[(0.0, 1000.0)]).build();
        let mut config = config();
        config.max_object_age_ms = 5_000;
        let mut lp = AcquisitionLoop::init(
            Box::new(device),
            Box::new(transport.clone()),
            Box::new(clock.clone()),
            LoopControl::default(),
            config,
        )
        .unwrap();

        transport.push_detections(r#"{"detections":[{"angle_deg":0.5,"label":"box"}]}"#);
        lp.step().unwrap();
        // Four heartbeat windows, no matches in between.
        for _ in 0..40 {
            clock.advance(100);
            let Step::Cycle(report) = lp.step().unwrap() else {
                panic!("expected a cycle");
            };
            assert_eq!(report.matched, 0);
        }

        let payloads = objects_payloads(&transport);
        assert_eq!(payloads.len(), 5);
        assert_eq!(payloads[0]["forced"], false);
        for (window, heartbeat) in payloads[1..].iter().enumerate() {
            assert_eq!(heartbeat["forced"], true);
            assert_eq!(heartbeat["timestamp"], 51_000 + 1_000 * window as u64);
            assert_eq!(heartbeat["objects"][0]["label"], "box");
            // The object keeps the time it was last correlated.
            assert_eq!(heartbeat["objects"][0]["timestamp"], 50_000);
        }
    }

    #[test]
    fn wall_clock_step_back_keeps_heartbeat_and_ageing() {
        let transport = MockTransport::default();
        let clock = ManualClock::new(1_000_000);
        let device = SimRangefinder::new("sim").with_scan(&[(0.0, 1000.0)]).build();
        let mut lp = build(device, &transport, &clock);

        transport.push_detections(r#"{"detections":[{"angle_deg":0.0,"label":"x"}]}"#);
        lp.step().unwrap();
        assert_eq!(lp.cache().len(), 1);

        clock.step_wall_to(940_000);
        let mut attempts = 0;
        for cycle in 1..=200 {
            clock.advance(50);
            let Step::Cycle(report) = lp.step().unwrap() else {
                panic!("expected a cycle");
            };
            if report.objects.is_some() {
                attempts += 1;
            }
            if cycle == 11 {
                // 550 ms of real time have passed despite the wall clock.
                assert!(lp.cache().is_empty());
            }
        }
        assert_eq!(attempts, 10);
    }

    #[test]
    fn objects_expire_between_cycles() {
        let transport = MockTransport::default();
        let clock = ManualClock::new(1_000);
        let device = SimRangefinder::new("sim").with_scan(&[(0.0, 1000.0)]).build();
        let mut lp = build(device, &transport, &clock);

        transport.push_detections(r#"{"detections":[{"angle_deg":0.0,"label":"x"}]}"#);
        lp.step().unwrap();
        assert_eq!(lp.cache().len(), 1);

        clock.advance(400);
        lp.step().unwrap();
        assert_eq!(lp.cache().len(), 1);

        clock.advance(200);
        let Step::Cycle(report) = lp.step().unwrap() else {
            panic!("expected a cycle");
        };
        assert_eq!(report.evicted, 1);
        assert!(lp.cache().is_empty());
    }

    #[test]
    fn three_consecutive_failures_are_fatal() {
        let transport = MockTransport::default();
        let clock = ManualClock::new(0);
        let device = SimRangefinder::new("sim").with_failures(3).build();
        let counters = device.counters();
        let mut lp = build(device, &transport, &clock);

        assert_eq!(lp.step().unwrap(), Step::Recovered { consecutive_failures: 1 });
        assert_eq!(lp.step().unwrap(), Step::Recovered { consecutive_failures: 2 });
        assert!(matches!(
            lp.step(),
            Err(FuseError::AcquisitionExhausted { failures: 3 })
        ));
        assert_eq!(counters.stops(), 2, "two recoveries ran");
    }

    #[test]
    fn recovering_until_next_good_scan() {
        let transport = MockTransport::default();
        let clock = ManualClock::new(0);
        let device = SimRangefinder::new("sim")
            .with_failure()
            .with_scan(&[(0.0, 1000.0)])
            .build();
        let mut lp = build(device, &transport, &clock);

        assert_eq!(lp.state(), LoopState::Scanning);
        assert_eq!(lp.step().unwrap(), Step::Recovered { consecutive_failures: 1 });
        assert_eq!(lp.state(), LoopState::Recovering);

        assert!(matches!(lp.step().unwrap(), Step::Cycle(_)));
        assert_eq!(lp.state(), LoopState::Scanning);
    }

    #[test]
    fn success_resets_failure_count() {
        let transport = MockTransport::default();
        let clock = ManualClock::new(0);
        let device = SimRangefinder::new("sim")
            .with_failures(2)
            .with_scan(&[(0.0, 1000.0)])
            .with_failures(2)
            .with_scan(&[(0.0, 1000.0)])
            .build();
        let mut lp = build(device, &transport, &clock);

        let steps: Vec<_> = (0..6).map(|_| lp.step()).collect();
        assert!(steps.iter().all(Result::is_ok));
        assert_eq!(lp.stats().recoveries, 4);
        assert_eq!(lp.stats().cycles, 2);
    }

    #[test]
    fn run_returns_error_after_exhaustion_and_releases_everything() {
        let transport = MockTransport::default();
        let clock = ManualClock::new(0);
        let device = SimRangefinder::new("sim").with_failures(5).build();
        let counters = device.counters();
        let mut lp = build(device, &transport, &clock);

        assert!(matches!(
            lp.run(),
            Err(FuseError::AcquisitionExhausted { .. })
        ));
        assert_eq!(lp.state(), LoopState::ShuttingDown);
        // Two recoveries plus the final release.
        assert_eq!(counters.stops(), 3);
        assert!(transport.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_flag_ends_run_gracefully() {
        let transport = MockTransport::default();
        let clock = ManualClock::new(0);
        let device = SimRangefinder::new("sim").with_scan(&[(0.0, 1000.0)]).build();
        let counters = device.counters();
        let mut lp = build(device, &transport, &clock);

        lp.control().stop();
        let stats = lp.run().unwrap();
        assert_eq!(stats.cycles, 0);
        assert_eq!(counters.stops(), 1);
        assert!(transport.closed.load(Ordering::SeqCst));

        // Dropping after an explicit shutdown releases nothing twice.
        drop(lp);
        assert_eq!(counters.stops(), 1);
    }

    #[test]
    fn profile_toggle_is_honoured_next_cycle() {
        let transport = MockTransport::default();
        let clock = ManualClock::new(0);
        let device = SimRangefinder::new("sim").with_scan(&[(0.0, 1000.0)]).build();
        let mut lp = build(device, &transport, &clock);

        lp.step().unwrap();
        assert!(!lp.control().toggle_profile());
        let Step::Cycle(report) = lp.step().unwrap() else {
            panic!("expected a cycle");
        };
        assert_eq!(report.profile, PublishOutcome::Disabled);
        assert!(lp.control().toggle_profile());
        lp.step().unwrap();

        assert_eq!(transport.sent_on(Channel::Profile).len(), 2);
    }

    #[test]
    fn profile_toggle_from_another_thread_mid_run() {
        let transport = MockTransport::default();
        let clock = ManualClock::new(0);
        let device = SimRangefinder::new("sim")
            .with_scan(&[(0.0, 1000.0)])
            .with_scan_period(Duration::from_millis(5))
            .build();
        let mut lp = build(device, &transport, &clock);

        let control = lp.control().clone();
        let signaller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            assert!(!control.toggle_profile());
            std::thread::sleep(Duration::from_millis(100));
            control.stop();
        });
        let stats = lp.run().unwrap();
        signaller.join().unwrap();

        assert!(!lp.control().profile_enabled());
        assert!(stats.profile_messages > 0, "profile sent before the toggle");
        assert!(
            stats.cycles > stats.profile_messages,
            "cycles after the toggle sent no profile"
        );
        assert_eq!(
            transport.sent_on(Channel::Profile).len() as u64,
            stats.profile_messages
        );
    }

    #[test]
    fn send_failures_do_not_stop_the_loop() {
        let transport = MockTransport {
            fail_sends: true,
            ..Default::default()
        };
        let clock = ManualClock::new(0);
        let device = SimRangefinder::new("sim").with_scan(&[(0.0, 1000.0)]).build();
        let mut lp = build(device, &transport, &clock);

        transport.push_detections(r#"{"detections":[{"angle_deg":0.0,"label":"x"}]}"#);
        for _ in 0..3 {
            let Step::Cycle(report) = lp.step().unwrap() else {
                panic!("expected a cycle");
            };
            assert_eq!(report.profile, PublishOutcome::Dropped);
        }
        assert_eq!(lp.stats().cycles, 3);
        assert_eq!(lp.stats().profile_messages, 0);
        assert_eq!(lp.cache().len(), 1);
    }

    #[test]
    fn init_failure_closes_transport() {
        let transport = MockTransport::default();
        let device = SimRangefinder::new("sim").failing_connect().build();
        let result = AcquisitionLoop::init(
            Box::new(device),
            Box::new(transport.clone()),
            Box::new(ManualClock::new(0)),
            LoopControl::default(),
            config(),
        );
        assert!(matches!(result, Err(FuseError::DeviceInit { .. })));
        assert!(transport.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn room_scan_resolves_obstacle_distance() {
        use scanfuse_hal::Obstacle;

        let transport = MockTransport::default();
        let clock = ManualClock::new(0);
        let device = SimRangefinder::new("sim")
            .with_room(vec![Obstacle::new(20.0, 1_200.0)])
            .build();
        let mut lp = build(device, &transport, &clock);

        transport.push_detections(r#"{"detections":[{"angle_deg":21.0,"label":"chair"}]}"#);
        lp.step().unwrap();

        let chair = lp.cache().get("chair_21").unwrap();
        assert!((chair.distance_mm - 1_200.0).abs() < 1.0);
    }
}
