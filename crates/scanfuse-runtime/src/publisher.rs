//! [`PublisherGateway`] – the loop's only view of the pub/sub transport.
//!
//! Outbound:
//!
//! - **Profile** – `LIDAR_DATA ` followed by one `angle,distance;` pair per
//!   bucket, sent every cycle while profile publishing is enabled.
//! - **Objects** – a JSON snapshot of the object cache, sent after a cycle
//!   that refreshed at least one object and, as a heartbeat, whenever the
//!   last attempt is older than the force-publish interval. The interval is
//!   measured on the monotonic timeline; only the message timestamp comes
//!   from the wall clock.
//!
//! Inbound:
//!
//! - **Detections** – the newest queued JSON batch, parsed leniently.
//!
//! Every send is fire-and-forget. A failed send is counted and logged
//! through a rate limiter, never returned to the caller.

use std::fmt::Write as _;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use scanfuse_middleware::{Channel, Transport};
use scanfuse_perception::Profile;
use scanfuse_types::{Detection, FuseError, ObjectReport, ObjectsMessage, TrackedObject};
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::Stamp;

/// Prefix of every profile message.
pub const PROFILE_PREFIX: &str = "LIDAR_DATA ";

type LogLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// What happened to one publish request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the transport.
    Sent,
    /// Nothing to send.
    Empty,
    /// The transport refused the message; it is gone.
    Dropped,
    /// Publishing on this channel is switched off.
    Disabled,
}

/// Gateway timing parameters.
#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    /// Longest gap between objects publish attempts.
    pub force_publish_ms: u64,
    /// How long a detections poll may wait for a batch.
    pub detection_poll: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            force_publish_ms: 1_000,
            detection_poll: Duration::from_millis(1),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire formats
// ─────────────────────────────────────────────────────────────────────────────

/// Render a profile as `LIDAR_DATA a,d;a,d;…`.
pub fn format_profile(profile: &Profile) -> String {
    let mut out = String::with_capacity(PROFILE_PREFIX.len() + profile.len() * 10);
    out.push_str(PROFILE_PREFIX);
    for (angle, distance) in profile.iter() {
        // Writing into a String cannot fail.
        let _ = write!(out, "{angle},{distance};");
    }
    out
}

/// Serialise a cache snapshot as an objects message.
pub fn format_objects(
    snapshot: &[TrackedObject],
    now_ms: u64,
    forced: bool,
) -> Result<String, FuseError> {
    let message = ObjectsMessage::new(
        now_ms,
        forced,
        snapshot.iter().map(ObjectReport::from).collect(),
    );
    serde_json::to_string(&message).map_err(|e| FuseError::Serialization(e.to_string()))
}

/// Parse a detections batch.
///
/// Missing or mistyped fields default to zero / empty and elements that are
/// not JSON objects are skipped. A numeric or boolean `label` is kept as its
/// text form. A batch without a `detections` array is
/// empty.
///
/// # Errors
///
/// Returns [`FuseError::Serialization`] if `text` is not JSON at all.
pub fn parse_detections(text: &str) -> Result<Vec<Detection>, FuseError> {
    let root: Value =
        serde_json::from_str(text).map_err(|e| FuseError::Serialization(format!("detections: {e}")))?;

    let Some(items) = root.get("detections").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    Ok(items
        .iter()
        .filter(|item| item.is_object())
        .map(|item| Detection {
            label: self::text(item, "label"),
            confidence: number(item, "confidence"),
            angle_deg: number(item, "angle_deg"),
            area: number(item, "area"),
        })
        .collect())
}

fn text(item: &Value, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
        _ => String::new(),
    }
}

fn number(item: &Value, key: &str) -> f32 {
    item.get(key).and_then(Value::as_f64).unwrap_or(0.0) as f32
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────────────────────────────────────

/// Best-effort publisher over a [`Transport`].
pub struct PublisherGateway {
    transport: Box<dyn Transport>,
    config: GatewayConfig,
    last_objects_attempt_ms: u64,
    send_failures: u64,
    suppressed_logs: u64,
    log_limiter: LogLimiter,
    closed: bool,
}

impl PublisherGateway {
    /// Wrap `transport`. The heartbeat interval is measured from monotonic
    /// `start_ms`.
    pub fn new(transport: Box<dyn Transport>, config: GatewayConfig, start_ms: u64) -> Self {
        Self {
            transport,
            config,
            last_objects_attempt_ms: start_ms,
            send_failures: 0,
            suppressed_logs: 0,
            log_limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::MIN)),
            closed: false,
        }
    }

    /// Publish `profile` if `enabled` and non-empty.
    pub fn publish_profile(&mut self, profile: &Profile, enabled: bool) -> PublishOutcome {
        if !enabled {
            return PublishOutcome::Disabled;
        }
        if profile.is_empty() {
            return PublishOutcome::Empty;
        }
        let payload = format_profile(profile);
        self.send(Channel::Profile, &payload)
    }

    /// `true` once the heartbeat interval has passed since the last objects
    /// publish attempt, both on the monotonic timeline.
    pub fn objects_due(&self, monotonic_ms: u64) -> bool {
        monotonic_ms.saturating_sub(self.last_objects_attempt_ms) >= self.config.force_publish_ms
    }

    /// Publish a cache snapshot. An empty snapshot sends nothing but still
    /// counts as an attempt for the heartbeat timer.
    pub fn publish_objects(
        &mut self,
        snapshot: &[TrackedObject],
        now: Stamp,
        forced: bool,
    ) -> PublishOutcome {
        self.last_objects_attempt_ms = now.monotonic_ms;
        if snapshot.is_empty() {
            return PublishOutcome::Empty;
        }
        match format_objects(snapshot, now.wall_ms, forced) {
            Ok(payload) => self.send(Channel::Objects, &payload),
            Err(e) => {
                self.note_failure(Channel::Objects, &e);
                PublishOutcome::Dropped
            }
        }
    }

    /// Take the newest detections batch, if any.
    ///
    /// Transport errors and unparseable batches are logged and yield an empty
    /// batch.
    pub fn poll_detections(&mut self) -> Vec<Detection> {
        if self.closed {
            return Vec::new();
        }
        let text = match self.transport.poll(Channel::Detections, self.config.detection_poll) {
            Ok(Some(text)) => text,
            Ok(None) => return Vec::new(),
            Err(e) => {
                self.rate_limited_warn(Channel::Detections, &e);
                return Vec::new();
            }
        };
        match parse_detections(&text) {
            Ok(batch) => batch,
            Err(e) => {
                self.rate_limited_warn(Channel::Detections, &e);
                Vec::new()
            }
        }
    }

    /// Failed sends over the gateway's lifetime.
    pub fn send_failures(&self) -> u64 {
        self.send_failures
    }

    /// Close the transport. Safe to call more than once.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.transport.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn send(&mut self, channel: Channel, payload: &str) -> PublishOutcome {
        if self.closed {
            return PublishOutcome::Dropped;
        }
        match self.transport.publish(channel, payload) {
            Ok(()) => PublishOutcome::Sent,
            Err(e) => {
                self.note_failure(channel, &e);
                PublishOutcome::Dropped
            }
        }
    }

    fn note_failure(&mut self, channel: Channel, error: &FuseError) {
        self.send_failures += 1;
        self.rate_limited_warn(channel, error);
    }

    fn rate_limited_warn(&mut self, channel: Channel, error: &FuseError) {
        if self.log_limiter.check().is_ok() {
            warn!(%channel, %error, suppressed = self.suppressed_logs, "transport problem");
            self.suppressed_logs = 0;
        } else {
            self.suppressed_logs += 1;
            debug!(%channel, %error, "transport problem (rate limited)");
        }
    }
}

impl Drop for PublisherGateway {
    fn drop(&mut self) {
        self.close();
    }
}
