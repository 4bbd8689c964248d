//! `scanfuse-runtime` – the fusion pipeline.
//!
//! Everything that runs once per scan cycle, plus the pieces that keep the
//! process observable.
//!
//! # Modules
//!
//! - [`acquisition_loop`] – [`AcquisitionLoop`][acquisition_loop::AcquisitionLoop]:
//!   drives acquire → reduce → correlate → age → publish, with bounded-retry
//!   recovery and cooperative shutdown through
//!   [`LoopControl`][acquisition_loop::LoopControl].
//! - [`object_cache`] – [`ObjectCache`][object_cache::ObjectCache]: the aged
//!   id → object map.
//! - [`publisher`] – [`PublisherGateway`][publisher::PublisherGateway]:
//!   wire formats and best-effort publishing over a
//!   [`Transport`][scanfuse_middleware::Transport].
//! - [`failure_guard`] – [`FailureGuard`][failure_guard::FailureGuard]:
//!   consecutive-failure budget for the device.
//! - [`clock`] – [`Clock`][clock::Clock] with real and manual
//!   implementations.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.

pub mod acquisition_loop;
pub mod clock;
pub mod failure_guard;
pub mod object_cache;
pub mod publisher;
pub mod telemetry;

pub use acquisition_loop::{AcquisitionLoop, CycleReport, LoopConfig, LoopControl, LoopState, LoopStats, Step};
pub use clock::{Clock, ManualClock, Stamp, SystemClock};
pub use failure_guard::{FailureGuard, Verdict};
pub use object_cache::{ObjectCache, Upsert};
pub use publisher::{GatewayConfig, PublishOutcome, PublisherGateway};
pub use telemetry::{TracerProviderGuard, init_tracing};
