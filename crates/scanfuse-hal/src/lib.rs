//! `scanfuse-hal` – rangefinder hardware abstraction.
//!
//! # Modules
//!
//! - [`rangefinder`] – the [`Rangefinder`] trait every scanning range
//!   sensor driver implements.
//! - [`session`] – [`DeviceSession`]: brings a driver up (connect, health
//!   check, start scanning), runs the stop/wait/restart recovery sequence
//!   and guarantees the device is stopped exactly once on every exit path.
//! - [`sim`] – [`SimRangefinder`]: scripted and synthetic-room driver for
//!   headless runs and CI.

pub mod rangefinder;
pub mod session;
pub mod sim;

pub use rangefinder::Rangefinder;
pub use session::DeviceSession;
pub use sim::{Obstacle, SimCounters, SimRangefinder};
