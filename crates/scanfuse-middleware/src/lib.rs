//! `scanfuse-middleware` – message plumbing.
//!
//! Moves payloads between the acquisition loop and the outside world
//! without caring what they mean.
//!
//! # Modules
//!
//! - [`bus`] – latest-value, channel-based publish/subscribe bus built on
//!   Tokio broadcast channels.
//! - [`transport`] – the loop-facing [`Transport`][transport::Transport]
//!   capability and its bus-backed implementation.
//! - [`ws_bridge`] – WebSocket endpoints for the outbound channels and the
//!   reconnecting detections feed client.

pub mod bus;
pub mod transport;
pub mod ws_bridge;

pub use bus::{Channel, ChannelBus, ChannelReceiver};
pub use transport::{BusTransport, Transport};
pub use ws_bridge::{ChannelServer, WsBridge};
