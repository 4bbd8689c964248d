//! Loop-side pub/sub capability.
//!
//! The acquisition loop never talks to sockets. It holds a [`Transport`],
//! publishes outbound payloads without blocking and polls inbound channels
//! for the newest message. [`BusTransport`] is the production
//! implementation over a [`ChannelBus`]; tests substitute their own.

use std::collections::HashMap;
use std::time::Duration;

use scanfuse_types::FuseError;
use tracing::{info, trace};

use crate::bus::{Channel, ChannelBus, ChannelReceiver};

/// Non-blocking, latest-value-only pub/sub.
pub trait Transport: Send {
    /// Hand `payload` to `channel` without waiting for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`FuseError::Transport`] if the message could not be queued.
    /// Callers treat this as a dropped message, not a fault.
    fn publish(&mut self, channel: Channel, payload: &str) -> Result<(), FuseError>;

    /// Return the newest message queued on `channel`, waiting at most
    /// `timeout` for one to arrive. Older queued messages are discarded.
    fn poll(&mut self, channel: Channel, timeout: Duration) -> Result<Option<String>, FuseError>;

    /// Release the transport. Must be safe to call more than once.
    fn close(&mut self);
}

/// [`Transport`] over an in-process [`ChannelBus`].
///
/// Inbound channels are subscribed when the transport is created, so a
/// message published before the first poll is still visible to it.
pub struct BusTransport {
    bus: ChannelBus,
    inbound: HashMap<Channel, ChannelReceiver>,
    closed: bool,
}

impl BusTransport {
    pub fn new(bus: ChannelBus, inbound: &[Channel]) -> Self {
        let inbound = inbound
            .iter()
            .map(|&channel| (channel, bus.subscribe(channel)))
            .collect();
        Self {
            bus,
            inbound,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn receiver(&mut self, channel: Channel) -> Result<&mut ChannelReceiver, FuseError> {
        if self.closed {
            return Err(FuseError::Transport("transport closed".to_string()));
        }
        self.inbound
            .get_mut(&channel)
            .ok_or_else(|| FuseError::Transport(format!("not subscribed to {channel}")))
    }
}

impl Transport for BusTransport {
    fn publish(&mut self, channel: Channel, payload: &str) -> Result<(), FuseError> {
        if self.closed {
            return Err(FuseError::Transport("transport closed".to_string()));
        }
        // Publishing into a channel nobody listens to is normal pub/sub
        // behaviour: the message is simply gone.
        let delivered = self.bus.publish(channel, payload).unwrap_or(0);
        trace!(%channel, delivered, bytes = payload.len(), "published");
        Ok(())
    }

    fn poll(&mut self, channel: Channel, timeout: Duration) -> Result<Option<String>, FuseError> {
        let receiver = self.receiver(channel)?;
        if let Some(msg) = receiver.poll_latest()? {
            return Ok(Some(msg));
        }
        if timeout.is_zero() {
            return Ok(None);
        }
        std::thread::sleep(timeout);
        receiver.poll_latest()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inbound.clear();
        info!("transport closed");
    }
}

impl Drop for BusTransport {
    fn drop(&mut self) {
        self.close();
    }
}
