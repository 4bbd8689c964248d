//! Latest-value, channel-based publish/subscribe bus.
//!
//! Uses [`tokio::sync::broadcast`] channels with a capacity of one message,
//! so a reader that falls behind skips straight to the newest value instead
//! of working through a backlog of stale frames.
//!
//! # Channels
//!
//! | Channel | Direction | Payload |
//! |---|---|---|
//! | [`Channel::Profile`] | out | `LIDAR_DATA a,d;a,d;…` |
//! | [`Channel::Objects`] | out | objects JSON snapshot |
//! | [`Channel::Detections`] | in | detections JSON batch |

use std::fmt;

use scanfuse_types::FuseError;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Messages buffered per channel. One means "latest value only".
pub const LATEST_ONLY_CAPACITY: usize = 1;

/// The three pub/sub lanes of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Range profile, published once per scan cycle.
    Profile,
    /// Snapshot of the object cache.
    Objects,
    /// Camera detection batches from the upstream producer.
    Detections,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Profile, Channel::Objects, Channel::Detections];

    pub fn name(&self) -> &'static str {
        match self {
            Channel::Profile => "profile",
            Channel::Objects => "objects",
            Channel::Detections => "detections",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct ChannelBus {
    profile: broadcast::Sender<String>,
    objects: broadcast::Sender<String>,
    detections: broadcast::Sender<String>,
}

impl ChannelBus {
    pub fn new() -> Self {
        let (profile, _) = broadcast::channel(LATEST_ONLY_CAPACITY);
        let (objects, _) = broadcast::channel(LATEST_ONLY_CAPACITY);
        let (detections, _) = broadcast::channel(LATEST_ONLY_CAPACITY);
        Self {
            profile,
            objects,
            detections,
        }
    }

    /// Publish `payload` on `channel`, replacing any value a subscriber has
    /// not read yet.
    ///
    /// Returns the number of subscribers handed the message.
    ///
    /// # Errors
    ///
    /// Returns [`FuseError::Channel`] when nobody is subscribed to the
    /// channel; the message is dropped.
    pub fn publish(&self, channel: Channel, payload: impl Into<String>) -> Result<usize, FuseError> {
        self.sender(channel)
            .send(payload.into())
            .map_err(|_| FuseError::Channel(format!("no subscribers on {channel}")))
    }

    /// Subscribe to `channel`. The receiver sees only messages published
    /// after this call.
    pub fn subscribe(&self, channel: Channel) -> ChannelReceiver {
        ChannelReceiver {
            channel,
            receiver: self.sender(channel).subscribe(),
        }
    }

    /// Number of live subscribers on `channel`.
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.sender(channel).receiver_count()
    }

    fn sender(&self, channel: Channel) -> &broadcast::Sender<String> {
        match channel {
            Channel::Profile => &self.profile,
            Channel::Objects => &self.objects,
            Channel::Detections => &self.detections,
        }
    }
}

impl Default for ChannelBus {
    fn default() -> Self {
        Self::new()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Receiver
// ────────────────────────────────────────────────────────────────────────────

/// A receiver bound to a single [`Channel`].
///
/// Obtained via [`ChannelBus::subscribe`]. Usable from async code
/// ([`recv`][Self::recv]) and from a plain thread
/// ([`poll_latest`][Self::poll_latest]).
#[derive(Debug)]
pub struct ChannelReceiver {
    channel: Channel,
    receiver: broadcast::Receiver<String>,
}

impl ChannelReceiver {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Wait for the next message, skipping anything the receiver lagged
    /// past. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    trace!(channel = %self.channel, skipped = n, "receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain everything queued and return only the newest message, without
    /// blocking.
    ///
    /// # Errors
    ///
    /// Returns [`FuseError::Channel`] if the bus has been dropped and nothing
    /// was left to read.
    pub fn poll_latest(&mut self) -> Result<Option<String>, FuseError> {
        let mut latest = None;
        loop {
            match self.receiver.try_recv() {
                Ok(msg) => latest = Some(msg),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    debug!(channel = %self.channel, skipped = n, "dropping stale messages");
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(latest),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return match latest {
                        Some(msg) => Ok(Some(msg)),
                        None => Err(FuseError::Channel(format!("{} bus closed", self.channel))),
                    };
                }
            }
        }
    }
}
