//! WebSocket edge of the [`ChannelBus`].
//!
//! [`WsBridge`] connects the in-process bus to the network:
//!
//! 1. **Serves** each outbound channel on its own address. Every connected
//!    client receives the channel's messages as text frames; a client that
//!    cannot keep up skips to the newest message.
//!
//! 2. **Ingests** the detections feed by connecting, as a client, to the
//!    upstream producer and republishing every text frame onto
//!    [`Channel::Detections`]. The connection is re-established after any
//!    failure.
//!
//! The bridge does not look inside the payloads.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use scanfuse_types::FuseError;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::{Channel, ChannelBus};

/// Bridge between the [`ChannelBus`] and WebSocket peers.
#[derive(Clone)]
pub struct WsBridge {
    bus: ChannelBus,
}

impl WsBridge {
    pub fn new(bus: ChannelBus) -> Self {
        Self { bus }
    }

    // -----------------------------------------------------------------------
    // Outbound endpoints
    // -----------------------------------------------------------------------

    /// Bind `addr` for serving `channel`.
    ///
    /// Binding is split from serving so the caller can treat a bind failure
    /// as fatal before any scanning starts.
    ///
    /// # Errors
    ///
    /// Returns [`FuseError::Transport`] if the TCP listener cannot be bound.
    pub async fn listen(&self, channel: Channel, addr: SocketAddr) -> Result<ChannelServer, FuseError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| FuseError::Transport(format!("{channel} bind error on {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| FuseError::Transport(format!("{channel} local addr: {e}")))?;
        info!(%channel, addr = %local_addr, "serving channel");
        Ok(ChannelServer {
            bus: self.bus.clone(),
            channel,
            listener,
            local_addr,
        })
    }

    // -----------------------------------------------------------------------
    // Inbound feed
    // -----------------------------------------------------------------------

    /// Keep a client connection to the detections producer at `url`,
    /// republishing every text frame onto [`Channel::Detections`].
    ///
    /// Runs until the task is dropped; waits `retry` between connection
    /// attempts.
    pub async fn run_detections_client(self, url: String, retry: Duration) {
        loop {
            match connect_async(url.as_str()).await {
                Ok((ws_stream, _)) => {
                    info!(%url, "connected to detections feed");
                    let (_, mut ws_rx) = ws_stream.split();
                    while let Some(msg) = ws_rx.next().await {
                        match msg {
                            Ok(Message::Text(text)) => self.forward_detections(text.as_str()),
                            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                                Ok(text) => self.forward_detections(text),
                                Err(_) => debug!(%url, "dropping non-UTF-8 detections frame"),
                            },
                            Ok(Message::Close(_)) => break,
                            Ok(_) => {}
                            Err(e) => {
                                warn!(%url, error = %e, "detections feed read error");
                                break;
                            }
                        }
                    }
                    warn!(%url, "detections feed disconnected");
                }
                Err(e) => {
                    debug!(%url, error = %e, "detections feed unavailable");
                }
            }
            tokio::time::sleep(retry).await;
        }
    }

    fn forward_detections(&self, text: &str) {
        // No subscriber means the loop has shut down; the batch is dropped.
        let _ = self.bus.publish(Channel::Detections, text);
    }
}

/// A bound listener serving one outbound [`Channel`].
pub struct ChannelServer {
    bus: ChannelBus,
    channel: Channel,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ChannelServer {
    /// The address actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept clients forever, one task per client.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let bus = self.bus.clone();
                    let channel = self.channel;
                    tokio::spawn(async move {
                        if let Err(e) = serve_client(bus, channel, stream, peer).await {
                            error!(%channel, %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(channel = %self.channel, error = %e, "ws accept error");
                }
            }
        }
    }
}

async fn serve_client(
    bus: ChannelBus,
    channel: Channel,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), FuseError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| FuseError::Transport(format!("ws handshake from {peer}: {e}")))?;
    debug!(%channel, %peer, "ws client connected");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut rx = bus.subscribe(channel);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(payload) = msg else { break };
                if ws_tx.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    debug!(%channel, %peer, "ws client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn listen_reports_bind_failure() -> Result<(), Box<dyn std::error::Error>> {
        let bridge = WsBridge::new(ChannelBus::new());
        let first = bridge
            .listen(Channel::Profile, "127.0.0.1:0".parse()?)
            .await?;
        let taken = first.local_addr();

        let second = bridge.listen(Channel::Objects, taken).await;
        assert!(matches!(second, Err(FuseError::Transport(_))));
        Ok(())
    }

    #[tokio::test]
    async fn served_channel_reaches_ws_client() -> Result<(), Box<dyn std::error::Error>> {
        let bus = ChannelBus::new();
        let bridge = WsBridge::new(bus.clone());
        let server = bridge
            .listen(Channel::Profile, "127.0.0.1:0".parse()?)
            .await?;
        let addr = server.local_addr();
        tokio::spawn(server.run());

        let (mut client, _) = connect_async(format!("ws://{addr}")).await?;

        // The server subscribes after the handshake; keep publishing until
        // the client is attached.
        let publisher = tokio::spawn(async move {
            loop {
                let _ = bus.publish(Channel::Profile, "LIDAR_DATA 0,1000;");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let frame = tokio::time::timeout(TEST_TIMEOUT, client.next())
            .await?
            .ok_or("stream ended")??;
        publisher.abort();

        assert_eq!(frame.into_text()?.as_str(), "LIDAR_DATA 0,1000;");
        Ok(())
    }

    #[tokio::test]
    async fn detections_client_republishes_frames() -> Result<(), Box<dyn std::error::Error>> {
        let producer = TcpListener::bind("127.0.0.1:0").await?;
        let addr = producer.local_addr()?;
        tokio::spawn(async move {
            if let Ok((stream, _)) = producer.accept().await {
                if let Ok(mut ws) = accept_async(stream).await {
                    let batch = r#"{"detections":[{"label":"x","angle_deg":1.0}]}"#;
                    let _ = ws.send(Message::Text(batch.into())).await;
                    // Hold the connection open until the test finishes.
                    tokio::time::sleep(TEST_TIMEOUT).await;
                }
            }
        });

        let bus = ChannelBus::new();
        let mut rx = bus.subscribe(Channel::Detections);
        let client = tokio::spawn(
            WsBridge::new(bus.clone())
                .run_detections_client(format!("ws://{addr}"), Duration::from_millis(20)),
        );

        let received = tokio::time::timeout(TEST_TIMEOUT, rx.recv()).await?;
        client.abort();

        let json: serde_json::Value = serde_json::from_str(&received.ok_or("bus closed")?)?;
        assert_eq!(json["detections"][0]["label"], "x");
        Ok(())
    }

    #[tokio::test]
    async fn detections_client_retries_until_producer_appears() -> Result<(), Box<dyn std::error::Error>> {
        // Reserve a port, then free it so the first attempts are refused.
        let addr = TcpListener::bind("127.0.0.1:0").await?.local_addr()?;

        let bus = ChannelBus::new();
        let mut rx = bus.subscribe(Channel::Detections);
        let client = tokio::spawn(
            WsBridge::new(bus.clone())
                .run_detections_client(format!("ws://{addr}"), Duration::from_millis(20)),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        let producer = TcpListener::bind(addr).await?;
        tokio::spawn(async move {
            if let Ok((stream, _)) = producer.accept().await {
                if let Ok(mut ws) = accept_async(stream).await {
                    let _ = ws.send(Message::Text(r#"{"detections":[]}"#.into())).await;
                    tokio::time::sleep(TEST_TIMEOUT).await;
                }
            }
        });

        let received = tokio::time::timeout(TEST_TIMEOUT, rx.recv()).await?;
        client.abort();
        assert_eq!(received.as_deref(), Some(r#"{"detections":[]}"#));
        Ok(())
    }
}
