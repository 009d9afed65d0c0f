//! Reconnecting live delivery channel.
//!
//! [`LiveChannel`] maintains one WebSocket connection to the server's
//! `/streaming` endpoint and drives the connection lifecycle:
//!
//! ```text
//! CONNECTING -> OPEN -> CLOSING -> CLOSED
//!      |          |
//!      +-> ERROR <+
//! ```
//!
//! An unexpected disconnect moves the channel to `CLOSED` and schedules a
//! reconnect after a fixed delay, up to a bounded number of attempts. The
//! attempt counter resets to zero only once a connection reaches `OPEN`.
//! Exceeding the bound leaves the channel in `CLOSED` until the caller
//! reconnects explicitly. An explicit [`LiveChannel::close`] suppresses any
//! pending reconnect.
//!
//! Frames sent while the channel is not `OPEN` are not queued; [`LiveChannel::send`]
//! returns `false` and the caller reconciles through the paginated message
//! fetch after reconnecting.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::frames::{ClientFrame, ServerEvent};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Dialing the server.
    Connecting,
    /// Connection established; frames flow.
    Open,
    /// Shutting down after an explicit close.
    Closing,
    /// Not connected. Terminal once the retry budget is spent or the
    /// channel was closed explicitly.
    Closed,
    /// The transport failed while connecting or open.
    Error,
}

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:3000/streaming`.
    pub url: String,
    /// Session token passed as the `i` query parameter.
    pub token: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Reconnect attempts allowed before the channel stays closed.
    pub max_reconnect_attempts: u32,
}

impl ChannelConfig {
    /// Create a config with default reconnect behavior.
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_attempts: 5,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}?i={}", self.url, self.token)
    }
}

/// Handle to a live delivery channel.
///
/// Created by [`LiveChannel::connect`], which also returns the receiver for
/// incoming server events. Dropping the handle shuts the channel down.
#[derive(Debug)]
pub struct LiveChannel {
    state_rx: watch::Receiver<ChannelState>,
    outbound_tx: mpsc::Sender<ClientFrame>,
    close_tx: watch::Sender<bool>,
}

impl LiveChannel {
    /// Open a channel and start the connection driver.
    #[must_use]
    pub fn connect(config: ChannelConfig) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(256);
        let (close_tx, close_rx) = watch::channel(false);

        tokio::spawn(run_channel(config, state_tx, outbound_rx, events_tx, close_rx));

        let channel = Self {
            state_rx,
            outbound_tx,
            close_tx,
        };
        (channel, events_rx)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Send a frame to the server.
    ///
    /// Returns `false` without queuing when the channel is not open or the
    /// outbound buffer is full.
    #[must_use]
    pub fn send(&self, frame: ClientFrame) -> bool {
        if self.state() != ChannelState::Open {
            return false;
        }
        self.outbound_tx.try_send(frame).is_ok()
    }

    /// Close the channel and suppress any pending reconnect.
    pub fn close(&self) {
        let _ = self.close_tx.send(true);
    }
}

enum SessionEnd {
    /// The caller asked for the channel to close.
    CloseRequested,
    /// The server closed the connection or the stream ended.
    Disconnected,
    /// The transport failed mid-session.
    TransportError,
}

async fn run_channel(
    config: ChannelConfig,
    state_tx: watch::Sender<ChannelState>,
    mut outbound_rx: mpsc::Receiver<ClientFrame>,
    events_tx: mpsc::Sender<ServerEvent>,
    mut close_rx: watch::Receiver<bool>,
) {
    let endpoint = config.endpoint();
    let mut attempts: u32 = 0;

    loop {
        if *close_rx.borrow() {
            let _ = state_tx.send(ChannelState::Closed);
            return;
        }

        let _ = state_tx.send(ChannelState::Connecting);
        debug!(url = %config.url, "Connecting to live channel");

        match connect_async(&endpoint).await {
            Ok((stream, _)) => {
                info!(url = %config.url, "Live channel open");
                let _ = state_tx.send(ChannelState::Open);
                attempts = 0;

                match run_session(stream, &mut outbound_rx, &events_tx, &mut close_rx).await {
                    SessionEnd::CloseRequested => {
                        let _ = state_tx.send(ChannelState::Closing);
                        let _ = state_tx.send(ChannelState::Closed);
                        info!("Live channel closed");
                        return;
                    }
                    SessionEnd::Disconnected => {
                        warn!("Live channel disconnected");
                        let _ = state_tx.send(ChannelState::Closed);
                    }
                    SessionEnd::TransportError => {
                        let _ = state_tx.send(ChannelState::Error);
                        let _ = state_tx.send(ChannelState::Closed);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Live channel connect failed");
                let _ = state_tx.send(ChannelState::Error);
                let _ = state_tx.send(ChannelState::Closed);
            }
        }

        attempts += 1;
        if attempts > config.max_reconnect_attempts {
            warn!(
                attempts = attempts - 1,
                "Reconnect budget exhausted, staying closed"
            );
            return;
        }

        debug!(attempt = attempts, "Reconnecting after delay");
        tokio::select! {
            () = sleep(config.reconnect_delay) => {}
            _ = close_rx.changed() => {
                if *close_rx.borrow() {
                    let _ = state_tx.send(ChannelState::Closed);
                    return;
                }
            }
        }
    }
}

async fn run_session(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outbound_rx: &mut mpsc::Receiver<ClientFrame>,
    events_tx: &mpsc::Sender<ServerEvent>,
    close_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    // Handle dropped; shut down.
                    return SessionEnd::CloseRequested;
                };
                match serde_json::to_string(&frame) {
                    Ok(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            return SessionEnd::TransportError;
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize outbound frame"),
                }
            }
            msg = source.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(text.as_str()) {
                            Ok(event) => {
                                if events_tx.try_send(event).is_err() {
                                    warn!("Event buffer full, dropping server event");
                                }
                            }
                            Err(e) => warn!(error = %e, "Unparseable server event"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            return SessionEnd::TransportError;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Disconnected,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Live channel transport error");
                        return SessionEnd::TransportError;
                    }
                }
            }
            _ = close_rx.changed() => {
                if *close_rx.borrow() {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::CloseRequested;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_carries_token() {
        let config = ChannelConfig::new("ws://localhost:3000/streaming", "user1");
        assert_eq!(config.endpoint(), "ws://localhost:3000/streaming?i=user1");
    }

    #[tokio::test]
    async fn test_send_fails_when_not_open() {
        // Nothing listens on this port; with a zero retry budget the channel
        // settles into Closed.
        let mut config = ChannelConfig::new("ws://127.0.0.1:9", "user1");
        config.reconnect_delay = Duration::from_millis(10);
        config.max_reconnect_attempts = 0;

        let (channel, _events) = LiveChannel::connect(config);

        let mut states = channel.state_changes();
        states
            .wait_for(|s| *s == ChannelState::Closed)
            .await
            .unwrap();

        assert!(!channel.send(ClientFrame::Ping));
    }

    #[tokio::test]
    async fn test_close_before_open_settles_closed() {
        let mut config = ChannelConfig::new("ws://127.0.0.1:9", "user1");
        config.reconnect_delay = Duration::from_secs(60);
        config.max_reconnect_attempts = 5;

        let (channel, _events) = LiveChannel::connect(config);
        channel.close();

        let mut states = channel.state_changes();
        states
            .wait_for(|s| *s == ChannelState::Closed)
            .await
            .unwrap();
        assert_eq!(channel.state(), ChannelState::Closed);
    }
}
