//! Control Feed Session
//!
//! Follows the feed that publishes the desired symbol list and forwards each
//! valid list to the relay. Runs its own reconnect schedule, so an outage
//! here never disturbs the upstream deal session.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::domain::session::{FeedState, SessionState};
use crate::domain::subscription::SubscriptionSet;
use crate::infrastructure::config::FeedSettings;
use crate::infrastructure::control::messages::parse_desired_set;
use crate::infrastructure::exchange::reconnect::{ReconnectConfig, ReconnectScheduler};
use crate::infrastructure::metrics::{self, FeedType};

/// Errors that end one control connection.
#[derive(Debug, thiserror::Error)]
pub enum ControlSessionError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Nothing received within the idle timeout.
    #[error("no traffic for {0:?}")]
    IdleTimeout(Duration),

    /// Connection closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

impl ControlSessionError {
    /// Metrics label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::WebSocket(_) => "websocket",
            Self::IdleTimeout(_) => "idle_timeout",
            Self::ConnectionClosed => "closed",
            Self::MaxReconnectAttemptsExceeded => "max_reconnects",
        }
    }
}

/// Events emitted by the control session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Connection open.
    Opened,
    /// Connection lost.
    Disconnected,
    /// Reconnect scheduled.
    Reconnecting {
        /// Attempt number since the last open.
        attempt: u32,
    },
    /// A new desired symbol set.
    DesiredSet(SubscriptionSet),
}

/// Control feed session.
pub struct ControlSession {
    feed: FeedSettings,
    event_tx: mpsc::Sender<ControlEvent>,
    state: Arc<FeedState>,
    reconnect: ReconnectScheduler,
    cancel: CancellationToken,
}

impl ControlSession {
    /// Create a control session.
    #[must_use]
    pub fn new(
        feed: FeedSettings,
        event_tx: mpsc::Sender<ControlEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let reconnect = ReconnectScheduler::new(ReconnectConfig::from_feed_settings(&feed));
        Self {
            feed,
            event_tx,
            state: Arc::new(FeedState::new(FeedType::Control.as_str())),
            reconnect,
            cancel,
        }
    }

    /// Shared feed state.
    #[must_use]
    pub fn state(&self) -> Arc<FeedState> {
        Arc::clone(&self.state)
    }

    /// Run the connection loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error only when the reconnect policy gives up.
    pub async fn run(mut self) -> Result<(), ControlSessionError> {
        loop {
            if self.cancel.is_cancelled() {
                self.shut_down();
                return Ok(());
            }

            self.state.transition(SessionState::Connecting);

            match self.connect_and_run().await {
                Ok(()) => {
                    tracing::info!("Control session cancelled");
                    self.shut_down();
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Control connection error");
                    metrics::record_session_error(FeedType::Control, e.kind());
                    metrics::set_session_open(FeedType::Control, false);

                    if matches!(e, ControlSessionError::ConnectionClosed) {
                        self.state.transition(SessionState::Closed);
                    } else {
                        self.state.set_error(e.to_string());
                    }
                    let _ = self.event_tx.send(ControlEvent::Disconnected).await;
                    self.state.transition(SessionState::Backoff);

                    let Some((attempt, delay)) = self.reconnect.schedule() else {
                        self.shut_down();
                        return Err(ControlSessionError::MaxReconnectAttemptsExceeded);
                    };

                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to control feed"
                    );
                    self.state.increment_reconnect_attempts();
                    metrics::record_reconnect(FeedType::Control);
                    let _ = self
                        .event_tx
                        .send(ControlEvent::Reconnecting { attempt })
                        .await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            self.shut_down();
                            return Ok(());
                        }
                        () = self.reconnect.fired() => {}
                    }
                }
            }
        }
    }

    fn shut_down(&self) {
        self.state.transition(SessionState::Disconnected);
        metrics::set_session_open(FeedType::Control, false);
    }

    async fn connect_and_run(&mut self) -> Result<(), ControlSessionError> {
        tracing::info!(url = %self.feed.url, "Connecting to control feed");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.feed.url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        self.state.transition(SessionState::Open);
        self.reconnect.reset();
        metrics::set_session_open(FeedType::Control, true);
        tracing::info!("Control feed open");
        let _ = self.event_tx.send(ControlEvent::Opened).await;

        let ping_period = self.feed.ping_interval;
        let idle_timeout = self.feed.idle_timeout;
        let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_period, ping_period);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ping.tick() => {
                    write.send(Message::Ping(Vec::new().into())).await?;
                }
                () = &mut idle => {
                    return Err(ControlSessionError::IdleTimeout(idle_timeout));
                }
                msg = read.next() => {
                    idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);

                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_payload(text.as_str()).await;
                        }
                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => self.handle_payload(text).await,
                            Err(_) => {
                                metrics::record_control_payload_rejected();
                                tracing::warn!(len = data.len(), "Ignoring non-UTF-8 control payload");
                            }
                        },
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Control feed sent close frame");
                            return Err(ControlSessionError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(ControlSessionError::ConnectionClosed),
                    }
                }
            }
        }
    }

    async fn handle_payload(&self, payload: &str) {
        self.state.increment_messages();
        metrics::record_frame_received(FeedType::Control);

        match parse_desired_set(payload) {
            Ok(desired) => {
                tracing::debug!(symbols = desired.len(), "Desired symbol set received");
                let _ = self.event_tx.send(ControlEvent::DesiredSet(desired)).await;
            }
            Err(e) => {
                metrics::record_control_payload_rejected();
                tracing::warn!(error = %e, "Ignoring control payload");
            }
        }
    }
}
