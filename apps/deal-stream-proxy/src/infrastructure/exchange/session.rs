//! Upstream Deal Feed Session
//!
//! Owns the websocket connection to the exchange deal feed.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected → Connecting → Open → (Closed | Errored) → Backoff → Connecting
//! ```
//!
//! While open, binary frames go through [`FrameDecoder`] and decoded wrappers
//! are forwarded to the relay as [`UpstreamEvent`]s. Subscription commands
//! arrive from an [`UpstreamHandle`] and are only written while the
//! connection is open; commands queued before an open are discarded, and the
//! relay restores the full subscription once it sees [`UpstreamEvent::Opened`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{UpstreamPort, UpstreamPortError};
use crate::domain::session::{FeedState, SessionState};
use crate::domain::streaming::DecodedWrapper;
use crate::domain::subscription::Symbol;
use crate::infrastructure::config::{FeedSettings, TopicSettings};
use crate::infrastructure::exchange::codec::{Decoded, FrameDecoder};
use crate::infrastructure::exchange::messages::{
    ControlAck, SubscriptionMethod, SubscriptionRequest,
};
use crate::infrastructure::exchange::reconnect::{ReconnectConfig, ReconnectScheduler};
use crate::infrastructure::metrics::{self, FeedType};

/// Buffered subscription commands between the relay and the session.
const COMMAND_CAPACITY: usize = 64;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamSessionError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Control request could not be serialized.
    #[error("failed to serialize control request: {0}")]
    Serialize(#[from] serde_json::Error),

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

impl UpstreamSessionError {
    /// Metrics label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::WebSocket(_) => "websocket",
            Self::Serialize(_) => "serialize",
            Self::IdleTimeout(_) => "idle_timeout",
            Self::ConnectionClosed => "closed",
            Self::MaxReconnectAttemptsExceeded => "max_reconnects",
        }
    }
}

// =============================================================================
// Events and Commands
// =============================================================================

/// Events emitted by the upstream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Handshake started.
    Connecting,
    /// Connection open; subscriptions must be restored.
    Opened,
    /// Connection lost.
    Disconnected,
    /// Reconnect scheduled.
    Reconnecting {
        /// Attempt number since the last open.
        attempt: u32,
    },
    /// A decoded push frame.
    Wrapper(DecodedWrapper),
    /// A control request acknowledgement.
    Acknowledged(ControlAck),
}

/// Subscription commands accepted by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCommand {
    /// Subscribe each symbol's topic.
    Subscribe(Vec<Symbol>),
    /// Unsubscribe each symbol's topic.
    Unsubscribe(Vec<Symbol>),
    /// Subscribe all symbols, or the default topic if none.
    Restore(Vec<Symbol>),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the upstream session.
#[derive(Debug, Clone)]
pub struct UpstreamSessionConfig {
    /// Connection settings.
    pub feed: FeedSettings,
    /// Topic construction.
    pub topics: TopicSettings,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

impl UpstreamSessionConfig {
    /// Build from feed and topic settings.
    #[must_use]
    pub fn new(feed: FeedSettings, topics: TopicSettings) -> Self {
        let reconnect = ReconnectConfig::from_feed_settings(&feed);
        Self {
            feed,
            topics,
            reconnect,
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Relay-side handle implementing [`UpstreamPort`].
#[derive(Debug, Clone)]
pub struct UpstreamHandle {
    command_tx: mpsc::Sender<UpstreamCommand>,
    state: Arc<FeedState>,
}

impl UpstreamHandle {
    /// Shared feed state of the session.
    #[must_use]
    pub fn state(&self) -> Arc<FeedState> {
        Arc::clone(&self.state)
    }

    async fn dispatch(&self, command: UpstreamCommand) -> Result<(), UpstreamPortError> {
        if !self.state.is_open() {
            return Err(UpstreamPortError::NotOpen);
        }
        self.command_tx
            .send(command)
            .await
            .map_err(|_| UpstreamPortError::Stopped)
    }
}

#[async_trait]
impl UpstreamPort for UpstreamHandle {
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), UpstreamPortError> {
        self.dispatch(UpstreamCommand::Subscribe(symbols.to_vec()))
            .await
    }

    async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), UpstreamPortError> {
        self.dispatch(UpstreamCommand::Unsubscribe(symbols.to_vec()))
            .await
    }

    async fn restore(&self, symbols: &[Symbol]) -> Result<(), UpstreamPortError> {
        self.dispatch(UpstreamCommand::Restore(symbols.to_vec()))
            .await
    }
}

// =============================================================================
// Session
// =============================================================================

/// Upstream deal feed session.
pub struct UpstreamSession {
    config: UpstreamSessionConfig,
    decoder: FrameDecoder,
    event_tx: mpsc::Sender<UpstreamEvent>,
    command_rx: mpsc::Receiver<UpstreamCommand>,
    state: Arc<FeedState>,
    reconnect: ReconnectScheduler,
    next_request_id: u64,
    cancel: CancellationToken,
}

impl UpstreamSession {
    /// Create a session and the handle used to drive its subscriptions.
    #[must_use]
    pub fn new(
        config: UpstreamSessionConfig,
        event_tx: mpsc::Sender<UpstreamEvent>,
        cancel: CancellationToken,
    ) -> (Self, UpstreamHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let state = Arc::new(FeedState::new(FeedType::Upstream.as_str()));
        let reconnect = ReconnectScheduler::new(config.reconnect.clone());

        let handle = UpstreamHandle {
            command_tx,
            state: Arc::clone(&state),
        };
        let session = Self {
            config,
            decoder: FrameDecoder::new(),
            event_tx,
            command_rx,
            state,
            reconnect,
            next_request_id: 1,
            cancel,
        };
        (session, handle)
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
    pub async fn run(mut self) -> Result<(), UpstreamSessionError> {
        loop {
            if self.cancel.is_cancelled() {
                self.shut_down();
                return Ok(());
            }

            self.state.transition(SessionState::Connecting);
            let _ = self.event_tx.send(UpstreamEvent::Connecting).await;

            match self.connect_and_run().await {
                Ok(()) => {
                    tracing::info!("Upstream session cancelled");
                    self.shut_down();
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream connection error");
                    metrics::record_session_error(FeedType::Upstream, e.kind());
                    metrics::set_session_open(FeedType::Upstream, false);

                    if matches!(e, UpstreamSessionError::ConnectionClosed) {
                        self.state.transition(SessionState::Closed);
                    } else {
                        self.state.set_error(e.to_string());
                    }
                    let _ = self.event_tx.send(UpstreamEvent::Disconnected).await;
                    self.state.transition(SessionState::Backoff);

                    let Some((attempt, delay)) = self.reconnect.schedule() else {
                        self.shut_down();
                        return Err(UpstreamSessionError::MaxReconnectAttemptsExceeded);
                    };

                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to upstream feed"
                    );
                    self.state.increment_reconnect_attempts();
                    metrics::record_reconnect(FeedType::Upstream);
                    let _ = self
                        .event_tx
                        .send(UpstreamEvent::Reconnecting { attempt })
                        .await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Upstream session cancelled during reconnect delay");
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
        metrics::set_session_open(FeedType::Upstream, false);
    }

    /// Connect and process traffic until error or cancellation.
    async fn connect_and_run(&mut self) -> Result<(), UpstreamSessionError> {
        tracing::info!(url = %self.config.feed.url, "Connecting to upstream feed");

        let (ws_stream, _response) =
            tokio_tungstenite::connect_async(self.config.feed.url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        // Anything queued while disconnected targets a dead connection.
        while self.command_rx.try_recv().is_ok() {}

        self.state.transition(SessionState::Open);
        self.reconnect.reset();
        metrics::set_session_open(FeedType::Upstream, true);
        tracing::info!("Upstream feed open");
        let _ = self.event_tx.send(UpstreamEvent::Opened).await;

        let ping_period = self.config.feed.ping_interval;
        let idle_timeout = self.config.feed.idle_timeout;
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
                    return Err(UpstreamSessionError::IdleTimeout(idle_timeout));
                }
                Some(command) = self.command_rx.recv() => {
                    self.send_command(&mut write, command).await?;
                }
                msg = read.next() => {
                    idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);

                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            self.handle_frame(&data).await;
                        }
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(text.as_str()).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Upstream sent close frame");
                            return Err(UpstreamSessionError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Upstream stream ended");
                            return Err(UpstreamSessionError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, data: &[u8]) {
        self.state.increment_messages();
        metrics::record_frame_received(FeedType::Upstream);

        let started = Instant::now();
        let decoded = self.decoder.decode(data);
        metrics::record_processing_duration(started.elapsed());

        match decoded {
            Ok(Decoded::Wrapper(wrapper)) => {
                let _ = self.event_tx.send(UpstreamEvent::Wrapper(wrapper)).await;
            }
            Ok(Decoded::Control(ack)) => {
                let _ = self.event_tx.send(UpstreamEvent::Acknowledged(ack)).await;
            }
            Err(failure) => {
                metrics::record_decode_failure();
                tracing::warn!(
                    len = failure.len,
                    candidates = failure.candidates_tried,
                    preview = %failure.preview,
                    "Dropping undecodable upstream frame"
                );
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        self.state.increment_messages();
        metrics::record_frame_received(FeedType::Upstream);

        match serde_json::from_str::<ControlAck>(text) {
            Ok(ack) => {
                if !ack.is_success() {
                    tracing::warn!(id = ?ack.id, code = ?ack.code, msg = ?ack.msg, "Upstream rejected request");
                }
                let _ = self.event_tx.send(UpstreamEvent::Acknowledged(ack)).await;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unrecognized upstream text message");
            }
        }
    }

    async fn send_command<W>(
        &mut self,
        write: &mut W,
        command: UpstreamCommand,
    ) -> Result<(), UpstreamSessionError>
    where
        W: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let (method, topics): (SubscriptionMethod, Vec<String>) = match command {
            UpstreamCommand::Subscribe(symbols) => {
                (SubscriptionMethod::Subscription, self.topics_for(&symbols))
            }
            UpstreamCommand::Unsubscribe(symbols) => {
                (SubscriptionMethod::Unsubscription, self.topics_for(&symbols))
            }
            UpstreamCommand::Restore(symbols) if symbols.is_empty() => (
                SubscriptionMethod::Subscription,
                vec![self.config.topics.default_topic.clone()],
            ),
            UpstreamCommand::Restore(symbols) => {
                (SubscriptionMethod::Subscription, self.topics_for(&symbols))
            }
        };

        for topic in topics {
            let request = SubscriptionRequest::new(method, topic, self.next_request_id);
            self.next_request_id += 1;

            let json = serde_json::to_string(&request)?;
            tracing::debug!(
                method = method.as_str(),
                topic = %request.params[0],
                id = request.id,
                "Sending control request"
            );
            write.send(Message::Text(json.into())).await?;
            metrics::record_control_request(method);
        }
        Ok(())
    }

    fn topics_for(&self, symbols: &[Symbol]) -> Vec<String> {
        symbols
            .iter()
            .map(|symbol| self.config.topics.template.topic(symbol))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (UpstreamSession, UpstreamHandle, mpsc::Receiver<UpstreamEvent>) {
        let (event_tx, event_rx) = mpsc::channel(16);
        let config = UpstreamSessionConfig::new(
            FeedSettings::with_url("ws://127.0.0.1:1".to_string()),
            TopicSettings::default(),
        );
        let (session, handle) = UpstreamSession::new(config, event_tx, CancellationToken::new());
        (session, handle, event_rx)
    }

    #[tokio::test]
    async fn handle_drops_commands_while_not_open() {
        let (_session, handle, _events) = session();
        let result = handle.subscribe(&["BTCUSDT".to_string()]).await;
        assert_eq!(result, Err(UpstreamPortError::NotOpen));
    }

    #[tokio::test]
    async fn handle_reports_stopped_session() {
        let (session, handle, _events) = session();
        let state = session.state();
        state.transition(SessionState::Connecting);
        state.transition(SessionState::Open);
        drop(session);

        let result = handle.restore(&[]).await;
        assert_eq!(result, Err(UpstreamPortError::Stopped));
    }

    #[tokio::test]
    async fn send_command_builds_one_request_per_topic() {
        let (mut session, _handle, _events) = session();
        let mut sent: Vec<Message> = Vec::new();
        let mut sink = (&mut sent).sink_map_err(
            |never: std::convert::Infallible| -> tokio_tungstenite::tungstenite::Error {
                match never {}
            },
        );

        session
            .send_command(
                &mut sink,
                UpstreamCommand::Subscribe(vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]),
            )
            .await
            .unwrap();
        session
            .send_command(&mut sink, UpstreamCommand::Restore(Vec::new()))
            .await
            .unwrap();
        drop(sink);

        let requests: Vec<SubscriptionRequest> = sent
            .iter()
            .map(|msg| serde_json::from_str(msg.to_text().unwrap()).unwrap())
            .collect();

        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[0].params,
            vec!["spot@public.aggre.deals.v3.api.pb@100ms@BTCUSDT"]
        );
        assert_eq!(
            requests[1].params,
            vec!["spot@public.aggre.deals.v3.api.pb@100ms@ETHUSDT"]
        );
        assert_eq!(requests[2].method, SubscriptionMethod::Subscription);
        assert_eq!(
            requests[2].params,
            vec!["spot@public.aggre.deals.v3.api.pb@100ms@BTCUSDT"]
        );
        let ids: Vec<u64> = requests.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn undecodable_frame_emits_nothing() {
        let (session, _handle, mut events) = session();
        session.handle_frame(&[0xFF; 12]).await;
        session.handle_frame(br#"{"id":4,"code":0,"msg":"ok"}"#).await;

        let event = events.recv().await.unwrap();
        assert!(matches!(event, UpstreamEvent::Acknowledged(ack) if ack.id == Some(4)));
        assert!(events.try_recv().is_err());
        assert_eq!(session.state().get_messages_received(), 2);
    }
}
