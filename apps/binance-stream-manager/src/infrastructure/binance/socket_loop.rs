//! Stream Socket Loop
//!
//! The per-stream coroutine: owns one physical connection, drains the
//! outbound payload queue under the send throttle, decodes inbound frames,
//! and reports terminal conditions back through the registry.
//!
//! The loop never retries its own connection. It finishes with a
//! [`LoopOutcome`] that the supervisor matches on: a clean stop, a crash
//! that wants a restart, or the discovery that a newer generation has
//! already superseded this instance. Nothing panics or propagates across
//! the loop/supervisor boundary.
//!
//! Suspension points are exactly: the socket send, the timed socket
//! receive, and the throttle's pacing sleep. The receive timeout bounds
//! how long an idle connection can keep the loop from observing
//! externally-set flags.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::domain::registry::StreamRegistry;
use crate::domain::stream::{Generation, StreamId};
use crate::infrastructure::binance::codec::FrameCodec;
use crate::infrastructure::binance::connection::{StreamConnection, WsMessage, WsStream};
use crate::infrastructure::binance::messages::{ControlAck, ErrorPayload};
use crate::infrastructure::binance::throttle::SendThrottle;
use crate::infrastructure::metrics::{self, EventClass};

// =============================================================================
// Outcome
// =============================================================================

/// How one socket-loop run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Clean, intentional stop; the supervisor has nothing left to do.
    Normal,
    /// A newer generation took over this stream id; this instance exited
    /// without touching shared state or the newer instance's socket.
    Superseded,
    /// The connection is gone and a restart has been requested.
    Crashed(CrashReason),
}

/// Why a socket loop crashed. Distinguished for diagnostics only; every
/// variant takes the same restart path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CrashReason {
    /// The initial connect or handshake failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The exchange closed with a policy violation (close code 1008),
    /// e.g. a listen key that was not renewed in time.
    #[error("policy violation close: {0}")]
    PolicyViolation(String),

    /// The transport died without a proper closing handshake (1006,
    /// reset, abrupt EOF) or a send/receive failed mid-connection.
    #[error("abnormal closure: {0}")]
    AbnormalClosure(String),

    /// The exchange closed the connection with some other close code.
    #[error("server closed connection: {0}")]
    ServerClosed(String),

    /// An external caller requested a crash-and-restart.
    #[error("crash requested")]
    CrashRequested,
}

impl CrashReason {
    /// Stable label for metrics.
    #[must_use]
    pub const fn metric_label(&self) -> &'static str {
        match self {
            Self::ConnectFailed(_) => "connect_failed",
            Self::PolicyViolation(_) => "policy_violation",
            Self::AbnormalClosure(_) => "abnormal_closure",
            Self::ServerClosed(_) => "server_closed",
            Self::CrashRequested => "crash_requested",
        }
    }
}

// =============================================================================
// Socket Loop
// =============================================================================

/// One socket-loop instance for one connection attempt.
pub struct SocketLoop {
    stream_id: StreamId,
    generation: Generation,
    registry: Arc<StreamRegistry>,
    connection: StreamConnection,
    codec: FrameCodec,
    throttle: SendThrottle,
    receive_timeout: Duration,
}

impl SocketLoop {
    /// Assemble a loop instance. `generation` must be the value the
    /// supervisor just minted for this attempt.
    #[must_use]
    pub const fn new(
        stream_id: StreamId,
        generation: Generation,
        registry: Arc<StreamRegistry>,
        connection: StreamConnection,
        codec: FrameCodec,
        throttle: SendThrottle,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            stream_id,
            generation,
            registry,
            connection,
            codec,
            throttle,
            receive_timeout,
        }
    }

    /// Run the loop until a terminal condition.
    pub async fn run(mut self) -> LoopOutcome {
        let listen_key = self.registry.listen_key(self.stream_id);
        let socket = match self.connection.open(listen_key.as_ref()).await {
            Ok(socket) => socket,
            Err(e) => return self.crash(CrashReason::ConnectFailed(e.to_string())),
        };

        self.registry.mark_running(self.stream_id);
        tracing::info!(
            stream_id = %self.stream_id,
            generation = self.generation,
            "Stream connected"
        );

        let (mut write, mut read) = socket.split();

        loop {
            // Externally-set flags first: an intentional stop beats
            // everything else and exits clean.
            if self.registry.is_stop_requested(self.stream_id) {
                let _ = write.send(WsMessage::Close(None)).await;
                self.registry.mark_stopped(self.stream_id);
                tracing::info!(stream_id = %self.stream_id, "Stream stopped");
                return LoopOutcome::Normal;
            }

            if self.registry.is_crash_requested(self.stream_id) {
                let _ = write.close().await;
                return self.crash(CrashReason::CrashRequested);
            }

            // A newer instance owns this stream id now. Exit without
            // closing anything: the socket in our hands is ours, but the
            // shared state is not, and a close would race the successor's
            // bookkeeping.
            if self.registry.current_generation(self.stream_id) != Some(self.generation) {
                tracing::debug!(
                    stream_id = %self.stream_id,
                    generation = self.generation,
                    "Superseded by a newer generation"
                );
                return LoopOutcome::Superseded;
            }

            if let Some(outcome) = self.send_next_payload(&mut write).await {
                return outcome;
            }

            match tokio::time::timeout(self.receive_timeout, read.next()).await {
                // No frame inside the window; re-enter the loop so the
                // flag checks above stay responsive.
                Err(_elapsed) => {}
                Ok(frame) => {
                    if let Some(outcome) = self.handle_frame(frame, &mut write).await {
                        return outcome;
                    }
                }
            }
        }
    }

    /// Drain at most one pending control message, paced by the throttle.
    async fn send_next_payload(
        &mut self,
        write: &mut SplitSink<WsStream, WsMessage>,
    ) -> Option<LoopOutcome> {
        let request = self.registry.pop_next_payload(self.stream_id)?;

        let json = match serde_json::to_string(&request) {
            Ok(json) => json,
            Err(e) => {
                // A control request that cannot serialize is dropped like
                // an undecodable inbound frame: logged, not fatal.
                tracing::error!(stream_id = %self.stream_id, error = %e, "Dropping unserializable control request");
                return None;
            }
        };

        self.throttle.acquire().await;
        if let Err(e) = write.send(WsMessage::Text(json.into())).await {
            return Some(self.crash(CrashReason::AbnormalClosure(format!("send failed: {e}"))));
        }

        metrics::record_control_sent();
        tracing::debug!(stream_id = %self.stream_id, request_id = request.id, "Control request sent");
        None
    }

    /// Process one receive result. Returns the loop outcome when the
    /// frame is terminal.
    async fn handle_frame(
        &mut self,
        frame: Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>>,
        write: &mut SplitSink<WsStream, WsMessage>,
    ) -> Option<LoopOutcome> {
        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                self.decode_and_buffer(text.as_str());
                None
            }
            Some(Ok(WsMessage::Ping(data))) => {
                if let Err(e) = write.send(WsMessage::Pong(data)).await {
                    return Some(
                        self.crash(CrashReason::AbnormalClosure(format!("pong failed: {e}"))),
                    );
                }
                None
            }
            Some(Ok(WsMessage::Close(close_frame))) => {
                if self.registry.is_stop_requested(self.stream_id) {
                    // The close is the far end acknowledging our stop.
                    self.registry.mark_stopped(self.stream_id);
                    return Some(LoopOutcome::Normal);
                }
                Some(self.crash(classify_close(close_frame)))
            }
            Some(Ok(_)) => None, // Binary/pong frames carry nothing for us.
            Some(Err(e)) => {
                if self.registry.is_stop_requested(self.stream_id) {
                    self.registry.mark_stopped(self.stream_id);
                    return Some(LoopOutcome::Normal);
                }
                Some(self.crash(CrashReason::AbnormalClosure(e.to_string())))
            }
            None => {
                if self.registry.is_stop_requested(self.stream_id) {
                    self.registry.mark_stopped(self.stream_id);
                    return Some(LoopOutcome::Normal);
                }
                Some(self.crash(CrashReason::AbnormalClosure(
                    "stream ended without close frame".to_string(),
                )))
            }
        }
    }

    /// Decode one text frame and move the event into the buffer.
    ///
    /// Decode failures drop the single offending frame and keep the
    /// stream alive.
    fn decode_and_buffer(&self, text: &str) {
        match self.codec.decode(self.stream_id, text) {
            Ok(event) => {
                let class = if event.is_error {
                    EventClass::Error
                } else if event.is_control_result {
                    EventClass::ControlResult
                } else {
                    EventClass::Data
                };
                metrics::record_event_received(class);

                if event.is_error {
                    // Structured code/msg when the frame has them, the raw
                    // text otherwise.
                    match ErrorPayload::from_frame(text) {
                        Some(error) => tracing::warn!(
                            stream_id = %self.stream_id,
                            code = error.code,
                            msg = %error.msg,
                            "Exchange reported an error"
                        ),
                        None => tracing::warn!(
                            stream_id = %self.stream_id,
                            frame = %text,
                            "Exchange reported an error frame"
                        ),
                    }
                } else if event.is_control_result
                    && let Some(ack) = ControlAck::from_frame(text)
                {
                    tracing::debug!(
                        stream_id = %self.stream_id,
                        request_id = ack.id,
                        "Control request acknowledged"
                    );
                }

                if !self.registry.push_event(self.stream_id, event) {
                    metrics::record_event_dropped("unregistered");
                }
            }
            Err(e) => {
                tracing::warn!(stream_id = %self.stream_id, error = %e, "Dropping undecodable frame");
                metrics::record_event_dropped("decode");
            }
        }
    }

    /// Mark the stream crashed, request a restart, and build the outcome.
    fn crash(&self, reason: CrashReason) -> LoopOutcome {
        tracing::warn!(
            stream_id = %self.stream_id,
            generation = self.generation,
            reason = %reason,
            "Stream crashed"
        );
        metrics::record_crash(reason.metric_label());
        self.registry.mark_crashed(self.stream_id, reason.to_string());
        self.registry.request_restart(self.stream_id);
        LoopOutcome::Crashed(reason)
    }
}

/// Classify a server-sent close frame.
fn classify_close(frame: Option<CloseFrame>) -> CrashReason {
    frame.map_or_else(
        || CrashReason::ServerClosed("close frame without code".to_string()),
        |frame| {
            let detail = format!("code {}: {}", u16::from(frame.code), frame.reason);
            match frame.code {
                CloseCode::Policy => CrashReason::PolicyViolation(detail),
                CloseCode::Abnormal => CrashReason::AbnormalClosure(detail),
                _ => CrashReason::ServerClosed(detail),
            }
        },
    )
}
