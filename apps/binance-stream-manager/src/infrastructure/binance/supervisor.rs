//! Stream Supervisor
//!
//! Spawns one socket-loop task per stream, observes each run's
//! [`LoopOutcome`], and applies restart policy. The split of concerns is
//! deliberate: the loop owns the hot path and never retries; the
//! supervisor owns backoff, generation assignment, and listen-key
//! provisioning, all outside the hot loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::application::ports::Normalizer;
use crate::domain::registry::StreamRegistry;
use crate::domain::stream::{DescriptorError, StreamDescriptor, StreamId};
use crate::infrastructure::binance::codec::FrameCodec;
use crate::infrastructure::binance::connection::StreamConnection;
use crate::infrastructure::binance::endpoints::Endpoints;
use crate::infrastructure::binance::listen_key::{ListenKeyClient, ListenKeyError};
use crate::infrastructure::binance::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::infrastructure::binance::socket_loop::{CrashReason, LoopOutcome, SocketLoop};
use crate::infrastructure::binance::throttle::SendThrottle;
use crate::infrastructure::config::{EndpointOverrides, WebSocketSettings};
use crate::infrastructure::metrics;

/// Supervisor errors.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The descriptor failed validation.
    #[error("invalid stream descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    /// A user-data stream was requested but no credentials are configured.
    #[error("user-data streams require API credentials")]
    MissingCredentials,
}

/// Spawns, restarts, and stops stream socket loops.
pub struct StreamSupervisor {
    registry: Arc<StreamRegistry>,
    listen_key_client: Option<Arc<ListenKeyClient>>,
    normalizer: Arc<dyn Normalizer>,
    websocket: WebSocketSettings,
    overrides: EndpointOverrides,
    cancel: CancellationToken,
}

impl StreamSupervisor {
    /// Create a supervisor.
    ///
    /// `listen_key_client` may be `None` for market-data-only
    /// deployments; starting a user-data stream then fails fast.
    #[must_use]
    pub fn new(
        registry: Arc<StreamRegistry>,
        listen_key_client: Option<Arc<ListenKeyClient>>,
        normalizer: Arc<dyn Normalizer>,
        websocket: WebSocketSettings,
        overrides: EndpointOverrides,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            listen_key_client,
            normalizer,
            websocket,
            overrides,
            cancel,
        }
    }

    /// The registry this supervisor reads and mutates.
    #[must_use]
    pub fn registry(&self) -> Arc<StreamRegistry> {
        Arc::clone(&self.registry)
    }

    /// Register a stream and spawn its supervising task.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError`] when the descriptor is invalid or a
    /// user-data stream is requested without credentials.
    pub fn start_stream(
        self: Arc<Self>,
        descriptor: StreamDescriptor,
    ) -> Result<StreamId, SupervisorError> {
        descriptor.validate()?;
        if descriptor.is_user_data() && self.listen_key_client.is_none() {
            return Err(SupervisorError::MissingCredentials);
        }

        let stream_id = self.registry.register(descriptor);
        tracing::info!(stream_id = %stream_id, "Stream registered");

        tokio::spawn(async move {
            self.run_stream(stream_id).await;
        });

        Ok(stream_id)
    }

    /// Request an intentional stop and revoke the listen key server-side.
    ///
    /// Idempotent: a second call on an already-stopping stream is a no-op
    /// and issues no duplicate DELETE.
    pub async fn stop_stream(&self, stream_id: StreamId) -> bool {
        if !self.registry.request_stop(stream_id) {
            return false;
        }
        tracing::info!(stream_id = %stream_id, "Stream stop requested");

        if let Some(session) = self.registry.take_listen_key(stream_id)
            && let Some(client) = &self.listen_key_client
            && let Err(e) = client.delete(session.listen_key()).await
        {
            // The key expires server-side on its own; a failed revoke is
            // not worth failing the stop over.
            tracing::warn!(stream_id = %stream_id, error = %e, "Listen key revoke failed");
        }

        true
    }

    /// Stop every registered stream.
    pub async fn stop_all(&self) {
        for snapshot in self.registry.snapshot() {
            self.stop_stream(snapshot.stream_id).await;
        }
    }

    /// Supervising task for one stream: run a loop instance, match its
    /// outcome, back off, repeat.
    async fn run_stream(self: Arc<Self>, stream_id: StreamId) {
        let Some(descriptor) = self.registry.descriptor(stream_id) else {
            return;
        };
        let endpoints = Endpoints::resolve(descriptor.account_type, descriptor.environment)
            .with_overrides(&self.overrides);
        let mut policy = ReconnectPolicy::new(ReconnectConfig::from_settings(&self.websocket));

        loop {
            if self.cancel.is_cancelled() || self.registry.is_stop_requested(stream_id) {
                self.registry.mark_stopped(stream_id);
                break;
            }

            if descriptor.is_user_data()
                && let Err(e) = self.ensure_listen_key(stream_id, &descriptor).await
            {
                tracing::warn!(stream_id = %stream_id, error = %e, "Listen key provisioning failed");
                self.registry
                    .mark_crashed(stream_id, format!("listen key provisioning: {e}"));
                if self.backoff(&mut policy, stream_id).await {
                    continue;
                }
                break;
            }

            // Minting the next generation retires any instance still
            // holding the previous one.
            let Some(generation) = self.registry.next_generation(stream_id) else {
                break;
            };
            self.registry.take_restart_request(stream_id);

            let socket_loop = SocketLoop::new(
                stream_id,
                generation,
                Arc::clone(&self.registry),
                StreamConnection::new(descriptor.clone(), endpoints.clone()),
                FrameCodec::new(descriptor.output_format, Arc::clone(&self.normalizer)),
                SendThrottle::new(
                    self.websocket.outbound_cap_per_sec,
                    self.websocket.outbound_safety_margin,
                ),
                self.websocket.receive_timeout,
            );

            match socket_loop.run().await {
                LoopOutcome::Normal => break,
                LoopOutcome::Superseded => {
                    // A newer supervising task owns this stream id.
                    return;
                }
                LoopOutcome::Crashed(reason) => {
                    if matches!(reason, CrashReason::PolicyViolation(_)) {
                        // Policy closes usually mean the key went stale;
                        // force a fresh one on the next attempt.
                        self.registry.take_listen_key(stream_id);
                    }
                    if self.backoff(&mut policy, stream_id).await {
                        metrics::record_restart();
                        continue;
                    }
                    break;
                }
            }
        }

        metrics::set_streams_running(to_f64(self.registry.stats().running));
    }

    /// Make sure the stream holds an unexpired listen key, creating one
    /// when needed.
    async fn ensure_listen_key(
        &self,
        stream_id: StreamId,
        descriptor: &StreamDescriptor,
    ) -> Result<(), ListenKeyError> {
        let Some(client) = &self.listen_key_client else {
            // Guarded at start_stream; nothing to provision without it.
            return Ok(());
        };

        if self
            .registry
            .listen_key(stream_id)
            .is_some_and(|s| !s.is_expired())
        {
            return Ok(());
        }

        // Discard whatever stale session remains before minting.
        self.registry.take_listen_key(stream_id);

        let symbol = descriptor.markets.first().map(String::as_str);
        let session = client.create(symbol).await?;
        self.registry.set_listen_key(stream_id, session);
        Ok(())
    }

    /// Sleep out the next backoff delay. Returns `false` when the stream
    /// should not be restarted (budget exhausted, shutdown, or stop).
    async fn backoff(&self, policy: &mut ReconnectPolicy, stream_id: StreamId) -> bool {
        let Some(delay) = policy.next_delay() else {
            tracing::error!(
                stream_id = %stream_id,
                attempts = policy.attempt_count(),
                "Maximum restart attempts exceeded; giving up on stream"
            );
            return false;
        };

        tracing::info!(
            stream_id = %stream_id,
            attempt = policy.attempt_count(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Restarting stream after backoff"
        );

        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => !self.registry.is_stop_requested(stream_id),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(value: usize) -> f64 {
    value as f64
}
