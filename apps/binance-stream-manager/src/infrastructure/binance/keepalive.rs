//! Listen-Key Keepalive Service
//!
//! Refreshes the listen key of every active user-data stream on a fixed
//! interval, out-of-band from the socket loops. The interval must stay
//! strictly below the exchange's expiry window; the default is half of it.
//!
//! A failed refresh is retried at the next tick. Once a session has gone
//! unrefreshed past the expiry window it is unusable, so the service
//! requests a crash-and-restart: the supervisor will mint a fresh key
//! before the next connection attempt.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::domain::registry::StreamRegistry;
use crate::domain::stream::StreamId;
use crate::infrastructure::binance::listen_key::{ListenKeyClient, ListenKeyError};

/// Periodic keepalive driver for all user-data streams.
pub struct KeepaliveService {
    registry: Arc<StreamRegistry>,
    client: Arc<ListenKeyClient>,
    interval: Duration,
    cancel: CancellationToken,
}

impl KeepaliveService {
    /// Create the service.
    #[must_use]
    pub const fn new(
        registry: Arc<StreamRegistry>,
        client: Arc<ListenKeyClient>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            client,
            interval,
            cancel,
        }
    }

    /// Run until cancelled.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; consume it so the first
        // real keepalive lands one full interval after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Keepalive service cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    self.refresh_all().await;
                }
            }
        }
    }

    /// Refresh every user-data stream that currently holds a session.
    async fn refresh_all(&self) {
        for stream_id in self.registry.user_data_streams() {
            if self.registry.is_stop_requested(stream_id) {
                continue;
            }
            self.refresh_one(stream_id).await;
        }
    }

    async fn refresh_one(&self, stream_id: StreamId) {
        let Some(session) = self.registry.listen_key(stream_id) else {
            return;
        };

        match self.client.keepalive(session.listen_key()).await {
            Ok(()) => {
                self.registry.touch_listen_key(stream_id);
                tracing::debug!(stream_id = %stream_id, "Listen key kept alive");
            }
            Err(ListenKeyError::BanRisk { status }) => {
                // Backing off is the caller's job; the next tick retries
                // and the window still has headroom at half-interval.
                tracing::error!(
                    stream_id = %stream_id,
                    status,
                    "Keepalive hit a ban-risk response; retrying next tick"
                );
            }
            Err(e) => {
                tracing::warn!(stream_id = %stream_id, error = %e, "Keepalive failed");

                let expired = self
                    .registry
                    .listen_key(stream_id)
                    .is_some_and(|s| s.is_expired());
                if expired {
                    tracing::warn!(
                        stream_id = %stream_id,
                        "Listen key expired without a successful keepalive; forcing restart"
                    );
                    self.registry.request_crash(stream_id);
                }
            }
        }
    }
}
