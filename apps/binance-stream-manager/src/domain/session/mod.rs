//! Listen-Key Session Tracking
//!
//! A listen key is the exchange-issued ephemeral token authorizing a
//! user-data WebSocket stream. The exchange expires it after a fixed
//! inactivity window (60 minutes) unless refreshed, so the session records
//! when it was created and when the last successful keepalive happened.

use std::time::{Duration, Instant};

/// Default exchange-side expiry window for an unrefreshed listen key.
pub const DEFAULT_EXPIRY_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Lifecycle of one user-data-stream authorization token.
#[derive(Debug, Clone)]
pub struct ListenKeySession {
    listen_key: String,
    created_at: Instant,
    last_keepalive_at: Instant,
    valid_for: Duration,
}

impl ListenKeySession {
    /// Create a session for a freshly issued listen key.
    #[must_use]
    pub fn new(listen_key: impl Into<String>) -> Self {
        Self::with_expiry(listen_key, DEFAULT_EXPIRY_WINDOW)
    }

    /// Create a session with a custom expiry window.
    #[must_use]
    pub fn with_expiry(listen_key: impl Into<String>, valid_for: Duration) -> Self {
        let now = Instant::now();
        Self {
            listen_key: listen_key.into(),
            created_at: now,
            last_keepalive_at: now,
            valid_for,
        }
    }

    /// Get the listen key value.
    #[must_use]
    pub fn listen_key(&self) -> &str {
        &self.listen_key
    }

    /// Record a successful keepalive.
    pub fn touch(&mut self) {
        self.last_keepalive_at = Instant::now();
    }

    /// Time since the last successful keepalive (or creation).
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_keepalive_at.elapsed()
    }

    /// Age of the session since the key was issued.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Check whether the exchange must be assumed to have expired the key.
    ///
    /// An expired session must never be used to build a stream URL; the
    /// owning stream has to be restarted with a freshly created key.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.idle_for() >= self.valid_for
    }
}

impl std::fmt::Display for ListenKeySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The key authorizes account data; keep it out of logs.
        write!(f, "ListenKeySession(age={}s)", self.age().as_secs())
    }
}
