//! Listen-Key REST Client
//!
//! Issues the three listen-key lifecycle calls (create via POST, keepalive
//! via PUT, delete via DELETE) against the endpoint row the owning stream
//! resolved. Stateless per call.
//!
//! Every call records the exchange's used-weight header and the HTTP
//! status into the process-wide [`ApiStatus`], so the rest of the system
//! can observe proximity to the exchange's rate limits. HTTP 418 and 429
//! are ban-risk conditions: logged at error severity and returned as a
//! dedicated variant, never panicked on; the caller owns backoff policy.
//!
//! All calls fail closed: network errors, JSON-decode errors, and missing
//! fields come back as [`ListenKeyError`] values, never as panics past the
//! client boundary.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::session::ListenKeySession;
use crate::infrastructure::binance::endpoints::Endpoints;
use crate::infrastructure::metrics;

/// Header carrying the rolling used-weight value on REST responses.
const USED_WEIGHT_HEADER: &str = "x-mbx-used-weight-1m";

/// Request timeout for listen-key calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Errors
// =============================================================================

/// Listen-key client errors.
#[derive(Debug, thiserror::Error)]
pub enum ListenKeyError {
    /// Isolated-margin listen keys are scoped to a symbol; creating one
    /// without a symbol is rejected locally, before any network call.
    #[error("isolated-margin listen keys require a symbol")]
    MissingSymbol,

    /// The HTTP request itself failed (connect, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body was not the JSON we expected.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The exchange signalled rate-limit trouble (418 teapot ban or 429).
    #[error("ban risk: exchange answered HTTP {status}; back off before retrying")]
    BanRisk {
        /// The offending status code.
        status: u16,
    },

    /// Any other non-success status.
    #[error("unexpected HTTP {status}: {body}")]
    Status {
        /// The status code.
        status: u16,
        /// Response body, truncated for logging.
        body: String,
    },
}

// =============================================================================
// API Status
// =============================================================================

/// Most recent REST-call observation, shared process-wide.
#[derive(Debug, Default)]
pub struct ApiStatus {
    inner: RwLock<ApiStatusSnapshot>,
}

/// Point-in-time view of the API status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApiStatusSnapshot {
    /// HTTP status of the most recent call.
    pub last_status: Option<u16>,
    /// Most recent used-weight header value.
    pub last_used_weight: Option<u32>,
    /// When the most recent call completed.
    pub last_call_at: Option<DateTime<Utc>>,
    /// The most recent call answered 418 or 429.
    pub ban_risk: bool,
}

impl ApiStatus {
    /// Create an empty status record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one REST call.
    pub fn record(&self, status: u16, used_weight: Option<u32>) {
        let mut inner = self.inner.write();
        inner.last_status = Some(status);
        inner.last_used_weight = used_weight;
        inner.last_call_at = Some(Utc::now());
        inner.ban_risk = matches!(status, 418 | 429);

        if let Some(weight) = used_weight {
            metrics::set_api_used_weight(f64::from(weight));
        }
    }

    /// Get a snapshot of the current status.
    #[must_use]
    pub fn snapshot(&self) -> ApiStatusSnapshot {
        self.inner.read().clone()
    }
}

// =============================================================================
// Listen-Key Client
// =============================================================================

#[derive(Debug, Deserialize)]
struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    listen_key: String,
}

/// REST client for the listen-key lifecycle.
#[derive(Clone)]
pub struct ListenKeyClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    api_key: String,
    expiry_window: Duration,
    status: Arc<ApiStatus>,
}

impl std::fmt::Debug for ListenKeyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenKeyClient")
            .field("endpoints", &self.endpoints)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl ListenKeyClient {
    /// Create a client for one endpoint row.
    ///
    /// # Errors
    ///
    /// Returns [`ListenKeyError::Http`] when the HTTP client cannot be
    /// built.
    pub fn new(
        endpoints: Endpoints,
        api_key: impl Into<String>,
        expiry_window: Duration,
    ) -> Result<Self, ListenKeyError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("binance-stream-manager/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoints,
            api_key: api_key.into(),
            expiry_window,
            status: Arc::new(ApiStatus::new()),
        })
    }

    /// The shared status record this client reports into.
    #[must_use]
    pub fn status(&self) -> Arc<ApiStatus> {
        Arc::clone(&self.status)
    }

    /// Create a listen key.
    ///
    /// `symbol` is required for isolated-margin rows and ignored
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ListenKeyError::MissingSymbol`] before any I/O when the
    /// row requires a symbol and none was given; otherwise any transport,
    /// status, or decode failure.
    pub async fn create(&self, symbol: Option<&str>) -> Result<ListenKeySession, ListenKeyError> {
        if self.endpoints.requires_symbol && symbol.is_none() {
            return Err(ListenKeyError::MissingSymbol);
        }

        let mut request = self
            .http
            .post(self.endpoints.listen_key_url())
            .header("X-MBX-APIKEY", &self.api_key);
        if self.endpoints.requires_symbol
            && let Some(symbol) = symbol
        {
            request = request.query(&[("symbol", symbol)]);
        }

        let body = self.finish("create", request.send().await?).await?;
        let parsed: ListenKeyResponse = serde_json::from_str(&body)?;

        tracing::info!("Listen key created");
        Ok(ListenKeySession::with_expiry(
            parsed.listen_key,
            self.expiry_window,
        ))
    }

    /// Refresh a listen key, pushing its expiry out by a full window.
    ///
    /// # Errors
    ///
    /// Returns [`ListenKeyError`] on transport or status failures;
    /// concurrent keepalives for the same key are idempotent server-side.
    pub async fn keepalive(&self, listen_key: &str) -> Result<(), ListenKeyError> {
        let request = self
            .http
            .put(self.endpoints.listen_key_url())
            .header("X-MBX-APIKEY", &self.api_key)
            .query(&[("listenKey", listen_key)]);

        self.finish("keepalive", request.send().await?).await?;
        tracing::debug!("Listen key refreshed");
        Ok(())
    }

    /// Revoke a listen key server-side.
    ///
    /// # Errors
    ///
    /// Returns [`ListenKeyError`] on transport or status failures.
    pub async fn delete(&self, listen_key: &str) -> Result<(), ListenKeyError> {
        let request = self
            .http
            .delete(self.endpoints.listen_key_url())
            .header("X-MBX-APIKEY", &self.api_key)
            .query(&[("listenKey", listen_key)]);

        self.finish("delete", request.send().await?).await?;
        tracing::info!("Listen key deleted");
        Ok(())
    }

    /// Record status/weight, enforce the ban-risk and status checks, and
    /// hand back the body.
    async fn finish(
        &self,
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<String, ListenKeyError> {
        let status = response.status().as_u16();
        let used_weight = response
            .headers()
            .get(USED_WEIGHT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        self.status.record(status, used_weight);
        metrics::record_listen_key_request(operation, status);

        if matches!(status, 418 | 429) {
            tracing::error!(
                operation,
                status,
                used_weight,
                "Exchange signalled ban risk on listen-key call"
            );
            return Err(ListenKeyError::BanRisk { status });
        }

        let body = response.text().await?;

        if !(200..300).contains(&status) {
            tracing::warn!(operation, status, "Listen-key call failed");
            let mut body = body;
            body.truncate(256);
            return Err(ListenKeyError::Status { status, body });
        }

        Ok(body)
    }
}
