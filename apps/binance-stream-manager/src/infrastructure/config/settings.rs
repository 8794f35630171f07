//! Manager Configuration Settings
//!
//! Configuration types for the stream manager, loaded from environment
//! variables. The exchange documents no single right value for the receive
//! timeout or the outbound rate headroom, so both surface here as tunables
//! with conservative defaults.

use std::time::Duration;

use crate::domain::stream::{AccountType, Environment, OutputFormat};

/// Binance API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the API secret.
    #[must_use]
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Timeout on the inbound receive before the loop re-checks its flags.
    pub receive_timeout: Duration,
    /// Documented exchange ceiling on outbound control messages per second.
    pub outbound_cap_per_sec: u32,
    /// Safety margin subtracted from the ceiling before pacing sends.
    pub outbound_safety_margin: u32,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_secs(5),
            outbound_cap_per_sec: 5,
            outbound_safety_margin: 1,
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Listen-key keepalive settings.
#[derive(Debug, Clone)]
pub struct KeepaliveSettings {
    /// Exchange-side expiry window for an unrefreshed listen key.
    pub expiry_window: Duration,
    /// Interval between keepalive calls. Must stay strictly below the
    /// expiry window; half the window is the recommended value.
    pub keepalive_interval: Duration,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            expiry_window: Duration::from_secs(60 * 60),
            keepalive_interval: Duration::from_secs(30 * 60),
        }
    }
}

/// Event buffer settings.
#[derive(Debug, Clone)]
pub struct BufferSettings {
    /// Per-stream bounded ring capacity.
    pub event_buffer_capacity: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            event_buffer_capacity: 10_000,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (also serves Prometheus metrics).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Default OTLP exporter endpoint.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Default service name attached to exported spans.
const DEFAULT_SERVICE_NAME: &str = "binance-stream-manager";

/// Tracing export settings, consumed by `infrastructure::telemetry`.
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    /// Whether spans are exported over OTLP.
    pub otel_enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name attached to exported spans.
    pub service_name: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            otel_enabled: true,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

/// Endpoint base-URL overrides, mainly for testnet gateways and tests.
#[derive(Debug, Clone, Default)]
pub struct EndpointOverrides {
    /// Replace the WebSocket base URL resolved from the endpoint table.
    pub ws_base: Option<String>,
    /// Replace the REST base URL resolved from the endpoint table.
    pub rest_base: Option<String>,
}

/// Complete manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Exchange environment.
    pub environment: Environment,
    /// Account type (selects the endpoint-table row).
    pub account_type: AccountType,
    /// API credentials; required only when a user-data stream is enabled.
    pub credentials: Option<Credentials>,
    /// Markets the default market-data stream subscribes to.
    pub markets: Vec<String>,
    /// Channels the default market-data stream subscribes to.
    pub channels: Vec<String>,
    /// Output format handed to consumers.
    pub output_format: OutputFormat,
    /// Whether to run an authenticated user-data stream.
    pub user_data: bool,
    /// Server port settings.
    pub server: ServerSettings,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Listen-key keepalive settings.
    pub keepalive: KeepaliveSettings,
    /// Event buffer settings.
    pub buffers: BufferSettings,
    /// Endpoint base-URL overrides.
    pub endpoints: EndpointOverrides,
    /// Tracing export settings.
    pub telemetry: TelemetrySettings,
}

impl ManagerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing or empty, or
    /// when a user-data stream is requested without credentials.
    pub fn from_env() -> Result<Self, ConfigError> {
        let credentials = match (
            std::env::var("BINANCE_API_KEY").ok(),
            std::env::var("BINANCE_API_SECRET").ok(),
        ) {
            (Some(key), Some(secret)) => {
                if key.is_empty() {
                    return Err(ConfigError::EmptyValue("BINANCE_API_KEY".to_string()));
                }
                if secret.is_empty() {
                    return Err(ConfigError::EmptyValue("BINANCE_API_SECRET".to_string()));
                }
                Some(Credentials::new(key, secret))
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::MissingEnvVar("BINANCE_API_SECRET".to_string()));
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingEnvVar("BINANCE_API_KEY".to_string()));
            }
        };

        let environment = std::env::var("BINANCE_ENV")
            .map(|s| Environment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let account_type = std::env::var("BINANCE_ACCOUNT_TYPE")
            .map(|s| AccountType::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let markets = parse_env_list("BINANCE_MARKETS", &["btcusdt"]);
        let channels = parse_env_list("BINANCE_CHANNELS", &["trade"]);

        let output_format = std::env::var("STREAM_MANAGER_OUTPUT_FORMAT")
            .map(|s| OutputFormat::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let user_data = parse_env_bool("STREAM_MANAGER_USER_DATA", false);
        if user_data && credentials.is_none() {
            return Err(ConfigError::MissingEnvVar("BINANCE_API_KEY".to_string()));
        }

        let server = ServerSettings {
            health_port: parse_env_u16(
                "STREAM_MANAGER_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let websocket = WebSocketSettings {
            receive_timeout: parse_env_duration_secs(
                "STREAM_MANAGER_RECEIVE_TIMEOUT_SECS",
                WebSocketSettings::default().receive_timeout,
            ),
            outbound_cap_per_sec: parse_env_u32(
                "STREAM_MANAGER_OUTBOUND_CAP_PER_SEC",
                WebSocketSettings::default().outbound_cap_per_sec,
            ),
            outbound_safety_margin: parse_env_u32(
                "STREAM_MANAGER_OUTBOUND_SAFETY_MARGIN",
                WebSocketSettings::default().outbound_safety_margin,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "STREAM_MANAGER_RECONNECT_DELAY_INITIAL_MS",
                WebSocketSettings::default().reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "STREAM_MANAGER_RECONNECT_DELAY_MAX_SECS",
                WebSocketSettings::default().reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "STREAM_MANAGER_RECONNECT_DELAY_MULTIPLIER",
                WebSocketSettings::default().reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env_u32(
                "STREAM_MANAGER_MAX_RECONNECT_ATTEMPTS",
                WebSocketSettings::default().max_reconnect_attempts,
            ),
        };

        let keepalive = KeepaliveSettings {
            expiry_window: parse_env_duration_secs(
                "STREAM_MANAGER_LISTEN_KEY_WINDOW_SECS",
                KeepaliveSettings::default().expiry_window,
            ),
            keepalive_interval: parse_env_duration_secs(
                "STREAM_MANAGER_KEEPALIVE_INTERVAL_SECS",
                KeepaliveSettings::default().keepalive_interval,
            ),
        };

        let buffers = BufferSettings {
            event_buffer_capacity: parse_env_usize(
                "STREAM_MANAGER_EVENT_BUFFER_CAPACITY",
                BufferSettings::default().event_buffer_capacity,
            ),
        };

        let endpoints = EndpointOverrides {
            ws_base: std::env::var("STREAM_MANAGER_WS_BASE_URL").ok(),
            rest_base: std::env::var("STREAM_MANAGER_REST_BASE_URL").ok(),
        };

        let telemetry = TelemetrySettings {
            otel_enabled: parse_env_bool("OTEL_ENABLED", TelemetrySettings::default().otel_enabled),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string()),
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string()),
        };

        Ok(Self {
            environment,
            account_type,
            credentials,
            markets,
            channels,
            output_format,
            user_data,
            server,
            websocket,
            keepalive,
            buffers,
            endpoints,
            telemetry,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map_or(default, |v| {
            matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")
        })
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_env_list(key: &str, default: &[&str]) -> Vec<String> {
    std::env::var(key).ok().map_or_else(
        || default.iter().map(ToString::to_string).collect(),
        |v| {
            v.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        },
    )
}
