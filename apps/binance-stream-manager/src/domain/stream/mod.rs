//! Stream Identity and Configuration Types
//!
//! Domain types describing one logical exchange subscription: which
//! channels and markets it covers, which endpoint family it resolves
//! against, and what shape the socket loop hands back to consumers.
//!
//! Lifecycle flags, the generation token, and the pending payload queue
//! live in the [`crate::domain::registry::StreamRegistry`], not on the
//! descriptor: the descriptor is immutable for its lifetime.

use serde::Serialize;
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier for one logical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(Uuid);

impl StreamId {
    /// Create a fresh random stream id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Monotonic token distinguishing successive connection attempts for the
/// same stream id. Assigned by the supervisor only; a socket loop holding
/// an older value than the registry's current one has been superseded.
pub type Generation = u64;

// =============================================================================
// Channels and Markets
// =============================================================================

/// A market identifier (instrument symbol), e.g. `btcusdt`.
pub type Market = String;

/// One subscription channel on a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelName {
    /// Public market-data channel, e.g. `trade`, `depth`, `kline_1m`,
    /// or an array channel like `!ticker@arr` that takes no symbol.
    Market(String),
    /// Authenticated user-data stream. Requires a listen key.
    UserData,
}

impl ChannelName {
    /// Create a market-data channel from its exchange name.
    #[must_use]
    pub fn market(name: impl Into<String>) -> Self {
        Self::Market(name.into())
    }

    /// Check whether this is the authenticated user-data channel.
    #[must_use]
    pub const fn is_user_data(&self) -> bool {
        matches!(self, Self::UserData)
    }

    /// Check whether the channel name must be combined with a symbol.
    ///
    /// Array channels (`!ticker@arr` and friends) already carry their own
    /// scope and subscribe without a symbol prefix.
    #[must_use]
    pub fn takes_symbol(&self) -> bool {
        match self {
            Self::Market(name) => !name.starts_with('!'),
            Self::UserData => false,
        }
    }
}

// =============================================================================
// Output Format
// =============================================================================

/// What the socket loop hands back for each inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// The raw frame text, untouched.
    RawText,
    /// The frame parsed into a generic JSON map.
    #[default]
    NormalizedMap,
    /// A fully normalized domain event from the normalization collaborator.
    DomainEvent,
}

impl OutputFormat {
    /// Parse an output format from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "raw" | "raw_text" => Self::RawText,
            "event" | "domain_event" => Self::DomainEvent,
            _ => Self::NormalizedMap,
        }
    }

    /// Get the format name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RawText => "raw_text",
            Self::NormalizedMap => "normalized_map",
            Self::DomainEvent => "domain_event",
        }
    }
}

// =============================================================================
// Endpoint Family
// =============================================================================

/// Binance account type, selecting the endpoint-table row for both the
/// WebSocket host and the listen-key resource path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccountType {
    /// Spot exchange.
    #[default]
    Spot,
    /// Cross margin.
    Margin,
    /// Isolated margin. Listen-key creation requires a symbol.
    IsolatedMargin,
    /// USD-M futures.
    UsdFutures,
}

impl AccountType {
    /// Parse an account type from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "margin" => Self::Margin,
            "isolated_margin" | "isolated-margin" => Self::IsolatedMargin,
            "futures" | "usd_futures" | "usd-futures" => Self::UsdFutures,
            _ => Self::Spot,
        }
    }

    /// Get the account type name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Margin => "margin",
            Self::IsolatedMargin => "isolated_margin",
            Self::UsdFutures => "usd_futures",
        }
    }
}

/// Exchange environment (production vs testnet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Environment {
    /// Production exchange.
    #[default]
    Production,
    /// Public testnet.
    Testnet,
}

impl Environment {
    /// Parse an environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "TESTNET" => Self::Testnet,
            _ => Self::Production,
        }
    }

    /// Check if this is the testnet environment.
    #[must_use]
    pub const fn is_testnet(&self) -> bool {
        matches!(self, Self::Testnet)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Testnet => "testnet",
        }
    }
}

// =============================================================================
// Lifecycle State
// =============================================================================

/// Desired/actual state of one stream, as tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// Registered but not yet running.
    #[default]
    Requested,
    /// Socket loop connected and active.
    Running,
    /// An intentional stop has been requested; the loop will exit cleanly.
    StopRequested,
    /// Cleanly stopped.
    Stopped,
    /// A forced crash-and-restart has been requested.
    CrashRequested,
    /// The connection died; the supervisor decides whether to restart.
    Crashed,
}

impl LifecycleState {
    /// Check whether the stream is on its way down or already down.
    #[must_use]
    pub const fn is_stopping_or_stopped(&self) -> bool {
        matches!(self, Self::StopRequested | Self::Stopped)
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Running => "running",
            Self::StopRequested => "stop_requested",
            Self::Stopped => "stopped",
            Self::CrashRequested => "crash_requested",
            Self::Crashed => "crashed",
        }
    }
}

// =============================================================================
// Stream Descriptor
// =============================================================================

/// Identity and configuration of one logical subscription.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    /// Unique stream id, immutable for the descriptor's lifetime.
    pub stream_id: StreamId,
    /// Channels this stream subscribes to, in order.
    pub channels: Vec<ChannelName>,
    /// Instrument identifiers; may be empty for channels that subscribe
    /// without a symbol and for user-data streams.
    pub markets: Vec<Market>,
    /// What the socket loop hands back per frame.
    pub output_format: OutputFormat,
    /// Endpoint-table row: account type.
    pub account_type: AccountType,
    /// Endpoint-table row: environment.
    pub environment: Environment,
}

impl StreamDescriptor {
    /// Create a market-data descriptor.
    #[must_use]
    pub fn market_data(
        channels: Vec<ChannelName>,
        markets: Vec<Market>,
        output_format: OutputFormat,
    ) -> Self {
        Self {
            stream_id: StreamId::new(),
            channels,
            markets,
            output_format,
            account_type: AccountType::default(),
            environment: Environment::default(),
        }
    }

    /// Create a user-data descriptor for the given account type.
    #[must_use]
    pub fn user_data(account_type: AccountType, output_format: OutputFormat) -> Self {
        Self {
            stream_id: StreamId::new(),
            channels: vec![ChannelName::UserData],
            markets: vec![],
            output_format,
            account_type,
            environment: Environment::default(),
        }
    }

    /// Set the environment (builder style).
    #[must_use]
    pub const fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Check whether any channel on this stream is the user-data stream.
    #[must_use]
    pub fn is_user_data(&self) -> bool {
        self.channels.iter().any(ChannelName::is_user_data)
    }

    /// Validate the channel/market combination.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] when the descriptor has no channels, or
    /// when a symbol-scoped channel is configured without any market.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.channels.is_empty() {
            return Err(DescriptorError::NoChannels);
        }

        let needs_symbol = self.channels.iter().any(ChannelName::takes_symbol);
        if needs_symbol && self.markets.is_empty() {
            return Err(DescriptorError::MissingMarkets);
        }

        Ok(())
    }
}

/// Descriptor validation errors.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    /// The descriptor names no channels at all.
    #[error("stream descriptor has no channels")]
    NoChannels,
    /// A symbol-scoped channel was configured without markets.
    #[error("symbol-scoped channels require at least one market")]
    MissingMarkets,
}

// =============================================================================
// Control Requests
// =============================================================================

/// Method of an outbound control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMethod {
    /// Add stream names to the connection.
    Subscribe,
    /// Remove stream names from the connection.
    Unsubscribe,
}

/// One pending outbound control message.
///
/// # Wire Format (JSON)
/// ```json
/// {"method": "SUBSCRIBE", "params": ["btcusdt@trade"], "id": 1}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlRequest {
    /// SUBSCRIBE or UNSUBSCRIBE.
    pub method: ControlMethod,
    /// Stream names the request applies to.
    pub params: Vec<String>,
    /// Request id echoed back in the exchange's ack.
    pub id: u64,
}

impl ControlRequest {
    /// Create a subscribe request.
    #[must_use]
    pub const fn subscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: ControlMethod::Subscribe,
            params,
            id,
        }
    }

    /// Create an unsubscribe request.
    #[must_use]
    pub const fn unsubscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: ControlMethod::Unsubscribe,
            params,
            id,
        }
    }
}
