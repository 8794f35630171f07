#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Binance Stream Manager
//!
//! A streaming service that maintains one or more concurrent connections
//! to Binance's WebSocket feeds, translates inbound JSON frames into a
//! normalized event model, and manages the listen-key REST lifecycle that
//! keeps user-data streams authorized.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Stream identity, the normalized event model, and the
//!   shared registry
//!   - `stream`: Descriptors, channels, lifecycle states, generations
//!   - `event`: Normalized events and the market-event shapes
//!   - `session`: Listen-key session tracking
//!   - `registry`: Shared state between loops, supervisor, and consumers
//!
//! - **Application**: Contracts for external collaborators
//!   - `ports`: The normalization collaborator's interface
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: WebSocket socket loops, supervisor, listen-key REST
//!   - `config`: Environment-driven configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Binance WS ──► Socket Loop ──► Stream Registry ──► Consumers
//!                (per stream)     (ring buffers)
//!                     ▲
//!                Supervisor ◄── LoopOutcome (restart w/ backoff)
//!                     ▲
//!            Listen-Key Client ◄── Keepalive Service (user data)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types and shared state.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::event::{
    DecodedPayload, DepthEvent, DepthLevel, MarketEvent, NormalizedEvent, TradeEvent,
};
pub use domain::registry::{RegistryStats, StreamRegistry, StreamSnapshot};
pub use domain::session::ListenKeySession;
pub use domain::stream::{
    AccountType, ChannelName, ControlMethod, ControlRequest, DescriptorError, Environment,
    Generation, LifecycleState, OutputFormat, StreamDescriptor, StreamId,
};

// Collaborator contract
pub use application::ports::{NormalizeError, Normalizer};

// Infrastructure config
pub use infrastructure::config::{
    BufferSettings, ConfigError, Credentials, EndpointOverrides, KeepaliveSettings, ManagerConfig,
    ServerSettings, TelemetrySettings, WebSocketSettings,
};

// Binance adapters (for integration tests)
pub use infrastructure::binance::{
    ApiStatusSnapshot, BinanceNormalizer, CrashReason, Endpoints, FrameCodec, KeepaliveService,
    ListenKeyClient, ListenKeyError, LoopOutcome, SendThrottle, SocketLoop, StreamConnection,
    StreamSupervisor, SupervisorError,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryGuard, init as init_telemetry};
