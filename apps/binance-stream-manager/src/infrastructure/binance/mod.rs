//! Binance Adapters
//!
//! Wire-level implementation of the stream manager:
//!
//! - **endpoints**: `{account type, environment}` → host/path table
//! - **connection**: URL construction and the WebSocket handshake
//! - **socket loop**: the per-stream send/receive coroutine
//! - **listen key**: REST lifecycle client for user-data authorization
//! - **keepalive**: periodic listen-key refresh
//! - **supervisor**: restart policy and stream task ownership

pub mod codec;
pub mod connection;
pub mod endpoints;
pub mod keepalive;
pub mod listen_key;
pub mod messages;
pub mod reconnect;
pub mod socket_loop;
pub mod supervisor;
pub mod throttle;

pub use codec::{BinanceNormalizer, CodecError, FrameCodec};
pub use connection::{ConnectionError, StreamConnection, WsMessage, WsStream};
pub use endpoints::Endpoints;
pub use keepalive::KeepaliveService;
pub use listen_key::{ApiStatus, ApiStatusSnapshot, ListenKeyClient, ListenKeyError};
pub use messages::{ControlAck, ErrorPayload, FrameKind};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use socket_loop::{CrashReason, LoopOutcome, SocketLoop};
pub use supervisor::{StreamSupervisor, SupervisorError};
pub use throttle::SendThrottle;
