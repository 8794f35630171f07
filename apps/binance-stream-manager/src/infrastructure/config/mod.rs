//! Configuration Module
//!
//! Configuration loading for the stream manager service.

mod settings;

pub use settings::{
    BufferSettings, ConfigError, Credentials, EndpointOverrides, KeepaliveSettings, ManagerConfig,
    ServerSettings, TelemetrySettings, WebSocketSettings,
};
