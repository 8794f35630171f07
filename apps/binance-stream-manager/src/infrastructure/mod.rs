//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the wire-level adapters behind the domain types:
//! the exchange WebSocket and REST clients, configuration loading, and
//! the observability surface.

/// Binance WebSocket and REST adapters.
pub mod binance;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
