//! Endpoint Table
//!
//! Maps `{account type, environment}` to the WebSocket host, the REST host,
//! and the listen-key resource path, resolved once when a stream is set up
//! instead of branching on exchange identity throughout the code.
//!
//! Binance runs no separate margin testnet; the margin rows resolve to the
//! spot testnet hosts with the margin resource paths.

use crate::domain::stream::{AccountType, Environment};
use crate::infrastructure::config::EndpointOverrides;

/// Resolved endpoints for one `{account type, environment}` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// WebSocket base URL, without a trailing slash.
    pub ws_base: String,
    /// REST base URL, without a trailing slash.
    pub rest_base: String,
    /// Listen-key resource path on the REST host.
    pub listen_key_path: &'static str,
    /// Whether listen-key creation requires a symbol (isolated margin).
    pub requires_symbol: bool,
}

impl Endpoints {
    /// Resolve the endpoint row for an account type and environment.
    #[must_use]
    pub fn resolve(account_type: AccountType, environment: Environment) -> Self {
        let (ws_base, rest_base) = match (account_type, environment) {
            (
                AccountType::Spot | AccountType::Margin | AccountType::IsolatedMargin,
                Environment::Production,
            ) => ("wss://stream.binance.com:9443", "https://api.binance.com"),
            (
                AccountType::Spot | AccountType::Margin | AccountType::IsolatedMargin,
                Environment::Testnet,
            ) => (
                "wss://stream.testnet.binance.vision",
                "https://testnet.binance.vision",
            ),
            (AccountType::UsdFutures, Environment::Production) => {
                ("wss://fstream.binance.com", "https://fapi.binance.com")
            }
            (AccountType::UsdFutures, Environment::Testnet) => (
                "wss://stream.binancefuture.com",
                "https://testnet.binancefuture.com",
            ),
        };

        let (listen_key_path, requires_symbol) = match account_type {
            AccountType::Spot => ("/api/v3/userDataStream", false),
            AccountType::Margin => ("/sapi/v1/userDataStream", false),
            AccountType::IsolatedMargin => ("/sapi/v1/userDataStream/isolated", true),
            AccountType::UsdFutures => ("/fapi/v1/listenKey", false),
        };

        Self {
            ws_base: ws_base.to_string(),
            rest_base: rest_base.to_string(),
            listen_key_path,
            requires_symbol,
        }
    }

    /// Apply configured base-URL overrides on top of the resolved row.
    #[must_use]
    pub fn with_overrides(mut self, overrides: &EndpointOverrides) -> Self {
        if let Some(ws_base) = &overrides.ws_base {
            self.ws_base = ws_base.trim_end_matches('/').to_string();
        }
        if let Some(rest_base) = &overrides.rest_base {
            self.rest_base = rest_base.trim_end_matches('/').to_string();
        }
        self
    }

    /// Full URL of the listen-key resource.
    #[must_use]
    pub fn listen_key_url(&self) -> String {
        format!("{}{}", self.rest_base, self.listen_key_path)
    }
}
