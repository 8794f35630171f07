//! Stream Connection Factory
//!
//! Builds the WebSocket URL for a stream descriptor and performs the
//! handshake. A thin opener: no retry logic lives here, and URL
//! construction fails fast, before any network I/O, when a user-data
//! stream is missing its listen key or holding an expired one.

use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::domain::session::ListenKeySession;
use crate::domain::stream::{ChannelName, DescriptorError, StreamDescriptor};
use crate::infrastructure::binance::endpoints::Endpoints;

/// The socket type produced by the handshake.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Outbound WebSocket message type, re-exported for the socket loop.
pub type WsMessage = Message;

/// Connection factory errors.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The descriptor itself is invalid.
    #[error("invalid stream descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    /// A user-data stream has no listen key to embed in the URL.
    #[error("user-data stream requires a listen key before connecting")]
    MissingListenKey,

    /// The listen key went unrefreshed past its expiry window.
    #[error("listen key expired (idle {idle_secs}s); create a fresh key")]
    ExpiredListenKey {
        /// Seconds since the last successful keepalive.
        idle_secs: u64,
    },

    /// The WebSocket handshake failed.
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Factory for one stream's physical connection.
#[derive(Debug, Clone)]
pub struct StreamConnection {
    descriptor: StreamDescriptor,
    endpoints: Endpoints,
}

impl StreamConnection {
    /// Create a connection factory for a descriptor.
    #[must_use]
    pub const fn new(descriptor: StreamDescriptor, endpoints: Endpoints) -> Self {
        Self {
            descriptor,
            endpoints,
        }
    }

    /// Build the request URL for the current connection attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the descriptor is invalid, or when
    /// a user-data stream has no listen key or an expired one. No network
    /// I/O happens before these checks pass.
    pub fn request_url(
        &self,
        listen_key: Option<&ListenKeySession>,
    ) -> Result<String, ConnectionError> {
        self.descriptor.validate()?;

        if self.descriptor.is_user_data() {
            let session = listen_key.ok_or(ConnectionError::MissingListenKey)?;
            if session.is_expired() {
                return Err(ConnectionError::ExpiredListenKey {
                    idle_secs: session.idle_for().as_secs(),
                });
            }
            return Ok(format!(
                "{}/ws/{}",
                self.endpoints.ws_base,
                session.listen_key()
            ));
        }

        let names = self.stream_names();
        if names.len() == 1 {
            Ok(format!("{}/ws/{}", self.endpoints.ws_base, names[0]))
        } else {
            Ok(format!(
                "{}/stream?streams={}",
                self.endpoints.ws_base,
                names.join("/")
            ))
        }
    }

    /// Exchange stream names for the descriptor's channel × market product.
    #[must_use]
    pub fn stream_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for channel in &self.descriptor.channels {
            let ChannelName::Market(name) = channel else {
                continue;
            };
            if channel.takes_symbol() {
                for market in &self.descriptor.markets {
                    names.push(format!("{}@{name}", market.to_lowercase()));
                }
            } else {
                names.push(name.clone());
            }
        }
        names
    }

    /// Open the connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] on URL-construction failures or a failed
    /// handshake.
    pub async fn open(
        &self,
        listen_key: Option<&ListenKeySession>,
    ) -> Result<WsStream, ConnectionError> {
        let url = self.request_url(listen_key)?;
        // The URL embeds the listen key for user-data streams; log the
        // host only.
        tracing::debug!(
            stream_id = %self.descriptor.stream_id,
            host = %self.endpoints.ws_base,
            "Opening stream connection"
        );

        let (ws_stream, _response) = connect_async(&url).await?;
        Ok(ws_stream)
    }
}
