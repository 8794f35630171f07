//! Normalized Event Model
//!
//! The decoded form of one inbound WebSocket frame. Every frame the socket
//! loop receives produces exactly one [`NormalizedEvent`], immutable after
//! creation, whose ownership moves into the registry's per-stream buffer.
//!
//! The fully normalized [`MarketEvent`] shape intentionally covers only the
//! common payloads (trades, depth diffs); everything else is carried as a
//! generic map so downstream code can still route on it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::stream::StreamId;

// =============================================================================
// Decoded Payload
// =============================================================================

/// Frame content in the shape the owning descriptor asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    /// The frame text, untouched.
    Raw(String),
    /// The frame parsed into a generic JSON map.
    Map(serde_json::Value),
    /// A fully normalized domain event.
    Event(MarketEvent),
}

// =============================================================================
// Normalized Event
// =============================================================================

/// One inbound frame after decoding and classification.
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    /// The stream this frame arrived on.
    pub stream_id: StreamId,
    /// When the socket loop received the frame.
    pub received_at: DateTime<Utc>,
    /// Original frame text, retained for diagnostics.
    pub raw_payload: String,
    /// Decoded content per the descriptor's output format.
    pub payload: DecodedPayload,
    /// The exchange reported an error in this frame.
    pub is_error: bool,
    /// This frame acknowledges a subscribe/unsubscribe request.
    pub is_control_result: bool,
}

impl NormalizedEvent {
    /// Create a data event.
    #[must_use]
    pub fn data(stream_id: StreamId, raw_payload: String, payload: DecodedPayload) -> Self {
        Self {
            stream_id,
            received_at: Utc::now(),
            raw_payload,
            payload,
            is_error: false,
            is_control_result: false,
        }
    }

    /// Create an error event.
    #[must_use]
    pub fn error(stream_id: StreamId, raw_payload: String, payload: DecodedPayload) -> Self {
        Self {
            is_error: true,
            ..Self::data(stream_id, raw_payload, payload)
        }
    }

    /// Create a control-result (subscribe/unsubscribe ack) event.
    #[must_use]
    pub fn control_result(
        stream_id: StreamId,
        raw_payload: String,
        payload: DecodedPayload,
    ) -> Self {
        Self {
            is_control_result: true,
            ..Self::data(stream_id, raw_payload, payload)
        }
    }
}

// =============================================================================
// Market Events
// =============================================================================

/// A normalized exchange event, independent of wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    /// A single executed trade.
    Trade(TradeEvent),
    /// An order-book diff.
    Depth(DepthEvent),
    /// Anything the normalizer does not map; carries the parsed frame.
    Other(serde_json::Value),
}

/// One executed trade.
///
/// # Wire Format (JSON)
/// ```json
/// {"e":"trade","E":1710000000000,"s":"BTCUSDT","p":"50000.1","q":"0.5",
///  "T":1710000000000,"m":true}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Trading pair symbol.
    #[serde(rename = "s")]
    pub symbol: String,

    /// Trade price.
    #[serde(rename = "p")]
    pub price: Decimal,

    /// Trade quantity.
    #[serde(rename = "q")]
    pub quantity: Decimal,

    /// Trade time (milliseconds since Unix epoch).
    #[serde(rename = "T")]
    pub trade_time: i64,

    /// Whether the buyer is the maker side.
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

/// One order-book diff.
///
/// Consumers apply these strictly in arrival order; the update-id range
/// lets them detect gaps after a reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthEvent {
    /// Trading pair symbol.
    #[serde(rename = "s")]
    pub symbol: String,

    /// First update id in this diff.
    #[serde(rename = "U")]
    pub first_update_id: i64,

    /// Final update id in this diff.
    #[serde(rename = "u")]
    pub final_update_id: i64,

    /// Bid levels to update.
    #[serde(rename = "b")]
    pub bids: Vec<DepthLevel>,

    /// Ask levels to update.
    #[serde(rename = "a")]
    pub asks: Vec<DepthLevel>,
}

/// One price level of an order-book diff. Quantity zero removes the level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel(pub Decimal, pub Decimal);

impl DepthLevel {
    /// Price of the level.
    #[must_use]
    pub const fn price(&self) -> Decimal {
        self.0
    }

    /// Quantity at the level.
    #[must_use]
    pub const fn quantity(&self) -> Decimal {
        self.1
    }
}
