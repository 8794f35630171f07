//! Binance WebSocket Message Shapes
//!
//! Wire-format helpers for the frames the exchange sends back on a stream
//! connection. The exchange owns the full schema; this module only needs
//! enough structure to classify frames and surface control-request acks.
//!
//! # Frame Shapes
//!
//! ## Control ack (subscribe/unsubscribe result)
//! ```json
//! {"result": null, "id": 1}
//! ```
//!
//! ## Error
//! ```json
//! {"error": {"code": 2, "msg": "Invalid request"}, "id": 1}
//! ```
//!
//! ## Data event (raw stream)
//! ```json
//! {"e": "trade", "s": "BTCUSDT", "p": "50000.1", ...}
//! ```
//!
//! ## Data event (combined stream envelope)
//! ```json
//! {"stream": "btcusdt@trade", "data": {"e": "trade", ...}}
//! ```

use serde::Deserialize;

// =============================================================================
// Classification
// =============================================================================

/// Classification of one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A market- or user-data event.
    Data,
    /// An ack for a subscribe/unsubscribe request.
    ControlResult,
    /// An exchange-reported error.
    Error,
}

/// Classify a parsed frame by probing its discriminating keys.
#[must_use]
pub fn classify(value: &serde_json::Value) -> FrameKind {
    if value.get("error").is_some() {
        FrameKind::Error
    } else if value.get("result").is_some() {
        FrameKind::ControlResult
    } else {
        FrameKind::Data
    }
}

// =============================================================================
// Typed Shapes
// =============================================================================

/// Ack for a subscribe/unsubscribe request.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlAck {
    /// Result payload; `null` on success.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// The request id the ack answers.
    pub id: u64,
}

impl ControlAck {
    /// Parse the ack out of a control-result frame.
    #[must_use]
    pub fn from_frame(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// Exchange error payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    /// Exchange error code.
    pub code: i64,
    /// Human-readable message.
    pub msg: String,
}

impl ErrorPayload {
    /// Extract the payload from a full error frame.
    #[must_use]
    pub fn from_frame(raw: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        serde_json::from_value(value.get("error")?.clone()).ok()
    }
}

/// Unwrap a combined-stream envelope, if the frame is one.
///
/// Combined-stream connections wrap every event as `{"stream","data"}`;
/// single-stream connections deliver the event bare. Downstream decoding
/// only cares about the event itself.
#[must_use]
pub fn unwrap_envelope(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut map)
            if map.contains_key("stream") && map.contains_key("data") =>
        {
            map.remove("data").unwrap_or(serde_json::Value::Null)
        }
        other => other,
    }
}
