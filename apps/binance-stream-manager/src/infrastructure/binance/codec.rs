//! Stream Frame Codec
//!
//! Decodes inbound frames into [`NormalizedEvent`]s per the owning
//! descriptor's output format: pass-through text, a generic parsed map, or
//! delegation to the normalization collaborator for a full domain event.
//!
//! Classification (error / control result / data) always happens,
//! independent of the output format, so consumers can route acks and
//! exchange errors without re-parsing.

use std::sync::Arc;

use crate::application::ports::{NormalizeError, Normalizer};
use crate::domain::event::{DecodedPayload, MarketEvent, NormalizedEvent};
use crate::domain::stream::{OutputFormat, StreamId};
use crate::infrastructure::binance::messages::{self, FrameKind};

/// Codec errors. Any of these drops the single offending frame; none of
/// them is connection-fatal.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame was not valid JSON.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The normalization collaborator rejected the frame.
    #[error("normalize error: {0}")]
    Normalize(#[from] NormalizeError),
}

/// Per-stream frame decoder.
#[derive(Clone)]
pub struct FrameCodec {
    output_format: OutputFormat,
    normalizer: Arc<dyn Normalizer>,
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("output_format", &self.output_format)
            .finish_non_exhaustive()
    }
}

impl FrameCodec {
    /// Create a codec for one stream.
    #[must_use]
    pub fn new(output_format: OutputFormat, normalizer: Arc<dyn Normalizer>) -> Self {
        Self {
            output_format,
            normalizer,
        }
    }

    /// Decode one inbound text frame into exactly one event.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] when the frame is not valid JSON or the
    /// normalization collaborator rejects it. The caller logs and drops
    /// the frame; the stream keeps running.
    pub fn decode(&self, stream_id: StreamId, text: &str) -> Result<NormalizedEvent, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let kind = messages::classify(&value);

        let payload = match (kind, self.output_format) {
            (_, OutputFormat::RawText) => DecodedPayload::Raw(text.to_string()),
            // Control and error frames never take the normalizer path.
            (FrameKind::ControlResult | FrameKind::Error, _) => DecodedPayload::Map(value),
            (FrameKind::Data, OutputFormat::NormalizedMap) => {
                DecodedPayload::Map(messages::unwrap_envelope(value))
            }
            (FrameKind::Data, OutputFormat::DomainEvent) => {
                DecodedPayload::Event(self.normalizer.normalize(text)?)
            }
        };

        let raw = text.to_string();
        Ok(match kind {
            FrameKind::Data => NormalizedEvent::data(stream_id, raw, payload),
            FrameKind::ControlResult => NormalizedEvent::control_result(stream_id, raw, payload),
            FrameKind::Error => NormalizedEvent::error(stream_id, raw, payload),
        })
    }
}

// =============================================================================
// Default Normalizer
// =============================================================================

/// Basic Binance normalizer covering the common event shapes.
///
/// Trades and depth diffs become typed events; everything else is carried
/// as [`MarketEvent::Other`] with the parsed frame, so unknown channels
/// still flow through instead of failing.
#[derive(Debug, Default, Clone)]
pub struct BinanceNormalizer;

impl BinanceNormalizer {
    /// Create the default normalizer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Normalizer for BinanceNormalizer {
    fn normalize(&self, raw: &str) -> Result<MarketEvent, NormalizeError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let event = messages::unwrap_envelope(value);

        match event.get("e").and_then(|v| v.as_str()) {
            Some("trade") => {
                let trade = serde_json::from_value(event)
                    .map_err(|e| NormalizeError::UnrecognizedShape(format!("trade: {e}")))?;
                Ok(MarketEvent::Trade(trade))
            }
            Some("depthUpdate") => {
                let depth = serde_json::from_value(event)
                    .map_err(|e| NormalizeError::UnrecognizedShape(format!("depthUpdate: {e}")))?;
                Ok(MarketEvent::Depth(depth))
            }
            _ => Ok(MarketEvent::Other(event)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRADE_FRAME: &str = r#"{"e":"trade","E":1710000000000,"s":"BTCUSDT","p":"50000.1","q":"0.5","T":1710000000001,"m":false}"#;

    fn codec(format: OutputFormat) -> FrameCodec {
        FrameCodec::new(format, Arc::new(BinanceNormalizer::new()))
    }

    #[test]
    fn raw_text_passes_frame_through() {
        let id = StreamId::new();
        let event = codec(OutputFormat::RawText).decode(id, TRADE_FRAME).unwrap();

        assert!(!event.is_error && !event.is_control_result);
        assert_eq!(event.raw_payload, TRADE_FRAME);
        assert!(matches!(event.payload, DecodedPayload::Raw(ref s) if s == TRADE_FRAME));
    }

    #[test]
    fn normalized_map_parses_frame() {
        let id = StreamId::new();
        let event = codec(OutputFormat::NormalizedMap)
            .decode(id, TRADE_FRAME)
            .unwrap();

        match event.payload {
            DecodedPayload::Map(map) => {
                assert_eq!(map.get("s").and_then(|v| v.as_str()), Some("BTCUSDT"));
            }
            other => panic!("expected Map payload, got {other:?}"),
        }
    }

    #[test]
    fn domain_event_normalizes_trade() {
        let id = StreamId::new();
        let event = codec(OutputFormat::DomainEvent)
            .decode(id, TRADE_FRAME)
            .unwrap();

        match event.payload {
            DecodedPayload::Event(MarketEvent::Trade(trade)) => {
                assert_eq!(trade.symbol, "BTCUSDT");
                assert!(!trade.buyer_is_maker);
            }
            other => panic!("expected Trade event, got {other:?}"),
        }
    }

    #[test]
    fn domain_event_normalizes_enveloped_depth() {
        let id = StreamId::new();
        let frame = r#"{"stream":"btcusdt@depth","data":{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":10,"u":12,"b":[["50000.0","1.0"]],"a":[]}}"#;
        let event = codec(OutputFormat::DomainEvent).decode(id, frame).unwrap();

        match event.payload {
            DecodedPayload::Event(MarketEvent::Depth(depth)) => {
                assert_eq!(depth.final_update_id, 12);
            }
            other => panic!("expected Depth event, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_becomes_other() {
        let id = StreamId::new();
        let frame = r#"{"e":"24hrTicker","s":"BTCUSDT","c":"50000.0"}"#;
        let event = codec(OutputFormat::DomainEvent).decode(id, frame).unwrap();

        assert!(matches!(
            event.payload,
            DecodedPayload::Event(MarketEvent::Other(_))
        ));
    }

    #[test]
    fn control_ack_is_flagged() {
        let id = StreamId::new();
        let event = codec(OutputFormat::DomainEvent)
            .decode(id, r#"{"result":null,"id":3}"#)
            .unwrap();

        assert!(event.is_control_result);
        assert!(!event.is_error);
        // Acks never take the normalizer path.
        assert!(matches!(event.payload, DecodedPayload::Map(_)));
    }

    #[test]
    fn exchange_error_is_flagged() {
        let id = StreamId::new();
        let event = codec(OutputFormat::NormalizedMap)
            .decode(id, r#"{"error":{"code":2,"msg":"Invalid request"},"id":1}"#)
            .unwrap();

        assert!(event.is_error);
        assert!(!event.is_control_result);
    }

    #[test]
    fn invalid_json_is_rejected() {
        let id = StreamId::new();
        let result = codec(OutputFormat::RawText).decode(id, "not json");
        assert!(matches!(result, Err(CodecError::Json(_))));
    }

    #[test]
    fn malformed_trade_is_rejected_by_normalizer() {
        let id = StreamId::new();
        // "trade" tag but the price field is missing.
        let frame = r#"{"e":"trade","s":"BTCUSDT"}"#;
        let result = codec(OutputFormat::DomainEvent).decode(id, frame);
        assert!(matches!(
            result,
            Err(CodecError::Normalize(NormalizeError::UnrecognizedShape(_)))
        ));
    }
}
