//! Port Interfaces
//!
//! Contracts that external collaborators must satisfy.
//!
//! The normalization collaborator translates raw exchange JSON into the
//! uniform [`MarketEvent`] shape independent of exchange identity. Its full
//! mapping tables are outside this crate's responsibility; the crate ships
//! a basic implementation and everything richer plugs in through the trait.

use crate::domain::event::MarketEvent;

/// Errors a normalizer may report for a single frame.
///
/// A normalize failure is never connection-fatal: the socket loop logs it,
/// drops the offending frame, and keeps running.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// The frame was not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame parsed but did not match any known event shape.
    #[error("unrecognized event shape: {0}")]
    UnrecognizedShape(String),
}

/// Normalization collaborator: `normalize(raw) -> event | error`.
pub trait Normalizer: Send + Sync {
    /// Translate one raw frame into a normalized market event.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError`] when the frame cannot be translated; the
    /// caller drops the frame and continues.
    fn normalize(&self, raw: &str) -> Result<MarketEvent, NormalizeError>;
}
