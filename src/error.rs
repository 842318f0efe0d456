//! Error types for the exchange.
//!
//! Per-trade rejections are not errors; they are reported as
//! [`crate::engine::CommitOutcome::Rejected`]. Everything here is fatal to
//! the run.

use thiserror::Error;

use crate::engine::CloseReason;
use crate::types::GoodType;

pub type Result<T> = std::result::Result<T, MarketError>;

#[derive(Debug, Error)]
pub enum MarketError {
    /// Invalid run configuration; the run does not begin.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Scenario data that violates an entity invariant.
    #[error("invalid {kind} '{name}': {reason}")]
    InvalidEntity {
        kind: &'static str,
        name: String,
        reason: String,
    },

    /// A reconciled delta would drive a seller's stock negative.
    #[error(
        "reconciliation conflict on seller {seller} {good}: trade {seq} takes {requested} but only {available} remain"
    )]
    ReconciliationConflict {
        seller: u64,
        good: GoodType,
        seq: u64,
        available: u64,
        requested: u64,
    },

    /// A structural invariant broke; `dump` holds the full market state
    /// when one could be taken.
    #[error("invariant violated: {detail}\n{dump}")]
    InvariantViolation { detail: String, dump: String },

    /// A referenced seller or buyer id does not exist.
    #[error("unknown {kind} id {id}")]
    UnknownEntity { kind: &'static str, id: u64 },

    /// SSZ encode/decode failure or malformed frame.
    #[error("codec error: {0}")]
    Codec(String),

    /// A peer rank vanished or a collective was used out of protocol.
    #[error("collective error: {0}")]
    Collective(String),

    /// A round was requested after the market closed.
    #[error("market already closed: {0}")]
    MarketClosed(CloseReason),

    /// Worker pool could not be built.
    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("scenario parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MarketError {
    /// A money or unit total that no longer fits in a `u64`.
    pub fn overflow(what: impl std::fmt::Display) -> Self {
        MarketError::InvariantViolation {
            detail: format!("{what} overflows u64"),
            dump: String::new(),
        }
    }
}
