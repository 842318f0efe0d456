//! Round receipt: the per-round execution summary and state root.
//!
//! The state root is a SHA-256 hash over the SSZ encoding of every seller
//! and buyer record, in id order. Two runs that end in the same market state
//! produce the same root, which is how determinism is checked.

use sha2::{Digest, Sha256};
use ssz_rs::prelude::*;

use crate::error::MarketError;
use crate::types::entity::{Buyer, Seller};

/// Summary of one trading round.
///
/// ## Example
///
/// ```
/// use flower_exchange::types::RoundReceipt;
///
/// let receipt = RoundReceipt::new(
///     3,              // round
///     20,             // bids considered
///     12,             // trades executed
///     40,             // units traded
///     18_000_000_000, // volume: 180.00000000
///     [0u8; 32],      // state root (would be computed)
/// );
/// assert_eq!(receipt.fill_rate(), Some(0.6));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct RoundReceipt {
    /// Round number (0-based)
    pub round: u64,

    /// Number of (buyer, good) bids that had at least one eligible seller
    pub bids: u64,

    /// Number of committed trades
    pub trades_executed: u64,

    /// Units moved by those trades
    pub units_traded: u64,

    /// Money moved by those trades (fixed-point)
    pub volume: u64,

    /// State root after the round settled (SHA-256, 32 bytes)
    pub state_root: [u8; 32],
}

impl RoundReceipt {
    pub fn new(
        round: u64,
        bids: u64,
        trades_executed: u64,
        units_traded: u64,
        volume: u64,
        state_root: [u8; 32],
    ) -> Self {
        Self {
            round,
            bids,
            trades_executed,
            units_traded,
            volume,
            state_root,
        }
    }

    /// Hash the SSZ encoding of all records, sellers first.
    pub fn state_root_of(sellers: &[Seller], buyers: &[Buyer]) -> crate::error::Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        for seller in sellers {
            let bytes = ssz_rs::serialize(seller).map_err(|e| MarketError::Codec(format!("{e:?}")))?;
            hasher.update(&bytes);
        }
        for buyer in buyers {
            let bytes = ssz_rs::serialize(buyer).map_err(|e| MarketError::Codec(format!("{e:?}")))?;
            hasher.update(&bytes);
        }

        let mut root = [0u8; 32];
        root.copy_from_slice(&hasher.finalize());
        Ok(root)
    }

    /// Get the state root as a hex string
    pub fn state_root_hex(&self) -> String {
        hex::encode(self.state_root)
    }

    /// True when nothing traded this round
    pub fn is_empty(&self) -> bool {
        self.trades_executed == 0
    }

    /// Trades per bid; None if no bids were placed. A bid split across
    /// sellers counts every trade, so this can exceed 1.
    pub fn fill_rate(&self) -> Option<f64> {
        if self.bids == 0 {
            None
        } else {
            Some(self.trades_executed as f64 / self.bids as f64)
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
