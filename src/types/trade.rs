//! Trade type representing one executed exchange between a buyer and a seller.
//!
//! ## SSZ Serialization
//!
//! Trades are serialized using SSZ. In distributed runs the committed trades
//! of a rank are the deltas it reports to the coordinator, so the encoding
//! must be identical on every rank.

use ssz_rs::prelude::*;

use crate::types::entity::{BuyerId, SellerId};
use crate::types::good::GoodType;
use crate::types::price;

/// An immutable record of one committed trade.
///
/// ## Sequence Numbers
///
/// `seq` is assigned when the allocation policy emits the proposal, not when
/// the commit happens. Commits from different workers land in any order;
/// sorting a round's trades by `seq` gives the canonical log order.
///
/// ## Example
///
/// ```
/// use flower_exchange::types::{GoodType, Trade};
///
/// let trade = Trade::new(
///     1,                  // seq
///     0,                  // round
///     4,                  // buyer id
///     2,                  // seller id
///     GoodType::Rose,
///     3,                  // quantity
///     200_000_000,        // unit price: 2.00000000
/// )
/// .unwrap();
/// assert_eq!(trade.cost, 600_000_000);
/// assert!(Trade::new(1, 0, 4, 2, GoodType::Rose, u64::MAX, 2).is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct Trade {
    /// Logical sequence number (allocation order)
    pub seq: u64,

    /// Round in which the trade was committed
    pub round: u64,

    pub buyer: u64,

    pub seller: u64,

    /// Good type as u8 (see `GoodType::to_u8`)
    pub good_raw: u8,

    /// Units exchanged, always positive
    pub quantity: u64,

    /// Seller's ask at commit time (fixed-point)
    pub unit_price: u64,

    /// `quantity * unit_price` (fixed-point)
    pub cost: u64,
}

impl Trade {
    /// Create a new trade; the cost is derived from quantity and price.
    ///
    /// Returns `None` when `quantity * unit_price` does not fit in a `u64`.
    pub fn new(
        seq: u64,
        round: u64,
        buyer: BuyerId,
        seller: SellerId,
        good: GoodType,
        quantity: u64,
        unit_price: u64,
    ) -> Option<Self> {
        Some(Self {
            seq,
            round,
            buyer,
            seller,
            good_raw: good.to_u8(),
            quantity,
            unit_price,
            cost: price::cost(quantity, unit_price)?,
        })
    }

    /// Get the good type.
    ///
    /// Trades built by [`Trade::new`] or decoded from a frame always carry a
    /// valid tag; the fallback is never reached for those.
    pub fn good(&self) -> GoodType {
        GoodType::from_u8(self.good_raw).unwrap_or_default()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
