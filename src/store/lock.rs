//! Lock ordering for entity records.
//!
//! ## Global Order
//!
//! Every acquisition of more than one entity record follows the total order
//! of [`LockKey`]: entity kind first (`Seller < Buyer`), then id ascending.
//! A trade touches exactly one seller and one buyer, so the order reduces to
//! "seller, then buyer" for every caller. Two workers trading the same pair
//! can never hold one lock each while waiting for the other.
//!
//! [`PairGuard`] is the only way to hold both records at once. Its fields
//! drop in declaration order, which releases the buyer before the seller:
//! the reverse of acquisition.

use parking_lot::MutexGuard;

use crate::types::{Buyer, BuyerId, Seller, SellerId};

/// Entity kind, in lock-acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Seller,
    Buyer,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Seller => "seller",
            EntityKind::Buyer => "buyer",
        }
    }
}

/// Position of one record in the global lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockKey {
    pub kind: EntityKind,
    pub id: u64,
}

impl LockKey {
    pub fn seller(id: SellerId) -> Self {
        Self { kind: EntityKind::Seller, id }
    }

    pub fn buyer(id: BuyerId) -> Self {
        Self { kind: EntityKind::Buyer, id }
    }
}

/// Exclusive access to one seller and one buyer.
///
/// Field order matters: `buyer` is dropped first.
pub struct PairGuard<'a> {
    pub buyer: MutexGuard<'a, Buyer>,
    pub seller: MutexGuard<'a, Seller>,
}

impl PairGuard<'_> {
    /// Keys in the order they were acquired
    pub fn acquisition_order(&self) -> [LockKey; 2] {
        [LockKey::seller(self.seller.id), LockKey::buyer(self.buyer.id)]
    }
}
