//! Seller and buyer records.
//!
//! These are the mutable per-entity fields owned by the entity store. The
//! same structs travel between ranks as snapshot messages and feed the state
//! root, so they derive `SimpleSerialize` and hold only fixed-size fields.
//! Display names live in the store's directory, not here.

use ssz_rs::prelude::*;

use crate::types::good::{GoodType, GOOD_COUNT};
use crate::types::price;

pub type SellerId = u64;
pub type BuyerId = u64;

// ============================================================================
// Seller
// ============================================================================

/// A seller's inventory, asks and takings.
///
/// Quantities are whole units, prices and revenue are fixed-point (10^8).
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct Seller {
    pub id: u64,

    /// Current stock per good
    pub quantity: [u64; GOOD_COUNT],

    /// Stock at market open, never mutated
    pub original_quantity: [u64; GOOD_COUNT],

    /// Current ask per good
    pub price: [u64; GOOD_COUNT],

    pub revenue: u64,

    pub trade_count: u64,
}

impl Seller {
    pub fn new(id: SellerId, quantity: [u64; GOOD_COUNT], price: [u64; GOOD_COUNT]) -> Self {
        Self {
            id,
            quantity,
            original_quantity: quantity,
            price,
            revenue: 0,
            trade_count: 0,
        }
    }

    #[inline]
    pub fn quantity_of(&self, good: GoodType) -> u64 {
        self.quantity[good.index()]
    }

    #[inline]
    pub fn price_of(&self, good: GoodType) -> u64 {
        self.price[good.index()]
    }

    /// Units sold of one good since market open
    pub fn units_sold(&self, good: GoodType) -> u64 {
        let i = good.index();
        self.original_quantity[i].saturating_sub(self.quantity[i])
    }

    pub fn total_units_sold(&self) -> u64 {
        GoodType::ALL.iter().map(|&g| self.units_sold(g)).sum()
    }

    /// True when every good is out of stock
    pub fn is_depleted(&self) -> bool {
        self.quantity.iter().all(|&q| q == 0)
    }

    /// Share of opening stock sold, across all goods
    pub fn sold_percent(&self) -> f64 {
        let original: u64 = self.original_quantity.iter().sum();
        price::percent(self.total_units_sold(), original)
    }
}

// ============================================================================
// Buyer
// ============================================================================

/// A buyer's remaining wants and wallet.
///
/// `spent + budget == original_budget` holds after every commit.
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct Buyer {
    pub id: u64,

    /// Remaining desired units per good
    pub demand: [u64; GOOD_COUNT],

    /// Demand at market open, never mutated
    pub original_demand: [u64; GOOD_COUNT],

    /// Willingness-to-pay ceiling per unit
    pub max_price: [u64; GOOD_COUNT],

    pub budget: u64,

    pub original_budget: u64,

    /// Higher is served first under scarcity
    pub priority: u32,

    pub spent: u64,

    pub purchase_count: u64,
}

impl Buyer {
    pub fn new(
        id: BuyerId,
        demand: [u64; GOOD_COUNT],
        max_price: [u64; GOOD_COUNT],
        budget: u64,
        priority: u32,
    ) -> Self {
        Self {
            id,
            demand,
            original_demand: demand,
            max_price,
            budget,
            original_budget: budget,
            priority,
            spent: 0,
            purchase_count: 0,
        }
    }

    #[inline]
    pub fn demand_for(&self, good: GoodType) -> u64 {
        self.demand[good.index()]
    }

    #[inline]
    pub fn max_price_for(&self, good: GoodType) -> u64 {
        self.max_price[good.index()]
    }

    /// Interested in a good iff there is remaining demand for it
    #[inline]
    pub fn wants(&self, good: GoodType) -> bool {
        self.demand_for(good) > 0
    }

    /// True when no demand remains for any good
    pub fn is_satisfied(&self) -> bool {
        self.demand.iter().all(|&d| d == 0)
    }

    pub fn units_bought(&self, good: GoodType) -> u64 {
        let i = good.index();
        self.original_demand[i].saturating_sub(self.demand[i])
    }

    /// Share of opening demand fulfilled, across all goods
    pub fn fulfillment_percent(&self) -> f64 {
        let original: u64 = self.original_demand.iter().sum();
        let bought: u64 = GoodType::ALL.iter().map(|&g| self.units_bought(g)).sum();
        price::percent(bought, original)
    }

    /// The conservation law: nothing spent is lost, nothing is created
    pub fn conserves_budget(&self) -> bool {
        self.spent.checked_add(self.budget) == Some(self.original_budget)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::price::to_fixed;

    fn fixed(s: &str) -> u64 {
        to_fixed(s).unwrap()
    }

    #[test]
    fn test_seller_new_snapshots_original() {
        let seller = Seller::new(2, [10, 0, 5], [fixed("4.5"), fixed("4"), fixed("5")]);

        assert_eq!(seller.original_quantity, [10, 0, 5]);
        assert_eq!(seller.price_of(GoodType::Rose), fixed("4.5"));
        assert_eq!(seller.revenue, 0);
        assert!(!seller.is_depleted());
    }

    #[test]
    fn test_seller_sold_percent() {
        let mut seller = Seller::new(0, [10, 10, 0], [1, 1, 1]);
        seller.quantity = [5, 5, 0];

        assert_eq!(seller.units_sold(GoodType::Rose), 5);
        assert_eq!(seller.total_units_sold(), 10);
        assert_eq!(seller.sold_percent(), 50.0);
    }

    #[test]
    fn test_buyer_satisfaction() {
        let mut buyer = Buyer::new(1, [0, 2, 0], [0, fixed("3"), 0], fixed("50"), 1);
        assert!(!buyer.is_satisfied());
        assert!(buyer.wants(GoodType::Sunflower));
        assert!(!buyer.wants(GoodType::Rose));

        buyer.demand = [0, 0, 0];
        assert!(buyer.is_satisfied());
        assert_eq!(buyer.fulfillment_percent(), 100.0);
    }

    #[test]
    fn test_buyer_conservation_check() {
        let mut buyer = Buyer::new(1, [3, 0, 0], [fixed("2"), 0, 0], fixed("10"), 0);
        assert!(buyer.conserves_budget());

        buyer.budget -= fixed("6");
        assert!(!buyer.conserves_budget());

        buyer.spent += fixed("6");
        assert!(buyer.conserves_budget());
    }

    #[test]
    fn test_records_ssz_roundtrip() {
        let seller = Seller::new(7, [1, 2, 3], [fixed("4"), fixed("5"), fixed("6")]);
        let bytes = ssz_rs::serialize(&seller).expect("Failed to serialize");
        let back: Seller = ssz_rs::deserialize(&bytes).expect("Failed to deserialize");
        assert_eq!(seller, back);

        let buyer = Buyer::new(9, [1, 0, 4], [fixed("4"), 0, fixed("5")], fixed("100"), 3);
        let bytes = ssz_rs::serialize(&buyer).expect("Failed to serialize");
        let back: Buyer = ssz_rs::deserialize(&bytes).expect("Failed to deserialize");
        assert_eq!(buyer, back);
    }
}
