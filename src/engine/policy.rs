//! Eligibility and allocation.
//!
//! ## Two Passes
//!
//! 1. **Eligibility** ([`bids_for`]) runs per buyer partition, in parallel.
//!    Every good a buyer still wants and can buy from at least one seller
//!    in the round-start snapshot becomes a [`Bid`].
//! 2. **Allocation** ([`allocate`]) folds every bid of the round through a
//!    working copy of stock and budget, goods in [`GoodType`] order and
//!    buyers by priority descending then id ascending. Sellers are chosen
//!    against the working stock, so a seller emptied by an earlier bid is
//!    no longer eligible and the next one under the same mode is used. The
//!    resulting [`Proposal`]s never oversell the snapshot and never
//!    overspend a budget, so they can commit in any order.
//!
//! Each proposal gets its `seq` here. The trade log is sorted by it.

use std::cmp::Reverse;
use std::collections::HashMap;

use crate::config::AllocationMode;
use crate::types::{price, Buyer, BuyerId, GoodType, Seller, SellerId, GOOD_COUNT};

/// A buyer's intent to buy one good this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bid {
    pub buyer: BuyerId,
    pub priority: u32,
    pub good: GoodType,
    /// Buyer's price ceiling for `good`
    pub max_price: u64,
    /// Buyer's demand for `good` at round start
    pub demand: u64,
    /// Buyer's budget at round start
    pub budget: u64,
}

/// An intended trade, emitted by the allocator and consumed by execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub seq: u64,
    pub buyer: BuyerId,
    pub seller: SellerId,
    pub good: GoodType,
    pub quantity: u64,
    pub unit_price: u64,
}

/// `min(requested, demand, stock, floor(budget / price))`.
///
/// The one sizing rule shared by allocation and commit-time re-validation.
/// Zero whenever the buyer cannot afford a single unit.
#[inline]
pub fn match_quantity(requested: u64, demand: u64, stock: u64, budget: u64, unit_price: u64) -> u64 {
    requested
        .min(demand)
        .min(stock)
        .min(price::affordable_units(budget, unit_price))
}

/// Stock on hand, ask within `ceiling`, and one unit within `budget`.
#[inline]
fn admits(seller: &Seller, good: GoodType, ceiling: u64, budget: u64) -> bool {
    let ask = seller.price_of(good);
    seller.quantity_of(good) > 0 && ask <= ceiling && budget >= ask
}

/// Can `buyer` trade `good` with `seller` at the seller's current ask?
pub fn is_eligible(buyer: &Buyer, seller: &Seller, good: GoodType) -> bool {
    buyer.wants(good) && admits(seller, good, buyer.max_price_for(good), buyer.budget)
}

/// Index of the seller a buyer with `ceiling` and `budget` buys from.
fn pick(sellers: &[Seller], good: GoodType, ceiling: u64, budget: u64, mode: AllocationMode) -> Option<usize> {
    let mut eligible = sellers
        .iter()
        .enumerate()
        .filter(|(_, s)| admits(s, good, ceiling, budget));
    let chosen = match mode {
        AllocationMode::FirstFit => eligible.next(),
        // min_by_key keeps the first of equal keys, i.e. the lowest id
        AllocationMode::BestPrice => eligible.min_by_key(|(_, s)| s.price_of(good)),
    };
    chosen.map(|(index, _)| index)
}

/// Pick the seller `buyer` should buy `good` from.
///
/// `sellers` must be in id order.
pub fn select_seller<'a>(
    buyer: &Buyer,
    good: GoodType,
    sellers: &'a [Seller],
    mode: AllocationMode,
) -> Option<&'a Seller> {
    if !buyer.wants(good) {
        return None;
    }
    pick(sellers, good, buyer.max_price_for(good), buyer.budget, mode).map(|index| &sellers[index])
}

/// Eligibility pass for one partition of buyers.
pub fn bids_for(buyers: &[Buyer], sellers: &[Seller], mode: AllocationMode) -> Vec<Bid> {
    let mut bids = Vec::with_capacity(buyers.len() * GOOD_COUNT);
    for buyer in buyers {
        for good in GoodType::ALL {
            if select_seller(buyer, good, sellers, mode).is_some() {
                bids.push(Bid {
                    buyer: buyer.id,
                    priority: buyer.priority,
                    good,
                    max_price: buyer.max_price_for(good),
                    demand: buyer.demand_for(good),
                    budget: buyer.budget,
                });
            }
        }
    }
    bids
}

/// Allocation pass over every bid of the round.
///
/// `sellers` is the round-start snapshot in id order. A bid keeps drawing
/// from the seller `mode` selects until its demand is met or no seller
/// admits it, so one bid may yield proposals against several sellers.
/// `next_seq` is the first sequence number to hand out; it is advanced past
/// the last proposal.
pub fn allocate(bids: &[Bid], sellers: &[Seller], mode: AllocationMode, next_seq: &mut u64) -> Vec<Proposal> {
    let mut ordered: Vec<&Bid> = bids.iter().collect();
    ordered.sort_by_key(|b| (b.good, Reverse(b.priority), b.buyer));

    let mut working = sellers.to_vec();
    let mut budgets: HashMap<BuyerId, u64> = HashMap::new();
    let mut proposals = Vec::new();

    for bid in ordered {
        let good = bid.good;
        let budget = budgets.entry(bid.buyer).or_insert(bid.budget);
        let mut wanted = bid.demand;

        while wanted > 0 {
            let Some(index) = pick(&working, good, bid.max_price, *budget, mode) else {
                break;
            };
            let seller = &mut working[index];
            let ask = seller.price_of(good);
            let quantity = match_quantity(wanted, wanted, seller.quantity_of(good), *budget, ask);
            if quantity == 0 {
                break;
            }

            // quantity <= budget / ask, so the product fits
            seller.quantity[good.index()] -= quantity;
            *budget -= quantity * ask;
            wanted -= quantity;

            proposals.push(Proposal {
                seq: *next_seq,
                buyer: bid.buyer,
                seller: seller.id,
                good,
                quantity,
                unit_price: ask,
            });
            *next_seq += 1;
        }
    }

    proposals
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

    fn rose_seller(id: SellerId, quantity: u64, ask: &str) -> Seller {
        Seller::new(id, [quantity, 0, 0], [fixed(ask), fixed("1"), fixed("1")])
    }

    fn rose_buyer(id: BuyerId, demand: u64, max: &str, budget: &str, priority: u32) -> Buyer {
        Buyer::new(id, [demand, 0, 0], [fixed(max), 0, 0], fixed(budget), priority)
    }

    #[test]
    fn test_match_quantity_takes_minimum() {
        assert_eq!(match_quantity(10, 4, 8, fixed("100"), fixed("2")), 4);
        assert_eq!(match_quantity(10, 9, 3, fixed("100"), fixed("2")), 3);
        assert_eq!(match_quantity(10, 9, 8, fixed("5"), fixed("2")), 2);
        assert_eq!(match_quantity(1, 9, 8, fixed("100"), fixed("2")), 1);
    }

    #[test]
    fn test_unaffordable_buyer_gets_zero() {
        for (demand, stock) in [(1, 1), (5, 100), (1000, 1000)] {
            assert_eq!(match_quantity(demand, demand, stock, fixed("1"), fixed("2")), 0);
        }
    }

    #[test]
    fn test_eligibility_rules() {
        let seller = rose_seller(0, 5, "2");

        assert!(is_eligible(&rose_buyer(0, 1, "2", "2", 0), &seller, GoodType::Rose));
        // ask above ceiling
        assert!(!is_eligible(&rose_buyer(0, 1, "1.9", "10", 0), &seller, GoodType::Rose));
        // cannot afford one unit
        assert!(!is_eligible(&rose_buyer(0, 1, "2", "1", 0), &seller, GoodType::Rose));
        // no demand
        assert!(!is_eligible(&rose_buyer(0, 0, "2", "10", 0), &seller, GoodType::Rose));
        // no stock
        assert!(!is_eligible(&rose_buyer(0, 1, "2", "10", 0), &rose_seller(1, 0, "2"), GoodType::Rose));
    }

    #[test]
    fn test_best_price_ties_break_on_id() {
        let sellers = vec![rose_seller(0, 5, "3"), rose_seller(1, 5, "2"), rose_seller(2, 5, "2")];
        let buyer = rose_buyer(0, 1, "5", "10", 0);

        let best = select_seller(&buyer, GoodType::Rose, &sellers, AllocationMode::BestPrice);
        assert_eq!(best.map(|s| s.id), Some(1));

        let first = select_seller(&buyer, GoodType::Rose, &sellers, AllocationMode::FirstFit);
        assert_eq!(first.map(|s| s.id), Some(0));
    }

    #[test]
    fn test_bids_for_skips_unwanted_goods() {
        let sellers = vec![Seller::new(0, [5, 5, 5], [fixed("1"); 3])];
        let buyers = vec![Buyer::new(3, [2, 0, 1], [fixed("1"); 3], fixed("10"), 0)];

        let bids = bids_for(&buyers, &sellers, AllocationMode::BestPrice);
        let goods: Vec<_> = bids.iter().map(|b| b.good).collect();
        assert_eq!(goods, vec![GoodType::Rose, GoodType::Tulip]);
        assert!(bids.iter().all(|b| b.buyer == 3 && b.budget == fixed("10")));
    }

    #[test]
    fn test_allocate_serves_priority_first() {
        let sellers = vec![rose_seller(0, 5, "2")];
        let buyers = vec![
            rose_buyer(0, 4, "2", "10", 1),
            rose_buyer(1, 3, "2", "10", 2),
        ];
        let bids = bids_for(&buyers, &sellers, AllocationMode::BestPrice);

        let mut seq = 0;
        let proposals = allocate(&bids, &sellers, AllocationMode::BestPrice, &mut seq);

        assert_eq!(proposals.len(), 2);
        assert_eq!((proposals[0].buyer, proposals[0].quantity), (1, 3));
        assert_eq!((proposals[1].buyer, proposals[1].quantity), (0, 2));
        assert_eq!(proposals[1].seq, 1);
        assert_eq!(seq, 2);
    }

    #[test]
    fn test_allocate_equal_priority_uses_id() {
        let sellers = vec![rose_seller(0, 2, "1")];
        let buyers = vec![rose_buyer(7, 2, "1", "10", 1), rose_buyer(4, 2, "1", "10", 1)];
        let bids = bids_for(&buyers, &sellers, AllocationMode::BestPrice);

        let proposals = allocate(&bids, &sellers, AllocationMode::BestPrice, &mut 0);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].buyer, 4);
    }

    #[test]
    fn test_allocate_carries_budget_across_goods() {
        let sellers = vec![Seller::new(0, [10, 10, 0], [fixed("2"), fixed("3"), fixed("1")])];
        let buyers = vec![Buyer::new(0, [3, 3, 0], [fixed("5"); 3], fixed("10"), 0)];
        let bids = bids_for(&buyers, &sellers, AllocationMode::BestPrice);

        let proposals = allocate(&bids, &sellers, AllocationMode::BestPrice, &mut 0);
        // 3 roses cost 6, leaving 4 for one sunflower at 3
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].quantity, 3);
        assert_eq!(proposals[1].good, GoodType::Sunflower);
        assert_eq!(proposals[1].quantity, 1);
    }

    #[test]
    fn test_allocate_never_oversells_snapshot() {
        let sellers = vec![rose_seller(0, 7, "1"), rose_seller(1, 3, "1")];
        let buyers: Vec<_> = (0..10).map(|id| rose_buyer(id, 2, "1", "100", 0)).collect();
        let bids = bids_for(&buyers, &sellers, AllocationMode::FirstFit);

        let proposals = allocate(&bids, &sellers, AllocationMode::FirstFit, &mut 0);
        let sold = |seller| -> u64 { proposals.iter().filter(|p| p.seller == seller).map(|p| p.quantity).sum() };
        assert_eq!(sold(0), 7);
        assert_eq!(sold(1), 3);
    }

    #[test]
    fn test_allocate_falls_back_when_seller_runs_out() {
        let sellers = vec![rose_seller(0, 2, "1"), rose_seller(1, 10, "1.5")];
        let buyers = vec![rose_buyer(0, 2, "2", "100", 2), rose_buyer(1, 3, "2", "100", 1)];
        let bids = bids_for(&buyers, &sellers, AllocationMode::BestPrice);

        let proposals = allocate(&bids, &sellers, AllocationMode::BestPrice, &mut 0);
        assert_eq!(proposals.len(), 2);
        assert_eq!((proposals[0].buyer, proposals[0].seller, proposals[0].quantity), (0, 0, 2));
        assert_eq!((proposals[1].buyer, proposals[1].seller, proposals[1].quantity), (1, 1, 3));
        assert_eq!(proposals[1].unit_price, fixed("1.5"));
    }

    #[test]
    fn test_allocate_splits_one_bid_across_sellers() {
        let sellers = vec![rose_seller(0, 2, "1"), rose_seller(1, 2, "2"), rose_seller(2, 9, "3")];
        let buyers = vec![rose_buyer(0, 5, "2", "100", 0)];
        let bids = bids_for(&buyers, &sellers, AllocationMode::BestPrice);

        let proposals = allocate(&bids, &sellers, AllocationMode::BestPrice, &mut 0);
        let fills: Vec<_> = proposals.iter().map(|p| (p.seller, p.quantity, p.seq)).collect();
        // seller 2 is above the ceiling
        assert_eq!(fills, vec![(0, 2, 0), (1, 2, 1)]);
    }

    #[test]
    fn test_allocate_stops_when_budget_runs_out() {
        let sellers = vec![rose_seller(0, 1, "2"), rose_seller(1, 5, "3")];
        let buyers = vec![rose_buyer(0, 5, "3", "6", 0)];
        let bids = bids_for(&buyers, &sellers, AllocationMode::BestPrice);

        let proposals = allocate(&bids, &sellers, AllocationMode::BestPrice, &mut 0);
        // 2 spent on seller 0 leaves 4, one unit at 3
        let fills: Vec<_> = proposals.iter().map(|p| (p.seller, p.quantity)).collect();
        assert_eq!(fills, vec![(0, 1), (1, 1)]);
    }
}
