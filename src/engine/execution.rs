//! Trade execution: re-validate and commit under both entity locks.
//!
//! ## Protocol
//!
//! A proposal is either committed or rejected, never partially applied:
//!
//! 1. Lock seller then buyer via [`EntityStore::lock_pair`]
//! 2. Re-read demand, stock, budget and ask under exclusion
//! 3. Size the trade with [`match_quantity`]; zero means rejection
//! 4. Apply both sides of the trade and emit a [`Trade`]
//! 5. Release in reverse order when the guard drops
//!
//! A rejection is an outcome, not an error.

use std::fmt;

use crate::engine::policy::{match_quantity, Proposal};
use crate::error::{MarketError, Result};
use crate::store::{EntityStore, PairGuard};
use crate::types::{price, Trade};

/// Why a proposal did not commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The ask changed between snapshot and commit
    PriceMoved { proposed: u64, live: u64 },
    /// The buyer has no remaining demand for the good
    DemandMet,
    /// The seller has no remaining stock of the good
    OutOfStock,
    /// The remaining budget does not cover one unit
    Unaffordable,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::PriceMoved { proposed, live } => write!(
                f,
                "price moved from {} to {}",
                price::from_fixed_trimmed(*proposed),
                price::from_fixed_trimmed(*live)
            ),
            RejectReason::DemandMet => f.write_str("demand already met"),
            RejectReason::OutOfStock => f.write_str("out of stock"),
            RejectReason::Unaffordable => f.write_str("budget exhausted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(Trade),
    Rejected(RejectReason),
}

impl CommitOutcome {
    pub fn trade(&self) -> Option<&Trade> {
        match self {
            CommitOutcome::Committed(trade) => Some(trade),
            CommitOutcome::Rejected(_) => None,
        }
    }
}

/// The quantity `proposal` may still move, read under the pair lock.
///
/// Calling this again after a commit that used up the demand or stock
/// yields `Err`, never a second positive quantity.
pub fn revalidate(pair: &PairGuard<'_>, proposal: &Proposal) -> std::result::Result<u64, RejectReason> {
    let good = proposal.good;
    let live = pair.seller.price_of(good);
    if live != proposal.unit_price {
        return Err(RejectReason::PriceMoved {
            proposed: proposal.unit_price,
            live,
        });
    }

    let demand = pair.buyer.demand_for(good);
    let stock = pair.seller.quantity_of(good);
    let quantity = match_quantity(proposal.quantity, demand, stock, pair.buyer.budget, live);
    if quantity > 0 {
        return Ok(quantity);
    }

    Err(if demand == 0 {
        RejectReason::DemandMet
    } else if stock == 0 {
        RejectReason::OutOfStock
    } else {
        RejectReason::Unaffordable
    })
}

/// Commit one proposal against the store.
///
/// Errors for ids the store does not know and for a trade whose cost would
/// overflow the seller's revenue or the buyer's spend; neither record
/// changes in that case.
pub fn execute(store: &EntityStore, proposal: &Proposal, round: u64) -> Result<CommitOutcome> {
    let mut pair = store.lock_pair(proposal.seller, proposal.buyer)?;

    let quantity = match revalidate(&pair, proposal) {
        Ok(quantity) => quantity,
        Err(reason) => {
            tracing::debug!(
                target: "trade",
                seq = proposal.seq,
                buyer = proposal.buyer,
                seller = proposal.seller,
                good = %proposal.good,
                %reason,
                "proposal rejected"
            );
            return Ok(CommitOutcome::Rejected(reason));
        }
    };

    let good = proposal.good.index();
    let trade = Trade::new(
        proposal.seq,
        round,
        proposal.buyer,
        proposal.seller,
        proposal.good,
        quantity,
        proposal.unit_price,
    )
    .ok_or_else(|| MarketError::overflow(format_args!("cost of trade {}", proposal.seq)))?;

    // Every total is checked before either record changes.
    let spent = pair.buyer.spent.checked_add(trade.cost);
    let revenue = pair.seller.revenue.checked_add(trade.cost);
    let (Some(spent), Some(revenue)) = (spent, revenue) else {
        tracing::error!(
            target: "trade",
            seq = trade.seq,
            buyer = trade.buyer,
            seller = trade.seller,
            cost = %price::from_fixed_trimmed(trade.cost),
            "trade overflows a money total"
        );
        return Err(MarketError::overflow(format_args!("money total of trade {}", trade.seq)));
    };

    // quantity <= budget / unit_price, so cost <= budget
    pair.buyer.demand[good] -= quantity;
    pair.buyer.budget -= trade.cost;
    pair.buyer.spent = spent;
    pair.buyer.purchase_count += 1;

    pair.seller.quantity[good] -= quantity;
    pair.seller.revenue = revenue;
    pair.seller.trade_count += 1;

    tracing::info!(
        target: "trade",
        seq = trade.seq,
        round,
        buyer = trade.buyer,
        seller = trade.seller,
        good = %proposal.good,
        quantity,
        unit_price = %price::from_fixed_trimmed(trade.unit_price),
        cost = %price::from_fixed_trimmed(trade.cost),
        "trade committed"
    );

    Ok(CommitOutcome::Committed(trade))
}

/// Commit a batch of proposals in order, collecting every outcome.
pub fn execute_all(store: &EntityStore, proposals: &[Proposal], round: u64) -> Result<Vec<CommitOutcome>> {
    proposals.iter().map(|p| execute(store, p, round)).collect()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Directory;
    use crate::types::price::to_fixed;
    use crate::types::{Buyer, GoodType, Seller};

    fn fixed(s: &str) -> u64 {
        to_fixed(s).unwrap()
    }

    fn store(stock: u64, ask: &str, demand: u64, budget: &str) -> EntityStore {
        EntityStore::from_records(
            Directory::default(),
            vec![Seller::new(0, [stock, 0, 0], [fixed(ask), fixed("1"), fixed("1")])],
            vec![Buyer::new(0, [demand, 0, 0], [fixed("10"), 0, 0], fixed(budget), 0)],
            0,
        )
    }

    fn proposal(quantity: u64, ask: &str) -> Proposal {
        Proposal {
            seq: 0,
            buyer: 0,
            seller: 0,
            good: GoodType::Rose,
            quantity,
            unit_price: fixed(ask),
        }
    }

    #[test]
    fn test_commit_moves_goods_and_money() {
        let store = store(5, "2", 3, "10");
        let outcome = execute(&store, &proposal(3, "2"), 4).unwrap();

        let trade = outcome.trade().unwrap();
        assert_eq!(trade.quantity, 3);
        assert_eq!(trade.cost, fixed("6"));
        assert_eq!(trade.round, 4);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.sellers[0].quantity[0], 2);
        assert_eq!(snapshot.sellers[0].revenue, fixed("6"));
        assert_eq!(snapshot.buyers[0].demand[0], 0);
        assert_eq!(snapshot.buyers[0].budget, fixed("4"));
        assert!(snapshot.buyers[0].conserves_budget());
    }

    #[test]
    fn test_commit_shrinks_to_live_state() {
        let store = store(2, "2", 3, "10");
        let outcome = execute(&store, &proposal(3, "2"), 0).unwrap();
        assert_eq!(outcome.trade().map(|t| t.quantity), Some(2));
    }

    #[test]
    fn test_price_moved_rejects() {
        let store = store(5, "2", 3, "10");
        store.lock_seller(0).unwrap().price[0] = fixed("1.8");

        let outcome = execute(&store, &proposal(3, "2"), 0).unwrap();
        assert!(matches!(outcome, CommitOutcome::Rejected(RejectReason::PriceMoved { .. })));
        assert_eq!(store.snapshot().sellers[0].quantity[0], 5);
    }

    #[test]
    fn test_revalidate_after_commit_is_zero() {
        let store = store(3, "2", 3, "10");
        let p = proposal(3, "2");
        assert!(execute(&store, &p, 0).unwrap().trade().is_some());

        let pair = store.lock_pair(0, 0).unwrap();
        assert_eq!(revalidate(&pair, &p), Err(RejectReason::DemandMet));
    }

    #[test]
    fn test_reject_reasons() {
        let out_of_stock = store(0, "2", 3, "10");
        let pair = out_of_stock.lock_pair(0, 0).unwrap();
        assert_eq!(revalidate(&pair, &proposal(1, "2")), Err(RejectReason::OutOfStock));
        drop(pair);

        let broke = store(5, "2", 3, "1");
        let pair = broke.lock_pair(0, 0).unwrap();
        assert_eq!(revalidate(&pair, &proposal(1, "2")), Err(RejectReason::Unaffordable));
    }

    #[test]
    fn test_revenue_overflow_leaves_records_untouched() {
        let store = store(5, "2", 3, "10");
        store.lock_seller(0).unwrap().revenue = u64::MAX - 1;

        let err = execute(&store, &proposal(3, "2"), 0).unwrap_err();
        assert!(matches!(err, MarketError::InvariantViolation { ref detail, .. } if detail.contains("overflows")));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.sellers[0].quantity[0], 5);
        assert_eq!(snapshot.buyers[0].demand[0], 3);
        assert_eq!(snapshot.buyers[0].budget, fixed("10"));
    }
}
