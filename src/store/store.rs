//! The entity store.
//!
//! ## Ownership
//!
//! Each seller and buyer record sits behind its own `parking_lot::Mutex`.
//! Nothing outside this module holds a plain reference to a record: callers
//! get a scoped guard ([`EntityStore::lock_pair`], [`EntityStore::lock_seller`])
//! or an owned copy ([`EntityStore::snapshot`]).
//!
//! ## Ids
//!
//! Ids are dense: seller `i` is the i-th seller of the scenario, likewise
//! for buyers. Lookup is a bounds-checked index.

use std::collections::HashSet;
use std::fmt::Write as _;

use parking_lot::{Mutex, MutexGuard};

use crate::config::RunParams;
use crate::error::{MarketError, Result};
use crate::scenario::Scenario;
use crate::store::lock::{EntityKind, LockKey, PairGuard};
use crate::types::{price, Buyer, BuyerId, GoodType, Seller, SellerId, GOOD_COUNT};

/// Owned copy of every record, taken while no trade is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MarketSnapshot {
    pub sellers: Vec<Seller>,
    pub buyers: Vec<Buyer>,
}

impl MarketSnapshot {
    pub fn all_buyers_satisfied(&self) -> bool {
        self.buyers.iter().all(Buyer::is_satisfied)
    }

    pub fn all_sellers_depleted(&self) -> bool {
        self.sellers.iter().all(Seller::is_depleted)
    }
}

/// Display names, indexed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    pub sellers: Vec<String>,
    pub buyers: Vec<String>,
}

impl Directory {
    pub fn seller(&self, id: SellerId) -> &str {
        self.sellers.get(id as usize).map(String::as_str).unwrap_or("?")
    }

    pub fn buyer(&self, id: BuyerId) -> &str {
        self.buyers.get(id as usize).map(String::as_str).unwrap_or("?")
    }
}

#[derive(Debug)]
pub struct EntityStore {
    sellers: Vec<Mutex<Seller>>,
    buyers: Vec<Mutex<Buyer>>,
    directory: Directory,
    price_floor: u64,
}

impl EntityStore {
    /// Build the store from scenario data, converting money to fixed-point
    /// and checking every entity invariant up front.
    pub fn from_scenario(scenario: &Scenario, params: &RunParams) -> Result<Self> {
        scenario.check_shape()?;

        let mut directory = Directory::default();
        let mut sellers = Vec::with_capacity(scenario.sellers.len());
        let mut buyers = Vec::with_capacity(scenario.buyers.len());

        let mut seen = HashSet::new();
        for (id, spec) in scenario.sellers.iter().enumerate() {
            let invalid = |reason: String| MarketError::InvalidEntity {
                kind: "seller",
                name: spec.name.clone(),
                reason,
            };
            if !seen.insert(spec.name.as_str()) {
                return Err(invalid("duplicate name".into()));
            }

            let mut asks = [0u64; GOOD_COUNT];
            for good in GoodType::ALL {
                let raw = spec.price[good.index()];
                let ask = price::from_f64(raw)
                    .ok_or_else(|| invalid(format!("{good} price {raw} is not a valid amount")))?;
                if ask < params.price_floor {
                    return Err(invalid(format!(
                        "{good} price {} is below the floor {}",
                        price::from_fixed_trimmed(ask),
                        price::from_fixed_trimmed(params.price_floor)
                    )));
                }
                asks[good.index()] = ask;
            }

            directory.sellers.push(spec.name.clone());
            sellers.push(Seller::new(id as SellerId, spec.quantity, asks));
        }

        seen.clear();
        for (id, spec) in scenario.buyers.iter().enumerate() {
            let invalid = |reason: String| MarketError::InvalidEntity {
                kind: "buyer",
                name: spec.name.clone(),
                reason,
            };
            if !seen.insert(spec.name.as_str()) {
                return Err(invalid("duplicate name".into()));
            }

            let budget = price::from_f64(spec.budget)
                .ok_or_else(|| invalid(format!("budget {} is not a valid amount", spec.budget)))?;
            let mut ceilings = [0u64; GOOD_COUNT];
            for good in GoodType::ALL {
                let raw = spec.max_price[good.index()];
                ceilings[good.index()] = price::from_f64(raw)
                    .ok_or_else(|| invalid(format!("{good} max price {raw} is not a valid amount")))?;
            }

            directory.buyers.push(spec.name.clone());
            buyers.push(Buyer::new(id as BuyerId, spec.demand, ceilings, budget, spec.priority));
        }

        Ok(Self::from_records(directory, sellers, buyers, params.price_floor))
    }

    pub fn from_records(
        directory: Directory,
        sellers: Vec<Seller>,
        buyers: Vec<Buyer>,
        price_floor: u64,
    ) -> Self {
        Self {
            sellers: sellers.into_iter().map(Mutex::new).collect(),
            buyers: buyers.into_iter().map(Mutex::new).collect(),
            directory,
            price_floor,
        }
    }

    // ========================================================================
    // Size and Names
    // ========================================================================

    #[inline]
    pub fn seller_count(&self) -> usize {
        self.sellers.len()
    }

    #[inline]
    pub fn buyer_count(&self) -> usize {
        self.buyers.len()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    // ========================================================================
    // Scoped Access
    // ========================================================================

    fn seller_cell(&self, id: SellerId) -> Result<&Mutex<Seller>> {
        self.sellers
            .get(id as usize)
            .ok_or(MarketError::UnknownEntity { kind: EntityKind::Seller.as_str(), id })
    }

    fn buyer_cell(&self, id: BuyerId) -> Result<&Mutex<Buyer>> {
        self.buyers
            .get(id as usize)
            .ok_or(MarketError::UnknownEntity { kind: EntityKind::Buyer.as_str(), id })
    }

    /// Lock one seller and one buyer in the global order.
    ///
    /// This is the only path that holds two records at once.
    pub fn lock_pair(&self, seller: SellerId, buyer: BuyerId) -> Result<PairGuard<'_>> {
        let seller_cell = self.seller_cell(seller)?;
        let buyer_cell = self.buyer_cell(buyer)?;
        debug_assert!(LockKey::seller(seller) < LockKey::buyer(buyer));

        let seller_guard = seller_cell.lock();
        let buyer_guard = buyer_cell.lock();
        Ok(PairGuard {
            buyer: buyer_guard,
            seller: seller_guard,
        })
    }

    pub fn lock_seller(&self, id: SellerId) -> Result<MutexGuard<'_, Seller>> {
        Ok(self.seller_cell(id)?.lock())
    }

    pub fn lock_buyer(&self, id: BuyerId) -> Result<MutexGuard<'_, Buyer>> {
        Ok(self.buyer_cell(id)?.lock())
    }

    /// Copy every record. Each record is locked on its own, so the copy is
    /// only consistent across records when no trading is in flight.
    pub fn snapshot(&self) -> MarketSnapshot {
        MarketSnapshot {
            sellers: self.sellers.iter().map(|s| s.lock().clone()).collect(),
            buyers: self.buyers.iter().map(|b| b.lock().clone()).collect(),
        }
    }

    pub fn seller_records(&self) -> Vec<Seller> {
        self.sellers.iter().map(|s| s.lock().clone()).collect()
    }

    pub fn buyer_record(&self, id: BuyerId) -> Result<Buyer> {
        Ok(self.lock_buyer(id)?.clone())
    }

    /// Overwrite seller records with replicated state from the coordinator.
    pub fn replace_sellers(&self, records: &[Seller]) -> Result<()> {
        if records.len() != self.sellers.len() {
            return Err(MarketError::Codec(format!(
                "seller snapshot has {} records, store has {}",
                records.len(),
                self.sellers.len()
            )));
        }
        for record in records {
            *self.lock_seller(record.id)? = record.clone();
        }
        Ok(())
    }

    /// Overwrite one buyer record with the owning rank's final state.
    pub fn replace_buyer(&self, record: Buyer) -> Result<()> {
        let id = record.id;
        *self.lock_buyer(id)? = record;
        Ok(())
    }

    // ========================================================================
    // Structural Audit
    // ========================================================================

    /// Check every structural invariant. A failure means a protocol bug;
    /// the error carries a full state dump and the run must abort.
    pub fn audit(&self) -> Result<()> {
        let snapshot = self.snapshot();
        match first_violation(&snapshot, self.price_floor) {
            None => Ok(()),
            Some(detail) => {
                tracing::error!(target: "audit", %detail, "structural invariant violated");
                Err(MarketError::InvariantViolation {
                    detail,
                    dump: self.dump(&snapshot),
                })
            }
        }
    }

    /// Audit only the given buyers; used by ranks that own a shard.
    pub fn audit_buyers(&self, owned: &[BuyerId]) -> Result<()> {
        for &id in owned {
            let buyer = self.buyer_record(id)?;
            if let Some(detail) = buyer_violation(&buyer) {
                let snapshot = self.snapshot();
                return Err(MarketError::InvariantViolation {
                    detail,
                    dump: self.dump(&snapshot),
                });
            }
        }
        Ok(())
    }

    /// Human-readable dump of every record.
    pub fn dump(&self, snapshot: &MarketSnapshot) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "--- sellers ---");
        for seller in &snapshot.sellers {
            let _ = writeln!(
                out,
                "{:>3} {:<10} qty={:?}/{:?} price={:?} revenue={} trades={}",
                seller.id,
                self.directory.seller(seller.id),
                seller.quantity,
                seller.original_quantity,
                seller.price.map(price::from_fixed_trimmed),
                price::from_fixed_trimmed(seller.revenue),
                seller.trade_count,
            );
        }
        let _ = writeln!(out, "--- buyers ---");
        for buyer in &snapshot.buyers {
            let _ = writeln!(
                out,
                "{:>3} {:<10} demand={:?}/{:?} budget={} spent={} original={} purchases={}",
                buyer.id,
                self.directory.buyer(buyer.id),
                buyer.demand,
                buyer.original_demand,
                price::from_fixed_trimmed(buyer.budget),
                price::from_fixed_trimmed(buyer.spent),
                price::from_fixed_trimmed(buyer.original_budget),
                buyer.purchase_count,
            );
        }
        out
    }
}

fn first_violation(snapshot: &MarketSnapshot, price_floor: u64) -> Option<String> {
    for seller in &snapshot.sellers {
        for good in GoodType::ALL {
            let i = good.index();
            if seller.quantity[i] > seller.original_quantity[i] {
                return Some(format!(
                    "seller {} {good} quantity {} exceeds original {}",
                    seller.id, seller.quantity[i], seller.original_quantity[i]
                ));
            }
            if seller.price[i] < price_floor {
                return Some(format!(
                    "seller {} {good} price {} below floor {}",
                    seller.id,
                    price::from_fixed_trimmed(seller.price[i]),
                    price::from_fixed_trimmed(price_floor)
                ));
            }
        }
    }
    snapshot.buyers.iter().find_map(buyer_violation)
}

fn buyer_violation(buyer: &Buyer) -> Option<String> {
    for good in GoodType::ALL {
        let i = good.index();
        if buyer.demand[i] > buyer.original_demand[i] {
            return Some(format!(
                "buyer {} {good} demand {} exceeds original {}",
                buyer.id, buyer.demand[i], buyer.original_demand[i]
            ));
        }
    }
    if !buyer.conserves_budget() {
        return Some(format!(
            "buyer {} spent {} + budget {} != original {}",
            buyer.id,
            price::from_fixed_trimmed(buyer.spent),
            price::from_fixed_trimmed(buyer.budget),
            price::from_fixed_trimmed(buyer.original_budget)
        ));
    }
    None
}

// ============================================================================
// Unit Tests
// ============================================================================
