//! Reports and the sinks that consume them.
//!
//! ## Reports
//!
//! - [`MarketSummary`]: supply against demand per good, once at open
//! - [`RoundReport`]: trades, state and [`MarketConditions`] after a round
//! - [`FinalReport`]: totals and per-entity outcomes at close
//!
//! ## Sinks
//!
//! A [`ReportSink`] receives reports as the run progresses. [`LogSink`]
//! renders them as tracing events; [`CollectingSink`] keeps them for tests
//! and callers that want the data.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::{MarketError, Result};
use crate::store::{Directory, MarketSnapshot};
use crate::types::{price, Buyer, GoodType, RoundReceipt, Seller, Trade, GOOD_COUNT};

// ============================================================================
// Close Reason
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Every buyer's demand reached zero
    Success,
    /// Every seller ran out of stock with demand remaining
    Depleted,
    /// The round limit was reached
    Timeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CloseReason::Success => "success",
            CloseReason::Depleted => "depleted",
            CloseReason::Timeout => "timeout",
        })
    }
}

// ============================================================================
// Market Summary
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Balance {
    /// Demand exceeds supply by this many units
    Shortage(u64),
    /// Supply exceeds demand by this many units
    Surplus(u64),
    Balanced,
}

impl Balance {
    pub fn of(supply: u64, demand: u64) -> Self {
        match supply.cmp(&demand) {
            std::cmp::Ordering::Less => Balance::Shortage(demand - supply),
            std::cmp::Ordering::Greater => Balance::Surplus(supply - demand),
            std::cmp::Ordering::Equal => Balance::Balanced,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GoodBalance {
    pub good: GoodType,
    pub supply: u64,
    pub demand: u64,
    pub balance: Balance,
}

/// Initial supply against demand, per good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketSummary {
    pub goods: [GoodBalance; GOOD_COUNT],
}

impl MarketSummary {
    pub fn from_snapshot(snapshot: &MarketSnapshot) -> Self {
        let goods = GoodType::ALL.map(|good| {
            let supply = snapshot.sellers.iter().map(|s| s.original_quantity[good.index()]).sum();
            let demand = snapshot.buyers.iter().map(|b| b.original_demand[good.index()]).sum();
            GoodBalance {
                good,
                supply,
                demand,
                balance: Balance::of(supply, demand),
            }
        });
        Self { goods }
    }
}

// ============================================================================
// Market Conditions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GoodConditions {
    pub good: GoodType,
    /// Mean ask over sellers that still have stock; `None` if none do
    pub average_ask: Option<u64>,
    pub remaining_supply: u64,
    pub remaining_demand: u64,
}

/// Per-good market state after a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketConditions {
    pub goods: [GoodConditions; GOOD_COUNT],
}

impl MarketConditions {
    pub fn from_records(sellers: &[Seller], buyers: &[Buyer]) -> Self {
        let goods = GoodType::ALL.map(|good| {
            let stocked: Vec<&Seller> = sellers.iter().filter(|s| s.quantity_of(good) > 0).collect();
            let average_ask = if stocked.is_empty() {
                None
            } else {
                let total: u128 = stocked.iter().map(|s| s.price_of(good) as u128).sum();
                Some((total / stocked.len() as u128) as u64)
            };
            GoodConditions {
                good,
                average_ask,
                remaining_supply: stocked.iter().map(|s| s.quantity_of(good)).sum(),
                remaining_demand: buyers.iter().map(|b| b.demand_for(good)).sum(),
            }
        });
        Self { goods }
    }

    pub fn of(&self, good: GoodType) -> &GoodConditions {
        &self.goods[good.index()]
    }
}

// ============================================================================
// Round and Final Reports
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    pub round: u64,
    /// Trades committed this round, in `seq` order
    pub trades: Vec<Trade>,
    pub sellers: Vec<Seller>,
    pub buyers: Vec<Buyer>,
    pub receipt: RoundReceipt,
    pub conditions: MarketConditions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SellerOutcome {
    pub id: u64,
    pub name: String,
    pub revenue: u64,
    pub units_sold: [u64; GOOD_COUNT],
    pub remaining: [u64; GOOD_COUNT],
    pub sold_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuyerOutcome {
    pub id: u64,
    pub name: String,
    pub units_bought: [u64; GOOD_COUNT],
    pub spent: u64,
    pub budget_left: u64,
    pub fulfillment_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalReport {
    pub close_reason: CloseReason,
    pub rounds_run: u64,
    pub total_trades: u64,
    pub total_units: u64,
    /// Sum of trade costs (fixed-point)
    pub total_volume: u64,
    pub elapsed: Duration,
    /// Hex SHA-256 over the final records
    pub state_root: String,
    pub summary: MarketSummary,
    pub sellers: Vec<SellerOutcome>,
    pub buyers: Vec<BuyerOutcome>,
    /// Full trade log in `seq` order
    #[serde(skip)]
    pub trades: Vec<Trade>,
}

/// Everything the run produced, handed to [`FinalReport::build`].
pub struct RunOutcome<'a> {
    pub directory: &'a Directory,
    pub snapshot: &'a MarketSnapshot,
    pub trades: Vec<Trade>,
    pub summary: MarketSummary,
    pub close_reason: CloseReason,
    pub rounds_run: u64,
    pub elapsed: Duration,
}

impl FinalReport {
    pub fn build(outcome: RunOutcome<'_>) -> Result<Self> {
        let RunOutcome {
            directory,
            snapshot,
            trades,
            summary,
            close_reason,
            rounds_run,
            elapsed,
        } = outcome;

        let root = RoundReceipt::state_root_of(&snapshot.sellers, &snapshot.buyers)?;
        let total_units =
            price::total(trades.iter().map(|t| t.quantity)).ok_or_else(|| MarketError::overflow("units traded"))?;
        let total_volume =
            price::total(trades.iter().map(|t| t.cost)).ok_or_else(|| MarketError::overflow("trade volume"))?;

        let sellers = snapshot
            .sellers
            .iter()
            .map(|s| SellerOutcome {
                id: s.id,
                name: directory.seller(s.id).to_string(),
                revenue: s.revenue,
                units_sold: GoodType::ALL.map(|g| s.units_sold(g)),
                remaining: s.quantity,
                sold_percent: s.sold_percent(),
            })
            .collect();

        let buyers = snapshot
            .buyers
            .iter()
            .map(|b| BuyerOutcome {
                id: b.id,
                name: directory.buyer(b.id).to_string(),
                units_bought: GoodType::ALL.map(|g| b.units_bought(g)),
                spent: b.spent,
                budget_left: b.budget,
                fulfillment_percent: b.fulfillment_percent(),
            })
            .collect();

        Ok(Self {
            close_reason,
            rounds_run,
            total_trades: trades.len() as u64,
            total_units,
            total_volume,
            elapsed,
            state_root: hex::encode(root),
            summary,
            sellers,
            buyers,
            trades,
        })
    }

    /// Sum of seller revenue; `None` on overflow.
    pub fn total_revenue(&self) -> Option<u64> {
        price::total(self.sellers.iter().map(|s| s.revenue))
    }

    /// Sum of buyer spend; `None` on overflow.
    pub fn total_spent(&self) -> Option<u64> {
        price::total(self.buyers.iter().map(|b| b.spent))
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Consumer of run reports.
pub trait ReportSink {
    fn market_open(&mut self, _summary: &MarketSummary) {}

    fn round_settled(&mut self, report: &RoundReport);

    fn market_closed(&mut self, report: &FinalReport);
}

/// Renders reports as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn market_open(&mut self, summary: &MarketSummary) {
        for g in &summary.goods {
            tracing::info!(
                target: "round",
                good = %g.good,
                supply = g.supply,
                demand = g.demand,
                balance = ?g.balance,
                "market open"
            );
        }
    }

    fn round_settled(&mut self, report: &RoundReport) {
        let receipt = &report.receipt;
        if receipt.is_empty() {
            tracing::info!(
                target: "round",
                round = report.round,
                bids = receipt.bids,
                state_root = %receipt.state_root_hex(),
                "round settled without trades"
            );
        } else {
            tracing::info!(
                target: "round",
                round = report.round,
                bids = receipt.bids,
                trades = receipt.trades_executed,
                trades_per_bid = format_args!("{:.2}", receipt.fill_rate().unwrap_or(0.0)),
                units = receipt.units_traded,
                volume = %price::from_fixed_trimmed(receipt.volume),
                state_root = %receipt.state_root_hex(),
                "round settled"
            );
        }
        for c in &report.conditions.goods {
            tracing::debug!(
                target: "round",
                round = report.round,
                good = %c.good,
                average_ask = %c.average_ask.map(price::from_fixed_trimmed).unwrap_or_else(|| "-".into()),
                supply = c.remaining_supply,
                demand = c.remaining_demand,
                "conditions"
            );
        }
    }

    fn market_closed(&mut self, report: &FinalReport) {
        tracing::info!(
            target: "round",
            reason = %report.close_reason,
            rounds = report.rounds_run,
            trades = report.total_trades,
            units = report.total_units,
            volume = %price::from_fixed_trimmed(report.total_volume),
            elapsed = ?report.elapsed,
            state_root = %report.state_root,
            "market closed"
        );
        for s in &report.sellers {
            tracing::info!(
                target: "round",
                seller = %s.name,
                revenue = %price::from_fixed_trimmed(s.revenue),
                sold = ?s.units_sold,
                sold_percent = format_args!("{:.1}", s.sold_percent),
                "seller outcome"
            );
        }
        for b in &report.buyers {
            tracing::info!(
                target: "round",
                buyer = %b.name,
                spent = %price::from_fixed_trimmed(b.spent),
                bought = ?b.units_bought,
                fulfillment_percent = format_args!("{:.1}", b.fulfillment_percent),
                "buyer outcome"
            );
        }
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    pub summary: Option<MarketSummary>,
    pub rounds: Vec<RoundReport>,
    pub closed: Option<FinalReport>,
}

impl ReportSink for CollectingSink {
    fn market_open(&mut self, summary: &MarketSummary) {
        self.summary = Some(summary.clone());
    }

    fn round_settled(&mut self, report: &RoundReport) {
        self.rounds.push(report.clone());
    }

    fn market_closed(&mut self, report: &FinalReport) {
        self.closed = Some(report.clone());
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_of() {
        assert_eq!(Balance::of(10, 15), Balance::Shortage(5));
        assert_eq!(Balance::of(15, 10), Balance::Surplus(5));
        assert_eq!(Balance::of(7, 7), Balance::Balanced);
    }

    #[test]
    fn test_summary_totals_per_good() {
        let snapshot = MarketSnapshot {
            sellers: vec![Seller::new(0, [10, 5, 0], [1; 3]), Seller::new(1, [10, 0, 2], [1; 3])],
            buyers: vec![Buyer::new(0, [25, 5, 1], [1; 3], 100, 0)],
        };
        let summary = MarketSummary::from_snapshot(&snapshot);

        assert_eq!(summary.goods[0].balance, Balance::Shortage(5));
        assert_eq!(summary.goods[1].balance, Balance::Balanced);
        assert_eq!(summary.goods[2].balance, Balance::Surplus(1));
    }

    #[test]
    fn test_conditions_ignore_empty_sellers() {
        let sellers = vec![
            Seller::new(0, [1, 0, 0], [300, 100, 100]),
            Seller::new(1, [2, 0, 0], [100, 100, 100]),
            Seller::new(2, [0, 0, 0], [900, 100, 100]),
        ];
        let buyers = vec![Buyer::new(0, [4, 1, 0], [1; 3], 100, 0)];
        let conditions = MarketConditions::from_records(&sellers, &buyers);

        let rose = conditions.of(GoodType::Rose);
        assert_eq!(rose.average_ask, Some(200));
        assert_eq!(rose.remaining_supply, 3);
        assert_eq!(rose.remaining_demand, 4);
        assert_eq!(conditions.of(GoodType::Sunflower).average_ask, None);
    }

    #[test]
    fn test_final_report_totals() {
        let mut seller = Seller::new(0, [5, 0, 0], [200, 0, 0]);
        let mut buyer = Buyer::new(0, [3, 0, 0], [200, 0, 0], 1_000, 0);
        let trade = Trade::new(0, 0, 0, 0, GoodType::Rose, 3, 200).unwrap();
        seller.quantity[0] = 2;
        seller.revenue = trade.cost;
        buyer.demand[0] = 0;
        buyer.budget -= trade.cost;
        buyer.spent = trade.cost;

        let directory = Directory {
            sellers: vec!["S".into()],
            buyers: vec!["B".into()],
        };
        let snapshot = MarketSnapshot {
            sellers: vec![seller],
            buyers: vec![buyer],
        };
        let report = FinalReport::build(RunOutcome {
            directory: &directory,
            snapshot: &snapshot,
            trades: vec![trade],
            summary: MarketSummary::from_snapshot(&snapshot),
            close_reason: CloseReason::Success,
            rounds_run: 1,
            elapsed: Duration::from_millis(3),
        })
        .unwrap();

        assert_eq!(report.total_trades, 1);
        assert_eq!(report.total_volume, 600);
        assert_eq!(report.total_revenue(), report.total_spent());
        assert_eq!(report.sellers[0].sold_percent, 60.0);
        assert_eq!(report.buyers[0].fulfillment_percent, 100.0);
        assert_eq!(report.buyers[0].name, "B");
        assert_eq!(report.state_root.len(), 64);
    }
}
