//! The round controller.
//!
//! ## State Machine
//!
//! ```text
//! Open -> Trading -> Settling -> Deciding -> Open
//!                                         \-> Closed(reason)
//! ```
//!
//! - **Trading**: eligibility per partition, central allocation, commits
//!   per partition. The pool join ends the phase.
//! - **Settling**: the round's trades are sorted by `seq`, appended to the
//!   log and every record is audited.
//! - **Deciding**: success, then depletion, then the round limit. A round
//!   that stays open decays asks and moves to the next round number.
//!
//! ## Example
//!
//! ```
//! use flower_exchange::{CollectingSink, Market, MarketConfig, Scenario};
//!
//! let mut market = Market::new(&Scenario::flower_market(), &MarketConfig::default()).unwrap();
//! let report = market.run(&mut CollectingSink::default()).unwrap();
//!
//! assert!(report.rounds_run <= 30);
//! assert_eq!(report.total_revenue(), report.total_spent());
//! ```

use std::time::Instant;

use crate::config::{MarketConfig, RunParams};
use crate::engine::decay::{apply_decay, traded_pairs};
use crate::engine::policy::allocate;
use crate::engine::report::{
    CloseReason, FinalReport, MarketConditions, MarketSummary, ReportSink, RoundReport, RunOutcome,
};
use crate::engine::workers::WorkerPool;
use crate::error::{MarketError, Result};
use crate::scenario::Scenario;
use crate::store::EntityStore;
use crate::types::{price, RoundReceipt, Trade};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Open,
    Trading,
    Settling,
    Deciding,
    Closed(CloseReason),
}

/// Termination check shared by the in-process and distributed controllers.
///
/// `completed_rounds` counts the round that just settled.
pub fn termination(
    all_satisfied: bool,
    all_depleted: bool,
    completed_rounds: u64,
    max_rounds: u64,
) -> Option<CloseReason> {
    if all_satisfied {
        Some(CloseReason::Success)
    } else if all_depleted {
        Some(CloseReason::Depleted)
    } else if completed_rounds >= max_rounds {
        Some(CloseReason::Timeout)
    } else {
        None
    }
}

/// An in-process market run.
#[derive(Debug)]
pub struct Market {
    store: EntityStore,
    params: RunParams,
    workers: WorkerPool,
    phase: RoundPhase,
    round: u64,
    next_seq: u64,
    log: Vec<Trade>,
    total_volume: u64,
}

impl Market {
    pub fn new(scenario: &Scenario, config: &MarketConfig) -> Result<Self> {
        let params = config.validate()?;
        let store = EntityStore::from_scenario(scenario, &params)?;
        Self::with_store(store, params)
    }

    pub fn with_store(store: EntityStore, params: RunParams) -> Result<Self> {
        Ok(Self {
            workers: WorkerPool::new(params.worker_count)?,
            store,
            params,
            phase: RoundPhase::Open,
            round: 0,
            next_seq: 0,
            log: Vec::new(),
            total_volume: 0,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Current round number (0-based)
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn params(&self) -> &RunParams {
        &self.params
    }

    /// Every committed trade so far, in `seq` order
    pub fn trades(&self) -> &[Trade] {
        &self.log
    }

    pub fn total_volume(&self) -> u64 {
        self.total_volume
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, RoundPhase::Closed(_))
    }

    // ========================================================================
    // Round Execution
    // ========================================================================

    /// Run one full round. Returns the round's report and, if the market
    /// closed, the reason. A closed market refuses further rounds.
    pub fn step(&mut self) -> Result<(RoundReport, Option<CloseReason>)> {
        if let RoundPhase::Closed(reason) = self.phase {
            return Err(MarketError::MarketClosed(reason));
        }
        let round = self.round;

        // Trading
        self.phase = RoundPhase::Trading;
        let snapshot = self.store.snapshot();
        let bids = self.workers.bids(&snapshot.buyers, &snapshot.sellers, self.params.allocation_mode);
        let proposals = allocate(&bids, &snapshot.sellers, self.params.allocation_mode, &mut self.next_seq);
        let batch = self.workers.commit(&self.store, &proposals, round)?;

        // Settling
        self.phase = RoundPhase::Settling;
        let trades = batch.trades;
        let units = price::total(trades.iter().map(|t| t.quantity))
            .ok_or_else(|| MarketError::overflow(format_args!("units traded in round {round}")))?;
        let volume = price::total(trades.iter().map(|t| t.cost))
            .ok_or_else(|| MarketError::overflow(format_args!("volume of round {round}")))?;
        self.total_volume = self
            .total_volume
            .checked_add(volume)
            .ok_or_else(|| MarketError::overflow("total volume"))?;
        self.log.extend(trades.iter().cloned());
        self.store.audit()?;

        let settled = self.store.snapshot();
        let receipt = RoundReceipt::new(
            round,
            bids.len() as u64,
            trades.len() as u64,
            units,
            volume,
            RoundReceipt::state_root_of(&settled.sellers, &settled.buyers)?,
        );
        if batch.rejected > 0 {
            tracing::debug!(target: "round", round, rejected = batch.rejected, "proposals rejected");
        }

        // Deciding
        self.phase = RoundPhase::Deciding;
        let verdict = termination(
            settled.all_buyers_satisfied(),
            settled.all_sellers_depleted(),
            round + 1,
            self.params.max_rounds,
        );
        match verdict {
            Some(reason) => self.phase = RoundPhase::Closed(reason),
            None => {
                let decayed = apply_decay(&self.store, &self.params, &traded_pairs(&trades))?;
                tracing::debug!(target: "round", round, decayed, "asks decayed");
                self.round += 1;
                self.phase = RoundPhase::Open;
            }
        }

        let report = RoundReport {
            round,
            conditions: MarketConditions::from_records(&settled.sellers, &settled.buyers),
            trades,
            sellers: settled.sellers,
            buyers: settled.buyers,
            receipt,
        };
        Ok((report, verdict))
    }

    /// Run rounds until the market closes.
    pub fn run(&mut self, sink: &mut dyn ReportSink) -> Result<FinalReport> {
        let started = Instant::now();
        let opening = self.store.snapshot();
        let summary = MarketSummary::from_snapshot(&opening);
        sink.market_open(&summary);

        let mut rounds_run = 0;
        let reason = loop {
            let (report, verdict) = self.step()?;
            rounds_run += 1;
            sink.round_settled(&report);
            if let Some(reason) = verdict {
                break reason;
            }
        };

        let closing = self.store.snapshot();
        let report = FinalReport::build(RunOutcome {
            directory: self.store.directory(),
            snapshot: &closing,
            trades: self.log.clone(),
            summary,
            close_reason: reason,
            rounds_run,
            elapsed: started.elapsed(),
        })?;
        sink.market_closed(&report);
        Ok(report)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::report::CollectingSink;
    use crate::scenario::{BuyerSpec, SellerSpec};

    #[test]
    fn test_termination_priority() {
        assert_eq!(termination(true, true, 30, 30), Some(CloseReason::Success));
        assert_eq!(termination(false, true, 30, 30), Some(CloseReason::Depleted));
        assert_eq!(termination(false, false, 30, 30), Some(CloseReason::Timeout));
        assert_eq!(termination(false, false, 29, 30), None);
    }

    #[test]
    fn test_single_round_success() {
        let scenario = Scenario::new(
            vec![SellerSpec::new("S", [5, 0, 0], [2.0, 1.0, 1.0])],
            vec![BuyerSpec::new("B", [3, 0, 0], 10.0, [2.0, 0.0, 0.0])],
        );
        let mut market = Market::new(&scenario, &MarketConfig::default()).unwrap();
        assert_eq!(market.phase(), RoundPhase::Open);

        let (report, verdict) = market.step().unwrap();
        assert_eq!(verdict, Some(CloseReason::Success));
        assert_eq!(market.phase(), RoundPhase::Closed(CloseReason::Success));
        assert_eq!(report.round, 0);
        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.receipt.units_traded, 3);
        assert_eq!(market.total_volume(), 600_000_000);
    }

    #[test]
    fn test_closed_market_refuses_rounds() {
        let scenario = Scenario::new(
            vec![SellerSpec::new("S", [5, 0, 0], [2.0, 1.0, 1.0])],
            vec![BuyerSpec::new("B", [3, 0, 0], 10.0, [2.0, 0.0, 0.0])],
        );
        let mut market = Market::new(&scenario, &MarketConfig::default()).unwrap();
        market.run(&mut CollectingSink::default()).unwrap();
        let before = market.store().snapshot();

        let err = market.step().unwrap_err();
        assert!(matches!(err, MarketError::MarketClosed(CloseReason::Success)));
        assert_eq!(market.round(), 0);
        assert_eq!(market.trades().len(), 1);
        assert_eq!(market.store().snapshot(), before);
    }

    #[test]
    fn test_open_round_decays_and_advances() {
        // ceiling 1.5 against an ask of 2.0: no trade until decay catches up
        let scenario = Scenario::new(
            vec![SellerSpec::new("S", [5, 0, 0], [2.0, 1.0, 1.0])],
            vec![BuyerSpec::new("B", [1, 0, 0], 10.0, [1.5, 0.0, 0.0])],
        );
        let mut market = Market::new(&scenario, &MarketConfig::default()).unwrap();

        let (_, verdict) = market.step().unwrap();
        assert_eq!(verdict, None);
        assert_eq!(market.round(), 1);
        assert_eq!(market.store().seller_records()[0].price[0], 180_000_000);

        let mut sink = CollectingSink::default();
        let report = market.run(&mut sink).unwrap();
        assert_eq!(report.close_reason, CloseReason::Success);
        // 2.0 -> 1.8 -> 1.6 -> 1.4, trade in round 3
        assert_eq!(report.trades[0].round, 3);
        assert_eq!(report.trades[0].unit_price, 140_000_000);
        assert_eq!(sink.rounds.len(), 3);
    }

    #[test]
    fn test_rounds_stop_at_limit() {
        let scenario = Scenario::new(
            vec![SellerSpec::new("S", [5, 0, 0], [9.0, 1.0, 1.0])],
            vec![BuyerSpec::new("B", [1, 0, 0], 10.0, [0.1, 0.0, 0.0])],
        );
        let config = MarketConfig::default().with_max_rounds(4);
        let mut market = Market::new(&scenario, &config).unwrap();

        let report = market.run(&mut CollectingSink::default()).unwrap();
        assert_eq!(report.close_reason, CloseReason::Timeout);
        assert_eq!(report.rounds_run, 4);
        assert_eq!(report.total_trades, 0);
    }
}
