//! One rank of a distributed market.
//!
//! ## Ownership
//!
//! Every rank builds its store from the full scenario, but only mutates the
//! buyers it owns (`id % size == rank`). Rank 0, the coordinator, also
//! keeps the authoritative seller records; other ranks only ever see
//! replicas broadcast at the start of a round.
//!
//! ## Round Protocol
//!
//! 1. Coordinator broadcasts the seller snapshot
//! 2. Each rank computes bids for its buyers; bids are gathered
//! 3. Coordinator allocates and broadcasts every proposal
//! 4. Each rank commits the proposals of its own buyers locally
//! 5. Committed trades and owned buyer records are gathered; the
//!    coordinator folds the trades into authoritative sellers by `seq`
//! 6. Two all-reduce ANDs decide success and depletion on every rank
//!
//! The allocation is the same pass the in-process controller runs, so a
//! cluster of any size produces the trade log of a single process.

use std::collections::HashSet;
use std::time::Instant;

use crate::config::{MarketConfig, RunParams};
use crate::distributed::collective::{Collective, LocalCluster, LocalRank};
use crate::distributed::messages::{
    decode_bids, decode_frame, decode_proposals, encode_bids, encode_frame, encode_proposals,
};
use crate::engine::decay::{apply_decay, traded_pairs};
use crate::engine::policy::{allocate, Proposal};
use crate::engine::report::{
    CloseReason, CollectingSink, FinalReport, MarketConditions, MarketSummary, ReportSink, RoundReport,
    RunOutcome,
};
use crate::engine::round::termination;
use crate::engine::workers::WorkerPool;
use crate::error::{MarketError, Result};
use crate::scenario::Scenario;
use crate::store::EntityStore;
use crate::types::{price, Buyer, BuyerId, RoundReceipt, Seller, Trade};

/// Rank that owns seller state and allocates.
pub const COORDINATOR: usize = 0;

/// Rank that owns `buyer` in a cluster of `size`.
#[inline]
pub fn owner_of(buyer: BuyerId, size: usize) -> usize {
    (buyer % size.max(1) as u64) as usize
}

/// Fold committed trades into authoritative seller state.
///
/// Trades are applied in `seq` order. A `seq` seen before is skipped. A
/// trade that takes more than the seller has left is a
/// [`MarketError::ReconciliationConflict`]; it is never clamped.
pub fn reconcile(authority: &mut [Seller], applied: &mut HashSet<u64>, mut deltas: Vec<Trade>) -> Result<Vec<Trade>> {
    deltas.sort_by_key(|t| t.seq);
    let mut accepted = Vec::with_capacity(deltas.len());

    for trade in deltas {
        if !applied.insert(trade.seq) {
            tracing::warn!(target: "coordination", seq = trade.seq, "duplicate delta skipped");
            continue;
        }

        let seller = authority
            .get_mut(trade.seller as usize)
            .ok_or(MarketError::UnknownEntity { kind: "seller", id: trade.seller })?;
        let good = trade.good();
        let available = seller.quantity_of(good);
        if trade.quantity > available {
            tracing::error!(
                target: "coordination",
                seq = trade.seq,
                seller = trade.seller,
                %good,
                available,
                requested = trade.quantity,
                "reconciliation conflict"
            );
            return Err(MarketError::ReconciliationConflict {
                seller: trade.seller,
                good,
                seq: trade.seq,
                available,
                requested: trade.quantity,
            });
        }

        seller.revenue = seller
            .revenue
            .checked_add(trade.cost)
            .ok_or_else(|| MarketError::overflow(format_args!("revenue of seller {}", trade.seller)))?;
        seller.quantity[good.index()] -= trade.quantity;
        seller.trade_count += 1;
        accepted.push(trade);
    }

    Ok(accepted)
}

pub struct RankNode<C: Collective> {
    collective: C,
    store: EntityStore,
    params: RunParams,
    workers: WorkerPool,
    owned: Vec<BuyerId>,
    round: u64,

    // Coordinator only
    authority: Vec<Seller>,
    applied: HashSet<u64>,
    next_seq: u64,
    log: Vec<Trade>,
}

impl<C: Collective> RankNode<C> {
    pub fn new(collective: C, scenario: &Scenario, params: RunParams) -> Result<Self> {
        let store = EntityStore::from_scenario(scenario, &params)?;
        let (rank, size) = (collective.rank(), collective.size());
        let owned = (0..store.buyer_count() as BuyerId)
            .filter(|&id| owner_of(id, size) == rank)
            .collect();
        let authority = if rank == COORDINATOR {
            store.seller_records()
        } else {
            Vec::new()
        };

        Ok(Self {
            workers: WorkerPool::new(params.worker_count)?,
            collective,
            store,
            params,
            owned,
            round: 0,
            authority,
            applied: HashSet::new(),
            next_seq: 0,
            log: Vec::new(),
        })
    }

    pub fn rank(&self) -> usize {
        self.collective.rank()
    }

    pub fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR
    }

    /// Buyer ids this rank owns
    pub fn owned(&self) -> &[BuyerId] {
        &self.owned
    }

    fn owned_buyers(&self) -> Result<Vec<Buyer>> {
        self.owned.iter().map(|&id| self.store.buyer_record(id)).collect()
    }

    /// Run rounds until the cluster agrees to close.
    ///
    /// The coordinator reports to `sink` and returns the final report;
    /// other ranks return `None`.
    pub fn run(&mut self, sink: &mut dyn ReportSink) -> Result<Option<FinalReport>> {
        let started = Instant::now();
        tracing::info!(
            target: "coordination",
            rank = self.rank(),
            size = self.collective.size(),
            owned = self.owned.len(),
            "rank joined"
        );

        let summary = MarketSummary::from_snapshot(&self.store.snapshot());
        if self.is_coordinator() {
            sink.market_open(&summary);
        }

        let mut rounds_run = 0;
        let reason = loop {
            let verdict = self.step(sink)?;
            rounds_run += 1;
            if let Some(reason) = verdict {
                break reason;
            }
        };
        self.collective.barrier()?;

        if !self.is_coordinator() {
            return Ok(None);
        }

        let closing = self.store.snapshot();
        let report = FinalReport::build(RunOutcome {
            directory: self.store.directory(),
            snapshot: &closing,
            trades: std::mem::take(&mut self.log),
            summary,
            close_reason: reason,
            rounds_run,
            elapsed: started.elapsed(),
        })?;
        sink.market_closed(&report);
        Ok(Some(report))
    }

    fn step(&mut self, sink: &mut dyn ReportSink) -> Result<Option<CloseReason>> {
        let round = self.round;
        let (rank, size) = (self.rank(), self.collective.size());
        let coordinator = self.is_coordinator();

        // Seller snapshot
        let payload = if coordinator {
            Some(encode_frame(&self.authority)?)
        } else {
            None
        };
        let sellers: Vec<Seller> = decode_frame(&self.collective.broadcast(COORDINATOR, payload)?)?;
        self.store.replace_sellers(&sellers)?;

        // Bids
        let buyers = self.owned_buyers()?;
        let bids = self.workers.bids(&buyers, &sellers, self.params.allocation_mode);
        let gathered = self.collective.gather(COORDINATOR, encode_bids(&bids)?)?;

        // Allocation
        let mut bid_count = 0;
        let payload = match gathered {
            Some(frames) => {
                let mut all = Vec::new();
                for frame in &frames {
                    all.extend(decode_bids(frame)?);
                }
                bid_count = all.len() as u64;
                let proposals = allocate(&all, &self.authority, self.params.allocation_mode, &mut self.next_seq);
                tracing::debug!(
                    target: "coordination",
                    round,
                    bids = all.len(),
                    proposals = proposals.len(),
                    "allocated"
                );
                Some(encode_proposals(&proposals)?)
            }
            None => None,
        };
        let mine: Vec<Proposal> = decode_proposals(&self.collective.broadcast(COORDINATOR, payload)?)?
            .into_iter()
            .filter(|p| owner_of(p.buyer, size) == rank)
            .collect();

        // Local commit
        let batch = self.workers.commit(&self.store, &mine, round)?;
        self.store.audit_buyers(&self.owned)?;
        tracing::debug!(
            target: "coordination",
            rank,
            round,
            committed = batch.trades.len(),
            rejected = batch.rejected,
            "local commits"
        );

        // Deltas and buyer state
        let deltas = self.collective.gather(COORDINATOR, encode_frame(&batch.trades)?)?;
        let buyer_frames = self.collective.gather(COORDINATOR, encode_frame(&self.owned_buyers()?)?)?;

        let mut round_trades = Vec::new();
        if let (Some(deltas), Some(buyer_frames)) = (deltas, buyer_frames) {
            let mut all = Vec::new();
            for frame in &deltas {
                all.extend(decode_frame::<Trade>(frame)?);
            }
            round_trades = reconcile(&mut self.authority, &mut self.applied, all)?;
            self.log.extend(round_trades.iter().cloned());

            for frame in &buyer_frames {
                for buyer in decode_frame::<Buyer>(frame)? {
                    self.store.replace_buyer(buyer)?;
                }
            }
            self.store.replace_sellers(&self.authority)?;
            self.store.audit()?;
        }

        // Decision
        let local_satisfied = self.owned_buyers()?.iter().all(Buyer::is_satisfied);
        let all_satisfied = self.collective.all_reduce_and(local_satisfied)?;
        let local_depleted = !coordinator || self.authority.iter().all(Seller::is_depleted);
        let all_depleted = self.collective.all_reduce_and(local_depleted)?;
        let verdict = termination(all_satisfied, all_depleted, round + 1, self.params.max_rounds);

        if coordinator {
            let settled = self.store.snapshot();
            let units = price::total(round_trades.iter().map(|t| t.quantity))
                .ok_or_else(|| MarketError::overflow(format_args!("units traded in round {round}")))?;
            let volume = price::total(round_trades.iter().map(|t| t.cost))
                .ok_or_else(|| MarketError::overflow(format_args!("volume of round {round}")))?;
            let receipt = RoundReceipt::new(
                round,
                bid_count,
                round_trades.len() as u64,
                units,
                volume,
                RoundReceipt::state_root_of(&settled.sellers, &settled.buyers)?,
            );
            sink.round_settled(&RoundReport {
                round,
                conditions: MarketConditions::from_records(&settled.sellers, &settled.buyers),
                trades: round_trades.clone(),
                sellers: settled.sellers,
                buyers: settled.buyers,
                receipt,
            });

            if verdict.is_none() {
                apply_decay(&self.store, &self.params, &traded_pairs(&round_trades))?;
                self.authority = self.store.seller_records();
            }
        }

        if verdict.is_none() {
            self.round += 1;
        }
        Ok(verdict)
    }
}

/// Run a cluster of `config.process_count` ranks on threads of this process.
///
/// The coordinator runs on the calling thread and reports to `sink`.
pub fn run_cluster(scenario: &Scenario, config: &MarketConfig, sink: &mut dyn ReportSink) -> Result<FinalReport> {
    let params = config.validate()?;
    let mut ranks = LocalCluster::new(params.process_count).into_iter();
    let coordinator = ranks
        .next()
        .ok_or_else(|| MarketError::Configuration("process_count must be positive".into()))?;

    std::thread::scope(|s| -> Result<FinalReport> {
        let mut handles = Vec::new();
        for rank in ranks {
            let id = rank.rank();
            let handle = std::thread::Builder::new()
                .name(format!("rank-{id}"))
                .spawn_scoped(s, move || run_peer(rank, scenario, params))?;
            handles.push((id, handle));
        }

        let outcome = run_coordinator(coordinator, scenario, params, sink);

        let mut peer_error = None;
        for (id, handle) in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(target: "coordination", rank = id, error = %e, "rank failed");
                    peer_error.get_or_insert(e);
                }
                Err(_) => {
                    peer_error.get_or_insert(MarketError::Collective(format!("rank {id} panicked")));
                }
            }
        }

        let report = outcome?;
        match peer_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    })
}

fn run_coordinator(
    rank: LocalRank,
    scenario: &Scenario,
    params: RunParams,
    sink: &mut dyn ReportSink,
) -> Result<FinalReport> {
    let mut node = RankNode::new(rank, scenario, params)?;
    node.run(sink)?
        .ok_or_else(|| MarketError::Collective("coordinator produced no report".into()))
}

fn run_peer(rank: LocalRank, scenario: &Scenario, params: RunParams) -> Result<()> {
    let mut node = RankNode::new(rank, scenario, params)?;
    node.run(&mut CollectingSink::default()).map(|_| ())
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GoodType;

    fn authority() -> Vec<Seller> {
        vec![Seller::new(0, [5, 2, 0], [100, 100, 100]), Seller::new(1, [3, 0, 0], [100, 100, 100])]
    }

    #[test]
    fn test_owner_is_round_robin() {
        let owners: Vec<_> = (0..7).map(|id| owner_of(id, 3)).collect();
        assert_eq!(owners, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(owner_of(5, 1), 0);
    }

    #[test]
    fn test_reconcile_applies_in_seq_order() {
        let mut sellers = authority();
        let mut applied = HashSet::new();
        let deltas = vec![
            Trade::new(4, 0, 1, 0, GoodType::Rose, 2, 100).unwrap(),
            Trade::new(1, 0, 0, 0, GoodType::Rose, 3, 100).unwrap(),
        ];

        let accepted = reconcile(&mut sellers, &mut applied, deltas).unwrap();
        assert_eq!(accepted.iter().map(|t| t.seq).collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(sellers[0].quantity[0], 0);
        assert_eq!(sellers[0].revenue, 500);
        assert_eq!(sellers[0].trade_count, 2);
    }

    #[test]
    fn test_reconcile_skips_duplicates() {
        let mut sellers = authority();
        let mut applied = HashSet::new();
        let trade = Trade::new(7, 0, 0, 1, GoodType::Rose, 1, 100).unwrap();

        reconcile(&mut sellers, &mut applied, vec![trade.clone()]).unwrap();
        let accepted = reconcile(&mut sellers, &mut applied, vec![trade]).unwrap();

        assert!(accepted.is_empty());
        assert_eq!(sellers[1].quantity[0], 2);
    }

    #[test]
    fn test_reconcile_conflict_is_fatal() {
        let mut sellers = authority();
        let mut applied = HashSet::new();
        let deltas = vec![
            Trade::new(0, 0, 0, 0, GoodType::Sunflower, 2, 100).unwrap(),
            Trade::new(1, 0, 1, 0, GoodType::Sunflower, 1, 100).unwrap(),
        ];

        let err = reconcile(&mut sellers, &mut applied, deltas).unwrap_err();
        assert!(matches!(
            err,
            MarketError::ReconciliationConflict {
                seller: 0,
                good: GoodType::Sunflower,
                seq: 1,
                available: 0,
                requested: 1,
            }
        ));
    }

    #[test]
    fn test_reconcile_revenue_overflow_is_fatal() {
        let mut sellers = authority();
        sellers[0].revenue = u64::MAX - 50;
        let mut applied = HashSet::new();
        let deltas = vec![Trade::new(0, 0, 0, 0, GoodType::Rose, 1, 100).unwrap()];

        let err = reconcile(&mut sellers, &mut applied, deltas).unwrap_err();
        assert!(matches!(err, MarketError::InvariantViolation { .. }));
        assert_eq!(sellers[0].quantity[0], 5);
    }

    #[test]
    fn test_ranks_split_buyers() {
        let scenario = Scenario::flower_market();
        let params = MarketConfig::default().with_process_count(3).validate().unwrap();
        let mut ranks = LocalCluster::new(3);

        let third = RankNode::new(ranks.pop().unwrap(), &scenario, params).unwrap();
        assert_eq!(third.owned().first(), Some(&2));
        assert!(third.owned().iter().all(|id| id % 3 == 2));
        assert!(!third.is_coordinator());
        assert!(third.authority.is_empty());
    }
}
