//! The trading-phase worker pool.
//!
//! Buyers are split round-robin by id into `worker_count` partitions. The
//! eligibility pass and the commit pass both run one partition per rayon
//! task inside a dedicated pool; `install` returning is the end-of-phase
//! barrier.

use rayon::prelude::*;

use crate::config::AllocationMode;
use crate::engine::execution::{execute_all, CommitOutcome};
use crate::engine::policy::{bids_for, Bid, Proposal};
use crate::error::{MarketError, Result};
use crate::store::EntityStore;
use crate::types::{Buyer, BuyerId, Seller, Trade};

/// Committed trades of a commit pass, in `seq` order, plus the rejection count.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub trades: Vec<Trade>,
    pub rejected: usize,
}

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("market-worker-{i}"))
            .build()
            .map_err(|e| MarketError::WorkerPool(e.to_string()))?;
        Ok(Self { pool, workers })
    }

    #[inline]
    pub fn partition_of(&self, buyer: BuyerId) -> usize {
        (buyer % self.workers as u64) as usize
    }

    /// Split items into `workers` round-robin partitions keyed by buyer id.
    fn partition<T>(&self, items: impl IntoIterator<Item = T>, key: impl Fn(&T) -> BuyerId) -> Vec<Vec<T>> {
        let mut parts: Vec<Vec<T>> = (0..self.workers).map(|_| Vec::new()).collect();
        for item in items {
            parts[self.partition_of(key(&item))].push(item);
        }
        parts
    }

    /// Eligibility pass over the unsatisfied buyers among `buyers`.
    ///
    /// The result is independent of the worker count: bids are re-sorted by
    /// buyer then good after the join.
    pub fn bids(&self, buyers: &[Buyer], sellers: &[Seller], mode: AllocationMode) -> Vec<Bid> {
        let interested = buyers.iter().filter(|b| !b.is_satisfied()).cloned();
        let parts = self.partition(interested, |b| b.id);

        let mut bids = self.pool.install(|| {
            parts
                .into_par_iter()
                .flat_map_iter(|part| bids_for(&part, sellers, mode))
                .collect::<Vec<_>>()
        });
        bids.sort_by_key(|b| (b.buyer, b.good));
        bids
    }

    /// Commit pass: each worker commits the proposals of its own buyers.
    pub fn commit(&self, store: &EntityStore, proposals: &[Proposal], round: u64) -> Result<CommitBatch> {
        let parts = self.partition(proposals.iter().copied(), |p| p.buyer);

        let outcomes = self.pool.install(|| {
            parts
                .par_iter()
                .map(|part| execute_all(store, part, round))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut batch = CommitBatch::default();
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                CommitOutcome::Committed(trade) => batch.trades.push(trade),
                CommitOutcome::Rejected(_) => batch.rejected += 1,
            }
        }
        batch.trades.sort_by_key(|t| t.seq);
        Ok(batch)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("workers", &self.workers).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::policy::allocate;
    use crate::store::Directory;

    fn market(buyers: u64) -> (Vec<Seller>, Vec<Buyer>) {
        let sellers = vec![
            Seller::new(0, [20, 20, 20], [100_000_000; 3]),
            Seller::new(1, [20, 20, 20], [90_000_000; 3]),
        ];
        let buyers = (0..buyers)
            .map(|id| Buyer::new(id, [3, 2, 1], [100_000_000; 3], 1_000_000_000, (id % 3) as u32))
            .collect();
        (sellers, buyers)
    }

    #[test]
    fn test_bids_independent_of_worker_count() {
        let (sellers, buyers) = market(17);
        let one = WorkerPool::new(1).unwrap().bids(&buyers, &sellers, AllocationMode::BestPrice);
        let five = WorkerPool::new(5).unwrap().bids(&buyers, &sellers, AllocationMode::BestPrice);

        assert_eq!(one, five);
        assert_eq!(one.len(), 17 * 3);
    }

    #[test]
    fn test_satisfied_buyers_do_not_bid() {
        let (sellers, mut buyers) = market(4);
        buyers[2].demand = [0; 3];

        let bids = WorkerPool::new(2).unwrap().bids(&buyers, &sellers, AllocationMode::FirstFit);
        assert!(bids.iter().all(|b| b.buyer != 2));
    }

    #[test]
    fn test_commit_sorts_by_seq() {
        let (sellers, buyers) = market(9);
        let pool = WorkerPool::new(3).unwrap();
        let store = EntityStore::from_records(Directory::default(), sellers.clone(), buyers.clone(), 0);

        let bids = pool.bids(&buyers, &sellers, AllocationMode::BestPrice);
        let proposals = allocate(&bids, &sellers, AllocationMode::BestPrice, &mut 0);
        let batch = pool.commit(&store, &proposals, 0).unwrap();

        assert_eq!(batch.rejected, 0);
        assert_eq!(batch.trades.len(), proposals.len());
        assert!(batch.trades.windows(2).all(|w| w[0].seq < w[1].seq));
        assert!(store.audit().is_ok());
    }
}
