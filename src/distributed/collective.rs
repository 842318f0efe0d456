//! Collective operations between ranks.
//!
//! Ranks share no entity memory; everything they exchange goes through a
//! [`Collective`] as encoded bytes. Every rank must call the same sequence
//! of collectives. Each call carries an operation number so a rank that
//! falls out of step is reported instead of reading the wrong message.
//!
//! [`LocalCluster`] wires `size` ranks together with one channel per ordered
//! pair of ranks, for running a cluster inside one process.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{MarketError, Result};

/// Synchronizing operations over byte payloads.
///
/// All operations are collective: every rank calls them in the same order.
pub trait Collective: Send {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// `root` supplies `payload`; every rank returns it.
    fn broadcast(&mut self, root: usize, payload: Option<Vec<u8>>) -> Result<Vec<u8>>;

    /// Collect one payload per rank at `root`, indexed by rank.
    /// Non-root ranks get `None`.
    fn gather(&mut self, root: usize, payload: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>>;

    /// Logical AND of one flag per rank, returned to every rank.
    fn all_reduce_and(&mut self, value: bool) -> Result<bool> {
        let gathered = self.gather(0, vec![value as u8])?;
        let reduced = gathered.map(|flags| {
            let all = flags.iter().all(|f| f.first() == Some(&1));
            vec![all as u8]
        });
        let result = self.broadcast(0, reduced)?;
        Ok(result.first() == Some(&1))
    }

    /// Return only once every rank has entered the barrier.
    fn barrier(&mut self) -> Result<()> {
        self.all_reduce_and(true).map(|_| ())
    }
}

#[derive(Debug)]
struct Envelope {
    op: u64,
    payload: Vec<u8>,
}

/// One rank of an in-process cluster.
#[derive(Debug)]
pub struct LocalRank {
    rank: usize,
    /// `outbox[r]` delivers to rank r
    outbox: Vec<Sender<Envelope>>,
    /// `inbox[r]` receives from rank r
    inbox: Vec<Receiver<Envelope>>,
    op: u64,
    timeout: Duration,
}

/// Factory for in-process ranks.
pub struct LocalCluster;

impl LocalCluster {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create `size` connected ranks; element `r` is rank `r`.
    pub fn new(size: usize) -> Vec<LocalRank> {
        Self::with_timeout(size, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(size: usize, timeout: Duration) -> Vec<LocalRank> {
        // channels[from][to]
        let channels: Vec<Vec<(Sender<Envelope>, Receiver<Envelope>)>> =
            (0..size).map(|_| (0..size).map(|_| unbounded()).collect()).collect();

        (0..size)
            .map(|rank| LocalRank {
                rank,
                outbox: (0..size).map(|to| channels[rank][to].0.clone()).collect(),
                inbox: (0..size).map(|from| channels[from][rank].1.clone()).collect(),
                op: 0,
                timeout,
            })
            .collect()
    }
}

impl LocalRank {
    fn send(&self, to: usize, payload: Vec<u8>) -> Result<()> {
        self.outbox[to]
            .send(Envelope { op: self.op, payload })
            .map_err(|_| MarketError::Collective(format!("rank {to} is gone")))
    }

    fn recv(&self, from: usize) -> Result<Vec<u8>> {
        let envelope = self.inbox[from].recv_timeout(self.timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => MarketError::Collective(format!(
                "rank {} timed out waiting for rank {from} in operation {}",
                self.rank, self.op
            )),
            RecvTimeoutError::Disconnected => MarketError::Collective(format!("rank {from} is gone")),
        })?;
        if envelope.op != self.op {
            return Err(MarketError::Collective(format!(
                "rank {} expected operation {} from rank {from}, got {}",
                self.rank, self.op, envelope.op
            )));
        }
        Ok(envelope.payload)
    }

    fn check_root(&self, root: usize) -> Result<()> {
        if root >= self.outbox.len() {
            return Err(MarketError::Collective(format!(
                "root {root} outside cluster of {}",
                self.outbox.len()
            )));
        }
        Ok(())
    }
}

impl Collective for LocalRank {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.outbox.len()
    }

    fn broadcast(&mut self, root: usize, payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
        self.check_root(root)?;
        self.op += 1;

        if self.rank == root {
            let payload = payload.ok_or_else(|| {
                MarketError::Collective(format!("broadcast root {root} supplied no payload"))
            })?;
            for to in (0..self.size()).filter(|&r| r != root) {
                self.send(to, payload.clone())?;
            }
            Ok(payload)
        } else {
            self.recv(root)
        }
    }

    fn gather(&mut self, root: usize, payload: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>> {
        self.check_root(root)?;
        self.op += 1;

        if self.rank != root {
            self.send(root, payload)?;
            return Ok(None);
        }

        let mut gathered = Vec::with_capacity(self.size());
        let mut own = Some(payload);
        for from in 0..self.size() {
            if from == root {
                gathered.push(own.take().unwrap_or_default());
            } else {
                gathered.push(self.recv(from)?);
            }
        }
        Ok(Some(gathered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_cluster<T: Send>(size: usize, f: impl Fn(LocalRank) -> T + Sync) -> Vec<T> {
        let ranks = LocalCluster::new(size);
        std::thread::scope(|s| {
            let handles: Vec<_> = ranks.into_iter().map(|r| s.spawn(|| f(r))).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn test_broadcast_reaches_every_rank() {
        let results = run_cluster(4, |mut rank| {
            let payload = (rank.rank() == 0).then(|| b"snapshot".to_vec());
            rank.broadcast(0, payload).unwrap()
        });
        assert!(results.iter().all(|r| r == b"snapshot"));
    }

    #[test]
    fn test_gather_orders_by_rank() {
        let results = run_cluster(3, |mut rank| {
            let me = rank.rank() as u8;
            rank.gather(0, vec![me, me]).unwrap()
        });
        assert_eq!(results[0], Some(vec![vec![0, 0], vec![1, 1], vec![2, 2]]));
        assert!(results[1].is_none());
    }

    #[test]
    fn test_all_reduce_and_agrees() {
        let results = run_cluster(3, |mut rank| {
            let first = rank.all_reduce_and(true).unwrap();
            let second = rank.all_reduce_and(rank.rank() != 2).unwrap();
            rank.barrier().unwrap();
            (first, second)
        });
        assert!(results.iter().all(|&r| r == (true, false)));
    }

    #[test]
    fn test_single_rank_cluster() {
        let mut ranks = LocalCluster::new(1);
        let mut rank = ranks.remove(0);

        assert_eq!(rank.broadcast(0, Some(vec![7])).unwrap(), vec![7]);
        assert_eq!(rank.gather(0, vec![1]).unwrap(), Some(vec![vec![1]]));
        assert!(!rank.all_reduce_and(false).unwrap());
    }

    #[test]
    fn test_departed_peer_is_an_error() {
        let mut ranks = LocalCluster::new(2);
        let peer = ranks.pop().unwrap();
        let mut root = ranks.pop().unwrap();
        drop(peer);

        assert!(matches!(root.gather(0, vec![]), Err(MarketError::Collective(_))));
    }

    #[test]
    fn test_bad_root_rejected() {
        let mut ranks = LocalCluster::new(2);
        assert!(ranks[0].broadcast(5, None).is_err());
    }
}
