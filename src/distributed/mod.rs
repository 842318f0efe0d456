//! Rank-distributed execution.
//!
//! A market can run across several cooperating ranks that share no memory.
//! Buyers are sharded round-robin by id; rank 0 coordinates. Ranks talk
//! only through a [`Collective`] carrying framed SSZ records.
//!
//! - [`collective`]: the transport trait and the in-process [`LocalCluster`]
//! - [`messages`]: wire records and framing
//! - [`node`]: the per-rank round protocol and reconciliation

pub mod collective;
pub mod messages;
pub mod node;

pub use collective::{Collective, LocalCluster, LocalRank};
pub use messages::{decode_frame, encode_frame, BidRecord, ProposalRecord, WireRecord};
pub use node::{owner_of, reconcile, run_cluster, RankNode, COORDINATOR};
