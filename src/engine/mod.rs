//! The trading engine.
//!
//! ## Design Principles
//!
//! 1. **Determinism**: same scenario and configuration, same trade log and
//!    final state, whatever the worker count
//! 2. **Fixed-Point Math**: money never touches floating point
//! 3. **Ordered Locking**: seller before buyer, one acquisition path
//! 4. **Priority Under Scarcity**: higher priority first, then lower id
//!
//! ## Modules
//!
//! - [`policy`]: eligibility, seller selection and allocation
//! - [`execution`]: re-validate and commit one proposal
//! - [`decay`]: between-round ask decay
//! - [`workers`]: the rayon pool that runs partitions
//! - [`round`]: the round controller
//! - [`report`]: reports and sinks

pub mod decay;
pub mod execution;
pub mod policy;
pub mod report;
pub mod round;
pub mod workers;

pub use execution::{execute, revalidate, CommitOutcome, RejectReason};
pub use policy::{allocate, bids_for, match_quantity, Bid, Proposal};
pub use report::{
    Balance, CloseReason, CollectingSink, FinalReport, LogSink, MarketConditions, MarketSummary,
    ReportSink, RoundReport,
};
pub use round::{termination, Market, RoundPhase};
pub use workers::{CommitBatch, WorkerPool};
