//! # Flower Exchange
//!
//! A round-based double-auction market. Sellers post asks for three kinds
//! of flowers, buyers carry demand, a budget and a price ceiling per good,
//! and trading runs in rounds until every buyer is satisfied, every seller
//! is sold out, or the round limit is hit.
//!
//! ## Architecture
//!
//! - **Types**: fixed-point money, goods, seller/buyer records, trades, receipts
//! - **Store**: one lock per record, ordered pair locking, audits
//! - **Engine**: allocation policy, trade execution, decay, round controller
//! - **Distributed**: the same rounds across ranks with a coordinator
//!
//! ## Design Principles
//!
//! 1. **Determinism**: identical input gives an identical trade log and
//!    state root, for any worker or rank count
//! 2. **No Floating Point**: all money is fixed-point (10^8 scaling)
//! 3. **Exact Conservation**: `spent + budget` never drifts
//! 4. **Deadlock Freedom**: one global lock order, seller before buyer
//!
//! ## Example
//!
//! ```
//! use flower_exchange::{run, LogSink, MarketConfig, Scenario};
//!
//! let config = MarketConfig::default().with_worker_count(2);
//! let report = run(&Scenario::random(7, 4, 12), &config, &mut LogSink).unwrap();
//!
//! assert_eq!(report.buyers.len(), 12);
//! assert_eq!(report.total_revenue(), report.total_spent());
//! ```

// ============================================================================
// Module declarations
// ============================================================================

/// Core data types: goods, records, trades, receipts
pub mod types;

/// Run configuration
pub mod config;

/// Error types
pub mod error;

/// Initial market data
pub mod scenario;

/// Entity store with ordered locking
pub mod store;

/// Allocation, execution, decay and the round controller
pub mod engine;

/// Multi-rank execution
pub mod distributed;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use config::{AllocationMode, MarketConfig, RunParams};
pub use engine::{CloseReason, CollectingSink, FinalReport, LogSink, Market, ReportSink, RoundReport};
pub use error::{MarketError, Result};
pub use scenario::{BuyerSpec, Scenario, SellerSpec};
pub use types::{Buyer, GoodType, RoundReceipt, Seller, Trade};

/// Run a market to close: in-process for one process, as a local cluster
/// otherwise.
pub fn run(scenario: &Scenario, config: &MarketConfig, sink: &mut dyn ReportSink) -> Result<FinalReport> {
    if config.process_count > 1 {
        distributed::run_cluster(scenario, config, sink)
    } else {
        Market::new(scenario, config)?.run(sink)
    }
}
