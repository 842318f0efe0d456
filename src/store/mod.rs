//! Entity store: one mutex per seller and buyer record.
//!
//! ## Components
//!
//! - [`EntityStore`]: owns every record, hands out scoped guards
//! - [`PairGuard`]: one seller plus one buyer, taken in the global lock order
//! - [`MarketSnapshot`]: owned copy of all records for policy and reporting

pub mod lock;
#[allow(clippy::module_inception)]
pub mod store;

pub use lock::{EntityKind, LockKey, PairGuard};
pub use store::{Directory, EntityStore, MarketSnapshot};
