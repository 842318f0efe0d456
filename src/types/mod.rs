//! Core data types for the flower exchange
//!
//! Records that cross rank boundaries implement SSZ serialization for
//! deterministic encoding. Money values use fixed-point representation
//! (scaled by 10^8); quantities are whole units.
//!
//! ## Types
//!
//! - [`GoodType`]: Rose, Sunflower or Tulip
//! - [`Seller`] / [`Buyer`]: mutable entity records
//! - [`Trade`]: an executed exchange
//! - [`RoundReceipt`]: per-round summary with state root

mod entity;
mod good;
mod receipt;
mod trade;
pub mod price;

pub use entity::{Buyer, BuyerId, Seller, SellerId};
pub use good::{GoodType, GOOD_COUNT};
pub use receipt::RoundReceipt;
pub use trade::Trade;
