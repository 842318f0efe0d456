//! Price decay between rounds.
//!
//! Runs only in the deciding phase of a round that stays open, so no trade
//! is in flight. Each seller is still locked while its asks change.

use std::collections::HashSet;

use crate::config::RunParams;
use crate::error::Result;
use crate::store::EntityStore;
use crate::types::{price, GoodType, SellerId, Trade};

/// Seller/good pairs that traded at least once in `trades`.
pub fn traded_pairs(trades: &[Trade]) -> HashSet<(SellerId, GoodType)> {
    trades.iter().map(|t| (t.seller, t.good())).collect()
}

/// Lower asks by one step, clamped at the floor.
///
/// With `decay_only_on_no_trade`, pairs in `traded` keep their ask.
/// Returns how many asks changed.
pub fn apply_decay(
    store: &EntityStore,
    params: &RunParams,
    traded: &HashSet<(SellerId, GoodType)>,
) -> Result<usize> {
    let mut changed = 0;

    for id in 0..store.seller_count() as SellerId {
        let mut seller = store.lock_seller(id)?;
        for good in GoodType::ALL {
            if params.decay_only_on_no_trade && traded.contains(&(id, good)) {
                continue;
            }
            let old = seller.price_of(good);
            let new = price::decay(old, params.price_decay_step, params.price_floor);
            if new != old {
                seller.price[good.index()] = new;
                changed += 1;
                tracing::trace!(
                    target: "round",
                    seller = id,
                    %good,
                    old = %price::from_fixed_trimmed(old),
                    new = %price::from_fixed_trimmed(new),
                    "ask decayed"
                );
            }
        }
    }

    Ok(changed)
}
