//! Initial market data.
//!
//! A [`Scenario`] is the ordered list of sellers and buyers supplied once
//! before round 0. Position in the list is the entity id. Scenarios come
//! from JSON files, from the built-in flower market, or from a seeded
//! generator.

use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, Result};
use crate::types::GOOD_COUNT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerSpec {
    pub name: String,
    /// Stock per good (Rose, Sunflower, Tulip)
    pub quantity: [u64; GOOD_COUNT],
    /// Opening ask per good
    pub price: [f64; GOOD_COUNT],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyerSpec {
    pub name: String,
    pub demand: [u64; GOOD_COUNT],
    pub budget: f64,
    pub max_price: [f64; GOOD_COUNT],
    #[serde(default)]
    pub priority: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub sellers: Vec<SellerSpec>,
    pub buyers: Vec<BuyerSpec>,
}

impl SellerSpec {
    pub fn new(name: &str, quantity: [u64; GOOD_COUNT], price: [f64; GOOD_COUNT]) -> Self {
        Self {
            name: name.to_string(),
            quantity,
            price,
        }
    }
}

impl BuyerSpec {
    pub fn new(
        name: &str,
        demand: [u64; GOOD_COUNT],
        budget: f64,
        max_price: [f64; GOOD_COUNT],
    ) -> Self {
        Self {
            name: name.to_string(),
            demand,
            budget,
            max_price,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

impl Scenario {
    pub fn new(sellers: Vec<SellerSpec>, buyers: Vec<BuyerSpec>) -> Self {
        Self { sellers, buyers }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Three well-stocked sellers against 23 buyers.
    pub fn flower_market() -> Self {
        let sellers = vec![
            SellerSpec::new("Alice", [100, 100, 100], [4.5, 4.0, 5.0]),
            SellerSpec::new("Bob", [100, 100, 100], [4.0, 3.8, 4.8]),
            SellerSpec::new("Charlie", [100, 100, 100], [5.0, 3.5, 5.2]),
        ];

        let buyers = [
            ("Dan", [10, 5, 2], 500.0, [4.0, 4.0, 5.0]),
            ("Eve", [5, 5, 0], 300.0, [3.5, 3.5, 0.0]),
            ("Fay", [15, 10, 5], 1000.0, [5.0, 4.5, 5.5]),
            ("Ben", [10, 0, 5], 350.0, [4.5, 0.0, 5.0]),
            ("Lia", [2, 2, 2], 100.0, [4.0, 4.0, 4.0]),
            ("Joe", [5, 10, 5], 400.0, [5.0, 5.0, 5.0]),
            ("Sue", [5, 5, 5], 200.0, [4.5, 4.5, 4.5]),
            ("Amy", [1, 1, 1], 50.0, [3.0, 3.0, 3.0]),
            ("Tim", [4, 6, 3], 250.0, [4.5, 4.5, 5.0]),
            ("Sam", [7, 8, 4], 600.0, [5.0, 5.0, 5.0]),
            ("Jill", [3, 4, 5], 200.0, [4.0, 4.5, 5.0]),
            ("Zoe", [6, 3, 7], 300.0, [4.0, 5.0, 5.5]),
            ("Max", [5, 5, 5], 250.0, [4.5, 4.5, 4.5]),
            ("Ivy", [8, 6, 4], 550.0, [5.0, 5.0, 5.0]),
            ("Leo", [9, 0, 2], 350.0, [4.2, 0.0, 5.0]),
            ("Kim", [3, 3, 3], 180.0, [4.0, 4.0, 4.0]),
            ("Tom", [6, 5, 3], 400.0, [4.8, 4.8, 5.0]),
            ("Nina", [4, 2, 6], 280.0, [4.0, 4.0, 5.0]),
            ("Ray", [3, 5, 4], 300.0, [4.5, 4.5, 4.5]),
            ("Liv", [5, 3, 2], 250.0, [4.0, 4.0, 4.5]),
            ("Oli", [6, 6, 6], 450.0, [5.0, 5.0, 5.0]),
            ("Ken", [2, 2, 2], 100.0, [3.5, 3.5, 3.5]),
            ("Ana", [7, 7, 1], 370.0, [4.5, 4.5, 4.5]),
        ]
        .into_iter()
        .map(|(name, demand, budget, max_price)| BuyerSpec::new(name, demand, budget, max_price))
        .collect();

        Self { sellers, buyers }
    }

    /// Seeded random market. Same seed, same scenario.
    ///
    /// Stock 15–40 and asks 4–8 per good; demand 5–20, budget 200–800,
    /// max price 3–7 per good, priority 1–5. Money is rounded to cents.
    pub fn random(seed: u64, seller_count: usize, buyer_count: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let cents = |v: f64| (v * 100.0).round() / 100.0;

        let sellers = (0..seller_count)
            .map(|i| SellerSpec {
                name: format!("Seller-{i}"),
                quantity: std::array::from_fn(|_| rng.gen_range(15..=40)),
                price: std::array::from_fn(|_| cents(rng.gen_range(4.0..8.0))),
            })
            .collect();

        let buyers = (0..buyer_count)
            .map(|i| BuyerSpec {
                name: format!("Buyer-{i}"),
                demand: std::array::from_fn(|_| rng.gen_range(5..=20)),
                budget: cents(rng.gen_range(200.0..800.0)),
                max_price: std::array::from_fn(|_| cents(rng.gen_range(3.0..7.0))),
                priority: rng.gen_range(1..=5),
            })
            .collect();

        Self { sellers, buyers }
    }

    /// Reject scenarios no run could start from.
    pub fn check_shape(&self) -> Result<()> {
        if self.sellers.is_empty() {
            return Err(MarketError::Configuration("scenario has no sellers".into()));
        }
        if self.buyers.is_empty() {
            return Err(MarketError::Configuration("scenario has no buyers".into()));
        }
        Ok(())
    }
}
