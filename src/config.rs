//! Run configuration.
//!
//! [`MarketConfig`] is the user-facing form: plain decimals, serde-friendly,
//! with defaults matching the original flower market. [`MarketConfig::validate`]
//! turns it into [`RunParams`], the fixed-point form the engine runs on.

use serde::{Deserialize, Serialize};

use crate::error::{MarketError, Result};
use crate::types::price;

/// How a buyer picks among eligible sellers for a good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Lowest ask wins, ties broken by seller id ascending
    #[default]
    BestPrice,
    /// First eligible seller in id order
    FirstFit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Upper bound on trading rounds before closing with `Timeout`
    pub max_rounds: u64,
    /// Asks never decay below this
    pub price_floor: f64,
    /// Amount subtracted from an ask per decay
    pub price_decay_step: f64,
    /// Decay only seller/good pairs that did not trade this round
    pub decay_only_on_no_trade: bool,
    pub allocation_mode: AllocationMode,
    /// Threads per process in the trading phase
    pub worker_count: usize,
    /// Cooperating ranks; 1 runs without the coordination layer
    pub process_count: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            max_rounds: 30,
            price_floor: 0.2,
            price_decay_step: 0.2,
            decay_only_on_no_trade: true,
            allocation_mode: AllocationMode::BestPrice,
            worker_count: 4,
            process_count: 1,
        }
    }
}

impl MarketConfig {
    pub fn with_max_rounds(mut self, max_rounds: u64) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_price_floor(mut self, price_floor: f64) -> Self {
        self.price_floor = price_floor;
        self
    }

    pub fn with_price_decay_step(mut self, step: f64) -> Self {
        self.price_decay_step = step;
        self
    }

    pub fn with_decay_only_on_no_trade(mut self, only_on_no_trade: bool) -> Self {
        self.decay_only_on_no_trade = only_on_no_trade;
        self
    }

    pub fn with_allocation_mode(mut self, mode: AllocationMode) -> Self {
        self.allocation_mode = mode;
        self
    }

    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    pub fn with_process_count(mut self, processes: usize) -> Self {
        self.process_count = processes;
        self
    }

    /// Check every option and convert money fields to fixed-point.
    pub fn validate(&self) -> Result<RunParams> {
        if self.max_rounds == 0 {
            return Err(MarketError::Configuration("max_rounds must be positive".into()));
        }
        if self.worker_count == 0 {
            return Err(MarketError::Configuration("worker_count must be positive".into()));
        }
        if self.process_count == 0 {
            return Err(MarketError::Configuration("process_count must be positive".into()));
        }
        let price_floor = price::from_f64(self.price_floor).ok_or_else(|| {
            MarketError::Configuration(format!(
                "price_floor must be a non-negative number, got {}",
                self.price_floor
            ))
        })?;
        let price_decay_step = price::from_f64(self.price_decay_step).ok_or_else(|| {
            MarketError::Configuration(format!(
                "price_decay_step must be a non-negative number, got {}",
                self.price_decay_step
            ))
        })?;

        Ok(RunParams {
            max_rounds: self.max_rounds,
            price_floor,
            price_decay_step,
            decay_only_on_no_trade: self.decay_only_on_no_trade,
            allocation_mode: self.allocation_mode,
            worker_count: self.worker_count,
            process_count: self.process_count,
        })
    }
}

/// Validated configuration with fixed-point money values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParams {
    pub max_rounds: u64,
    pub price_floor: u64,
    pub price_decay_step: u64,
    pub decay_only_on_no_trade: bool,
    pub allocation_mode: AllocationMode,
    pub worker_count: usize,
    pub process_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let params = MarketConfig::default().validate().unwrap();

        assert_eq!(params.max_rounds, 30);
        assert_eq!(params.price_floor, 20_000_000);
        assert_eq!(params.price_decay_step, 20_000_000);
        assert!(params.decay_only_on_no_trade);
        assert_eq!(params.allocation_mode, AllocationMode::BestPrice);
    }

    #[test]
    fn test_zero_counts_rejected() {
        for config in [
            MarketConfig::default().with_worker_count(0),
            MarketConfig::default().with_process_count(0),
            MarketConfig::default().with_max_rounds(0),
        ] {
            assert!(matches!(config.validate(), Err(MarketError::Configuration(_))));
        }
    }

    #[test]
    fn test_negative_money_rejected() {
        let config = MarketConfig::default().with_price_floor(-0.5);
        assert!(matches!(config.validate(), Err(MarketError::Configuration(_))));

        let config = MarketConfig::default().with_price_decay_step(f64::NAN);
        assert!(matches!(config.validate(), Err(MarketError::Configuration(_))));
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: MarketConfig =
            serde_json::from_str(r#"{"worker_count": 8, "allocation_mode": "first_fit"}"#).unwrap();

        assert_eq!(config.worker_count, 8);
        assert_eq!(config.allocation_mode, AllocationMode::FirstFit);
        assert_eq!(config.max_rounds, 30);
    }
}
