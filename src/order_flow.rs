//! Synthetic order flow generator.
//!
//! Deterministic, configurable stream of submit requests for replay tests,
//! property tests, demos, and benchmarks. Same seed and config produce the
//! same sequence.

use crate::error::EngineError;
use crate::exchange::Exchange;
use crate::types::{Currency, OrderType, Side, SubmitRequest, UserId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

/// Configuration for the synthetic flow. All ranges are inclusive.
#[derive(Clone, Debug)]
pub struct FlowConfig {
    /// RNG seed. Same seed produces the same request stream.
    pub seed: u64,
    /// Pair every request targets.
    pub pair_symbol: String,
    /// Number of requests to generate.
    pub num_requests: usize,
    /// Probability of Buy (0.0..=1.0). Sell otherwise.
    pub buy_ratio: f64,
    /// Probability of a limit order; the rest are market orders.
    pub limit_ratio: f64,
    /// Probability that a priced order is a stop (split evenly between
    /// stop-loss and take-profit). Carved out of the limit share.
    pub stop_ratio: f64,
    /// Price range for priced orders.
    pub price_min: i64,
    pub price_max: i64,
    /// Quantity range, whole units.
    pub quantity_min: u64,
    pub quantity_max: u64,
    /// Distinct trader ids (1..=num_traders).
    pub num_traders: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        FlowConfig {
            seed: 0,
            pair_symbol: "BTC-USD".into(),
            num_requests: 1000,
            buy_ratio: 0.5,
            limit_ratio: 0.9,
            stop_ratio: 0.05,
            price_min: 95,
            price_max: 105,
            quantity_min: 1,
            quantity_max: 20,
            num_traders: 5,
        }
    }
}

/// Deterministic request stream. Create with [`FlowGenerator::new`].
pub struct FlowGenerator {
    rng: StdRng,
    config: FlowConfig,
}

impl FlowGenerator {
    pub fn new(config: FlowConfig) -> Self {
        FlowGenerator {
            rng: StdRng::seed_from_u64(config.seed),
            config,
        }
    }

    /// Generates the next request, advancing the RNG.
    pub fn next_request(&mut self) -> SubmitRequest {
        let side = if self.rng.gen::<f64>() < self.config.buy_ratio {
            Side::Buy
        } else {
            Side::Sell
        };
        let is_limit = self.rng.gen::<f64>() < self.config.limit_ratio;
        let order_type = if !is_limit {
            OrderType::Market
        } else if self.rng.gen::<f64>() < self.config.stop_ratio {
            if self.rng.gen::<bool>() {
                OrderType::StopLoss
            } else {
                OrderType::TakeProfit
            }
        } else {
            OrderType::Limit
        };
        let quantity = Decimal::from(
            self.rng
                .gen_range(self.config.quantity_min..=self.config.quantity_max),
        );
        let limit_price = if order_type.requires_price() {
            Some(Decimal::from(
                self.rng.gen_range(self.config.price_min..=self.config.price_max),
            ))
        } else {
            None
        };
        let user_id = UserId(self.rng.gen_range(1..=self.config.num_traders.max(1)));
        SubmitRequest {
            user_id,
            pair_symbol: self.config.pair_symbol.clone(),
            side,
            order_type,
            quantity,
            limit_price,
            expires_at: None,
        }
    }

    /// Returns exactly `n` requests, advancing the generator state.
    pub fn take_requests(&mut self, n: usize) -> Vec<SubmitRequest> {
        (0..n).map(|_| self.next_request()).collect()
    }

    /// Returns the full stream as sized by `num_requests`.
    pub fn all_requests(&mut self) -> Vec<SubmitRequest> {
        self.take_requests(self.config.num_requests)
    }
}

/// Funds every trader in the config with the given base and quote amounts.
pub fn fund_traders(
    exchange: &Exchange,
    config: &FlowConfig,
    base: &Currency,
    base_amount: Decimal,
    quote: &Currency,
    quote_amount: Decimal,
) -> Result<(), EngineError> {
    for user in 1..=config.num_traders.max(1) {
        exchange.deposit(UserId(user), base, base_amount)?;
        exchange.deposit(UserId(user), quote, quote_amount)?;
    }
    Ok(())
}

/// Totals from one replay run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub accepted: usize,
    pub rejected: usize,
    pub trades: usize,
}

/// Replays requests into the exchange. Business rejections count toward
/// `rejected`; a settlement failure aborts the replay.
pub fn replay(
    exchange: &Exchange,
    requests: impl IntoIterator<Item = SubmitRequest>,
) -> Result<ReplayStats, EngineError> {
    let mut stats = ReplayStats::default();
    for request in requests {
        match exchange.submit_order(request) {
            Ok(result) => {
                stats.accepted += 1;
                stats.trades += result.trades.len();
            }
            Err(err) if err.is_critical() => return Err(err),
            Err(_) => stats.rejected += 1,
        }
    }
    Ok(stats)
}
