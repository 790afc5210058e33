//! Trading pair configuration.
//!
//! Immutable once registered: read by matching and settlement, updated only
//! by an external administrative collaborator (out of scope here).

use crate::types::Currency;
use rust_decimal::Decimal;

/// One tradable pair, e.g. BTC-USD: base BTC, quote USD.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TradingPair {
    pub symbol: String,
    pub base: Currency,
    pub quote: Currency,
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    /// Fee rate charged to the resting (maker) side, e.g. 0.001 = 0.1%.
    pub maker_fee_rate: Decimal,
    /// Fee rate charged to the incoming (taker) side.
    pub taker_fee_rate: Decimal,
    pub active: bool,
}

impl TradingPair {
    pub fn new(
        symbol: impl Into<String>,
        base: Currency,
        quote: Currency,
        min_quantity: Decimal,
        max_quantity: Decimal,
        maker_fee_rate: Decimal,
        taker_fee_rate: Decimal,
    ) -> Self {
        TradingPair {
            symbol: symbol.into(),
            base,
            quote,
            min_quantity,
            max_quantity,
            maker_fee_rate,
            taker_fee_rate,
            active: true,
        }
    }

    /// Worst-case fee rate. Buy reservations are sized with this so that the
    /// reservation covers the fill whether the order ends up maker or taker.
    pub fn max_fee_rate(&self) -> Decimal {
        self.maker_fee_rate.max(self.taker_fee_rate)
    }

    /// Quantity accepted by this pair: positive and within [min, max].
    pub fn quantity_in_range(&self, quantity: Decimal) -> bool {
        quantity > Decimal::ZERO && quantity >= self.min_quantity && quantity <= self.max_quantity
    }
}
