//! Core identifiers and order data model.
//!
//! All identifiers are newtype wrappers. [`Order`] is the record owned by the
//! order lifecycle manager; [`SubmitRequest`] is what the external API layer
//! hands the core; [`OrderView`] and [`OrderResult`] are what comes back.

use rust_decimal::Decimal;

/// Unique order identifier, assigned by the exchange at submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct OrderId(pub u64);

/// Trade identifier. Globally unique across pairs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct TradeId(pub u64);

/// User identifier. The core trusts an already-authorized user id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct UserId(pub u64);

/// Currency code, e.g. "BTC" or "USD".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Currency(pub String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Self {
        Currency(code.into())
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order type. Stop-loss and take-profit orders carry a trigger price in
/// `limit_price` and become limit orders at that price when activated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
}

impl OrderType {
    /// Market orders are the only type without a price.
    pub fn requires_price(self) -> bool {
        !matches!(self, OrderType::Market)
    }

    /// Stop-loss / take-profit: parked in the trigger index, not the book.
    pub fn is_triggered(self) -> bool {
        matches!(self, OrderType::StopLoss | OrderType::TakeProfit)
    }
}

/// Order lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
    Failed,
}

impl OrderStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Expired | OrderStatus::Failed
        )
    }
}

/// Validated order request from the (out-of-scope) API layer.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SubmitRequest {
    pub user_id: UserId,
    pub pair_symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Limit price for limit orders; trigger price for stop orders; `None` for market.
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// Optional expiry (unix millis). Swept opportunistically, not a hard deadline.
    #[serde(default)]
    pub expires_at: Option<u64>,
}

/// Order record. Owned exclusively by the order store; the book only
/// references order ids.
///
/// Invariants: `filled_quantity + remaining_quantity == original_quantity`
/// at all times; `filled_quantity` is monotonically non-decreasing;
/// `reserved_remaining >= 0`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub pair_symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub original_quantity: Decimal,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub status: OrderStatus,
    pub created_at: u64,
    pub expires_at: Option<u64>,
    /// Arrival sequence number; book tie-break at equal price.
    pub seq: u64,
    /// Currency the reservation was taken in (quote for buys, base for sells).
    pub reserve_currency: Currency,
    /// Portion of the reservation not yet consumed by fills or released.
    pub reserved_remaining: Decimal,
}

/// Read-only projection returned by status queries.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct OrderView {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub pair_symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub original_quantity: Decimal,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub status: OrderStatus,
    pub created_at: u64,
    pub expires_at: Option<u64>,
}

impl From<&Order> for OrderView {
    fn from(o: &Order) -> Self {
        OrderView {
            order_id: o.order_id,
            user_id: o.user_id,
            pair_symbol: o.pair_symbol.clone(),
            side: o.side,
            order_type: o.order_type,
            limit_price: o.limit_price,
            original_quantity: o.original_quantity,
            filled_quantity: o.filled_quantity,
            remaining_quantity: o.remaining_quantity,
            status: o.status,
            created_at: o.created_at,
            expires_at: o.expires_at,
        }
    }
}

/// Result of a submission: final status after the matching attempt plus the
/// trades executed during it.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct OrderResult {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub trades: Vec<crate::settlement::Trade>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn order_type_price_requirements() {
        assert!(!OrderType::Market.requires_price());
        assert!(OrderType::Limit.requires_price());
        assert!(OrderType::StopLoss.requires_price());
        assert!(OrderType::TakeProfit.requires_price());
        assert!(OrderType::StopLoss.is_triggered());
        assert!(!OrderType::Limit.is_triggered());
    }

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::PartiallyFilled).unwrap(),
            "\"partially_filled\""
        );
        assert_eq!(serde_json::to_string(&OrderType::StopLoss).unwrap(), "\"stop_loss\"");
        assert_eq!(serde_json::to_string(&Side::Buy).unwrap(), "\"buy\"");
    }
}
