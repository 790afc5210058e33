//! Crate-wide error taxonomy.
//!
//! Every fallible core operation returns [`EngineError`]. All variants except
//! [`EngineError::SettlementFailure`] are expected, caller-recoverable
//! outcomes; a settlement failure indicates an internal invariant violation
//! and halts matching on the affected pair until manually cleared.

use crate::types::{OrderId, OrderStatus, UserId};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Business rejection: the user lacks available funds. User-correctable.
    #[error("insufficient balance: user {user:?} needs {needed} {currency}, available {available}")]
    InsufficientBalance {
        user: UserId,
        currency: String,
        needed: Decimal,
        available: Decimal,
    },

    /// Caller error: unknown or inactive trading pair.
    #[error("unknown or inactive trading pair: {0}")]
    InvalidPair(String),

    /// Caller error: quantity or price outside the pair's accepted range.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Caller error: malformed request or an operation that the current
    /// state does not permit (e.g. over-release of a reservation).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Business outcome: a market order found no eligible counterparty.
    #[error("no liquidity for market order {0:?}")]
    NoLiquidity(OrderId),

    /// Internal invariant violation during settlement. The triggering order
    /// is marked failed and the pair is halted.
    #[error("settlement failure on {pair}: {detail}")]
    SettlementFailure { pair: String, detail: String },

    /// No order with that id is known to the engine.
    #[error("order not found: {0:?}")]
    NotFound(OrderId),

    /// The requester does not own the order.
    #[error("order {0:?} does not belong to requester")]
    Forbidden(OrderId),

    /// The order is already filled/cancelled/expired/failed; no state change.
    #[error("order {0:?} already terminal with status {1:?}")]
    AlreadyTerminal(OrderId, OrderStatus),
}

impl EngineError {
    /// Stable machine-readable kind, used by the REST adapter and audit trail.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InsufficientBalance { .. } => "insufficient_balance",
            EngineError::InvalidPair(_) => "invalid_pair",
            EngineError::InvalidQuantity(_) => "invalid_quantity",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::NoLiquidity(_) => "no_liquidity",
            EngineError::SettlementFailure { .. } => "settlement_failure",
            EngineError::NotFound(_) => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::AlreadyTerminal(_, _) => "already_terminal",
        }
    }

    /// True only for [`EngineError::SettlementFailure`]: the one kind that
    /// implies ledger/book invariants may be violated.
    pub fn is_critical(&self) -> bool {
        matches!(self, EngineError::SettlementFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_settlement_failure_is_critical() {
        let settle = EngineError::SettlementFailure {
            pair: "BTC-USD".into(),
            detail: "reserved underflow".into(),
        };
        assert!(settle.is_critical());
        assert!(!EngineError::NoLiquidity(OrderId(1)).is_critical());
        assert!(!EngineError::NotFound(OrderId(1)).is_critical());
    }

    #[test]
    fn kind_is_stable_snake_case() {
        assert_eq!(
            EngineError::AlreadyTerminal(OrderId(1), OrderStatus::Filled).kind(),
            "already_terminal"
        );
        assert_eq!(EngineError::InvalidPair("X".into()).kind(), "invalid_pair");
    }
}
