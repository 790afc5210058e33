//! Order store and lifecycle transitions.
//!
//! The store owns every [`Order`] record for one pair. Transitions:
//! pending -> partially_filled -> filled / cancelled / expired / failed.
//! Filled quantity only grows; `filled + remaining == original` is preserved
//! by every mutation; each order tracks the unconsumed part of its own
//! reservation so a cancel racing a fill releases exactly the true remainder.

use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::pair::TradingPair;
use crate::settlement::FeeCurrency;
use crate::types::{Currency, Order, OrderId, OrderStatus, Side, UserId};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Reservation an order must place before it may trade: which currency and
/// how much. For market buys the amount is the user's entire available quote
/// balance (the order is priced only at execution time).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    pub currency: Currency,
    pub amount: Decimal,
}

/// Computes the reservation for a validated request.
///
/// Sells commit base; buys commit quote. Priced buys reserve at their limit
/// (or trigger) price plus the worst-case fee when fees are retained in
/// quote; price improvement is refunded when the order terminates. Sells
/// reserve the extra fee margin only when fees are retained in base.
pub fn required_reservation(
    pair: &TradingPair,
    fee_currency: FeeCurrency,
    side: Side,
    quantity: Decimal,
    price: Option<Decimal>,
    available_quote: Decimal,
) -> Result<Reservation, EngineError> {
    let fee_margin = Decimal::ONE + pair.max_fee_rate();
    match side {
        Side::Sell => {
            let amount = match fee_currency {
                FeeCurrency::Quote => quantity,
                FeeCurrency::Base => quantity * fee_margin,
            };
            Ok(Reservation {
                currency: pair.base.clone(),
                amount,
            })
        }
        Side::Buy => match price {
            Some(p) => {
                let notional = quantity * p;
                let amount = match fee_currency {
                    FeeCurrency::Quote => notional * fee_margin,
                    FeeCurrency::Base => notional,
                };
                Ok(Reservation {
                    currency: pair.quote.clone(),
                    amount,
                })
            }
            // Market buy: commit everything available; leftover is released
            // as soon as the matching attempt ends.
            None => Ok(Reservation {
                currency: pair.quote.clone(),
                amount: available_quote,
            }),
        },
    }
}

/// Per-pair order store. Owned by the pair engine; single writer.
#[derive(Debug, Default)]
pub struct OrderStore {
    orders: HashMap<OrderId, Order>,
}

impl OrderStore {
    pub fn new() -> Self {
        OrderStore {
            orders: HashMap::new(),
        }
    }

    pub fn insert(&mut self, order: Order) {
        self.orders.insert(order.order_id, order);
    }

    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    pub fn get_mut(&mut self, order_id: OrderId) -> Option<&mut Order> {
        self.orders.get_mut(&order_id)
    }

    /// All orders, cloned, for snapshots. Sorted by id for determinism.
    pub fn all(&self) -> Vec<Order> {
        let mut out: Vec<Order> = self.orders.values().cloned().collect();
        out.sort_by_key(|o| o.order_id);
        out
    }

    /// Open (non-terminal) orders, for book/trigger rebuild after restore.
    pub fn open(&self) -> Vec<Order> {
        let mut out: Vec<Order> = self
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect();
        out.sort_by_key(|o| o.seq);
        out
    }

    /// Applies one fill: quantity moves from remaining to filled and
    /// `reserved_consumed` is deducted from the order's reservation tracking
    /// (the ledger postings themselves were already applied by settlement).
    ///
    /// Fails with `InvalidState` on over-fill or reservation underflow; both
    /// indicate an engine bug, not a caller error.
    pub fn apply_fill(
        &mut self,
        order_id: OrderId,
        quantity: Decimal,
        reserved_consumed: Decimal,
    ) -> Result<(), EngineError> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(EngineError::NotFound(order_id))?;
        if quantity <= Decimal::ZERO || quantity > order.remaining_quantity {
            return Err(EngineError::InvalidState(format!(
                "fill of {quantity} exceeds remaining {} on order {:?}",
                order.remaining_quantity, order_id
            )));
        }
        if reserved_consumed > order.reserved_remaining {
            return Err(EngineError::InvalidState(format!(
                "reserved consumption {reserved_consumed} exceeds tracked reservation {} on order {:?}",
                order.reserved_remaining, order_id
            )));
        }
        order.filled_quantity += quantity;
        order.remaining_quantity -= quantity;
        order.reserved_remaining -= reserved_consumed;
        order.status = if order.remaining_quantity == Decimal::ZERO {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        Ok(())
    }

    /// Moves an order to a terminal state and releases whatever is left of
    /// its reservation. Safe against the cancel-vs-match race: the tracked
    /// `reserved_remaining` already excludes everything fills consumed, so
    /// there is no double-release and no lost release.
    pub fn finish(
        &mut self,
        ledger: &Ledger,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<(), EngineError> {
        debug_assert!(status.is_terminal());
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(EngineError::NotFound(order_id))?;
        if order.status.is_terminal() {
            return Err(EngineError::AlreadyTerminal(order_id, order.status));
        }
        if order.reserved_remaining > Decimal::ZERO {
            ledger.release(order.user_id, &order.reserve_currency, order.reserved_remaining)?;
            order.reserved_remaining = Decimal::ZERO;
        }
        order.status = status;
        Ok(())
    }

    /// Releases whatever is left of a filled order's reservation (price
    /// improvement and unused fee margin on buys). No-op when nothing is
    /// tracked. Unlike [`OrderStore::finish`] this does not transition state.
    pub fn release_leftover(
        &mut self,
        ledger: &Ledger,
        order_id: OrderId,
    ) -> Result<(), EngineError> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(EngineError::NotFound(order_id))?;
        if order.reserved_remaining > Decimal::ZERO {
            ledger.release(order.user_id, &order.reserve_currency, order.reserved_remaining)?;
            order.reserved_remaining = Decimal::ZERO;
        }
        Ok(())
    }

    /// Ownership check for cancel requests.
    pub fn authorize(&self, order_id: OrderId, requester: UserId) -> Result<(), EngineError> {
        let order = self.get(order_id).ok_or(EngineError::NotFound(order_id))?;
        if order.user_id != requester {
            return Err(EngineError::Forbidden(order_id));
        }
        Ok(())
    }
}
