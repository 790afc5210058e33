//! Trigger index for stop-loss and take-profit orders.
//!
//! Stop orders never rest in the book. They wait here, keyed by trigger
//! price, and activate when the last traded price crosses the trigger:
//!
//! - stop-loss sell / take-profit buy: activate at last <= trigger
//! - stop-loss buy / take-profit sell: activate at last >= trigger
//!
//! On activation the engine re-runs the order as a limit order at its
//! trigger price, which keeps its original reservation exact.

use crate::types::{OrderId, OrderType, Side};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    AtOrBelow,
    AtOrAbove,
}

fn direction(order_type: OrderType, side: Side) -> Option<Direction> {
    match (order_type, side) {
        (OrderType::StopLoss, Side::Sell) | (OrderType::TakeProfit, Side::Buy) => {
            Some(Direction::AtOrBelow)
        }
        (OrderType::StopLoss, Side::Buy) | (OrderType::TakeProfit, Side::Sell) => {
            Some(Direction::AtOrAbove)
        }
        _ => None,
    }
}

/// Per-pair index of parked stop orders.
#[derive(Debug, Default)]
pub struct TriggerIndex {
    at_or_below: BTreeMap<(Decimal, u64), OrderId>,
    at_or_above: BTreeMap<(Decimal, u64), OrderId>,
    index: HashMap<OrderId, (Direction, Decimal, u64)>,
}

impl TriggerIndex {
    pub fn new() -> Self {
        TriggerIndex::default()
    }

    /// Parks a stop order. Returns false for non-stop order types.
    pub fn insert(
        &mut self,
        order_type: OrderType,
        side: Side,
        trigger_price: Decimal,
        seq: u64,
        order_id: OrderId,
    ) -> bool {
        let Some(dir) = direction(order_type, side) else {
            return false;
        };
        self.index.insert(order_id, (dir, trigger_price, seq));
        match dir {
            Direction::AtOrBelow => self.at_or_below.insert((trigger_price, seq), order_id),
            Direction::AtOrAbove => self.at_or_above.insert((trigger_price, seq), order_id),
        };
        true
    }

    /// Removes a parked order. Idempotent.
    pub fn remove(&mut self, order_id: OrderId) -> bool {
        let Some((dir, price, seq)) = self.index.remove(&order_id) else {
            return false;
        };
        match dir {
            Direction::AtOrBelow => self.at_or_below.remove(&(price, seq)),
            Direction::AtOrAbove => self.at_or_above.remove(&(price, seq)),
        };
        true
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        self.index.contains_key(&order_id)
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Removes and returns every order whose trigger fires at `last_price`,
    /// in trigger-price-then-arrival order.
    pub fn take_due(&mut self, last_price: Decimal) -> Vec<OrderId> {
        let mut due: Vec<(u64, OrderId)> = Vec::new();
        let below: Vec<(Decimal, u64)> = self
            .at_or_below
            .range((last_price, 0)..)
            .map(|(k, _)| *k)
            .collect();
        for key in below {
            if let Some(id) = self.at_or_below.remove(&key) {
                self.index.remove(&id);
                due.push((key.1, id));
            }
        }
        let above: Vec<(Decimal, u64)> = self
            .at_or_above
            .range(..=(last_price, u64::MAX))
            .map(|(k, _)| *k)
            .collect();
        for key in above {
            if let Some(id) = self.at_or_above.remove(&key) {
                self.index.remove(&id);
                due.push((key.1, id));
            }
        }
        // Activate in arrival order when both directions fire at once.
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }
}
