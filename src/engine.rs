//! Single-pair engine: the unit of serialization.
//!
//! All submissions, cancellations, expiries, and trigger activations for one
//! trading pair go through one `PairEngine`, processed one at a time in
//! arrival order. Cross-pair concurrency happens in [`crate::exchange`],
//! which runs one engine per pair against the shared ledger.

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::lifecycle::{required_reservation, OrderStore, Reservation};
use crate::matching::{match_incoming, MatchEnd};
use crate::order_book::{BookDepth, BookEntry, OrderBook};
use crate::pair::TradingPair;
use crate::persistence::TradeLog;
use crate::settlement::{FeeCurrency, Settlement, Trade};
use crate::triggers::TriggerIndex;
use crate::types::{
    Order, OrderId, OrderResult, OrderStatus, OrderType, OrderView, SubmitRequest, UserId,
};
use log::{error, info, warn};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What to do with a market order's unfilled remainder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoLiquidityPolicy {
    /// Surface `NoLiquidity` (or `InsufficientBalance` when the committed
    /// funds ran out) for the remainder. Fills already settled stay settled.
    Reject,
    /// Cancel the remainder silently; the result carries the final status.
    CancelRemainder,
}

/// Configurable policy points. Defaults follow the documented choices:
/// quote-currency fees, reject on no liquidity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EnginePolicy {
    pub fee_currency: FeeCurrency,
    pub no_liquidity: NoLiquidityPolicy,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        EnginePolicy {
            fee_currency: FeeCurrency::Quote,
            no_liquidity: NoLiquidityPolicy::Reject,
        }
    }
}

/// Matching engine for one trading pair. Single writer by construction: the
/// router wraps each engine in a mutex and drains requests one at a time.
pub struct PairEngine {
    pair: TradingPair,
    policy: EnginePolicy,
    book: OrderBook,
    store: OrderStore,
    triggers: TriggerIndex,
    ledger: Arc<Ledger>,
    settlement: Settlement,
    audit: Arc<dyn AuditSink>,
    trade_log: Option<Arc<TradeLog>>,
    next_order_id: Arc<AtomicU64>,
    next_seq: u64,
    expiries: BTreeSet<(u64, OrderId)>,
    last_trade_price: Option<Decimal>,
    halted: bool,
}

impl PairEngine {
    pub fn new(
        pair: TradingPair,
        policy: EnginePolicy,
        ledger: Arc<Ledger>,
        settlement: Settlement,
        audit: Arc<dyn AuditSink>,
        trade_log: Option<Arc<TradeLog>>,
        next_order_id: Arc<AtomicU64>,
    ) -> Self {
        let book = OrderBook::new(pair.symbol.clone());
        PairEngine {
            pair,
            policy,
            book,
            store: OrderStore::new(),
            triggers: TriggerIndex::new(),
            ledger,
            settlement,
            audit,
            trade_log,
            next_order_id,
            next_seq: 1,
            expiries: BTreeSet::new(),
            last_trade_price: None,
            halted: false,
        }
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }

    /// True after a settlement failure; no further matching until cleared.
    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Manual re-arm after operators verified ledger/book state.
    pub fn clear_halt(&mut self) {
        self.halted = false;
    }

    pub fn last_trade_price(&self) -> Option<Decimal> {
        self.last_trade_price
    }

    /// Submits one validated request: reserve, register, match, rest or
    /// reject, then drain any stop activations its trades caused.
    pub fn submit(&mut self, request: SubmitRequest, now: u64) -> Result<OrderResult, EngineError> {
        if self.halted {
            return Err(EngineError::InvalidState(format!(
                "pair {} is halted pending manual review",
                self.pair.symbol
            )));
        }
        self.sweep_expired(now);
        self.validate(&request, now)?;

        let available_quote = self
            .ledger
            .balance(request.user_id, &self.pair.quote)
            .available;
        let Reservation { currency, amount } = required_reservation(
            &self.pair,
            self.policy.fee_currency,
            request.side,
            request.quantity,
            request.limit_price,
            available_quote,
        )?;
        if amount <= Decimal::ZERO {
            // Market buy with nothing available to commit.
            let err = EngineError::InsufficientBalance {
                user: request.user_id,
                currency: currency.0.clone(),
                needed: self.estimated_market_cost(&request),
                available: available_quote,
            };
            self.audit_submit(&request, None, &format!("rejected:{}", err.kind()));
            return Err(err);
        }
        if let Err(err) = self.ledger.reserve(request.user_id, &currency, amount) {
            self.audit_submit(&request, None, &format!("rejected:{}", err.kind()));
            return Err(err);
        }

        let order_id = OrderId(self.next_order_id.fetch_add(1, Ordering::SeqCst));
        let seq = self.next_seq;
        self.next_seq += 1;
        let order = Order {
            order_id,
            user_id: request.user_id,
            pair_symbol: request.pair_symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            limit_price: request.limit_price,
            original_quantity: request.quantity,
            filled_quantity: Decimal::ZERO,
            remaining_quantity: request.quantity,
            status: OrderStatus::Pending,
            created_at: now,
            expires_at: request.expires_at,
            seq,
            reserve_currency: currency,
            reserved_remaining: amount,
        };
        info!(
            "order submitted order_id={} pair={} side={:?} type={:?} quantity={} price={:?}",
            order_id.0,
            self.pair.symbol,
            order.side,
            order.order_type,
            order.original_quantity,
            order.limit_price
        );
        self.store.insert(order);
        if let Some(at) = request.expires_at {
            self.expiries.insert((at, order_id));
        }
        self.audit_submit(&request, Some(order_id), "accepted");

        let mut own_trades: Vec<Trade> = Vec::new();
        if request.order_type.is_triggered() {
            // Stops park in the trigger index; they may fire immediately if
            // the market already crossed their trigger.
            if let Some(trigger) = request.limit_price {
                self.triggers
                    .insert(request.order_type, request.side, trigger, seq, order_id);
            }
            own_trades.extend(self.run_triggers(now, order_id));
        } else {
            let (trades, end) = match_incoming(
                &mut self.book,
                &mut self.store,
                &self.ledger,
                &self.pair,
                &self.settlement,
                order_id,
                now,
            );
            self.record_trades(&trades);
            own_trades.extend(trades);
            let attempt = self.finish_matching_attempt(order_id, end, now);
            // Committed fills may fire stops even when the remainder was
            // rejected; drain them before surfacing the outcome.
            own_trades.extend(self.run_triggers(now, order_id));
            attempt?;
        }

        let order = self
            .store
            .get(order_id)
            .ok_or(EngineError::NotFound(order_id))?;
        Ok(OrderResult {
            order_id,
            status: order.status,
            filled_quantity: order.filled_quantity,
            trades: own_trades,
        })
    }

    /// Cancels an order owned by `requester`. Idempotent against the
    /// matching race: whatever a concurrent fill already consumed is gone,
    /// only the true remainder's reservation is released.
    pub fn cancel(&mut self, order_id: OrderId, requester: UserId, now: u64) -> Result<(), EngineError> {
        self.sweep_expired(now);
        self.store.authorize(order_id, requester)?;
        self.book.remove(order_id);
        self.triggers.remove(order_id);
        self.store.finish(&self.ledger, order_id, OrderStatus::Cancelled)?;
        info!("order cancelled order_id={} pair={}", order_id.0, self.pair.symbol);
        self.audit.emit(&AuditEvent::now(
            format!("user-{}", requester.0),
            AuditAction::OrderCancel,
            &self.pair.symbol,
            Some(serde_json::json!({ "order_id": order_id.0 })),
            "accepted",
        ));
        Ok(())
    }

    /// System-invoked cancel for a due expiry. Same atomicity rules.
    pub fn expire(&mut self, order_id: OrderId) -> Result<(), EngineError> {
        self.book.remove(order_id);
        self.triggers.remove(order_id);
        self.store.finish(&self.ledger, order_id, OrderStatus::Expired)?;
        info!("order expired order_id={} pair={}", order_id.0, self.pair.symbol);
        self.audit.emit(&AuditEvent::now(
            "system",
            AuditAction::OrderExpire,
            &self.pair.symbol,
            Some(serde_json::json!({ "order_id": order_id.0 })),
            "accepted",
        ));
        Ok(())
    }

    /// Expires every order whose `expires_at` has passed. Returns the count.
    pub fn sweep_expired(&mut self, now: u64) -> usize {
        let due: Vec<(u64, OrderId)> = self
            .expiries
            .range(..=(now, OrderId(u64::MAX)))
            .copied()
            .collect();
        let mut expired = 0usize;
        for key in due {
            self.expiries.remove(&key);
            let (_, order_id) = key;
            let open = self
                .store
                .get(order_id)
                .map(|o| !o.status.is_terminal())
                .unwrap_or(false);
            if !open {
                continue;
            }
            match self.expire(order_id) {
                Ok(()) => expired += 1,
                Err(e) => error!("expiry of order {} failed: {e}", order_id.0),
            }
        }
        expired
    }

    pub fn order_view(&self, order_id: OrderId) -> Option<OrderView> {
        self.store.get(order_id).map(OrderView::from)
    }

    pub fn depth(&self, depth: usize) -> BookDepth {
        self.book.depth(depth)
    }

    /// All orders, for snapshots.
    pub fn orders(&self) -> Vec<Order> {
        self.store.all()
    }

    /// Rebuilds book, triggers, and expiry index from persisted orders.
    /// Open limit orders rest again at their original (price, seq); open
    /// stops are re-parked. Activated stops were rewritten to limit orders
    /// before resting, so the split is unambiguous.
    pub fn restore(
        &mut self,
        orders: Vec<Order>,
        last_trade_price: Option<Decimal>,
        halted: bool,
    ) -> Result<(), EngineError> {
        self.last_trade_price = last_trade_price;
        self.halted = halted;
        for order in orders {
            if order.pair_symbol != self.pair.symbol {
                return Err(EngineError::InvalidState(format!(
                    "order {:?} belongs to pair {}, not {}",
                    order.order_id, order.pair_symbol, self.pair.symbol
                )));
            }
            self.next_seq = self.next_seq.max(order.seq + 1);
            if !order.status.is_terminal() {
                if let Some(at) = order.expires_at {
                    self.expiries.insert((at, order.order_id));
                }
                match (order.order_type, order.limit_price) {
                    (OrderType::Limit, Some(price)) => {
                        self.book.insert(
                            order.side,
                            price,
                            order.seq,
                            BookEntry {
                                order_id: order.order_id,
                                user_id: order.user_id,
                                remaining: order.remaining_quantity,
                            },
                        );
                    }
                    (t, Some(trigger)) if t.is_triggered() => {
                        self.triggers
                            .insert(t, order.side, trigger, order.seq, order.order_id);
                    }
                    _ => {
                        return Err(EngineError::InvalidState(format!(
                            "open order {:?} has no restable shape",
                            order.order_id
                        )));
                    }
                }
            }
            self.store.insert(order);
        }
        Ok(())
    }

    fn validate(&self, request: &SubmitRequest, now: u64) -> Result<(), EngineError> {
        if request.pair_symbol != self.pair.symbol || !self.pair.active {
            return Err(EngineError::InvalidPair(request.pair_symbol.clone()));
        }
        if !self.pair.quantity_in_range(request.quantity) {
            return Err(EngineError::InvalidQuantity(format!(
                "quantity {} outside [{}, {}] for {}",
                request.quantity, self.pair.min_quantity, self.pair.max_quantity, self.pair.symbol
            )));
        }
        match (request.order_type.requires_price(), request.limit_price) {
            (true, None) => {
                return Err(EngineError::InvalidState(format!(
                    "{:?} order requires a price",
                    request.order_type
                )));
            }
            (false, Some(_)) => {
                return Err(EngineError::InvalidState(
                    "market order must not carry a price".into(),
                ));
            }
            (true, Some(p)) if p <= Decimal::ZERO => {
                return Err(EngineError::InvalidQuantity(format!(
                    "price must be positive, got {p}"
                )));
            }
            _ => {}
        }
        if let Some(at) = request.expires_at {
            if at <= now {
                return Err(EngineError::InvalidState(format!(
                    "expires_at {at} is not in the future"
                )));
            }
        }
        Ok(())
    }

    /// Applies the §4.3 tail rules after a matching attempt: rest a limit
    /// remainder, cancel/reject a market remainder per policy, or mark the
    /// order failed and halt the pair on a settlement failure.
    fn finish_matching_attempt(
        &mut self,
        order_id: OrderId,
        end: MatchEnd,
        _now: u64,
    ) -> Result<(), EngineError> {
        let out_of_funds = match end {
            MatchEnd::Failed(err) => {
                self.handle_failure(order_id, &err);
                return Err(err);
            }
            MatchEnd::OutOfFunds => true,
            MatchEnd::Exhausted => false,
        };

        let order = self
            .store
            .get(order_id)
            .ok_or(EngineError::NotFound(order_id))?
            .clone();
        if order.remaining_quantity == Decimal::ZERO {
            // Fully filled: refund price improvement and unused fee margin.
            self.store.release_leftover(&self.ledger, order_id)?;
            return Ok(());
        }

        match order.order_type {
            OrderType::Limit => {
                self.book.insert(
                    order.side,
                    // Validated: limit orders always carry a price.
                    order.limit_price.ok_or_else(|| {
                        EngineError::InvalidState("limit order without price".into())
                    })?,
                    order.seq,
                    BookEntry {
                        order_id,
                        user_id: order.user_id,
                        remaining: order.remaining_quantity,
                    },
                );
                Ok(())
            }
            OrderType::Market => {
                self.store.finish(&self.ledger, order_id, OrderStatus::Cancelled)?;
                if self.policy.no_liquidity == NoLiquidityPolicy::CancelRemainder {
                    return Ok(());
                }
                let err = if out_of_funds {
                    EngineError::InsufficientBalance {
                        user: order.user_id,
                        currency: self.pair.quote.0.clone(),
                        needed: self.estimate_remaining_cost(&order),
                        available: order.reserved_remaining,
                    }
                } else {
                    EngineError::NoLiquidity(order_id)
                };
                warn!(
                    "market order {} remainder rejected on {}: {}",
                    order_id.0,
                    self.pair.symbol,
                    err.kind()
                );
                Err(err)
            }
            // Stops never reach the matching loop in their parked form.
            t => Err(EngineError::InvalidState(format!(
                "unexpected order type {t:?} after matching"
            ))),
        }
    }

    /// Drains stop activations as long as the last trade price keeps firing
    /// triggers. Returns the trades whose taker is `for_order` so submit can
    /// report an immediately-activated stop's own fills.
    fn run_triggers(&mut self, now: u64, for_order: OrderId) -> Vec<Trade> {
        let mut own_trades = Vec::new();
        loop {
            if self.halted {
                break;
            }
            let Some(last) = self.last_trade_price else {
                break;
            };
            let due = self.triggers.take_due(last);
            if due.is_empty() {
                break;
            }
            for (i, order_id) in due.iter().copied().enumerate() {
                if self.halted {
                    // Re-park untouched stops; the halt must not lose them.
                    for id in &due[i..] {
                        self.repark(*id);
                    }
                    break;
                }
                let Some(order) = self.store.get_mut(order_id) else {
                    continue;
                };
                if order.status.is_terminal() {
                    continue;
                }
                // Activation: the stop becomes a limit order at its trigger
                // price, which its reservation was sized for.
                order.order_type = OrderType::Limit;
                info!(
                    "stop order activated order_id={} pair={} trigger_price={:?}",
                    order_id.0, self.pair.symbol, order.limit_price
                );
                let (trades, end) = match_incoming(
                    &mut self.book,
                    &mut self.store,
                    &self.ledger,
                    &self.pair,
                    &self.settlement,
                    order_id,
                    now,
                );
                self.record_trades(&trades);
                if order_id == for_order {
                    own_trades.extend(trades);
                }
                match end {
                    MatchEnd::Failed(err) => self.handle_failure(order_id, &err),
                    other => {
                        if let Err(e) = self.finish_matching_attempt(order_id, other, now) {
                            // Business outcome of an activation (no caller to
                            // surface it to): the audit trail records it.
                            self.audit.emit(&AuditEvent::now(
                                "system",
                                AuditAction::OrderSubmit,
                                &self.pair.symbol,
                                Some(serde_json::json!({ "order_id": order_id.0 })),
                                format!("activation:{}", e.kind()),
                            ));
                        }
                    }
                }
            }
        }
        own_trades
    }

    fn repark(&mut self, order_id: OrderId) {
        if let Some(order) = self.store.get(order_id) {
            if let Some(trigger) = order.limit_price {
                if order.order_type.is_triggered() && !order.status.is_terminal() {
                    self.triggers
                        .insert(order.order_type, order.side, trigger, order.seq, order_id);
                }
            }
        }
    }

    /// Marks the order failed, halts the pair, and records both. The halt
    /// stays until operators call [`PairEngine::clear_halt`].
    fn handle_failure(&mut self, order_id: OrderId, err: &EngineError) {
        error!(
            "settlement failure on {} for order {}: {err}",
            self.pair.symbol, order_id.0
        );
        self.book.remove(order_id);
        if let Err(e) = self.store.finish(&self.ledger, order_id, OrderStatus::Failed) {
            error!("marking order {} failed also failed: {e}", order_id.0);
        }
        self.halted = true;
        warn!("pair {} halted pending manual review", self.pair.symbol);
        self.audit.emit(&AuditEvent::now(
            "system",
            AuditAction::SettlementFailure,
            &self.pair.symbol,
            Some(serde_json::json!({ "order_id": order_id.0, "detail": err.to_string() })),
            "failed",
        ));
        self.audit.emit(&AuditEvent::now(
            "system",
            AuditAction::PairHalted,
            &self.pair.symbol,
            None,
            "halted",
        ));
    }

    fn record_trades(&mut self, trades: &[Trade]) {
        for trade in trades {
            self.last_trade_price = Some(trade.price);
            if let Some(log) = &self.trade_log {
                if let Err(e) = log.append(trade) {
                    warn!("trade log append failed for trade {}: {e}", trade.trade_id.0);
                }
            }
            self.audit.emit(&AuditEvent::now(
                format!("user-{}", trade.taker_user_id.0),
                AuditAction::TradeSettled,
                &self.pair.symbol,
                Some(serde_json::json!({
                    "trade_id": trade.trade_id.0,
                    "maker_order_id": trade.maker_order_id.0,
                    "taker_order_id": trade.taker_order_id.0,
                })),
                "settled",
            ));
        }
    }

    fn audit_submit(&self, request: &SubmitRequest, order_id: Option<OrderId>, outcome: &str) {
        let resource = order_id.map(|id| serde_json::json!({ "order_id": id.0 }));
        self.audit.emit(&AuditEvent::now(
            format!("user-{}", request.user_id.0),
            AuditAction::OrderSubmit,
            &self.pair.symbol,
            resource,
            outcome,
        ));
    }

    /// Best-effort cost estimate for error reporting on market buys.
    fn estimated_market_cost(&self, request: &SubmitRequest) -> Decimal {
        self.book
            .first_eligible(request.side, None, request.user_id)
            .map(|m| {
                request.quantity * m.price * (Decimal::ONE + self.pair.taker_fee_rate)
            })
            .unwrap_or(Decimal::ZERO)
    }

    fn estimate_remaining_cost(&self, order: &Order) -> Decimal {
        self.book
            .first_eligible(order.side, None, order.user_id)
            .map(|m| {
                order.remaining_quantity * m.price * (Decimal::ONE + self.pair.taker_fee_rate)
            })
            .unwrap_or(Decimal::ZERO)
    }
}
