//! Multi-pair exchange: one engine per trading pair behind a router.
//!
//! Each pair's engine is wrapped in its own mutex, so all operations for a
//! pair serialize in arrival order while distinct pairs run truly in
//! parallel. The ledger is shared: the same user can trade on several pairs
//! that settle in the same currency, and the ledger's per-key locking keeps
//! that safe without any cross-pair coordination here.

use crate::audit::{AuditSink, StdoutAuditSink};
use crate::engine::{EnginePolicy, PairEngine};
use crate::error::EngineError;
use crate::ledger::{BalanceView, Ledger};
use crate::order_book::BookDepth;
use crate::pair::TradingPair;
use crate::persistence::{ExchangeSnapshot, PairState, TradeLog};
use crate::settlement::Settlement;
use crate::types::{Currency, OrderId, OrderResult, OrderView, SubmitRequest, UserId};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Account that accumulates retained fees.
pub const FEE_SINK: UserId = UserId(0);

/// The core's external interface: everything the (out-of-scope) API layer
/// calls goes through here.
pub struct Exchange {
    ledger: Arc<Ledger>,
    policy: EnginePolicy,
    settlement: Settlement,
    engines: HashMap<String, Mutex<PairEngine>>,
    /// Order-to-pair routing cache; rebuilt lazily by scanning on a miss.
    routes: RwLock<HashMap<OrderId, String>>,
    next_order_id: Arc<AtomicU64>,
    audit: Arc<dyn AuditSink>,
    trade_log: Option<Arc<TradeLog>>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Exchange {
    pub fn new(policy: EnginePolicy) -> Self {
        let settlement = Settlement::new(FEE_SINK, policy.fee_currency);
        Exchange {
            ledger: Arc::new(Ledger::new()),
            policy,
            settlement,
            engines: HashMap::new(),
            routes: RwLock::new(HashMap::new()),
            next_order_id: Arc::new(AtomicU64::new(1)),
            audit: Arc::new(StdoutAuditSink),
            trade_log: None,
        }
    }

    /// Replaces the audit sink. Configure before [`Exchange::add_pair`]; the
    /// engines capture the sink at construction.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Attaches the append-only trade log. Configure before adding pairs.
    pub fn with_trade_log(mut self, trade_log: Arc<TradeLog>) -> Self {
        self.trade_log = Some(trade_log);
        self
    }

    /// Registers a trading pair and spins up its engine.
    pub fn add_pair(&mut self, pair: TradingPair) -> Result<(), EngineError> {
        if self.engines.contains_key(&pair.symbol) {
            return Err(EngineError::InvalidState(format!(
                "pair {} already registered",
                pair.symbol
            )));
        }
        let engine = PairEngine::new(
            pair.clone(),
            self.policy,
            self.ledger.clone(),
            self.settlement.clone(),
            self.audit.clone(),
            self.trade_log.clone(),
            self.next_order_id.clone(),
        );
        self.engines.insert(pair.symbol, Mutex::new(engine));
        Ok(())
    }

    pub fn pairs(&self) -> Vec<TradingPair> {
        let mut out: Vec<TradingPair> = self
            .engines
            .values()
            .map(|e| e.lock().expect("lock").pair().clone())
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Credits funds to a user. Funding hook for the external wallet layer.
    pub fn deposit(
        &self,
        user: UserId,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        self.ledger.deposit(user, currency, amount)
    }

    pub fn get_balance(&self, user: UserId, currency: &Currency) -> BalanceView {
        self.ledger.balance(user, currency)
    }

    /// Submits an order to its pair's engine.
    pub fn submit_order(&self, request: SubmitRequest) -> Result<OrderResult, EngineError> {
        let engine = self
            .engines
            .get(&request.pair_symbol)
            .ok_or_else(|| EngineError::InvalidPair(request.pair_symbol.clone()))?;
        let symbol = request.pair_symbol.clone();
        let result = engine.lock().expect("lock").submit(request, now_millis());
        let created = match &result {
            Ok(r) => Some(r.order_id),
            // A rejected market order still leaves a queryable record.
            Err(EngineError::NoLiquidity(id)) => Some(*id),
            Err(_) => None,
        };
        if let Some(order_id) = created {
            self.routes.write().expect("lock").insert(order_id, symbol);
        }
        result
    }

    /// Cancels an order on behalf of its owner.
    pub fn cancel_order(&self, order_id: OrderId, user: UserId) -> Result<(), EngineError> {
        let engine = self.engine_for(order_id)?;
        engine.lock().expect("lock").cancel(order_id, user, now_millis())
    }

    pub fn get_order_status(&self, order_id: OrderId) -> Result<OrderView, EngineError> {
        let engine = self.engine_for(order_id)?;
        let guard = engine.lock().expect("lock");
        guard
            .order_view(order_id)
            .ok_or(EngineError::NotFound(order_id))
    }

    pub fn get_book_snapshot(&self, symbol: &str, depth: usize) -> Result<BookDepth, EngineError> {
        let engine = self
            .engines
            .get(symbol)
            .ok_or_else(|| EngineError::InvalidPair(symbol.to_string()))?;
        Ok(engine.lock().expect("lock").depth(depth))
    }

    /// Expires due orders across all pairs. Periodic-sweep entry point.
    pub fn sweep_expired(&self) -> usize {
        let now = now_millis();
        self.engines
            .values()
            .map(|e| e.lock().expect("lock").sweep_expired(now))
            .sum()
    }

    pub fn is_halted(&self, symbol: &str) -> Result<bool, EngineError> {
        let engine = self
            .engines
            .get(symbol)
            .ok_or_else(|| EngineError::InvalidPair(symbol.to_string()))?;
        Ok(engine.lock().expect("lock").halted())
    }

    /// Manual re-arm of a halted pair after operator review.
    pub fn clear_halt(&self, symbol: &str) -> Result<(), EngineError> {
        let engine = self
            .engines
            .get(symbol)
            .ok_or_else(|| EngineError::InvalidPair(symbol.to_string()))?;
        engine.lock().expect("lock").clear_halt();
        Ok(())
    }

    /// Captures the full persistable state.
    pub fn snapshot(&self) -> ExchangeSnapshot {
        let mut orders = Vec::new();
        let mut pairs = Vec::new();
        let mut pair_state = HashMap::new();
        for engine in self.engines.values() {
            let guard = engine.lock().expect("lock");
            pairs.push(guard.pair().clone());
            pair_state.insert(
                guard.pair().symbol.clone(),
                PairState {
                    last_trade_price: guard.last_trade_price(),
                    halted: guard.halted(),
                },
            );
            orders.extend(guard.orders());
        }
        pairs.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        orders.sort_by_key(|o| o.order_id);
        ExchangeSnapshot {
            pairs,
            orders,
            ledger: self.ledger.entries(),
            pair_state,
            next_order_id: self.next_order_id.load(Ordering::SeqCst),
            next_trade_id: self.settlement.peek_next_trade_id(),
        }
    }

    /// Rebuilds an exchange from a snapshot. Books, trigger indexes, and
    /// expiry schedules come back from the open orders.
    pub fn restore(
        snapshot: ExchangeSnapshot,
        policy: EnginePolicy,
        audit: Arc<dyn AuditSink>,
        trade_log: Option<Arc<TradeLog>>,
    ) -> Result<Self, EngineError> {
        let settlement = Settlement::new(FEE_SINK, policy.fee_currency);
        settlement.restore_next_trade_id(snapshot.next_trade_id);
        let mut exchange = Exchange {
            ledger: Arc::new(Ledger::from_entries(&snapshot.ledger)),
            policy,
            settlement,
            engines: HashMap::new(),
            routes: RwLock::new(HashMap::new()),
            next_order_id: Arc::new(AtomicU64::new(snapshot.next_order_id)),
            audit,
            trade_log,
        };
        for pair in snapshot.pairs {
            exchange.add_pair(pair)?;
        }
        let mut by_pair: HashMap<String, Vec<crate::types::Order>> = HashMap::new();
        {
            let mut routes = exchange.routes.write().expect("lock");
            for order in snapshot.orders {
                routes.insert(order.order_id, order.pair_symbol.clone());
                by_pair.entry(order.pair_symbol.clone()).or_default().push(order);
            }
        }
        for (symbol, orders) in by_pair {
            let engine = exchange
                .engines
                .get(&symbol)
                .ok_or_else(|| EngineError::InvalidPair(symbol.clone()))?;
            let state = snapshot.pair_state.get(&symbol).cloned().unwrap_or_default();
            engine
                .lock()
                .expect("lock")
                .restore(orders, state.last_trade_price, state.halted)?;
        }
        Ok(exchange)
    }

    /// Resolves an order to its pair engine, falling back to a scan when the
    /// routing cache misses (e.g. after restore of a partial cache).
    fn engine_for(&self, order_id: OrderId) -> Result<&Mutex<PairEngine>, EngineError> {
        if let Some(symbol) = self.routes.read().expect("lock").get(&order_id) {
            if let Some(engine) = self.engines.get(symbol) {
                return Ok(engine);
            }
        }
        for (symbol, engine) in &self.engines {
            if engine.lock().expect("lock").order_view(order_id).is_some() {
                self.routes
                    .write()
                    .expect("lock")
                    .insert(order_id, symbol.clone());
                return Ok(engine);
            }
        }
        Err(EngineError::NotFound(order_id))
    }
}
