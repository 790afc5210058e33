//! # Exchange Core
//!
//! Limit order book, price-time priority matching engine, and atomic wallet
//! settlement for a cryptocurrency exchange. One engine instance per trading
//! pair serializes that pair's order flow; all pairs settle against a shared,
//! internally synchronized ledger with a reserved/available balance split.
//!
//! ## Entry point
//!
//! Use [`Exchange`] as the single entry point: register pairs with
//! [`Exchange::add_pair`], fund accounts with [`Exchange::deposit`], then
//! [`Exchange::submit_order`], [`Exchange::cancel_order`],
//! [`Exchange::get_order_status`], [`Exchange::get_book_snapshot`], and
//! [`Exchange::get_balance`].
//!
//! ## Example
//!
//! ```rust
//! use exchange_core::{
//!     Currency, EnginePolicy, Exchange, OrderStatus, OrderType, Side, SubmitRequest,
//!     TradingPair, UserId,
//! };
//! use rust_decimal::Decimal;
//!
//! let mut exchange = Exchange::new(EnginePolicy::default());
//! exchange.add_pair(TradingPair::new(
//!     "BTC-USD",
//!     Currency::new("BTC"),
//!     Currency::new("USD"),
//!     Decimal::new(1, 4),   // min quantity 0.0001
//!     Decimal::from(1000),  // max quantity
//!     Decimal::new(1, 3),   // maker fee 0.1%
//!     Decimal::new(2, 3),   // taker fee 0.2%
//! ))?;
//! exchange.deposit(UserId(1), &Currency::new("BTC"), Decimal::ONE)?;
//! exchange.deposit(UserId(2), &Currency::new("USD"), Decimal::from(60_000))?;
//!
//! // Resting sell 1 BTC @ 50_000, then a crossing buy.
//! let sell = exchange.submit_order(SubmitRequest {
//!     user_id: UserId(1),
//!     pair_symbol: "BTC-USD".into(),
//!     side: Side::Sell,
//!     order_type: OrderType::Limit,
//!     quantity: Decimal::ONE,
//!     limit_price: Some(Decimal::from(50_000)),
//!     expires_at: None,
//! })?;
//! assert_eq!(sell.status, OrderStatus::Pending);
//!
//! let buy = exchange.submit_order(SubmitRequest {
//!     user_id: UserId(2),
//!     pair_symbol: "BTC-USD".into(),
//!     side: Side::Buy,
//!     order_type: OrderType::Limit,
//!     quantity: Decimal::ONE,
//!     limit_price: Some(Decimal::from(50_000)),
//!     expires_at: None,
//! })?;
//! assert_eq!(buy.status, OrderStatus::Filled);
//! assert_eq!(buy.trades.len(), 1);
//! assert_eq!(buy.trades[0].price, Decimal::from(50_000));
//! # Ok::<(), exchange_core::EngineError>(())
//! ```
//!
//! ## Lower-level API
//!
//! [`PairEngine`], [`OrderBook`], [`Ledger`], and [`Settlement`] are public
//! for callers that embed a single pair's engine directly.

pub mod api;
pub mod audit;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod lifecycle;
pub mod matching;
pub mod order_book;
pub mod order_flow;
pub mod pair;
pub mod persistence;
pub mod settlement;
pub mod triggers;
pub mod types;

pub use audit::{AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, StdoutAuditSink};
pub use engine::{EnginePolicy, NoLiquidityPolicy, PairEngine};
pub use error::EngineError;
pub use exchange::{Exchange, FEE_SINK};
pub use ledger::{Balance, BalanceView, Ledger, LedgerEntry, Posting};
pub use lifecycle::{required_reservation, OrderStore, Reservation};
pub use matching::{match_incoming, MatchEnd};
pub use order_book::{BookDepth, BookEntry, OrderBook, PriceLevel};
pub use order_flow::{fund_traders, replay, FlowConfig, FlowGenerator, ReplayStats};
pub use pair::TradingPair;
pub use persistence::{ExchangeSnapshot, FilePersistence, PairState, TradeLog};
pub use settlement::{FeeCurrency, SettledMatch, Settlement, Trade, TradeStatus};
pub use types::{
    Currency, Order, OrderId, OrderResult, OrderStatus, OrderType, OrderView, Side,
    SubmitRequest, TradeId, UserId,
};
