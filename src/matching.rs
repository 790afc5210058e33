//! Price-time priority matching.
//!
//! [`match_incoming`] runs one order against the book: repeatedly takes the
//! best eligible counterparty, settles each match atomically through the
//! ledger, and updates both orders' fill state. Execution is always at the
//! maker's resting price. Trades already settled stay committed even when a
//! later match in the same attempt fails.

use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::lifecycle::OrderStore;
use crate::order_book::OrderBook;
use crate::pair::TradingPair;
use crate::settlement::{FeeCurrency, Settlement, Trade};
use crate::types::{OrderId, Side};
use log::info;
use rust_decimal::{Decimal, RoundingStrategy};

/// Why the matching loop stopped.
#[derive(Debug)]
pub enum MatchEnd {
    /// Filled, or no eligible counterparty remains at an acceptable price.
    Exhausted,
    /// Market buy: the committed quote reservation cannot fund another fill.
    OutOfFunds,
    /// Settlement failed; the error carries the invariant violation. Trades
    /// settled before the failure remain committed.
    Failed(EngineError),
}

/// Matches the incoming order `taker_id` until it fills, runs out of
/// eligible liquidity, or settlement fails. Returns the trades executed in
/// this attempt and why the loop ended. Fill state for both sides and the
/// book are updated per match; resting the remainder is the engine's call.
pub fn match_incoming(
    book: &mut OrderBook,
    store: &mut OrderStore,
    ledger: &Ledger,
    pair: &TradingPair,
    settlement: &Settlement,
    taker_id: OrderId,
    now: u64,
) -> (Vec<Trade>, MatchEnd) {
    let mut trades = Vec::new();
    loop {
        let Some(taker) = store.get(taker_id).cloned() else {
            return (trades, MatchEnd::Failed(EngineError::NotFound(taker_id)));
        };
        if taker.remaining_quantity <= Decimal::ZERO {
            return (trades, MatchEnd::Exhausted);
        }

        let Some(counter) =
            book.first_eligible(taker.side, taker.limit_price, taker.user_id)
        else {
            return (trades, MatchEnd::Exhausted);
        };

        let mut quantity = taker.remaining_quantity.min(counter.remaining);

        // Market buy: the reservation was sized from the balance, not a
        // price, so cap the fill at what it can still fund at this price.
        if taker.side == Side::Buy && taker.limit_price.is_none() {
            let unit_cost = match settlement.fee_currency() {
                FeeCurrency::Quote => {
                    counter.price * (Decimal::ONE + pair.taker_fee_rate)
                }
                FeeCurrency::Base => counter.price,
            };
            // Truncate to the ledger's 8-decimal precision so rounding in
            // the division can never overdraw the reservation.
            let affordable = (taker.reserved_remaining / unit_cost)
                .round_dp_with_strategy(8, RoundingStrategy::ToZero);
            quantity = quantity.min(affordable);
            if quantity <= Decimal::ZERO {
                return (trades, MatchEnd::OutOfFunds);
            }
        }

        let Some(maker) = store.get(counter.order_id).cloned() else {
            // Book and store out of sync: a bug, not a business outcome.
            return (
                trades,
                MatchEnd::Failed(EngineError::SettlementFailure {
                    pair: pair.symbol.clone(),
                    detail: format!("resting order {:?} missing from store", counter.order_id),
                }),
            );
        };

        let settled = match settlement.settle(
            ledger,
            pair,
            &maker,
            &taker,
            quantity,
            counter.price,
            now,
        ) {
            Ok(s) => s,
            Err(e) => return (trades, MatchEnd::Failed(e)),
        };

        // Ledger is committed for this match: keep order state in lockstep.
        // Failures past this point are invariant violations.
        if let Err(e) =
            store.apply_fill(maker.order_id, quantity, settled.maker_reserved_debit)
        {
            return (trades, MatchEnd::Failed(e));
        }
        if let Err(e) = store.apply_fill(taker_id, quantity, settled.taker_reserved_debit) {
            return (trades, MatchEnd::Failed(e));
        }

        if quantity >= counter.remaining {
            book.remove(maker.order_id);
            // A filled buy maker can hold price-improvement leftover.
            if let Err(e) = store.release_leftover(ledger, maker.order_id) {
                return (trades, MatchEnd::Failed(e));
            }
        } else {
            book.reduce(maker.order_id, quantity);
        }

        info!(
            "trade trade_id={} pair={} maker={} taker={} price={} quantity={}",
            settled.trade.trade_id.0,
            pair.symbol,
            maker.order_id.0,
            taker_id.0,
            settled.trade.price,
            quantity
        );
        trades.push(settled.trade);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{required_reservation, Reservation};
    use crate::types::{Currency, Order, OrderStatus, OrderType, SubmitRequest, UserId};

    fn pair() -> TradingPair {
        TradingPair::new(
            "BTC-USD",
            Currency::new("BTC"),
            Currency::new("USD"),
            Decimal::new(1, 4),
            Decimal::from(1000),
            Decimal::new(1, 3),
            Decimal::new(2, 3),
        )
    }

    struct Fixture {
        book: OrderBook,
        store: OrderStore,
        ledger: Ledger,
        settlement: Settlement,
        pair: TradingPair,
        next_seq: u64,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                book: OrderBook::new("BTC-USD"),
                store: OrderStore::new(),
                ledger: Ledger::new(),
                settlement: Settlement::new(UserId(0), FeeCurrency::Quote),
                pair: pair(),
                next_seq: 1,
            }
        }

        /// Funds, reserves, and registers an order; limit orders also rest
        /// on the book so they can be matched against.
        fn place(&mut self, id: u64, user: u64, side: Side, qty: i64, price: Option<i64>) -> OrderId {
            let quantity = Decimal::from(qty);
            let limit_price = price.map(Decimal::from);
            let request = SubmitRequest {
                user_id: UserId(user),
                pair_symbol: "BTC-USD".into(),
                side,
                order_type: if price.is_some() {
                    OrderType::Limit
                } else {
                    OrderType::Market
                },
                quantity,
                limit_price,
                expires_at: None,
            };
            // Ample funding so reservation always succeeds in these tests.
            let funding = Decimal::from(1_000_000);
            self.ledger
                .deposit(request.user_id, &self.pair.base, funding)
                .unwrap();
            self.ledger
                .deposit(request.user_id, &self.pair.quote, funding)
                .unwrap();
            let available = self
                .ledger
                .balance(request.user_id, &self.pair.quote)
                .available;
            let Reservation { currency, amount } = required_reservation(
                &self.pair,
                self.settlement.fee_currency(),
                side,
                quantity,
                limit_price,
                available,
            )
            .unwrap();
            self.ledger.reserve(request.user_id, &currency, amount).unwrap();
            let seq = self.next_seq;
            self.next_seq += 1;
            let order = Order {
                order_id: OrderId(id),
                user_id: request.user_id,
                pair_symbol: request.pair_symbol,
                side,
                order_type: request.order_type,
                limit_price,
                original_quantity: quantity,
                filled_quantity: Decimal::ZERO,
                remaining_quantity: quantity,
                status: OrderStatus::Pending,
                created_at: seq,
                expires_at: None,
                seq,
                reserve_currency: currency,
                reserved_remaining: amount,
            };
            self.store.insert(order);
            if let Some(p) = limit_price {
                self.book.insert(
                    side,
                    p,
                    seq,
                    crate::order_book::BookEntry {
                        order_id: OrderId(id),
                        user_id: UserId(user),
                        remaining: quantity,
                    },
                );
            }
            OrderId(id)
        }

        fn run(&mut self, taker: OrderId) -> (Vec<Trade>, MatchEnd) {
            // The taker must not be resting while it matches.
            self.book.remove(taker);
            match_incoming(
                &mut self.book,
                &mut self.store,
                &self.ledger,
                &self.pair,
                &self.settlement,
                taker,
                1,
            )
        }
    }

    #[test]
    fn full_match_fills_both_sides() {
        let mut fx = Fixture::new();
        fx.place(1, 1, Side::Sell, 10, Some(100));
        let taker = fx.place(2, 2, Side::Buy, 10, Some(100));
        let (trades, end) = fx.run(taker);
        assert!(matches!(end, MatchEnd::Exhausted));
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].quantity, Decimal::from(10));
        assert_eq!(trades[0].price, Decimal::from(100));
        assert_eq!(fx.store.get(OrderId(1)).unwrap().status, OrderStatus::Filled);
        assert_eq!(fx.store.get(OrderId(2)).unwrap().status, OrderStatus::Filled);
        assert!(fx.book.best_ask().is_none());
    }

    #[test]
    fn partial_fill_leaves_maker_resting() {
        let mut fx = Fixture::new();
        fx.place(1, 1, Side::Sell, 20, Some(100));
        let taker = fx.place(2, 2, Side::Buy, 5, Some(100));
        let (trades, _) = fx.run(taker);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].quantity, Decimal::from(5));
        let maker = fx.store.get(OrderId(1)).unwrap();
        assert_eq!(maker.status, OrderStatus::PartiallyFilled);
        assert_eq!(maker.remaining_quantity, Decimal::from(15));
        assert_eq!(fx.book.best_ask(), Some(Decimal::from(100)));
    }

    #[test]
    fn execution_at_maker_price() {
        let mut fx = Fixture::new();
        fx.place(1, 1, Side::Sell, 10, Some(99));
        let taker = fx.place(2, 2, Side::Buy, 10, Some(105));
        let (trades, _) = fx.run(taker);
        assert_eq!(trades[0].price, Decimal::from(99), "maker sets the price");
    }

    #[test]
    fn sweeps_multiple_levels_in_price_order() {
        let mut fx = Fixture::new();
        fx.place(1, 1, Side::Sell, 5, Some(101));
        fx.place(2, 3, Side::Sell, 5, Some(100));
        let taker = fx.place(4, 2, Side::Buy, 10, Some(101));
        let (trades, _) = fx.run(taker);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].price, Decimal::from(100), "best price first");
        assert_eq!(trades[1].price, Decimal::from(101));
        assert_eq!(fx.store.get(OrderId(4)).unwrap().status, OrderStatus::Filled);
    }

    #[test]
    fn fifo_priority_among_equal_prices() {
        let mut fx = Fixture::new();
        fx.place(1, 1, Side::Sell, 5, Some(100));
        fx.place(2, 3, Side::Sell, 5, Some(100));
        let taker = fx.place(3, 2, Side::Buy, 5, Some(100));
        let (trades, _) = fx.run(taker);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].maker_order_id, OrderId(1), "earlier arrival matched first");
        assert!(fx.book.contains(OrderId(2)));
    }

    #[test]
    fn price_condition_stops_matching() {
        let mut fx = Fixture::new();
        fx.place(1, 1, Side::Sell, 10, Some(105));
        let taker = fx.place(2, 2, Side::Buy, 10, Some(100));
        let (trades, end) = fx.run(taker);
        assert!(trades.is_empty());
        assert!(matches!(end, MatchEnd::Exhausted));
        assert_eq!(
            fx.store.get(OrderId(2)).unwrap().remaining_quantity,
            Decimal::from(10)
        );
    }

    #[test]
    fn market_buy_takes_all_levels() {
        let mut fx = Fixture::new();
        fx.place(1, 1, Side::Sell, 5, Some(100));
        fx.place(2, 3, Side::Sell, 5, Some(110));
        let taker = fx.place(3, 2, Side::Buy, 10, None);
        let (trades, end) = fx.run(taker);
        assert!(matches!(end, MatchEnd::Exhausted));
        assert_eq!(trades.len(), 2);
        assert_eq!(fx.store.get(OrderId(3)).unwrap().status, OrderStatus::Filled);
    }

    #[test]
    fn self_orders_are_skipped() {
        let mut fx = Fixture::new();
        fx.place(1, 1, Side::Sell, 5, Some(100));
        fx.place(2, 2, Side::Sell, 5, Some(101));
        let taker = fx.place(3, 1, Side::Buy, 5, None);
        let (trades, _) = fx.run(taker);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].maker_order_id, OrderId(2), "own ask skipped");
        assert!(fx.book.contains(OrderId(1)), "own resting order untouched");
    }

    #[test]
    fn settlement_failure_keeps_committed_trades() {
        let mut fx = Fixture::new();
        fx.place(1, 1, Side::Sell, 5, Some(100));
        fx.place(2, 3, Side::Sell, 5, Some(101));
        let taker = fx.place(3, 2, Side::Buy, 10, Some(105));
        // Corrupt the second maker's reservation behind the engine's back.
        fx.ledger
            .release(UserId(3), &Currency::new("BTC"), Decimal::from(5))
            .unwrap();
        fx.ledger
            .post(&crate::ledger::Posting {
                debit: UserId(3),
                credit: UserId(9),
                currency: Currency::new("BTC"),
                amount: Decimal::from(1_000_000),
                from_reserved: false,
            })
            .unwrap();
        let (trades, end) = fx.run(taker);
        assert_eq!(trades.len(), 1, "first match committed");
        assert!(matches!(end, MatchEnd::Failed(ref e) if e.is_critical()));
        let taker_order = fx.store.get(OrderId(3)).unwrap();
        assert_eq!(taker_order.filled_quantity, Decimal::from(5));
    }
}
