//! Per-pair order book: bids and asks under price-time priority.
//!
//! Both sides are sorted trees keyed by (price, arrival sequence), so insert
//! and remove are O(log n) and FIFO at equal price falls out of the key
//! order. The book holds references to resting orders (id, owner, remaining);
//! the order records themselves live in the order store.

use crate::types::{OrderId, Side, UserId};
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

/// A resting order as the book sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookEntry {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub remaining: Decimal,
}

/// The best eligible counterparty found for an incoming order.
#[derive(Clone, Debug)]
pub struct BestMatch {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub price: Decimal,
    pub remaining: Decimal,
}

/// One aggregated price level of a depth snapshot.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Depth snapshot: best-first aggregated levels for both sides.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BookDepth {
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Order book for a single trading pair.
///
/// Contains only orders with remaining > 0; an order is removed exactly when
/// it fills to zero or is cancelled/expired.
#[derive(Debug, Default)]
pub struct OrderBook {
    symbol: String,
    /// Reverse(price) so iteration yields highest bid first, FIFO within price.
    bids: BTreeMap<(Reverse<Decimal>, u64), BookEntry>,
    asks: BTreeMap<(Decimal, u64), BookEntry>,
    /// Lookup for cancel/reduce by id: (side, price, seq).
    index: HashMap<OrderId, (Side, Decimal, u64)>,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        OrderBook {
            symbol: symbol.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Inserts a resting order at (price, seq). The caller guarantees seq is
    /// the order's arrival sequence number; duplicate ids are a caller bug
    /// and replace the index entry.
    pub fn insert(&mut self, side: Side, price: Decimal, seq: u64, entry: BookEntry) {
        self.index.insert(entry.order_id, (side, price, seq));
        match side {
            Side::Buy => {
                self.bids.insert((Reverse(price), seq), entry);
            }
            Side::Sell => {
                self.asks.insert((price, seq), entry);
            }
        }
    }

    /// Removes an order. Idempotent: returns false if absent (already matched
    /// away or already removed), since cancels race with matching by design.
    pub fn remove(&mut self, order_id: OrderId) -> bool {
        let Some((side, price, seq)) = self.index.remove(&order_id) else {
            return false;
        };
        match side {
            Side::Buy => self.bids.remove(&(Reverse(price), seq)),
            Side::Sell => self.asks.remove(&(price, seq)),
        };
        true
    }

    /// Decrements a resting order's remaining after a partial fill. Removing
    /// at zero is the caller's job (it also owns the order-store update).
    pub fn reduce(&mut self, order_id: OrderId, by: Decimal) -> bool {
        let Some((side, price, seq)) = self.index.get(&order_id).copied() else {
            return false;
        };
        let entry = match side {
            Side::Buy => self.bids.get_mut(&(Reverse(price), seq)),
            Side::Sell => self.asks.get_mut(&(price, seq)),
        };
        match entry {
            Some(e) => {
                e.remaining -= by;
                true
            }
            None => false,
        }
    }

    /// Best counterparty for an incoming order on `taker_side`, respecting
    /// the price condition and skipping the taker's own resting orders
    /// (self-trade prevention). `price_limit` is `None` for market orders.
    pub fn first_eligible(
        &self,
        taker_side: Side,
        price_limit: Option<Decimal>,
        exclude_user: UserId,
    ) -> Option<BestMatch> {
        match taker_side {
            Side::Buy => self
                .asks
                .iter()
                .take_while(|((price, _), _)| price_limit.map_or(true, |limit| *price <= limit))
                .find(|(_, e)| e.user_id != exclude_user)
                .map(|((price, _), e)| BestMatch {
                    order_id: e.order_id,
                    user_id: e.user_id,
                    price: *price,
                    remaining: e.remaining,
                }),
            Side::Sell => self
                .bids
                .iter()
                .take_while(|((Reverse(price), _), _)| {
                    price_limit.map_or(true, |limit| *price >= limit)
                })
                .find(|(_, e)| e.user_id != exclude_user)
                .map(|((Reverse(price), _), e)| BestMatch {
                    order_id: e.order_id,
                    user_id: e.user_id,
                    price: *price,
                    remaining: e.remaining,
                }),
        }
    }

    /// Best bid price (None if empty).
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next().map(|(Reverse(price), _)| *price)
    }

    /// Best ask price (None if empty).
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().map(|(price, _)| *price)
    }

    /// True if any order is resting on either side.
    pub fn has_resting_orders(&self) -> bool {
        !self.index.is_empty()
    }

    /// Whether the given order is currently resting.
    pub fn contains(&self, order_id: OrderId) -> bool {
        self.index.contains_key(&order_id)
    }

    /// Aggregated depth snapshot, best-first, at most `depth` levels per side.
    pub fn depth(&self, depth: usize) -> BookDepth {
        fn aggregate<'a>(
            prices: impl Iterator<Item = (Decimal, &'a BookEntry)>,
            depth: usize,
        ) -> Vec<PriceLevel> {
            let mut levels: Vec<PriceLevel> = Vec::new();
            for (price, entry) in prices {
                match levels.last_mut() {
                    Some(level) if level.price == price => level.quantity += entry.remaining,
                    _ => {
                        if levels.len() == depth {
                            break;
                        }
                        levels.push(PriceLevel {
                            price,
                            quantity: entry.remaining,
                        });
                    }
                }
            }
            levels
        }
        BookDepth {
            symbol: self.symbol.clone(),
            bids: aggregate(
                self.bids.iter().map(|((Reverse(p), _), e)| (*p, e)),
                depth,
            ),
            asks: aggregate(self.asks.iter().map(|((p, _), e)| (*p, e)), depth),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, user: u64, qty: i64) -> BookEntry {
        BookEntry {
            order_id: OrderId(id),
            user_id: UserId(user),
            remaining: Decimal::from(qty),
        }
    }

    #[test]
    fn insert_and_best_prices() {
        let mut book = OrderBook::new("BTC-USD");
        book.insert(Side::Buy, Decimal::from(99), 1, entry(1, 1, 10));
        book.insert(Side::Buy, Decimal::from(100), 2, entry(2, 2, 5));
        book.insert(Side::Sell, Decimal::from(101), 3, entry(3, 3, 7));
        book.insert(Side::Sell, Decimal::from(102), 4, entry(4, 4, 2));
        assert_eq!(book.best_bid(), Some(Decimal::from(100)));
        assert_eq!(book.best_ask(), Some(Decimal::from(101)));
    }

    #[test]
    fn fifo_at_equal_price() {
        let mut book = OrderBook::new("BTC-USD");
        book.insert(Side::Sell, Decimal::from(100), 7, entry(1, 1, 10));
        book.insert(Side::Sell, Decimal::from(100), 9, entry(2, 2, 10));
        let best = book
            .first_eligible(Side::Buy, Some(Decimal::from(100)), UserId(99))
            .unwrap();
        assert_eq!(best.order_id, OrderId(1), "earlier seq matches first");
    }

    #[test]
    fn remove_is_idempotent() {
        let mut book = OrderBook::new("BTC-USD");
        book.insert(Side::Buy, Decimal::from(100), 1, entry(1, 1, 10));
        assert!(book.remove(OrderId(1)));
        assert!(!book.remove(OrderId(1)));
        assert!(book.best_bid().is_none());
    }

    #[test]
    fn first_eligible_respects_price_limit() {
        let mut book = OrderBook::new("BTC-USD");
        book.insert(Side::Sell, Decimal::from(105), 1, entry(1, 1, 10));
        assert!(book
            .first_eligible(Side::Buy, Some(Decimal::from(104)), UserId(2))
            .is_none());
        assert!(book
            .first_eligible(Side::Buy, Some(Decimal::from(105)), UserId(2))
            .is_some());
        // Market order (no limit) always crosses.
        assert!(book.first_eligible(Side::Buy, None, UserId(2)).is_some());
    }

    #[test]
    fn first_eligible_skips_own_orders() {
        let mut book = OrderBook::new("BTC-USD");
        book.insert(Side::Sell, Decimal::from(100), 1, entry(1, 1, 10));
        book.insert(Side::Sell, Decimal::from(101), 2, entry(2, 2, 10));
        let best = book.first_eligible(Side::Buy, None, UserId(1)).unwrap();
        assert_eq!(best.order_id, OrderId(2), "own resting order skipped");
        assert_eq!(best.price, Decimal::from(101));
    }

    #[test]
    fn bids_scan_best_first_for_sells() {
        let mut book = OrderBook::new("BTC-USD");
        book.insert(Side::Buy, Decimal::from(98), 1, entry(1, 1, 10));
        book.insert(Side::Buy, Decimal::from(100), 2, entry(2, 2, 10));
        let best = book
            .first_eligible(Side::Sell, Some(Decimal::from(99)), UserId(3))
            .unwrap();
        assert_eq!(best.price, Decimal::from(100), "highest bid first");
        // Limit above best bid: nothing eligible.
        assert!(book
            .first_eligible(Side::Sell, Some(Decimal::from(101)), UserId(3))
            .is_none());
    }

    #[test]
    fn reduce_updates_remaining() {
        let mut book = OrderBook::new("BTC-USD");
        book.insert(Side::Sell, Decimal::from(100), 1, entry(1, 1, 10));
        assert!(book.reduce(OrderId(1), Decimal::from(4)));
        let best = book.first_eligible(Side::Buy, None, UserId(2)).unwrap();
        assert_eq!(best.remaining, Decimal::from(6));
        assert!(!book.reduce(OrderId(99), Decimal::ONE));
    }

    #[test]
    fn depth_aggregates_levels() {
        let mut book = OrderBook::new("BTC-USD");
        book.insert(Side::Sell, Decimal::from(100), 1, entry(1, 1, 3));
        book.insert(Side::Sell, Decimal::from(100), 2, entry(2, 2, 4));
        book.insert(Side::Sell, Decimal::from(101), 3, entry(3, 3, 5));
        book.insert(Side::Buy, Decimal::from(99), 4, entry(4, 4, 2));
        let depth = book.depth(1);
        assert_eq!(depth.asks.len(), 1);
        assert_eq!(
            depth.asks[0],
            PriceLevel {
                price: Decimal::from(100),
                quantity: Decimal::from(7),
            }
        );
        assert_eq!(depth.bids.len(), 1);
        let full = book.depth(10);
        assert_eq!(full.asks.len(), 2);
    }
}
