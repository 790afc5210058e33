//! Settlement: converts one match into ledger postings, atomically and
//! exactly once, and emits the immutable [`Trade`] record.
//!
//! Default policy retains fees in the quote currency: the buyer pays
//! notional plus their fee from reserved quote, the seller nets notional
//! minus their fee, and both fees accrue to the fee sink account. Base
//! retention is the configurable alternative. All legs of a match go through
//! [`crate::ledger::Ledger::post_many`], so either the whole match settles
//! or nothing does.

use crate::error::EngineError;
use crate::ledger::{Ledger, Posting};
use crate::pair::TradingPair;
use crate::types::{Currency, Order, OrderId, Side, TradeId, UserId};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Currency in which fees are retained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeCurrency {
    Quote,
    Base,
}

/// Trade status, mirrored from the persisted data model. Trades are only
/// recorded for matches that settled, so live records are always completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Completed,
    Failed,
}

/// Immutable record of one match. Created here, never mutated afterward.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub pair_symbol: String,
    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,
    pub maker_user_id: UserId,
    pub taker_user_id: UserId,
    pub quantity: Decimal,
    /// Execution price: always the maker's resting price.
    pub price: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub fee_currency: Currency,
    pub status: TradeStatus,
    pub timestamp: u64,
}

/// One settled match: the trade plus how much of each party's reservation
/// the postings consumed (the lifecycle manager keeps per-order accounting
/// in sync with the ledger using these).
#[derive(Clone, Debug)]
pub struct SettledMatch {
    pub trade: Trade,
    pub maker_reserved_debit: Decimal,
    pub taker_reserved_debit: Decimal,
}

/// Settlement engine. Cheap to clone; the trade-id counter is shared so
/// trade ids stay unique across all pair engines.
#[derive(Clone)]
pub struct Settlement {
    fee_sink: UserId,
    fee_currency: FeeCurrency,
    next_trade_id: Arc<AtomicU64>,
}

impl Settlement {
    pub fn new(fee_sink: UserId, fee_currency: FeeCurrency) -> Self {
        Settlement {
            fee_sink,
            fee_currency,
            next_trade_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn fee_currency(&self) -> FeeCurrency {
        self.fee_currency
    }

    pub fn fee_sink(&self) -> UserId {
        self.fee_sink
    }

    /// Next trade id the counter will hand out; used by snapshots.
    pub fn peek_next_trade_id(&self) -> u64 {
        self.next_trade_id.load(Ordering::SeqCst)
    }

    /// Fast-forwards the counter after a snapshot restore.
    pub fn restore_next_trade_id(&self, next: u64) {
        self.next_trade_id.store(next, Ordering::SeqCst);
    }

    /// Settles one match between `taker` and the resting `maker` at the
    /// maker's `price` for `quantity` units.
    ///
    /// Ledger failure here means a reservation invariant was violated
    /// upstream; it surfaces as `SettlementFailure` and nothing is applied.
    pub fn settle(
        &self,
        ledger: &Ledger,
        pair: &TradingPair,
        maker: &Order,
        taker: &Order,
        quantity: Decimal,
        price: Decimal,
        now: u64,
    ) -> Result<SettledMatch, EngineError> {
        let notional = quantity * price;
        let (buyer, seller) = match taker.side {
            Side::Buy => (taker, maker),
            Side::Sell => (maker, taker),
        };
        let buyer_rate = self.role_rate(pair, buyer, taker);
        let seller_rate = self.role_rate(pair, seller, taker);

        let (postings, buyer_fee, seller_fee, buyer_reserved_debit, seller_reserved_debit) =
            match self.fee_currency {
                FeeCurrency::Quote => {
                    let buyer_fee = notional * buyer_rate;
                    let seller_fee = notional * seller_rate;
                    let postings = vec![
                        // Base leg: seller's reserved base moves to the buyer.
                        Posting {
                            debit: seller.user_id,
                            credit: buyer.user_id,
                            currency: pair.base.clone(),
                            amount: quantity,
                            from_reserved: true,
                        },
                        // Quote leg: buyer's reserved quote pays the seller.
                        Posting {
                            debit: buyer.user_id,
                            credit: seller.user_id,
                            currency: pair.quote.clone(),
                            amount: notional,
                            from_reserved: true,
                        },
                        // Buyer fee on top of notional, also from reserved.
                        Posting {
                            debit: buyer.user_id,
                            credit: self.fee_sink,
                            currency: pair.quote.clone(),
                            amount: buyer_fee,
                            from_reserved: true,
                        },
                        // Seller fee out of the proceeds just credited.
                        Posting {
                            debit: seller.user_id,
                            credit: self.fee_sink,
                            currency: pair.quote.clone(),
                            amount: seller_fee,
                            from_reserved: false,
                        },
                    ];
                    (
                        postings,
                        buyer_fee,
                        seller_fee,
                        notional + buyer_fee,
                        quantity,
                    )
                }
                FeeCurrency::Base => {
                    let buyer_fee = quantity * buyer_rate;
                    let seller_fee = quantity * seller_rate;
                    let postings = vec![
                        Posting {
                            debit: seller.user_id,
                            credit: buyer.user_id,
                            currency: pair.base.clone(),
                            amount: quantity,
                            from_reserved: true,
                        },
                        // Seller fee on top of the traded base, from reserved.
                        Posting {
                            debit: seller.user_id,
                            credit: self.fee_sink,
                            currency: pair.base.clone(),
                            amount: seller_fee,
                            from_reserved: true,
                        },
                        // Buyer fee out of the base just received.
                        Posting {
                            debit: buyer.user_id,
                            credit: self.fee_sink,
                            currency: pair.base.clone(),
                            amount: buyer_fee,
                            from_reserved: false,
                        },
                        Posting {
                            debit: buyer.user_id,
                            credit: seller.user_id,
                            currency: pair.quote.clone(),
                            amount: notional,
                            from_reserved: true,
                        },
                    ];
                    (
                        postings,
                        buyer_fee,
                        seller_fee,
                        notional,
                        quantity + seller_fee,
                    )
                }
            };

        ledger
            .post_many(&postings)
            .map_err(|e| EngineError::SettlementFailure {
                pair: pair.symbol.clone(),
                detail: e.to_string(),
            })?;

        let (maker_fee, taker_fee, maker_reserved_debit, taker_reserved_debit) = match taker.side {
            Side::Buy => (seller_fee, buyer_fee, seller_reserved_debit, buyer_reserved_debit),
            Side::Sell => (buyer_fee, seller_fee, buyer_reserved_debit, seller_reserved_debit),
        };

        let trade = Trade {
            trade_id: TradeId(self.next_trade_id.fetch_add(1, Ordering::SeqCst)),
            pair_symbol: pair.symbol.clone(),
            maker_order_id: maker.order_id,
            taker_order_id: taker.order_id,
            maker_user_id: maker.user_id,
            taker_user_id: taker.user_id,
            quantity,
            price,
            maker_fee,
            taker_fee,
            fee_currency: match self.fee_currency {
                FeeCurrency::Quote => pair.quote.clone(),
                FeeCurrency::Base => pair.base.clone(),
            },
            status: TradeStatus::Completed,
            timestamp: now,
        };
        Ok(SettledMatch {
            trade,
            maker_reserved_debit,
            taker_reserved_debit,
        })
    }

    /// Fee rate for a party: taker rate for the aggressor, maker rate for
    /// the resting side.
    fn role_rate(&self, pair: &TradingPair, party: &Order, taker: &Order) -> Decimal {
        if party.order_id == taker.order_id {
            pair.taker_fee_rate
        } else {
            pair.maker_fee_rate
        }
    }
}
