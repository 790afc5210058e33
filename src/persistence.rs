//! Persistence: JSON snapshot of exchange state plus an append-only trade log.
//!
//! The snapshot restores pairs, orders, ledger rows, counters, and per-pair
//! flags after a restart; books and trigger indexes are rebuilt from the open
//! orders. Trade records are write-once: the log only ever appends, which
//! preserves auditability. Log writes happen after the in-memory state
//! transition, never under a ledger or book lock; recovery replays the
//! snapshot and treats the trade log as the authoritative trade history.

use crate::ledger::LedgerEntry;
use crate::pair::TradingPair;
use crate::settlement::Trade;
use crate::types::Order;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Mutex;

/// Per-pair runtime state that is not derivable from orders.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct PairState {
    pub last_trade_price: Option<Decimal>,
    pub halted: bool,
}

/// Full persisted state of an exchange.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ExchangeSnapshot {
    pub pairs: Vec<TradingPair>,
    pub orders: Vec<Order>,
    pub ledger: Vec<LedgerEntry>,
    pub pair_state: HashMap<String, PairState>,
    pub next_order_id: u64,
    pub next_trade_id: u64,
}

/// File-based snapshot persistence: one JSON file, overwritten on save.
#[derive(Clone, Debug)]
pub struct FilePersistence {
    path: std::path::PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FilePersistence {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Saves a snapshot, replacing any previous one.
    pub fn save(&self, snapshot: &ExchangeSnapshot) -> Result<(), String> {
        let json = serde_json::to_string_pretty(snapshot).map_err(|e| e.to_string())?;
        std::fs::write(&self.path, json).map_err(|e| e.to_string())
    }

    /// Loads the snapshot. Returns `None` when no file exists yet.
    pub fn load(&self) -> Result<Option<ExchangeSnapshot>, String> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };
        let snapshot: ExchangeSnapshot = serde_json::from_str(&data).map_err(|e| e.to_string())?;
        Ok(Some(snapshot))
    }
}

/// Append-only trade log: one JSON line per trade, inserts only.
#[derive(Debug)]
pub struct TradeLog {
    file: Mutex<std::fs::File>,
}

impl TradeLog {
    /// Opens (or creates) the log for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, String> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .map_err(|e| e.to_string())?;
        Ok(TradeLog {
            file: Mutex::new(file),
        })
    }

    /// Appends one trade record. Never rewrites existing lines.
    pub fn append(&self, trade: &Trade) -> Result<(), String> {
        let line = serde_json::to_string(trade).map_err(|e| e.to_string())?;
        let mut file = self.file.lock().expect("lock");
        writeln!(file, "{line}").map_err(|e| e.to_string())
    }

    /// Reads a log back, skipping blank lines. For recovery and tests.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<Trade>, String> {
        let file = match std::fs::File::open(path.as_ref()) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.to_string()),
        };
        let reader = std::io::BufReader::new(file);
        let mut trades = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| e.to_string())?;
            if line.trim().is_empty() {
                continue;
            }
            trades.push(serde_json::from_str(&line).map_err(|e| e.to_string())?);
        }
        Ok(trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::TradeStatus;
    use crate::types::{Currency, OrderId, TradeId, UserId};

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("exchange_core_{}_{}", std::process::id(), name));
        p
    }

    fn trade(id: u64) -> Trade {
        Trade {
            trade_id: TradeId(id),
            pair_symbol: "BTC-USD".into(),
            maker_order_id: OrderId(1),
            taker_order_id: OrderId(2),
            maker_user_id: UserId(1),
            taker_user_id: UserId(2),
            quantity: Decimal::ONE,
            price: Decimal::from(100),
            maker_fee: Decimal::new(1, 1),
            taker_fee: Decimal::new(2, 1),
            fee_currency: Currency::new("USD"),
            status: TradeStatus::Completed,
            timestamp: id,
        }
    }

    #[test]
    fn snapshot_round_trip() {
        let path = temp_path("snapshot.json");
        let persistence = FilePersistence::new(&path);
        let snapshot = ExchangeSnapshot {
            pairs: vec![TradingPair::new(
                "BTC-USD",
                Currency::new("BTC"),
                Currency::new("USD"),
                Decimal::new(1, 4),
                Decimal::from(1000),
                Decimal::new(1, 3),
                Decimal::new(2, 3),
            )],
            orders: Vec::new(),
            ledger: vec![LedgerEntry {
                user_id: UserId(1),
                currency: Currency::new("USD"),
                total: Decimal::from(100),
                reserved: Decimal::from(25),
            }],
            pair_state: HashMap::from([(
                "BTC-USD".to_string(),
                PairState {
                    last_trade_price: Some(Decimal::from(100)),
                    halted: false,
                },
            )]),
            next_order_id: 7,
            next_trade_id: 3,
        };
        persistence.save(&snapshot).unwrap();
        let loaded = persistence.load().unwrap().expect("snapshot exists");
        assert_eq!(loaded.next_order_id, 7);
        assert_eq!(loaded.ledger[0].reserved, Decimal::from(25));
        assert_eq!(
            loaded.pair_state["BTC-USD"].last_trade_price,
            Some(Decimal::from(100))
        );
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn load_missing_snapshot_returns_none() {
        let persistence = FilePersistence::new(temp_path("missing.json"));
        assert!(persistence.load().unwrap().is_none());
    }

    #[test]
    fn trade_log_appends_and_reads_back() {
        let path = temp_path("trades.jsonl");
        std::fs::remove_file(&path).ok();
        {
            let log = TradeLog::open(&path).unwrap();
            log.append(&trade(1)).unwrap();
            log.append(&trade(2)).unwrap();
        }
        // Reopening appends after existing records instead of truncating.
        {
            let log = TradeLog::open(&path).unwrap();
            log.append(&trade(3)).unwrap();
        }
        let trades = TradeLog::read_all(&path).unwrap();
        assert_eq!(trades.len(), 3);
        assert_eq!(trades[0].trade_id, TradeId(1));
        assert_eq!(trades[2].trade_id, TradeId(3));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn read_all_missing_log_is_empty() {
        let trades = TradeLog::read_all(temp_path("absent.jsonl")).unwrap();
        assert!(trades.is_empty());
    }
}
