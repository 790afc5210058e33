//! HTTP server for the exchange core.
//!
//! Env: `PORT` (default 8080), `SNAPSHOT_FILE` (load on start, save on
//! ctrl-c), `TRADE_LOG` (append-only trade records), `RUST_LOG`.

use exchange_core::api;
use exchange_core::{
    Currency, EnginePolicy, Exchange, ExchangeSnapshot, FilePersistence, TradeLog, TradingPair,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::net::TcpListener;

fn default_pairs() -> Vec<TradingPair> {
    vec![
        TradingPair::new(
            "BTC-USD",
            Currency::new("BTC"),
            Currency::new("USD"),
            Decimal::new(1, 4),
            Decimal::from(1000),
            Decimal::new(1, 3),
            Decimal::new(2, 3),
        ),
        TradingPair::new(
            "ETH-USD",
            Currency::new("ETH"),
            Currency::new("USD"),
            Decimal::new(1, 3),
            Decimal::from(10_000),
            Decimal::new(1, 3),
            Decimal::new(2, 3),
        ),
    ]
}

fn build_exchange(
    persistence: Option<&FilePersistence>,
    trade_log: Option<Arc<TradeLog>>,
) -> Exchange {
    if let Some(p) = persistence {
        match p.load() {
            Ok(Some(snapshot)) => {
                eprintln!("restoring exchange from snapshot");
                match Exchange::restore(
                    snapshot,
                    EnginePolicy::default(),
                    Arc::new(exchange_core::audit::StdoutAuditSink),
                    trade_log.clone(),
                ) {
                    Ok(exchange) => return exchange,
                    Err(e) => eprintln!("snapshot restore failed, starting fresh: {e}"),
                }
            }
            Ok(None) => {}
            Err(e) => eprintln!("snapshot load failed, starting fresh: {e}"),
        }
    }
    let mut exchange = Exchange::new(EnginePolicy::default());
    if let Some(log) = trade_log {
        exchange = exchange.with_trade_log(log);
    }
    for pair in default_pairs() {
        // Symbols are distinct; registration cannot fail here.
        if let Err(e) = exchange.add_pair(pair) {
            eprintln!("pair registration failed: {e}");
        }
    }
    exchange
}

#[tokio::main]
async fn main() {
    let _ = env_logger::try_init();
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let persistence = std::env::var("SNAPSHOT_FILE").ok().map(FilePersistence::new);
    let trade_log = std::env::var("TRADE_LOG")
        .ok()
        .and_then(|path| match TradeLog::open(&path) {
            Ok(log) => Some(Arc::new(log)),
            Err(e) => {
                eprintln!("trade log open failed: {e}");
                None
            }
        });

    let exchange = Arc::new(build_exchange(persistence.as_ref(), trade_log));
    let app = api::create_router(exchange.clone());

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await.expect("bind");
    eprintln!("listening on http://{addr}");

    let server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .expect("serve");
    });

    tokio::signal::ctrl_c().await.expect("ctrl_c");
    if let Some(p) = &persistence {
        let snapshot: ExchangeSnapshot = exchange.snapshot();
        match p.save(&snapshot) {
            Ok(()) => eprintln!("snapshot saved"),
            Err(e) => eprintln!("snapshot save failed: {e}"),
        }
    }
    server.abort();
}
