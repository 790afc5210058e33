//! REST API integration tests. Spawn the server and call endpoints with reqwest.

use exchange_core::{api, Currency, EnginePolicy, Exchange, InMemoryAuditSink, TradingPair, UserId};
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::sync::Arc;

fn test_exchange() -> Arc<Exchange> {
    let mut ex = Exchange::new(EnginePolicy::default())
        .with_audit(Arc::new(InMemoryAuditSink::new()));
    ex.add_pair(TradingPair::new(
        "BTC-USD",
        Currency::new("BTC"),
        Currency::new("USD"),
        Decimal::new(1, 4),
        Decimal::from(1000),
        Decimal::new(1, 3),
        Decimal::new(2, 3),
    ))
    .unwrap();
    Arc::new(ex)
}

async fn spawn_app() -> (SocketAddr, Arc<Exchange>, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let exchange = test_exchange();
    let app = api::create_router(exchange.clone());
    let handle = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    (addr, exchange, handle)
}

#[tokio::test]
async fn health_returns_ok() {
    let (addr, _ex, _handle) = spawn_app().await;
    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn deposit_then_submit_and_match_over_http() {
    let (addr, _ex, _handle) = spawn_app().await;
    let client = reqwest::Client::new();

    for (user, currency, amount) in [(1, "BTC", "1"), (2, "USD", "60000")] {
        let response = client
            .post(format!("http://{addr}/deposit"))
            .json(&serde_json::json!({ "user_id": user, "currency": currency, "amount": amount }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let sell = serde_json::json!({
        "user_id": 1,
        "pair_symbol": "BTC-USD",
        "side": "sell",
        "order_type": "limit",
        "quantity": "1",
        "limit_price": "50000"
    });
    let response = client
        .post(format!("http://{addr}/orders"))
        .json(&sell)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let sell_result: serde_json::Value = response.json().await.unwrap();
    assert_eq!(sell_result["status"], "pending");

    let depth: serde_json::Value = client
        .get(format!("http://{addr}/book/BTC-USD?depth=5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(depth["asks"].as_array().unwrap().len(), 1);

    let buy = serde_json::json!({
        "user_id": 2,
        "pair_symbol": "BTC-USD",
        "side": "buy",
        "order_type": "market",
        "quantity": "1"
    });
    let response = client
        .post(format!("http://{addr}/orders"))
        .json(&buy)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let buy_result: serde_json::Value = response.json().await.unwrap();
    assert_eq!(buy_result["status"], "filled");
    assert_eq!(buy_result["trades"].as_array().unwrap().len(), 1);

    // Balance endpoint reflects the settlement: 60_000 - 50_000 * 1.002.
    let balance: serde_json::Value = client
        .get(format!("http://{addr}/balance/2/USD"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let total: Decimal = balance["total"].as_str().unwrap().parse().unwrap();
    let reserved: Decimal = balance["reserved"].as_str().unwrap().parse().unwrap();
    assert_eq!(total, Decimal::from(9_900));
    assert_eq!(reserved, Decimal::ZERO);
}

#[tokio::test]
async fn order_status_roundtrip_and_not_found() {
    let (addr, ex, _handle) = spawn_app().await;
    ex.deposit(UserId(1), &Currency::new("BTC"), Decimal::from(2)).unwrap();
    let client = reqwest::Client::new();

    let sell = serde_json::json!({
        "user_id": 1,
        "pair_symbol": "BTC-USD",
        "side": "sell",
        "order_type": "limit",
        "quantity": "2",
        "limit_price": "101"
    });
    let submitted: serde_json::Value = client
        .post(format!("http://{addr}/orders"))
        .json(&sell)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let order_id = submitted["order_id"].as_u64().unwrap();

    let view: serde_json::Value = client
        .get(format!("http://{addr}/orders/{order_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view["status"], "pending");
    assert_eq!(view["remaining_quantity"], "2");

    let response = client
        .get(format!("http://{addr}/orders/99999"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn cancel_enforces_ownership_and_terminality() {
    let (addr, ex, _handle) = spawn_app().await;
    ex.deposit(UserId(1), &Currency::new("BTC"), Decimal::from(1)).unwrap();
    let client = reqwest::Client::new();

    let sell = serde_json::json!({
        "user_id": 1,
        "pair_symbol": "BTC-USD",
        "side": "sell",
        "order_type": "limit",
        "quantity": "1",
        "limit_price": "100"
    });
    let submitted: serde_json::Value = client
        .post(format!("http://{addr}/orders"))
        .json(&sell)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let order_id = submitted["order_id"].as_u64().unwrap();

    // Wrong owner: 403.
    let response = client
        .post(format!("http://{addr}/orders/cancel"))
        .json(&serde_json::json!({ "order_id": order_id, "user_id": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    // Owner: ok.
    let response = client
        .post(format!("http://{addr}/orders/cancel"))
        .json(&serde_json::json!({ "order_id": order_id, "user_id": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Again: 409 already terminal.
    let response = client
        .post(format!("http://{addr}/orders/cancel"))
        .json(&serde_json::json!({ "order_id": order_id, "user_id": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "already_terminal");
}

#[tokio::test]
async fn submit_validation_maps_to_http_statuses() {
    let (addr, ex, _handle) = spawn_app().await;
    let client = reqwest::Client::new();

    // Limit without price: 400.
    let response = client
        .post(format!("http://{addr}/orders"))
        .json(&serde_json::json!({
            "user_id": 1,
            "pair_symbol": "BTC-USD",
            "side": "buy",
            "order_type": "limit",
            "quantity": "1"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Unknown pair: 400.
    let response = client
        .post(format!("http://{addr}/orders"))
        .json(&serde_json::json!({
            "user_id": 1,
            "pair_symbol": "DOGE-USD",
            "side": "buy",
            "order_type": "limit",
            "quantity": "1",
            "limit_price": "100"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "invalid_pair");

    // No funds: 422 business rejection.
    let response = client
        .post(format!("http://{addr}/orders"))
        .json(&serde_json::json!({
            "user_id": 1,
            "pair_symbol": "BTC-USD",
            "side": "buy",
            "order_type": "limit",
            "quantity": "1",
            "limit_price": "100"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "insufficient_balance");

    // Market buy with funds but an empty book: 422 no liquidity.
    ex.deposit(UserId(1), &Currency::new("USD"), Decimal::from(1000)).unwrap();
    let response = client
        .post(format!("http://{addr}/orders"))
        .json(&serde_json::json!({
            "user_id": 1,
            "pair_symbol": "BTC-USD",
            "side": "buy",
            "order_type": "market",
            "quantity": "1"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "no_liquidity");
}
