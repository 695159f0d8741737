use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use kraken_relay::core::config::Credential;
use kraken_relay::core::errors::ExchangeError;
use kraken_relay::core::traits::{AccountInfo, MarketDataSource, OrderPlacer};
use kraken_relay::core::types::OrderSide;
use kraken_relay::exchanges::kraken::{build_connector, build_rest_client, KrakenRest};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

const PRIVATE_KEY: &str =
    "kQH5HW/8p1uGOVjbgWA7FunAmGO8lsSUXNsu3eow76sz84Q18fWxnyRzBHCd3pd5nE9qa99HAZtuZuj6F1huXg==";

/// Stand-in for the Kraken REST API
#[derive(Clone, Default)]
struct MockKraken {
    order_failures: Arc<AtomicUsize>,
    order_calls: Arc<AtomicUsize>,
}

async fn ohlc(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    if query.get("pair").map(String::as_str) != Some("XBTUSD") {
        return Json(json!({"error": ["EQuery:Unknown asset pair"]}));
    }
    Json(json!({
        "error": [],
        "result": {
            "XXBTZUSD": [
                [1688671200, "30306.1", "30306.2", "30305.7", "30305.7", "30306.1", "3.39243896", 23],
                [1688671260, "30305.8", "30310.0", "30305.8", "30310.0", "30308.7", "1.1", 5]
            ],
            "last": 1688671260
        }
    }))
}

async fn ticker() -> Json<Value> {
    Json(json!({
        "error": [],
        "result": {
            "XXBTZUSD": {
                "a": ["30306.20000", "1", "1.000"],
                "b": ["30306.10000", "2", "2.000"],
                "c": ["30306.15000", "0.01000000"]
            }
        }
    }))
}

async fn server_time() -> Json<Value> {
    Json(json!({
        "error": [],
        "result": {"unixtime": 1688671200, "rfc1123": "Thu,  6 Jul 23 19:20:00 +0000"}
    }))
}

fn signed(headers: &HeaderMap) -> bool {
    headers.get("API-Key").is_some_and(|v| v == "test-key") && headers.contains_key("API-Sign")
}

async fn balance(headers: HeaderMap) -> Json<Value> {
    if !signed(&headers) {
        return Json(json!({"error": ["EAPI:Invalid key"]}));
    }
    Json(json!({"error": [], "result": {"XXBT": "1.5000000000", "ZUSD": "250.00"}}))
}

async fn add_order(State(mock): State<MockKraken>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    let call = mock.order_calls.fetch_add(1, Ordering::SeqCst);
    if !signed(&headers) || body["nonce"].as_str().is_none() {
        return Json(json!({"error": ["EAPI:Invalid nonce"]}));
    }
    if call < mock.order_failures.load(Ordering::SeqCst) {
        return Json(json!({"error": ["EService:Unavailable"]}));
    }
    assert_eq!(body["ordertype"], "market");
    assert_eq!(body["volume"], "0.25");
    Json(json!({
        "error": [],
        "result": {
            "descr": {"order": format!("{} 0.25 {} @ market", body["type"].as_str().unwrap_or_default(), body["pair"].as_str().unwrap_or_default())},
            "txid": ["OABCDE-12345-FGHIJK"]
        }
    }))
}

async fn spawn_mock(mock: MockKraken) -> String {
    let app = Router::new()
        .route("/0/public/OHLC", get(ohlc))
        .route("/0/public/Ticker", get(ticker))
        .route("/0/public/Time", get(server_time))
        .route("/0/private/Balance", post(balance))
        .route("/0/private/AddOrder", post(add_order))
        .with_state(mock);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn credential() -> Option<Arc<Credential>> {
    Some(Arc::new(Credential::new(
        "test-key".to_string(),
        PRIVATE_KEY.to_string(),
    )))
}

#[tokio::test]
async fn test_ohlc_through_connector() {
    let base = spawn_mock(MockKraken::default()).await;
    let connector = build_connector(base, None).unwrap();

    let candles = connector.get_ohlc("XBTUSD", 1).await.unwrap();
    assert_eq!(candles.len(), 2);
    assert!((candles[0].time - 1_688_671_200.0).abs() < f64::EPSILON);
    assert!((candles[1].close - 30310.0).abs() < f64::EPSILON);
    assert!((candles[1].trade_count - 5.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_error_list_becomes_exchange_error() {
    let base = spawn_mock(MockKraken::default()).await;
    let connector = build_connector(base, None).unwrap();

    let result = connector.get_ohlc("NOPE", 1).await;
    assert!(
        matches!(&result, Err(ExchangeError::Exchange(errors)) if errors == &["EQuery:Unknown asset pair"]),
        "unexpected result: {:?}",
        result
    );
}

#[tokio::test]
async fn test_balance_is_signed() {
    let base = spawn_mock(MockKraken::default()).await;
    let connector = build_connector(base, credential()).unwrap();

    let balances = connector.get_balance().await.unwrap();
    assert_eq!(balances.get("XXBT").map(String::as_str), Some("1.5000000000"));
    assert_eq!(balances.get("ZUSD").map(String::as_str), Some("250.00"));
}

#[tokio::test]
async fn test_private_call_without_credentials_fails_locally() {
    let mock = MockKraken::default();
    let base = spawn_mock(mock.clone()).await;
    let connector = build_connector(base, None).unwrap();

    let result = connector.get_balance().await;
    assert!(matches!(result, Err(ExchangeError::AuthError(_))));
}

#[tokio::test]
async fn test_place_order_recovers_on_third_attempt() {
    let mock = MockKraken::default();
    mock.order_failures.store(2, Ordering::SeqCst);
    let base = spawn_mock(mock.clone()).await;
    let connector = build_connector(base, credential()).unwrap();

    let confirmation = connector
        .place_order("XBTUSD", Decimal::from_str("0.25").unwrap(), OrderSide::Buy)
        .await
        .unwrap();

    assert_eq!(mock.order_calls.load(Ordering::SeqCst), 3);
    assert_eq!(confirmation.transaction_ids, vec!["OABCDE-12345-FGHIJK"]);
    assert_eq!(confirmation.description, "buy 0.25 XBTUSD @ market");
}

#[tokio::test]
async fn test_place_order_gives_up_after_three_attempts() {
    let mock = MockKraken::default();
    mock.order_failures.store(usize::MAX, Ordering::SeqCst);
    let base = spawn_mock(mock.clone()).await;
    let connector = build_connector(base, credential()).unwrap();

    let result = connector
        .place_order("XBTUSD", Decimal::from_str("0.25").unwrap(), OrderSide::Sell)
        .await;

    assert_eq!(mock.order_calls.load(Ordering::SeqCst), 3);
    assert!(matches!(result, Err(ExchangeError::Exchange(errors)) if errors == ["EService:Unavailable"]));
}

#[tokio::test]
async fn test_ticker_and_server_time() {
    let base = spawn_mock(MockKraken::default()).await;
    let rest = KrakenRest::new(build_rest_client(base, None).unwrap());

    let ticker = rest.get_ticker("XBTUSD").await.unwrap();
    assert!((ticker.ask - 30306.2).abs() < 1e-9);
    assert!((ticker.bid - 30306.1).abs() < 1e-9);
    assert!((ticker.last - 30306.15).abs() < 1e-9);

    let time = rest.get_server_time().await.unwrap();
    assert_eq!(time.unixtime, 1_688_671_200);
}
