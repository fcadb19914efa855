#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{NaiveDate, NaiveDateTime};
use http_body_util::BodyExt;
use quantdesk::adapters::sqlite_store::SqliteStore;
use quantdesk::adapters::web::{AppState, WebSettings, build_router_in_memory};
use quantdesk::domain::backtest::BacktestConfig;
use quantdesk::domain::error::QuantdeskError;
use quantdesk::domain::price::PriceBar;
use quantdesk::ports::config_port::ConfigPort;
use quantdesk::ports::data_port::DataPort;
use quantdesk::ports::payment_port::{CheckoutRequest, CheckoutSession, PaymentPort};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const TEST_PASSWORD: &str = "correct-horse";

pub struct MockDataPort {
    pub data: HashMap<String, Vec<PriceBar>>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<PriceBar>, QuantdeskError> {
        Ok(self
            .data
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.time >= start && b.time <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_symbols(&self) -> Result<Vec<String>, QuantdeskError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

/// Records every processor call; `fail` makes all of them error.
#[derive(Default)]
pub struct MockPayments {
    pub calls: Mutex<Vec<String>>,
    pub checkouts: Mutex<Vec<CheckoutRequest>>,
    pub fail: AtomicBool,
}

impl MockPayments {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: String) -> Result<(), QuantdeskError> {
        self.calls.lock().unwrap().push(call);
        if self.fail.load(Ordering::SeqCst) {
            return Err(QuantdeskError::Payment {
                reason: "card_declined: test failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentPort for MockPayments {
    async fn create_customer(&self, email: &str, user_id: i64) -> Result<String, QuantdeskError> {
        self.record(format!("create_customer:{email}"))?;
        Ok(format!("cus_{user_id}"))
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, QuantdeskError> {
        self.record(format!("checkout:{}:{}", request.customer_id, request.tier))?;
        self.checkouts.lock().unwrap().push(request.clone());
        Ok(CheckoutSession {
            id: "cs_test_1".into(),
            url: "https://checkout.stripe.test/pay/cs_test_1".into(),
        })
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), QuantdeskError> {
        self.record(format!("cancel:{subscription_id}"))
    }
}

pub struct MapConfig(pub HashMap<(String, String), String>);

impl MapConfig {
    pub fn new(entries: &[(&str, &str, &str)]) -> Self {
        Self(
            entries
                .iter()
                .map(|(s, k, v)| ((s.to_string(), k.to_string()), v.to_string()))
                .collect(),
        )
    }
}

impl ConfigPort for MapConfig {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.0.get(&(section.to_string(), key.to_string())).cloned()
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.get_string(section, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.get_string(section, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.get_string(section, key)
            .map(|v| v == "true")
            .unwrap_or(default)
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Daily bars oscillating around a slow uptrend, so both strategies trade.
pub fn generate_bars(symbol: &str, start: NaiveDateTime, count: usize) -> Vec<PriceBar> {
    (0..count)
        .map(|i| {
            let close = 100.0 + 0.05 * i as f64 + 8.0 * (i as f64 / 6.0).sin();
            PriceBar {
                symbol: symbol.to_string(),
                time: start + chrono::Duration::days(i as i64),
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000,
            }
        })
        .collect()
}

pub fn test_settings() -> WebSettings {
    WebSettings {
        frontend_url: "http://localhost:3000".into(),
        cors_origins: vec!["http://localhost:3000".into()],
        webhook_secret: Some(WEBHOOK_SECRET.into()),
        backtest: BacktestConfig::default(),
        session_key: vec![7u8; 64],
        session_lifetime: 3600,
        secure_cookies: false,
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<SqliteStore>,
    pub payments: Arc<MockPayments>,
}

pub fn create_app() -> TestApp {
    let data = MockDataPort::new().with_bars("EURUSD", generate_bars("EURUSD", date(2020, 1, 1), 400));
    create_app_with(data)
}

pub fn create_app_with(data: MockDataPort) -> TestApp {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    store.initialize_schema().unwrap();
    let payments = Arc::new(MockPayments::default());
    let state = AppState {
        store: store.clone(),
        data: Arc::new(data),
        payments: payments.clone(),
        settings: test_settings(),
    };
    TestApp {
        router: build_router_in_memory(state),
        store,
        payments,
    }
}

pub fn extract_cookies(response: &axum::http::Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .collect()
}

pub fn build_cookie_header(set_cookies: &[String]) -> String {
    set_cookies
        .iter()
        .map(|sc| sc.split(';').next().unwrap_or("").to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn json_request(method: &str, uri: &str, body: Option<Value>, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub cookies: Vec<String>,
}

pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let cookies = extract_cookies(&response);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    TestResponse {
        status,
        body,
        cookies,
    }
}

/// Registers `username` and returns the session cookie header.
pub async fn register(app: &Router, username: &str) -> String {
    let response = send(
        app,
        json_request(
            "POST",
            "/api/auth/register",
            Some(serde_json::json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": TEST_PASSWORD,
            })),
            None,
        ),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    build_cookie_header(&response.cookies)
}

/// Creates an SMA strategy and returns its id.
pub async fn create_sma_strategy(app: &Router, cookie: &str, name: &str) -> i64 {
    let response = send(
        app,
        json_request(
            "POST",
            "/api/strategies",
            Some(serde_json::json!({
                "name": name,
                "type": "SMA",
                "parameters": { "SMA_S": 5, "SMA_L": 20 },
            })),
            Some(cookie),
        ),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    response.body["strategy"]["id"].as_i64().unwrap()
}
