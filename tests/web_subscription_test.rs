//! Subscription catalogue, checkout, webhooks and cancellation.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use quantdesk::adapters::stripe_adapter::sign_payload;
use quantdesk::domain::subscription::Tier;
use quantdesk::ports::store_port::AccountStore;
use serde_json::{Value, json};

use common::*;

fn webhook_request(payload: &Value, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/subscriptions/webhook")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(signature) = signature {
        builder = builder.header("Stripe-Signature", signature);
    }
    builder.body(Body::from(payload.to_string())).unwrap()
}

fn signature_header(body: &[u8], secret: &str, timestamp: i64) -> String {
    let signature = sign_payload(body, secret, timestamp).unwrap();
    format!("t={timestamp},v1={signature}")
}

fn signed(payload: &Value) -> String {
    signature_header(
        payload.to_string().as_bytes(),
        WEBHOOK_SECRET,
        Utc::now().timestamp(),
    )
}

#[tokio::test]
async fn tiers_are_listed_in_order() {
    let app = create_app();
    let response = send(
        &app.router,
        json_request("GET", "/api/subscriptions/tiers", None, None),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);

    let catalogue = response.body.as_object().unwrap();
    let keys: Vec<&str> = catalogue.keys().map(String::as_str).collect();
    assert_eq!(keys.len(), 4);
    assert_eq!(catalogue["free"]["max_strategies"], 1);
    assert_eq!(catalogue["basic"]["price"], 29.99);
    assert_eq!(catalogue["enterprise"]["max_strategies"], -1);
    assert_eq!(catalogue["enterprise"]["max_backtests_per_day"], -1);
    assert_eq!(catalogue["professional"]["live_trading"], true);
}

#[tokio::test]
async fn current_subscription_defaults_to_free() {
    let app = create_app();
    let cookie = register(&app.router, "alice").await;

    let response = send(
        &app.router,
        json_request("GET", "/api/subscriptions/current", None, Some(&cookie)),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["tier"], "free");
    assert_eq!(response.body["tier_config"]["name"], "Free");
    assert!(response.body["stripe_subscription_id"].is_null());
}

#[tokio::test]
async fn checkout_creates_the_customer_once() {
    let app = create_app();
    let cookie = register(&app.router, "bob").await;

    for _ in 0..2 {
        let response = send(
            &app.router,
            json_request(
                "POST",
                "/api/subscriptions/checkout",
                Some(json!({ "tier": "basic" })),
                Some(&cookie),
            ),
        )
        .await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.body);
        assert_eq!(
            response.body["checkout_url"],
            "https://checkout.stripe.test/pay/cs_test_1"
        );
        assert_eq!(response.body["session_id"], "cs_test_1");
    }

    let calls = app.payments.calls();
    let customers = calls.iter().filter(|c| c.starts_with("create_customer")).count();
    assert_eq!(customers, 1);

    let user = app.store.find_user_by_username("bob").unwrap().unwrap();
    let customer = user.stripe_customer_id.unwrap();
    assert_eq!(calls.last().unwrap(), &format!("checkout:{customer}:basic"));

    let checkouts = app.payments.checkouts.lock().unwrap();
    assert_eq!(
        checkouts[0].success_url,
        "http://localhost:3000/subscription/success?session_id={CHECKOUT_SESSION_ID}"
    );
    assert_eq!(checkouts[0].cancel_url, "http://localhost:3000/subscription/cancel");
    assert_eq!(checkouts[0].user_id, user.id);
}

#[tokio::test]
async fn checkout_rejects_free_and_unknown_tiers() {
    let app = create_app();
    let cookie = register(&app.router, "carol").await;

    for body in [json!({ "tier": "free" }), json!({ "tier": "platinum" }), json!({})] {
        let response = send(
            &app.router,
            json_request("POST", "/api/subscriptions/checkout", Some(body), Some(&cookie)),
        )
        .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["error"], "Invalid subscription tier");
    }
    assert!(app.payments.calls().is_empty());
}

#[tokio::test]
async fn checkout_failure_hides_processor_detail() {
    let app = create_app();
    let cookie = register(&app.router, "dave").await;
    app.payments.set_failing(true);

    let response = send(
        &app.router,
        json_request(
            "POST",
            "/api/subscriptions/checkout",
            Some(json!({ "tier": "professional" })),
            Some(&cookie),
        ),
    )
    .await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    let message = response.body["error"].as_str().unwrap();
    assert!(!message.contains("card_declined"));
}

#[tokio::test]
async fn completed_checkout_webhook_activates_the_tier() {
    let app = create_app();
    let cookie = register(&app.router, "erin").await;
    let user = app.store.find_user_by_username("erin").unwrap().unwrap();

    let payload = json!({
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_test_1",
            "subscription": "sub_erin",
            "metadata": { "user_id": user.id.to_string(), "tier": "professional" },
        }},
    });
    let response = send(&app.router, webhook_request(&payload, Some(signed(&payload)))).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "success");

    let current = send(
        &app.router,
        json_request("GET", "/api/subscriptions/current", None, Some(&cookie)),
    )
    .await;
    assert_eq!(current.body["tier"], "professional");
    assert_eq!(current.body["stripe_subscription_id"], "sub_erin");
    assert!(current.body["start_date"].is_string());
    assert!(current.body["end_date"].is_string());
}

#[tokio::test]
async fn deleted_subscription_webhook_downgrades() {
    let app = create_app();
    register(&app.router, "frank").await;
    let mut user = app.store.find_user_by_username("frank").unwrap().unwrap();
    user.subscription
        .activate(Tier::Basic, Some("sub_frank".into()), Utc::now().naive_utc());
    app.store.update_subscription(user.id, &user.subscription).unwrap();

    let payload = json!({
        "type": "customer.subscription.deleted",
        "data": { "object": { "id": "sub_frank" } },
    });
    let response = send(&app.router, webhook_request(&payload, Some(signed(&payload)))).await;
    assert_eq!(response.status, StatusCode::OK);

    let user = app.store.find_user(user.id).unwrap().unwrap();
    assert_eq!(user.subscription.tier, Tier::Free);
    assert_eq!(user.subscription.stripe_subscription_id, None);
}

#[tokio::test]
async fn webhook_rejects_bad_signatures() {
    let app = create_app();
    let payload = json!({ "type": "checkout.session.completed", "data": { "object": {} } });

    let unsigned = send(&app.router, webhook_request(&payload, None)).await;
    assert_eq!(unsigned.status, StatusCode::BAD_REQUEST);
    assert_eq!(unsigned.body["error"], "Invalid signature");

    let forged = signature_header(
        payload.to_string().as_bytes(),
        "whsec_wrong",
        Utc::now().timestamp(),
    );
    let response = send(&app.router, webhook_request(&payload, Some(forged))).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "Invalid signature");

    let stale = signature_header(
        payload.to_string().as_bytes(),
        WEBHOOK_SECRET,
        Utc::now().timestamp() - 3600,
    );
    let response = send(&app.router, webhook_request(&payload, Some(stale))).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_rejects_signed_garbage() {
    let app = create_app();
    let body = "not json at all";
    let signature = signature_header(body.as_bytes(), WEBHOOK_SECRET, Utc::now().timestamp());
    let request = Request::builder()
        .method("POST")
        .uri("/api/subscriptions/webhook")
        .header("Stripe-Signature", signature)
        .body(Body::from(body))
        .unwrap();

    let response = send(&app.router, request).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "Invalid payload");
}

#[tokio::test]
async fn unhandled_events_are_acknowledged() {
    let app = create_app();
    let payload = json!({ "type": "invoice.paid", "data": { "object": {} } });
    let response = send(&app.router, webhook_request(&payload, Some(signed(&payload)))).await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn cancel_without_subscription_is_not_found() {
    let app = create_app();
    let cookie = register(&app.router, "gina").await;

    let response = send(
        &app.router,
        json_request("POST", "/api/subscriptions/cancel", None, Some(&cookie)),
    )
    .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body["error"], "No active subscription found");
}

#[tokio::test]
async fn cancel_downgrades_after_the_processor_confirms() {
    let app = create_app();
    let cookie = register(&app.router, "henry").await;
    let mut user = app.store.find_user_by_username("henry").unwrap().unwrap();
    user.subscription
        .activate(Tier::Basic, Some("sub_henry".into()), Utc::now().naive_utc());
    app.store.update_subscription(user.id, &user.subscription).unwrap();

    let response = send(
        &app.router,
        json_request("POST", "/api/subscriptions/cancel", None, Some(&cookie)),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    assert_eq!(response.body["message"], "Subscription cancelled successfully");
    assert_eq!(app.payments.calls(), vec!["cancel:sub_henry".to_string()]);

    let user = app.store.find_user(user.id).unwrap().unwrap();
    assert_eq!(user.subscription.tier, Tier::Free);
}

#[tokio::test]
async fn cancel_failure_keeps_the_subscription() {
    let app = create_app();
    let cookie = register(&app.router, "iris").await;
    let mut user = app.store.find_user_by_username("iris").unwrap().unwrap();
    user.subscription
        .activate(Tier::Basic, Some("sub_iris".into()), Utc::now().naive_utc());
    app.store.update_subscription(user.id, &user.subscription).unwrap();
    app.payments.set_failing(true);

    let response = send(
        &app.router,
        json_request("POST", "/api/subscriptions/cancel", None, Some(&cookie)),
    )
    .await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);

    let user = app.store.find_user(user.id).unwrap().unwrap();
    assert_eq!(user.subscription.tier, Tier::Basic);
}
