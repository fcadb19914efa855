//! Subscription handlers: tier catalogue, hosted checkout, processor webhooks
//! and cancellation.

use axum::{
    Json,
    body::Bytes,
    extract::{State, rejection::JsonRejection},
    http::HeaderMap,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::adapters::stripe_adapter::{WebhookEvent, verify_signature};
use crate::domain::subscription::{CurrentSubscription, Tier, TierCatalog};
use crate::ports::payment_port::CheckoutRequest;

use super::handlers::current_user;
use super::{AppState, AuthSession, WebError};

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

const CHECKOUT_FAILED: &str = "Failed to create checkout session. Please try again later.";
const CANCEL_FAILED: &str = "Failed to cancel subscription. Please contact support.";

pub async fn tiers() -> Json<TierCatalog> {
    Json(TierCatalog)
}

pub async fn current(auth: AuthSession) -> Result<Json<CurrentSubscription>, WebError> {
    let user = current_user(&auth)?;
    Ok(Json(CurrentSubscription::from(&user.subscription)))
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutBody {
    pub tier: Option<String>,
}

pub async fn checkout(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CheckoutBody>, JsonRejection>,
) -> Result<Json<Value>, WebError> {
    let user = current_user(&auth)?;
    let Json(body) = payload?;

    let tier = body
        .tier
        .as_deref()
        .and_then(|t| t.parse::<Tier>().ok())
        .filter(Tier::is_paid)
        .ok_or_else(|| WebError::bad_request("Invalid subscription tier"))?;

    let customer_id = match user.stripe_customer_id.clone() {
        Some(id) => id,
        None => {
            let id = state
                .payments
                .create_customer(&user.email, user.id)
                .await
                .map_err(|e| {
                    tracing::error!(user_id = user.id, error = %e, "failed to create customer");
                    WebError::internal(CHECKOUT_FAILED)
                })?;
            state.store.set_customer_id(user.id, &id)?;
            id
        }
    };

    let frontend = &state.settings.frontend_url;
    let request = CheckoutRequest {
        customer_id,
        user_id: user.id,
        tier,
        success_url: format!("{frontend}/subscription/success?session_id={{CHECKOUT_SESSION_ID}}"),
        cancel_url: format!("{frontend}/subscription/cancel"),
    };

    let session = state
        .payments
        .create_checkout_session(&request)
        .await
        .map_err(|e| {
            tracing::error!(user_id = user.id, error = %e, "failed to create checkout");
            WebError::internal(CHECKOUT_FAILED)
        })?;
    tracing::info!(user_id = user.id, tier = %tier, session_id = %session.id, "checkout created");

    Ok(Json(json!({
        "checkout_url": session.url,
        "session_id": session.id,
    })))
}

pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebError> {
    let Some(secret) = state.settings.webhook_secret.as_deref() else {
        tracing::error!("webhook received but [stripe] webhook_secret is not configured");
        return Err(WebError::internal("Webhook not configured"));
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WebError::bad_request("Invalid signature"))?;

    verify_signature(&body, signature, secret, Utc::now().timestamp()).map_err(|e| {
        tracing::warn!(error = %e, "rejected webhook");
        WebError::bad_request("Invalid signature")
    })?;

    let event: WebhookEvent =
        serde_json::from_slice(&body).map_err(|_| WebError::bad_request("Invalid payload"))?;

    match event.event_type.as_str() {
        "checkout.session.completed" => checkout_completed(&state, &event.data.object)?,
        "customer.subscription.deleted" => subscription_deleted(&state, &event.data.object)?,
        other => tracing::debug!(event_type = other, "ignoring webhook event"),
    }

    Ok(Json(json!({ "status": "success" })))
}

fn checkout_completed(state: &AppState, session: &Value) -> Result<(), WebError> {
    let metadata = &session["metadata"];
    let user_id = match &metadata["user_id"] {
        Value::String(s) => s.parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    };
    let tier = metadata["tier"].as_str().and_then(|t| t.parse::<Tier>().ok());

    let (Some(user_id), Some(tier)) = (user_id, tier) else {
        tracing::warn!(metadata = %metadata, "checkout session without usable metadata");
        return Ok(());
    };
    let Some(mut user) = state.store.find_user(user_id)? else {
        tracing::warn!(user_id, "checkout completed for unknown user");
        return Ok(());
    };

    let subscription_id = session["subscription"].as_str().map(str::to_string);
    user.subscription
        .activate(tier, subscription_id, Utc::now().naive_utc());
    state.store.update_subscription(user.id, &user.subscription)?;
    tracing::info!(user_id, tier = %tier, "subscription activated");
    Ok(())
}

fn subscription_deleted(state: &AppState, subscription: &Value) -> Result<(), WebError> {
    let Some(subscription_id) = subscription["id"].as_str() else {
        return Ok(());
    };
    let Some(mut user) = state.store.find_user_by_subscription(subscription_id)? else {
        tracing::debug!(subscription_id, "no user holds the deleted subscription");
        return Ok(());
    };

    user.subscription.downgrade(Utc::now().naive_utc());
    state.store.update_subscription(user.id, &user.subscription)?;
    tracing::info!(user_id = user.id, "subscription ended by processor");
    Ok(())
}

pub async fn cancel(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, WebError> {
    let mut user = current_user(&auth)?;
    let Some(subscription_id) = user
        .subscription
        .processor_subscription_id()
        .map(str::to_owned)
    else {
        return Err(WebError::not_found("No active subscription found"));
    };

    state
        .payments
        .cancel_subscription(&subscription_id)
        .await
        .map_err(|e| {
            tracing::error!(user_id = user.id, error = %e, "failed to cancel subscription");
            WebError::internal(CANCEL_FAILED)
        })?;

    user.subscription.downgrade(Utc::now().naive_utc());
    state.store.update_subscription(user.id, &user.subscription)?;
    tracing::info!(user_id = user.id, "subscription cancelled");

    Ok(Json(json!({ "message": "Subscription cancelled successfully" })))
}
