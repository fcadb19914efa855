//! Stripe payment adapter.
//!
//! Talks to the Stripe REST API directly with form-encoded requests, and
//! verifies webhook signatures (`Stripe-Signature: t=<ts>,v1=<hex>`).

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

use crate::domain::error::QuantdeskError;
use crate::ports::config_port::ConfigPort;
use crate::ports::payment_port::{CheckoutRequest, CheckoutSession, PaymentPort};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";
pub const DEFAULT_CURRENCY: &str = "usd";
/// Maximum age of a signed webhook, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub struct StripeAdapter {
    client: reqwest::Client,
    api_base: String,
    secret_key: Option<String>,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct CustomerResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// Event envelope delivered to the webhook endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub object: Value,
}

impl StripeAdapter {
    pub fn new(api_base: String, secret_key: Option<String>, currency: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key,
            currency,
        }
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantdeskError> {
        let secret_key = config
            .get_string("stripe", "secret_key")
            .filter(|k| !k.trim().is_empty());
        if secret_key.is_none() {
            tracing::warn!("no [stripe] secret_key configured; checkout and cancellation will fail");
        }
        let api_base = config
            .get_string("stripe", "api_base")
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let currency = config
            .get_string("stripe", "currency")
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        Ok(Self::new(api_base, secret_key, currency))
    }

    fn secret_key(&self) -> Result<&str, QuantdeskError> {
        self.secret_key
            .as_deref()
            .ok_or_else(|| QuantdeskError::Payment {
                reason: "[stripe] secret_key is not configured".into(),
            })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Form fields for a one-item monthly subscription checkout.
    pub fn checkout_form(&self, request: &CheckoutRequest) -> Vec<(String, String)> {
        let tier = request.tier.config();
        let pairs = [
            ("customer", request.customer_id.clone()),
            ("payment_method_types[0]", "card".to_string()),
            ("line_items[0][price_data][currency]", self.currency.clone()),
            (
                "line_items[0][price_data][product_data][name]",
                format!("{} Subscription", tier.name),
            ),
            (
                "line_items[0][price_data][product_data][description]",
                format!("Monthly subscription for {} tier", tier.name),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                tier.unit_amount().to_string(),
            ),
            (
                "line_items[0][price_data][recurring][interval]",
                "month".to_string(),
            ),
            ("line_items[0][quantity]", "1".to_string()),
            ("mode", "subscription".to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("metadata[user_id]", request.user_id.to_string()),
            ("metadata[tier]", request.tier.as_str().to_string()),
        ];
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, QuantdeskError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or(body);
            return Err(QuantdeskError::Payment {
                reason: format!("{status}: {message}"),
            });
        }

        response.json::<T>().await.map_err(payment_error)
    }
}

fn payment_error(err: reqwest::Error) -> QuantdeskError {
    QuantdeskError::Payment {
        reason: err.to_string(),
    }
}

#[async_trait]
impl PaymentPort for StripeAdapter {
    async fn create_customer(&self, email: &str, user_id: i64) -> Result<String, QuantdeskError> {
        let form = [
            ("email", email.to_string()),
            ("metadata[user_id]", user_id.to_string()),
        ];
        let response = self
            .client
            .post(self.url("/v1/customers"))
            .bearer_auth(self.secret_key()?)
            .form(&form)
            .send()
            .await
            .map_err(payment_error)?;

        let customer: CustomerResponse = Self::read_json(response).await?;
        Ok(customer.id)
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, QuantdeskError> {
        let response = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .bearer_auth(self.secret_key()?)
            .form(&self.checkout_form(request))
            .send()
            .await
            .map_err(payment_error)?;

        let session: CheckoutResponse = Self::read_json(response).await?;
        let url = session.url.ok_or_else(|| QuantdeskError::Payment {
            reason: format!("checkout session {} has no url", session.id),
        })?;
        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), QuantdeskError> {
        let response = self
            .client
            .delete(self.url(&format!("/v1/subscriptions/{subscription_id}")))
            .bearer_auth(self.secret_key()?)
            .send()
            .await
            .map_err(payment_error)?;

        let _: Value = Self::read_json(response).await?;
        Ok(())
    }
}

fn signature_error(reason: impl Into<String>) -> QuantdeskError {
    QuantdeskError::WebhookSignature {
        reason: reason.into(),
    }
}

/// Checks a `Stripe-Signature` header against the raw request body.
///
/// Any `v1` entry may match; the timestamp must be within
/// [`SIGNATURE_TOLERANCE_SECS`] of `now_unix`.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now_unix: i64,
) -> Result<(), QuantdeskError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| signature_error("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(signature_error("no v1 signature"));
    }
    let issued: i64 = timestamp
        .parse()
        .map_err(|_| signature_error("malformed timestamp"))?;
    let skew = now_unix
        .checked_sub(issued)
        .map(i64::unsigned_abs)
        .ok_or_else(|| signature_error("timestamp outside tolerance"))?;
    if skew > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        return Err(signature_error("timestamp outside tolerance"));
    }

    for candidate in signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| signature_error(e.to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(signature_error("no matching signature"))
}

/// Computes the `v1` signature Stripe would send for `payload` at `timestamp`.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, QuantdeskError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| signature_error(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
