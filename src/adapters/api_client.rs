//! REST client for the quantdesk API.
//!
//! A thin wrapper over `reqwest` with a cookie store holding the session.
//! No caching or retry: every call is one request, and page loads fan out
//! with `tokio::try_join!`.

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use crate::domain::backtest::Backtest;
use crate::domain::error::QuantdeskError;
use crate::domain::strategy::{Parameters, Strategy, StrategyKind};
use crate::domain::subscription::{CurrentSubscription, Tier, TierConfig};
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";

const LOGIN_FAILED: &str = "Login failed";
const REGISTER_FAILED: &str = "Registration failed";
const LOGOUT_FAILED: &str = "Logout failed";
const ACCOUNT_FAILED: &str = "Failed to load account";
const DASHBOARD_FAILED: &str = "Failed to load dashboard data";
const STRATEGIES_FAILED: &str = "Failed to load strategies";
const SAVE_STRATEGY_FAILED: &str = "Failed to save strategy";
const DELETE_STRATEGY_FAILED: &str = "Failed to delete strategy";
const BACKTESTS_FAILED: &str = "Failed to load backtests";
const RUN_BACKTEST_FAILED: &str = "Failed to run backtest";
const SUBSCRIPTION_FAILED: &str = "Failed to load subscription data";
const CHECKOUT_FAILED: &str = "Failed to start checkout process. Please try again.";
const CANCEL_FAILED: &str = "Failed to cancel subscription. Please try again.";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{fallback} (HTTP {status})")]
    Status {
        status: StatusCode,
        /// The `error` field of the response body, when there was one.
        message: Option<String>,
        fallback: &'static str,
    },

    #[error("{fallback}: {source}")]
    Transport {
        #[source]
        source: reqwest::Error,
        fallback: &'static str,
    },

    /// Rejected locally before any request was made.
    #[error("{0}")]
    Input(String),
}

impl ApiError {
    /// Text to show the user: the server's message, else the operation's
    /// generic fallback.
    pub fn user_message(&self) -> &str {
        match self {
            ApiError::Status {
                message: Some(message),
                ..
            } => message,
            ApiError::Input(message) => message,
            ApiError::Status { fallback, .. } | ApiError::Transport { fallback, .. } => fallback,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport { source, .. } => source.status(),
            ApiError::Input(_) => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

/// The signed-in account as the API reports it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub subscription_tier: Tier,
    pub subscription_start_date: Option<chrono::NaiveDateTime>,
    pub subscription_end_date: Option<chrono::NaiveDateTime>,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Debug, Deserialize)]
struct AccountEnvelope {
    user: Account,
}

#[derive(Debug, Deserialize)]
struct StrategyEnvelope {
    strategy: Strategy,
}

#[derive(Debug, Deserialize)]
struct BacktestEnvelope {
    backtest: Backtest,
}

#[derive(Debug, Deserialize)]
struct MessageEnvelope {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckoutLink {
    pub checkout_url: String,
    pub session_id: String,
}

/// Partial strategy update; `None` fields are not sent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<StrategyKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestSubmission {
    pub strategy_id: i64,
    pub symbol: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_cost: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Dashboard {
    pub strategies: Vec<Strategy>,
    pub backtests: Vec<Backtest>,
    pub subscription: CurrentSubscription,
}

#[derive(Debug, Clone)]
pub struct SubscriptionPage {
    /// Every tier, free first.
    pub tiers: Vec<(Tier, TierConfig)>,
    pub current: CurrentSubscription,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, QuantdeskError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| QuantdeskError::Io(std::io::Error::other(e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantdeskError> {
        let base_url = config
            .get_string("client", "base_url")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::new(&base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base_url, path))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        fallback: &'static str,
    ) -> Result<T, ApiError> {
        let result = Self::execute(request, fallback).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, detail = e.user_message(), "API request failed");
        }
        result
    }

    async fn execute<T: DeserializeOwned>(
        request: RequestBuilder,
        fallback: &'static str,
    ) -> Result<T, ApiError> {
        let transport = |source: reqwest::Error| ApiError::Transport { source, fallback };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .map(|body| body.error)
                .filter(|m| !m.is_empty());
            return Err(ApiError::Status {
                status,
                message,
                fallback,
            });
        }

        response.json::<T>().await.map_err(transport)
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Account, ApiError> {
        let body = json!({ "username": username, "email": email, "password": password });
        let envelope: AccountEnvelope = self
            .send(
                self.request(Method::POST, "/api/auth/register").json(&body),
                REGISTER_FAILED,
            )
            .await?;
        Ok(envelope.user)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Account, ApiError> {
        let body = json!({ "username": username, "password": password });
        let envelope: AccountEnvelope = self
            .send(
                self.request(Method::POST, "/api/auth/login").json(&body),
                LOGIN_FAILED,
            )
            .await?;
        Ok(envelope.user)
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        let _: MessageEnvelope = self
            .send(self.request(Method::POST, "/api/auth/logout"), LOGOUT_FAILED)
            .await?;
        Ok(())
    }

    pub async fn me(&self) -> Result<Account, ApiError> {
        self.send(self.request(Method::GET, "/api/auth/me"), ACCOUNT_FAILED)
            .await
    }

    pub async fn list_strategies(&self) -> Result<Vec<Strategy>, ApiError> {
        self.send(self.request(Method::GET, "/api/strategies"), STRATEGIES_FAILED)
            .await
    }

    /// Creates a strategy, substituting the kind's default parameters when
    /// its key parameter is missing.
    pub async fn create_strategy(
        &self,
        name: &str,
        kind: StrategyKind,
        parameters: Parameters,
    ) -> Result<Strategy, ApiError> {
        let body = json!({
            "name": name,
            "type": kind,
            "parameters": kind.with_defaults(parameters),
        });
        let envelope: StrategyEnvelope = self
            .send(
                self.request(Method::POST, "/api/strategies").json(&body),
                SAVE_STRATEGY_FAILED,
            )
            .await?;
        Ok(envelope.strategy)
    }

    pub async fn update_strategy(
        &self,
        id: i64,
        mut update: StrategyUpdate,
    ) -> Result<Strategy, ApiError> {
        if let (Some(kind), Some(params)) = (update.kind, update.parameters.take()) {
            update.parameters = Some(kind.with_defaults(params));
        }
        let envelope: StrategyEnvelope = self
            .send(
                self.request(Method::PUT, &format!("/api/strategies/{id}"))
                    .json(&update),
                SAVE_STRATEGY_FAILED,
            )
            .await?;
        Ok(envelope.strategy)
    }

    pub async fn delete_strategy(&self, id: i64) -> Result<(), ApiError> {
        let _: MessageEnvelope = self
            .send(
                self.request(Method::DELETE, &format!("/api/strategies/{id}")),
                DELETE_STRATEGY_FAILED,
            )
            .await?;
        Ok(())
    }

    pub async fn list_backtests(&self) -> Result<Vec<Backtest>, ApiError> {
        self.send(self.request(Method::GET, "/api/backtests"), BACKTESTS_FAILED)
            .await
    }

    pub async fn run_backtest(&self, submission: &BacktestSubmission) -> Result<Backtest, ApiError> {
        let envelope: BacktestEnvelope = self
            .send(
                self.request(Method::POST, "/api/backtests").json(submission),
                RUN_BACKTEST_FAILED,
            )
            .await?;
        Ok(envelope.backtest)
    }

    /// The tier catalogue in display order.
    pub async fn tiers(&self) -> Result<Vec<(Tier, TierConfig)>, ApiError> {
        let mut catalogue: HashMap<Tier, TierConfig> = self
            .send(
                self.request(Method::GET, "/api/subscriptions/tiers"),
                SUBSCRIPTION_FAILED,
            )
            .await?;
        Ok(Tier::ALL
            .into_iter()
            .filter_map(|tier| catalogue.remove(&tier).map(|config| (tier, config)))
            .collect())
    }

    pub async fn current_subscription(&self) -> Result<CurrentSubscription, ApiError> {
        self.send(
            self.request(Method::GET, "/api/subscriptions/current"),
            SUBSCRIPTION_FAILED,
        )
        .await
    }

    /// Starts checkout for `tier`; the caller sends the user to `checkout_url`.
    pub async fn create_checkout(&self, tier: Tier) -> Result<CheckoutLink, ApiError> {
        self.send(
            self.request(Method::POST, "/api/subscriptions/checkout")
                .json(&json!({ "tier": tier })),
            CHECKOUT_FAILED,
        )
        .await
    }

    pub async fn cancel_subscription(&self) -> Result<String, ApiError> {
        let envelope: MessageEnvelope = self
            .send(
                self.request(Method::POST, "/api/subscriptions/cancel"),
                CANCEL_FAILED,
            )
            .await?;
        Ok(envelope.message)
    }

    pub async fn load_dashboard(&self) -> Result<Dashboard, ApiError> {
        let (strategies, backtests, subscription) = tokio::try_join!(
            self.list_strategies(),
            self.list_backtests(),
            self.current_subscription(),
        )
        .inspect_err(|e| tracing::error!(error = %e, page = DASHBOARD_FAILED, "page load failed"))?;

        Ok(Dashboard {
            strategies,
            backtests,
            subscription,
        })
    }

    pub async fn load_subscription_page(&self) -> Result<SubscriptionPage, ApiError> {
        let (tiers, current) = tokio::try_join!(self.tiers(), self.current_subscription())?;
        Ok(SubscriptionPage { tiers, current })
    }
}
