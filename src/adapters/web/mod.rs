//! REST API adapter.
//!
//! Axum router serving the account, strategy, backtest and subscription
//! endpoints as JSON. Sessions are cookie based (axum-login over
//! tower-sessions); protected routes answer 401 without a session.

mod auth;
mod backtests;
mod error;
mod handlers;
mod strategies;
mod subscriptions;

pub use auth::{Backend, Credentials, hash_password, verify_password};
pub use error::{WebError, status_from_error};

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use axum_login::{AuthManagerLayerBuilder, login_required};
use rand::RngCore;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::cookie::{Key, SameSite};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, SessionStore};

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::QuantdeskError;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::payment_port::PaymentPort;
use crate::ports::store_port::AccountStore;

pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";
pub const DEFAULT_SESSION_LIFETIME: i64 = 3600;
/// Cookie signing keys are 64 bytes, configured as 128 hex characters.
pub const SESSION_KEY_LEN: usize = 64;

pub type AuthSession = axum_login::AuthSession<Backend>;

pub struct AppState {
    pub store: Arc<dyn AccountStore + Send + Sync>,
    pub data: Arc<dyn DataPort + Send + Sync>,
    pub payments: Arc<dyn PaymentPort>,
    pub settings: WebSettings,
}

/// Server settings read from `[server]`, `[auth]`, `[stripe]` and `[backtest]`.
#[derive(Debug, Clone)]
pub struct WebSettings {
    pub frontend_url: String,
    pub cors_origins: Vec<String>,
    pub webhook_secret: Option<String>,
    pub backtest: BacktestConfig,
    pub session_key: Vec<u8>,
    pub session_lifetime: i64,
    pub secure_cookies: bool,
}

impl WebSettings {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantdeskError> {
        let production = config
            .get_string("server", "environment")
            .is_some_and(|env| env.eq_ignore_ascii_case("production"));

        let frontend_url = config
            .get_string("server", "frontend_url")
            .unwrap_or_else(|| DEFAULT_FRONTEND_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let cors_origins = match config.get_string("server", "cors_origins") {
            Some(list) => list
                .split(',')
                .map(|o| o.trim().trim_end_matches('/').to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            None => vec![frontend_url.clone()],
        };

        let session_key = match config.get_string("auth", "session_secret") {
            Some(secret) => decode_session_key(&secret)?,
            None if production => {
                return Err(QuantdeskError::ConfigMissing {
                    section: "auth".into(),
                    key: "session_secret".into(),
                });
            }
            None => {
                tracing::warn!("no [auth] session_secret configured; sessions will not survive a restart");
                let mut key = vec![0u8; SESSION_KEY_LEN];
                rand::thread_rng().fill_bytes(&mut key);
                key
            }
        };

        let session_lifetime =
            config.get_int("auth", "session_lifetime", DEFAULT_SESSION_LIFETIME);
        if session_lifetime <= 0 {
            return Err(QuantdeskError::ConfigInvalid {
                section: "auth".into(),
                key: "session_lifetime".into(),
                reason: "must be positive".into(),
            });
        }

        Ok(Self {
            frontend_url,
            cors_origins,
            webhook_secret: config
                .get_string("stripe", "webhook_secret")
                .filter(|s| !s.trim().is_empty()),
            backtest: BacktestConfig::from_config(config)?,
            session_key,
            session_lifetime,
            secure_cookies: config.get_bool("auth", "secure_cookies", production),
        })
    }
}

fn decode_session_key(secret: &str) -> Result<Vec<u8>, QuantdeskError> {
    let invalid = |reason: String| QuantdeskError::ConfigInvalid {
        section: "auth".into(),
        key: "session_secret".into(),
        reason,
    };
    let bytes = hex::decode(secret.trim()).map_err(|e| invalid(e.to_string()))?;
    if bytes.len() != SESSION_KEY_LEN {
        return Err(invalid(format!(
            "expected {} hex characters, got {}",
            SESSION_KEY_LEN * 2,
            secret.trim().len()
        )));
    }
    Ok(bytes)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Builds the API router with sessions kept in `session_store`.
pub fn build_router<S>(state: AppState, session_store: S) -> Router
where
    S: SessionStore + Clone,
{
    let settings = state.settings.clone();

    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(settings.secure_cookies)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::seconds(
            settings.session_lifetime,
        )))
        .with_signed(Key::from(settings.session_key.as_slice()));

    let backend = Backend::new(state.store.clone());
    let auth_layer = AuthManagerLayerBuilder::new(backend, session_layer).build();

    let protected = Router::new()
        .route("/api/auth/me", get(handlers::me))
        .route("/api/dashboard", get(handlers::dashboard))
        .route(
            "/api/strategies",
            get(strategies::list_strategies).post(strategies::create_strategy),
        )
        .route(
            "/api/strategies/{id}",
            get(strategies::get_strategy)
                .put(strategies::update_strategy)
                .delete(strategies::delete_strategy),
        )
        .route(
            "/api/backtests",
            get(backtests::list_backtests).post(backtests::run_backtest),
        )
        .route(
            "/api/backtests/{id}",
            get(backtests::get_backtest).delete(backtests::delete_backtest),
        )
        .route("/api/subscriptions/current", get(subscriptions::current))
        .route("/api/subscriptions/checkout", post(subscriptions::checkout))
        .route("/api/subscriptions/cancel", post(subscriptions::cancel))
        .route_layer(login_required!(Backend));

    Router::new()
        .merge(protected)
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/api/auth/register", post(handlers::register))
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/logout", post(handlers::logout))
        .route("/api/subscriptions/tiers", get(subscriptions::tiers))
        .route("/api/subscriptions/webhook", post(subscriptions::webhook))
        .fallback(handlers::not_found)
        .layer(auth_layer)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&settings.cors_origins)),
        )
        .with_state(Arc::new(state))
}

/// Router with process-local sessions, for development and tests.
pub fn build_router_in_memory(state: AppState) -> Router {
    build_router(state, MemoryStore::default())
}
