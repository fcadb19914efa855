//! Service, account and dashboard handlers.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::domain::user::{NewUser, User, validate_registration};

use super::auth::{Credentials, hash_password};
use super::{AppState, AuthSession, WebError};

type JsonResult = Result<Json<Value>, WebError>;

/// The signed-in user. Protected routes only run with a session, so a
/// missing user means the account vanished mid-request.
pub(super) fn current_user(auth: &AuthSession) -> Result<User, WebError> {
    auth.user
        .clone()
        .ok_or_else(|| WebError::unauthorized("Authentication required"))
}

pub(super) fn session_error(err: impl std::fmt::Display) -> WebError {
    tracing::error!(error = %err, "session store failure");
    WebError::internal("Internal server error")
}

pub async fn index() -> Json<Value> {
    Json(json!({
        "message": "Algorithmic Trading Platform API",
        "status": "running",
    }))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn not_found() -> WebError {
    WebError::not_found("Not found")
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

pub async fn register(
    mut auth: AuthSession,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), WebError> {
    let Json(req) = payload?;
    let username = req.username.unwrap_or_default();
    let email = req.email.unwrap_or_default();
    let password = req.password.unwrap_or_default();

    validate_registration(&username, &email, &password)?;

    let user = state.store.create_user(&NewUser {
        username: username.trim().to_string(),
        email: email.trim().to_string(),
        password_hash: hash_password(&password)?,
    })?;
    tracing::info!(user_id = user.id, username = %user.username, "registered user");

    auth.login(&user).await.map_err(session_error)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User registered successfully",
            "user": user,
        })),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

pub async fn login(
    mut auth: AuthSession,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> JsonResult {
    let Json(req) = payload?;
    let (Some(username), Some(password)) = (req.username, req.password) else {
        return Err(WebError::missing_fields());
    };
    if username.trim().is_empty() || password.is_empty() {
        return Err(WebError::missing_fields());
    }

    let user = match auth.authenticate(Credentials { username, password }).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(WebError::unauthorized("Invalid credentials")),
        Err(e) => return Err(session_error(e)),
    };

    auth.login(&user).await.map_err(session_error)?;
    tracing::info!(user_id = user.id, "user logged in");

    Ok(Json(json!({
        "message": "Login successful",
        "user": user,
    })))
}

pub async fn logout(mut auth: AuthSession) -> JsonResult {
    auth.logout().await.map_err(session_error)?;
    Ok(Json(json!({ "message": "Logged out successfully" })))
}

pub async fn me(auth: AuthSession) -> Result<Json<User>, WebError> {
    Ok(Json(current_user(&auth)?))
}

pub async fn dashboard(auth: AuthSession, State(state): State<Arc<AppState>>) -> JsonResult {
    let user = current_user(&auth)?;
    let strategies = state.store.count_strategies(user.id)?;
    let backtests = state.store.count_backtests(user.id)?;

    Ok(Json(json!({
        "username": user.username,
        "tier": user.subscription.tier,
        "strategies": strategies,
        "backtests": backtests,
    })))
}
