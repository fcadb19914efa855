//! Strategy CRUD handlers. Every lookup is scoped to the signed-in user.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::domain::error::QuantdeskError;
use crate::domain::strategy::{NewStrategy, Parameters, Strategy, StrategyChanges, StrategyKind};

use super::handlers::current_user;
use super::{AppState, AuthSession, WebError};

#[derive(Debug, Default, Deserialize)]
pub struct StrategyRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub parameters: Option<Parameters>,
    pub is_active: Option<bool>,
}

fn not_found() -> WebError {
    QuantdeskError::NotFound { entity: "Strategy" }.into()
}

pub async fn list_strategies(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Strategy>>, WebError> {
    let user = current_user(&auth)?;
    Ok(Json(state.store.list_strategies(user.id)?))
}

pub async fn get_strategy(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Strategy>, WebError> {
    let user = current_user(&auth)?;
    let strategy = state.store.get_strategy(user.id, id)?.ok_or_else(not_found)?;
    Ok(Json(strategy))
}

pub async fn create_strategy(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StrategyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), WebError> {
    let user = current_user(&auth)?;
    let Json(req) = payload?;

    let name = req.name.map(|n| n.trim().to_string()).unwrap_or_default();
    let kind = req.kind.unwrap_or_default();
    if name.is_empty() || kind.trim().is_empty() {
        return Err(WebError::missing_fields());
    }
    let kind: StrategyKind = kind.parse()?;

    let tier = user.subscription.tier;
    let count = state.store.count_strategies(user.id)?;
    if !tier.config().max_strategies.allows(count) {
        return Err(QuantdeskError::LimitReached {
            reason: format!("Maximum strategies limit reached for {tier} tier"),
        }
        .into());
    }

    let parameters = kind.with_defaults(req.parameters.unwrap_or_default());
    kind.validate(&parameters)?;

    let now = chrono::Utc::now().naive_utc();
    let strategy = state.store.insert_strategy(
        user.id,
        &NewStrategy {
            name,
            kind,
            parameters,
        },
        now,
    )?;
    tracing::info!(user_id = user.id, strategy_id = strategy.id, kind = %kind, "created strategy");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Strategy created successfully",
            "strategy": strategy,
        })),
    ))
}

pub async fn update_strategy(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    payload: Result<Json<StrategyRequest>, JsonRejection>,
) -> Result<Json<Value>, WebError> {
    let user = current_user(&auth)?;
    let mut strategy = state.store.get_strategy(user.id, id)?.ok_or_else(not_found)?;
    let Json(req) = payload?;

    let name = match req.name.map(|n| n.trim().to_string()) {
        Some(n) if n.is_empty() => return Err(WebError::missing_fields()),
        other => other,
    };
    let kind = req.kind.map(|k| k.parse::<StrategyKind>()).transpose()?;

    strategy.apply(
        StrategyChanges {
            name,
            kind,
            parameters: req.parameters,
            is_active: req.is_active,
        },
        chrono::Utc::now().naive_utc(),
    );
    strategy.kind.validate(&strategy.parameters)?;
    state.store.save_strategy(&strategy)?;

    Ok(Json(json!({
        "message": "Strategy updated successfully",
        "strategy": strategy,
    })))
}

pub async fn delete_strategy(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, WebError> {
    let user = current_user(&auth)?;
    if !state.store.delete_strategy(user.id, id)? {
        return Err(not_found());
    }
    tracing::info!(user_id = user.id, strategy_id = id, "deleted strategy");
    Ok(Json(json!({ "message": "Strategy deleted successfully" })))
}
