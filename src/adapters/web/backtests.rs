//! Backtest handlers: run a stored strategy over a symbol's prices and keep
//! the result.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::domain::backtest::{Backtest, NewBacktest, run_backtest as run_backtest_engine};
use crate::domain::error::QuantdeskError;
use crate::domain::price::{parse_timestamp, parse_window_end};
use crate::domain::subscription::Limit;

use super::handlers::current_user;
use super::{AppState, AuthSession, WebError, status_from_error};

#[derive(Debug, Default, Deserialize)]
pub struct BacktestRequest {
    pub strategy_id: Option<i64>,
    pub symbol: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub transaction_cost: Option<f64>,
}

fn not_found() -> WebError {
    QuantdeskError::NotFound { entity: "Backtest" }.into()
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDateTime, WebError> {
    parse_timestamp(value)
        .ok_or_else(|| WebError::bad_request(format!("Invalid {field}: {value}")))
}

/// Start of the current UTC day; daily quotas count from here.
fn today_start() -> NaiveDateTime {
    Utc::now().date_naive().and_time(chrono::NaiveTime::MIN)
}

/// Engine failures the caller can fix keep their detail; the rest are logged.
fn engine_failure(err: QuantdeskError) -> WebError {
    let status = status_from_error(&err);
    if status.is_client_error() {
        WebError::new(status, format!("Backtest failed: {err}"))
    } else {
        tracing::error!(error = %err, "backtest failed");
        WebError::internal("Backtest failed: internal error")
    }
}

pub async fn list_backtests(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Backtest>>, WebError> {
    let user = current_user(&auth)?;
    Ok(Json(state.store.list_backtests(user.id)?))
}

pub async fn get_backtest(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Backtest>, WebError> {
    let user = current_user(&auth)?;
    let backtest = state.store.get_backtest(user.id, id)?.ok_or_else(not_found)?;
    Ok(Json(backtest))
}

pub async fn run_backtest(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BacktestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), WebError> {
    let user = current_user(&auth)?;
    let Json(req) = payload?;

    let (Some(strategy_id), Some(symbol), Some(start), Some(end)) =
        (req.strategy_id, req.symbol, req.start_date, req.end_date)
    else {
        return Err(WebError::missing_fields());
    };
    let symbol = symbol.trim().to_string();
    if symbol.is_empty() || start.trim().is_empty() || end.trim().is_empty() {
        return Err(WebError::missing_fields());
    }

    let strategy = state
        .store
        .get_strategy(user.id, strategy_id)?
        .ok_or_else(|| WebError::from(QuantdeskError::NotFound { entity: "Strategy" }))?;

    let tier = user.subscription.tier;
    let limit = tier.config().max_backtests_per_day;
    if limit != Limit::Unlimited {
        let today = state.store.count_backtests_since(user.id, today_start())?;
        if !limit.allows(today) {
            return Err(QuantdeskError::LimitReached {
                reason: format!("Daily backtest limit reached for {tier} tier"),
            }
            .into());
        }
    }

    let start_date = parse_date("start_date", &start)?;
    let end_date = parse_date("end_date", &end)?;
    if end_date < start_date {
        return Err(WebError::bad_request("end_date must not be before start_date"));
    }

    let window_end = parse_window_end(&end)
        .ok_or_else(|| WebError::bad_request(format!("Invalid end_date: {end}")))?;

    let mut config = state.settings.backtest.clone();
    if let Some(tc) = req.transaction_cost {
        if !(0.0..1.0).contains(&tc) {
            return Err(WebError::bad_request("transaction_cost must be in [0, 1)"));
        }
        config.transaction_cost = tc;
    }

    let bars = state
        .data
        .fetch_bars(&symbol, start_date, window_end)
        .map_err(engine_failure)?;
    let outcome = run_backtest_engine(strategy.kind, &strategy.parameters, &bars, &config)
        .map_err(engine_failure)?;

    let backtest = state.store.insert_backtest(
        user.id,
        &NewBacktest {
            strategy_id: strategy.id,
            symbol,
            start_date,
            end_date,
            outcome,
        },
        Utc::now().naive_utc(),
    )?;
    tracing::info!(
        user_id = user.id,
        backtest_id = backtest.id,
        symbol = %backtest.symbol,
        performance = ?backtest.performance,
        "backtest completed"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Backtest completed successfully",
            "backtest": backtest,
        })),
    ))
}

pub async fn delete_backtest(
    auth: AuthSession,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, WebError> {
    let user = current_user(&auth)?;
    if !state.store.delete_backtest(user.id, id)? {
        return Err(not_found());
    }
    Ok(Json(json!({ "message": "Backtest deleted successfully" })))
}
