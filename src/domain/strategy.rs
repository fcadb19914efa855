//! Strategy records, kinds and parameter handling.
//!
//! Parameters are stored as a free-form JSON object so clients can round-trip
//! whatever they sent; the typed views (`SmaParams`, `MeanReversionParams`)
//! are read from it when a backtest runs.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::str::FromStr;

use crate::domain::error::QuantdeskError;

pub type Parameters = Map<String, Value>;

pub const SMA_SHORT_KEY: &str = "SMA_S";
pub const SMA_LONG_KEY: &str = "SMA_L";
pub const MEAN_REV_SMA_KEY: &str = "SMA";
pub const MEAN_REV_DEV_KEY: &str = "dev";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "SMA")]
    Sma,
    #[serde(rename = "MeanReversion")]
    MeanReversion,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 2] = [StrategyKind::Sma, StrategyKind::MeanReversion];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Sma => "SMA",
            StrategyKind::MeanReversion => "MeanReversion",
        }
    }

    /// Human-readable label for listings.
    pub fn label(&self) -> &'static str {
        match self {
            StrategyKind::Sma => "Simple Moving Average (SMA)",
            StrategyKind::MeanReversion => "Mean Reversion",
        }
    }

    pub fn default_parameters(&self) -> Parameters {
        let value = match self {
            StrategyKind::Sma => json!({ SMA_SHORT_KEY: 10, SMA_LONG_KEY: 50 }),
            StrategyKind::MeanReversion => json!({ MEAN_REV_SMA_KEY: 20, MEAN_REV_DEV_KEY: 2 }),
        };
        match value {
            Value::Object(map) => map,
            _ => Parameters::new(),
        }
    }

    /// Replaces the whole mapping with the defaults when the kind's key
    /// parameter is absent (or null/zero, which a cleared form field sends).
    pub fn with_defaults(&self, params: Parameters) -> Parameters {
        let key = match self {
            StrategyKind::Sma => SMA_SHORT_KEY,
            StrategyKind::MeanReversion => MEAN_REV_SMA_KEY,
        };
        let present = match params.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        };
        if present {
            params
        } else {
            self.default_parameters()
        }
    }

    /// Fails with `InvalidParameters` when the engine could not run `params`.
    pub fn validate(&self, params: &Parameters) -> Result<(), QuantdeskError> {
        match self {
            StrategyKind::Sma => SmaParams::from_parameters(params).map(|_| ()),
            StrategyKind::MeanReversion => MeanReversionParams::from_parameters(params).map(|_| ()),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = QuantdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| QuantdeskError::UnsupportedStrategy {
                kind: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmaParams {
    pub short: usize,
    pub long: usize,
}

impl SmaParams {
    pub fn from_parameters(params: &Parameters) -> Result<Self, QuantdeskError> {
        let short = read_period(params, SMA_SHORT_KEY, 10)?;
        let long = read_period(params, SMA_LONG_KEY, 50)?;
        if short >= long {
            return Err(QuantdeskError::InvalidParameters {
                reason: format!("{SMA_SHORT_KEY} ({short}) must be below {SMA_LONG_KEY} ({long})"),
            });
        }
        Ok(Self { short, long })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanReversionParams {
    pub sma: usize,
    pub dev: f64,
}

impl MeanReversionParams {
    pub fn from_parameters(params: &Parameters) -> Result<Self, QuantdeskError> {
        let sma = read_period(params, MEAN_REV_SMA_KEY, 20)?;
        if sma < 2 {
            return Err(QuantdeskError::InvalidParameters {
                reason: format!("{MEAN_REV_SMA_KEY} must be at least 2"),
            });
        }
        let dev = read_number(params, MEAN_REV_DEV_KEY)?.unwrap_or(2.0);
        if !(dev.is_finite() && dev > 0.0) {
            return Err(QuantdeskError::InvalidParameters {
                reason: format!("{MEAN_REV_DEV_KEY} must be positive"),
            });
        }
        Ok(Self { sma, dev })
    }
}

/// Reads a numeric parameter, accepting numbers or numeric strings.
fn read_number(params: &Parameters, key: &str) -> Result<Option<f64>, QuantdeskError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| {
            QuantdeskError::InvalidParameters {
                reason: format!("{key} is not a number: {s}"),
            }
        }),
        Some(other) => Err(QuantdeskError::InvalidParameters {
            reason: format!("{key} is not a number: {other}"),
        }),
    }
}

fn read_period(params: &Parameters, key: &str, default: usize) -> Result<usize, QuantdeskError> {
    let Some(value) = read_number(params, key)? else {
        return Ok(default);
    };
    if value.fract() != 0.0 || value < 1.0 {
        return Err(QuantdeskError::InvalidParameters {
            reason: format!("{key} must be a positive whole number, got {value}"),
        });
    }
    Ok(value as usize)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: StrategyKind,
    pub parameters: Parameters,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub is_active: bool,
}

/// Input for inserting a strategy.
#[derive(Debug, Clone)]
pub struct NewStrategy {
    pub name: String,
    pub kind: StrategyKind,
    pub parameters: Parameters,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct StrategyChanges {
    pub name: Option<String>,
    pub kind: Option<StrategyKind>,
    pub parameters: Option<Parameters>,
    pub is_active: Option<bool>,
}

impl Strategy {
    /// Applies `changes`, re-running default substitution against the
    /// resulting kind, and bumps `updated_at`.
    pub fn apply(&mut self, changes: StrategyChanges, now: NaiveDateTime) {
        if let Some(name) = changes.name {
            self.name = name;
        }
        let kind_changed = changes.kind.is_some_and(|k| k != self.kind);
        if let Some(kind) = changes.kind {
            self.kind = kind;
        }
        match changes.parameters {
            Some(params) => self.parameters = self.kind.with_defaults(params),
            // Old parameters belong to the old kind.
            None if kind_changed => self.parameters = self.kind.with_defaults(Parameters::new()),
            None => {}
        }
        if let Some(active) = changes.is_active {
            self.is_active = active;
        }
        self.updated_at = now;
    }
}
