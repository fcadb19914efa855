//! Domain error types.

/// Top-level error type for quantdesk.
#[derive(Debug, thiserror::Error)]
pub enum QuantdeskError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("{reason}")]
    Validation { reason: String },

    #[error("{reason}")]
    Conflict { reason: String },

    #[error("{reason}")]
    LimitReached { reason: String },

    #[error("Unsupported strategy type: {kind}")]
    UnsupportedStrategy { kind: String },

    #[error("invalid strategy parameters: {reason}")]
    InvalidParameters { reason: String },

    #[error("no price data for {symbol}")]
    NoData { symbol: String },

    #[error("insufficient data for {symbol}: have {bars} bars, need {minimum}")]
    InsufficientData {
        symbol: String,
        bars: usize,
        minimum: usize,
    },

    #[error("payment processor error: {reason}")]
    Payment { reason: String },

    #[error("webhook signature rejected: {reason}")]
    WebhookSignature { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl QuantdeskError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn query(err: impl std::fmt::Display) -> Self {
        Self::DatabaseQuery {
            reason: err.to_string(),
        }
    }
}

impl From<r2d2::Error> for QuantdeskError {
    fn from(err: r2d2::Error) -> Self {
        QuantdeskError::Database {
            reason: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for QuantdeskError {
    fn from(err: rusqlite::Error) -> Self {
        QuantdeskError::DatabaseQuery {
            reason: err.to_string(),
        }
    }
}

impl From<&QuantdeskError> for std::process::ExitCode {
    fn from(err: &QuantdeskError) -> Self {
        let code: u8 = match err {
            QuantdeskError::Io(_) => 1,
            QuantdeskError::ConfigParse { .. }
            | QuantdeskError::ConfigMissing { .. }
            | QuantdeskError::ConfigInvalid { .. } => 2,
            QuantdeskError::Database { .. } | QuantdeskError::DatabaseQuery { .. } => 3,
            QuantdeskError::UnsupportedStrategy { .. }
            | QuantdeskError::InvalidParameters { .. }
            | QuantdeskError::Validation { .. } => 4,
            QuantdeskError::NoData { .. } | QuantdeskError::InsufficientData { .. } => 5,
            QuantdeskError::Payment { .. } | QuantdeskError::WebhookSignature { .. } => 6,
            QuantdeskError::NotFound { .. }
            | QuantdeskError::Conflict { .. }
            | QuantdeskError::LimitReached { .. } => 7,
        };
        std::process::ExitCode::from(code)
    }
}
