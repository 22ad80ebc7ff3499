//! Gateway error kinds callers branch on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Network failure or non-success HTTP status.
    #[error("HTTP transport error: {0}")]
    Transport(String),

    /// The venue answered with a non-zero return code.
    #[error("exchange rejected {endpoint}: code {code}: {message}")]
    Api {
        endpoint: String,
        code: i64,
        message: String,
    },

    /// A response row lacked a field or carried an unparsable value.
    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },

    /// The venue has no data for the requested instrument.
    #[error("unknown instrument {0}")]
    UnknownSymbol(String),
}

impl ExchangeError {
    /// Whether a retry at the call site can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ExchangeError::Transport(_) => true,
            // 10006: rate limit, 10016: internal server error
            ExchangeError::Api { code, .. } => matches!(code, 10006 | 10016),
            ExchangeError::Malformed { .. } | ExchangeError::UnknownSymbol(_) => false,
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        ExchangeError::Transport(err.to_string())
    }
}
