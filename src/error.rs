//! Error types for the REST client

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced to the caller of any request, batch or graph operation.
///
/// Cloneable so a single batch-level failure can be handed to every request
/// that was waiting on it.
#[derive(Error, Debug, Clone)]
pub enum RestError {
    /// The HTTP call itself could not be completed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered outside the success range (status > 204)
    #[error("API error ({}): {message}", status.map(|s| s.to_string()).unwrap_or_else(|| "no status".to_string()))]
    Api {
        status: Option<u16>,
        message: String,
        exception: Option<String>,
        fullname: Option<String>,
        body: Option<Value>,
    },

    /// A response body could not be parsed or decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// A call shape the argument resolver could not reconcile
    #[error("Invalid arguments: {0}")]
    Argument(String),

    /// Resolution of an endpoint name that was never populated
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Bootstrap against the root URL failed
    #[error("Connection error: {0}")]
    Connect(String),

    /// The completion for this request was dropped without firing
    #[error("Request abandoned before completion")]
    Abandoned,
}

pub type RestResult<T> = Result<T, RestError>;

impl RestError {
    /// Build an API error from a status code and an optional structured body.
    ///
    /// The server's error documents carry `message`, `exception` and
    /// `fullname`; any of them may be missing.
    pub fn api(status: Option<u16>, body: Option<Value>, fallback: &str) -> Self {
        let field = |name: &str| {
            body.as_ref()
                .and_then(|b| b.get(name))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        RestError::Api {
            status,
            message: field("message").unwrap_or_else(|| fallback.to_string()),
            exception: field("exception"),
            fullname: field("fullname"),
            body,
        }
    }

    /// Status code of an API error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            RestError::Api { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RestError {
    fn from(e: reqwest::Error) -> Self {
        RestError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for RestError {
    fn from(e: serde_json::Error) -> Self {
        RestError::Decode(e.to_string())
    }
}
