use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::http_client::SimpleHttpResponse;

/// Category an error falls into, used for logging and for deciding who
/// handles it (the core, the host view, or nobody).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// First 401 of a request. Recovered locally, never surfaced to callers.
    TransientAuth,
    /// Renewal failed or the replay was rejected again
    TerminalAuth,
    /// Network, DNS, or timeout failures unrelated to auth status
    Transport,
    /// Liveness probe failures
    Health,
    /// Persisted local state could not be read or written
    Storage,
    /// Invalid configuration values
    Configuration,
    /// A response body or header could not be decoded
    Decode,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::TransientAuth => "transient_auth",
            ErrorCategory::TerminalAuth => "terminal_auth",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Health => "health",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Decode => "decode",
        };
        write!(f, "{}", name)
    }
}

/// Errors surfaced by the session core
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// The request ended with a 401 after the renewal path was exhausted.
    /// `response` is the 401 the caller receives; `renewed` tells whether a
    /// new token was obtained before the replay was rejected.
    #[error("request to {url} was rejected as unauthorized")]
    Unauthorized {
        url: String,
        response: SimpleHttpResponse,
        renewed: bool,
    },

    #[error("token renewal failed: {reason}")]
    RenewalFailed { reason: String },

    #[error("login was rejected with status {status}: {message}")]
    LoginRejected { status: u16, message: String },

    #[error("transport error calling {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("response from {url} is missing the `{header}` header")]
    MissingHeader { url: String, header: String },

    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("health check failed: {reason}")]
    HealthCheckFailed { reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration for '{key}': {reason}")]
    Config { key: String, reason: String },
}

impl ClientError {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::Unauthorized { .. }
            | ClientError::RenewalFailed { .. }
            | ClientError::LoginRejected { .. } => ErrorCategory::TerminalAuth,
            ClientError::Transport { .. } | ClientError::UnexpectedStatus { .. } => {
                ErrorCategory::Transport
            }
            ClientError::MissingHeader { .. } | ClientError::Decode { .. } => {
                ErrorCategory::Decode
            }
            ClientError::HealthCheckFailed { .. } => ErrorCategory::Health,
            ClientError::Storage(_) => ErrorCategory::Storage,
            ClientError::Config { .. } => ErrorCategory::Configuration,
        }
    }

    /// True when the host view should send the user to the login page
    pub fn requires_login(&self) -> bool {
        self.category() == ErrorCategory::TerminalAuth
    }

    /// Status code of the final response, when there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Unauthorized { response, .. } => Some(response.status()),
            ClientError::LoginRejected { status, .. }
            | ClientError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Type alias for results produced by the session core
pub type ClientResult<T> = Result<T, ClientError>;

/// Helper functions for creating common errors
pub mod errors {
    use super::*;

    pub fn transport(url: impl Into<String>, reason: impl fmt::Display) -> ClientError {
        ClientError::Transport {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(url: impl Into<String>, reason: impl fmt::Display) -> ClientError {
        ClientError::Decode {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn storage(reason: impl fmt::Display) -> ClientError {
        ClientError::Storage(reason.to_string())
    }

    pub fn config_invalid(key: impl Into<String>, reason: impl fmt::Display) -> ClientError {
        ClientError::Config {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}
