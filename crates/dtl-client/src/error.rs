//! Error types for dtl-client

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid authority: {message}")]
    InvalidAuthority { message: String },

    #[error("authority validation failed: {message}")]
    AuthorityValidation { message: String },

    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    #[error("gave up after {attempts} polling attempt(s) without a result")]
    RetryExhausted { attempts: u64 },

    #[error("deployment could not be created: {message}")]
    DeploymentSubmission { message: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("operation did not finish within {}s", .elapsed.as_secs())]
    PollTimeout { elapsed: Duration },

    #[error("operation cancelled")]
    Cancelled,

    #[error("authentication failed: {message}")]
    Auth { message: String },

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("{0}")]
    Other(String),
}

impl ClientError {
    pub fn invalid_authority(msg: impl Into<String>) -> Self {
        Self::InvalidAuthority {
            message: msg.into(),
        }
    }

    pub fn authority_validation(msg: impl Into<String>) -> Self {
        Self::AuthorityValidation {
            message: msg.into(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: msg.into(),
        }
    }

    pub fn submission(msg: impl Into<String>) -> Self {
        Self::DeploymentSubmission {
            message: msg.into(),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: msg.into(),
        }
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth {
            message: msg.into(),
        }
    }

    pub fn api(status: u16, msg: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound {
            message: msg.into(),
        }
    }
}
