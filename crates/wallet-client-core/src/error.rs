use thiserror::Error;
use wallet_bridge::{BridgeError, ErrorCategory};

use crate::auth::AuthInputError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("{capability} failed: {message}")]
    Capability {
        capability: &'static str,
        message: String,
    },
    #[error("no {purpose} method is available for this account")]
    NoMethodAvailable { purpose: &'static str },
    /// The host answered, but its session is not fully logged in.
    #[error("`{method}` finished without a completed login")]
    LoginIncomplete { method: &'static str },
    #[error(transparent)]
    InvalidInput(#[from] AuthInputError),
}

impl AuthError {
    pub fn bridge(&self) -> Option<&BridgeError> {
        match self {
            Self::Bridge(error) => Some(error),
            _ => None,
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.bridge().map(BridgeError::category)
    }

    pub fn is_retryable(&self) -> bool {
        self.bridge().is_some_and(BridgeError::is_retryable)
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Bridge(error) => error.user_message(),
            other => other.to_string(),
        }
    }
}
