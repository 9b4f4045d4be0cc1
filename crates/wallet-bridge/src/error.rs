//! Bridge error taxonomy and the host error mapper.
//!
//! Host failures arrive either as a structured object
//! (`{"code", "message", "userMessage", "retryable", "context"}`) or, from
//! older host builds, as a bare string. Structured payloads are classified
//! through an explicit code table first; only unrecognized codes fall back to
//! inspecting the reported operation name.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Coarse grouping used by telemetry to separate "host is down" from
/// "host answered something we don't understand".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Transport,
    Host,
    Protocol,
    Unsupported,
}

impl ErrorCategory {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Host => "host",
            Self::Protocol => "protocol",
            Self::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostErrorKind {
    Authentication,
    Wallet,
    Signing,
    Network,
    Unclassified,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostErrorContext {
    #[serde(default, deserialize_with = "null_as_default")]
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// A host failure carrying a machine-readable code and enough context to
/// render a message without string parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredHostError {
    pub kind: HostErrorKind,
    pub code: String,
    pub message: String,
    pub user_message: Option<String>,
    pub retryable: bool,
    pub context: HostErrorContext,
}

impl StructuredHostError {
    /// User-facing text, falling back to the technical message.
    pub fn display_message(&self) -> &str {
        self.user_message
            .as_deref()
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .unwrap_or(&self.message)
    }
}

impl fmt::Display for StructuredHostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.message, self.code)?;
        if !self.context.operation.is_empty() {
            write!(f, " during {}", self.context.operation)?;
        }
        if let Some(chain_id) = &self.context.chain_id {
            write!(f, " on chain {chain_id}")?;
        }
        if let Some(wallet_type) = &self.context.wallet_type {
            write!(f, " ({wallet_type} wallet)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("bridge host is not ready")]
    NotReady,
    #[error("bridge call `{method}` timed out after {}ms", timeout.as_millis())]
    Timeout { method: String, timeout: Duration },
    #[error("invalid bridge call arguments: {0}")]
    InvalidArguments(String),
    #[error("bridge message delivery failed: {0}")]
    Delivery(String),
    #[error("bridge host connection closed")]
    HostClosed,
    #[error("authentication failed: {0}")]
    AuthenticationFailed(StructuredHostError),
    #[error("wallet operation failed: {0}")]
    WalletOperationFailed(StructuredHostError),
    #[error("signing failed: {0}")]
    SigningFailed(StructuredHostError),
    #[error("network request failed: {0}")]
    NetworkFailed(StructuredHostError),
    #[error("bridge host error: {0}")]
    Structured(StructuredHostError),
    /// Bare string error from host builds that predate structured errors.
    #[error("bridge host error: {0}")]
    UnstructuredBridgeFailure(String),
    #[error("unexpected auth stage: expected {expected}, got {actual}")]
    UnexpectedStage { expected: String, actual: String },
    #[error("malformed `{method}` response: {detail}")]
    MalformedResponse { method: String, detail: String },
    #[error("{0} is not supported on this platform")]
    NotImplemented(String),
}

impl BridgeError {
    pub fn unexpected_stage(expected: impl Into<String>, actual: impl fmt::Display) -> Self {
        Self::UnexpectedStage {
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }

    pub fn malformed(method: &str, detail: impl fmt::Display) -> Self {
        Self::MalformedResponse {
            method: method.to_string(),
            detail: detail.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotReady
            | Self::Timeout { .. }
            | Self::InvalidArguments(_)
            | Self::Delivery(_)
            | Self::HostClosed => ErrorCategory::Transport,
            Self::AuthenticationFailed(_)
            | Self::WalletOperationFailed(_)
            | Self::SigningFailed(_)
            | Self::NetworkFailed(_)
            | Self::Structured(_)
            | Self::UnstructuredBridgeFailure(_) => ErrorCategory::Host,
            Self::UnexpectedStage { .. } | Self::MalformedResponse { .. } => {
                ErrorCategory::Protocol
            }
            Self::NotImplemented(_) => ErrorCategory::Unsupported,
        }
    }

    pub fn host_error(&self) -> Option<&StructuredHostError> {
        match self {
            Self::AuthenticationFailed(error)
            | Self::WalletOperationFailed(error)
            | Self::SigningFailed(error)
            | Self::NetworkFailed(error)
            | Self::Structured(error) => Some(error),
            _ => None,
        }
    }

    /// Host-provided retry hint. Nothing in this crate acts on it.
    pub fn is_retryable(&self) -> bool {
        self.host_error().is_some_and(|error| error.retryable)
    }

    pub fn technical_message(&self) -> String {
        self.to_string()
    }

    pub fn user_message(&self) -> String {
        match self.host_error() {
            Some(error) => error.display_message().to_string(),
            None => self.technical_message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DeliveryError(pub String);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostErrorPayload {
    #[serde(default, deserialize_with = "null_as_default")]
    code: String,
    #[serde(default, deserialize_with = "null_as_default")]
    message: String,
    #[serde(default)]
    user_message: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    retryable: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    context: HostErrorContext,
}

// Hosts send `null` for absent fields as often as they omit them.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

const UNKNOWN_HOST_ERROR: &str = "unknown bridge error";

/// Maps the `error` field of a host response into the bridge taxonomy.
pub fn map_host_error(error: &Value) -> BridgeError {
    match error {
        Value::String(message) if message.trim().is_empty() => {
            BridgeError::UnstructuredBridgeFailure(UNKNOWN_HOST_ERROR.to_string())
        }
        Value::String(message) => BridgeError::UnstructuredBridgeFailure(message.clone()),
        Value::Object(_) => match serde_json::from_value::<HostErrorPayload>(error.clone()) {
            Ok(payload) if !payload.code.trim().is_empty() => classify(payload),
            Ok(payload) if !payload.message.trim().is_empty() => {
                BridgeError::UnstructuredBridgeFailure(payload.message)
            }
            _ => BridgeError::UnstructuredBridgeFailure(error.to_string()),
        },
        other => BridgeError::UnstructuredBridgeFailure(other.to_string()),
    }
}

fn classify(payload: HostErrorPayload) -> BridgeError {
    let kind = kind_for_code(&payload.code)
        .or_else(|| kind_for_operation(&payload.context.operation))
        .unwrap_or(HostErrorKind::Unclassified);
    let message = if payload.message.trim().is_empty() {
        payload.code.clone()
    } else {
        payload.message
    };
    let error = StructuredHostError {
        kind,
        code: payload.code,
        message,
        user_message: payload.user_message,
        retryable: payload.retryable,
        context: payload.context,
    };

    match kind {
        HostErrorKind::Authentication => BridgeError::AuthenticationFailed(error),
        HostErrorKind::Wallet => BridgeError::WalletOperationFailed(error),
        HostErrorKind::Signing => BridgeError::SigningFailed(error),
        HostErrorKind::Network => BridgeError::NetworkFailed(error),
        HostErrorKind::Unclassified => BridgeError::Structured(error),
    }
}

pub fn kind_for_code(code: &str) -> Option<HostErrorKind> {
    match code.trim().to_ascii_uppercase().as_str() {
        "AUTH_FAILED"
        | "AUTHENTICATION_FAILED"
        | "INVALID_CREDENTIALS"
        | "INVALID_VERIFICATION_CODE"
        | "VERIFICATION_CODE_EXPIRED"
        | "SESSION_EXPIRED"
        | "SESSION_NOT_FOUND"
        | "USER_NOT_FOUND"
        | "PASSKEY_FAILED"
        | "OAUTH_FAILED" => Some(HostErrorKind::Authentication),
        "WALLET_NOT_FOUND"
        | "WALLET_CREATION_FAILED"
        | "WALLET_ALREADY_EXISTS"
        | "KEYSHARE_NOT_FOUND"
        | "KEYSHARE_LOAD_FAILED"
        | "INSUFFICIENT_FUNDS" => Some(HostErrorKind::Wallet),
        "SIGNING_FAILED"
        | "SIGNATURE_REJECTED"
        | "USER_REJECTED"
        | "TRANSACTION_REJECTED"
        | "INVALID_TRANSACTION" => Some(HostErrorKind::Signing),
        "NETWORK_ERROR" | "RPC_ERROR" | "REQUEST_TIMEOUT" | "RATE_LIMITED"
        | "SERVICE_UNAVAILABLE" => Some(HostErrorKind::Network),
        _ => None,
    }
}

fn kind_for_operation(operation: &str) -> Option<HostErrorKind> {
    let operation = operation.to_ascii_lowercase();
    if operation.contains("auth") {
        Some(HostErrorKind::Authentication)
    } else if operation.contains("wallet") {
        Some(HostErrorKind::Wallet)
    } else if operation.contains("sign") {
        Some(HostErrorKind::Signing)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_string_maps_to_unstructured_failure() {
        let error = map_host_error(&json!("session not found"));
        assert_eq!(
            error,
            BridgeError::UnstructuredBridgeFailure("session not found".to_string())
        );
        assert_eq!(error.category(), ErrorCategory::Host);
        assert!(!error.is_retryable());
    }

    #[test]
    fn known_code_wins_over_operation_hint() {
        let error = map_host_error(&json!({
            "code": "NETWORK_ERROR",
            "message": "rpc unreachable",
            "retryable": true,
            "context": {"operation": "createWallet", "chainId": "1", "walletType": "EVM"}
        }));

        let BridgeError::NetworkFailed(inner) = &error else {
            panic!("expected network failure, got {error:?}");
        };
        assert_eq!(inner.context.chain_id.as_deref(), Some("1"));
        assert_eq!(inner.context.wallet_type.as_deref(), Some("EVM"));
        assert!(error.is_retryable());
    }

    #[test]
    fn unknown_code_falls_back_to_operation_name() {
        let wallet = map_host_error(&json!({
            "code": "E_WHATEVER",
            "message": "boom",
            "context": {"operation": "fetchWallets"}
        }));
        assert!(matches!(wallet, BridgeError::WalletOperationFailed(_)));

        let signing = map_host_error(&json!({
            "code": "E_WHATEVER",
            "message": "boom",
            "context": {"operation": "signTransaction"}
        }));
        assert!(matches!(signing, BridgeError::SigningFailed(_)));

        let other = map_host_error(&json!({
            "code": "E_WHATEVER",
            "message": "boom",
            "context": {"operation": "getBalance"}
        }));
        assert!(matches!(other, BridgeError::Structured(_)));
    }

    #[test]
    fn user_message_falls_back_to_technical_message() {
        let with_user_message = map_host_error(&json!({
            "code": "INVALID_VERIFICATION_CODE",
            "message": "code mismatch",
            "userMessage": "That code didn't work."
        }));
        assert_eq!(with_user_message.user_message(), "That code didn't work.");

        let without = map_host_error(&json!({
            "code": "INVALID_VERIFICATION_CODE",
            "message": "code mismatch",
            "userMessage": "  "
        }));
        assert_eq!(without.user_message(), "code mismatch");

        let timeout = BridgeError::Timeout {
            method: "fetchWallets".to_string(),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(
            timeout.user_message(),
            "bridge call `fetchWallets` timed out after 250ms"
        );
    }

    #[test]
    fn object_without_code_degrades_to_unstructured() {
        let error = map_host_error(&json!({"message": "legacy object"}));
        assert_eq!(
            error,
            BridgeError::UnstructuredBridgeFailure("legacy object".to_string())
        );

        let empty = map_host_error(&json!(""));
        assert_eq!(
            empty,
            BridgeError::UnstructuredBridgeFailure(UNKNOWN_HOST_ERROR.to_string())
        );
    }

    #[test]
    fn null_fields_keep_the_structured_classification() {
        let error = map_host_error(&json!({
            "code": "WALLET_NOT_FOUND",
            "message": "gone",
            "userMessage": "Wallet missing",
            "retryable": null,
            "context": null
        }));
        let BridgeError::WalletOperationFailed(inner) = &error else {
            panic!("expected wallet failure, got {error:?}");
        };
        assert_eq!(inner.context, HostErrorContext::default());
        assert!(!error.is_retryable());
        assert_eq!(error.user_message(), "Wallet missing");

        let null_operation = map_host_error(&json!({
            "code": "E_WHATEVER",
            "message": null,
            "context": {"operation": null, "chainId": "137"}
        }));
        let BridgeError::Structured(inner) = &null_operation else {
            panic!("expected structured error, got {null_operation:?}");
        };
        assert_eq!(inner.message, "E_WHATEVER");
        assert_eq!(inner.context.chain_id.as_deref(), Some("137"));
    }

    #[test]
    fn protocol_errors_are_distinct_from_transport_errors() {
        assert_eq!(
            BridgeError::unexpected_stage("signup", "login").category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            BridgeError::malformed("verifyOAuth", "missing stage").category(),
            ErrorCategory::Protocol
        );
        assert_eq!(BridgeError::NotReady.category(), ErrorCategory::Transport);
        assert_eq!(
            BridgeError::NotImplemented("passkeys".to_string()).category(),
            ErrorCategory::Unsupported
        );
    }
}
