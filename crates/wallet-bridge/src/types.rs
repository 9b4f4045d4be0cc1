//! Wire types exchanged with the embedded script host.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{BridgeError, map_host_error};

pub const INVOKE_MESSAGE_TYPE: &str = "invoke";
pub const INIT_MESSAGE_TYPE: &str = "init";
pub const INIT_ACK_METHOD: &str = "init";

/// Host methods the client layer issues.
pub const SUPPORTED_BRIDGE_METHODS: &[&str] = &[
    "getWebChallenge",
    "verifyWebChallenge",
    "loginWithPasskey",
    "generatePasskey",
    "signUpOrLogIn",
    "verifyNewAccount",
    "resendVerificationCode",
    "presentPasswordUrl",
    "getOAuthUrl",
    "verifyOAuth",
    "loginExternalWallet",
    "isSessionActive",
    "isFullyLoggedIn",
    "logout",
    "getCurrentSessionDetails",
    "fetchWallets",
    "createWallet",
    "loadExtraKeyshares",
    "signMessage",
];

/// Correlation token pairing one outbound call with its inbound response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeMessage<'a> {
    pub message_type: &'static str,
    pub method_name: &'a str,
    pub arguments: &'a Value,
    pub request_id: &'a RequestId,
}

impl<'a> InvokeMessage<'a> {
    pub fn new(method_name: &'a str, arguments: &'a Value, request_id: &'a RequestId) -> Self {
        Self {
            message_type: INVOKE_MESSAGE_TYPE,
            method_name,
            arguments,
            request_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitArguments {
    pub environment: String,
    pub api_key: String,
    pub platform: String,
    pub package: String,
    pub is_passkey_supported: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitMessage<'a> {
    pub message_type: &'static str,
    pub arguments: &'a InitArguments,
}

impl<'a> InitMessage<'a> {
    pub fn new(arguments: &'a InitArguments) -> Self {
        Self {
            message_type: INIT_MESSAGE_TYPE,
            arguments,
        }
    }
}

/// Any frame posted by the host. Which fields are present decides the frame kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMessage {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub request_id: Option<RequestId>,
    #[serde(default)]
    pub response_data: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug)]
pub enum InboundFrame {
    InitAck,
    Response {
        request_id: RequestId,
        method: Option<String>,
        outcome: Result<Value, BridgeError>,
    },
    Unrecognized {
        method: Option<String>,
    },
}

impl HostMessage {
    pub fn into_frame(self) -> InboundFrame {
        let Some(request_id) = self.request_id else {
            return if self.method.as_deref() == Some(INIT_ACK_METHOD) {
                InboundFrame::InitAck
            } else {
                InboundFrame::Unrecognized {
                    method: self.method,
                }
            };
        };

        let outcome = match self.error {
            Some(error) if !error.is_null() => Err(map_host_error(&error)),
            _ => Ok(self.response_data.unwrap_or(Value::Null)),
        };

        InboundFrame::Response {
            request_id,
            method: self.method,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(value: Value) -> InboundFrame {
        match serde_json::from_value::<HostMessage>(value) {
            Ok(message) => message.into_frame(),
            Err(err) => panic!("host message should decode: {err}"),
        }
    }

    #[test]
    fn invoke_message_uses_camel_case_envelope() {
        let id = RequestId::from("r1");
        let arguments = json!({"auth": {"email": "a@b.com"}});
        let value = serde_json::to_value(InvokeMessage::new("signUpOrLogIn", &arguments, &id))
            .unwrap_or_default();

        assert_eq!(
            value,
            json!({
                "messageType": "invoke",
                "methodName": "signUpOrLogIn",
                "arguments": {"auth": {"email": "a@b.com"}},
                "requestId": "r1"
            })
        );
    }

    #[test]
    fn init_ack_has_no_request_id() {
        assert!(matches!(frame(json!({"method": "init"})), InboundFrame::InitAck));
        assert!(matches!(
            frame(json!({"method": "somethingElse"})),
            InboundFrame::Unrecognized { .. }
        ));
    }

    #[test]
    fn response_with_null_error_is_success() {
        let InboundFrame::Response {
            request_id,
            outcome,
            ..
        } = frame(json!({
            "method": "isSessionActive",
            "requestId": "r9",
            "responseData": true,
            "error": null
        }))
        else {
            panic!("expected response frame");
        };

        assert_eq!(request_id.as_str(), "r9");
        assert_eq!(outcome, Ok(Value::Bool(true)));
    }

    #[test]
    fn response_with_error_is_mapped() {
        let InboundFrame::Response { outcome, .. } = frame(json!({
            "method": "verifyNewAccount",
            "requestId": "r2",
            "responseData": null,
            "error": {"code": "INVALID_VERIFICATION_CODE", "message": "nope"}
        })) else {
            panic!("expected response frame");
        };

        assert!(matches!(outcome, Err(BridgeError::AuthenticationFailed(_))));
    }

    #[test]
    fn generated_ids_are_distinct() {
        let ids: std::collections::HashSet<RequestId> =
            (0..512).map(|_| RequestId::generate()).collect();
        assert_eq!(ids.len(), 512);
    }
}
