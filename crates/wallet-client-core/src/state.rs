//! Auth stages, the per-stage state snapshot, and login/signup method choice.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use wallet_bridge::BridgeError;

use crate::auth::{ExternalWalletInfo, Identity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStage {
    Verify,
    Signup,
    Login,
    Done,
}

impl AuthStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::Signup => "signup",
            Self::Login => "login",
            Self::Done => "done",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "verify" => Some(Self::Verify),
            "signup" => Some(Self::Signup),
            "login" => Some(Self::Login),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    /// Legal moves within one identity flow: `verify -> signup -> done` and
    /// `login -> done`. A fresh flow may open on any stage.
    pub fn can_follow(previous: Option<Self>, next: Self) -> bool {
        match previous {
            None => true,
            Some(Self::Verify) => next == Self::Signup,
            Some(Self::Signup | Self::Login) => next == Self::Done,
            Some(Self::Done) => false,
        }
    }
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiometricHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aaguid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayMetadata {
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

/// Immutable snapshot for one auth stage. A new one is produced per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    pub stage: AuthStage,
    pub user_id: String,
    pub identity: Option<Identity>,
    pub display: DisplayMetadata,
    pub passkey_url: Option<String>,
    pub passkey_id: Option<String>,
    pub password_url: Option<String>,
    pub passkey_known_device_url: Option<String>,
    pub biometric_hints: Vec<BiometricHint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    Passkey,
    Password,
}

impl AuthState {
    pub fn has_passkey_option(&self) -> bool {
        self.passkey_url.is_some() || self.passkey_id.is_some() || self.passkey_known_device_url.is_some()
    }

    pub fn has_password_option(&self) -> bool {
        self.password_url.is_some()
    }

    /// Decodes a stage-tagged host payload. `stage` and `userId` are
    /// required; everything else is optional.
    pub fn from_response(method: &str, value: Value) -> Result<Self, BridgeError> {
        let wire: AuthStateWire =
            serde_json::from_value(value).map_err(|err| BridgeError::malformed(method, err))?;

        let stage_raw = wire
            .stage
            .ok_or_else(|| BridgeError::malformed(method, "missing `stage`"))?;
        let stage = AuthStage::parse(&stage_raw)
            .ok_or_else(|| BridgeError::malformed(method, format!("unknown stage `{stage_raw}`")))?;
        let user_id = wire
            .user_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BridgeError::malformed(method, "missing `userId`"))?;

        let identity = Identity::from_wire(
            wire.email.as_deref(),
            wire.phone.as_deref(),
            wire.external_wallet.as_ref(),
        );

        Ok(Self {
            stage,
            user_id,
            identity,
            display: DisplayMetadata {
                display_name: non_empty(wire.display_name),
                username: non_empty(wire.username),
                avatar_url: non_empty(wire.pfp_url),
            },
            passkey_url: non_empty(wire.passkey_url),
            passkey_id: non_empty(wire.passkey_id),
            password_url: non_empty(wire.password_url),
            passkey_known_device_url: non_empty(wire.passkey_known_device_url),
            biometric_hints: wire.biometric_hints.unwrap_or_default(),
        })
    }

    pub fn expect_stage(&self, allowed: &[AuthStage]) -> Result<(), BridgeError> {
        if allowed.contains(&self.stage) {
            return Ok(());
        }
        let expected = allowed
            .iter()
            .map(|stage| stage.as_str())
            .collect::<Vec<_>>()
            .join("|");
        Err(BridgeError::unexpected_stage(expected, self.stage))
    }
}

/// Passkeys win whenever offered; password is the fallback.
pub fn determine_preferred_login_method(state: &AuthState) -> Option<AuthMethod> {
    preferred_method(state)
}

pub fn determine_preferred_signup_method(state: &AuthState) -> Option<AuthMethod> {
    preferred_method(state)
}

fn preferred_method(state: &AuthState) -> Option<AuthMethod> {
    if state.has_passkey_option() {
        Some(AuthMethod::Passkey)
    } else if state.has_password_option() {
        Some(AuthMethod::Password)
    } else {
        None
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

// `externalWalletInfo`, `pfp` and `biometricsHints` are older host spellings.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthStateWire {
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default, alias = "externalWalletInfo")]
    external_wallet: Option<ExternalWalletInfo>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default, alias = "pfp")]
    pfp_url: Option<String>,
    #[serde(default)]
    passkey_url: Option<String>,
    #[serde(default)]
    passkey_id: Option<String>,
    #[serde(default)]
    password_url: Option<String>,
    #[serde(default)]
    passkey_known_device_url: Option<String>,
    #[serde(default, alias = "biometricsHints")]
    biometric_hints: Option<Vec<BiometricHint>>,
}
