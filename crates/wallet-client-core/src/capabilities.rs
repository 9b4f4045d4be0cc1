//! Native platform capabilities the auth flows delegate to.
//!
//! Each capability is implemented by the embedding app (platform
//! authenticator, system web-auth sheet, external wallet app). Results are
//! fed back into the stage machine; none of these talk to the script host.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use wallet_bridge::BridgeError;

use crate::auth::ChainKind;
use crate::error::AuthError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("cancelled by the user")]
    Cancelled,
    #[error("not supported on this device")]
    Unsupported,
    #[error("{0}")]
    Failed(String),
}

impl CapabilityError {
    pub(crate) fn into_auth_error(self, capability: &'static str) -> AuthError {
        match self {
            Self::Unsupported => AuthError::Bridge(BridgeError::NotImplemented(capability.to_string())),
            other => AuthError::Capability {
                capability,
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyRegistrationRequest {
    pub relying_party: String,
    pub user_id: String,
    pub user_name: String,
    pub challenge: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyRegistration {
    pub credential_id: String,
    pub attestation_object: String,
    pub client_data_json: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyAssertionRequest {
    pub relying_party: String,
    pub challenge: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_credentials: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyAssertion {
    pub credential_id: String,
    pub authenticator_data: String,
    pub client_data_json: String,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>,
}

#[async_trait]
pub trait PasskeyAuthenticator: Send + Sync {
    async fn create_credential(
        &self,
        request: PasskeyRegistrationRequest,
    ) -> Result<PasskeyRegistration, CapabilityError>;

    async fn sign_challenge(
        &self,
        request: PasskeyAssertionRequest,
    ) -> Result<PasskeyAssertion, CapabilityError>;
}

/// System browser sheet that follows `url` until it redirects to
/// `callback_scheme`, returning the final callback URL.
#[async_trait]
pub trait WebAuthSession: Send + Sync {
    async fn authenticate(&self, url: &Url, callback_scheme: &str) -> Result<Url, CapabilityError>;
}

#[async_trait]
pub trait ExternalWalletSigner: Send + Sync {
    /// Returns the wallet's signature over `message`.
    async fn sign_message(
        &self,
        address: &str,
        chain: ChainKind,
        message: &str,
    ) -> Result<String, CapabilityError>;
}
