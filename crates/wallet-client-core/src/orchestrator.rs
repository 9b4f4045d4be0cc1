//! Auth protocol over the bridge transport.
//!
//! Every operation is a named host call whose stage-tagged result is decoded
//! into an [`AuthState`], checked against the current flow, and applied to
//! the [`SessionController`].

use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;
use wallet_bridge::{BridgeError, BridgeTransport, Environment, ErrorCategory, RequestId};

use crate::auth::{ChainKind, ExternalWalletInfo, Identity, normalize_verification_code};
use crate::capabilities::{
    ExternalWalletSigner, PasskeyAssertion, PasskeyAssertionRequest, PasskeyAuthenticator,
    PasskeyRegistration, PasskeyRegistrationRequest, WebAuthSession,
};
use crate::error::AuthError;
use crate::session::{SessionController, SessionDetails, SessionState, SessionStore, Wallet};
use crate::state::{
    AuthMethod, AuthStage, AuthState, determine_preferred_login_method,
    determine_preferred_signup_method,
};
use crate::telemetry::{ErrorReport, ErrorReporter};

/// Callback scheme the host uses to signal completion of a hosted page
/// without a literal redirect back into the app.
pub const NATIVE_CALLBACK_SCHEME: &str = "walletbridge-native";

const PASSKEY_CAPABILITY: &str = "passkey authenticator";
const WEB_AUTH_CAPABILITY: &str = "web auth session";
const WALLET_SIGNER_CAPABILITY: &str = "external wallet signer";

const ALL_STAGES: [AuthStage; 4] = [
    AuthStage::Verify,
    AuthStage::Signup,
    AuthStage::Login,
    AuthStage::Done,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    /// Passed to the platform authenticator.
    pub relying_party: String,
    /// Redirect scheme registered by the app for web-auth callbacks.
    pub app_scheme: String,
    pub host_url: String,
}

impl AuthSettings {
    pub fn for_environment(environment: &Environment, app_scheme: impl Into<String>) -> Self {
        Self {
            relying_party: environment.relying_party().to_string(),
            app_scheme: app_scheme.into(),
            host_url: environment.host_url().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebChallenge {
    challenge: String,
    #[serde(default)]
    allow_credentials: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VerifiedChallenge {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UrlResponse {
    Bare(String),
    Wrapped {
        #[serde(alias = "oauthUrl", alias = "passwordUrl")]
        url: String,
    },
}

impl UrlResponse {
    fn into_inner(self) -> String {
        match self {
            Self::Bare(url) | Self::Wrapped { url } => url,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WalletsResponse {
    List(Vec<Wallet>),
    Wrapped { wallets: Vec<Wallet> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignatureResponse {
    Bare(String),
    Wrapped { signature: String },
}

pub struct AuthOrchestrator {
    transport: BridgeTransport,
    settings: AuthSettings,
    session: Arc<SessionController>,
    flow: Mutex<Option<AuthState>>,
    keyshare_priming: tokio::sync::Mutex<()>,
    passkeys: Option<Arc<dyn PasskeyAuthenticator>>,
    web_auth: Option<Arc<dyn WebAuthSession>>,
    wallet_signer: Option<Arc<dyn ExternalWalletSigner>>,
    store: Option<Arc<dyn SessionStore>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
}

impl AuthOrchestrator {
    pub fn new(transport: BridgeTransport, settings: AuthSettings) -> Self {
        Self {
            transport,
            settings,
            session: Arc::new(SessionController::new()),
            flow: Mutex::new(None),
            keyshare_priming: tokio::sync::Mutex::new(()),
            passkeys: None,
            web_auth: None,
            wallet_signer: None,
            store: None,
            reporter: None,
        }
    }

    #[must_use]
    pub fn with_passkey_authenticator(mut self, authenticator: Arc<dyn PasskeyAuthenticator>) -> Self {
        self.passkeys = Some(authenticator);
        self
    }

    #[must_use]
    pub fn with_web_auth_session(mut self, web_auth: Arc<dyn WebAuthSession>) -> Self {
        self.web_auth = Some(web_auth);
        self
    }

    #[must_use]
    pub fn with_external_wallet_signer(mut self, signer: Arc<dyn ExternalWalletSigner>) -> Self {
        self.wallet_signer = Some(signer);
        self
    }

    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    pub fn transport(&self) -> &BridgeTransport {
        &self.transport
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Latest state of the flow in progress, if any.
    pub fn current_auth_state(&self) -> Option<AuthState> {
        self.flow.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn preferred_login_method(&self) -> Result<AuthMethod, AuthError> {
        self.current_auth_state()
            .as_ref()
            .and_then(determine_preferred_login_method)
            .ok_or(AuthError::NoMethodAvailable { purpose: "login" })
    }

    pub fn preferred_signup_method(&self) -> Result<AuthMethod, AuthError> {
        self.current_auth_state()
            .as_ref()
            .and_then(determine_preferred_signup_method)
            .ok_or(AuthError::NoMethodAvailable { purpose: "signup" })
    }

    /// First session check once the host is reachable. A failed wallet
    /// refresh does not demote a live session.
    pub async fn initialize(&self) -> Result<SessionState, AuthError> {
        let active: bool = self.invoke("isSessionActive", &json!({})).await?;
        let next = if !active {
            SessionState::Inactive
        } else if self.invoke::<_, bool>("isFullyLoggedIn", &json!({})).await? {
            SessionState::ActiveLoggedIn
        } else {
            SessionState::Active
        };
        self.session.set(next);
        if next == SessionState::ActiveLoggedIn {
            self.refresh_wallets().await;
        }
        Ok(next)
    }

    pub async fn initiate_auth_flow(&self, identity: &Identity) -> Result<AuthState, AuthError> {
        const METHOD: &str = "signUpOrLogIn";
        self.reset_flow();

        let state = self
            .invoke_state(METHOD, &json!({ "auth": identity.to_wire() }))
            .await?;
        state
            .expect_stage(&[AuthStage::Verify, AuthStage::Login])
            .map_err(|err| self.bridge_failure(METHOD, err))?;
        let state = self.advance(METHOD, state)?;
        self.session.set(SessionState::Active);
        Ok(state)
    }

    pub async fn submit_verification_code(&self, code: &str) -> Result<AuthState, AuthError> {
        const METHOD: &str = "verifyNewAccount";
        let code = normalize_verification_code(code)?;
        self.require_stage(&[AuthStage::Verify])?;

        let state = self
            .invoke_state(METHOD, &json!({ "verificationCode": code }))
            .await?;
        state
            .expect_stage(&[AuthStage::Signup])
            .map_err(|err| self.bridge_failure(METHOD, err))?;
        self.advance(METHOD, state)
    }

    pub async fn resend_verification_code(&self) -> Result<(), AuthError> {
        self.require_stage(&[AuthStage::Verify])?;
        self.invoke::<_, Value>("resendVerificationCode", &json!({}))
            .await?;
        Ok(())
    }

    /// Challenge, platform assertion and login in one step.
    pub async fn login_with_passkey(&self) -> Result<AuthState, AuthError> {
        let state = self.require_stage(&[AuthStage::Login])?;
        if !state.has_passkey_option() {
            return Err(AuthError::NoMethodAvailable {
                purpose: "passkey login",
            });
        }
        let authenticator = self.passkeys()?;

        let challenge: WebChallenge = self.invoke("getWebChallenge", &json!({})).await?;
        let assertion = authenticator
            .sign_challenge(PasskeyAssertionRequest {
                relying_party: self.settings.relying_party.clone(),
                challenge: challenge.challenge,
                allow_credentials: challenge.allow_credentials,
            })
            .await
            .map_err(|err| err.into_auth_error(PASSKEY_CAPABILITY))?;
        self.complete_login_with_passkey(assertion).await
    }

    pub async fn complete_login_with_passkey(
        &self,
        assertion: PasskeyAssertion,
    ) -> Result<AuthState, AuthError> {
        const METHOD: &str = "loginWithPasskey";
        self.require_stage(&[AuthStage::Login])?;

        let verified: VerifiedChallenge = self
            .invoke("verifyWebChallenge", &json!({ "assertion": assertion }))
            .await?;
        let state = self
            .invoke_state(METHOD, &json!({ "token": verified.token }))
            .await?;
        state
            .expect_stage(&[AuthStage::Done])
            .map_err(|err| self.bridge_failure(METHOD, err))?;
        let state = self.advance(METHOD, state)?;
        self.finish_login().await;
        Ok(state)
    }

    /// Creates a platform credential and registers it with the host. The
    /// flow stays in `signup` until a wallet is created.
    pub async fn signup_with_passkey(&self, identifier: &str) -> Result<AuthState, AuthError> {
        let state = self.require_stage(&[AuthStage::Signup])?;
        if !state.has_passkey_option() {
            return Err(AuthError::NoMethodAvailable {
                purpose: "passkey signup",
            });
        }
        let authenticator = self.passkeys()?;

        let challenge: WebChallenge = self.invoke("getWebChallenge", &json!({})).await?;
        let registration = authenticator
            .create_credential(PasskeyRegistrationRequest {
                relying_party: self.settings.relying_party.clone(),
                user_id: state.user_id.clone(),
                user_name: identifier.to_string(),
                challenge: challenge.challenge,
            })
            .await
            .map_err(|err| err.into_auth_error(PASSKEY_CAPABILITY))?;
        let biometrics_id = state
            .passkey_id
            .clone()
            .unwrap_or_else(|| registration.credential_id.clone());
        self.complete_signup_with_passkey(identifier, &biometrics_id, registration)
            .await
    }

    pub async fn complete_signup_with_passkey(
        &self,
        identifier: &str,
        biometrics_id: &str,
        registration: PasskeyRegistration,
    ) -> Result<AuthState, AuthError> {
        let state = self.require_stage(&[AuthStage::Signup])?;
        self.invoke::<_, Value>(
            "generatePasskey",
            &json!({
                "identifier": identifier,
                "biometricsId": biometrics_id,
                "registration": registration,
            }),
        )
        .await?;
        tracing::info!(user_id = %state.user_id, "Passkey registered");
        Ok(state)
    }

    /// Opens the host's password page. A login completes the flow; a signup
    /// stays in `signup` for wallet creation.
    pub async fn present_password_flow(&self) -> Result<AuthState, AuthError> {
        const METHOD: &str = "presentPasswordUrl";
        let state = self.require_stage(&[AuthStage::Login, AuthStage::Signup])?;
        let password_url = state
            .password_url
            .clone()
            .ok_or(AuthError::NoMethodAvailable { purpose: "password" })?;
        let web_auth = self.web_auth()?;

        let launch: UrlResponse = self
            .invoke(
                METHOD,
                &json!({ "passwordUrl": password_url, "appScheme": self.settings.app_scheme }),
            )
            .await?;
        let launch = self.parse_url(METHOD, &launch.into_inner())?;
        let callback = web_auth
            .authenticate(&launch, &self.settings.app_scheme)
            .await
            .map_err(|err| err.into_auth_error(WEB_AUTH_CAPABILITY))?;
        self.check_callback(METHOD, &callback)?;

        if state.stage == AuthStage::Signup {
            return Ok(state);
        }
        let logged_in: bool = self.invoke("isFullyLoggedIn", &json!({})).await?;
        if !logged_in {
            tracing::warn!(method = METHOD, user_id = %state.user_id, "Password page closed without a completed login");
            return Err(AuthError::LoginIncomplete { method: METHOD });
        }
        let mut done = state;
        done.stage = AuthStage::Done;
        let done = self.advance(METHOD, done)?;
        self.finish_login().await;
        Ok(done)
    }

    pub async fn complete_oauth(&self, provider: &str) -> Result<AuthState, AuthError> {
        const METHOD: &str = "verifyOAuth";
        let web_auth = self.web_auth()?;
        self.reset_flow();

        let launch: UrlResponse = self
            .invoke(
                "getOAuthUrl",
                &json!({ "provider": provider, "appScheme": self.settings.app_scheme }),
            )
            .await?;
        let launch = self.parse_url("getOAuthUrl", &launch.into_inner())?;
        let callback = web_auth
            .authenticate(&launch, &self.settings.app_scheme)
            .await
            .map_err(|err| err.into_auth_error(WEB_AUTH_CAPABILITY))?;
        self.check_callback(METHOD, &callback)?;

        let state = self
            .invoke_state(METHOD, &json!({ "callbackUrl": callback.as_str() }))
            .await?;
        state
            .expect_stage(&[AuthStage::Login, AuthStage::Signup, AuthStage::Done])
            .map_err(|err| self.bridge_failure(METHOD, err))?;
        let state = self.advance(METHOD, state)?;
        if state.stage == AuthStage::Done {
            self.finish_login().await;
        } else {
            self.session.set(SessionState::Active);
        }
        Ok(state)
    }

    pub async fn login_external_wallet(
        &self,
        address: &str,
        chain: ChainKind,
    ) -> Result<AuthState, AuthError> {
        const METHOD: &str = "loginExternalWallet";
        let wallet = ExternalWalletInfo::new(address, chain)?;
        let signer = self.wallet_signer()?;
        self.reset_flow();

        let message = verification_message(
            &self.settings.relying_party,
            &wallet.address,
            &RequestId::generate(),
        );
        let signature = signer
            .sign_message(&wallet.address, chain, &message)
            .await
            .map_err(|err| err.into_auth_error(WALLET_SIGNER_CAPABILITY))?;
        self.session.set(SessionState::Active);

        let state = self
            .invoke_state(
                METHOD,
                &json!({
                    "externalWallet": wallet,
                    "message": message,
                    "signature": signature,
                }),
            )
            .await?;
        state
            .expect_stage(&[AuthStage::Login, AuthStage::Done])
            .map_err(|err| self.bridge_failure(METHOD, err))?;
        let state = self.advance(METHOD, state)?;
        if state.stage == AuthStage::Done {
            self.finish_login().await;
        }
        Ok(state)
    }

    /// Completes a signup by creating its first wallet. Logged-in sessions
    /// may create further wallets outside any flow.
    pub async fn create_wallet(&self, kind: ChainKind) -> Result<Wallet, AuthError> {
        const METHOD: &str = "createWallet";
        let flow_stage = self.current_auth_state().map(|state| state.stage);
        let completes_signup = match flow_stage {
            Some(AuthStage::Signup) => true,
            None | Some(AuthStage::Done)
                if self.session.current() == SessionState::ActiveLoggedIn =>
            {
                false
            }
            other => {
                return Err(BridgeError::unexpected_stage(
                    AuthStage::Signup.as_str(),
                    other.map_or("none", AuthStage::as_str),
                )
                .into());
            }
        };

        let wallet: Wallet = self.invoke(METHOD, &json!({ "type": kind })).await?;
        self.session.push_wallet(wallet.clone());
        if completes_signup {
            if let Some(mut state) = self.current_auth_state() {
                state.stage = AuthStage::Done;
                self.advance(METHOD, state)?;
            }
            self.session.set(SessionState::ActiveLoggedIn);
            self.persist_session().await;
        }
        Ok(wallet)
    }

    pub async fn fetch_wallets(&self) -> Result<Vec<Wallet>, AuthError> {
        let response: WalletsResponse = self.invoke("fetchWallets", &json!({})).await?;
        let wallets = match response {
            WalletsResponse::List(wallets) | WalletsResponse::Wrapped { wallets } => wallets,
        };
        self.session.replace_wallets(wallets.clone());
        Ok(wallets)
    }

    pub async fn sign_message(&self, wallet_id: &str, message: &str) -> Result<String, AuthError> {
        self.prime_extra_keyshares().await?;
        let response: SignatureResponse = self
            .invoke("signMessage", &json!({ "walletId": wallet_id, "message": message }))
            .await?;
        Ok(match response {
            SignatureResponse::Bare(signature) | SignatureResponse::Wrapped { signature } => {
                signature
            }
        })
    }

    pub async fn current_session_details(&self) -> Result<SessionDetails, AuthError> {
        self.invoke("getCurrentSessionDetails", &json!({})).await
    }

    /// Ends the session. Local state is cleared even when the host call
    /// fails; an already inactive session skips the host entirely.
    pub async fn logout(&self) -> Result<(), AuthError> {
        if self.session.current() == SessionState::Inactive {
            self.clear_local_session();
            return Ok(());
        }
        let outcome = self.invoke::<_, Value>("logout", &json!({})).await;
        self.clear_local_session();
        outcome.map(|_| ())
    }

    async fn prime_extra_keyshares(&self) -> Result<(), AuthError> {
        if self.session.extra_keyshares_loaded() {
            return Ok(());
        }
        let _priming = self.keyshare_priming.lock().await;
        if self.session.extra_keyshares_loaded() {
            return Ok(());
        }
        let epoch = self.session.session_epoch();
        self.invoke::<_, Value>("loadExtraKeyshares", &json!({}))
            .await?;
        if !self.session.mark_extra_keyshares_loaded(epoch) {
            tracing::debug!("Session reset while keyshares were loading");
        }
        Ok(())
    }

    /// The host has reported `done`: the session is logged in whatever the
    /// wallet refresh yields.
    async fn finish_login(&self) {
        self.session.set(SessionState::ActiveLoggedIn);
        self.refresh_wallets().await;
        self.persist_session().await;
    }

    async fn refresh_wallets(&self) {
        if let Err(err) = self.fetch_wallets().await {
            tracing::warn!(error = %err, cached = self.session.wallets().len(), "Wallet refresh failed; keeping cached wallets");
        }
    }

    async fn persist_session(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        match self.current_session_details().await {
            Ok(details) => {
                if let Err(err) = store.persist(&details) {
                    tracing::warn!(error = %err, "Session details not persisted");
                }
            }
            Err(err) => tracing::warn!(error = %err, "Session details unavailable"),
        }
    }

    fn clear_local_session(&self) {
        self.reset_flow();
        self.session.reset();
        if let Some(store) = &self.store {
            if let Err(err) = store.clear() {
                tracing::warn!(error = %err, "Session store not cleared");
            }
        }
    }

    fn reset_flow(&self) {
        self.flow.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn require_stage(&self, allowed: &[AuthStage]) -> Result<AuthState, AuthError> {
        match self.current_auth_state() {
            Some(state) if allowed.contains(&state.stage) => Ok(state),
            other => Err(BridgeError::unexpected_stage(
                join_stages(allowed),
                other.map_or("none", |state| state.stage.as_str()),
            )
            .into()),
        }
    }

    /// Records `next` as the flow's current state. Re-observing the current
    /// stage is allowed; anything else must be a legal successor.
    fn advance(&self, method: &str, next: AuthState) -> Result<AuthState, AuthError> {
        let rejected = {
            let mut flow = self.flow.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = flow.as_ref().map(|state| state.stage);
            if previous == Some(next.stage) || AuthStage::can_follow(previous, next.stage) {
                *flow = Some(next.clone());
                None
            } else {
                Some(previous)
            }
        };

        if let Some(previous) = rejected {
            let successors = ALL_STAGES
                .into_iter()
                .filter(|stage| AuthStage::can_follow(previous, *stage))
                .collect::<Vec<_>>();
            let expected = if successors.is_empty() {
                "none".to_string()
            } else {
                join_stages(&successors)
            };
            return Err(self.bridge_failure(method, BridgeError::unexpected_stage(expected, next.stage)));
        }

        tracing::info!(method, stage = next.stage.as_str(), user_id = %next.user_id, "Auth stage advanced");
        Ok(next)
    }

    async fn invoke<A, R>(&self, method: &str, arguments: &A) -> Result<R, AuthError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.transport
            .call_as(method, arguments)
            .await
            .map_err(|err| self.bridge_failure(method, err))
    }

    async fn invoke_state<A>(&self, method: &str, arguments: &A) -> Result<AuthState, AuthError>
    where
        A: Serialize + ?Sized,
    {
        let value: Value = self.invoke(method, arguments).await?;
        AuthState::from_response(method, value).map_err(|err| self.bridge_failure(method, err))
    }

    fn bridge_failure(&self, method: &str, error: BridgeError) -> AuthError {
        let category = error.category();
        tracing::warn!(method, category = category.label(), error = %error, "Bridge call failed");
        if error == BridgeError::NotReady {
            self.session.set(SessionState::Inactive);
        }
        if matches!(category, ErrorCategory::Host | ErrorCategory::Protocol) {
            self.report(method, &error);
        }
        AuthError::Bridge(error)
    }

    fn report(&self, method: &str, error: &BridgeError) {
        let Some(reporter) = self.reporter.clone() else {
            return;
        };
        let user_id = self.current_auth_state().map(|state| state.user_id);
        let report = ErrorReport::from_bridge_error(method, error, user_id);
        tokio::spawn(async move {
            if let Err(err) = reporter.report(report).await {
                tracing::debug!(error = %err, "Error report not delivered");
            }
        });
    }

    fn parse_url(&self, method: &str, raw: &str) -> Result<Url, AuthError> {
        Url::parse(raw.trim()).map_err(|err| self.bridge_failure(method, BridgeError::malformed(method, err)))
    }

    fn check_callback(&self, method: &str, callback: &Url) -> Result<(), AuthError> {
        if let Some((_, message)) = callback.query_pairs().find(|(key, _)| key == "error") {
            return Err(AuthError::Capability {
                capability: WEB_AUTH_CAPABILITY,
                message: message.into_owned(),
            });
        }
        let scheme = callback.scheme();
        if scheme.eq_ignore_ascii_case(&self.settings.app_scheme)
            || scheme.eq_ignore_ascii_case(NATIVE_CALLBACK_SCHEME)
        {
            return Ok(());
        }
        Err(self.bridge_failure(
            method,
            BridgeError::malformed(method, format!("unexpected callback scheme `{scheme}`")),
        ))
    }

    fn passkeys(&self) -> Result<Arc<dyn PasskeyAuthenticator>, AuthError> {
        self.passkeys
            .clone()
            .ok_or_else(|| BridgeError::NotImplemented(PASSKEY_CAPABILITY.to_string()).into())
    }

    fn web_auth(&self) -> Result<Arc<dyn WebAuthSession>, AuthError> {
        self.web_auth
            .clone()
            .ok_or_else(|| BridgeError::NotImplemented(WEB_AUTH_CAPABILITY.to_string()).into())
    }

    fn wallet_signer(&self) -> Result<Arc<dyn ExternalWalletSigner>, AuthError> {
        self.wallet_signer
            .clone()
            .ok_or_else(|| BridgeError::NotImplemented(WALLET_SIGNER_CAPABILITY.to_string()).into())
    }
}

fn join_stages(stages: &[AuthStage]) -> String {
    stages
        .iter()
        .map(|stage| stage.as_str())
        .collect::<Vec<_>>()
        .join("|")
}

fn verification_message(relying_party: &str, address: &str, nonce: &RequestId) -> String {
    format!("{relying_party} wants you to sign in with your wallet.\n\nAddress: {address}\nNonce: {nonce}")
}
