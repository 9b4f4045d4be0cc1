//! Auth stage machine, session state and wallet cache on top of
//! [`wallet_bridge`].

pub mod auth;
pub mod capabilities;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod state;
pub mod telemetry;

pub use auth::{
    AuthInputError, ChainKind, DEFAULT_PHONE_COUNTRY_CODE, ExternalWalletInfo, Identity,
    normalize_email, normalize_phone, normalize_verification_code,
};
pub use capabilities::{
    CapabilityError, ExternalWalletSigner, PasskeyAssertion, PasskeyAssertionRequest,
    PasskeyAuthenticator, PasskeyRegistration, PasskeyRegistrationRequest, WebAuthSession,
};
pub use error::AuthError;
pub use orchestrator::{AuthOrchestrator, AuthSettings, NATIVE_CALLBACK_SCHEME};
pub use session::{
    MemorySessionStore, SessionController, SessionDetails, SessionState, SessionStore,
    SessionStoreError, Wallet,
};
pub use state::{
    AuthMethod, AuthStage, AuthState, BiometricHint, DisplayMetadata,
    determine_preferred_login_method, determine_preferred_signup_method,
};
pub use telemetry::{ErrorReport, ErrorReporter, HttpErrorReporter, TelemetryError};
