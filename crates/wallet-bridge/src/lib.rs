//! Request/response transport to the embedded wallet script host.
//!
//! Calls are correlated by a generated request id, bounded by a per-call
//! timeout, and gated behind the host's init handshake. Responses may arrive
//! in any order; each resolves exactly the call it names.

mod client;
mod environment;
mod error;
mod pending;
mod readiness;
mod types;

pub use client::{
    BridgeTransport, HostChannel, HostReader, HostWriter, StreamHostChannel, WIRE_LOG_TARGET,
};
pub use environment::{
    BETA_HOST_URL, BETA_RELYING_PARTY, BridgeConfig, ConfigError, DEFAULT_CALL_TIMEOUT,
    DEFAULT_READY_TIMEOUT, ENV_BRIDGE_API_KEY, ENV_BRIDGE_ENVIRONMENT, ENV_DEV_HOST_URL,
    ENV_DEV_RELYING_PARTY, Environment, PROD_HOST_URL, PROD_RELYING_PARTY, SANDBOX_HOST_URL,
    SANDBOX_RELYING_PARTY, normalize_host_url, parse_environment_label, resolve_api_key,
    resolve_environment,
};
pub use error::{
    BridgeError, DeliveryError, ErrorCategory, HostErrorContext, HostErrorKind,
    StructuredHostError, kind_for_code, map_host_error,
};
pub use pending::{CallOutcome, Completion, RequestTable};
pub use readiness::{ReadinessGate, TransportState};
pub use types::{
    HostMessage, INIT_ACK_METHOD, INIT_MESSAGE_TYPE, INVOKE_MESSAGE_TYPE, InboundFrame,
    InitArguments, InitMessage, InvokeMessage, RequestId, SUPPORTED_BRIDGE_METHODS,
};
