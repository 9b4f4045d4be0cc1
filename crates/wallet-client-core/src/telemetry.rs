use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use url::Url;
use wallet_bridge::BridgeError;

pub const DEFAULT_REPORT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry endpoint is invalid: {0}")]
    InvalidEndpoint(String),
    #[error("telemetry request failed: {message}")]
    Request { message: String },
    #[error("telemetry endpoint answered {status}: {body}")]
    Http { status: StatusCode, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub method: String,
    pub category: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ErrorReport {
    pub fn from_bridge_error(method: &str, error: &BridgeError, user_id: Option<String>) -> Self {
        let host = error.host_error();
        Self {
            method: method.to_string(),
            category: error.category().label(),
            code: host.map(|host| host.code.clone()),
            message: error.technical_message(),
            retryable: error.is_retryable(),
            operation: host
                .map(|host| host.context.operation.clone())
                .filter(|operation| !operation.is_empty()),
            user_id,
        }
    }
}

#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn report(&self, report: ErrorReport) -> Result<(), TelemetryError>;
}

/// Posts reports as JSON to `<host_url>/errors`.
#[derive(Debug, Clone)]
pub struct HttpErrorReporter {
    endpoint: Url,
    api_key: Option<String>,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpErrorReporter {
    pub fn new(host_url: &str) -> Result<Self, TelemetryError> {
        Ok(Self {
            endpoint: errors_endpoint(host_url)?,
            api_key: None,
            timeout: DEFAULT_REPORT_TIMEOUT,
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into()).filter(|key| !key.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ErrorReporter for HttpErrorReporter {
    async fn report(&self, report: ErrorReport) -> Result<(), TelemetryError> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(&report);
        if let Some(api_key) = &self.api_key {
            request = request.header("x-api-key", api_key);
        }

        let response = request.send().await.map_err(|err| TelemetryError::Request {
            message: err.to_string(),
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        let body = if body.trim().is_empty() {
            "<empty>".to_string()
        } else {
            body.trim().to_string()
        };
        Err(TelemetryError::Http { status, body })
    }
}

fn errors_endpoint(host_url: &str) -> Result<Url, TelemetryError> {
    let trimmed = host_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(TelemetryError::InvalidEndpoint("host url is empty".to_string()));
    }
    let endpoint = Url::parse(&format!("{trimmed}/errors"))
        .map_err(|err| TelemetryError::InvalidEndpoint(err.to_string()))?;
    match endpoint.scheme() {
        "http" | "https" => Ok(endpoint),
        other => Err(TelemetryError::InvalidEndpoint(format!(
            "unsupported scheme `{other}`"
        ))),
    }
}
