//! Deployment targets and transport configuration.

use std::time::Duration;

use crate::types::InitArguments;

pub const ENV_BRIDGE_ENVIRONMENT: &str = "WALLET_BRIDGE_ENV";
pub const ENV_BRIDGE_API_KEY: &str = "WALLET_BRIDGE_API_KEY";
pub const ENV_DEV_HOST_URL: &str = "WALLET_BRIDGE_DEV_HOST_URL";
pub const ENV_DEV_RELYING_PARTY: &str = "WALLET_BRIDGE_DEV_RELYING_PARTY";

pub const SANDBOX_HOST_URL: &str = "https://connect.sandbox.walletbridge.io";
pub const BETA_HOST_URL: &str = "https://connect.beta.walletbridge.io";
pub const PROD_HOST_URL: &str = "https://connect.walletbridge.io";
pub const SANDBOX_RELYING_PARTY: &str = "sandbox.walletbridge.io";
pub const BETA_RELYING_PARTY: &str = "beta.walletbridge.io";
pub const PROD_RELYING_PARTY: &str = "walletbridge.io";

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

pub const SOURCE_ENV: &str = "env";
pub const SOURCE_DEFAULT: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown bridge environment `{0}` (expected dev, sandbox, beta or prod)")]
    UnknownEnvironment(String),
    #[error("host url must not be empty")]
    EmptyHostUrl,
    #[error("host url must use http:// or https:// and include a host")]
    InvalidHostUrl,
    #[error("dev environment requires {0}")]
    MissingDevSetting(&'static str),
    #[error("api key must not be empty")]
    EmptyApiKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev {
        relying_party: String,
        host_url: String,
    },
    Sandbox,
    Beta,
    Prod,
}

impl Environment {
    pub fn dev(
        relying_party: impl Into<String>,
        host_url: &str,
    ) -> Result<Self, ConfigError> {
        let relying_party = relying_party.into().trim().to_string();
        if relying_party.is_empty() {
            return Err(ConfigError::MissingDevSetting(ENV_DEV_RELYING_PARTY));
        }
        Ok(Self::Dev {
            relying_party,
            host_url: normalize_host_url(host_url)?,
        })
    }

    /// Value sent as `environment` in the init message.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Dev { .. } => "DEV",
            Self::Sandbox => "SANDBOX",
            Self::Beta => "BETA",
            Self::Prod => "PROD",
        }
    }

    pub fn host_url(&self) -> &str {
        match self {
            Self::Dev { host_url, .. } => host_url,
            Self::Sandbox => SANDBOX_HOST_URL,
            Self::Beta => BETA_HOST_URL,
            Self::Prod => PROD_HOST_URL,
        }
    }

    /// Relying-party id handed to the native passkey authenticator.
    pub fn relying_party(&self) -> &str {
        match self {
            Self::Dev { relying_party, .. } => relying_party,
            Self::Sandbox => SANDBOX_RELYING_PARTY,
            Self::Beta => BETA_RELYING_PARTY,
            Self::Prod => PROD_RELYING_PARTY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub environment: Environment,
    pub api_key: String,
    pub platform: String,
    pub package: String,
    pub passkeys_supported: bool,
    pub call_timeout: Duration,
    pub ready_timeout: Duration,
}

impl BridgeConfig {
    #[must_use]
    pub fn new(environment: Environment, api_key: impl Into<String>) -> Self {
        Self {
            environment,
            api_key: api_key.into(),
            platform: default_platform().to_string(),
            package: env!("CARGO_PKG_NAME").to_string(),
            passkeys_supported: true,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    pub fn with_passkeys_supported(mut self, supported: bool) -> Self {
        self.passkeys_supported = supported;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn init_arguments(&self) -> InitArguments {
        InitArguments {
            environment: self.environment.label().to_string(),
            api_key: self.api_key.clone(),
            platform: self.platform.clone(),
            package: self.package.clone(),
            is_passkey_supported: self.passkeys_supported,
        }
    }

    /// Builds a config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let (environment, _) = resolve_environment()?;
        let api_key = resolve_api_key()?;
        Ok(Self::new(environment, api_key))
    }
}

fn default_platform() -> &'static str {
    match std::env::consts::OS {
        "ios" => "ios",
        "android" => "android",
        _ => "rust",
    }
}

pub fn parse_environment_label(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "dev" | "development" => Some("dev"),
        "sandbox" => Some("sandbox"),
        "beta" => Some("beta"),
        "prod" | "production" => Some("prod"),
        _ => None,
    }
}

/// Resolves the deployment target, returning it with its source label.
pub fn resolve_environment() -> Result<(Environment, &'static str), ConfigError> {
    let Some(raw) = env_non_empty(ENV_BRIDGE_ENVIRONMENT) else {
        return Ok((Environment::Sandbox, SOURCE_DEFAULT));
    };

    let environment = match parse_environment_label(&raw) {
        Some("dev") => {
            let host_url = env_non_empty(ENV_DEV_HOST_URL)
                .ok_or(ConfigError::MissingDevSetting(ENV_DEV_HOST_URL))?;
            let relying_party = env_non_empty(ENV_DEV_RELYING_PARTY)
                .ok_or(ConfigError::MissingDevSetting(ENV_DEV_RELYING_PARTY))?;
            Environment::dev(relying_party, &host_url)?
        }
        Some("sandbox") => Environment::Sandbox,
        Some("beta") => Environment::Beta,
        Some("prod") => Environment::Prod,
        _ => return Err(ConfigError::UnknownEnvironment(raw)),
    };
    Ok((environment, SOURCE_ENV))
}

pub fn resolve_api_key() -> Result<String, ConfigError> {
    env_non_empty(ENV_BRIDGE_API_KEY).ok_or(ConfigError::EmptyApiKey)
}

pub fn normalize_host_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyHostUrl);
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::InvalidHostUrl);
    }
    let Some((_, remainder)) = trimmed.split_once("://") else {
        return Err(ConfigError::InvalidHostUrl);
    };
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(ConfigError::InvalidHostUrl);
    }
    Ok(trimmed.to_string())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn with_env<T>(overrides: &[(&str, Option<&str>)], test: impl FnOnce() -> T) -> T {
        let lock = ENV_LOCK.get_or_init(|| Mutex::new(()));
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let previous = overrides
            .iter()
            .map(|(key, _)| (*key, std::env::var(key).ok()))
            .collect::<Vec<_>>();

        for (key, value) in overrides {
            if let Some(value) = value {
                unsafe { std::env::set_var(key, value) };
            } else {
                unsafe { std::env::remove_var(key) };
            }
        }

        let result = test();

        for (key, value) in previous {
            if let Some(value) = value {
                unsafe { std::env::set_var(key, value) };
            } else {
                unsafe { std::env::remove_var(key) };
            }
        }

        result
    }

    #[test]
    fn fixed_targets_resolve_to_fixed_urls() {
        assert_eq!(Environment::Prod.host_url(), PROD_HOST_URL);
        assert_eq!(Environment::Beta.relying_party(), BETA_RELYING_PARTY);
        assert_eq!(Environment::Sandbox.label(), "SANDBOX");
    }

    #[test]
    fn dev_target_normalizes_host_url() {
        let dev = Environment::dev("localhost", " http://localhost:3000/ ").expect("dev env");
        assert_eq!(dev.host_url(), "http://localhost:3000");
        assert_eq!(dev.relying_party(), "localhost");
        assert_eq!(
            Environment::dev("localhost", "localhost:3000"),
            Err(ConfigError::InvalidHostUrl)
        );
        assert_eq!(
            Environment::dev(" ", "http://localhost:3000"),
            Err(ConfigError::MissingDevSetting(ENV_DEV_RELYING_PARTY))
        );
    }

    #[test]
    fn resolve_environment_defaults_to_sandbox() {
        with_env(&[(ENV_BRIDGE_ENVIRONMENT, None)], || {
            let (environment, source) = resolve_environment().expect("default env");
            assert_eq!(environment, Environment::Sandbox);
            assert_eq!(source, SOURCE_DEFAULT);
        });
    }

    #[test]
    fn resolve_environment_reads_dev_settings() {
        with_env(
            &[
                (ENV_BRIDGE_ENVIRONMENT, Some("dev")),
                (ENV_DEV_HOST_URL, Some("https://bridge.local/")),
                (ENV_DEV_RELYING_PARTY, Some("bridge.local")),
            ],
            || {
                let (environment, source) = resolve_environment().expect("dev env");
                assert_eq!(environment.host_url(), "https://bridge.local");
                assert_eq!(environment.relying_party(), "bridge.local");
                assert_eq!(source, SOURCE_ENV);
            },
        );
    }

    #[test]
    fn resolve_environment_rejects_unknown_and_incomplete_targets() {
        with_env(&[(ENV_BRIDGE_ENVIRONMENT, Some("staging"))], || {
            assert_eq!(
                resolve_environment(),
                Err(ConfigError::UnknownEnvironment("staging".to_string()))
            );
        });
        with_env(
            &[
                (ENV_BRIDGE_ENVIRONMENT, Some("dev")),
                (ENV_DEV_HOST_URL, None),
            ],
            || {
                assert_eq!(
                    resolve_environment(),
                    Err(ConfigError::MissingDevSetting(ENV_DEV_HOST_URL))
                );
            },
        );
    }

    #[test]
    fn api_key_comes_from_env_and_must_be_present() {
        with_env(&[(ENV_BRIDGE_API_KEY, Some("  key-from-env  "))], || {
            assert_eq!(resolve_api_key(), Ok("key-from-env".to_string()));
        });
        with_env(&[(ENV_BRIDGE_API_KEY, Some("   "))], || {
            assert_eq!(resolve_api_key(), Err(ConfigError::EmptyApiKey));
        });
        with_env(&[(ENV_BRIDGE_API_KEY, None)], || {
            assert_eq!(resolve_api_key(), Err(ConfigError::EmptyApiKey));
        });
    }

    #[test]
    fn from_env_combines_target_and_api_key() {
        with_env(
            &[
                (ENV_BRIDGE_ENVIRONMENT, Some("production")),
                (ENV_BRIDGE_API_KEY, Some("prod-key")),
            ],
            || {
                let config = BridgeConfig::from_env().expect("config from env");
                assert_eq!(config.environment, Environment::Prod);
                assert_eq!(config.api_key, "prod-key");
                assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
                assert_eq!(config.init_arguments().environment, "PROD");
            },
        );
        with_env(
            &[
                (ENV_BRIDGE_ENVIRONMENT, Some("beta")),
                (ENV_BRIDGE_API_KEY, None),
            ],
            || {
                assert!(matches!(
                    BridgeConfig::from_env(),
                    Err(ConfigError::EmptyApiKey)
                ));
            },
        );
    }

    #[test]
    fn init_arguments_follow_config() {
        let config = BridgeConfig::new(Environment::Beta, "key-1")
            .with_platform("ios")
            .with_package("com.example.app")
            .with_passkeys_supported(false);
        let args = config.init_arguments();
        assert_eq!(args.environment, "BETA");
        assert_eq!(args.api_key, "key-1");
        assert_eq!(args.platform, "ios");
        assert_eq!(args.package, "com.example.app");
        assert!(!args.is_passkey_supported);
        assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
    }
}
