//! Layered configuration for producers and subscribers.

use std::{fmt, path::Path, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use turnstay_signature::{Secret, Tolerance};

use crate::{
    client::ClientConfig,
    error::{DeliveryError, Result},
    retry::RetryPolicy,
    trigger::{SigningMode, TriggerOptions, WebhookClient, DEFAULT_TRIGGER_PATH},
};

const CONFIG_FILE: &str = "turnstay.toml";
const ENV_PREFIX: &str = "TURNSTAY_";

/// Complete client configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed `TURNSTAY_` (highest priority), plus
///    `RUST_LOG`
/// 2. Configuration file (`turnstay.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// `Debug` masks the signing secret.
///
/// # Example
///
/// ```no_run
/// use turnstay_delivery::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
/// println!("Delivering to {}", config.base_url);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    // Destination
    /// Webhook service base URL.
    ///
    /// Environment variable: `TURNSTAY_BASE_URL`
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path events are posted to, relative to `base_url`.
    ///
    /// Environment variable: `TURNSTAY_TRIGGER_PATH`
    #[serde(default = "default_trigger_path")]
    pub trigger_path: String,

    // Signing
    /// Shared HMAC secret.
    ///
    /// Environment variable: `TURNSTAY_SIGNING_SECRET`
    #[serde(default)]
    pub signing_secret: Option<String>,
    /// Identifier of the signing secret, for logs.
    ///
    /// Environment variable: `TURNSTAY_SIGNING_KEY_ID`
    #[serde(default)]
    pub signing_key_id: Option<String>,
    /// Signature timestamp policy across retries.
    ///
    /// Environment variable: `TURNSTAY_SIGNING_MODE` (`resign` or
    /// `idempotent`)
    #[serde(default)]
    pub signing_mode: SigningMode,
    /// Subscriber freshness window in seconds; 0 disables the check.
    ///
    /// Environment variable: `TURNSTAY_VERIFY_TOLERANCE_SECONDS`
    #[serde(default = "default_verify_tolerance")]
    pub verify_tolerance_seconds: u64,

    // Client
    /// HTTP request timeout in milliseconds.
    ///
    /// Environment variable: `TURNSTAY_REQUEST_TIMEOUT_MS`
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Idle connections kept per destination host.
    ///
    /// Environment variable: `TURNSTAY_POOL_MAX_IDLE_PER_HOST`
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
    /// Idle connection lifetime in seconds.
    ///
    /// Environment variable: `TURNSTAY_POOL_IDLE_TIMEOUT_SECONDS`
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_seconds: u64,

    // Retry
    /// Retries after the first attempt.
    ///
    /// Environment variable: `TURNSTAY_MAX_RETRIES`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds.
    ///
    /// Environment variable: `TURNSTAY_RETRY_BASE_DELAY_MS`
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    ///
    /// Environment variable: `TURNSTAY_RETRY_MAX_DELAY_MS`
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    ///
    /// Environment variable: `TURNSTAY_RETRY_JITTER_FACTOR`
    #[serde(default = "default_jitter_factor")]
    pub retry_jitter_factor: f64,

    // Logging
    /// Log filter directives.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, `turnstay.toml`, and environment
    /// variable overrides.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if a source cannot be
    /// parsed or the merged values fail validation.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Loads configuration using the given file in place of `turnstay.toml`.
    ///
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`].
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Env::raw().only(&["RUST_LOG"]));

        let config: Self = figment.extract().map_err(|e| {
            DeliveryError::configuration(format!("failed to load configuration: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_millis(self.request_timeout_ms),
            pool_max_idle_per_host: self.pool_max_idle_per_host,
            pool_idle_timeout: Duration::from_secs(self.pool_idle_timeout_seconds),
            ..ClientConfig::default()
        }
    }

    /// Convert to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.saturating_add(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
        }
    }

    /// Default per-call options derived from configuration.
    pub fn to_trigger_options(&self) -> TriggerOptions {
        TriggerOptions::default().with_signing_mode(self.signing_mode)
    }

    /// Subscriber freshness tolerance.
    pub fn to_tolerance(&self) -> Tolerance {
        Tolerance::from_seconds(self.verify_tolerance_seconds)
    }

    /// The configured signing secret.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if no secret is set.
    pub fn to_secret(&self) -> Result<Secret> {
        let Some(raw) = self.signing_secret.as_deref() else {
            return Err(DeliveryError::configuration("signing_secret is not set"));
        };

        let secret = Secret::from(raw);
        Ok(match &self.signing_key_id {
            Some(key_id) => secret.with_key_id(key_id.as_str()),
            None => secret,
        })
    }

    /// Builds a webhook client from this configuration.
    ///
    /// # Errors
    ///
    /// Same as [`crate::WebhookClientBuilder::build`].
    pub fn webhook_client(&self) -> Result<WebhookClient> {
        WebhookClient::builder()
            .base_url(self.base_url.as_str())
            .client_config(self.to_client_config())
            .retry_policy(self.to_retry_policy())
            .build()
    }

    /// Signing secret with its value masked for logging.
    pub fn signing_secret_masked(&self) -> &'static str {
        match self.signing_secret {
            Some(_) => "***",
            None => "<unset>",
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` naming the first invalid
    /// field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(DeliveryError::configuration(message));

        if self.base_url.trim().is_empty() {
            return invalid("base_url must not be empty");
        }

        match Url::parse(self.base_url.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {},
            _ => return invalid("base_url must be an absolute http(s) URL"),
        }

        if self.request_timeout_ms == 0 {
            return invalid("request_timeout_ms must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            return invalid("retry_jitter_factor must be between 0.0 and 1.0");
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return invalid("retry_base_delay_ms cannot exceed retry_max_delay_ms");
        }

        if self.signing_secret.as_deref().is_some_and(str::is_empty) {
            return invalid("signing_secret must not be empty when set");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            trigger_path: default_trigger_path(),
            signing_secret: None,
            signing_key_id: None,
            signing_mode: SigningMode::default(),
            verify_tolerance_seconds: default_verify_tolerance(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: default_pool_max_idle(),
            pool_idle_timeout_seconds: default_pool_idle_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
            retry_jitter_factor: default_jitter_factor(),
            rust_log: default_log_level(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("trigger_path", &self.trigger_path)
            .field("signing_secret", &self.signing_secret_masked())
            .field("signing_key_id", &self.signing_key_id)
            .field("signing_mode", &self.signing_mode)
            .field("verify_tolerance_seconds", &self.verify_tolerance_seconds)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("pool_idle_timeout_seconds", &self.pool_idle_timeout_seconds)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .field("retry_jitter_factor", &self.retry_jitter_factor)
            .field("rust_log", &self.rust_log)
            .finish()
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_trigger_path() -> String {
    DEFAULT_TRIGGER_PATH.to_string()
}

fn default_verify_tolerance() -> u64 {
    300
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_pool_max_idle() -> usize {
    32
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_log_level() -> String {
    "info,turnstay=debug".to_string()
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, env, io::Write, sync::Mutex};

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const NO_FILE: &str = "does-not-exist.toml";

    struct TestEnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        vars: Vec<String>,
        originals: HashMap<String, Option<String>>,
    }

    impl TestEnvGuard {
        fn new() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self { _lock: lock, vars: Vec::new(), originals: HashMap::new() }
        }

        fn set_var(&mut self, key: &str, value: &str) {
            if !self.vars.contains(&key.to_string()) {
                self.originals.insert(key.to_string(), env::var(key).ok());
                self.vars.push(key.to_string());
            }
            env::set_var(key, value);
        }
    }

    impl Drop for TestEnvGuard {
        fn drop(&mut self) {
            for var in &self.vars {
                match self.originals.get(var) {
                    Some(Some(value)) => env::set_var(var, value),
                    Some(None) => env::remove_var(var),
                    None => {},
                }
            }
        }
    }

    #[test]
    fn defaults_match_sdk_settings() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.to_client_config().timeout, Duration::from_secs(5));

        let policy = config.to_retry_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(config.to_tolerance(), Tolerance::Within(300));
        assert_eq!(config.to_trigger_options().signing_mode, SigningMode::Resign);
    }

    #[test]
    fn env_overrides_defaults() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("TURNSTAY_BASE_URL", "https://hooks.example.com");
        guard.set_var("TURNSTAY_MAX_RETRIES", "5");
        guard.set_var("TURNSTAY_REQUEST_TIMEOUT_MS", "2500");
        guard.set_var("TURNSTAY_SIGNING_MODE", "idempotent");
        guard.set_var("TURNSTAY_VERIFY_TOLERANCE_SECONDS", "0");
        guard.set_var("RUST_LOG", "warn");

        let config = Config::load_from(NO_FILE).unwrap();

        assert_eq!(config.base_url, "https://hooks.example.com");
        assert_eq!(config.to_retry_policy().max_attempts, 6);
        assert_eq!(config.to_client_config().timeout, Duration::from_millis(2500));
        assert_eq!(config.signing_mode, SigningMode::Idempotent);
        assert_eq!(config.to_tolerance(), Tolerance::Disabled);
        assert_eq!(config.rust_log, "warn");
    }

    #[test]
    fn file_values_sit_between_defaults_and_env() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("TURNSTAY_MAX_RETRIES", "7");

        let path = env::temp_dir().join(format!("turnstay-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "base_url = \"http://file.example.com\"\nmax_retries = 1").unwrap();

        let config = Config::load_from(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.base_url, "http://file.example.com");
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.retry_base_delay_ms, 1000);
    }

    #[test]
    fn invalid_env_value_fails_to_load() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("TURNSTAY_RETRY_JITTER_FACTOR", "1.5");

        let err = Config::load_from(NO_FILE).unwrap_err();
        assert!(err.to_string().contains("retry_jitter_factor"));
    }

    #[test]
    fn invalid_config_validation_fails() {
        let mut config = Config::default();
        config.request_timeout_ms = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.base_url = String::new();
        assert!(config.validate().is_err());

        config = Config::default();
        config.base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        config = Config::default();
        config.retry_jitter_factor = -0.1;
        assert!(config.validate().is_err());

        config = Config::default();
        config.retry_base_delay_ms = 60_000;
        assert!(config.validate().is_err());

        config = Config::default();
        config.signing_secret = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn secret_masked_in_debug_output() {
        let config = Config {
            signing_secret: Some("whsec_do_not_log".to_string()),
            signing_key_id: Some("2026-01".to_string()),
            ..Config::default()
        };

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("whsec_do_not_log"));
        assert!(rendered.contains("***"));

        let secret = config.to_secret().unwrap();
        assert_eq!(secret.expose(), b"whsec_do_not_log");
        assert_eq!(secret.key_id(), Some("2026-01"));
    }

    #[test]
    fn missing_secret_is_configuration_error() {
        assert!(matches!(
            Config::default().to_secret(),
            Err(DeliveryError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn builds_webhook_client() {
        let client = Config::default().webhook_client().unwrap();
        assert_eq!(client.retry_policy().max_attempts, 4);
        assert_eq!(
            client.resolve_destination(&Config::default().trigger_path).unwrap().as_str(),
            "http://localhost:8000/internal/webhooks/trigger"
        );
    }
}
