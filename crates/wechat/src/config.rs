//! Service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `ZWJZ_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `ZWJZ_BASE_URL` - Public URL of this service, used for OAuth redirects and chat links
//!
//! ## Optional
//! - `ZWJZ_HOST` - Bind address (default: 127.0.0.1)
//! - `ZWJZ_PORT` - Listen port (default: 3000)
//! - `WECHAT_APP_ID`, `WECHAT_APP_SECRET`, `WECHAT_TOKEN`, `WECHAT_BINDING_SECRET` -
//!   official-account credentials; the integration is enabled only when all four are set
//! - `WECHAT_TEXT_BUDGET_MS` - Reply budget for text and events (default: 4000)
//! - `WECHAT_MEDIA_BUDGET_MS` - Reply budget for voice and image (default: 8000)
//! - `WECHAT_DEDUP_WINDOW_SECS` - Duplicate delivery window (default: 300)
//! - `WECHAT_REQUIRE_CLIENT_BROWSER` - Only serve binding pages inside the WeChat
//!   browser (default: true)
//! - `SMART_ACCOUNTING_URL`, `SMART_ACCOUNTING_API_KEY` - Inference service endpoint
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Transaction sample rate (default: 0.0)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

const MIN_BINDING_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
    #[error("Incomplete WeChat configuration: {0} is set but {1} is missing")]
    IncompleteGroup(String, String),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    pub host: IpAddr,
    pub port: u16,
    /// Public base URL, without a trailing slash
    pub base_url: String,
    /// Official-account credentials; `None` leaves the webhook unconfigured
    pub wechat: Option<WechatConfig>,
    pub webhook: WebhookConfig,
    /// Smart-accounting inference service
    pub inference: Option<InferenceConfig>,
    pub sentry_dsn: Option<String>,
    pub sentry_environment: Option<String>,
    pub sentry_sample_rate: f32,
    pub sentry_traces_sample_rate: f32,
}

/// WeChat official-account credentials.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct WechatConfig {
    pub app_id: String,
    pub app_secret: SecretString,
    /// Shared token used for webhook signatures
    pub token: SecretString,
    /// Key for signing binding-page tickets
    pub binding_secret: SecretString,
}

impl std::fmt::Debug for WechatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WechatConfig")
            .field("app_id", &self.app_id)
            .field("app_secret", &"[REDACTED]")
            .field("token", &"[REDACTED]")
            .field("binding_secret", &"[REDACTED]")
            .finish()
    }
}

/// Webhook timing and binding-page behaviour.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub text_budget: Duration,
    pub media_budget: Duration,
    pub dedup_window: Duration,
    pub require_client_browser: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            text_budget: Duration::from_millis(4000),
            media_budget: Duration::from_millis(8000),
            dedup_window: Duration::from_secs(300),
            require_client_browser: true,
        }
    }
}

/// Smart-accounting inference service endpoint.
#[derive(Clone)]
pub struct InferenceConfig {
    pub url: Url,
    pub api_key: SecretString,
}

impl std::fmt::Debug for InferenceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceConfig")
            .field("url", &self.url.as_str())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_vars(&|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`ServiceConfig::from_env`].
    pub fn from_vars(vars: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = get_database_url(vars, "ZWJZ_DATABASE_URL")?;
        let host: IpAddr = parse_env_or_default(vars, "ZWJZ_HOST", "127.0.0.1")?;
        let port: u16 = parse_env_or_default(vars, "ZWJZ_PORT", "3000")?;
        let base_url = get_required_env(vars, "ZWJZ_BASE_URL")?;
        Url::parse(&base_url)
            .map_err(|e| ConfigError::InvalidEnvVar("ZWJZ_BASE_URL".to_string(), e.to_string()))?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let wechat = WechatConfig::from_vars(vars)?;
        let webhook = WebhookConfig::from_vars(vars)?;
        let inference = InferenceConfig::from_vars(vars)?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            wechat,
            webhook,
            inference,
            sentry_dsn: vars("SENTRY_DSN"),
            sentry_environment: vars("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: parse_env_or_default(vars, "SENTRY_SAMPLE_RATE", "1.0")?,
            sentry_traces_sample_rate: parse_env_or_default(
                vars,
                "SENTRY_TRACES_SAMPLE_RATE",
                "0.0",
            )?,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// URL of the binding page, used as the OAuth redirect target.
    #[must_use]
    pub fn bind_url(&self) -> String {
        format!("{}/bind", self.base_url)
    }
}

impl WechatConfig {
    const KEYS: [&'static str; 4] = [
        "WECHAT_APP_ID",
        "WECHAT_APP_SECRET",
        "WECHAT_TOKEN",
        "WECHAT_BINDING_SECRET",
    ];

    fn from_vars(vars: &dyn Fn(&str) -> Option<String>) -> Result<Option<Self>, ConfigError> {
        let present: Vec<&str> = Self::KEYS
            .iter()
            .copied()
            .filter(|key| vars(key).is_some())
            .collect();
        if present.is_empty() {
            return Ok(None);
        }
        if let Some(missing) = Self::KEYS.iter().find(|key| !present.contains(*key)) {
            return Err(ConfigError::IncompleteGroup(
                present.join(", "),
                (*missing).to_string(),
            ));
        }

        let binding_secret = get_validated_secret(vars, "WECHAT_BINDING_SECRET")?;
        validate_secret_length(&binding_secret, "WECHAT_BINDING_SECRET")?;

        Ok(Some(Self {
            app_id: get_required_env(vars, "WECHAT_APP_ID")?,
            app_secret: get_required_secret(vars, "WECHAT_APP_SECRET")?,
            token: get_required_secret(vars, "WECHAT_TOKEN")?,
            binding_secret,
        }))
    }
}

impl WebhookConfig {
    fn from_vars(vars: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text_ms: u64 = parse_env_or_default(vars, "WECHAT_TEXT_BUDGET_MS", "4000")?;
        let media_ms: u64 = parse_env_or_default(vars, "WECHAT_MEDIA_BUDGET_MS", "8000")?;
        let window_secs: u64 = parse_env_or_default(vars, "WECHAT_DEDUP_WINDOW_SECS", "300")?;
        if window_secs == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "WECHAT_DEDUP_WINDOW_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            text_budget: Duration::from_millis(text_ms),
            media_budget: Duration::from_millis(media_ms),
            dedup_window: Duration::from_secs(window_secs),
            require_client_browser: parse_env_or_default(
                vars,
                "WECHAT_REQUIRE_CLIENT_BROWSER",
                "true",
            )?,
        })
    }
}

impl InferenceConfig {
    fn from_vars(vars: &dyn Fn(&str) -> Option<String>) -> Result<Option<Self>, ConfigError> {
        let Some(raw_url) = vars("SMART_ACCOUNTING_URL") else {
            return Ok(None);
        };
        let url = Url::parse(&raw_url).map_err(|e| {
            ConfigError::InvalidEnvVar("SMART_ACCOUNTING_URL".to_string(), e.to_string())
        })?;
        let api_key = get_validated_secret(vars, "SMART_ACCOUNTING_API_KEY")?;
        Ok(Some(Self { url, api_key }))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(vars: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<String, ConfigError> {
    vars(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(
    vars: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Result<SecretString, ConfigError> {
    let value = get_required_env(vars, key)?;
    Ok(SecretString::from(value))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
fn get_database_url(
    vars: &dyn Fn(&str) -> Option<String>,
    primary_key: &str,
) -> Result<SecretString, ConfigError> {
    vars(primary_key)
        .or_else(|| vars("DATABASE_URL"))
        .map(SecretString::from)
        .ok_or_else(|| ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Parse an environment variable, falling back to a default literal.
fn parse_env_or_default<T>(
    vars: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = vars(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Validate that a signing secret meets minimum length requirements.
fn validate_secret_length(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_BINDING_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_BINDING_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // Secret lengths are far below f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    if let Some(pattern) = PLACEHOLDER_PATTERNS.iter().find(|p| lower.contains(*p)) {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!("appears to be a placeholder (contains '{pattern}')"),
        ));
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret.
fn get_validated_secret(
    vars: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Result<SecretString, ConfigError> {
    let value = get_required_env(vars, key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
