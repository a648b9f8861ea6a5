//! Integration configuration and engine config loading
//!
//! An [`IntegrationConfiguration`] is the only input an integration receives at
//! activation. Callers usually assemble it themselves; [`EngineConfig`] offers a
//! file-based alternative where secrets can reference `${ENV_VAR}` values.
//!
//! ## Environment file
//!
//! [`EngineConfig::load_default`] applies the first environment file it finds
//! (`$INFRA_RECONCILE_ENV_FILE`, then [`ENV_FILE_PATHS`]) before reading the
//! config, so `${VAR}` secrets may live there. Existing variables win.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::value::{ConfigValue, Configuration};

/// Environment variable that points at an explicit engine config file
pub const CONFIG_PATH_ENV: &str = "INFRA_RECONCILE_CONFIG";

/// Engine config files checked by [`EngineConfig::load_default`], in order
pub const CONFIG_FILE_PATHS: &[&str] = &[
    "/etc/infra-reconcile/engine.yaml",
    "/etc/infra-reconcile/engine.json",
    "infra-reconcile.yaml",
];

/// Environment variable that points at an explicit environment file
pub const ENV_FILE_ENV: &str = "INFRA_RECONCILE_ENV_FILE";

/// Environment files checked by [`load_environment`], in order
pub const ENV_FILE_PATHS: &[&str] = &["/etc/infra-reconcile/environment", ".env"];

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials presented to a backend
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Authentication {
    /// Bearer token (value may be an env reference like `${CF_API_TOKEN}`)
    Bearer { token: String },
    /// OAuth token pair
    #[serde(rename = "oauth")]
    OAuth {
        access_token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh_token: Option<String>,
    },
    /// API key plus account email
    ApiKey { key: String, email: String },
    /// No credentials
    None,
}

impl Authentication {
    /// Short name of the variant, safe to log
    pub fn kind(&self) -> &'static str {
        match self {
            Authentication::Bearer { .. } => "bearer",
            Authentication::OAuth { .. } => "oauth",
            Authentication::ApiKey { .. } => "api_key",
            Authentication::None => "none",
        }
    }

    /// Resolve environment variable references in credential values
    pub fn resolve(&self) -> Self {
        match self {
            Self::Bearer { token } => Self::Bearer {
                token: resolve_env_var(token),
            },
            Self::OAuth {
                access_token,
                refresh_token,
            } => Self::OAuth {
                access_token: resolve_env_var(access_token),
                refresh_token: refresh_token.as_deref().map(resolve_env_var),
            },
            Self::ApiKey { key, email } => Self::ApiKey {
                key: resolve_env_var(key),
                email: resolve_env_var(email),
            },
            Self::None => Self::None,
        }
    }
}

// Secrets never reach logs.
impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authentication::Bearer { .. } => f.debug_struct("Bearer").field("token", &"***").finish(),
            Authentication::OAuth { refresh_token, .. } => f
                .debug_struct("OAuth")
                .field("access_token", &"***")
                .field("refresh_token", &refresh_token.as_ref().map(|_| "***"))
                .finish(),
            Authentication::ApiKey { email, .. } => f
                .debug_struct("ApiKey")
                .field("key", &"***")
                .field("email", email)
                .finish(),
            Authentication::None => write!(f, "None"),
        }
    }
}

/// Replace `${NAME}` with the value of the environment variable `NAME`.
///
/// Unset variables resolve to an empty string.
fn resolve_env_var(value: &str) -> String {
    if let Some(name) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        std::env::var(name).unwrap_or_else(|_| {
            warn!("Environment variable {} referenced in config is not set", name);
            String::new()
        })
    } else {
        value.to_string()
    }
}

/// Retry/backoff policy used by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(rename = "initial_delay_ms", with = "duration_ms", default = "default_initial_delay")]
    pub initial_delay: Duration,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(rename = "max_delay_ms", with = "duration_ms", default = "default_max_delay")]
    pub max_delay: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }
}

/// Everything an integration needs at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationConfiguration {
    pub base_url: String,
    pub authentication: Authentication,
    #[serde(rename = "timeout_secs", with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Backend-specific settings (e.g. `account_id`, `owner`)
    #[serde(default)]
    pub options: Configuration,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl IntegrationConfiguration {
    pub fn new(base_url: impl Into<String>, authentication: Authentication) -> Self {
        Self {
            base_url: base_url.into(),
            authentication,
            timeout: DEFAULT_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            options: Configuration::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// String option lookup, empty strings count as missing
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Copy with `${ENV}` references in credentials resolved
    pub fn resolved(&self) -> Self {
        Self {
            authentication: self.authentication.resolve(),
            ..self.clone()
        }
    }
}

/// File-based engine configuration: integrations keyed by identifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub integrations: BTreeMap<String, IntegrationConfiguration>,

    /// Upper bound for a single integration's health check
    #[serde(rename = "health_timeout_secs", with = "duration_secs", default = "default_health_timeout")]
    pub health_timeout: Duration,
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(10)
}

impl EngineConfig {
    /// Load configuration from a JSON or YAML file.
    ///
    /// Credential env references are resolved after parsing.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let mut config: Self = if path
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false)
        {
            serde_yaml::from_str(&content).with_context(|| "Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).with_context(|| "Failed to parse JSON config")?
        };

        for integration in config.integrations.values_mut() {
            *integration = integration.resolved();
        }

        info!(
            "Loaded engine config from {} ({} integrations)",
            path.display(),
            config.integrations.len()
        );
        Ok(config)
    }

    /// Load from `$INFRA_RECONCILE_CONFIG` or the default paths, with fallback to an empty config.
    ///
    /// The environment file is applied first so `${VAR}` secrets can come from it.
    pub fn load_default() -> Result<Self> {
        load_environment();

        if let Ok(custom) = std::env::var(CONFIG_PATH_ENV) {
            return Self::load(custom);
        }

        for path in CONFIG_FILE_PATHS {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        info!("No engine config found, using defaults");
        Ok(Self::default())
    }

    pub fn integration(&self, identifier: &str) -> Option<&IntegrationConfiguration> {
        self.integrations.get(identifier)
    }
}

/// Variables applied from one environment file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFileSummary {
    pub applied: Vec<String>,
    pub kept: Vec<String>,
}

/// Apply the first environment file found to the process environment.
///
/// `$INFRA_RECONCILE_ENV_FILE` wins over [`ENV_FILE_PATHS`]. Variables already
/// present in the environment keep their value. Returns the file applied.
pub fn load_environment() -> Option<String> {
    let candidates = std::env::var(ENV_FILE_ENV)
        .ok()
        .into_iter()
        .chain(ENV_FILE_PATHS.iter().map(|p| p.to_string()));

    for candidate in candidates {
        if !Path::new(&candidate).is_file() {
            continue;
        }
        match apply_env_file(&candidate) {
            Ok(summary) => {
                info!(
                    "Environment from {}: {} applied, {} already set",
                    candidate,
                    summary.applied.len(),
                    summary.kept.len()
                );
                return Some(candidate);
            }
            Err(e) => warn!("{:#}", e),
        }
    }

    debug!("No environment file applied");
    None
}

/// Apply `KEY=VALUE` lines from `path` without overriding existing variables
pub fn apply_env_file<P: AsRef<Path>>(path: P) -> Result<EnvFileSummary> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read environment file {}", path.display()))?;

    let mut summary = EnvFileSummary::default();
    for (key, value) in content.lines().filter_map(parse_env_line) {
        if std::env::var_os(&key).is_some() {
            summary.kept.push(key);
        } else {
            std::env::set_var(&key, value);
            summary.applied.push(key);
        }
    }
    Ok(summary)
}

/// `KEY=VALUE` with optional `export` and matching quotes; comments and blanks are `None`
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let raw = raw.trim();
    let value = ['"', '\'']
        .iter()
        .find_map(|q| raw.strip_prefix(*q)?.strip_suffix(*q))
        .unwrap_or(raw);
    Some((key.to_string(), value.to_string()))
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("timeout must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
