use serde::Deserialize;
use serde::Serialize;
use std::env;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const SIGNAL_HOME_ENV_VAR: &str = "SIGNAL_HOME";
pub const SIGNAL_ENDPOINT_ENV_VAR: &str = "SIGNAL_ENDPOINT";
pub const SIGNAL_ACCESS_TOKEN_ENV_VAR: &str = "SIGNAL_ACCESS_TOKEN";
pub const CONFIG_FILE: &str = "config.toml";

const DEFAULT_ENDPOINT: &str = "http://localhost:3000/api/graphql";
const DEFAULT_PROBE_DOCUMENT: &str = "query HealthProbe { __typename }";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: String,
    pub request_timeout_ms: u64,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub network: NetworkConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout_ms: 30_000,
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            network: NetworkConfig::default(),
            auth: AuthConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_duration_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_ms: 30_000,
        }
    }
}

impl BreakerConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per operation, including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fractional jitter applied to each delay (0.1 = ±10%).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay_ms: 300,
            max_delay_ms: 5_000,
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub max_error_count: u32,
    /// Errors closer together than this count in full.
    pub burst_window_ms: u64,
    pub cooldown_ms: u64,
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub probe_document: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_error_count: 3,
            burst_window_ms: 5_000,
            cooldown_ms: 60_000,
            probe_interval_ms: 30_000,
            probe_timeout_ms: 10_000,
            probe_document: DEFAULT_PROBE_DOCUMENT.to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn burst_window(&self) -> Duration {
        Duration::from_millis(self.burst_window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub refresh_url: Option<String>,
    pub sign_in_url: String,
    pub refresh_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_url: None,
            sign_in_url: "/sign-in".to_string(),
            refresh_timeout_ms: 10_000,
            access_token: None,
            refresh_token: None,
        }
    }
}

impl AuthConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub fields: Vec<FieldPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationStyle {
    Offset,
    Cursor,
}

/// Merge policy for one paginated root field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPolicy {
    pub field: String,
    pub style: PaginationStyle,
    /// Arguments that select the cache slot. When absent every
    /// non-pagination argument does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_args: Option<Vec<String>>,
}

impl FieldPolicy {
    pub fn offset(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            style: PaginationStyle::Offset,
            key_args: None,
        }
    }

    pub fn cursor(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            style: PaginationStyle::Cursor,
            key_args: None,
        }
    }

    pub fn with_key_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_args = Some(args.into_iter().map(Into::into).collect());
        self
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load `config.toml` from `signal_home` (defaults when the file is
    /// missing), then apply environment overrides.
    pub fn load(signal_home: &Path) -> Result<Self, ConfigError> {
        let path = signal_home.join(CONFIG_FILE);
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml(&contents)?,
            Err(err) if err.kind() == ErrorKind::NotFound => Self::default(),
            Err(err) => return Err(err.into()),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(endpoint) = non_empty_env(SIGNAL_ENDPOINT_ENV_VAR) {
            self.endpoint = endpoint;
        }
        if let Some(token) = non_empty_env(SIGNAL_ACCESS_TOKEN_ENV_VAR) {
            self.auth.access_token = Some(token);
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Returns the directory holding client configuration: `$SIGNAL_HOME` when
/// set, otherwise `~/.signal`. The directory is not required to exist.
pub fn find_signal_home() -> std::io::Result<PathBuf> {
    if let Some(home) = non_empty_env(SIGNAL_HOME_ENV_VAR) {
        return Ok(PathBuf::from(home));
    }
    let mut home = dirs::home_dir().ok_or_else(|| {
        std::io::Error::new(ErrorKind::NotFound, "Could not find home directory")
    })?;
    home.push(".signal");
    Ok(home)
}
