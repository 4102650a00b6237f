use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "PINGDOM_CONFIG";

/// Top-level configuration loaded from `~/.pingdom/config.toml`.
///
/// **Security**: this struct never stores API tokens. The HTTP metrics source
/// reads its bearer token from `PINGDOM_SOURCE_TOKEN` at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Config {
    /// Load config from `$PINGDOM_CONFIG` or `~/.pingdom/config.toml`, falling
    /// back to defaults when the file does not exist. Environment overrides
    /// are applied on top.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        let mut cfg = if path.exists() {
            let text =
                std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            Config::default()
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific path. Environment overrides are not applied.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `PINGDOM_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("PINGDOM_STORE_PATH") {
            self.store.path = path;
        }
        if let Some(host) = lookup("PINGDOM_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PINGDOM_PORT") {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!(value = %port, "ignoring unparseable PINGDOM_PORT"),
            }
        }
        if let Some(level) = lookup("PINGDOM_LOG_LEVEL") {
            self.general.log_level = level;
        }
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("server.port must be non-zero".into()));
        }
        if self.workflow.step_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "workflow.step_timeout_secs must be non-zero".into(),
            ));
        }
        self.workflow.fetch_retry.validate("workflow.fetch_retry")?;
        self.workflow.store_retry.validate("workflow.store_retry")?;
        if self.worker.reconnect_attempts == 0 {
            return Err(ConfigError::Validation(
                "worker.reconnect_attempts must be at least 1".into(),
            ));
        }
        if self.worker.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "worker.queue_capacity must be at least 1".into(),
            ));
        }
        if self.source.kind == SourceKind::Http && self.source.base_url.is_none() {
            return Err(ConfigError::Validation(
                "source.base_url is required when source.kind = \"http\"".into(),
            ));
        }
        match self.general.log_format.as_str() {
            "human" | "json" => Ok(()),
            other => Err(ConfigError::Validation(format!(
                "general.log_format must be \"human\" or \"json\", got {other:?}"
            ))),
        }
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pingdom")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `human` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_service_name() -> String {
    "pingdom".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "human".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "~/.pingdom/metrics.db".into()
}

impl StoreConfig {
    /// The store path with a leading `~/` expanded against `home`.
    pub fn resolved_path(&self, home: &std::path::Path) -> PathBuf {
        match self.path.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => PathBuf::from(&self.path),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Browser origins allowed by CORS in addition to localhost.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    5000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Deterministic sample data, no network.
    #[default]
    Static,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_zone")]
    pub zone: String,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            base_url: None,
            zone: default_zone(),
            timeout_secs: default_source_timeout(),
        }
    }
}

fn default_zone() -> String {
    "default".into()
}
fn default_source_timeout() -> u64 {
    30
}

/// Retry settings for one step, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetrySettings {
    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(format!(
                "{section}.max_attempts must be at least 1"
            )));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(format!(
                "{section}.backoff_multiplier must be >= 1.0"
            )));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Validation(format!(
                "{section}.initial_backoff_ms must not exceed max_backoff_ms"
            )));
        }
        Ok(())
    }
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    10 * 60 * 1_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Per-attempt execution budget for every step.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
    #[serde(default)]
    pub fetch_retry: RetrySettings,
    #[serde(default)]
    pub store_retry: RetrySettings,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
            fetch_retry: RetrySettings::default(),
            store_retry: RetrySettings::default(),
        }
    }
}

fn default_step_timeout() -> u64 {
    5 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,
    /// Pending run requests held before submitters start waiting.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_secs: default_reconnect_delay(),
            restart_delay_secs: default_restart_delay(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_delay() -> u64 {
    5
}
fn default_restart_delay() -> u64 {
    5
}
fn default_queue_capacity() -> usize {
    64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
