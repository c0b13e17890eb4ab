pub mod env_substitution;

use apollo_core::namespace::DEFAULT_CLUSTER;
use apollo_core::{ApolloError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Settings for one client instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    pub app_id: String,
    #[serde(default = "default_cluster")]
    pub cluster: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_center: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Client address reported to the config service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_server: Option<String>,
    /// Static config service endpoints; discovery is skipped when non-empty.
    #[serde(default)]
    pub config_service_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub properties_ordered: bool,
    #[serde(default)]
    pub offline: bool,
    #[serde(default)]
    pub notification_mode: NotificationMode,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationMode {
    #[default]
    LongPoll,
    /// Reserved; rejected when a client is built.
    ServerPush,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Client-side ceiling of a single long-poll request.
    #[serde(default = "default_long_poll_timeout_ms")]
    pub long_poll_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSettings {
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_discovery_refresh_interval_secs")]
    pub discovery_refresh_interval_secs: u64,
    #[serde(default = "default_long_poll_initial_delay_ms")]
    pub long_poll_initial_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_fetch_attempts")]
    pub max_fetch_attempts: u32,
    #[serde(default = "default_on_error_retry_interval_ms")]
    pub on_error_retry_interval_ms: u64,
    #[serde(default)]
    pub long_poll_backoff: BackoffSettings,
}

/// Delay policy applied between consecutive failed long polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSettings {
    #[serde(default = "default_backoff_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub strategy: BackoffStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

impl BackoffSettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms))
    }

    /// Delay to use after the one just waited, capped at `max_delay_ms`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let max = Duration::from_millis(self.max_delay_ms);
        let next = match self.strategy {
            BackoffStrategy::Fixed => current,
            BackoffStrategy::Linear => current.saturating_add(Duration::from_millis(self.initial_delay_ms)),
            BackoffStrategy::Exponential => current.saturating_mul(2),
        };
        next.min(max)
    }
}

impl ClientSettings {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            cluster: default_cluster(),
            data_center: None,
            label: None,
            ip: None,
            meta_server: None,
            config_service_urls: Vec::new(),
            cache_dir: None,
            properties_ordered: false,
            offline: false,
            notification_mode: NotificationMode::default(),
            timeouts: TimeoutSettings::default(),
            refresh: RefreshSettings::default(),
            retry: RetrySettings::default(),
            dispatch_workers: default_dispatch_workers(),
        }
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ApolloError::ConfigError(format!(
                "Failed to read settings file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parses YAML, substitutes `${VAR}` references, applies environment
    /// overrides and validates.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut document: serde_json::Value = serde_yaml::from_str(yaml)
            .map_err(|e| ApolloError::ConfigError(format!("Failed to parse YAML: {}", e)))?;
        env_substitution::substitute_env_vars(&mut document)?;

        let mut settings: ClientSettings = serde_json::from_value(document)
            .map_err(|e| ApolloError::ConfigError(format!("Invalid settings: {}", e)))?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| env::var(name).ok());
    }

    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(app_id) = lookup("APP_ID") {
            debug!(app_id = %app_id, "app id overridden from environment");
            self.app_id = app_id;
        }
        if let Some(cluster) = lookup("APOLLO_CLUSTER") {
            self.cluster = cluster;
        }
        if let Some(meta) = lookup("APOLLO_META") {
            self.meta_server = Some(meta);
        }
        if let Some(urls) = lookup("APOLLO_CONFIG_SERVICE") {
            self.config_service_urls = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(dir) = lookup("APOLLO_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(idc) = lookup("IDC") {
            self.data_center = Some(idc);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.app_id.trim().is_empty() {
            return Err(ApolloError::ConfigError("app_id cannot be empty".into()));
        }
        apollo_core::namespace::validate_app_id(&self.app_id)
            .map_err(|e| ApolloError::ConfigError(e.to_string()))?;
        if self.cluster.trim().is_empty() {
            return Err(ApolloError::ConfigError("cluster cannot be empty".into()));
        }
        if !self.offline && self.meta_server.is_none() && self.config_service_urls.is_empty() {
            return Err(ApolloError::ConfigError(
                "Either meta_server or config_service_urls must be set unless offline".into(),
            ));
        }
        if self.dispatch_workers == 0 {
            return Err(ApolloError::ConfigError("dispatch_workers must be at least 1".into()));
        }
        if self.retry.max_fetch_attempts == 0 {
            return Err(ApolloError::ConfigError("max_fetch_attempts must be at least 1".into()));
        }
        if self.timeouts.read_timeout_ms == 0 || self.timeouts.long_poll_timeout_ms == 0 {
            return Err(ApolloError::ConfigError("timeouts must be positive".into()));
        }
        Ok(())
    }

    /// Directory holding one cache file per namespace.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".apollo")
                .join("data")
                .join(&self.app_id)
                .join("config-cache"),
        }
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = cluster.into();
        self
    }

    pub fn with_meta_server(mut self, url: impl Into<String>) -> Self {
        self.meta_server = Some(url.into());
        self
    }

    pub fn with_config_service_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config_service_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_data_center(mut self, data_center: impl Into<String>) -> Self {
        self.data_center = Some(data_center.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_properties_ordered(mut self, ordered: bool) -> Self {
        self.properties_ordered = ordered;
        self
    }

    pub fn with_notification_mode(mut self, mode: NotificationMode) -> Self {
        self.notification_mode = mode;
        self
    }
}

impl TimeoutSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.long_poll_timeout_ms)
    }
}

impl RefreshSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn discovery_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_refresh_interval_secs)
    }

    pub fn long_poll_initial_delay(&self) -> Duration {
        Duration::from_millis(self.long_poll_initial_delay_ms)
    }
}

impl RetrySettings {
    pub fn on_error_retry_interval(&self) -> Duration {
        Duration::from_millis(self.on_error_retry_interval_ms)
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            long_poll_timeout_ms: default_long_poll_timeout_ms(),
        }
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            discovery_refresh_interval_secs: default_discovery_refresh_interval_secs(),
            long_poll_initial_delay_ms: default_long_poll_initial_delay_ms(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_fetch_attempts: default_max_fetch_attempts(),
            on_error_retry_interval_ms: default_on_error_retry_interval_ms(),
            long_poll_backoff: BackoffSettings::default(),
        }
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_backoff_initial_delay_ms(),
            max_delay_ms: default_backoff_max_delay_ms(),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

fn default_cluster() -> String { DEFAULT_CLUSTER.to_string() }
fn default_dispatch_workers() -> usize { 16 }
fn default_connect_timeout_ms() -> u64 { 1_000 }
fn default_read_timeout_ms() -> u64 { 5_000 }
fn default_long_poll_timeout_ms() -> u64 { 90_000 }
fn default_refresh_interval_secs() -> u64 { 300 }
fn default_discovery_refresh_interval_secs() -> u64 { 300 }
fn default_long_poll_initial_delay_ms() -> u64 { 2_000 }
fn default_max_fetch_attempts() -> u32 { 2 }
fn default_on_error_retry_interval_ms() -> u64 { 1_000 }
fn default_backoff_initial_delay_ms() -> u64 { 1_000 }
fn default_backoff_max_delay_ms() -> u64 { 120_000 }
