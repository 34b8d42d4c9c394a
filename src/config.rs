//! Configuration management
//!
//! Settings come from an optional TOML file layered with `SELFCARE__`
//! environment variables (e.g. `SELFCARE__ACCOUNT__PASSWORD`). Every field
//! has a default matching the observed portal, so an empty config works.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Portal location, endpoint paths and form details
    #[serde(default)]
    pub portal: PortalSettings,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Live speed polling and streaming
    #[serde(default)]
    pub speed: SpeedSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Optional stored login, read only
    #[serde(default)]
    pub account: AccountConfig,
}

/// Where the portal lives and how its pages are wired together
#[derive(Debug, Deserialize, Clone)]
pub struct PortalSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Browser-like agent; the portal misbehaves for anything else
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_landing_path")]
    pub landing_path: String,

    #[serde(default = "default_login_path")]
    pub login_path: String,

    #[serde(default = "default_dashboard_path")]
    pub dashboard_path: String,

    #[serde(default = "default_report_path")]
    pub report_path: String,

    #[serde(default = "default_usage_path")]
    pub usage_path: String,

    #[serde(default = "default_payments_path")]
    pub payments_path: String,

    #[serde(default = "default_speed_path")]
    pub speed_path: String,

    /// Query `type` that arms the server-side speed feed
    #[serde(default = "default_speed_prime_type")]
    pub speed_prime_type: u8,

    /// Query `type` of the long-lived speed feed itself
    #[serde(default = "default_speed_stream_type")]
    pub speed_stream_type: u8,

    #[serde(default = "default_username_field")]
    pub username_field: String,

    #[serde(default = "default_password_field")]
    pub password_field: String,

    /// Text only present on the sign-in form
    #[serde(default = "default_sign_in_marker")]
    pub sign_in_marker: String,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            landing_path: default_landing_path(),
            login_path: default_login_path(),
            dashboard_path: default_dashboard_path(),
            report_path: default_report_path(),
            usage_path: default_usage_path(),
            payments_path: default_payments_path(),
            speed_path: default_speed_path(),
            speed_prime_type: default_speed_prime_type(),
            speed_stream_type: default_speed_stream_type(),
            username_field: default_username_field(),
            password_field: default_password_field(),
            sign_in_marker: default_sign_in_marker(),
        }
    }
}

impl PortalSettings {
    /// Absolute URL for a portal path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// `scheme://host` of the portal, used for the `Origin` header
    pub fn origin(&self) -> String {
        match reqwest::Url::parse(&self.base_url) {
            Ok(url) => url.origin().ascii_serialization(),
            Err(_) => self.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn speed_url(&self, query_type: u8) -> String {
        format!("{}?type={}", self.url(&self.speed_path), query_type)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpeedSettings {
    /// Pause after each emitted sample in streaming mode
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pause before reopening a failed or finished stream
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How long a single poll waits for the first bytes
    #[serde(default = "default_poll_wait_ms")]
    pub poll_wait_ms: u64,
}

impl Default for SpeedSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            poll_wait_ms: default_poll_wait_ms(),
        }
    }
}

impl SpeedSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_millis(self.poll_wait_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AccountConfig {
    #[serde(default)]
    pub customer_id: String,

    #[serde(default)]
    pub password: String,
}

// Default value functions
fn default_base_url() -> String {
    "https://selfcare.bijoy.net".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_landing_path() -> String {
    "/customer/".to_string()
}

fn default_login_path() -> String {
    "/customer/login".to_string()
}

fn default_dashboard_path() -> String {
    "/customer/dashboard".to_string()
}

fn default_report_path() -> String {
    "/customer/report".to_string()
}

fn default_usage_path() -> String {
    "/customer/totalUsage".to_string()
}

fn default_payments_path() -> String {
    "/customer/customerhistory".to_string()
}

fn default_speed_path() -> String {
    "/du_graph_ajax".to_string()
}

fn default_speed_prime_type() -> u8 {
    2
}

fn default_speed_stream_type() -> u8 {
    1
}

fn default_username_field() -> String {
    "USERNAME".to_string()
}

fn default_password_field() -> String {
    "PASS".to_string()
}

fn default_sign_in_marker() -> String {
    "Sign in".to_string()
}

fn default_timeout() -> u64 {
    20
}

fn default_connect_timeout() -> u64 {
    20
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_retry_backoff_ms() -> u64 {
    3000
}

fn default_poll_wait_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the first config file found (or defaults),
    /// then apply `SELFCARE__SECTION__KEY` environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match Self::find_file(explicit) {
            Some(path) => {
                tracing::debug!("Loading config from: {}", path.display());
                builder = builder.add_source(
                    config::File::from(path.as_path()).format(config::FileFormat::Toml),
                );
            }
            None => tracing::debug!("No config file found, using defaults"),
        }

        builder
            .add_source(config::Environment::with_prefix("SELFCARE").separator("__"))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    fn find_file(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        let config_paths = [
            Some(PathBuf::from("config.toml")),
            dirs::config_dir().map(|d| d.join("selfcare/config.toml")),
            Some(PathBuf::from("/etc/selfcare/config.toml")),
        ];

        config_paths.into_iter().flatten().find(|p| p.exists())
    }
}
