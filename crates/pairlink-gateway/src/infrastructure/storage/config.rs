//! TOML configuration for the gateway.
//!
//! Every field has a default, so an empty file (or no file at all) is a valid
//! configuration.  Example:
//!
//! ```toml
//! [gateway]
//! log_level = "info"
//! credentials_dir = "sessions"
//! admin_api_key = "a-long-random-string"
//!
//! [reconnect]
//! backoff_cap_ms = 60000
//!
//! [qr]
//! mode = "raster"
//! size = 300
//!
//! [webhook]
//! enabled = true
//! allowed_events = ["messages.upsert", "session.update"]
//!
//! [[webhook.endpoints]]
//! url = "https://hooks.example.com/pairlink"
//! api_key = "secret"
//! ```
//!
//! After loading, `PAIRLINK_*` environment variables override individual
//! fields (see [`GatewayConfig::apply_env_overrides`]).  The result is turned
//! into runtime settings by the `*_policy` / `*_settings` accessors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pairlink_core::{BreakerPolicy, QrFormat, ReconnectPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::application::dispatcher::{WebhookSettings, ALLOW_ALL_EVENTS};
use crate::application::ports::WebhookTarget;
use crate::application::supervisor::SupervisorSettings;
use crate::infrastructure::qr_render::{ErrorCorrection, QrRenderOptions};

/// Placeholder admin key shipped in sample configs.  Starting with it in
/// place produces a warning.
pub const DEFAULT_ADMIN_API_KEY: &str = "change-me";

/// Error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An environment override holds a value of the wrong shape.
    #[error("invalid value {value:?} for {var}: expected {expected}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Non-fatal problems worth telling the operator about at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `admin_api_key` is empty or still the shipped placeholder.
    InsecureAdminKey,
    /// Webhooks are enabled but no endpoint is configured.
    WebhookWithoutEndpoints,
    /// An endpoint URL is not `http(s)://`.
    SuspiciousWebhookUrl(String),
    /// The allow-list is empty, so no event will ever reach a webhook.
    EmptyAllowList,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::InsecureAdminKey => {
                f.write_str("admin_api_key is empty or the shipped default; set a secret value")
            }
            ConfigWarning::WebhookWithoutEndpoints => {
                f.write_str("webhooks are enabled but no endpoints are configured")
            }
            ConfigWarning::SuspiciousWebhookUrl(url) => {
                write!(f, "webhook URL {url:?} does not start with http:// or https://")
            }
            ConfigWarning::EmptyAllowList => {
                f.write_str("webhook allowed_events is empty; no event will be delivered")
            }
        }
    }
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub qr: QrSection,
    #[serde(default)]
    pub webhook: WebhookSection,
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewaySection {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// One sub-directory per session lives here.
    #[serde(default = "default_credentials_dir")]
    pub credentials_dir: PathBuf,
    /// Credential for the administrative surface.
    #[serde(default = "default_admin_api_key")]
    pub admin_api_key: String,
    /// Protocol version triple announced by connectors, if overridden.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<[u32; 3]>,
}

/// Reconnect delay constants in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_restart_required_delay_ms")]
    pub restart_required_delay_ms: u64,
    #[serde(default = "default_first_pairing_delay_ms")]
    pub first_pairing_delay_ms: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

/// How pairing codes are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QrMode {
    /// SVG data URL.
    #[default]
    Vector,
    /// PNG data URL.
    Raster,
    /// Publish the raw text only.
    None,
}

impl std::str::FromStr for QrMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vector" | "svg" => Ok(QrMode::Vector),
            "raster" | "png" => Ok(QrMode::Raster),
            "none" | "off" => Ok(QrMode::None),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QrSection {
    #[serde(default)]
    pub mode: QrMode,
    /// Minimum edge length in pixels, at most 4096.
    #[serde(default = "default_qr_size")]
    pub size: u32,
    #[serde(default = "default_true")]
    pub quiet_zone: bool,
    #[serde(default)]
    pub error_correction: ErrorCorrection,
    #[serde(default = "default_dark_color")]
    pub dark_color: String,
    #[serde(default = "default_light_color")]
    pub light_color: String,
}

/// One `[[webhook.endpoints]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookEndpointConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoints: Vec<WebhookEndpointConfig>,
    /// Consecutive failures before an endpoint is cooled down.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// At most one failure log line per endpoint per window.
    #[serde(default = "default_log_throttle_ms")]
    pub log_throttle_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Event types forwarded to webhooks.  `"*"` forwards everything.
    #[serde(default = "default_allowed_events")]
    pub allowed_events: Vec<String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_credentials_dir() -> PathBuf {
    PathBuf::from("sessions")
}
fn default_admin_api_key() -> String {
    DEFAULT_ADMIN_API_KEY.to_string()
}
fn default_restart_required_delay_ms() -> u64 {
    500
}
fn default_first_pairing_delay_ms() -> u64 {
    1_500
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_cap_ms() -> u64 {
    60_000
}
fn default_qr_size() -> u32 {
    300
}
fn default_true() -> bool {
    true
}
fn default_dark_color() -> String {
    "#000000".to_string()
}
fn default_light_color() -> String {
    "#ffffff".to_string()
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_cooldown_ms() -> u64 {
    300_000
}
fn default_log_throttle_ms() -> u64 {
    60_000
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_allowed_events() -> Vec<String> {
    [
        "messages.upsert",
        "messages.update",
        "messages.reaction",
        "presence.update",
        "groups.update",
        "session.update",
        "qr.update",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            credentials_dir: default_credentials_dir(),
            admin_api_key: default_admin_api_key(),
            protocol_version: None,
        }
    }
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            restart_required_delay_ms: default_restart_required_delay_ms(),
            first_pairing_delay_ms: default_first_pairing_delay_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

impl Default for QrSection {
    fn default() -> Self {
        Self {
            mode: QrMode::default(),
            size: default_qr_size(),
            quiet_zone: default_true(),
            error_correction: ErrorCorrection::default(),
            dark_color: default_dark_color(),
            light_color: default_light_color(),
        }
    }
}

impl Default for WebhookSection {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoints: Vec::new(),
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            log_throttle_ms: default_log_throttle_ms(),
            timeout_ms: default_timeout_ms(),
            allowed_events: default_allowed_events(),
        }
    }
}

// ── Loading and saving ────────────────────────────────────────────────────────

impl GatewayConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads the config at `path`, or the defaults if the file does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system errors other than "not
    /// found", and [`ConfigError::Parse`] if the TOML is malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Loads `path`, then applies `PAIRLINK_*` overrides from the process
    /// environment.
    ///
    /// # Errors
    ///
    /// See [`GatewayConfig::load`] and [`GatewayConfig::apply_env_overrides`].
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Writes the config to `path`.
    ///
    /// The file is written next to its destination first and then renamed
    /// over it, so readers never observe a half-written file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system failures or
    /// [`ConfigError::Serialize`] if serialization fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        let staging = path.with_extension("toml.tmp");
        std::fs::write(&staging, content).map_err(|source| ConfigError::Io {
            path: staging.clone(),
            source,
        })?;
        std::fs::rename(&staging, path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Overrides fields from environment variables.
    ///
    /// `lookup` returns a variable's value; pass `|v| std::env::var(v).ok()`
    /// for the real environment.  Recognised variables:
    ///
    /// | Variable                     | Field                                   |
    /// |------------------------------|-----------------------------------------|
    /// | `PAIRLINK_LOG_LEVEL`         | `gateway.log_level`                     |
    /// | `PAIRLINK_CREDENTIALS_DIR`   | `gateway.credentials_dir`               |
    /// | `PAIRLINK_QR_MODE`           | `qr.mode`                               |
    /// | `PAIRLINK_WEBHOOK_ENABLED`   | `webhook.enabled`                       |
    /// | `PAIRLINK_WEBHOOK_URLS`      | `webhook.endpoints` (comma separated)   |
    /// | `PAIRLINK_WEBHOOK_API_KEYS`  | per-endpoint `api_key`, by position     |
    /// | `PAIRLINK_WEBHOOK_EVENTS`    | `webhook.allowed_events`                |
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] if a mode or boolean is malformed.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("PAIRLINK_LOG_LEVEL") {
            self.gateway.log_level = level;
        }
        if let Some(dir) = lookup("PAIRLINK_CREDENTIALS_DIR") {
            self.gateway.credentials_dir = PathBuf::from(dir);
        }
        if let Some(mode) = lookup("PAIRLINK_QR_MODE") {
            self.qr.mode = mode.parse().map_err(|()| ConfigError::InvalidEnv {
                var: "PAIRLINK_QR_MODE",
                value: mode.clone(),
                expected: "vector, raster or none",
            })?;
        }
        if let Some(enabled) = lookup("PAIRLINK_WEBHOOK_ENABLED") {
            self.webhook.enabled =
                parse_bool(&enabled).ok_or_else(|| ConfigError::InvalidEnv {
                    var: "PAIRLINK_WEBHOOK_ENABLED",
                    value: enabled.clone(),
                    expected: "true or false",
                })?;
        }
        if let Some(urls) = lookup("PAIRLINK_WEBHOOK_URLS") {
            let keys = lookup("PAIRLINK_WEBHOOK_API_KEYS")
                .map(|keys| split_list(&keys))
                .unwrap_or_default();
            self.webhook.endpoints = split_list(&urls)
                .into_iter()
                .enumerate()
                .map(|(i, url)| WebhookEndpointConfig {
                    url,
                    api_key: keys.get(i).cloned(),
                })
                .collect();
        }
        if let Some(events) = lookup("PAIRLINK_WEBHOOK_EVENTS") {
            self.webhook.allowed_events = split_list(&events);
        }
        Ok(())
    }

    // ── Validation ────────────────────────────────────────────────────────────

    /// Lists non-fatal problems with this configuration.
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let key = self.gateway.admin_api_key.trim();
        if key.is_empty() || key == DEFAULT_ADMIN_API_KEY {
            warnings.push(ConfigWarning::InsecureAdminKey);
        }

        if self.webhook.enabled {
            if self.webhook.endpoints.is_empty() {
                warnings.push(ConfigWarning::WebhookWithoutEndpoints);
            }
            for endpoint in &self.webhook.endpoints {
                if !(endpoint.url.starts_with("http://") || endpoint.url.starts_with("https://")) {
                    warnings.push(ConfigWarning::SuspiciousWebhookUrl(endpoint.url.clone()));
                }
            }
            if self.webhook.allowed_events.is_empty() {
                warnings.push(ConfigWarning::EmptyAllowList);
            }
        }

        warnings
    }

    /// Logs every warning once.  Returns how many were logged.
    pub fn log_warnings(&self) -> usize {
        let warnings = self.warnings();
        for warning in &warnings {
            warn!("config: {warning}");
        }
        warnings.len()
    }

    // ── Runtime settings ──────────────────────────────────────────────────────

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let r = &self.reconnect;
        ReconnectPolicy {
            restart_required_delay: Duration::from_millis(r.restart_required_delay_ms),
            first_pairing_delay: Duration::from_millis(r.first_pairing_delay_ms),
            backoff_base: Duration::from_millis(r.backoff_base_ms),
            backoff_cap: Duration::from_millis(r.backoff_cap_ms),
        }
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            reconnect: self.reconnect_policy(),
            protocol_version: self.gateway.protocol_version,
        }
    }

    pub fn breaker_policy(&self) -> BreakerPolicy {
        BreakerPolicy {
            failure_threshold: self.webhook.failure_threshold,
            cooldown: Duration::from_millis(self.webhook.cooldown_ms),
            log_throttle: Duration::from_millis(self.webhook.log_throttle_ms),
        }
    }

    pub fn webhook_settings(&self) -> WebhookSettings {
        WebhookSettings {
            enabled: self.webhook.enabled,
            endpoints: self
                .webhook
                .endpoints
                .iter()
                .map(|endpoint| WebhookTarget {
                    url: endpoint.url.clone(),
                    api_key: endpoint.api_key.clone().filter(|key| !key.is_empty()),
                })
                .collect(),
            breaker: self.breaker_policy(),
            timeout: Duration::from_millis(self.webhook.timeout_ms),
            allowed_events: self.webhook.allowed_events.clone(),
        }
    }

    /// Render options, or `None` in text-only mode.
    pub fn qr_render_options(&self) -> Option<QrRenderOptions> {
        let format = match self.qr.mode {
            QrMode::Vector => QrFormat::Svg,
            QrMode::Raster => QrFormat::Png,
            QrMode::None => return None,
        };
        Some(QrRenderOptions {
            format,
            min_size: self.qr.size,
            quiet_zone: self.qr.quiet_zone,
            error_correction: self.qr.error_correction,
            dark_color: self.qr.dark_color.clone(),
            light_color: self.qr.light_color.clone(),
        })
    }

    /// `true` if every event type is forwarded to webhooks.
    pub fn forwards_all_events(&self) -> bool {
        self.webhook
            .allowed_events
            .iter()
            .any(|event| event == ALLOW_ALL_EVENTS)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
