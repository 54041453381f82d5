//! Configuration management
//!
//! This module handles loading and validating configuration from TOML files.
//! The account section is merged into the portal form at login time, so the
//! file never has to spell out gateway-specific credential fields by hand.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Only attempt logins while connected to this SSID (empty = any network)
    #[serde(default)]
    pub wifi_ssid: String,

    /// Seconds between connectivity checks / retry attempts
    #[serde(default = "default_interval")]
    pub auto_login_interval: i64,

    /// How the account field is built
    #[serde(default)]
    pub login_mode: LoginMode,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Campus account credentials
    #[serde(default)]
    pub account: AccountConfig,

    /// Portal request description
    #[serde(default)]
    pub portal: PortalConfig,
}

/// How the login account field is derived from the student ID
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoginMode {
    /// Student ID plus carrier suffix, e.g. `08231234@telecom`
    #[default]
    OperatorId,
    /// Raw student ID, no suffix (campus-only accounts)
    CampusOnly,
}

/// Campus account credentials
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AccountConfig {
    #[serde(default)]
    pub student_id: String,

    /// Carrier name or alias: telecom/ct/dx, unicom/cu/lt, cmcc/mobile/yd, none
    #[serde(default)]
    pub carrier: String,

    #[serde(default)]
    pub password: String,
}

/// Declarative description of one login/logout HTTP exchange
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PortalConfig {
    /// Gateway login endpoint; required before any request is attempted
    #[serde(default)]
    pub login_url: String,

    /// "GET" or "POST"; empty means GET
    #[serde(default)]
    pub method: String,

    /// Form fields sent on login (account fields are merged in at login time)
    #[serde(default)]
    pub form: HashMap<String, String>,

    /// Form fields sent on logout; empty means logout is unconfigured
    #[serde(default)]
    pub logout_form: HashMap<String, String>,

    /// Extra request headers; these override the built-in defaults
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Response body substrings that indicate a successful login;
    /// empty means "trust the gateway"
    #[serde(default)]
    pub success_keywords: Vec<String>,
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

fn default_interval() -> i64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Map a carrier name or alias to the suffix the gateway expects.
/// Unrecognized values fall back to `@telecom`.
pub fn carrier_suffix(carrier: &str) -> &'static str {
    match carrier.to_lowercase().as_str() {
        "" | "none" => "",
        "telecom" | "ct" | "dx" => "@telecom",
        "unicom" | "cu" | "lt" => "@unicom",
        "cmcc" | "mobile" | "yd" => "@cmcc",
        _ => "@telecom",
    }
}

impl Config {
    /// Load configuration from `path` if given, else from the first of
    /// `config.toml`, `~/.config/campusnet/config.toml`,
    /// `/etc/campusnet/config.toml` that exists. No file found = defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::from_file(p);
        }

        let candidates = vec![
            PathBuf::from("config.toml"),
            dirs::home_dir()
                .map(|h| h.join(".config/campusnet/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/campusnet/config.toml"),
        ];

        for candidate in &candidates {
            if candidate.exists() {
                tracing::debug!("Loading config from: {}", candidate.display());
                return Self::from_file(candidate);
            }
        }

        tracing::debug!("No config file found, using defaults");
        let mut config = Self::default();
        config.apply_defaults();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config =
            toml::from_str(&contents).context("Failed to parse config file")?;
        config.apply_defaults();
        Ok(config)
    }

    fn apply_defaults(&mut self) {
        if self.auto_login_interval <= 0 {
            self.auto_login_interval = default_interval();
        }
        if self.portal.method.is_empty() {
            self.portal.method = "GET".to_string();
        }
    }

    /// Tick period for the control loop, already clamped to a sane minimum
    pub fn interval(&self) -> Duration {
        let secs = if self.auto_login_interval <= 0 {
            default_interval()
        } else {
            self.auto_login_interval
        };
        Duration::from_secs(secs as u64)
    }

    /// Account field submitted to the gateway: the student ID, with the
    /// carrier suffix appended unless the account is campus-only.
    pub fn login_account(&self) -> String {
        let mut account = self.account.student_id.clone();
        if self.login_mode != LoginMode::CampusOnly {
            account.push_str(carrier_suffix(&self.account.carrier));
        }
        account
    }

    /// Portal config with the account credentials merged into the form.
    /// The stored config is left untouched; credentials are never written back.
    pub fn prepared_portal(&self) -> PortalConfig {
        let mut portal = self.portal.clone();
        if !self.account.student_id.is_empty() {
            portal
                .form
                .insert("user_account".to_string(), self.login_account());
            portal
                .form
                .insert("user_password".to_string(), self.account.password.clone());
        }
        portal
    }
}
