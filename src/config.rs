//! Daemon configuration file.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{cdn::qiniu::DEFAULT_BASE_URL, core::types::RenewalPolicy, issuance::certificate::KeyType};

pub const DEFAULT_CONFIG_PATH: &str = "./config/config.toml";
pub const LETS_ENCRYPT_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Upper bound for the renewal threshold: Let's Encrypt certificates live 90
/// days and renewal has to start well inside that window.
const MAX_RENEWAL_THRESHOLD_DAYS: i64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub qiniu: QiniuConfig,
    pub acme: AcmeConfig,
    pub dns: DnsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Absent means alerts only go to the log.
    #[serde(default)]
    pub email: Option<EmailConfig>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct QiniuConfig {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_qiniu_base_url")]
    pub base_url: String,
    #[serde(default = "default_true")]
    pub force_https: bool,
    #[serde(default)]
    pub http2: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AcmeConfig {
    pub email: String,
    #[serde(default = "default_directory_url")]
    pub directory_url: String,
    /// Directory holding the ACME account key.
    #[serde(default = "default_acme_storage")]
    pub storage_path: PathBuf,
    #[serde(default)]
    pub key_type: KeyType,
    #[serde(default = "default_propagation_timeout")]
    pub propagation_timeout_secs: u64,
    #[serde(default = "default_propagation_interval")]
    pub propagation_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DnsProviderKind {
    Aliyun,
    Cloudflare,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DnsConfig {
    pub provider: DnsProviderKind,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub access_key_secret: String,
    #[serde(default)]
    pub api_token: String,
    /// Zone override; otherwise derived from each challenge name.
    #[serde(default)]
    pub zone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EmailConfig {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub sender: String,
    pub receivers: Vec<String>,
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    #[serde(default = "default_pass_interval")]
    pub pass_interval_secs: u64,
    #[serde(default = "default_activation_delay")]
    pub activation_delay_secs: u64,
    #[serde(default = "default_renewal_threshold")]
    pub renewal_threshold_days: i64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            pass_interval_secs: default_pass_interval(),
            activation_delay_secs: default_activation_delay(),
            renewal_threshold_days: default_renewal_threshold(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_qiniu_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_directory_url() -> String {
    LETS_ENCRYPT_DIRECTORY.to_string()
}
fn default_acme_storage() -> PathBuf {
    PathBuf::from("./data/acme")
}
fn default_propagation_timeout() -> u64 {
    180
}
fn default_propagation_interval() -> u64 {
    5
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./data/autossl.sqlite")
}
fn default_smtp_port() -> u16 {
    465
}
fn default_pass_interval() -> u64 {
    300
}
fn default_activation_delay() -> u64 {
    3
}
fn default_renewal_threshold() -> i64 {
    RenewalPolicy::DEFAULT_THRESHOLD_DAYS
}
fn default_http_timeout() -> u64 {
    30
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require("qiniu.access_key", &self.qiniu.access_key)?;
        require("qiniu.secret_key", &self.qiniu.secret_key)?;
        require("acme.email", &self.acme.email)?;
        require("acme.directory_url", &self.acme.directory_url)?;
        if self.acme.propagation_interval_secs == 0 {
            return Err(invalid("acme.propagation_interval_secs must be at least 1"));
        }

        match self.dns.provider {
            DnsProviderKind::Aliyun => {
                require("dns.access_key_id", &self.dns.access_key_id)?;
                require("dns.access_key_secret", &self.dns.access_key_secret)?;
            }
            DnsProviderKind::Cloudflare => require("dns.api_token", &self.dns.api_token)?,
        }

        if let Some(email) = &self.email {
            require("email.username", &email.username)?;
            require("email.password", &email.password)?;
            require("email.smtp_host", &email.smtp_host)?;
            if email.receivers.iter().all(|r| r.trim().is_empty()) {
                return Err(invalid("email.receivers must list at least one address"));
            }
        }

        let schedule = &self.schedule;
        if schedule.pass_interval_secs == 0 {
            return Err(invalid("schedule.pass_interval_secs must be at least 1"));
        }
        if schedule.http_timeout_secs == 0 {
            return Err(invalid("schedule.http_timeout_secs must be at least 1"));
        }
        if !(1..=MAX_RENEWAL_THRESHOLD_DAYS).contains(&schedule.renewal_threshold_days) {
            return Err(invalid(format!(
                "schedule.renewal_threshold_days must be between 1 and {MAX_RENEWAL_THRESHOLD_DAYS}"
            )));
        }
        Ok(())
    }

    pub fn renewal_policy(&self) -> RenewalPolicy {
        RenewalPolicy::from_days(self.schedule.renewal_threshold_days)
    }

    pub fn pass_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.pass_interval_secs)
    }

    pub fn activation_delay(&self) -> Duration {
        Duration::from_secs(self.schedule.activation_delay_secs)
    }
}

fn require(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{field} is required")));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation(message.into())
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "<unset>" } else { "<redacted>" }
}

/// Log-safe summary; credentials never appear.
impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "qiniu(base_url={}, access_key={}, secret_key={}, force_https={}, http2={}) ",
            self.qiniu.base_url,
            self.qiniu.access_key,
            redact(&self.qiniu.secret_key),
            self.qiniu.force_https,
            self.qiniu.http2
        )?;
        write!(
            f,
            "acme(email={}, directory={}, key_type={}) ",
            self.acme.email, self.acme.directory_url, self.acme.key_type
        )?;
        write!(
            f,
            "dns(provider={:?}, zone={}, access_key_secret={}, api_token={}) ",
            self.dns.provider,
            self.dns.zone.as_deref().unwrap_or("<auto>"),
            redact(&self.dns.access_key_secret),
            redact(&self.dns.api_token)
        )?;
        write!(f, "store({}) ", self.store.path.display())?;
        match &self.email {
            Some(email) => write!(
                f,
                "email({}:{}, user={}, password={}, receivers={}) ",
                email.smtp_host,
                email.smtp_port,
                email.username,
                redact(&email.password),
                email.receivers.len()
            )?,
            None => write!(f, "email(disabled) ")?,
        }
        write!(
            f,
            "schedule(every {}s, activation delay {}s, renew {}d before expiry)",
            self.schedule.pass_interval_secs,
            self.schedule.activation_delay_secs,
            self.schedule.renewal_threshold_days
        )
    }
}
