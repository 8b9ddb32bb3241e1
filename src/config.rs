//! Configuration file management for fingerwatch.
//!
//! Settings come from three layers with clear precedence:
//!
//! 1. Default values (lowest priority)
//! 2. Configuration file (fingerwatch.toml or specified with --config)
//! 3. Command-line arguments (highest priority)
//!
//! The merged [`Config`] is then checked by [`Config::validate`], which yields
//! the concrete [`Settings`] the rest of the crate runs on. Mail credentials
//! never live in the file; they are read from `EMAIL_USER` and `EMAIL_PASS`,
//! which may also come from a `.env` file (see [`load_env_file`]).
//!
//! # Example Configuration File
//!
//! ```toml
//! hostname = "example.firebaseio.com"
//! reference_url = "http://fingerprints.example.com/firebase"
//! schedule = "*/45 * * * *"
//!
//! [mail]
//! recipients = ["ops@example.com"]
//! ```

use crate::comparator::RetryPolicy;
use crate::notifier::{MailCredentials, MailSettings, DEFAULT_SUBJECT};
use crate::output::OutputFormat;
use crate::schedule::{Schedule, DEFAULT_SCHEDULE};
use crate::{DigestAlgorithm, MonitorTarget, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Environment variable holding the SMTP username (also the sender address).
pub const EMAIL_USER_VAR: &str = "EMAIL_USER";
/// Environment variable holding the SMTP password.
pub const EMAIL_PASS_VAR: &str = "EMAIL_PASS";

/// Main configuration structure for fingerwatch.
///
/// All fields are optional to support partial configuration and merging.
/// Missing values will be filled in by defaults or overridden by CLI arguments.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Host whose certificate is monitored
    pub hostname: Option<String>,
    /// TLS port of the monitored host
    pub port: Option<u16>,
    /// URL serving the expected fingerprint
    pub reference_url: Option<String>,
    /// Cron expression for the check cadence
    pub schedule: Option<String>,
    /// Certificate digest: sha1 or sha256
    pub digest: Option<String>,
    /// Report format: text, json, summary
    pub output: Option<String>,
    pub retry: Option<RetryConfig>,
    pub timeouts: Option<TimeoutConfig>,
    pub mail: Option<MailConfig>,
    pub prometheus: Option<PrometheusConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first failed attempt of an invocation
    pub max_retries: Option<u32>,
    /// Pause between attempts, in seconds
    pub delay_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct TimeoutConfig {
    pub handshake_secs: Option<u64>,
    pub reference_secs: Option<u64>,
    pub dns_secs: Option<u64>,
    pub mail_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct MailConfig {
    /// Send an alert email on mismatch
    pub enabled: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Use STARTTLS instead of implicit TLS
    pub starttls: Option<bool>,
    /// Display name of the sender
    pub sender_name: Option<String>,
    pub recipients: Option<Vec<String>>,
    pub subject: Option<String>,
}

/// Prometheus integration configuration.
///
/// Controls whether check results are pushed to a Prometheus Push Gateway
/// and specifies the gateway address.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct PrometheusConfig {
    /// Enable prometheus metrics pushing
    pub enabled: Option<bool>,
    /// Prometheus push gateway address (e.g., "http://localhost:9091")
    pub address: Option<String>,
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub target: MonitorTarget,
    pub schedule: Schedule,
    pub digest: DigestAlgorithm,
    pub output: OutputFormat,
    pub retry: RetryPolicy,
    pub handshake_timeout: Duration,
    pub reference_timeout: Duration,
    pub dns_timeout: Duration,
    /// `None` when mail alerts are disabled
    pub mail: Option<MailSettings>,
    /// Push gateway address when metrics are enabled
    pub prometheus: Option<String>,
}

/// Command-line overrides, see [`Config::from_cli_args`].
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub reference_url: Option<String>,
    pub schedule: Option<String>,
    pub digest: Option<String>,
    pub output: Option<String>,
    pub max_retries: Option<u32>,
    pub no_mail: bool,
    pub prometheus: Option<bool>,
    pub prometheus_address: Option<String>,
}

macro_rules! take_some {
    ($target:expr, $other:expr, $($field:ident),+) => {
        $( if $other.$field.is_some() { $target.$field = $other.$field; } )+
    };
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully parsed configuration
    /// * `Err(ConfigError::Io)` - File could not be read
    /// * `Err(ConfigError::Parse)` - File contains invalid TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Built-in defaults.
    ///
    /// - `port`: 443
    /// - `schedule`: `*/45 * * * *`
    /// - `digest`: sha1
    /// - `output`: text
    /// - `retry`: 3 retries, 5 seconds apart
    /// - `timeouts`: handshake 10s, reference 10s, dns 10s, mail 30s
    /// - `mail`: enabled, smtp.gmail.com:465 with implicit TLS, no recipients
    /// - `prometheus`: disabled, `http://localhost:9091`
    pub fn defaults() -> Self {
        Config {
            hostname: None,
            port: Some(DEFAULT_PORT),
            reference_url: None,
            schedule: Some(DEFAULT_SCHEDULE.to_string()),
            digest: Some(DigestAlgorithm::Sha1.to_string()),
            output: Some(OutputFormat::Text.to_string()),
            retry: Some(RetryConfig {
                max_retries: Some(3),
                delay_secs: Some(5),
            }),
            timeouts: Some(TimeoutConfig {
                handshake_secs: Some(10),
                reference_secs: Some(10),
                dns_secs: Some(10),
                mail_secs: Some(30),
            }),
            mail: Some(MailConfig {
                enabled: Some(true),
                host: Some("smtp.gmail.com".to_string()),
                port: Some(465),
                starttls: Some(false),
                sender_name: Some("Fingerprint Watch".to_string()),
                recipients: None,
                subject: Some(DEFAULT_SUBJECT.to_string()),
            }),
            prometheus: Some(PrometheusConfig {
                enabled: Some(false),
                address: Some("http://localhost:9091".to_string()),
            }),
        }
    }

    /// Merges this configuration with another, prioritizing the other's values.
    ///
    /// For each field, if the `other` config has a value (Some), it overrides
    /// this config's value. Nested tables merge field by field.
    pub fn merge_with(mut self, other: Config) -> Self {
        take_some!(self, other, hostname, port, reference_url, schedule, digest, output);

        if let Some(other_retry) = other.retry {
            let retry = self.retry.get_or_insert_with(RetryConfig::default);
            take_some!(retry, other_retry, max_retries, delay_secs);
        }
        if let Some(other_timeouts) = other.timeouts {
            let timeouts = self.timeouts.get_or_insert_with(TimeoutConfig::default);
            take_some!(
                timeouts,
                other_timeouts,
                handshake_secs,
                reference_secs,
                dns_secs,
                mail_secs
            );
        }
        if let Some(other_mail) = other.mail {
            let mail = self.mail.get_or_insert_with(MailConfig::default);
            take_some!(
                mail,
                other_mail,
                enabled,
                host,
                port,
                starttls,
                sender_name,
                recipients,
                subject
            );
        }
        if let Some(other_prom) = other.prometheus {
            let prom = self.prometheus.get_or_insert_with(PrometheusConfig::default);
            take_some!(prom, other_prom, enabled, address);
        }
        self
    }

    /// Creates a Config from command-line arguments for merging.
    ///
    /// Only provided arguments (Some values) will override other configurations.
    pub fn from_cli_args(cli: CliOverrides) -> Self {
        Config {
            hostname: cli.hostname,
            port: cli.port,
            reference_url: cli.reference_url,
            schedule: cli.schedule,
            digest: cli.digest,
            output: cli.output,
            retry: Some(RetryConfig {
                max_retries: cli.max_retries,
                delay_secs: None,
            }),
            timeouts: None,
            mail: Some(MailConfig {
                enabled: if cli.no_mail { Some(false) } else { None },
                ..MailConfig::default()
            }),
            prometheus: Some(PrometheusConfig {
                enabled: cli.prometheus,
                address: cli.prometheus_address,
            }),
        }
    }

    /// Checks the merged configuration and resolves it into [`Settings`].
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let hostname = self
            .hostname
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::Validation("hostname is required".to_string()))?;

        let reference_url = self.reference_url.as_deref().ok_or_else(|| {
            ConfigError::Validation("reference_url is required".to_string())
        })?;
        let reference_url = Url::parse(reference_url).map_err(|e| {
            ConfigError::Validation(format!("reference_url '{}': {}", reference_url, e))
        })?;
        if !matches!(reference_url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "reference_url must be http or https, got '{}'",
                reference_url.scheme()
            )));
        }

        let port = self.port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(ConfigError::Validation("port must not be 0".to_string()));
        }

        let schedule: Schedule = self
            .schedule
            .as_deref()
            .unwrap_or(DEFAULT_SCHEDULE)
            .parse()
            .map_err(|e| ConfigError::Validation(format!("{}", e)))?;

        let digest = match self.digest.as_deref() {
            Some(d) => d
                .parse()
                .map_err(|_| ConfigError::Validation(format!("unknown digest '{}'", d)))?,
            None => DigestAlgorithm::default(),
        };

        let output = match self.output.as_deref() {
            Some(o) => o
                .parse()
                .map_err(|_| ConfigError::Validation(format!("unknown output format '{}'", o)))?,
            None => OutputFormat::Text,
        };

        let retry = self.retry.clone().unwrap_or_default();
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: retry.max_retries.unwrap_or(defaults.max_retries),
            delay: retry.delay_secs.map(Duration::from_secs).unwrap_or(defaults.delay),
        };

        let timeouts = self.timeouts.clone().unwrap_or_default();
        let secs = |value: Option<u64>, default: u64, name: &str| match value.unwrap_or(default) {
            0 => Err(ConfigError::Validation(format!("{} must be positive", name))),
            s => Ok(Duration::from_secs(s)),
        };
        let handshake_timeout = secs(timeouts.handshake_secs, 10, "timeouts.handshake_secs")?;
        let reference_timeout = secs(timeouts.reference_secs, 10, "timeouts.reference_secs")?;
        let dns_timeout = secs(timeouts.dns_secs, 10, "timeouts.dns_secs")?;
        let mail_timeout = secs(timeouts.mail_secs, 30, "timeouts.mail_secs")?;

        let mail = match &self.mail {
            Some(mail) if mail.enabled.unwrap_or(true) => {
                let recipients = mail.recipients.clone().unwrap_or_default();
                if recipients.is_empty() {
                    return Err(ConfigError::Validation(
                        "mail.recipients must list at least one address when mail is enabled"
                            .to_string(),
                    ));
                }
                Some(MailSettings {
                    host: mail.host.clone().unwrap_or_else(|| "smtp.gmail.com".to_string()),
                    port: mail.port.unwrap_or(465),
                    starttls: mail.starttls.unwrap_or(false),
                    sender_name: mail
                        .sender_name
                        .clone()
                        .unwrap_or_else(|| "Fingerprint Watch".to_string()),
                    recipients,
                    subject: mail
                        .subject
                        .clone()
                        .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
                    timeout: mail_timeout,
                })
            }
            _ => None,
        };

        let prometheus = match &self.prometheus {
            Some(prom) if prom.enabled.unwrap_or(false) => Some(
                prom.address
                    .clone()
                    .unwrap_or_else(|| "http://localhost:9091".to_string()),
            ),
            _ => None,
        };

        Ok(Settings {
            target: MonitorTarget::new(hostname, port, reference_url),
            schedule,
            digest,
            output,
            retry,
            handshake_timeout,
            reference_timeout,
            dns_timeout,
            mail,
            prometheus,
        })
    }

    /// Generates an example configuration file in TOML format.
    pub fn example_toml() -> String {
        let example = Config {
            hostname: Some("example.firebaseio.com".to_string()),
            reference_url: Some("http://fingerprints.example.com/firebase".to_string()),
            mail: Some(MailConfig {
                recipients: Some(vec![
                    "ops@example.com".to_string(),
                    "oncall@example.com".to_string(),
                ]),
                ..Config::defaults().mail.unwrap_or_default()
            }),
            ..Config::defaults()
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }
}

/// Loads variables from a `.env` file into the process environment.
///
/// With no `path` the file is searched for in the current directory and its
/// parents. Variables already set in the environment are left untouched.
/// Returns the file that was loaded, if any.
pub fn load_env_file(path: Option<&Path>) -> Option<PathBuf> {
    let loaded = match path {
        Some(path) => dotenvy::from_path(path).map(|_| path.to_path_buf()),
        None => dotenvy::dotenv(),
    };
    match loaded {
        Ok(path) => {
            tracing::debug!("Loaded environment from {}", path.display());
            Some(path)
        }
        Err(e) if e.not_found() => {
            tracing::debug!("No .env file found");
            None
        }
        Err(e) => {
            tracing::warn!("Ignoring .env file: {}", e);
            None
        }
    }
}

impl MailCredentials {
    /// Reads `EMAIL_USER` and `EMAIL_PASS` from the process environment.
    pub fn from_env() -> Result<MailCredentials, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<MailCredentials, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::Validation(format!("{} is not set", key)))
        };
        Ok(MailCredentials {
            username: get(EMAIL_USER_VAR)?,
            password: get(EMAIL_PASS_VAR)?,
        })
    }
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    Parse(String),
    /// Validation error (missing required fields, invalid values, etc.)
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "IO Error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Parse Error: {}", msg),
            ConfigError::Validation(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
