use crate::directory::{Assignment, DispatchGroup, Operator};
use anyhow::Error;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use url::Url;

const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub http_addr: String,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub session: SessionConfig,
    pub inbound: InboundConfig,
    pub outbound: OutboundConfig,
    pub credential: Option<CredentialConfig>,
    pub directory: Option<DirectoryConfig>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of an issued credential in seconds
    pub token_ttl_secs: u64,
    /// Fraction of the lifetime after which the credential is renewed
    pub refresh_ratio: f64,
    pub retry: RetryConfig,
    /// Audio sink used when a dial does not name one
    pub audio_sink: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum RetryConfig {
    None,
    Backoff {
        max_attempts: u32,
        base_ms: u64,
        max_ms: Option<u64>,
    },
}

#[derive(Debug, Deserialize, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RingMode {
    Parallel,
    Serial,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct InboundConfig {
    pub ring_mode: RingMode,
    pub ring_timeout_secs: u32,
    pub pause_secs: f32,
    pub busy_message: String,
    pub unavailable_message: String,
    pub error_message: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(default)]
pub struct OutboundConfig {
    pub ring_timeout_secs: u32,
    pub pause_secs: f32,
    pub failure_message: String,
    pub error_message: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct CredentialConfig {
    /// Token issuance endpoint
    pub url: String,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DirectoryConfig {
    pub groups: Vec<DispatchGroup>,
    pub operators: Vec<Operator>,
    pub assignments: Vec<Assignment>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::None
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 3600,
            refresh_ratio: 0.8,
            retry: RetryConfig::default(),
            audio_sink: None,
        }
    }
}

impl SessionConfig {
    /// Delay between a successful connect and the credential renewal.
    pub fn refresh_delay(&self) -> Duration {
        Duration::from_secs_f64(self.token_ttl_secs as f64 * self.ratio())
    }

    /// Renewal delay for a credential whose remaining lifetime is known.
    /// Falls back to the configured lifetime when the issuer sent no expiry.
    pub fn refresh_delay_for(&self, expires_in: Option<Duration>) -> Duration {
        match expires_in {
            Some(left) => left.mul_f64(self.ratio()).max(MIN_REFRESH_DELAY),
            None => self.refresh_delay(),
        }
    }

    fn ratio(&self) -> f64 {
        if self.refresh_ratio > 0.0 && self.refresh_ratio < 1.0 {
            self.refresh_ratio
        } else {
            0.8
        }
    }
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            ring_mode: RingMode::Parallel,
            ring_timeout_secs: 30,
            pause_secs: 0.5,
            busy_message: "All dispatchers are currently busy. Please try again shortly."
                .to_string(),
            unavailable_message:
                "Thank you for calling. No dispatchers are currently available. Please try again later."
                    .to_string(),
            error_message: "We are experiencing technical difficulties. Please try again later."
                .to_string(),
        }
    }
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: 60,
            pause_secs: 0.5,
            failure_message: "The call could not be completed. Please try again.".to_string(),
            error_message: "An error occurred processing your call. Please try again."
                .to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            log_level: Some("info".to_string()),
            log_file: None,
            session: SessionConfig::default(),
            inbound: InboundConfig::default(),
            outbound: OutboundConfig::default(),
            credential: None,
            directory: None,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }

    /// Static checks run by `check-config` before anything is started.
    pub fn validate(&self) -> Result<(), Vec<ConfigIssue>> {
        let mut issues = Vec::new();
        if self.http_addr.parse::<SocketAddr>().is_err() {
            issues.push(ConfigIssue::new(
                "http_addr",
                format!("`{}` is not a socket address", self.http_addr),
            ));
        }
        if let Some(level) = &self.log_level {
            if level.parse::<LevelFilter>().is_err() {
                issues.push(ConfigIssue::new(
                    "log_level",
                    format!("unknown level `{}`", level),
                ));
            }
        }
        if self.session.token_ttl_secs == 0 {
            issues.push(ConfigIssue::new(
                "session.token_ttl_secs",
                "must be greater than zero",
            ));
        }
        if !(self.session.refresh_ratio > 0.0 && self.session.refresh_ratio < 1.0) {
            issues.push(ConfigIssue::new(
                "session.refresh_ratio",
                format!(
                    "{} is outside (0, 1), 0.8 will be used",
                    self.session.refresh_ratio
                ),
            ));
        }
        if let RetryConfig::Backoff { max_attempts: 0, .. } = self.session.retry {
            issues.push(ConfigIssue::new(
                "session.retry.max_attempts",
                "must be at least 1",
            ));
        }
        if let Some(credential) = &self.credential {
            match Url::parse(&credential.url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => issues.push(ConfigIssue::new(
                    "credential.url",
                    format!("unsupported scheme `{}`", url.scheme()),
                )),
                Err(e) => issues.push(ConfigIssue::new(
                    "credential.url",
                    format!("invalid url: {}", e),
                )),
            }
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigIssue {
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}
