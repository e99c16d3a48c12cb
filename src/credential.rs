use crate::config::CredentialConfig;
use crate::directory::DirectoryStore;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Group,
    Direct,
}

/// An outbound identity the operator may present as caller id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Line {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: LineKind,
    pub name: String,
    pub phone_number: String,
    pub subscriber_id: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// Time limited token authorizing a client on the signaling platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    pub token: String,
    pub subscriber_id: String,
    /// Expiry as unix seconds
    #[serde(default, deserialize_with = "deserialize_expiry")]
    pub expires_at: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_lines")]
    pub available_lines: Vec<Line>,
}

impl Credential {
    pub fn new(
        token: String,
        subscriber_id: String,
        expires_at: Option<i64>,
        available_lines: Vec<Line>,
    ) -> Self {
        let mut credential = Self {
            token,
            subscriber_id,
            expires_at,
            available_lines,
        };
        credential.normalize_lines();
        credential
    }

    /// Keep exactly one default line: the first flagged one, or the first line.
    pub fn normalize_lines(&mut self) {
        let first_default = self.available_lines.iter().position(|l| l.is_default);
        let keep = first_default.unwrap_or(0);
        for (idx, line) in self.available_lines.iter_mut().enumerate() {
            line.is_default = idx == keep;
        }
    }

    pub fn default_line(&self) -> Option<&Line> {
        self.available_lines.iter().find(|l| l.is_default)
    }

    pub fn line(&self, id: &str) -> Option<&Line> {
        self.available_lines.iter().find(|l| l.id == id)
    }

    pub fn expires_in(&self, now: DateTime<Utc>) -> Option<Duration> {
        let expires_at = self.expires_at?;
        let remaining = expires_at - now.timestamp();
        if remaining <= 0 {
            Some(Duration::ZERO)
        } else {
            Some(Duration::from_secs(remaining as u64))
        }
    }
}

fn deserialize_expiry<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.timestamp())
            .ok()
            .or_else(|| s.parse::<i64>().ok()),
        _ => None,
    })
}

fn deserialize_lines<'de, D>(deserializer: D) -> Result<Vec<Line>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Line>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Build the caller-id lines for an operator from their assignments.
///
/// Each assignment contributes its group line and, when present, a direct
/// line. A direct line only inherits the default flag when the assignment
/// has no group.
pub async fn lines_for_operator(store: &dyn DirectoryStore, user_id: &str) -> Result<Vec<Line>> {
    let mut lines = Vec::new();
    for assignment in store.user_assignments(user_id).await? {
        let group = match assignment.group_id.as_deref() {
            Some(group_id) => store.find_group(group_id).await?,
            None => None,
        };
        let has_group = group.is_some();
        if let Some(group) = group {
            lines.push(Line {
                id: group.id,
                kind: LineKind::Group,
                name: group.name,
                phone_number: group.phone_number,
                subscriber_id: group.subscriber_id,
                is_default: assignment.is_default,
            });
        }
        if let Some(direct_phone) = assignment.direct_phone {
            lines.push(Line {
                id: format!("direct-{}", assignment.id),
                kind: LineKind::Direct,
                name: "Personal Line".to_string(),
                phone_number: direct_phone,
                subscriber_id: assignment.direct_subscriber_id,
                is_default: !has_group && assignment.is_default,
            });
        }
    }
    Ok(lines)
}

/// Issues credentials for the authenticated operator.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn issue(&self) -> Result<Credential>;
}

pub struct HttpCredentialProvider {
    pub url: String,
    pub access_token: String,
    pub client: reqwest::Client,
}

impl HttpCredentialProvider {
    pub fn new(config: &CredentialConfig, access_token: String) -> Self {
        let mut builder =
            reqwest::Client::builder().user_agent(crate::version::get_useragent());
        if let Some(timeout) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout));
        } else {
            builder = builder.timeout(Duration::from_secs(10));
        }
        Self {
            url: config.url.clone(),
            access_token,
            client: builder.build().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn issue(&self) -> Result<Credential> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| anyhow!("credential request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = self.url, %status, "credential issuance rejected");
            return Err(anyhow!("credential issuance failed: {} {}", status, body));
        }

        let mut credential: Credential = response
            .json()
            .await
            .map_err(|e| anyhow!("invalid credential response: {}", e))?;
        if credential.token.is_empty() {
            return Err(anyhow!("credential response carried an empty token"));
        }
        credential.normalize_lines();
        info!(
            subscriber_id = credential.subscriber_id,
            lines = credential.available_lines.len(),
            "credential issued"
        );
        Ok(credential)
    }
}
