use crate::config::DirectoryConfig;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchGroup {
    pub id: String,
    pub name: String,
    pub phone_number: String,
    pub subscriber_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperatorStatus {
    Available,
    Online,
    Busy,
    Away,
    #[default]
    Offline,
}

impl OperatorStatus {
    /// Whether an operator in this status should be rung for inbound calls.
    pub fn accepts_calls(&self) -> bool {
        matches!(self, OperatorStatus::Available | OperatorStatus::Online)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operator {
    pub id: String,
    pub name: String,
    pub subscriber_id: Option<String>,
    #[serde(default)]
    pub status: OperatorStatus,
}

impl Operator {
    /// Platform address used to ring this operator's browser client.
    pub fn ring_address(&self) -> Option<String> {
        self.subscriber_id
            .as_ref()
            .filter(|id| !id.is_empty())
            .map(|id| format!("/private/{}", id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub id: String,
    pub user_id: String,
    pub group_id: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    pub direct_phone: Option<String>,
    pub direct_subscriber_id: Option<String>,
}

/// Lookup service over operators, dispatch groups and line assignments.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn find_group_by_number(&self, phone_number: &str) -> Result<Option<DispatchGroup>>;
    async fn find_group(&self, group_id: &str) -> Result<Option<DispatchGroup>>;
    async fn group_assignments(&self, group_id: &str) -> Result<Vec<Assignment>>;
    async fn user_assignments(&self, user_id: &str) -> Result<Vec<Assignment>>;
    async fn operator(&self, user_id: &str) -> Result<Option<Operator>>;
}

/// Ring addresses of every operator assigned to the group who can take a call.
pub async fn ring_targets(store: &dyn DirectoryStore, group_id: &str) -> Result<Vec<String>> {
    let mut targets = Vec::new();
    for assignment in store.group_assignments(group_id).await? {
        let Some(operator) = store.operator(&assignment.user_id).await? else {
            continue;
        };
        if !operator.status.accepts_calls() {
            continue;
        }
        if let Some(address) = operator.ring_address() {
            if !targets.contains(&address) {
                targets.push(address);
            }
        }
    }
    Ok(targets)
}

pub struct MemoryDirectory {
    groups: RwLock<HashMap<String, DispatchGroup>>,
    operators: RwLock<HashMap<String, Operator>>,
    assignments: RwLock<Vec<Assignment>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            operators: RwLock::new(HashMap::new()),
            assignments: RwLock::new(Vec::new()),
        }
    }

    pub fn from_config(config: &DirectoryConfig) -> Self {
        Self {
            groups: RwLock::new(
                config
                    .groups
                    .iter()
                    .map(|g| (g.id.clone(), g.clone()))
                    .collect(),
            ),
            operators: RwLock::new(
                config
                    .operators
                    .iter()
                    .map(|o| (o.id.clone(), o.clone()))
                    .collect(),
            ),
            assignments: RwLock::new(config.assignments.clone()),
        }
    }

    pub async fn add_group(&self, group: DispatchGroup) {
        self.groups.write().await.insert(group.id.clone(), group);
    }

    pub async fn add_operator(&self, operator: Operator) {
        self.operators
            .write()
            .await
            .insert(operator.id.clone(), operator);
    }

    pub async fn add_assignment(&self, assignment: Assignment) {
        self.assignments.write().await.push(assignment);
    }

    pub async fn set_status(&self, user_id: &str, status: OperatorStatus) -> Result<()> {
        match self.operators.write().await.get_mut(user_id) {
            Some(operator) => {
                operator.status = status;
                Ok(())
            }
            None => Err(anyhow::anyhow!("operator not found: {}", user_id)),
        }
    }
}

#[async_trait]
impl DirectoryStore for MemoryDirectory {
    async fn find_group_by_number(&self, phone_number: &str) -> Result<Option<DispatchGroup>> {
        let groups = self.groups.read().await;
        Ok(groups
            .values()
            .find(|g| g.phone_number == phone_number)
            .cloned())
    }

    async fn find_group(&self, group_id: &str) -> Result<Option<DispatchGroup>> {
        Ok(self.groups.read().await.get(group_id).cloned())
    }

    async fn group_assignments(&self, group_id: &str) -> Result<Vec<Assignment>> {
        let assignments = self.assignments.read().await;
        Ok(assignments
            .iter()
            .filter(|a| a.group_id.as_deref() == Some(group_id))
            .cloned()
            .collect())
    }

    async fn user_assignments(&self, user_id: &str) -> Result<Vec<Assignment>> {
        let assignments = self.assignments.read().await;
        Ok(assignments
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn operator(&self, user_id: &str) -> Result<Option<Operator>> {
        Ok(self.operators.read().await.get(user_id).cloned())
    }
}
