//! Agent repository

use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stamp;
use crate::db::codec::Record;
use crate::db::connection::{ConnectionManager, Database};
use crate::db::error::{StoreError, StoreResult};
use crate::db::schema::Store;
use crate::db::transaction::{Direction, KeyRange, Transaction, TransactionMode};

pub const DEFAULT_AGENT_NAME: &str = "Assistant";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Upper bound on sub-agents attached to an agent or conversation.
pub const MAX_SUB_AGENTS: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub system_prompt: String,
    pub model: String,
    #[serde(default)]
    pub sub_agents: Vec<SubAgent>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Record for Agent {
    const STORE: Store = Store::Agents;

    fn key(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubAgent {
    pub name: String,
    pub mode: SubAgentMode,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubAgentMode {
    Handoff,
    Tool,
}

impl SubAgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubAgentMode::Handoff => "handoff",
            SubAgentMode::Tool => "tool",
        }
    }
}

impl std::str::FromStr for SubAgentMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "handoff" => Ok(SubAgentMode::Handoff),
            "tool" => Ok(SubAgentMode::Tool),
            _ => Err(StoreError::ConstraintViolation(format!(
                "Unknown sub-agent mode: {}",
                s
            ))),
        }
    }
}

/// Parses the `name:mode` form used on the command line.
impl std::str::FromStr for SubAgent {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, mode) = s.rsplit_once(':').ok_or_else(|| {
            StoreError::ConstraintViolation(format!("Expected name:mode, got {}", s))
        })?;
        if name.is_empty() {
            return Err(StoreError::ConstraintViolation(format!(
                "Sub-agent name is empty in {}",
                s
            )));
        }
        Ok(SubAgent {
            name: name.to_string(),
            mode: mode.parse()?,
        })
    }
}

impl std::fmt::Display for SubAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.mode.as_str())
    }
}

pub(crate) fn check_sub_agents(sub_agents: &[SubAgent]) -> StoreResult<()> {
    if sub_agents.len() > MAX_SUB_AGENTS {
        return Err(StoreError::ConstraintViolation(format!(
            "at most {} sub-agents are allowed, got {}",
            MAX_SUB_AGENTS,
            sub_agents.len()
        )));
    }
    Ok(())
}

fn new_agent(name: Option<String>, system_prompt: Option<String>, model: Option<String>) -> Agent {
    let now = stamp(None);
    Agent {
        id: 0,
        name: name.unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string()),
        system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        sub_agents: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

pub struct AgentRepository {
    manager: Arc<ConnectionManager>,
}

impl AgentRepository {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    async fn db(&self) -> StoreResult<Database> {
        self.manager.open().await
    }

    /// Create a new agent, filling unset fields with defaults
    pub async fn create(
        &self,
        name: Option<String>,
        system_prompt: Option<String>,
        model: Option<String>,
    ) -> StoreResult<i64> {
        let agent = new_agent(name, system_prompt, model);
        let id = self
            .db()
            .await?
            .transaction(&[Store::Agents], TransactionMode::ReadWrite, |tx| tx.add(&agent))
            .await?;

        tracing::debug!("Created agent: {} ({})", id, agent.name);
        Ok(id)
    }

    /// Return the most recently updated agent, seeding the default one when
    /// the store is empty.
    pub async fn ensure_default(&self) -> StoreResult<Agent> {
        self.db()
            .await?
            .transaction(&[Store::Agents], TransactionMode::ReadWrite, |tx| {
                if let Some(latest) = latest(tx)? {
                    return Ok(latest);
                }
                let mut agent = new_agent(None, None, None);
                agent.id = tx.add(&agent)?;
                tracing::info!("Seeded default agent: {}", agent.id);
                Ok(agent)
            })
            .await
    }

    /// List all agents, most recently updated first
    pub async fn get_all(&self) -> StoreResult<Vec<Agent>> {
        self.db()
            .await?
            .transaction(&[Store::Agents], TransactionMode::ReadOnly, |tx| {
                tx.get_all_by_index("updatedAt", KeyRange::All, Direction::Prev)
            })
            .await
    }

    /// Get an agent by ID
    pub async fn get(&self, id: i64) -> StoreResult<Option<Agent>> {
        self.db()
            .await?
            .transaction(&[Store::Agents], TransactionMode::ReadOnly, |tx| tx.get(id))
            .await
    }

    /// Replace an existing agent. `created_at` is kept from the stored record
    /// and `updated_at` is refreshed.
    pub async fn update(&self, agent: &Agent) -> StoreResult<Agent> {
        check_sub_agents(&agent.sub_agents)?;

        let updated = self
            .db()
            .await?
            .transaction(&[Store::Agents], TransactionMode::ReadWrite, |tx| {
                let stored: Agent = tx
                    .get(agent.id)?
                    .ok_or_else(|| StoreError::not_found(Store::Agents.name(), agent.id))?;

                let updated = Agent {
                    created_at: stored.created_at,
                    updated_at: stamp(Some(stored.updated_at)),
                    ..agent.clone()
                };
                tx.put(&updated)?;
                Ok(updated)
            })
            .await?;

        tracing::debug!("Updated agent: {}", updated.id);
        Ok(updated)
    }

    /// Delete an agent together with every conversation it owns. Returns the
    /// number of conversations removed.
    pub async fn delete(&self, id: i64) -> StoreResult<usize> {
        let removed = self
            .db()
            .await?
            .transaction(
                &[Store::Agents, Store::Conversations],
                TransactionMode::ReadWrite,
                |tx| {
                    if !tx.delete(Store::Agents, id)? {
                        return Err(StoreError::not_found(Store::Agents.name(), id));
                    }
                    let owned = tx.index_keys(Store::Conversations, "agentId", KeyRange::Only(id.into()))?;
                    for conversation_id in &owned {
                        tx.delete(Store::Conversations, *conversation_id)?;
                    }
                    Ok(owned.len())
                },
            )
            .await?;

        tracing::debug!("Deleted agent: {} (cascaded {} conversations)", id, removed);
        Ok(removed)
    }
}

fn latest(tx: &Transaction<'_>) -> StoreResult<Option<Agent>> {
    let mut found = None;
    tx.scan_index("updatedAt", KeyRange::All, Direction::Prev, |agent: Agent| {
        found = Some(agent);
        Ok(ControlFlow::Break(()))
    })?;
    Ok(found)
}
