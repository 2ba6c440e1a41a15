//! Conversation repository

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::{check_sub_agents, Agent, SubAgent, DEFAULT_MODEL};
use super::stamp;
use crate::db::codec::Record;
use crate::db::connection::{ConnectionManager, Database};
use crate::db::error::{StoreError, StoreResult};
use crate::db::schema::Store;
use crate::db::transaction::{Direction, KeyRange, Transaction, TransactionMode};

/// Title given to conversations until the first user message names them.
pub const DEFAULT_TITLE: &str = "New conversation";

const TITLE_MAX_CHARS: usize = 30;
const TITLE_ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(default)]
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Owning agent. Absent on records written before agents existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<i64>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub sub_agents: Vec<SubAgent>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub updated_at: DateTime<Utc>,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Record for Conversation {
    const STORE: Store = Store::Conversations;

    fn key(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub content: String,
    pub sender: Sender,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub timestamp: DateTime<Utc>,
}

/// A message before the store stamps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub content: String,
    pub sender: Sender,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { content: content.into(), sender: Sender::User }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self { content: content.into(), sender: Sender::Agent }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Agent,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Agent => "agent",
        }
    }
}

impl std::str::FromStr for Sender {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Sender::User),
            "agent" => Ok(Sender::Agent),
            _ => Err(StoreError::ConstraintViolation(format!("Unknown sender: {}", s))),
        }
    }
}

impl Conversation {
    /// Append a stamped message, refreshing `updated_at` and deriving the
    /// title from the first user message while it is still the default.
    fn push(&mut self, message: NewMessage) -> &Message {
        let now = stamp(Some(self.updated_at));
        let derive_title = message.sender == Sender::User
            && !self.messages.iter().any(|m| m.sender == Sender::User);

        self.messages.push(Message {
            content: message.content,
            sender: message.sender,
            timestamp: now,
        });
        self.updated_at = now;

        if derive_title && self.title == DEFAULT_TITLE && self.messages.len() <= 2 {
            let content = &self.messages[self.messages.len() - 1].content;
            self.title = derive_title_from(content);
        }

        &self.messages[self.messages.len() - 1]
    }
}

fn derive_title_from(content: &str) -> String {
    let mut chars = content.chars();
    let prefix: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}{}", prefix, TITLE_ELLIPSIS)
    } else {
        prefix
    }
}

pub struct ConversationRepository {
    manager: Arc<ConnectionManager>,
}

impl ConversationRepository {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    async fn db(&self) -> StoreResult<Database> {
        self.manager.open().await
    }

    /// Create a conversation owned by `agent_id`. The agent's model and
    /// sub-agents are copied onto the conversation.
    pub async fn create(&self, agent_id: i64, title: Option<String>) -> StoreResult<i64> {
        let title = title.unwrap_or_else(|| DEFAULT_TITLE.to_string());

        let id = self
            .db()
            .await?
            .transaction(
                &[Store::Agents, Store::Conversations],
                TransactionMode::ReadWrite,
                |tx| {
                    let agent: Agent = tx
                        .get(agent_id)?
                        .ok_or_else(|| StoreError::not_found(Store::Agents.name(), agent_id))?;

                    let now = stamp(None);
                    tx.add(&Conversation {
                        id: 0,
                        title,
                        messages: Vec::new(),
                        agent_id: Some(agent_id),
                        model: agent.model,
                        sub_agents: agent.sub_agents,
                        created_at: now,
                        updated_at: now,
                    })
                },
            )
            .await?;

        tracing::debug!("Created conversation: {} (agent {})", id, agent_id);
        Ok(id)
    }

    /// List conversations across all agents, most recently updated first
    pub async fn get_all(&self) -> StoreResult<Vec<Conversation>> {
        self.db()
            .await?
            .transaction(&[Store::Conversations], TransactionMode::ReadOnly, |tx| {
                tx.get_all_by_index("updatedAt", KeyRange::All, Direction::Prev)
            })
            .await
    }

    /// List the conversations of one agent, most recently updated first
    pub async fn get_by_agent(&self, agent_id: i64) -> StoreResult<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .db()
            .await?
            .transaction(&[Store::Conversations], TransactionMode::ReadOnly, |tx| {
                tx.get_all_by_index("agentId", KeyRange::Only(agent_id.into()), Direction::Next)
            })
            .await?;

        // The agentId index is single-key, so recency order is applied here.
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(conversations)
    }

    /// Get a conversation by ID
    pub async fn get(&self, id: i64) -> StoreResult<Option<Conversation>> {
        self.db()
            .await?
            .transaction(&[Store::Conversations], TransactionMode::ReadOnly, |tx| tx.get(id))
            .await
    }

    /// Append a message and return it as stored.
    ///
    /// The whole conversation is read and written back in one transaction;
    /// two appends racing without awaiting each other resolve last-writer-wins.
    pub async fn append_message(&self, id: i64, message: NewMessage) -> StoreResult<Message> {
        let appended = self
            .modify(id, |conversation| Ok(conversation.push(message).clone()))
            .await?;

        tracing::debug!("Appended {} message to conversation {}", appended.sender.as_str(), id);
        Ok(appended)
    }

    pub async fn update_title(&self, id: i64, title: String) -> StoreResult<()> {
        self.modify(id, |conversation| {
            conversation.title = title;
            conversation.updated_at = stamp(Some(conversation.updated_at));
            Ok(())
        })
        .await?;

        tracing::debug!("Updated conversation {} title", id);
        Ok(())
    }

    pub async fn update_model(&self, id: i64, model: String) -> StoreResult<()> {
        self.modify(id, |conversation| {
            conversation.model = model;
            conversation.updated_at = stamp(Some(conversation.updated_at));
            Ok(())
        })
        .await?;

        tracing::debug!("Updated conversation {} model", id);
        Ok(())
    }

    pub async fn update_sub_agents(&self, id: i64, sub_agents: Vec<SubAgent>) -> StoreResult<()> {
        check_sub_agents(&sub_agents)?;
        self.modify(id, |conversation| {
            conversation.sub_agents = sub_agents;
            conversation.updated_at = stamp(Some(conversation.updated_at));
            Ok(())
        })
        .await?;

        tracing::debug!("Updated conversation {} sub-agents", id);
        Ok(())
    }

    /// Delete a conversation
    pub async fn delete(&self, id: i64) -> StoreResult<()> {
        self.db()
            .await?
            .transaction(&[Store::Conversations], TransactionMode::ReadWrite, |tx| {
                if tx.delete(Store::Conversations, id)? {
                    Ok(())
                } else {
                    Err(StoreError::not_found(Store::Conversations.name(), id))
                }
            })
            .await?;

        tracing::debug!("Deleted conversation: {}", id);
        Ok(())
    }

    /// Read-modify-write of one conversation inside a single transaction.
    async fn modify<T, F>(&self, id: i64, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Conversation) -> StoreResult<T>,
    {
        self.db()
            .await?
            .transaction(&[Store::Conversations], TransactionMode::ReadWrite, |tx| {
                let mut conversation = load(tx, id)?;
                let out = f(&mut conversation)?;
                tx.put(&conversation)?;
                Ok(out)
            })
            .await
    }
}

fn load(tx: &Transaction<'_>, id: i64) -> StoreResult<Conversation> {
    tx.get(id)?
        .ok_or_else(|| StoreError::not_found(Store::Conversations.name(), id))
}
