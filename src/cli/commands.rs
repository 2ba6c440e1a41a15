//! CLI commands

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::db::{
    connection,
    repositories::agent::SubAgent,
    repositories::conversation::{Conversation, NewMessage, Sender},
    AgentRepository, ConversationRepository,
};

#[derive(Parser)]
#[command(name = "chatstore")]
#[command(about = "Local agent and conversation storage for the chat client", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.chatstore/config.yml)
    #[arg(long)]
    pub config: Option<String>,

    /// Database path, overrides the config file
    #[arg(long)]
    database: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List all agents
    Agents,

    /// Create a new agent
    CreateAgent {
        /// Agent name
        #[arg(long)]
        name: Option<String>,

        /// System prompt
        #[arg(long)]
        system_prompt: Option<String>,

        /// Model identifier
        #[arg(long)]
        model: Option<String>,
    },

    /// Delete an agent and all of its conversations
    DeleteAgent {
        /// Agent ID
        agent_id: i64,
    },

    /// List conversations
    Conversations {
        /// Only conversations of this agent
        #[arg(long)]
        agent: Option<i64>,
    },

    /// Create a new conversation
    CreateConversation {
        /// Owning agent ID
        #[arg(long)]
        agent: i64,

        /// Conversation title
        #[arg(long)]
        title: Option<String>,
    },

    /// Show a conversation with its messages
    Show {
        /// Conversation ID
        conversation_id: i64,
    },

    /// Append a message to a conversation
    Send {
        /// Conversation ID
        conversation_id: i64,

        /// Message content
        content: String,

        /// Sender (user, agent)
        #[arg(long = "as", default_value = "user")]
        sender: String,
    },

    /// Rename a conversation
    Rename {
        /// Conversation ID
        conversation_id: i64,

        /// New title
        title: String,
    },

    /// Replace the sub-agents of a conversation
    SubAgents {
        /// Conversation ID
        conversation_id: i64,

        /// Sub-agents as name:mode (mode is handoff or tool), at most two
        sub_agents: Vec<String>,
    },

    /// Delete a conversation
    DeleteConversation {
        /// Conversation ID
        conversation_id: i64,
    },
}

pub fn run(cli: Cli, config: Config) -> Result<()> {
    let db_path = match cli.database {
        Some(path) => path.into(),
        None => config.database_path()?,
    };

    let manager = connection::shared(db_path, config.open_options())?;
    let agent_repo = AgentRepository::new(manager.clone());
    let conversation_repo = ConversationRepository::new(manager);

    // Storage calls are awaited one after another on a single thread.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        match cli.command {
        Commands::Agents => {
            agent_repo.ensure_default().await?;
            for agent in agent_repo.get_all().await? {
                println!(
                    "[{}] {} - {} ({} sub-agents) - updated {}",
                    agent.id,
                    agent.name,
                    agent.model,
                    agent.sub_agents.len(),
                    agent.updated_at.to_rfc3339()
                );
            }
            Ok(())
        }

        Commands::CreateAgent { name, system_prompt, model } => {
            let id = agent_repo.create(name, system_prompt, model).await?;
            println!("Created agent: {}", id);
            Ok(())
        }

        Commands::DeleteAgent { agent_id } => {
            let removed = agent_repo.delete(agent_id).await?;
            println!("Deleted agent {} and {} conversations", agent_id, removed);
            Ok(())
        }

        Commands::Conversations { agent } => {
            let conversations = match agent {
                Some(agent_id) => conversation_repo.get_by_agent(agent_id).await?,
                None => conversation_repo.get_all().await?,
            };

            if conversations.is_empty() {
                println!("No conversations found");
            } else {
                for conversation in &conversations {
                    print_summary(conversation);
                }
            }
            Ok(())
        }

        Commands::CreateConversation { agent, title } => {
            let id = conversation_repo.create(agent, title).await?;
            println!("Created conversation: {}", id);
            Ok(())
        }

        Commands::Show { conversation_id } => {
            match conversation_repo.get(conversation_id).await? {
                Some(conversation) => {
                    print_summary(&conversation);
                    for sub_agent in &conversation.sub_agents {
                        println!("  sub-agent {} ({})", sub_agent.name, sub_agent.mode.as_str());
                    }
                    for message in &conversation.messages {
                        println!(
                            "  {} {}: {}",
                            message.timestamp.to_rfc3339(),
                            message.sender.as_str(),
                            message.content
                        );
                    }
                }
                None => println!("Conversation {} not found", conversation_id),
            }
            Ok(())
        }

        Commands::Send { conversation_id, content, sender } => {
            let sender: Sender = sender.parse()?;
            let message = conversation_repo
                .append_message(conversation_id, NewMessage { content, sender })
                .await?;
            println!("Appended message at {}", message.timestamp.to_rfc3339());
            Ok(())
        }

        Commands::Rename { conversation_id, title } => {
            conversation_repo.update_title(conversation_id, title).await?;
            println!("Renamed conversation: {}", conversation_id);
            Ok(())
        }

        Commands::SubAgents { conversation_id, sub_agents } => {
            let sub_agents = sub_agents
                .iter()
                .map(|s| s.parse::<SubAgent>())
                .collect::<Result<Vec<_>, _>>()?;
            conversation_repo.update_sub_agents(conversation_id, sub_agents).await?;
            println!("Updated sub-agents of conversation: {}", conversation_id);
            Ok(())
        }

        Commands::DeleteConversation { conversation_id } => {
            conversation_repo.delete(conversation_id).await?;
            println!("Deleted conversation: {}", conversation_id);
            Ok(())
        }
        }
    })
}

fn print_summary(conversation: &Conversation) {
    println!(
        "[{}] {} - agent {} - {} ({} messages)",
        conversation.id,
        conversation.title,
        conversation
            .agent_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
        conversation.model,
        conversation.messages.len()
    );
}
