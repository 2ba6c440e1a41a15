//! Database module

pub mod codec;
pub mod connection;
pub mod error;
pub mod migration;
pub mod repositories;
pub mod schema;
pub mod transaction;

pub use connection::{ConnectionManager, Database, OpenOptions};
pub use error::{StoreError, StoreResult};
pub use repositories::agent::AgentRepository;
pub use repositories::conversation::ConversationRepository;
pub use schema::{Store, SCHEMA_VERSION};
pub use transaction::{Direction, IndexKey, KeyRange, Transaction, TransactionMode};
