//! Store schema registry
//!
//! Declares the object stores, their primary key policy and secondary
//! indexes, plus the ordered list of additive deltas that build them.

/// Schema version this build expects on disk.
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Store {
    Agents,
    Conversations,
}

impl Store {
    pub fn name(self) -> &'static str {
        match self {
            Store::Agents => "agents",
            Store::Conversations => "conversations",
        }
    }

    pub fn schema(self) -> &'static StoreSchema {
        match self {
            Store::Agents => &AGENTS,
            Store::Conversations => &CONVERSATIONS,
        }
    }

    pub fn index(self, name: &str) -> Option<&'static IndexSchema> {
        self.schema().indexes.iter().find(|idx| idx.name == name)
    }
}

#[derive(Debug)]
pub struct StoreSchema {
    pub store: Store,
    /// Record field holding the primary key.
    pub key_path: &'static str,
    pub auto_increment: bool,
    pub indexes: &'static [IndexSchema],
}

#[derive(Debug)]
pub struct IndexSchema {
    pub name: &'static str,
    pub key_path: &'static str,
    pub unique: bool,
}

impl IndexSchema {
    /// Name of the backing SQLite index.
    pub fn sql_name(&self, store: Store) -> String {
        format!("idx_{}_{}", store.name(), self.name)
    }

    /// Expression the index is built over. Queries must repeat it verbatim
    /// for the planner to pick the index.
    pub fn key_expr(&self) -> String {
        format!("json_extract(value, '$.{}')", self.key_path)
    }
}

pub static AGENTS: StoreSchema = StoreSchema {
    store: Store::Agents,
    key_path: "id",
    auto_increment: true,
    indexes: &[
        IndexSchema { name: "name", key_path: "name", unique: false },
        IndexSchema { name: "updatedAt", key_path: "updatedAt", unique: false },
    ],
};

pub static CONVERSATIONS: StoreSchema = StoreSchema {
    store: Store::Conversations,
    key_path: "id",
    auto_increment: true,
    indexes: &[
        IndexSchema { name: "title", key_path: "title", unique: false },
        IndexSchema { name: "updatedAt", key_path: "updatedAt", unique: false },
        IndexSchema { name: "agentId", key_path: "agentId", unique: false },
    ],
};

/// A single additive schema change.
#[derive(Debug, Clone, Copy)]
pub enum SchemaDelta {
    CreateStore(Store),
    CreateIndex { store: Store, index: &'static str },
}

#[derive(Debug)]
pub struct Migration {
    pub version: u32,
    pub deltas: &'static [SchemaDelta],
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        deltas: &[
            SchemaDelta::CreateStore(Store::Conversations),
            SchemaDelta::CreateIndex { store: Store::Conversations, index: "updatedAt" },
            SchemaDelta::CreateIndex { store: Store::Conversations, index: "title" },
        ],
    },
    Migration {
        version: 2,
        deltas: &[
            SchemaDelta::CreateStore(Store::Agents),
            SchemaDelta::CreateIndex { store: Store::Agents, index: "name" },
            SchemaDelta::CreateIndex { store: Store::Agents, index: "updatedAt" },
            SchemaDelta::CreateIndex { store: Store::Conversations, index: "agentId" },
        ],
    },
];

/// Migrations to apply when moving from `from` to `to`, i.e. versions in `(from, to]`.
pub fn migrations_between(from: u32, to: u32) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS
        .iter()
        .filter(move |m| m.version > from && m.version <= to)
}

pub fn create_store_sql(store: Store) -> String {
    let schema = store.schema();
    let key = if schema.auto_increment {
        "INTEGER PRIMARY KEY AUTOINCREMENT"
    } else {
        "INTEGER PRIMARY KEY"
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {} (id {}, value TEXT NOT NULL)",
        store.name(),
        key
    )
}

pub fn create_index_sql(store: Store, index: &IndexSchema) -> String {
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        index.sql_name(store),
        store.name(),
        index.key_expr()
    )
}
