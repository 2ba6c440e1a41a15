//! Migration engine
//!
//! Brings a database file from its on-disk `user_version` up to a target
//! version. All deltas for `(current, target]` run inside one exclusive
//! transaction together with the version bump, so a failed upgrade leaves
//! nothing behind.

use rusqlite::{params, Connection, TransactionBehavior};
use tracing::{debug, info};

use super::error::{StoreError, StoreResult};
use super::schema::{self, SchemaDelta, Store};

pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Upgrade `conn` to `target`. Returns the version the file was at before.
pub fn migrate(conn: &mut Connection, target: u32) -> StoreResult<u32> {
    run(conn, target).map_err(StoreError::into_connection)
}

fn run(conn: &mut Connection, target: u32) -> StoreResult<u32> {
    let found = current_version(conn)?;
    check_not_newer(found, target)?;
    if found == target {
        debug!("Schema already at version {}", target);
        return Ok(found);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;

    // Another connection may have upgraded while we waited for the lock.
    let from = current_version(&tx)?;
    check_not_newer(from, target)?;

    for migration in schema::migrations_between(from, target) {
        for delta in migration.deltas {
            apply_delta(&tx, delta)?;
        }
        info!("Applied schema version {}", migration.version);
    }

    tx.pragma_update(None, "user_version", target)?;
    tx.commit()?;

    info!("Database upgraded from version {} to {}", from, target);
    Ok(from)
}

fn check_not_newer(found: u32, target: u32) -> StoreResult<()> {
    if found > target {
        return Err(StoreError::Connection(format!(
            "database is at schema version {}, newer than supported version {}",
            found, target
        )));
    }
    Ok(())
}

fn apply_delta(conn: &Connection, delta: &SchemaDelta) -> StoreResult<()> {
    match *delta {
        SchemaDelta::CreateStore(store) => {
            if object_exists(conn, "table", store.name())? {
                debug!("Store {} already present", store.name());
                return Ok(());
            }
            conn.execute_batch(&schema::create_store_sql(store))?;
            debug!("Created store {}", store.name());
        }
        SchemaDelta::CreateIndex { store, index } => {
            let index = store.index(index).ok_or_else(|| {
                StoreError::ConstraintViolation(format!(
                    "index {} is not declared on store {}",
                    index,
                    store.name()
                ))
            })?;
            if !object_exists(conn, "table", store.name())? {
                return Err(StoreError::ConstraintViolation(format!(
                    "cannot index missing store {}",
                    store.name()
                )));
            }
            let sql_name = index.sql_name(store);
            if object_exists(conn, "index", &sql_name)? {
                debug!("Index {} already present", sql_name);
                return Ok(());
            }
            conn.execute_batch(&schema::create_index_sql(store, index))?;
            debug!("Created index {}", sql_name);
        }
    }
    Ok(())
}

fn object_exists(conn: &Connection, kind: &str, name: &str) -> StoreResult<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2)",
        params![kind, name],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Whether `store` exists in the open file. Used by tests and diagnostics.
pub fn store_exists(conn: &Connection, store: Store) -> StoreResult<bool> {
    object_exists(conn, "table", store.name())
}

/// Whether the named index of `store` exists in the open file.
pub fn index_exists(conn: &Connection, store: Store, index: &str) -> StoreResult<bool> {
    match store.index(index) {
        Some(idx) => object_exists(conn, "index", &idx.sql_name(store)),
        None => Ok(false),
    }
}
