//! Transaction coordinator
//!
//! Every repository operation runs as exactly one `Transaction`, scoped to a
//! declared set of stores and a mode. Reads inside it see one consistent
//! snapshot; writes become visible only on commit.

use std::ops::ControlFlow;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension};

use super::codec::{self, Record};
use super::error::{StoreError, StoreResult};
use super::schema::{IndexSchema, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending index key order.
    Next,
    /// Descending index key order.
    Prev,
}

impl Direction {
    fn sql(self) -> &'static str {
        match self {
            Direction::Next => "ASC",
            Direction::Prev => "DESC",
        }
    }
}

/// A value an index can be keyed by.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    Integer(i64),
    Text(String),
}

impl From<i64> for IndexKey {
    fn from(v: i64) -> Self {
        IndexKey::Integer(v)
    }
}

impl From<&str> for IndexKey {
    fn from(v: &str) -> Self {
        IndexKey::Text(v.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(v: String) -> Self {
        IndexKey::Text(v)
    }
}

impl From<IndexKey> for SqlValue {
    fn from(key: IndexKey) -> Self {
        match key {
            IndexKey::Integer(v) => SqlValue::Integer(v),
            IndexKey::Text(v) => SqlValue::Text(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyRange {
    /// Every record carrying the index key path.
    All,
    /// Records whose index key equals the given value.
    Only(IndexKey),
}

pub struct Transaction<'conn> {
    tx: rusqlite::Transaction<'conn>,
    stores: Vec<Store>,
    mode: TransactionMode,
}

impl<'conn> Transaction<'conn> {
    pub(crate) fn new(
        tx: rusqlite::Transaction<'conn>,
        stores: &[Store],
        mode: TransactionMode,
    ) -> Self {
        Self {
            tx,
            stores: stores.to_vec(),
            mode,
        }
    }

    pub(crate) fn commit(self) -> StoreResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    /// Point lookup by primary key.
    pub fn get<R: Record>(&self, id: i64) -> StoreResult<Option<R>> {
        let store = self.readable(R::STORE)?;
        let raw: Option<String> = self
            .tx
            .query_row(
                &format!("SELECT value FROM {} WHERE id = ?1", store.name()),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|raw| codec::decode(id, &raw)).transpose()
    }

    /// Insert a new record and return the engine-assigned key. The record's
    /// own key is ignored.
    pub fn add<R: Record>(&self, record: &R) -> StoreResult<i64> {
        let store = self.writable(R::STORE)?;
        let value = codec::encode(record)?;
        self.tx.execute(
            &format!("INSERT INTO {} (value) VALUES (?1)", store.name()),
            params![value],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Write the full record under its key, inserting or replacing.
    pub fn put<R: Record>(&self, record: &R) -> StoreResult<()> {
        let store = self.writable(R::STORE)?;
        let value = codec::encode(record)?;
        self.tx.execute(
            &format!(
                "INSERT INTO {} (id, value) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET value = excluded.value",
                store.name()
            ),
            params![record.key(), value],
        )?;
        Ok(())
    }

    /// Delete by primary key. Returns whether a record was removed.
    pub fn delete(&self, store: Store, id: i64) -> StoreResult<bool> {
        let store = self.writable(store)?;
        let removed = self.tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", store.name()),
            params![id],
        )?;
        Ok(removed > 0)
    }

    pub fn count(&self, store: Store) -> StoreResult<u64> {
        let store = self.readable(store)?;
        let count: i64 = self.tx.query_row(
            &format!("SELECT COUNT(*) FROM {}", store.name()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Walk an index in key order, handing each record to `visit` until it
    /// breaks or the range is exhausted. Ties on the index key are ordered by
    /// primary key in the same direction.
    pub fn scan_index<R, F>(
        &self,
        index: &str,
        range: KeyRange,
        direction: Direction,
        mut visit: F,
    ) -> StoreResult<()>
    where
        R: Record,
        F: FnMut(R) -> StoreResult<ControlFlow<()>>,
    {
        let (sql, args) = self.index_query(R::STORE, index, "id, value", range, direction)?;
        let mut stmt = self.tx.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(args))?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let raw: String = row.get(1)?;
            if visit(codec::decode(id, &raw)?)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    pub fn get_all_by_index<R: Record>(
        &self,
        index: &str,
        range: KeyRange,
        direction: Direction,
    ) -> StoreResult<Vec<R>> {
        let mut records = Vec::new();
        self.scan_index(index, range, direction, |record| {
            records.push(record);
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(records)
    }

    /// Primary keys of the records in `range` of an index, without decoding values.
    pub fn index_keys(&self, store: Store, index: &str, range: KeyRange) -> StoreResult<Vec<i64>> {
        let (sql, args) = self.index_query(store, index, "id", range, Direction::Next)?;
        let mut stmt = self.tx.prepare(&sql)?;
        let keys = stmt
            .query_map(params_from_iter(args), |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(keys)
    }

    fn index_query(
        &self,
        store: Store,
        index: &str,
        columns: &str,
        range: KeyRange,
        direction: Direction,
    ) -> StoreResult<(String, Vec<SqlValue>)> {
        let store = self.readable(store)?;
        let index = lookup_index(store, index)?;
        let expr = index.key_expr();
        let (filter, args) = match range {
            KeyRange::All => (format!("{} IS NOT NULL", expr), Vec::new()),
            KeyRange::Only(key) => (format!("{} = ?1", expr), vec![SqlValue::from(key)]),
        };
        let dir = direction.sql();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {} {}, id {}",
            columns,
            store.name(),
            filter,
            expr,
            dir,
            dir
        );
        Ok((sql, args))
    }

    fn readable(&self, store: Store) -> StoreResult<Store> {
        if !self.stores.contains(&store) {
            return Err(StoreError::ConstraintViolation(format!(
                "store {} is outside this transaction's scope",
                store.name()
            )));
        }
        Ok(store)
    }

    fn writable(&self, store: Store) -> StoreResult<Store> {
        let store = self.readable(store)?;
        if self.mode == TransactionMode::ReadOnly {
            return Err(StoreError::ConstraintViolation(format!(
                "write to {} in a read-only transaction",
                store.name()
            )));
        }
        Ok(store)
    }
}

fn lookup_index(store: Store, name: &str) -> StoreResult<&'static IndexSchema> {
    store.index(name).ok_or_else(|| {
        StoreError::ConstraintViolation(format!(
            "index {} is not declared on store {}",
            name,
            store.name()
        ))
    })
}
