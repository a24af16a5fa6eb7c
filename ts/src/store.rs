//! SQLite-backed record store

use eyre::{Context, Result, eyre};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::DB_FILE;
use crate::filter::{Filter, FilterOp};
use crate::record::{IndexValue, Record};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);
CREATE TABLE IF NOT EXISTS record_indexes (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    field TEXT NOT NULL,
    value_text TEXT,
    value_int INTEGER,
    PRIMARY KEY (collection, id, field)
);
CREATE INDEX IF NOT EXISTS idx_record_indexes_lookup
    ON record_indexes (collection, field, value_text, value_int);
";

/// Persistent document store
///
/// Owns a single SQLite connection. Callers that share a store across
/// tasks wrap it in an actor (see `famtasks::state::StateManager`).
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open or create a store in the given directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).context(format!("Failed to create store directory {}", dir.display()))?;
        let path = dir.join(DB_FILE);
        let conn = Connection::open(&path).context(format!("Failed to open database {}", path.display()))?;
        let store = Self {
            conn,
            path: Some(path),
        };
        store.init_schema()?;
        info!(path = ?store.path, "Opened task store");
        Ok(store)
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self { conn, path: None };
        store.init_schema()?;
        debug!("Opened in-memory task store");
        Ok(store)
    }

    /// Path of the backing database file (None for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA)
            .context("Failed to initialize store schema")
    }

    /// Insert a new record, failing if the id is already taken
    pub fn create<T: Record>(&mut self, record: T) -> Result<String> {
        let collection = T::collection_name();
        let id = record.id().to_string();
        debug!(%collection, %id, "Store::create: called");

        if id.is_empty() {
            return Err(eyre!("Cannot create {} record with an empty id", collection));
        }

        let data = serde_json::to_string(&record).context("Failed to serialize record")?;
        let tx = self.conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(eyre!("Record already exists: {}/{}", collection, id));
        }

        tx.execute(
            "INSERT INTO records (collection, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![collection, id, data, record.updated_at()],
        )?;
        write_indexes(&tx, collection, &id, &record)?;
        tx.commit().context("Failed to commit create")?;

        Ok(id)
    }

    /// Fetch a record by id
    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        let collection = T::collection_name();
        debug!(%collection, %id, "Store::get: called");

        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;

        data.map(|d| serde_json::from_str(&d).context(format!("Corrupt record {}/{}", collection, id)))
            .transpose()
    }

    /// Replace an existing record, failing if it does not exist
    pub fn update<T: Record>(&mut self, record: T) -> Result<()> {
        let collection = T::collection_name();
        let id = record.id().to_string();
        debug!(%collection, %id, "Store::update: called");

        let data = serde_json::to_string(&record).context("Failed to serialize record")?;
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE records SET data = ?3, updated_at = ?4 WHERE collection = ?1 AND id = ?2",
            params![collection, id, data, record.updated_at()],
        )?;
        if changed == 0 {
            return Err(eyre!("Record not found: {}/{}", collection, id));
        }
        write_indexes(&tx, collection, &id, &record)?;
        tx.commit().context("Failed to commit update")?;
        Ok(())
    }

    /// Remove a record; returns whether it existed
    pub fn delete<T: Record>(&mut self, id: &str) -> Result<bool> {
        let collection = T::collection_name();
        debug!(%collection, %id, "Store::delete: called");

        let tx = self.conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        tx.execute(
            "DELETE FROM record_indexes WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        tx.commit().context("Failed to commit delete")?;
        Ok(removed > 0)
    }

    /// List records matching every filter (no ordering guarantee)
    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>> {
        let collection = T::collection_name();
        debug!(%collection, filter_count = filters.len(), "Store::list: called");

        let mut sql = String::from("SELECT r.data FROM records r WHERE r.collection = ?1");
        let mut values: Vec<Value> = vec![Value::Text(collection.to_string())];

        for filter in filters {
            let (column, value) = filter_value(filter)?;
            values.push(Value::Text(filter.field.clone()));
            let field_idx = values.len();
            values.push(value);
            let value_idx = values.len();
            let escape = if filter.op == FilterOp::Contains { " ESCAPE '\\'" } else { "" };
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM record_indexes i WHERE i.collection = r.collection \
                 AND i.id = r.id AND i.field = ?{} AND i.{} {} ?{}{})",
                field_idx,
                column,
                filter.op.sql(),
                value_idx,
                escape
            ));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for row in rows {
            let data = row?;
            records.push(serde_json::from_str(&data).context(format!("Corrupt record in {}", collection))?);
        }
        debug!(count = records.len(), "Store::list: done");
        Ok(records)
    }

    /// Recompute index rows for every record of a type
    ///
    /// Needed after a record type changes which fields it indexes.
    pub fn rebuild_indexes<T: Record>(&mut self) -> Result<usize> {
        let collection = T::collection_name();
        debug!(%collection, "Store::rebuild_indexes: called");

        let records: Vec<T> = self.list(&[])?;
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM record_indexes WHERE collection = ?1", params![collection])?;
        for record in &records {
            write_indexes(&tx, collection, record.id(), record)?;
        }
        tx.commit().context("Failed to commit index rebuild")?;

        info!(%collection, count = records.len(), "Rebuilt indexes");
        Ok(records.len())
    }
}

fn write_indexes<T: Record>(conn: &Connection, collection: &str, id: &str, record: &T) -> Result<()> {
    conn.execute(
        "DELETE FROM record_indexes WHERE collection = ?1 AND id = ?2",
        params![collection, id],
    )?;
    for (field, value) in record.indexed_fields() {
        conn.execute(
            "INSERT INTO record_indexes (collection, id, field, value_text, value_int) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![collection, id, field, value.as_text(), value.as_int()],
        )?;
    }
    Ok(())
}

fn filter_value(filter: &Filter) -> Result<(&'static str, Value)> {
    match (&filter.op, &filter.value) {
        (FilterOp::Contains, IndexValue::String(s)) => Ok(("value_text", Value::Text(format!("%{}%", escape_like(s))))),
        (FilterOp::Contains, other) => Err(eyre!(
            "Contains filter on '{}' requires a string, got {:?}",
            filter.field,
            other
        )),
        (_, IndexValue::String(s)) => Ok(("value_text", Value::Text(s.clone()))),
        (_, IndexValue::Int(i)) => Ok(("value_int", Value::Integer(*i))),
        (_, IndexValue::Bool(b)) => Ok(("value_int", Value::Integer(i64::from(*b)))),
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
