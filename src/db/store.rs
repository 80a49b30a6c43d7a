//! SQLite-backed entity store.
//!
//! A narrow, datastore-shaped interface: entities live under a named kind
//! with a string key, a JSON payload, and three indexed properties
//! (timestamp, source, name). Queries filter and order on the indexed
//! properties only.

use rusqlite::types::{ToSql, ToSqlOutput};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Entity kinds used by the storage engine.
pub const SAMPLE_KIND: &str = "Sample";
pub const HOUR_SUMMARY_KIND: &str = "HourSummary";
pub const DAY_SUMMARY_KIND: &str = "DaySummary";
pub const SUMMARY_STATE_KIND: &str = "SummaryState";
pub const ALERT_STATE_KIND: &str = "AlertState";

/// Key shared by all singleton entities.
pub const SINGLETON_ID: &str = "1";

/// Upper bound on entities per write or delete batch.
pub const MAX_PUT_BATCH: usize = 500;

/// Rows fetched per page while iterating query results. The connection lock
/// is never held across yields.
const QUERY_PAGE_SIZE: usize = 200;

/// Store error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("not found")]
    NotFound,
    #[error("batch of {0} exceeds {MAX_PUT_BATCH} entities")]
    BatchTooLarge(usize),
}

/// Indexed properties attached to an entity row. Singletons leave all unset.
#[derive(Debug, Clone, Default)]
pub struct Props {
    pub timestamp: Option<i64>,
    pub source: Option<String>,
    pub name: Option<String>,
}

/// A value that can be stored under some entity kind.
pub trait Entity: Serialize {
    /// Stable identity within the kind.
    fn key(&self) -> String;

    /// Properties visible to query filters and ordering.
    fn props(&self) -> Props;
}

impl<E: Entity> Entity for &E {
    fn key(&self) -> String {
        (**self).key()
    }

    fn props(&self) -> Props {
        (**self).props()
    }
}

/// Filterable / orderable entity properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Timestamp,
    Source,
    Name,
}

impl Field {
    fn column(self) -> &'static str {
        match self {
            Field::Timestamp => "timestamp",
            Field::Source => "source",
            Field::Name => "name",
        }
    }
}

/// Filter comparison operators.
#[derive(Debug, Clone, Copy)]
pub enum Cmp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl Cmp {
    fn sql(self) -> &'static str {
        match self {
            Cmp::Lt => "<",
            Cmp::Le => "<=",
            Cmp::Eq => "=",
            Cmp::Ge => ">=",
            Cmp::Gt => ">",
        }
    }
}

/// A filter or cursor value.
#[derive(Debug, Clone)]
pub enum PropValue {
    Int(i64),
    Text(String),
}

impl ToSql for PropValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            PropValue::Int(v) => v.to_sql(),
            PropValue::Text(s) => s.to_sql(),
        }
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        PropValue::Int(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        PropValue::Text(v.to_string())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        PropValue::Text(v)
    }
}

#[derive(Debug, Clone)]
struct Filter {
    field: Field,
    cmp: Cmp,
    value: PropValue,
}

/// Thread-safe entity store.
#[derive(Clone)]
pub struct Datastore {
    conn: Arc<Mutex<Connection>>,
}

impl Datastore {
    /// Opens (and initializes) a store at the given database path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::from_conn(Connection::open(path)?)
    }

    /// Opens an in-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_conn(Connection::open_in_memory()?)
    }

    fn from_conn(conn: Connection) -> Result<Self, DbError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entities (
                 kind TEXT NOT NULL,
                 id TEXT NOT NULL,
                 timestamp INTEGER,
                 source TEXT,
                 name TEXT,
                 data TEXT NOT NULL,
                 PRIMARY KEY (kind, id)
             );
             CREATE INDEX IF NOT EXISTS entities_by_time
                 ON entities (kind, timestamp, id);
             CREATE INDEX IF NOT EXISTS entities_by_series
                 ON entities (kind, source, name, timestamp);",
        )?;
        Ok(())
    }

    /// Upserts a batch of entities in a single transaction. Batches are
    /// limited to [`MAX_PUT_BATCH`] entities; callers chunk larger writes.
    pub fn put_multi<E: Entity>(&self, kind: &str, entities: &[E]) -> Result<(), DbError> {
        if entities.is_empty() {
            return Ok(());
        }
        if entities.len() > MAX_PUT_BATCH {
            return Err(DbError::BatchTooLarge(entities.len()));
        }

        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO entities (kind, id, timestamp, source, name, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (kind, id) DO UPDATE SET
                 timestamp=excluded.timestamp, source=excluded.source,
                 name=excluded.name, data=excluded.data",
            )?;
            for e in entities {
                let props = e.props();
                let data = serde_json::to_string(e)?;
                stmt.execute(params![
                    kind,
                    e.key(),
                    props.timestamp,
                    props.source,
                    props.name,
                    data
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Fetches one entity by key. Returns [`DbError::NotFound`] if absent.
    pub fn get<E: DeserializeOwned>(&self, kind: &str, id: &str) -> Result<E, DbError> {
        let conn = self.conn.lock().unwrap();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM entities WHERE kind = ?1 AND id = ?2",
                params![kind, id],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Err(DbError::NotFound),
        }
    }

    /// Deletes a batch of keys in a single transaction.
    pub fn delete_multi(&self, kind: &str, keys: &[String]) -> Result<(), DbError> {
        if keys.is_empty() {
            return Ok(());
        }
        if keys.len() > MAX_PUT_BATCH {
            return Err(DbError::BatchTooLarge(keys.len()));
        }

        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM entities WHERE kind = ?1 AND id = ?2")?;
            for key in keys {
                stmt.execute(params![kind, key])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Starts a query over the given kind.
    pub fn query(&self, kind: &str) -> Query {
        Query {
            store: self.clone(),
            kind: kind.to_string(),
            filters: Vec::new(),
            order_field: Field::Timestamp,
            descending: false,
            limit: None,
        }
    }

    /// Fetches one page of query results. Each row is (id, order value, data);
    /// keys-only pages leave data empty.
    fn fetch_page(
        &self,
        kind: &str,
        filters: &[Filter],
        order_field: Field,
        descending: bool,
        cursor: Option<&(PropValue, String)>,
        count: usize,
        keys_only: bool,
    ) -> Result<Vec<(String, PropValue, String)>, DbError> {
        let col = order_field.column();
        let mut sql = format!(
            "SELECT id, {col}{data} FROM entities WHERE kind = ? AND {col} IS NOT NULL",
            data = if keys_only { "" } else { ", data" },
        );
        let mut values: Vec<PropValue> = vec![PropValue::Text(kind.to_string())];

        for f in filters {
            sql.push_str(&format!(" AND {} {} ?", f.field.column(), f.cmp.sql()));
            values.push(f.value.clone());
        }

        let (cmp, dir) = if descending { ("<", "DESC") } else { (">", "ASC") };
        if let Some((order_value, id)) = cursor {
            sql.push_str(&format!(
                " AND ({col} {cmp} ? OR ({col} = ? AND id {cmp} ?))"
            ));
            values.push(order_value.clone());
            values.push(order_value.clone());
            values.push(PropValue::Text(id.clone()));
        }

        sql.push_str(&format!(" ORDER BY {col} {dir}, id {dir} LIMIT {count}"));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let id: String = row.get(0)?;
                let order_value = match order_field {
                    Field::Timestamp => PropValue::Int(row.get(1)?),
                    Field::Source | Field::Name => PropValue::Text(row.get(1)?),
                };
                let data: String = if keys_only { String::new() } else { row.get(2)? };
                Ok((id, order_value, data))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

/// A filtered, ordered, optionally limited query over one entity kind.
pub struct Query {
    store: Datastore,
    kind: String,
    filters: Vec<Filter>,
    order_field: Field,
    descending: bool,
    limit: Option<usize>,
}

impl Query {
    pub fn filter(mut self, field: Field, cmp: Cmp, value: impl Into<PropValue>) -> Self {
        self.filters.push(Filter {
            field,
            cmp,
            value: value.into(),
        });
        self
    }

    /// Orders results ascending by `field` (ties broken by key).
    pub fn order(mut self, field: Field) -> Self {
        self.order_field = field;
        self.descending = false;
        self
    }

    /// Orders results descending by `field`.
    pub fn order_desc(mut self, field: Field) -> Self {
        self.order_field = field;
        self.descending = true;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Runs the query, returning a paging iterator. Exhaustion is the
    /// done-sentinel.
    pub fn run<E: DeserializeOwned>(self) -> EntityIter<E> {
        EntityIter {
            store: self.store,
            kind: self.kind,
            filters: self.filters,
            order_field: self.order_field,
            descending: self.descending,
            remaining: self.limit,
            cursor: None,
            buf: VecDeque::new(),
            done: false,
            _marker: PhantomData,
        }
    }

    /// Materializes all matching entities.
    pub fn get_all<E: DeserializeOwned>(self) -> Result<Vec<E>, DbError> {
        self.run().collect()
    }

    /// Materializes the keys of all matching entities without decoding
    /// payloads.
    pub fn get_all_keys(self) -> Result<Vec<String>, DbError> {
        let mut keys = Vec::new();
        let mut cursor: Option<(PropValue, String)> = None;
        loop {
            let page = match self.limit {
                Some(limit) => QUERY_PAGE_SIZE.min(limit - keys.len()),
                None => QUERY_PAGE_SIZE,
            };
            if page == 0 {
                break;
            }
            let rows = self.store.fetch_page(
                &self.kind,
                &self.filters,
                self.order_field,
                self.descending,
                cursor.as_ref(),
                page,
                true,
            )?;
            let got = rows.len();
            for (id, order_value, _) in rows {
                cursor = Some((order_value, id.clone()));
                keys.push(id);
            }
            if got < page {
                break;
            }
        }
        Ok(keys)
    }
}

/// Iterator over decoded query results.
pub struct EntityIter<E> {
    store: Datastore,
    kind: String,
    filters: Vec<Filter>,
    order_field: Field,
    descending: bool,
    remaining: Option<usize>,
    cursor: Option<(PropValue, String)>,
    buf: VecDeque<E>,
    done: bool,
    _marker: PhantomData<E>,
}

impl<E: DeserializeOwned> EntityIter<E> {
    fn fill(&mut self) -> Result<(), DbError> {
        if self.done {
            return Ok(());
        }
        let page = match self.remaining {
            Some(remaining) => QUERY_PAGE_SIZE.min(remaining),
            None => QUERY_PAGE_SIZE,
        };
        if page == 0 {
            self.done = true;
            return Ok(());
        }

        let rows = self.store.fetch_page(
            &self.kind,
            &self.filters,
            self.order_field,
            self.descending,
            self.cursor.as_ref(),
            page,
            false,
        )?;
        let got = rows.len();
        for (id, order_value, data) in rows {
            self.buf.push_back(serde_json::from_str(&data)?);
            self.cursor = Some((order_value, id));
        }
        if let Some(remaining) = &mut self.remaining {
            *remaining -= got;
        }
        if got < page {
            self.done = true;
        }
        Ok(())
    }
}

impl<E: DeserializeOwned> Iterator for EntityIter<E> {
    type Item = Result<E, DbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buf.pop_front().map(Ok)
    }
}
