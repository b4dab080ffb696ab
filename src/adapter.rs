//! Database execution.
//!
//! An [`Adapter`] owns at most one connection pool and one open transaction.
//! While a transaction is open every statement runs on it. All driver
//! failures pass through [`normalize`] before they reach the caller.
//!
//! An adapter is not meant to be shared between concurrent callers: the
//! transaction belongs to whoever called [`Adapter::begin`].

use serde::de::DeserializeOwned;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::error::DatabaseError;
use sqlx::{Any, AnyPool, Column, Row as _, Transaction, TypeInfo};

use crate::builder::{Builder, Dialect};
use crate::changes::Changes;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::query::Query;
use crate::value::Value;

/// A result row, keyed by column name in select order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Outcome of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub last_insert_id: Option<i64>,
    pub rows_affected: u64,
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connected,
    InTransaction,
}

/// Executes compiled statements against a database.
#[allow(async_fn_in_trait)]
pub trait Adapter {
    /// Connect to `dsn`.
    async fn open(&mut self, dsn: &str) -> Result<()>;

    /// Close the connection, discarding any open transaction.
    async fn close(&mut self) -> Result<()>;

    /// Start a transaction.
    async fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction. A no-op without one.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction. A no-op without one.
    async fn rollback(&mut self) -> Result<()>;

    /// Run a statement returning rows.
    async fn query(&mut self, sql: &str, args: &[Value]) -> Result<Vec<Row>>;

    /// Run a statement expected to return a row. No row is [`Error::NotFound`].
    async fn query_one(&mut self, sql: &str, args: &[Value]) -> Result<Row>;

    /// Run a statement returning no rows.
    async fn exec(&mut self, sql: &str, args: &[Value]) -> Result<ExecResult>;

    fn state(&self) -> State;

    fn builder(&self) -> &Builder;

    /// Run `query` as SELECT.
    async fn find(&mut self, query: &Query) -> Result<Vec<Row>> {
        let compiled = self.builder().find(query);
        self.query(&compiled.sql, &compiled.args).await
    }

    /// Run `query` as SELECT limited to one row.
    async fn find_one(&mut self, query: &Query) -> Result<Row> {
        let compiled = self.builder().find(&query.clone().limit(1));
        self.query_one(&compiled.sql, &compiled.args).await
    }

    /// [`Adapter::find_one`], deserializing the row into `T`.
    async fn find_one_as<T: DeserializeOwned>(&mut self, query: &Query) -> Result<T> {
        let row = self.find_one(query).await?;
        bind_row(row)
    }

    /// [`Adapter::find`], deserializing every row into `T`.
    async fn find_as<T: DeserializeOwned>(&mut self, query: &Query) -> Result<Vec<T>> {
        let rows = self.find(query).await?;
        rows.into_iter().map(bind_row).collect()
    }

    /// Insert `changes` into the query's collection.
    async fn insert(&mut self, query: &Query, changes: &Changes) -> Result<ExecResult> {
        let compiled = self.builder().insert(&query.collection, changes);
        self.exec(&compiled.sql, &compiled.args).await
    }

    /// Apply `changes` to rows matching the query filter.
    async fn update(&mut self, query: &Query, changes: &Changes) -> Result<ExecResult> {
        if changes.is_empty() {
            tracing::debug!("update on {} skipped: no changes", query.collection);
            return Ok(ExecResult::default());
        }
        let compiled = self.builder().update(query, changes);
        self.exec(&compiled.sql, &compiled.args).await
    }

    /// Delete rows matching the query filter.
    async fn delete(&mut self, query: &Query) -> Result<ExecResult> {
        let compiled = self.builder().delete(query);
        self.exec(&compiled.sql, &compiled.args).await
    }
}

/// Deserialize a row into a caller type.
pub fn bind_row<T: DeserializeOwned>(row: Row) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(row))
        .map_err(|e| Error::Unexpected(format!("cannot bind row: {}", e)))
}

/// Map a driver error onto the error taxonomy.
///
/// No rows becomes [`Error::NotFound`], a unique-constraint violation becomes
/// [`Error::Duplicate`] with the driver message, and everything else is
/// [`Error::Unexpected`].
pub fn normalize(err: sqlx::Error) -> Error {
    let mapped = match &err {
        sqlx::Error::RowNotFound => Error::NotFound(err.to_string()),
        sqlx::Error::Database(db) if is_unique_violation(db.as_ref()) => {
            Error::duplicate(db.message(), db.constraint().unwrap_or_default())
        }
        _ => Error::Unexpected(err.to_string()),
    };
    tracing::warn!("database error: {}", err);
    mapped
}

/// Postgres 23505, MySQL 1062, SQLite 2067/1555.
fn is_unique_violation(db: &dyn DatabaseError) -> bool {
    db.is_unique_violation() || matches!(db.code().as_deref(), Some("23505" | "1062" | "2067" | "1555"))
}

/// Adapter backed by a sqlx `Any` pool (Postgres, MySQL, SQLite).
pub struct SqlxAdapter {
    builder: Builder,
    max_connections: u32,
    pool: Option<AnyPool>,
    tx: Option<Transaction<'static, Any>>,
}

impl SqlxAdapter {
    /// Create a disconnected adapter compiling for `dialect`.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            builder: Builder::new(dialect),
            max_connections: 5,
            pool: None,
            tx: None,
        }
    }

    /// Create a disconnected adapter from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_connections: config.max_connections.max(1),
            ..Self::new(config.dialect())
        }
    }

    /// Connect using the configured database URL.
    pub async fn connect(config: &Config) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| Error::Config("no database_url configured".into()))?;
        let mut adapter = Self::from_config(config);
        adapter.open(url).await?;
        Ok(adapter)
    }
}

fn connected(pool: &Option<AnyPool>) -> Result<&AnyPool> {
    pool.as_ref()
        .ok_or_else(|| Error::Unexpected("adapter is not connected".into()))
}

impl Adapter for SqlxAdapter {
    async fn open(&mut self, dsn: &str) -> Result<()> {
        sqlx::any::install_default_drivers();

        // Every connection to an in-memory SQLite database is a new database.
        let in_memory = dsn.contains(":memory:");
        let mut options = AnyPoolOptions::new().max_connections(self.max_connections);
        if in_memory {
            options = options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = options.connect(dsn).await.map_err(normalize)?;
        if self.builder.dialect() == Dialect::Generic {
            if let Some(dialect) = Dialect::from_url(dsn) {
                self.builder = Builder::new(dialect);
            }
        }

        tracing::info!("connected ({:?} dialect)", self.builder.dialect());
        self.tx = None;
        self.pool = Some(pool);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            tracing::info!("connection closed");
        }
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Err(Error::Unexpected("transaction already in progress".into()));
        }
        let tx = connected(&self.pool)?.begin().await.map_err(normalize)?;
        tracing::info!("transaction started");
        self.tx = Some(tx);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => {
                tracing::info!("commit");
                tx.commit().await.map_err(normalize)
            }
            None => Ok(()),
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => {
                tracing::info!("rollback");
                tx.rollback().await.map_err(normalize)
            }
            None => Ok(()),
        }
    }

    async fn query(&mut self, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        tracing::debug!(args = args.len(), "query: {}", sql);
        let query = bind_args(sqlx::query(sql), args);

        let rows: Vec<AnyRow> = match self.tx.as_mut() {
            Some(tx) => query.fetch_all(&mut **tx).await,
            None => query.fetch_all(connected(&self.pool)?).await,
        }
        .map_err(normalize)?;

        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn query_one(&mut self, sql: &str, args: &[Value]) -> Result<Row> {
        tracing::debug!(args = args.len(), "query one: {}", sql);
        let query = bind_args(sqlx::query(sql), args);

        let row: AnyRow = match self.tx.as_mut() {
            Some(tx) => query.fetch_one(&mut **tx).await,
            None => query.fetch_one(connected(&self.pool)?).await,
        }
        .map_err(normalize)?;

        Ok(row_to_map(&row))
    }

    async fn exec(&mut self, sql: &str, args: &[Value]) -> Result<ExecResult> {
        tracing::debug!(args = args.len(), "exec: {}", sql);
        let query = bind_args(sqlx::query(sql), args);

        let result = match self.tx.as_mut() {
            Some(tx) => query.execute(&mut **tx).await,
            None => query.execute(connected(&self.pool)?).await,
        }
        .map_err(normalize)?;

        Ok(ExecResult {
            last_insert_id: result.last_insert_id(),
            rows_affected: result.rows_affected(),
        })
    }

    fn state(&self) -> State {
        match (&self.pool, &self.tx) {
            (None, _) => State::Disconnected,
            (Some(_), None) => State::Connected,
            (Some(_), Some(_)) => State::InTransaction,
        }
    }

    fn builder(&self) -> &Builder {
        &self.builder
    }
}

type AnyQuery<'q> = sqlx::query::Query<'q, Any, AnyArguments<'q>>;

/// Bind arguments in placeholder order.
fn bind_args<'q>(mut query: AnyQuery<'q>, args: &[Value]) -> AnyQuery<'q> {
    for arg in args {
        query = match arg {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
            Value::Bytes(v) => query.bind(v.clone()),
            Value::Timestamp(v) => query.bind(v.to_rfc3339()),
        };
    }
    query
}

/// Convert an AnyRow to a JSON map.
fn row_to_map(row: &AnyRow) -> Row {
    let mut map = Row::new();

    for (i, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let type_name = column.type_info().name();

        let value: serde_json::Value = match type_name {
            "BOOL" | "BOOLEAN" => row
                .try_get::<Option<bool>, _>(i)
                .ok()
                .flatten()
                .map(serde_json::Value::Bool)
                .unwrap_or(serde_json::Value::Null),
            "INT2" | "INT4" | "INT8" | "INTEGER" | "BIGINT" | "SMALLINT" => row
                .try_get::<Option<i64>, _>(i)
                .or_else(|_| row.try_get::<Option<i32>, _>(i).map(|v| v.map(i64::from)))
                .or_else(|_| row.try_get::<Option<i16>, _>(i).map(|v| v.map(i64::from)))
                .ok()
                .flatten()
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),
            "FLOAT4" | "FLOAT8" | "REAL" | "DOUBLE" => row
                .try_get::<Option<f64>, _>(i)
                .ok()
                .flatten()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            "BLOB" | "BYTEA" => row
                .try_get::<Option<Vec<u8>>, _>(i)
                .ok()
                .flatten()
                .map(|bytes| serde_json::Value::Array(bytes.into_iter().map(|b| b.into()).collect()))
                .unwrap_or(serde_json::Value::Null),
            "NULL" => serde_json::Value::Null,
            _ => row
                .try_get::<Option<String>, _>(i)
                .ok()
                .flatten()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
        };

        map.insert(name, value);
    }

    map
}
