//! # Durable Store Contract
//!
//! Parameterized statement execution against the relational store:
//! `run`, `batch` (one transaction) and `fetch_one`. The status repository
//! only depends on this trait; [`PgDurableStore`] is the Postgres
//! implementation and [`RecordingDurableStore`] an in-process recorder.

use crate::config::DatabaseConfig;
use crate::error::{CourierError, CourierResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row as _, TypeInfo};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// A bindable parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl SqlValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// SQL text plus positional parameters (`$1`, `$2`, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Column name to value
pub type Row = HashMap<String, SqlValue>;

#[async_trait]
pub trait DurableStore: Send + Sync + std::fmt::Debug {
    /// Execute one statement; returns rows affected
    async fn run(&self, statement: Statement) -> CourierResult<u64>;

    /// Execute all statements atomically
    async fn batch(&self, statements: Vec<Statement>) -> CourierResult<()>;

    /// First row of a query, if any
    async fn fetch_one(&self, statement: Statement) -> CourierResult<Option<Row>>;
}

// =============================================================================
// Postgres
// =============================================================================

#[derive(Debug, Clone)]
pub struct PgDurableStore {
    pool: PgPool,
}

impl PgDurableStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the connection pool; connections are opened on first use
    pub fn connect_lazy(config: &DatabaseConfig) -> CourierResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect_lazy(&config.url)?;
        info!(
            max_connections = config.max_connections,
            acquire_timeout_secs = config.acquire_timeout_seconds,
            "Durable store pool configured"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> CourierResult<bool> {
        let row = sqlx::query("SELECT 1 as health")
            .fetch_one(&self.pool)
            .await?;
        let health: i32 = row.try_get("health")?;
        Ok(health == 1)
    }
}

fn bind_params<'q>(
    query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    params.iter().fold(query, |query, param| match param {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(value) => query.bind(*value),
        SqlValue::Int(value) => query.bind(*value),
        SqlValue::Float(value) => query.bind(*value),
        SqlValue::Text(value) => query.bind(value.as_str()),
        SqlValue::Timestamp(value) => query.bind(*value),
        SqlValue::Json(value) => query.bind(value),
    })
}

fn decode_row(row: &PgRow) -> CourierResult<Row> {
    let mut decoded = Row::with_capacity(row.columns().len());
    for column in row.columns() {
        let index = column.ordinal();
        let value = match column.type_info().name() {
            "BOOL" => row.try_get::<Option<bool>, _>(index)?.into(),
            "INT2" => row.try_get::<Option<i16>, _>(index)?.map(i64::from).into(),
            "INT4" => row.try_get::<Option<i32>, _>(index)?.map(i64::from).into(),
            "INT8" => row.try_get::<Option<i64>, _>(index)?.into(),
            "FLOAT4" => row.try_get::<Option<f32>, _>(index)?.map(f64::from).into(),
            "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.into(),
            "TIMESTAMPTZ" => row.try_get::<Option<DateTime<Utc>>, _>(index)?.into(),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(index)?
                .map(|ts| ts.and_utc())
                .into(),
            "JSON" | "JSONB" => row.try_get::<Option<serde_json::Value>, _>(index)?.into(),
            "UUID" => row
                .try_get::<Option<uuid::Uuid>, _>(index)?
                .map(|id| id.to_string())
                .into(),
            _ => row
                .try_get::<Option<String>, _>(index)
                .map_err(|e| {
                    CourierError::DatabaseError(format!(
                        "Unsupported column type {} for {}: {e}",
                        column.type_info().name(),
                        column.name()
                    ))
                })?
                .into(),
        };
        decoded.insert(column.name().to_string(), value);
    }
    Ok(decoded)
}

#[async_trait]
impl DurableStore for PgDurableStore {
    async fn run(&self, statement: Statement) -> CourierResult<u64> {
        let result = bind_params(sqlx::query(&statement.sql), &statement.params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn batch(&self, statements: Vec<Statement>) -> CourierResult<()> {
        if statements.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for statement in &statements {
            bind_params(sqlx::query(&statement.sql), &statement.params)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!(statements = statements.len(), "Durable batch committed");
        Ok(())
    }

    async fn fetch_one(&self, statement: Statement) -> CourierResult<Option<Row>> {
        let row = bind_params(sqlx::query(&statement.sql), &statement.params)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }
}

// =============================================================================
// In-process recorder
// =============================================================================

#[derive(Debug, Default)]
struct RecorderState {
    runs: Vec<Statement>,
    batches: Vec<Vec<Statement>>,
    fetches: Vec<Statement>,
    fetch_result: Option<Row>,
    failures_remaining: u32,
}

/// Records statements instead of executing them; supports injected failures
#[derive(Debug, Default)]
pub struct RecordingDurableStore {
    state: Mutex<RecorderState>,
}

impl RecordingDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls with a database error
    pub fn fail_times(&self, times: u32) {
        self.state.lock().failures_remaining = times;
    }

    /// Row returned by every subsequent `fetch_one`
    pub fn set_fetch_result(&self, row: Option<Row>) {
        self.state.lock().fetch_result = row;
    }

    pub fn runs(&self) -> Vec<Statement> {
        self.state.lock().runs.clone()
    }

    pub fn batches(&self) -> Vec<Vec<Statement>> {
        self.state.lock().batches.clone()
    }

    pub fn fetches(&self) -> Vec<Statement> {
        self.state.lock().fetches.clone()
    }

    fn check_failure(state: &mut RecorderState) -> CourierResult<()> {
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(CourierError::DatabaseError(
                "injected durable store failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for RecordingDurableStore {
    async fn run(&self, statement: Statement) -> CourierResult<u64> {
        let mut state = self.state.lock();
        Self::check_failure(&mut state)?;
        state.runs.push(statement);
        Ok(1)
    }

    async fn batch(&self, statements: Vec<Statement>) -> CourierResult<()> {
        let mut state = self.state.lock();
        Self::check_failure(&mut state)?;
        state.batches.push(statements);
        Ok(())
    }

    async fn fetch_one(&self, statement: Statement) -> CourierResult<Option<Row>> {
        let mut state = self.state.lock();
        Self::check_failure(&mut state)?;
        state.fetches.push(statement);
        Ok(state.fetch_result.clone())
    }
}
