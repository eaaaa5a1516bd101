//! # Bookcast Warehouse
//!
//! The contract every analytics warehouse backend implements, plus the local
//! `DuckDB` backend.
//!
//! ## Overview
//!
//! The migration pipeline and forecast layer never talk to a concrete warehouse.
//! They hold a `&dyn WarehouseClient` and speak in datasets, tables, jobs, and
//! rows. Two backends exist:
//!
//! - BigQuery over REST (in `bookcast-core`), the production target with BigQuery ML.
//! - [`DuckDbWarehouse`], a local file used for development and tests. It runs
//!   every job synchronously and reports ML statements as failed jobs.
//!
//! ## Jobs
//!
//! Loads and SQL statements are submitted as jobs. Callers wait on them with
//! [`WarehouseClient::await_completion`], which polls with a [`PollPolicy`]
//! until the job is done or the policy's timeout elapses.
//!
//! ```rust,no_run
//! use bookcast_warehouse::{DuckDbWarehouse, LocalWarehouseConfig, PollPolicy, WarehouseClient};
//!
//! # async fn run() -> Result<(), bookcast_warehouse::WarehouseError> {
//! let warehouse = DuckDbWarehouse::open(LocalWarehouseConfig::at("analytics.duckdb"))?;
//! let job = warehouse.run_sql("CREATE SCHEMA IF NOT EXISTS scratch").await?;
//! let outcome = warehouse.await_completion(&job, &PollPolicy::default()).await?;
//! assert!(outcome.is_success());
//! # Ok(())
//! # }
//! ```

pub mod duckdb;
pub mod job;
pub mod local;
pub mod poll;
pub mod schema;
pub mod tabular;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;

pub use job::{JobHandle, JobOutcome, JobState, JobStatus, ModelInfo, Provisioned, RowFailure};
pub use local::{DuckDbWarehouse, LocalWarehouseConfig, QueryGuardrails};
pub use poll::{poll_job, Backoff, PollPolicy};
pub use schema::{DatasetRef, FieldSpec, FieldType, ModelRef, SqlDialect, TableRef, TableSchema};
pub use tabular::TabularData;

/// Boxed future returned by [`WarehouseClient`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A result row keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    /// The request never produced a response.
    #[error("transport error during {operation}: {message}")]
    Transport { operation: String, message: String },

    /// The warehouse answered with an error.
    #[error("{operation} failed with status {status}: {message}")]
    Api {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("{} row(s) rejected by {table}: {}", failures.len(), summarize_failures(failures))]
    InsertFailed {
        table: String,
        failures: Vec<RowFailure>,
    },

    #[error("job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    #[error("job {job_id} still running after {elapsed_ms}ms")]
    JobTimedOut { job_id: String, elapsed_ms: u64 },

    #[error("unknown job {0}")]
    UnknownJob(String),

    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("query rejected: {0}")]
    QueryRejected(String),

    #[error("query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// The backend cannot perform this operation at all.
    #[error("unsupported by {backend}: {message}")]
    Unsupported { backend: SqlDialect, message: String },

    #[error("unexpected response from {operation}: {message}")]
    Decode { operation: String, message: String },
}

fn summarize_failures(failures: &[RowFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("#{}: {}", failure.index, failure.reasons.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// The capabilities the migration pipeline and forecast layer need from a warehouse.
pub trait WarehouseClient: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    fn create_dataset_if_absent<'a>(
        &'a self,
        dataset: &'a DatasetRef,
    ) -> BoxFuture<'a, Result<Provisioned, WarehouseError>>;

    fn create_table_if_absent<'a>(
        &'a self,
        table: &'a TableRef,
        schema: &'a TableSchema,
    ) -> BoxFuture<'a, Result<Provisioned, WarehouseError>>;

    /// Streaming insert. All rows land or none do; rejected rows are reported
    /// through [`WarehouseError::InsertFailed`].
    fn insert_rows<'a>(
        &'a self,
        table: &'a TableRef,
        rows: &'a [Row],
    ) -> BoxFuture<'a, Result<usize, WarehouseError>>;

    /// Submit a bulk load that replaces the table contents.
    fn load_table<'a>(
        &'a self,
        table: &'a TableRef,
        schema: &'a TableSchema,
        data: &'a TabularData,
    ) -> BoxFuture<'a, Result<JobHandle, WarehouseError>>;

    /// Submit a SQL statement (DDL, CTAS, or model training) as a job.
    fn run_sql<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<JobHandle, WarehouseError>>;

    fn job_status<'a>(&'a self, job: &'a JobHandle)
        -> BoxFuture<'a, Result<JobStatus, WarehouseError>>;

    fn await_completion<'a>(
        &'a self,
        job: &'a JobHandle,
        policy: &'a PollPolicy,
    ) -> BoxFuture<'a, Result<JobOutcome, WarehouseError>> {
        Box::pin(poll_job(job, policy, move || self.job_status(job)))
    }

    /// Run a query to completion and return every result row.
    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, WarehouseError>>;

    /// Metadata for a trained model, or `None` when it does not exist.
    fn model_info<'a>(
        &'a self,
        model: &'a ModelRef,
    ) -> BoxFuture<'a, Result<Option<ModelInfo>, WarehouseError>>;
}

/// Trim whitespace and trailing semicolons, rejecting empty statements.
///
/// # Errors
/// Returns [`WarehouseError::QueryRejected`] when nothing is left.
pub fn normalize_sql(sql: &str) -> Result<&str, WarehouseError> {
    let normalized = sql.trim().trim_end_matches(';').trim();
    if normalized.is_empty() {
        return Err(WarehouseError::QueryRejected(String::from(
            "query must not be empty",
        )));
    }
    Ok(normalized)
}

/// Whether the statement only reads.
#[must_use]
pub fn is_select_like(sql: &str) -> bool {
    let first_keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(
        first_keyword.as_str(),
        "SELECT" | "WITH" | "EXPLAIN" | "SHOW" | "DESCRIBE"
    )
}

/// Whether the statement needs BigQuery ML (`CREATE MODEL`, `ML.FORECAST`, ...).
#[must_use]
pub fn uses_warehouse_ml(sql: &str) -> bool {
    let upper = sql.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let calls_ml_function = upper.match_indices("ML.").any(|(index, _)| {
        index == 0 || !(bytes[index - 1].is_ascii_alphanumeric() || bytes[index - 1] == b'_')
    });

    let mut words = upper.split_whitespace();
    let creates_model = words.next() == Some("CREATE")
        && words.find(|word| !matches!(*word, "OR" | "REPLACE")) == Some("MODEL");

    calls_ml_function || creates_model
}
