//! Local warehouse backed by a `DuckDB` file.
//!
//! Datasets map onto schemas. Jobs execute synchronously at submission and their
//! final status is remembered for [`WarehouseClient::job_status`]; only the most
//! recent [`RETAINED_JOBS`] are kept. Statements that need BigQuery ML are
//! accepted as jobs that immediately fail.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use ::duckdb::types::{TimeUnit, Value as DuckValue};
use ::duckdb::{params_from_iter, Connection, ToSql};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat};
use serde_json::{Number, Value};
use tracing::{debug, warn};

use crate::duckdb::DuckDbConnectionManager;
use crate::{
    is_select_like, normalize_sql, uses_warehouse_ml, BoxFuture, DatasetRef, JobHandle,
    JobStatus, ModelInfo, ModelRef, Provisioned, Row, RowFailure, SqlDialect, TableRef,
    TableSchema, TabularData, WarehouseClient, WarehouseError,
};

/// Finished jobs remembered for status lookups; older ones become unknown.
pub const RETAINED_JOBS: usize = 256;

const LOCAL_JOB_PREFIX: &str = "local_";

const ML_UNSUPPORTED: &str =
    "statement requires BigQuery ML; the local DuckDB warehouse cannot train or evaluate models";

/// Guardrails for query execution to prevent resource exhaustion.
#[derive(Debug, Clone, Copy)]
pub struct QueryGuardrails {
    pub max_rows: usize,
    pub query_timeout_ms: u64,
}

impl Default for QueryGuardrails {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            query_timeout_ms: 30_000,
        }
    }
}

impl QueryGuardrails {
    fn timeout(self) -> Duration {
        Duration::from_millis(self.query_timeout_ms.max(1))
    }

    fn validate(self) -> Result<(), WarehouseError> {
        if self.max_rows == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "max_rows must be greater than zero",
            )));
        }
        if self.query_timeout_ms == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "query_timeout_ms must be greater than zero",
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LocalWarehouseConfig {
    pub db_path: PathBuf,
    pub max_pool_size: usize,
    pub guardrails: QueryGuardrails,
}

impl LocalWarehouseConfig {
    #[must_use]
    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            max_pool_size: 4,
            guardrails: QueryGuardrails::default(),
        }
    }
}

pub struct DuckDbWarehouse {
    manager: DuckDbConnectionManager,
    guardrails: QueryGuardrails,
    jobs: Mutex<BTreeMap<u64, JobStatus>>,
    next_job: AtomicU64,
}

impl DuckDbWarehouse {
    /// Open (or create) the database file.
    ///
    /// # Errors
    /// Returns an error if the parent directory or database cannot be created.
    pub fn open(config: LocalWarehouseConfig) -> Result<Self, WarehouseError> {
        config.guardrails.validate()?;
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let manager = DuckDbConnectionManager::open(config.db_path, config.max_pool_size)?;
        Ok(Self {
            manager,
            guardrails: config.guardrails,
            jobs: Mutex::new(BTreeMap::new()),
            next_job: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    fn record_job(&self, status: JobStatus) -> JobHandle {
        let sequence = self.next_job.fetch_add(1, Ordering::Relaxed);
        let job_id = format!("{LOCAL_JOB_PREFIX}{sequence}");
        if let Some(reason) = &status.error {
            debug!(job_id = %job_id, reason = %reason, "local job failed");
        }
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(sequence, status);
        while jobs.len() > RETAINED_JOBS {
            jobs.pop_first();
        }
        JobHandle::new(job_id, None)
    }

    fn create_dataset_blocking(&self, dataset: &DatasetRef) -> Result<Provisioned, WarehouseError> {
        let connection = self.manager.acquire()?;
        let exists: i64 = connection.query_row(
            "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name = ?",
            [dataset.dataset()],
            |row| row.get(0),
        )?;
        if exists > 0 {
            return Ok(Provisioned::AlreadyExists);
        }
        connection.execute_batch(&format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            SqlDialect::DuckDb.quote_ident(dataset.dataset())
        ))?;
        Ok(Provisioned::Created)
    }

    fn create_table_blocking(
        &self,
        table: &TableRef,
        schema: &TableSchema,
    ) -> Result<Provisioned, WarehouseError> {
        let connection = self.manager.acquire()?;
        if table_exists(&connection, table)? {
            return Ok(Provisioned::AlreadyExists);
        }
        connection.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            SqlDialect::DuckDb.qualified(table),
            schema.to_column_ddl(SqlDialect::DuckDb)
        ))?;
        Ok(Provisioned::Created)
    }

    fn insert_rows_blocking(&self, table: &TableRef, rows: &[Row]) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let connection = self.manager.acquire()?;
        let column_types = column_types(&connection, table)?;
        if column_types.is_empty() {
            return Err(WarehouseError::Api {
                operation: String::from("insert_rows"),
                status: 404,
                message: format!("table {table} not found"),
            });
        }

        // Validate everything up front so a bad row never leaves a partial insert.
        let mut failures = Vec::new();
        let mut prepared = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            match validate_row(&connection, row, &column_types) {
                Ok(cells) => prepared.push(cells),
                Err(reasons) => failures.push(RowFailure { index, reasons }),
            }
        }
        if !failures.is_empty() {
            return Err(WarehouseError::InsertFailed {
                table: table.to_string(),
                failures,
            });
        }

        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            for cells in &prepared {
                let columns = cells
                    .iter()
                    .map(|(name, _, _)| SqlDialect::DuckDb.quote_ident(name))
                    .collect::<Vec<_>>()
                    .join(", ");
                let placeholders = cells
                    .iter()
                    .map(|(_, data_type, _)| format!("CAST(? AS {data_type})"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "INSERT INTO {} ({columns}) VALUES ({placeholders})",
                    SqlDialect::DuckDb.qualified(table)
                );
                connection.execute(
                    &sql,
                    params_from_iter(cells.iter().map(|(_, _, value)| value.as_deref())),
                )?;
            }
            Ok(prepared.len())
        })();
        finalize_transaction(&connection, result)
    }

    fn load_table_blocking(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        data: &TabularData,
    ) -> Result<JobHandle, WarehouseError> {
        let mut cast_types = Vec::with_capacity(data.header().len());
        for column in data.header() {
            let field = schema.field(column).ok_or_else(|| {
                WarehouseError::InvalidData(format!("column `{column}` is not in the schema of {table}"))
            })?;
            cast_types.push(SqlDialect::DuckDb.type_name(field.field_type));
        }

        let connection = self.manager.acquire()?;
        let qualified = SqlDialect::DuckDb.qualified(table);
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            connection.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {qualified} ({}); DELETE FROM {qualified};",
                schema.to_column_ddl(SqlDialect::DuckDb)
            ))?;
            let columns = data
                .header()
                .iter()
                .map(|column| SqlDialect::DuckDb.quote_ident(column))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = cast_types
                .iter()
                .map(|data_type| format!("CAST(? AS {data_type})"))
                .collect::<Vec<_>>()
                .join(", ");
            let mut statement = connection
                .prepare(&format!("INSERT INTO {qualified} ({columns}) VALUES ({placeholders})"))?;
            for row in data.rows() {
                let values = row
                    .iter()
                    .map(|cell| (!cell.is_empty()).then_some(cell.as_str()));
                statement.execute(params_from_iter(values))?;
            }
            Ok(data.row_count())
        })();

        let status = match finalize_transaction(&connection, result) {
            Ok(loaded) => {
                debug!(table = %table, rows = loaded, "local load complete");
                JobStatus::succeeded()
            }
            Err(error) => JobStatus::failed(error.to_string()),
        };
        Ok(self.record_job(status))
    }

    fn run_sql_blocking(&self, sql: &str) -> Result<JobHandle, WarehouseError> {
        let sql = normalize_sql(sql)?;
        if uses_warehouse_ml(sql) {
            return Ok(self.record_job(JobStatus::failed(ML_UNSUPPORTED)));
        }
        let connection = self.manager.acquire()?;
        let status = match connection.execute_batch(sql) {
            Ok(()) => JobStatus::succeeded(),
            Err(error) => JobStatus::failed(error.to_string()),
        };
        Ok(self.record_job(status))
    }

    fn job_status_blocking(&self, job: &JobHandle) -> Result<JobStatus, WarehouseError> {
        let sequence = job
            .job_id
            .strip_prefix(LOCAL_JOB_PREFIX)
            .and_then(|sequence| sequence.parse::<u64>().ok());
        sequence
            .and_then(|sequence| {
                self.jobs
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&sequence)
                    .cloned()
            })
            .ok_or_else(|| WarehouseError::UnknownJob(job.job_id.clone()))
    }

    fn query_blocking(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
        let sql = normalize_sql(sql)?;
        if uses_warehouse_ml(sql) {
            return Err(WarehouseError::Unsupported {
                backend: SqlDialect::DuckDb,
                message: String::from(ML_UNSUPPORTED),
            });
        }
        enforce_read_only_query(sql)?;

        let connection = self.manager.acquire()?;
        execute_select_query(&connection, sql, self.guardrails, Instant::now())
    }
}

impl WarehouseClient for DuckDbWarehouse {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::DuckDb
    }

    fn create_dataset_if_absent<'a>(
        &'a self,
        dataset: &'a DatasetRef,
    ) -> BoxFuture<'a, Result<Provisioned, WarehouseError>> {
        Box::pin(async move { self.create_dataset_blocking(dataset) })
    }

    fn create_table_if_absent<'a>(
        &'a self,
        table: &'a TableRef,
        schema: &'a TableSchema,
    ) -> BoxFuture<'a, Result<Provisioned, WarehouseError>> {
        Box::pin(async move { self.create_table_blocking(table, schema) })
    }

    fn insert_rows<'a>(
        &'a self,
        table: &'a TableRef,
        rows: &'a [Row],
    ) -> BoxFuture<'a, Result<usize, WarehouseError>> {
        Box::pin(async move { self.insert_rows_blocking(table, rows) })
    }

    fn load_table<'a>(
        &'a self,
        table: &'a TableRef,
        schema: &'a TableSchema,
        data: &'a TabularData,
    ) -> BoxFuture<'a, Result<JobHandle, WarehouseError>> {
        Box::pin(async move { self.load_table_blocking(table, schema, data) })
    }

    fn run_sql<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<JobHandle, WarehouseError>> {
        Box::pin(async move { self.run_sql_blocking(sql) })
    }

    fn job_status<'a>(
        &'a self,
        job: &'a JobHandle,
    ) -> BoxFuture<'a, Result<JobStatus, WarehouseError>> {
        Box::pin(async move { self.job_status_blocking(job) })
    }

    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, WarehouseError>> {
        Box::pin(async move { self.query_blocking(sql) })
    }

    fn model_info<'a>(
        &'a self,
        _model: &'a ModelRef,
    ) -> BoxFuture<'a, Result<Option<ModelInfo>, WarehouseError>> {
        Box::pin(async { Ok(None) })
    }
}

fn table_exists(connection: &Connection, table: &TableRef) -> Result<bool, WarehouseError> {
    let count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
        [table.dataset_name(), table.name()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn column_types(
    connection: &Connection,
    table: &TableRef,
) -> Result<HashMap<String, String>, WarehouseError> {
    let mut statement = connection.prepare(
        "SELECT column_name, data_type FROM information_schema.columns \
         WHERE table_schema = ? AND table_name = ?",
    )?;
    let mut rows = statement.query([table.dataset_name(), table.name()])?;
    let mut types = HashMap::new();
    while let Some(row) = rows.next()? {
        types.insert(row.get::<_, String>(0)?, row.get::<_, String>(1)?);
    }
    Ok(types)
}

type PreparedCell = (String, String, Option<String>);

fn validate_row(
    connection: &Connection,
    row: &Row,
    column_types: &HashMap<String, String>,
) -> Result<Vec<PreparedCell>, Vec<String>> {
    let mut reasons = Vec::new();
    let mut cells = Vec::with_capacity(row.len());

    for (name, value) in row {
        let Some(data_type) = column_types.get(name) else {
            reasons.push(format!("no such field: {name}"));
            continue;
        };
        let text = match value {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            Value::Array(_) | Value::Object(_) => {
                reasons.push(format!("field {name}: nested values are not supported"));
                continue;
            }
        };
        if let Some(text) = &text {
            let castable: Result<bool, ::duckdb::Error> = connection.query_row(
                &format!("SELECT TRY_CAST(? AS {data_type}) IS NOT NULL"),
                [text.as_str()],
                |result| result.get(0),
            );
            if !matches!(castable, Ok(true)) {
                reasons.push(format!("field {name}: cannot convert `{text}` to {data_type}"));
                continue;
            }
        }
        cells.push((name.clone(), data_type.clone(), text));
    }

    if reasons.is_empty() {
        Ok(cells)
    } else {
        Err(reasons)
    }
}

fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback) = connection.execute_batch("ROLLBACK") {
                warn!(%error, %rollback, "rollback after failed write did not complete");
            }
            Err(error)
        }
    }
}

fn execute_select_query(
    connection: &Connection,
    sql: &str,
    guardrails: QueryGuardrails,
    started: Instant,
) -> Result<Vec<Row>, WarehouseError> {
    let mut statement = connection.prepare(sql)?;
    // Column metadata is only available once the statement has run.
    let _ = statement.query([] as [&dyn ToSql; 0])?;
    let column_count = statement.column_count();
    let mut columns = Vec::with_capacity(column_count);
    for index in 0..column_count {
        columns.push(statement.column_name(index).map(ToString::to_string)?);
    }

    let mut cursor = statement.query([] as [&dyn ToSql; 0])?;
    let mut rows = Vec::new();
    while let Some(row) = cursor.next()? {
        ensure_timeout(started, guardrails.timeout())?;
        if rows.len() >= guardrails.max_rows {
            warn!(max_rows = guardrails.max_rows, "query result truncated");
            break;
        }
        let mut output = Row::new();
        for (index, name) in columns.iter().enumerate() {
            let value: DuckValue = row.get(index)?;
            output.insert(name.clone(), to_json_value(value));
        }
        rows.push(output);
    }

    ensure_timeout(started, guardrails.timeout())?;
    Ok(rows)
}

fn to_json_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(value) => Value::Bool(value),
        DuckValue::TinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::SmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::Int(value) => Value::Number(Number::from(value)),
        DuckValue::BigInt(value) => Value::Number(Number::from(value)),
        DuckValue::UTinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::USmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::UInt(value) => Value::Number(Number::from(value)),
        DuckValue::UBigInt(value) => Value::Number(Number::from(value)),
        // SUM over BIGINT widens to HUGEINT.
        DuckValue::HugeInt(value) => i64::try_from(value)
            .map(|value| Value::Number(Number::from(value)))
            .unwrap_or_else(|_| number_from_f64(value as f64)),
        DuckValue::Float(value) => number_from_f64(f64::from(value)),
        DuckValue::Double(value) => number_from_f64(value),
        DuckValue::Text(value) => Value::String(value),
        DuckValue::Blob(value) => Value::String(hex::encode(value)),
        DuckValue::Date32(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(i64::from(days))))
            .map_or(Value::Null, |date| Value::String(date.format("%Y-%m-%d").to_string())),
        DuckValue::Timestamp(unit, value) => DateTime::from_timestamp_micros(to_micros(unit, value))
            .map_or(Value::Null, |timestamp| {
                Value::String(timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }),
        DuckValue::Time64(unit, value) => {
            let micros = to_micros(unit, value);
            let seconds = u32::try_from(micros.div_euclid(1_000_000)).unwrap_or(0);
            let nanos = u32::try_from(micros.rem_euclid(1_000_000) * 1_000).unwrap_or(0);
            NaiveTime::from_num_seconds_from_midnight_opt(seconds, nanos)
                .map_or(Value::Null, |time| Value::String(time.format("%H:%M:%S").to_string()))
        }
        other => Value::String(format!("{other:?}")),
    }
}

fn to_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

fn number_from_f64(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn enforce_read_only_query(sql: &str) -> Result<(), WarehouseError> {
    if !is_select_like(sql) {
        return Err(WarehouseError::QueryRejected(String::from(
            "query() accepts only SELECT/CTE statements; submit writes with run_sql()",
        )));
    }
    if has_multiple_statements(sql) {
        return Err(WarehouseError::QueryRejected(String::from(
            "multiple SQL statements are not allowed in a query",
        )));
    }
    Ok(())
}

fn has_multiple_statements(sql: &str) -> bool {
    sql.split(';').filter(|part| !part.trim().is_empty()).count() > 1
}

fn ensure_timeout(started: Instant, timeout: Duration) -> Result<(), WarehouseError> {
    if started.elapsed() > timeout {
        return Err(WarehouseError::QueryTimeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        });
    }
    Ok(())
}
