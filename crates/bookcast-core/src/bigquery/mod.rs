//! BigQuery REST v2 backend for [`WarehouseClient`].

mod values;

use std::sync::Arc;

use bookcast_warehouse::{
    normalize_sql, BoxFuture, DatasetRef, JobHandle, JobState, JobStatus, ModelInfo,
    ModelRef, PollPolicy, Provisioned, Row, RowFailure, SqlDialect, TableRef, TableSchema,
    TabularData, WarehouseClient, WarehouseError,
};
use chrono::{DateTime, SecondsFormat};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{ServiceAccountKey, ServiceAccountTokenProvider, StaticToken, TokenProvider};
use crate::config::{AnalyticsConfig, ConfigError};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, HttpResponse};
use values::{decode_row, SchemaField};

pub const DEFAULT_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const DEFAULT_UPLOAD_BASE: &str = "https://bigquery.googleapis.com/upload/bigquery/v2";
const MULTIPART_BOUNDARY: &str = "bookcast_load_boundary";

pub struct BigQueryClient {
    project_id: String,
    location: Option<String>,
    http: Arc<dyn HttpClient>,
    tokens: Arc<dyn TokenProvider>,
    poll: PollPolicy,
    api_base: String,
    upload_base: String,
}

impl BigQueryClient {
    /// Jobs are billed to and run in `project_id`.
    pub fn new(
        project_id: impl Into<String>,
        http: Arc<dyn HttpClient>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            location: None,
            http,
            tokens,
            poll: PollPolicy::default(),
            api_base: String::from(DEFAULT_API_BASE),
            upload_base: String::from(DEFAULT_UPLOAD_BASE),
        }
    }

    /// Build a client from configuration, failing before any network call
    /// when analytics is disabled or credentials are unusable.
    ///
    /// # Errors
    /// Returns the [`ConfigError`] describing what is missing.
    pub fn from_config(config: &AnalyticsConfig, http: Arc<dyn HttpClient>) -> Result<Self, ConfigError> {
        if !config.enabled {
            return Err(ConfigError::Disabled);
        }
        let tokens: Arc<dyn TokenProvider> = match &config.access_token {
            Some(token) => Arc::new(StaticToken::new(token.clone())),
            None => {
                let key = ServiceAccountKey::from_file(&config.credentials_path)?;
                Arc::new(ServiceAccountTokenProvider::new(
                    key,
                    Arc::clone(&http),
                    &config.credentials_path,
                )?)
            }
        };
        let project_id = config.resolve_project_id()?;
        Ok(Self::new(project_id, http, tokens)
            .with_location(config.location.clone())
            .with_poll_policy(config.poll.policy()))
    }

    #[must_use]
    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    /// Policy used when [`WarehouseClient::query`] waits for its job.
    #[must_use]
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self, api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.upload_base = upload_base.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn send(&self, operation: &str, request: HttpRequest) -> Result<HttpResponse, WarehouseError> {
        let token = self.tokens.access_token().await?;
        let request = request.with_auth(&HttpAuth::BearerToken(token));
        debug!(operation, url = %request.url, "bigquery request");
        self.http
            .execute(request)
            .await
            .map_err(|error| WarehouseError::Transport {
                operation: operation.to_string(),
                message: error.to_string(),
            })
    }

    /// Send and require a 2xx JSON body.
    async fn call(&self, operation: &str, request: HttpRequest) -> Result<Value, WarehouseError> {
        let response = self.send(operation, request).await?;
        if !response.is_success() {
            return Err(api_error(operation, &response));
        }
        parse_body(operation, &response.body)
    }

    /// Like [`Self::call`] but a 404 becomes `None`.
    async fn call_optional(&self, operation: &str, request: HttpRequest) -> Result<Option<Value>, WarehouseError> {
        let response = self.send(operation, request).await?;
        if response.status == 404 {
            return Ok(None);
        }
        if !response.is_success() {
            return Err(api_error(operation, &response));
        }
        parse_body(operation, &response.body).map(Some)
    }

    fn new_job_reference(&self) -> Value {
        let mut reference = json!({
            "projectId": self.project_id,
            "jobId": format!("bookcast_{}", Uuid::new_v4().simple()),
        });
        if let Some(location) = &self.location {
            reference["location"] = json!(location);
        }
        reference
    }

    fn dataset_url(&self, dataset: &DatasetRef) -> String {
        format!(
            "{}/projects/{}/datasets/{}",
            self.api_base,
            urlencoding::encode(dataset.project()),
            dataset.dataset()
        )
    }

    fn table_url(&self, table: &TableRef) -> String {
        format!("{}/tables/{}", self.dataset_url(table.dataset()), table.name())
    }

    fn job_url(&self, job: &JobHandle, resource: &str) -> String {
        let mut url = format!(
            "{}/projects/{}/{resource}/{}",
            self.api_base,
            urlencoding::encode(&self.project_id),
            urlencoding::encode(&job.job_id)
        );
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            url.push_str("?location=");
            url.push_str(&urlencoding::encode(location));
        }
        url
    }

    async fn create_dataset(&self, dataset: &DatasetRef) -> Result<Provisioned, WarehouseError> {
        let operation = "datasets.get";
        if self
            .call_optional(operation, HttpRequest::get(self.dataset_url(dataset)))
            .await?
            .is_some()
        {
            return Ok(Provisioned::AlreadyExists);
        }

        let mut body = json!({
            "datasetReference": {
                "projectId": dataset.project(),
                "datasetId": dataset.dataset(),
            }
        });
        if let Some(location) = &self.location {
            body["location"] = json!(location);
        }
        let url = format!(
            "{}/projects/{}/datasets",
            self.api_base,
            urlencoding::encode(dataset.project())
        );
        let response = self
            .send("datasets.insert", HttpRequest::post(url).with_json(&body))
            .await?;
        match response.status {
            409 => Ok(Provisioned::AlreadyExists),
            status if (200..300).contains(&status) => {
                info!(dataset = dataset.dataset(), "created dataset");
                Ok(Provisioned::Created)
            }
            _ => Err(api_error("datasets.insert", &response)),
        }
    }

    async fn create_table(&self, table: &TableRef, schema: &TableSchema) -> Result<Provisioned, WarehouseError> {
        if self
            .call_optional("tables.get", HttpRequest::get(self.table_url(table)))
            .await?
            .is_some()
        {
            return Ok(Provisioned::AlreadyExists);
        }

        let body = json!({
            "tableReference": table_reference(table),
            "schema": schema_json(schema),
        });
        let url = format!("{}/tables", self.dataset_url(table.dataset()));
        let response = self
            .send("tables.insert", HttpRequest::post(url).with_json(&body))
            .await?;
        match response.status {
            409 => Ok(Provisioned::AlreadyExists),
            status if (200..300).contains(&status) => {
                info!(table = %table, "created table");
                Ok(Provisioned::Created)
            }
            _ => Err(api_error("tables.insert", &response)),
        }
    }

    async fn insert(&self, table: &TableRef, rows: &[Row]) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let body = json!({
            "kind": "bigquery#tableDataInsertAllRequest",
            "skipInvalidRows": false,
            "ignoreUnknownValues": false,
            "rows": rows.iter().map(|row| json!({"json": row})).collect::<Vec<_>>(),
        });
        let url = format!("{}/insertAll", self.table_url(table));
        let response = self
            .call("tabledata.insertAll", HttpRequest::post(url).with_json(&body))
            .await?;

        let failures = insert_failures(&response);
        if failures.is_empty() {
            Ok(rows.len())
        } else {
            Err(WarehouseError::InsertFailed {
                table: table.to_string(),
                failures,
            })
        }
    }

    async fn load(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        data: &TabularData,
    ) -> Result<JobHandle, WarehouseError> {
        let metadata = json!({
            "jobReference": self.new_job_reference(),
            "configuration": {
                "load": {
                    "destinationTable": table_reference(table),
                    "sourceFormat": "CSV",
                    "skipLeadingRows": 1,
                    "writeDisposition": "WRITE_TRUNCATE",
                    "createDisposition": "CREATE_IF_NEEDED",
                    "schema": schema_json(schema),
                }
            }
        });
        let csv = String::from_utf8(data.to_csv_bytes()?).map_err(|error| {
            WarehouseError::InvalidData(format!("export is not valid UTF-8: {error}"))
        })?;
        let body = format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
             --{MULTIPART_BOUNDARY}\r\nContent-Type: text/csv\r\n\r\n{csv}\r\n--{MULTIPART_BOUNDARY}--\r\n"
        );
        let url = format!(
            "{}/projects/{}/jobs?uploadType=multipart",
            self.upload_base,
            urlencoding::encode(&self.project_id)
        );
        let request = HttpRequest::post(url)
            .with_header(
                "content-type",
                format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
            )
            .with_body(body)
            .with_timeout_ms(300_000);

        let job = self.call("jobs.insert (load)", request).await?;
        info!(table = %table, rows = data.row_count(), "submitted load job");
        job_handle(&job, "jobs.insert (load)")
    }

    async fn submit_query(&self, sql: &str) -> Result<JobHandle, WarehouseError> {
        let sql = normalize_sql(sql)?;
        debug!(sql, "submitting query job");
        let body = json!({
            "jobReference": self.new_job_reference(),
            "configuration": {
                "query": {
                    "query": sql,
                    "useLegacySql": false,
                }
            }
        });
        let url = format!(
            "{}/projects/{}/jobs",
            self.api_base,
            urlencoding::encode(&self.project_id)
        );
        let job = self
            .call("jobs.insert", HttpRequest::post(url).with_json(&body))
            .await?;
        job_handle(&job, "jobs.insert")
    }

    async fn fetch_status(&self, job: &JobHandle) -> Result<JobStatus, WarehouseError> {
        let body = self
            .call("jobs.get", HttpRequest::get(self.job_url(job, "jobs")))
            .await?;
        Ok(job_status(&body))
    }

    async fn fetch_results(&self, job: &JobHandle) -> Result<Vec<Row>, WarehouseError> {
        let operation = "jobs.getQueryResults";
        let base_url = self.job_url(job, "queries");
        let separator = if base_url.contains('?') { '&' } else { '?' };
        let mut rows = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let url = match &page_token {
                Some(token) => format!("{base_url}{separator}pageToken={}", urlencoding::encode(token)),
                None => base_url.clone(),
            };
            let page = self.call(operation, HttpRequest::get(url)).await?;
            if page.get("jobComplete").and_then(Value::as_bool) == Some(false) {
                return Err(WarehouseError::Decode {
                    operation: operation.to_string(),
                    message: format!("results of job {job} are not ready"),
                });
            }

            let fields: Vec<SchemaField> = match page.pointer("/schema/fields") {
                Some(fields) => serde_json::from_value(fields.clone()).map_err(|error| {
                    WarehouseError::Decode {
                        operation: operation.to_string(),
                        message: error.to_string(),
                    }
                })?,
                None => Vec::new(),
            };
            if let Some(page_rows) = page.get("rows").and_then(Value::as_array) {
                for row in page_rows {
                    rows.push(decode_row(&fields, row)?);
                }
            }

            page_token = page
                .get("pageToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if page_token.is_none() {
                return Ok(rows);
            }
        }
    }

    async fn run_query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
        let job = self.submit_query(sql).await?;
        self.await_completion(&job, &self.poll)
            .await?
            .into_result(&job)?;
        self.fetch_results(&job).await
    }

    async fn fetch_model(&self, model: &ModelRef) -> Result<Option<ModelInfo>, WarehouseError> {
        let url = format!("{}/models/{}", self.dataset_url(model.dataset()), model.name());
        let body = self.call_optional("models.get", HttpRequest::get(url)).await?;
        Ok(body.map(|body| ModelInfo {
            model_type: body
                .get("modelType")
                .and_then(Value::as_str)
                .map(str::to_string),
            created_at: body
                .get("creationTime")
                .and_then(Value::as_str)
                .and_then(|millis| millis.parse::<i64>().ok())
                .and_then(DateTime::from_timestamp_millis)
                .map(|created| created.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }))
    }
}

impl WarehouseClient for BigQueryClient {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::BigQuery
    }

    fn create_dataset_if_absent<'a>(
        &'a self,
        dataset: &'a DatasetRef,
    ) -> BoxFuture<'a, Result<Provisioned, WarehouseError>> {
        Box::pin(self.create_dataset(dataset))
    }

    fn create_table_if_absent<'a>(
        &'a self,
        table: &'a TableRef,
        schema: &'a TableSchema,
    ) -> BoxFuture<'a, Result<Provisioned, WarehouseError>> {
        Box::pin(self.create_table(table, schema))
    }

    fn insert_rows<'a>(
        &'a self,
        table: &'a TableRef,
        rows: &'a [Row],
    ) -> BoxFuture<'a, Result<usize, WarehouseError>> {
        Box::pin(self.insert(table, rows))
    }

    fn load_table<'a>(
        &'a self,
        table: &'a TableRef,
        schema: &'a TableSchema,
        data: &'a TabularData,
    ) -> BoxFuture<'a, Result<JobHandle, WarehouseError>> {
        Box::pin(self.load(table, schema, data))
    }

    fn run_sql<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<JobHandle, WarehouseError>> {
        Box::pin(self.submit_query(sql))
    }

    fn job_status<'a>(
        &'a self,
        job: &'a JobHandle,
    ) -> BoxFuture<'a, Result<JobStatus, WarehouseError>> {
        Box::pin(self.fetch_status(job))
    }

    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, WarehouseError>> {
        Box::pin(self.run_query(sql))
    }

    fn model_info<'a>(
        &'a self,
        model: &'a ModelRef,
    ) -> BoxFuture<'a, Result<Option<ModelInfo>, WarehouseError>> {
        Box::pin(self.fetch_model(model))
    }
}

fn parse_body(operation: &str, body: &str) -> Result<Value, WarehouseError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|error| WarehouseError::Decode {
        operation: operation.to_string(),
        message: error.to_string(),
    })
}

/// Error bodies look like `{"error": {"code": 403, "message": "..."}}`.
fn api_error(operation: &str, response: &HttpResponse) -> WarehouseError {
    let message = serde_json::from_str::<Value>(&response.body)
        .ok()
        .and_then(|body| {
            body.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| response.body.chars().take(500).collect());
    WarehouseError::Api {
        operation: operation.to_string(),
        status: response.status,
        message,
    }
}

fn table_reference(table: &TableRef) -> Value {
    json!({
        "projectId": table.project(),
        "datasetId": table.dataset_name(),
        "tableId": table.name(),
    })
}

fn schema_json(schema: &TableSchema) -> Value {
    let fields = schema
        .fields()
        .iter()
        .map(|field| {
            json!({
                "name": field.name,
                "type": SqlDialect::BigQuery.type_name(field.field_type),
                "mode": "NULLABLE",
            })
        })
        .collect::<Vec<_>>();
    json!({ "fields": fields })
}

fn job_handle(job: &Value, operation: &str) -> Result<JobHandle, WarehouseError> {
    let job_id = job
        .pointer("/jobReference/jobId")
        .and_then(Value::as_str)
        .ok_or_else(|| WarehouseError::Decode {
            operation: operation.to_string(),
            message: String::from("response has no jobReference.jobId"),
        })?;
    let location = job
        .pointer("/jobReference/location")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(JobHandle::new(job_id, location))
}

fn job_status(job: &Value) -> JobStatus {
    let state = job
        .pointer("/status/state")
        .and_then(Value::as_str)
        .map_or(JobState::Pending, JobState::parse);
    let error = job
        .pointer("/status/errorResult/message")
        .and_then(Value::as_str)
        .map(str::to_string);
    JobStatus { state, error }
}

fn insert_failures(response: &Value) -> Vec<RowFailure> {
    let Some(errors) = response.get("insertErrors").and_then(Value::as_array) else {
        return Vec::new();
    };
    errors
        .iter()
        .map(|entry| {
            let index = entry
                .get("index")
                .and_then(Value::as_u64)
                .and_then(|index| usize::try_from(index).ok())
                .unwrap_or_default();
            let reasons = entry
                .get("errors")
                .and_then(Value::as_array)
                .map(|errors| {
                    errors
                        .iter()
                        .map(|error| {
                            let reason = error.get("reason").and_then(Value::as_str).unwrap_or("invalid");
                            match error.get("message").and_then(Value::as_str) {
                                Some(message) if !message.is_empty() => format!("{reason}: {message}"),
                                _ => reason.to_string(),
                            }
                        })
                        .collect()
                })
                .unwrap_or_default();
            RowFailure { index, reasons }
        })
        .collect()
}
