//! Wire contract of the BigQuery backend, checked against scripted HTTP responses.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bookcast_core::http_client::{HttpError, HttpMethod};
use bookcast_core::{
    BigQueryClient, ForecastLayer, ForecastSeries, HttpClient, HttpRequest, HttpResponse,
    ModelStatus, Statements, StaticToken,
};
use bookcast_warehouse::{
    DatasetRef, PollPolicy, Provisioned, Row, SqlDialect, WarehouseClient, WarehouseError,
};
use serde_json::{json, Value};

const API: &str = "https://bq.test/bigquery/v2";
const UPLOAD: &str = "https://bq.test/upload/bigquery/v2";

/// Answers requests from a queue, in order, and records what was sent.
#[derive(Default)]
struct ScriptedHttp {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttp {
    fn with(responses: Vec<HttpResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl HttpClient for ScriptedHttp {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            self.requests.lock().expect("requests lock").push(request);
            self.responses
                .lock()
                .expect("responses lock")
                .pop_front()
                .ok_or_else(|| HttpError::new("no scripted response left"))
        })
    }
}

fn respond(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        body: body.to_string(),
    }
}

fn client(http: &Arc<ScriptedHttp>) -> BigQueryClient {
    BigQueryClient::new(
        "acme-travel",
        Arc::clone(http) as Arc<dyn HttpClient>,
        Arc::new(StaticToken::new("test-token")),
    )
    .with_location(Some(String::from("US")))
    .with_poll_policy(PollPolicy::fixed(
        Duration::from_millis(1),
        Duration::from_secs(5),
    ))
    .with_endpoints(API, UPLOAD)
}

fn statements() -> Statements {
    let dataset = DatasetRef::new("acme-travel", "booking_analytics").expect("dataset");
    Statements::new(SqlDialect::BigQuery, dataset).expect("statements")
}

fn job_inserted(job_id: &str) -> HttpResponse {
    respond(200, json!({"jobReference": {"projectId": "acme-travel", "jobId": job_id, "location": "US"}}))
}

fn job_state(state: &str) -> HttpResponse {
    respond(200, json!({"status": {"state": state}}))
}

fn forecast_page(horizon: usize) -> HttpResponse {
    let rows = (0..horizon)
        .map(|day| {
            let predicted = 10.0 + day as f64;
            json!({"f": [
                {"v": (1_704_067_200 + day * 86_400).to_string()},
                {"v": predicted.to_string()},
                {"v": "1.5"},
                {"v": "0.9"},
                {"v": (predicted - 2.0).to_string()},
                {"v": (predicted + 2.0).to_string()},
            ]})
        })
        .collect::<Vec<_>>();
    respond(
        200,
        json!({
            "jobComplete": true,
            "schema": {"fields": [
                {"name": "date", "type": "TIMESTAMP"},
                {"name": "predicted_bookings", "type": "FLOAT"},
                {"name": "standard_error", "type": "FLOAT"},
                {"name": "confidence_level", "type": "FLOAT"},
                {"name": "lower_bound", "type": "FLOAT"},
                {"name": "upper_bound", "type": "FLOAT"},
            ]},
            "totalRows": horizon.to_string(),
            "rows": rows,
        }),
    )
}

// =============================================================================
// Query jobs
// =============================================================================

#[tokio::test]
async fn forecast_runs_as_a_polled_query_job_and_decodes_ascending_points() {
    let http = ScriptedHttp::with(vec![
        job_inserted("job_forecast"),
        job_state("RUNNING"),
        job_state("DONE"),
        forecast_page(7),
    ]);
    let bigquery = client(&http);
    let layer = ForecastLayer::new(&bigquery, statements());

    let points = layer
        .get_forecast(ForecastSeries::Bookings, 7, 0.9)
        .await
        .expect("forecast");

    assert_eq!(points.len(), 7);
    assert_eq!(points[0].date, "2024-01-01T00:00:00Z");
    assert!(points.windows(2).all(|pair| pair[0].date < pair[1].date));
    assert!(points.iter().all(|point| point.within_bounds()));
    assert_eq!(points[6].predicted, 16.0);

    let requests = http.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests
        .iter()
        .all(|request| request.headers.get("authorization").map(String::as_str) == Some("Bearer test-token")));

    let insert = &requests[0];
    assert_eq!(insert.method, HttpMethod::Post);
    assert_eq!(insert.url, format!("{API}/projects/acme-travel/jobs"));
    let body: Value = serde_json::from_str(insert.body.as_deref().expect("body")).expect("json body");
    assert_eq!(body["configuration"]["query"]["useLegacySql"], false);
    let sql = body["configuration"]["query"]["query"].as_str().expect("sql");
    assert!(sql.contains("ML.FORECAST"));
    assert!(sql.contains("`acme-travel.booking_analytics.booking_forecast_model`"));
    assert!(sql.contains("STRUCT(7 AS horizon, 0.9 AS confidence_level)"));
    assert!(body["jobReference"]["jobId"]
        .as_str()
        .is_some_and(|job_id| job_id.starts_with("bookcast_")));

    assert_eq!(
        requests[1].url,
        format!("{API}/projects/acme-travel/jobs/job_forecast?location=US")
    );
    assert_eq!(
        requests[3].url,
        format!("{API}/projects/acme-travel/queries/job_forecast?location=US")
    );
}

#[tokio::test]
async fn query_results_follow_page_tokens_until_exhausted() {
    let page = |value: &str, token: Option<&str>| {
        let mut body = json!({
            "jobComplete": true,
            "schema": {"fields": [{"name": "total_bookings", "type": "INTEGER"}]},
            "rows": [{"f": [{"v": value}]}],
        });
        if let Some(token) = token {
            body["pageToken"] = json!(token);
        }
        respond(200, body)
    };
    let http = ScriptedHttp::with(vec![
        job_inserted("job_pages"),
        job_state("DONE"),
        page("5", Some("page two")),
        page("8", None),
    ]);
    let bigquery = client(&http);

    let rows: Vec<Row> = bigquery
        .query("SELECT total_bookings FROM `acme-travel.booking_analytics.daily_bookings`")
        .await
        .expect("query");

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["total_bookings"], 5);
    assert_eq!(rows[1]["total_bookings"], 8);
    assert_eq!(
        http.requests()[3].url,
        format!("{API}/projects/acme-travel/queries/job_pages?location=US&pageToken=page%20two")
    );
}

#[tokio::test]
async fn a_job_that_finishes_with_an_error_result_fails_the_query() {
    let http = ScriptedHttp::with(vec![
        job_inserted("job_bad"),
        respond(
            200,
            json!({"status": {"state": "DONE", "errorResult": {"reason": "invalidQuery", "message": "Not found: Model booking_forecast_model"}}}),
        ),
    ]);
    let bigquery = client(&http);

    let error = bigquery
        .query("SELECT * FROM ML.EVALUATE(MODEL `acme-travel.booking_analytics.booking_forecast_model`)")
        .await
        .expect_err("job failed");

    match error {
        WarehouseError::JobFailed { job_id, reason } => {
            assert_eq!(job_id, "job_bad");
            assert_eq!(reason, "Not found: Model booking_forecast_model");
        }
        other => panic!("expected JobFailed, got {other}"),
    }
    assert_eq!(http.requests().len(), 2, "no results are fetched for a failed job");
}

#[tokio::test]
async fn rejected_job_submission_surfaces_the_api_message() {
    let http = ScriptedHttp::with(vec![respond(
        403,
        json!({"error": {"code": 403, "message": "Access Denied: Project acme-travel", "status": "PERMISSION_DENIED"}}),
    )]);
    let bigquery = client(&http);

    let error = bigquery
        .run_sql("CREATE OR REPLACE TABLE `acme-travel.booking_analytics.daily_bookings` AS SELECT 1 AS x")
        .await
        .expect_err("403");

    assert!(matches!(
        &error,
        WarehouseError::Api { operation, status: 403, message }
            if operation == "jobs.insert" && message == "Access Denied: Project acme-travel"
    ));
}

// =============================================================================
// Provisioning and streaming inserts
// =============================================================================

#[tokio::test]
async fn dataset_creation_treats_a_conflict_as_already_existing() {
    let http = ScriptedHttp::with(vec![
        respond(404, json!({"error": {"code": 404, "message": "Not found: Dataset"}})),
        respond(409, json!({"error": {"code": 409, "message": "Already Exists: Dataset"}})),
    ]);
    let bigquery = client(&http);
    let statements = statements();

    let outcome = bigquery
        .create_dataset_if_absent(statements.dataset())
        .await
        .expect("create dataset");

    assert_eq!(outcome, Provisioned::AlreadyExists);
    let requests = http.requests();
    assert_eq!(requests[1].url, format!("{API}/projects/acme-travel/datasets"));
    let body: Value = serde_json::from_str(requests[1].body.as_deref().expect("body")).expect("json");
    assert_eq!(body["datasetReference"]["datasetId"], "booking_analytics");
    assert_eq!(body["location"], "US");
}

#[tokio::test]
async fn an_existing_table_is_not_recreated() {
    let http = ScriptedHttp::with(vec![respond(200, json!({"id": "acme-travel:booking_analytics.bookings"}))]);
    let bigquery = client(&http);
    let statements = statements();

    let outcome = bigquery
        .create_table_if_absent(statements.bookings(), &bookcast_core::statements::bookings_schema())
        .await
        .expect("create table");

    assert_eq!(outcome, Provisioned::AlreadyExists);
    assert_eq!(http.requests().len(), 1);
}

#[tokio::test]
async fn insert_errors_are_reported_per_row() {
    let http = ScriptedHttp::with(vec![respond(
        200,
        json!({"insertErrors": [
            {"index": 1, "errors": [{"reason": "invalid", "location": "bogus", "message": "no such field: bogus."}]}
        ]}),
    )]);
    let bigquery = client(&http);
    let statements = statements();
    let rows = vec![
        json!({"date": "2024-01-01", "total_bookings": 5}),
        json!({"date": "2024-01-02", "bogus": 1}),
    ]
    .into_iter()
    .map(|row| match row {
        Value::Object(row) => row,
        _ => unreachable!("rows are objects"),
    })
    .collect::<Vec<_>>();

    let error = bigquery
        .insert_rows(statements.daily_bookings(), &rows)
        .await
        .expect_err("insert rejected");

    match error {
        WarehouseError::InsertFailed { table, failures } => {
            assert_eq!(table, "acme-travel.booking_analytics.daily_bookings");
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].index, 1);
            assert_eq!(failures[0].reasons, vec![String::from("invalid: no such field: bogus.")]);
        }
        other => panic!("expected InsertFailed, got {other}"),
    }

    let body: Value = serde_json::from_str(http.requests()[0].body.as_deref().expect("body")).expect("json");
    assert_eq!(body["rows"][1]["json"]["bogus"], 1);
}

// =============================================================================
// Models
// =============================================================================

#[tokio::test]
async fn model_performance_reads_model_metadata_and_treats_404_as_untrained() {
    let http = ScriptedHttp::with(vec![
        respond(200, json!({"modelType": "ARIMA_PLUS", "creationTime": "1704067200000"})),
        respond(404, json!({"error": {"code": 404, "message": "Not found: Model"}})),
    ]);
    let bigquery = client(&http);
    let layer = ForecastLayer::new(&bigquery, statements());

    let models = layer.get_model_performance().await.expect("performance");

    assert_eq!(models[0].status, ModelStatus::Trained);
    assert_eq!(models[0].created_at.as_deref(), Some("2024-01-01T00:00:00Z"));
    assert_eq!(models[1].status, ModelStatus::NotTrained);
    assert_eq!(
        http.requests()[0].url,
        format!("{API}/projects/acme-travel/datasets/booking_analytics/models/booking_forecast_model")
    );
}
