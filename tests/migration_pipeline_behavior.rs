//! Behavior-driven tests for the migration pipeline
//!
//! These run the whole pipeline against a local DuckDB warehouse and an
//! in-memory booking store, checking what lands in the warehouse and what the
//! report says about it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bookcast_core::statements::BOOKINGS_TABLE;
use bookcast_core::{
    sync_booking, BookingRecord, ForecastLayer, InMemoryBookingSource, MigrationPipeline,
    MigrationStatus, MigrationStep, PipelineError, PriceCategory, Statements, TripDuration,
};
use bookcast_warehouse::{
    BoxFuture, DatasetRef, DuckDbWarehouse, JobHandle, JobStatus, LocalWarehouseConfig, ModelInfo,
    ModelRef, PollPolicy, Provisioned, Row, SqlDialect, TableRef, TableSchema, TabularData,
    WarehouseClient, WarehouseError,
};
use chrono::{Duration as Days, NaiveDateTime, NaiveTime, Utc};
use tempfile::{tempdir, TempDir};

// =============================================================================
// Fixtures
// =============================================================================

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// A confirmed booking made at noon `days_ago` days before today.
fn booking(booking_id: i64, days_ago: i64, total_cost: f64) -> BookingRecord {
    let booked_on = Utc::now().date_naive() - Days::days(days_ago);
    let booked_at = booked_on.and_time(NaiveTime::from_hms_opt(12, 0, 0).expect("noon"));
    BookingRecord {
        booking_id,
        destination: String::from("Baguio"),
        pickup_point: String::from("Manila"),
        date_of_tour: booked_on + Days::days(14),
        end_of_tour: Some(booked_on + Days::days(16)),
        number_of_days: 3,
        number_of_buses: 1,
        balance: 0.0,
        status: String::from("Confirmed"),
        payment_status: Some(String::from("Paid")),
        user_id: Some(42),
        booked_at,
        pickup_time: NaiveTime::from_hms_opt(8, 0, 0),
        confirmed_at: Some(booked_at + Days::hours(1)),
        payment_deadline: None,
        completed_at: None,
        created_by: None,
        total_cost,
        base_rate: 500.0,
        total_distance: 250.0,
        diesel_price: 60.0,
        diesel_cost: 300.0,
        base_cost: 700.0,
        discount: 0.0,
        discount_type: String::from("percentage"),
        discount_amount: 0.0,
        gross_price: total_cost,
    }
}

/// Ten bookings over three days, 1,000 each.
fn ten_bookings() -> Vec<BookingRecord> {
    let days_ago = [2, 2, 2, 2, 3, 3, 3, 4, 4, 4];
    days_ago
        .iter()
        .enumerate()
        .map(|(index, days)| booking(index as i64 + 1, *days, 1_000.0))
        .collect()
}

fn local_warehouse(temp: &TempDir) -> DuckDbWarehouse {
    DuckDbWarehouse::open(LocalWarehouseConfig::at(temp.path().join("analytics.duckdb")))
        .expect("warehouse open")
}

fn local_statements() -> Statements {
    let dataset = DatasetRef::new("local", "booking_analytics").expect("dataset");
    Statements::new(SqlDialect::DuckDb, dataset).expect("statements")
}

fn fast_poll() -> PollPolicy {
    PollPolicy::fixed(Duration::from_millis(5), Duration::from_secs(5))
}

async fn bookings_count(warehouse: &dyn WarehouseClient) -> i64 {
    let rows = warehouse
        .query(&format!(
            r#"SELECT COUNT(*) AS n FROM "booking_analytics"."{BOOKINGS_TABLE}""#
        ))
        .await
        .expect("count query");
    rows[0]["n"].as_i64().expect("count")
}

/// Delegates to DuckDB, but lets revenue training succeed and can fail the load.
struct ScriptedWarehouse {
    inner: DuckDbWarehouse,
    fail_load: bool,
    training_attempts: AtomicUsize,
}

impl ScriptedWarehouse {
    fn new(inner: DuckDbWarehouse) -> Self {
        Self {
            inner,
            fail_load: false,
            training_attempts: AtomicUsize::new(0),
        }
    }
}

impl WarehouseClient for ScriptedWarehouse {
    fn dialect(&self) -> SqlDialect {
        self.inner.dialect()
    }

    fn create_dataset_if_absent<'a>(
        &'a self,
        dataset: &'a DatasetRef,
    ) -> BoxFuture<'a, Result<Provisioned, WarehouseError>> {
        self.inner.create_dataset_if_absent(dataset)
    }

    fn create_table_if_absent<'a>(
        &'a self,
        table: &'a TableRef,
        schema: &'a TableSchema,
    ) -> BoxFuture<'a, Result<Provisioned, WarehouseError>> {
        self.inner.create_table_if_absent(table, schema)
    }

    fn insert_rows<'a>(
        &'a self,
        table: &'a TableRef,
        rows: &'a [Row],
    ) -> BoxFuture<'a, Result<usize, WarehouseError>> {
        self.inner.insert_rows(table, rows)
    }

    fn load_table<'a>(
        &'a self,
        table: &'a TableRef,
        schema: &'a TableSchema,
        data: &'a TabularData,
    ) -> BoxFuture<'a, Result<JobHandle, WarehouseError>> {
        if self.fail_load {
            // A statement that fails yields a failed job the pipeline must notice.
            return self.inner.run_sql("SELECT * FROM table_that_does_not_exist");
        }
        self.inner.load_table(table, schema, data)
    }

    fn run_sql<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<JobHandle, WarehouseError>> {
        if sql.contains("CREATE OR REPLACE MODEL") {
            self.training_attempts.fetch_add(1, Ordering::SeqCst);
            if sql.contains("revenue_forecast_model") {
                return self.inner.run_sql("SELECT 1");
            }
        }
        self.inner.run_sql(sql)
    }

    fn job_status<'a>(
        &'a self,
        job: &'a JobHandle,
    ) -> BoxFuture<'a, Result<JobStatus, WarehouseError>> {
        self.inner.job_status(job)
    }

    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, WarehouseError>> {
        self.inner.query(sql)
    }

    fn model_info<'a>(
        &'a self,
        model: &'a ModelRef,
    ) -> BoxFuture<'a, Result<Option<ModelInfo>, WarehouseError>> {
        self.inner.model_info(model)
    }
}

// =============================================================================
// Migration: Happy Path
// =============================================================================

#[tokio::test]
async fn when_bookings_are_migrated_daily_aggregates_sum_to_the_export() {
    // Given: Ten bookings worth 10,000 spread over three days
    let temp = tempdir().expect("tempdir");
    let warehouse = local_warehouse(&temp);
    let source = InMemoryBookingSource::new(ten_bookings());

    // When: The migration runs
    let pipeline = MigrationPipeline::new(&warehouse, &source, local_statements(), fast_poll());
    let report = pipeline.run(now()).await;

    // Then: Every non-ML step completed and the local backend reported training failures
    assert_eq!(report.exported_rows, 10);
    assert_eq!(
        report.status,
        MigrationStatus::CompletedWithTrainingFailures {
            failed: vec![
                String::from("booking_forecast_model"),
                String::from("revenue_forecast_model"),
            ],
        }
    );
    assert_eq!(report.last_completed_step(), Some(MigrationStep::Done));

    // And: daily_bookings has one row per booking day with matching totals
    let layer = ForecastLayer::new(&warehouse, local_statements());
    let days = layer.get_daily_trends(30).await.expect("trends");
    assert_eq!(days.len(), 3);
    assert_eq!(days.iter().map(|day| day.total_bookings).sum::<i64>(), 10);
    let revenue = days.iter().map(|day| day.total_revenue).sum::<f64>();
    assert!((revenue - 10_000.0).abs() < 1e-6);
    assert_eq!(days[0].total_bookings, 4, "newest day first");
    assert_eq!(days[0].completed_bookings, Some(0));

    // And: booking_details has one categorized row per booking
    let details = layer.get_booking_details(50).await.expect("details");
    assert_eq!(details.len(), 10);
    assert!(details.iter().all(|detail| detail.day_of_week >= 1 && detail.day_of_week <= 7));
}

#[tokio::test]
async fn when_migration_runs_twice_the_base_table_is_replaced_not_appended() {
    // Given: A warehouse that has already been migrated once
    let temp = tempdir().expect("tempdir");
    let warehouse = local_warehouse(&temp);
    let source = InMemoryBookingSource::new(ten_bookings());
    let pipeline = MigrationPipeline::new(&warehouse, &source, local_statements(), fast_poll());
    pipeline.run(now()).await;

    // When: The migration runs again
    let report = pipeline.run(now()).await;

    // Then: Schema creation is a no-op and the table still holds ten bookings
    let ensure = report
        .steps
        .iter()
        .find(|step| step.step == MigrationStep::EnsureSchema)
        .expect("ensure_schema step");
    assert!(ensure.detail.contains("already exists"), "{}", ensure.detail);
    assert_eq!(bookings_count(&warehouse).await, 10);
}

#[tokio::test]
async fn when_an_export_path_is_set_the_window_is_written_as_csv() {
    // Given: An export path inside a temp directory
    let temp = tempdir().expect("tempdir");
    let warehouse = local_warehouse(&temp);
    let source = InMemoryBookingSource::new(ten_bookings());
    let export_path = temp.path().join("bookings_export.csv");

    // When: The migration runs with the export file enabled
    let report = MigrationPipeline::new(&warehouse, &source, local_statements(), fast_poll())
        .with_export_path(Some(export_path.clone()))
        .run(now())
        .await;

    // Then: The file has a header plus one line per booking
    assert_eq!(report.export_path.as_deref(), Some(export_path.as_path()));
    let content = std::fs::read_to_string(&export_path).expect("export written");
    let lines = content.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 11);
    assert!(lines[0].starts_with("booking_id,destination,pickup_point,date_of_tour"));

    // And: The export reads back as the same bookings
    let reread = InMemoryBookingSource::from_csv_path(&export_path).expect("reread export");
    assert_eq!(reread.records().len(), 10);
    assert_eq!(reread.records()[0].total_cost, 1_000.0);
}

#[tokio::test]
async fn when_history_is_thin_the_export_step_carries_warnings() {
    // Given: Ten bookings, far below the default readiness thresholds
    let temp = tempdir().expect("tempdir");
    let warehouse = local_warehouse(&temp);
    let source = InMemoryBookingSource::new(ten_bookings());

    // When: The migration runs
    let report = MigrationPipeline::new(&warehouse, &source, local_statements(), fast_poll())
        .run(now())
        .await;

    // Then: The export step explains why forecasts may be poor
    let export = &report.steps[0];
    assert_eq!(export.step, MigrationStep::Export);
    assert_eq!(export.warnings.len(), 2);
    assert!(export.warnings[0].contains("only 10 bookings"));
}

#[tokio::test]
async fn when_bookings_sit_on_bucket_edges_details_categorize_them_inclusively() {
    // Given: Bookings whose length and price sit on either side of each bucket edge
    let temp = tempdir().expect("tempdir");
    let warehouse = local_warehouse(&temp);
    let edges = [(1, 5_000.0), (2, 5_000.01), (3, 15_000.0), (7, 15_001.0), (8, 0.0)];
    let records = edges
        .iter()
        .enumerate()
        .map(|(index, &(days, price))| {
            let mut record = booking(index as i64 + 1, 2, price);
            record.number_of_days = days;
            record
        })
        .collect::<Vec<_>>();
    let source = InMemoryBookingSource::new(records);

    // When: The migration rebuilds booking_details
    MigrationPipeline::new(&warehouse, &source, local_statements(), fast_poll())
        .run(now())
        .await;

    // Then: Each upper bound belongs to its own bucket
    let layer = ForecastLayer::new(&warehouse, local_statements());
    let mut details = layer.get_booking_details(10).await.expect("details");
    details.sort_by_key(|detail| detail.booking_id);
    let buckets = details
        .iter()
        .map(|detail| (detail.trip_duration_category, detail.price_category))
        .collect::<Vec<_>>();
    assert_eq!(
        buckets,
        vec![
            (TripDuration::DayTrip, PriceCategory::Low),
            (TripDuration::ShortTrip, PriceCategory::Medium),
            (TripDuration::ShortTrip, PriceCategory::Medium),
            (TripDuration::WeekTrip, PriceCategory::High),
            (TripDuration::LongTrip, PriceCategory::Low),
        ]
    );
}

#[tokio::test]
async fn when_statuses_are_unlisted_or_missing_the_rows_still_migrate() {
    // Given: Bookings with a status the aggregates do not count and no payment status
    let temp = tempdir().expect("tempdir");
    let warehouse = local_warehouse(&temp);
    let mut records = ten_bookings();
    records[0].status = String::from("Rejected");
    records[0].payment_status = Some(String::from("Awaiting Verification"));
    records[1].payment_status = None;
    records[2].status = String::from("Canceled");
    let source = InMemoryBookingSource::new(records);

    // When: The migration runs
    let report = MigrationPipeline::new(&warehouse, &source, local_statements(), fast_poll())
        .run(now())
        .await;

    // Then: Every booking reached the warehouse and cancellations are counted
    assert_eq!(report.last_completed_step(), Some(MigrationStep::Done));
    assert_eq!(bookings_count(&warehouse).await, 10);
    let stored = warehouse
        .query(&format!(
            r#"SELECT status, payment_status FROM "booking_analytics"."{BOOKINGS_TABLE}" WHERE booking_id IN (1, 2) ORDER BY booking_id"#
        ))
        .await
        .expect("statuses");
    assert_eq!(stored[0]["status"], "Rejected");
    assert_eq!(stored[0]["payment_status"], "Awaiting Verification");
    assert!(stored[1]["payment_status"].is_null());
    let days = ForecastLayer::new(&warehouse, local_statements())
        .get_daily_trends(30)
        .await
        .expect("trends");
    assert_eq!(days.iter().filter_map(|day| day.canceled_bookings).sum::<i64>(), 1);
}

// =============================================================================
// Migration: Partial and Failed Runs
// =============================================================================

#[tokio::test]
async fn when_one_model_fails_to_train_the_other_is_still_trained() {
    // Given: A warehouse where only the revenue model can train
    let temp = tempdir().expect("tempdir");
    let warehouse = ScriptedWarehouse::new(local_warehouse(&temp));
    let source = InMemoryBookingSource::new(ten_bookings());

    // When: The migration runs
    let report = MigrationPipeline::new(&warehouse, &source, local_statements(), fast_poll())
        .run(now())
        .await;

    // Then: Both models were attempted and only the booking model is reported failed
    assert_eq!(warehouse.training_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(
        report.status,
        MigrationStatus::CompletedWithTrainingFailures {
            failed: vec![String::from("booking_forecast_model")],
        }
    );
    assert!(!report.models[0].trained);
    assert!(report.models[0]
        .error
        .as_deref()
        .is_some_and(|error| error.contains("BigQuery ML")));
    assert!(report.models[1].trained);
}

#[tokio::test]
async fn when_the_load_job_fails_later_steps_do_not_run() {
    // Given: A warehouse whose load jobs fail
    let temp = tempdir().expect("tempdir");
    let mut warehouse = ScriptedWarehouse::new(local_warehouse(&temp));
    warehouse.fail_load = true;
    let source = InMemoryBookingSource::new(ten_bookings());

    // When: The migration runs
    let report = MigrationPipeline::new(&warehouse, &source, local_statements(), fast_poll())
        .run(now())
        .await;

    // Then: The report names the failed step and nothing was trained
    match &report.status {
        MigrationStatus::Failed { step, message } => {
            assert_eq!(*step, MigrationStep::LoadBase);
            assert!(message.contains("failed"), "{message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.last_completed_step(), Some(MigrationStep::EnsureSchema));
    assert!(report.models.is_empty());
    assert_eq!(warehouse.training_attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn when_no_bookings_fall_in_the_window_nothing_is_touched() {
    // Given: A store whose only booking is two years old
    let temp = tempdir().expect("tempdir");
    let warehouse = local_warehouse(&temp);
    let source = InMemoryBookingSource::new(vec![booking(1, 730, 2_000.0)]);
    let export_path = temp.path().join("bookings_export.csv");

    // When: The migration runs
    let report = MigrationPipeline::new(&warehouse, &source, local_statements(), fast_poll())
        .with_export_path(Some(export_path.clone()))
        .run(now())
        .await;

    // Then: It ends with no data, no steps, and no export file
    assert_eq!(report.status, MigrationStatus::NoData);
    assert!(report.steps.is_empty());
    assert_eq!(report.exported_rows, 0);
    assert!(!export_path.exists());
}

// =============================================================================
// Single-Booking Sync
// =============================================================================

#[tokio::test]
async fn when_a_booking_is_synced_it_is_appended_to_the_base_table() {
    // Given: A migrated warehouse and a source with one more booking
    let temp = tempdir().expect("tempdir");
    let warehouse = local_warehouse(&temp);
    let mut records = ten_bookings();
    MigrationPipeline::new(
        &warehouse,
        &InMemoryBookingSource::new(records.clone()),
        local_statements(),
        fast_poll(),
    )
    .run(now())
    .await;
    records.push(booking(11, 1, 4_500.0));
    let source = InMemoryBookingSource::new(records);

    // When: The new booking is synced
    let inserted = sync_booking(&warehouse, &source, &local_statements(), 11)
        .await
        .expect("sync");

    // Then: Exactly one row was added
    assert_eq!(inserted, 1);
    assert_eq!(bookings_count(&warehouse).await, 11);
}

#[tokio::test]
async fn when_an_unknown_booking_is_synced_nothing_is_inserted() {
    // Given: A provisioned warehouse
    let temp = tempdir().expect("tempdir");
    let warehouse = local_warehouse(&temp);
    let source = InMemoryBookingSource::new(ten_bookings());
    MigrationPipeline::new(&warehouse, &source, local_statements(), fast_poll())
        .run(now())
        .await;

    // When: A booking id the store does not know is synced
    let error = sync_booking(&warehouse, &source, &local_statements(), 999)
        .await
        .expect_err("unknown booking");

    // Then: The error names the booking
    assert!(matches!(error, PipelineError::BookingNotFound { booking_id: 999 }));
    assert_eq!(bookings_count(&warehouse).await, 10);
}
