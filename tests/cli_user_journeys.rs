//! Behavior-driven tests for CLI user journeys
//!
//! These run the `bookcast` binary against a local DuckDB warehouse in a temp
//! directory and check what the user sees: the JSON envelope on stdout and the
//! process exit code.

use std::path::Path;
use std::process::{Command, Output};

use bookcast_core::{tabular_from_records, BookingRecord};
use bookcast_warehouse::{DuckDbWarehouse, LocalWarehouseConfig, WarehouseClient};
use chrono::{Duration, NaiveTime, Utc};
use serde_json::Value;
use tempfile::{tempdir, TempDir};

// =============================================================================
// Fixtures
// =============================================================================

const CONFIG_VARS: [&str; 9] = [
    "BOOKCAST_ENABLED",
    "GOOGLE_CLOUD_PROJECT_ID",
    "BOOKCAST_DATASET",
    "BOOKCAST_CREDENTIALS",
    "BOOKCAST_LOCATION",
    "DATABASE_URL",
    "BOOKCAST_ACCESS_TOKEN",
    "BOOKCAST_EXPORT_PATH",
    "BOOKCAST_LOCAL_DB",
];

fn local_db(temp: &TempDir) -> std::path::PathBuf {
    temp.path().join("analytics.duckdb")
}

/// Run `bookcast --backend local` inside `temp` with no ambient configuration.
fn bookcast(temp: &TempDir, args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_bookcast"));
    command
        .current_dir(temp.path())
        .arg("--backend")
        .arg("local")
        .arg("--local-db")
        .arg(local_db(temp))
        .args(args)
        .env("RUST_LOG", "warn");
    for key in CONFIG_VARS {
        command.env_remove(key);
    }
    command.output().expect("bookcast runs")
}

fn envelope(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|error| {
        panic!(
            "stdout is not an envelope ({error}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

fn warnings(envelope: &Value) -> Vec<String> {
    envelope["meta"]["warnings"]
        .as_array()
        .map(|warnings| {
            warnings
                .iter()
                .filter_map(|warning| warning.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// A booking made `days_ago` days before today, worth 2,000.
fn booking(booking_id: i64, days_ago: i64) -> BookingRecord {
    let booked_on = Utc::now().date_naive() - Duration::days(days_ago);
    let booked_at = booked_on.and_time(NaiveTime::from_hms_opt(10, 30, 0).expect("time"));
    BookingRecord {
        booking_id,
        destination: String::from("Tagaytay"),
        pickup_point: String::from("Quezon City"),
        date_of_tour: booked_on + Duration::days(7),
        end_of_tour: None,
        number_of_days: 1,
        number_of_buses: 2,
        balance: 0.0,
        status: String::from("Completed"),
        payment_status: Some(String::from("Paid")),
        user_id: Some(8),
        booked_at,
        pickup_time: None,
        confirmed_at: None,
        payment_deadline: None,
        completed_at: None,
        created_by: None,
        total_cost: 2_000.0,
        base_rate: 2_000.0,
        total_distance: 60.0,
        diesel_price: 61.5,
        diesel_cost: 0.0,
        base_cost: 2_000.0,
        discount: 0.0,
        discount_type: String::from("percentage"),
        discount_amount: 0.0,
        gross_price: 2_000.0,
    }
}

fn write_source_csv(path: &Path) {
    let records = (1..=6).map(|id| booking(id, id * 3)).collect::<Vec<_>>();
    tabular_from_records(&records)
        .expect("table")
        .write_csv(path)
        .expect("source csv written");
}

// =============================================================================
// CLI User Journey: Setup
// =============================================================================

#[test]
fn user_can_provision_a_local_warehouse_with_sample_data() {
    // Given: An empty temp directory
    let temp = tempdir().expect("tempdir");

    // When: They run setup with sample data
    let output = bookcast(&temp, &["setup", "--sample-data"]);

    // Then: It succeeds with a setup envelope
    assert_eq!(output.status.code(), Some(0), "{}", String::from_utf8_lossy(&output.stderr));
    let envelope = envelope(&output);
    assert_eq!(envelope["meta"]["command"], "setup");
    assert_eq!(envelope["meta"]["backend"], "local");
    assert_eq!(envelope["meta"]["schema_version"], "v1.0.0");
    assert!(envelope.get("errors").is_none());

    // And: Every table was created and both sample tables were seeded
    assert_eq!(envelope["data"]["dataset"], "created");
    assert_eq!(envelope["data"]["tables"].as_array().map(Vec::len), Some(3));
    assert_eq!(envelope["data"]["sample_daily_rows"], 20);
    assert_eq!(envelope["data"]["sample_detail_rows"], 15);
}

#[test]
fn user_is_told_when_setup_training_fails_and_strict_mode_fails_the_run() {
    // Given: The local backend, which cannot train models
    let temp = tempdir().expect("tempdir");

    // When: They seed and train in strict mode
    let output = bookcast(&temp, &["--strict", "setup", "--sample-data", "--train"]);

    // Then: The envelope still reports the seeded rows and both training failures
    let envelope = envelope(&output);
    assert_eq!(envelope["data"]["sample_daily_rows"], 20);
    let models = envelope["data"]["models"].as_array().expect("models");
    assert_eq!(models.len(), 2);
    assert!(models.iter().all(|model| model["trained"] == false));
    let warnings = warnings(&envelope);
    assert!(warnings
        .iter()
        .any(|warning| warning.starts_with("training booking_forecast_model failed")));

    // And: Strict mode turns those warnings into exit code 5
    assert_eq!(output.status.code(), Some(5));
}

// =============================================================================
// CLI User Journey: Migration
// =============================================================================

#[test]
fn user_can_migrate_a_csv_export_into_the_local_warehouse() {
    // Given: A CSV export with six recent bookings
    let temp = tempdir().expect("tempdir");
    let source = temp.path().join("source.csv");
    write_source_csv(&source);

    // When: They migrate it without writing an export file
    let source = source.to_str().expect("utf-8 path");
    let output = bookcast(&temp, &["--source-csv", source, "migrate", "--no-export-file"]);

    // Then: Every non-ML step ran and the run still exits 0
    assert_eq!(output.status.code(), Some(0), "{}", String::from_utf8_lossy(&output.stderr));
    let envelope = envelope(&output);
    assert_eq!(envelope["meta"]["command"], "migrate");
    assert_eq!(envelope["data"]["status"], "completed_with_training_failures");
    assert_eq!(envelope["data"]["exported_rows"], 6);
    let steps = envelope["data"]["steps"]
        .as_array()
        .expect("steps")
        .iter()
        .filter_map(|step| step["step"].as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        steps,
        [
            "export",
            "ensure_schema",
            "load_base",
            "build_aggregates",
            "build_details",
            "train_models",
            "done",
        ]
    );
    assert!(envelope.get("errors").is_none());

    // And: Thin history and failed training surface as warnings
    let warnings = warnings(&envelope);
    assert!(warnings.iter().any(|warning| warning.contains("only 6 bookings")));
    assert!(warnings
        .iter()
        .any(|warning| warning.starts_with("training revenue_forecast_model failed")));
    assert!(!temp.path().join("bookings_export.csv").exists());
}

#[test]
fn user_sees_export_exit_code_when_the_source_cannot_be_read() {
    // Given: A source path that does not exist
    let temp = tempdir().expect("tempdir");

    // When: They migrate from it
    let output = bookcast(&temp, &["--source-csv", "missing.csv", "migrate"]);

    // Then: The export step is named as the failure and the exit code is 11
    assert_eq!(output.status.code(), Some(11));
    let envelope = envelope(&output);
    assert_eq!(envelope["data"]["status"], "failed");
    assert_eq!(envelope["data"]["step"], "export");
    assert_eq!(envelope["errors"][0]["code"], "migration.export");
    assert!(envelope["errors"][0]["message"]
        .as_str()
        .is_some_and(|message| message.contains("missing.csv")));
}

#[tokio::test]
async fn user_sees_which_step_failed_when_a_derived_table_cannot_be_rebuilt() {
    // Given: A warehouse where daily_bookings is a view the migration cannot replace
    let temp = tempdir().expect("tempdir");
    {
        let warehouse = DuckDbWarehouse::open(LocalWarehouseConfig::at(local_db(&temp)))
            .expect("warehouse open");
        for sql in [
            "CREATE SCHEMA booking_analytics",
            "CREATE VIEW booking_analytics.daily_bookings AS SELECT 1 AS total_bookings",
        ] {
            let job = warehouse.run_sql(sql).await.expect("submit");
            let status = warehouse.job_status(&job).await.expect("status");
            assert_eq!(status.error, None, "{sql}");
        }
    }
    let source = temp.path().join("source.csv");
    write_source_csv(&source);

    // When: They migrate
    let source = source.to_str().expect("utf-8 path");
    let output = bookcast(&temp, &["--source-csv", source, "migrate", "--no-export-file"]);

    // Then: The aggregate step is reported with its own exit code
    assert_eq!(output.status.code(), Some(14));
    let envelope = envelope(&output);
    assert_eq!(envelope["data"]["status"], "failed");
    assert_eq!(envelope["data"]["step"], "build_aggregates");
    assert_eq!(envelope["errors"][0]["code"], "migration.build_aggregates");

    // And: The steps before it completed and nothing was trained
    assert_eq!(envelope["data"]["steps"].as_array().map(Vec::len), Some(3));
    assert_eq!(envelope["data"]["models"].as_array().map(Vec::len), Some(0));
}
