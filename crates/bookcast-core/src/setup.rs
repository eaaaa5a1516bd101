//! Provision an empty dataset for the dashboards, optionally with sample data
//! and models trained on it.
//!
//! This path creates `daily_bookings` with `cancelled_bookings` and
//! `confirmed_bookings`, unlike the migration which rebuilds it with
//! `canceled_bookings` and `completed_bookings`. Readers accept both.
//! `booking_details` is created in its reduced form (no booking date or
//! calendar parts), so detail reads need a migration first.

use bookcast_warehouse::{
    PollPolicy, Provisioned, Row, TableRef, TableSchema, WarehouseClient, WarehouseError,
};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::domain::{PriceCategory, TripDuration};
use crate::pipeline::{train_forecast_models, ModelTrainingReport};
use crate::statements::{bookings_schema, seeded_daily_schema, seeded_details_schema, Statements};

/// Bookings per day of the sample window starting 2024-01-01.
const SAMPLE_DAILY_BOOKINGS: [i64; 20] = [
    5, 8, 3, 12, 7, 15, 9, 6, 11, 4, 13, 8, 16, 10, 7, 14, 9, 12, 6, 18,
];
const SAMPLE_REVENUE_PER_BOOKING: f64 = 500.0;

/// `(number_of_days, price)` of the sample bookings, ids from 1.
const SAMPLE_DETAILS: [(i64, f64); 15] = [
    (3, 500.0),
    (5, 800.0),
    (2, 300.0),
    (7, 1_200.0),
    (4, 600.0),
    (1, 150.0),
    (6, 900.0),
    (3, 450.0),
    (5, 750.0),
    (2, 250.0),
    (4, 650.0),
    (8, 1_400.0),
    (1, 200.0),
    (3, 550.0),
    (6, 950.0),
];
const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    pub sample_data: bool,
    /// Train both forecast models on whatever `daily_bookings` holds afterwards.
    pub train: bool,
    pub poll: PollPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedTable {
    pub table: String,
    pub outcome: Provisioned,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupReport {
    pub dataset: Provisioned,
    pub tables: Vec<ProvisionedTable>,
    pub sample_daily_rows: usize,
    pub sample_detail_rows: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelTrainingReport>,
}

/// Twenty consecutive days of `daily_bookings` rows, each booking worth 500.
#[must_use]
pub fn sample_daily_rows() -> Vec<Row> {
    SAMPLE_DAILY_BOOKINGS
        .iter()
        .enumerate()
        .map(|(offset, &bookings)| {
            let mut row = Row::new();
            row.insert(String::from("date"), json!(format!("2024-01-{:02}", offset + 1)));
            row.insert(String::from("total_bookings"), json!(bookings));
            row.insert(
                String::from("total_revenue"),
                json!(bookings as f64 * SAMPLE_REVENUE_PER_BOOKING),
            );
            row.insert(String::from("confirmed_bookings"), json!(bookings));
            row
        })
        .collect()
}

/// Fifteen reduced `booking_details` rows, bucketed with the migration's thresholds.
#[must_use]
pub fn sample_detail_rows() -> Vec<Row> {
    SAMPLE_DETAILS
        .iter()
        .enumerate()
        .map(|(index, &(days, price))| {
            let mut row = Row::new();
            row.insert(String::from("booking_id"), json!(index + 1));
            row.insert(String::from("number_of_days"), json!(days));
            row.insert(String::from("price"), json!(price));
            row.insert(String::from("day_of_week"), json!(WEEKDAYS[index % WEEKDAYS.len()]));
            row.insert(
                String::from("trip_duration_category"),
                json!(TripDuration::from_days(days).label()),
            );
            row.insert(
                String::from("price_category"),
                json!(PriceCategory::from_price(price).label()),
            );
            row
        })
        .collect()
}

/// Create the dataset and its three tables when absent, then optionally seed
/// them and train the forecast models.
///
/// Training failures are reported per model in [`SetupReport::models`] and do
/// not fail the setup.
///
/// # Errors
/// Propagates provisioning failures and [`WarehouseError::InsertFailed`] when
/// an existing table rejects the sample rows.
pub async fn provision(
    warehouse: &dyn WarehouseClient,
    statements: &Statements,
    options: &SetupOptions,
) -> Result<SetupReport, WarehouseError> {
    let dataset = warehouse
        .create_dataset_if_absent(statements.dataset())
        .await?;
    info!(dataset = statements.dataset().dataset(), ?dataset, "dataset ready");

    let plan: [(&TableRef, TableSchema); 3] = [
        (statements.bookings(), bookings_schema()),
        (statements.daily_bookings(), seeded_daily_schema()),
        (statements.booking_details(), seeded_details_schema()),
    ];
    let mut tables = Vec::with_capacity(plan.len());
    for (table, schema) in &plan {
        let outcome = warehouse.create_table_if_absent(table, schema).await?;
        info!(table = %table, ?outcome, "table ready");
        tables.push(ProvisionedTable {
            table: table.to_string(),
            outcome,
        });
    }

    let (sample_daily_rows, sample_detail_rows) = if options.sample_data {
        let daily = warehouse
            .insert_rows(statements.daily_bookings(), &sample_daily_rows())
            .await?;
        let details = warehouse
            .insert_rows(statements.booking_details(), &sample_detail_rows())
            .await?;
        info!(daily, details, "sample rows inserted");
        (daily, details)
    } else {
        (0, 0)
    };

    let models = if options.train {
        train_forecast_models(warehouse, &options.poll, |series| {
            statements.train_seeded_model(series)
        })
        .await
    } else {
        Vec::new()
    };

    Ok(SetupReport {
        dataset,
        tables,
        sample_daily_rows,
        sample_detail_rows,
        models,
    })
}
