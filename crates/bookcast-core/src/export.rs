//! The export step: booking window → CSV-shaped table.

use std::collections::BTreeSet;

use bookcast_warehouse::{TabularData, WarehouseError};
use chrono::{Duration, NaiveDateTime};

use crate::config::ReadinessThresholds;
use crate::domain::BookingRecord;
use crate::error::PipelineError;
use crate::source::BookingSource;

/// Trailing window of bookings that is migrated.
pub const EXPORT_WINDOW_DAYS: u32 = 365;

#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Exported {
        records: Vec<BookingRecord>,
        table: TabularData,
    },
    /// The window held no bookings. Not an error.
    NoData,
}

#[must_use]
pub fn window_start(now: NaiveDateTime, days: u32) -> NaiveDateTime {
    now - Duration::days(i64::from(days))
}

/// Read the trailing window from `source` and shape it for loading.
///
/// # Errors
/// Returns [`PipelineError`] when the source cannot be read or a record cannot be serialized.
pub async fn export_bookings(
    source: &dyn BookingSource,
    now: NaiveDateTime,
) -> Result<ExportOutcome, PipelineError> {
    let records = source.bookings_within(EXPORT_WINDOW_DAYS, now).await?;
    if records.is_empty() {
        return Ok(ExportOutcome::NoData);
    }
    let table = tabular_from_records(&records)?;
    Ok(ExportOutcome::Exported { records, table })
}

/// Serialize records through `csv` so the header is the record's field names.
///
/// # Errors
/// Returns [`WarehouseError::Csv`] if a record cannot be written.
pub fn tabular_from_records(records: &[BookingRecord]) -> Result<TabularData, WarehouseError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|error| WarehouseError::Io(error.into_error()))?;
    TabularData::from_csv_reader(bytes.as_slice())
}

/// Warnings for windows too thin to train a useful model on. Never fatal.
#[must_use]
pub fn readiness_warnings(records: &[BookingRecord], thresholds: &ReadinessThresholds) -> Vec<String> {
    let mut warnings = Vec::new();
    if records.len() < thresholds.min_bookings {
        warnings.push(format!(
            "only {} bookings in the window; forecasts need at least {}",
            records.len(),
            thresholds.min_bookings
        ));
    }
    let days = records
        .iter()
        .map(|record| record.booked_at.date())
        .collect::<BTreeSet<_>>()
        .len();
    if days < thresholds.min_data_days {
        warnings.push(format!(
            "bookings span {days} distinct days; forecasts need at least {}",
            thresholds.min_data_days
        ));
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryBookingSource;
    use chrono::NaiveDate;

    fn record(id: i64, booked_at: &str) -> BookingRecord {
        BookingRecord {
            booking_id: id,
            destination: String::from("Baguio"),
            pickup_point: String::from("Manila"),
            date_of_tour: NaiveDate::from_ymd_opt(2024, 6, 1).expect("date"),
            end_of_tour: None,
            number_of_days: 2,
            number_of_buses: 1,
            balance: 0.0,
            status: String::from("Confirmed"),
            payment_status: Some(String::from("Paid")),
            user_id: Some(4),
            booked_at: crate::domain::warehouse_timestamp::parse(booked_at).expect("timestamp"),
            pickup_time: None,
            confirmed_at: None,
            payment_deadline: None,
            completed_at: None,
            created_by: None,
            total_cost: 9_000.0,
            base_rate: 9_000.0,
            total_distance: 250.0,
            diesel_price: 61.5,
            diesel_cost: 0.0,
            base_cost: 9_000.0,
            discount: 0.0,
            discount_type: String::from("percentage"),
            discount_amount: 0.0,
            gross_price: 9_000.0,
        }
    }

    #[test]
    fn header_is_record_field_names_and_rows_match() {
        let table = tabular_from_records(&[
            record(1, "2024-05-01 08:00:00"),
            record(2, "2024-05-02 09:30:00"),
        ])
        .expect("table");

        assert_eq!(table.row_count(), 2);
        assert_eq!(table.header().len(), 27);
        assert_eq!(table.header()[0], "booking_id");
        assert_eq!(table.header()[11], "booked_at");
        assert_eq!(table.header()[26], "gross_price");
        assert_eq!(table.rows()[1][11], "2024-05-02 09:30:00");
        assert_eq!(table.rows()[0][4], "");
    }

    #[tokio::test]
    async fn empty_window_is_no_data() {
        let now = crate::domain::warehouse_timestamp::parse("2025-06-01 00:00:00").expect("now");
        let source = InMemoryBookingSource::new(vec![record(1, "2023-01-01 00:00:00")]);

        let outcome = export_bookings(&source, now).await.expect("export");

        assert_eq!(outcome, ExportOutcome::NoData);
    }

    #[test]
    fn thin_windows_produce_warnings() {
        let records = vec![record(1, "2024-05-01 08:00:00"), record(2, "2024-05-01 09:00:00")];
        let warnings = readiness_warnings(&records, &ReadinessThresholds::default());

        assert_eq!(warnings.len(), 2);
        assert!(warnings[1].contains("1 distinct days"));
    }
}
