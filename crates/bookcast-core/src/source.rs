//! Read-only access to the relational store that owns the bookings.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use bookcast_warehouse::BoxFuture;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row as _;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::BookingRecord;
use crate::export::window_start;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to read booking export: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to open booking export {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Where migration reads bookings from.
pub trait BookingSource: Send + Sync {
    /// Bookings from the trailing `days` days, oldest first.
    ///
    /// `now` anchors the window for sources without a clock of their own. The
    /// MySQL source ignores it and measures from the server's `NOW()`, the same
    /// clock its `DATETIME` columns were written with.
    fn bookings_within<'a>(
        &'a self,
        days: u32,
        now: NaiveDateTime,
    ) -> BoxFuture<'a, Result<Vec<BookingRecord>, SourceError>>;

    fn booking_count<'a>(&'a self) -> BoxFuture<'a, Result<u64, SourceError>>;

    fn booking_by_id<'a>(
        &'a self,
        booking_id: i64,
    ) -> BoxFuture<'a, Result<Option<BookingRecord>, SourceError>>;
}

// Numeric casts keep decoding independent of DECIMAL/INT UNSIGNED column types.
const BOOKING_COLUMNS: &str = "
    CAST(b.booking_id AS SIGNED) AS booking_id,
    CAST(b.destination AS CHAR) AS destination,
    CAST(b.pickup_point AS CHAR) AS pickup_point,
    b.date_of_tour,
    b.end_of_tour,
    CAST(b.number_of_days AS SIGNED) AS number_of_days,
    CAST(b.number_of_buses AS SIGNED) AS number_of_buses,
    CAST(COALESCE(b.balance, 0) AS DOUBLE) AS balance,
    CAST(b.status AS CHAR) AS status,
    CAST(b.payment_status AS CHAR) AS payment_status,
    CAST(b.user_id AS SIGNED) AS user_id,
    CAST(b.booked_at AS DATETIME) AS booked_at,
    b.pickup_time,
    CAST(b.confirmed_at AS DATETIME) AS confirmed_at,
    CAST(b.payment_deadline AS DATETIME) AS payment_deadline,
    CAST(b.completed_at AS DATETIME) AS completed_at,
    CAST(b.created_by AS CHAR) AS created_by,
    CAST(COALESCE(bc.total_cost, 0) AS DOUBLE) AS total_cost,
    CAST(COALESCE(bc.base_rate, 0) AS DOUBLE) AS base_rate,
    CAST(COALESCE(bc.total_distance, 0) AS DOUBLE) AS total_distance,
    CAST(COALESCE(bc.diesel_price, 0) AS DOUBLE) AS diesel_price,
    CAST(COALESCE(bc.diesel_cost, 0) AS DOUBLE) AS diesel_cost,
    CAST(COALESCE(bc.base_cost, 0) AS DOUBLE) AS base_cost,
    CAST(COALESCE(bc.discount, 0) AS DOUBLE) AS discount,
    CAST(COALESCE(bc.discount_type, 'percentage') AS CHAR) AS discount_type,
    CAST(COALESCE(bc.discount_amount, 0) AS DOUBLE) AS discount_amount,
    CAST(COALESCE(bc.gross_price, 0) AS DOUBLE) AS gross_price";

pub struct MySqlBookingSource {
    pool: MySqlPool,
}

impl MySqlBookingSource {
    /// # Errors
    /// Returns [`SourceError::Database`] when the pool cannot connect.
    pub async fn connect(database_url: &str) -> Result<Self, SourceError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;
        info!("connected to source database");
        Ok(Self { pool })
    }

    async fn fetch_within(&self, days: u32) -> Result<Vec<BookingRecord>, SourceError> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS}
             FROM bookings b
             LEFT JOIN booking_costs bc ON b.booking_id = bc.booking_id
             WHERE b.booked_at >= DATE_SUB(NOW(), INTERVAL ? DAY)
             ORDER BY b.booked_at"
        );
        debug!(days, "exporting bookings");
        let rows = sqlx::query(&sql).bind(days).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn fetch_count(&self) -> Result<u64, SourceError> {
        let count: i64 = sqlx::query_scalar("SELECT CAST(COUNT(*) AS SIGNED) FROM bookings")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn fetch_one(&self, booking_id: i64) -> Result<Option<BookingRecord>, SourceError> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS}
             FROM bookings b
             LEFT JOIN booking_costs bc ON b.booking_id = bc.booking_id
             WHERE b.booking_id = ?"
        );
        let row = sqlx::query(&sql)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }
}

impl BookingSource for MySqlBookingSource {
    fn bookings_within<'a>(
        &'a self,
        days: u32,
        _now: NaiveDateTime,
    ) -> BoxFuture<'a, Result<Vec<BookingRecord>, SourceError>> {
        Box::pin(self.fetch_within(days))
    }

    fn booking_count<'a>(&'a self) -> BoxFuture<'a, Result<u64, SourceError>> {
        Box::pin(self.fetch_count())
    }

    fn booking_by_id<'a>(
        &'a self,
        booking_id: i64,
    ) -> BoxFuture<'a, Result<Option<BookingRecord>, SourceError>> {
        Box::pin(self.fetch_one(booking_id))
    }
}

fn record_from_row(row: &MySqlRow) -> Result<BookingRecord, SourceError> {
    let status: Option<String> = row.try_get("status")?;

    Ok(BookingRecord {
        booking_id: row.try_get("booking_id")?,
        destination: row.try_get("destination")?,
        pickup_point: row.try_get("pickup_point")?,
        date_of_tour: row.try_get::<NaiveDate, _>("date_of_tour")?,
        end_of_tour: row.try_get::<Option<NaiveDate>, _>("end_of_tour")?,
        number_of_days: row.try_get("number_of_days")?,
        number_of_buses: row.try_get("number_of_buses")?,
        balance: row.try_get("balance")?,
        status: status.unwrap_or_default(),
        payment_status: row
            .try_get::<Option<String>, _>("payment_status")?
            .filter(|value| !value.is_empty()),
        user_id: row.try_get("user_id")?,
        booked_at: row.try_get::<NaiveDateTime, _>("booked_at")?,
        pickup_time: row.try_get::<Option<NaiveTime>, _>("pickup_time")?,
        confirmed_at: row.try_get("confirmed_at")?,
        payment_deadline: row.try_get("payment_deadline")?,
        completed_at: row.try_get("completed_at")?,
        created_by: row.try_get("created_by")?,
        total_cost: row.try_get("total_cost")?,
        base_rate: row.try_get("base_rate")?,
        total_distance: row.try_get("total_distance")?,
        diesel_price: row.try_get("diesel_price")?,
        diesel_cost: row.try_get("diesel_cost")?,
        base_cost: row.try_get("base_cost")?,
        discount: row.try_get("discount")?,
        discount_type: row.try_get("discount_type")?,
        discount_amount: row.try_get("discount_amount")?,
        gross_price: row.try_get("gross_price")?,
    })
}

/// Bookings held in memory, typically read back from an earlier CSV export.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBookingSource {
    records: Vec<BookingRecord>,
}

impl InMemoryBookingSource {
    #[must_use]
    pub fn new(records: Vec<BookingRecord>) -> Self {
        Self { records }
    }

    /// # Errors
    /// Returns [`SourceError::Io`] or [`SourceError::Csv`] when the export is unreadable.
    pub fn from_csv_path(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_csv_reader(file)
    }

    /// # Errors
    /// Returns [`SourceError::Csv`] for malformed rows.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, SourceError> {
        let mut reader = csv::Reader::from_reader(reader);
        let records = reader
            .deserialize::<BookingRecord>()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(records))
    }

    #[must_use]
    pub fn records(&self) -> &[BookingRecord] {
        &self.records
    }
}

impl BookingSource for InMemoryBookingSource {
    fn bookings_within<'a>(
        &'a self,
        days: u32,
        now: NaiveDateTime,
    ) -> BoxFuture<'a, Result<Vec<BookingRecord>, SourceError>> {
        Box::pin(async move {
            let since = window_start(now, days);
            let mut selected = self
                .records
                .iter()
                .filter(|record| record.booked_at >= since)
                .cloned()
                .collect::<Vec<_>>();
            selected.sort_by_key(|record| record.booked_at);
            Ok(selected)
        })
    }

    fn booking_count<'a>(&'a self) -> BoxFuture<'a, Result<u64, SourceError>> {
        Box::pin(async move { Ok(self.records.len() as u64) })
    }

    fn booking_by_id<'a>(
        &'a self,
        booking_id: i64,
    ) -> BoxFuture<'a, Result<Option<BookingRecord>, SourceError>> {
        Box::pin(async move {
            Ok(self
                .records
                .iter()
                .find(|record| record.booking_id == booking_id)
                .cloned())
        })
    }
}
