//! SQL text for every warehouse step, rendered per dialect.
//!
//! Table and model names are validated identifiers (see [`DatasetRef`]), so
//! they are substituted directly. Numeric parameters are typed.

use bookcast_warehouse::{DatasetRef, FieldType, ModelRef, SqlDialect, TableRef, TableSchema, WarehouseError};

use crate::domain::{
    ForecastSeries, DAY_TRIP_MAX_DAYS, LOW_PRICE_MAX, MEDIUM_PRICE_MAX, SHORT_TRIP_MAX_DAYS,
    WEEK_TRIP_MAX_DAYS,
};

pub const BOOKINGS_TABLE: &str = "bookings";
pub const DAILY_BOOKINGS_TABLE: &str = "daily_bookings";
pub const BOOKING_DETAILS_TABLE: &str = "booking_details";

/// Days of history the aggregates and models look at.
pub const HISTORY_DAYS: u32 = 365;

/// Columns of the base `bookings` table, in export order.
#[must_use]
pub fn bookings_schema() -> TableSchema {
    use FieldType::{Date, Float64, Int64, String, Time, Timestamp};
    TableSchema::new(&[
        ("booking_id", Int64),
        ("destination", String),
        ("pickup_point", String),
        ("date_of_tour", Date),
        ("end_of_tour", Date),
        ("number_of_days", Int64),
        ("number_of_buses", Int64),
        ("balance", Float64),
        ("status", String),
        ("payment_status", String),
        ("user_id", Int64),
        ("booked_at", Timestamp),
        ("pickup_time", Time),
        ("confirmed_at", Timestamp),
        ("payment_deadline", Timestamp),
        ("completed_at", Timestamp),
        ("created_by", String),
        ("total_cost", Float64),
        ("base_rate", Float64),
        ("total_distance", Float64),
        ("diesel_price", Float64),
        ("diesel_cost", Float64),
        ("base_cost", Float64),
        ("discount", Float64),
        ("discount_type", String),
        ("discount_amount", Float64),
        ("gross_price", Float64),
    ])
}

/// `daily_bookings` as the seeding path creates it. The migration replaces it
/// with `canceled_bookings`/`completed_bookings` instead.
#[must_use]
pub fn seeded_daily_schema() -> TableSchema {
    TableSchema::new(&[
        ("date", FieldType::Date),
        ("total_bookings", FieldType::Int64),
        ("total_revenue", FieldType::Float64),
        ("cancelled_bookings", FieldType::Int64),
        ("confirmed_bookings", FieldType::Int64),
    ])
}

/// Reduced `booking_details` of the seeding path; `day_of_week` is text there.
#[must_use]
pub fn seeded_details_schema() -> TableSchema {
    TableSchema::new(&[
        ("booking_id", FieldType::Int64),
        ("number_of_days", FieldType::Int64),
        ("price", FieldType::Float64),
        ("day_of_week", FieldType::String),
        ("trip_duration_category", FieldType::String),
        ("price_category", FieldType::String),
    ])
}

#[derive(Debug, Clone)]
pub struct Statements {
    dialect: SqlDialect,
    dataset: DatasetRef,
    bookings: TableRef,
    daily_bookings: TableRef,
    booking_details: TableRef,
}

impl Statements {
    /// # Errors
    /// Returns [`WarehouseError::InvalidIdentifier`] if a table name cannot be formed.
    pub fn new(dialect: SqlDialect, dataset: DatasetRef) -> Result<Self, WarehouseError> {
        Ok(Self {
            bookings: dataset.table(BOOKINGS_TABLE)?,
            daily_bookings: dataset.table(DAILY_BOOKINGS_TABLE)?,
            booking_details: dataset.table(BOOKING_DETAILS_TABLE)?,
            dialect,
            dataset,
        })
    }

    #[must_use]
    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    #[must_use]
    pub fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    #[must_use]
    pub fn bookings(&self) -> &TableRef {
        &self.bookings
    }

    #[must_use]
    pub fn daily_bookings(&self) -> &TableRef {
        &self.daily_bookings
    }

    #[must_use]
    pub fn booking_details(&self) -> &TableRef {
        &self.booking_details
    }

    /// # Errors
    /// Returns [`WarehouseError::InvalidIdentifier`] for a malformed model name.
    pub fn model(&self, name: &str) -> Result<ModelRef, WarehouseError> {
        self.dataset.table(name)
    }

    fn table(&self, table: &TableRef) -> String {
        self.dialect.qualified(table)
    }

    fn ident(&self, name: &str) -> String {
        self.dialect.quote_ident(name)
    }

    fn date_of(&self, column: &str) -> String {
        match self.dialect {
            SqlDialect::BigQuery => format!("DATE({column})"),
            SqlDialect::DuckDb => format!("CAST({column} AS DATE)"),
        }
    }

    /// 1 = Sunday through 7 = Saturday on both backends.
    fn day_of_week(&self, column: &str) -> String {
        match self.dialect {
            SqlDialect::BigQuery => format!("EXTRACT(DAYOFWEEK FROM {column})"),
            SqlDialect::DuckDb => format!("(EXTRACT(DOW FROM {column}) + 1)"),
        }
    }

    fn history_start(&self) -> String {
        match self.dialect {
            SqlDialect::BigQuery => {
                format!("TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL {HISTORY_DAYS} DAY)")
            }
            SqlDialect::DuckDb => format!("(CAST(now() AS TIMESTAMP) - INTERVAL {HISTORY_DAYS} DAY)"),
        }
    }

    fn history_start_date(&self) -> String {
        match self.dialect {
            SqlDialect::BigQuery => format!("DATE_SUB(CURRENT_DATE(), INTERVAL {HISTORY_DAYS} DAY)"),
            SqlDialect::DuckDb => format!("(current_date - INTERVAL {HISTORY_DAYS} DAY)"),
        }
    }

    /// Rebuild `daily_bookings` from `bookings`, one row per booking day.
    #[must_use]
    pub fn build_daily_aggregates(&self) -> String {
        let booked_on = self.date_of("booked_at");
        format!(
            "CREATE OR REPLACE TABLE {daily} AS
SELECT
    {booked_on} AS {date},
    COUNT(*) AS total_bookings,
    SUM(COALESCE(total_cost, 0)) AS total_revenue,
    AVG(COALESCE(total_cost, 0)) AS avg_booking_value,
    COUNT(CASE WHEN status = 'Canceled' THEN 1 END) AS canceled_bookings,
    COUNT(CASE WHEN status = 'Completed' THEN 1 END) AS completed_bookings
FROM {bookings}
WHERE booked_at >= {start}
GROUP BY {booked_on}
ORDER BY {date}",
            daily = self.table(&self.daily_bookings),
            bookings = self.table(&self.bookings),
            date = self.ident("date"),
            start = self.history_start(),
        )
    }

    /// Rebuild `booking_details` with calendar parts and duration/price buckets.
    #[must_use]
    pub fn build_booking_details(&self) -> String {
        format!(
            "CREATE OR REPLACE TABLE {details} AS
SELECT
    booking_id,
    {booked_on} AS booking_date,
    destination,
    pickup_point,
    number_of_days,
    number_of_buses,
    COALESCE(total_cost, 0) AS price,
    {day_of_week} AS day_of_week,
    EXTRACT(MONTH FROM booked_at) AS {month},
    EXTRACT(YEAR FROM booked_at) AS {year},
    CASE
        WHEN number_of_days <= {DAY_TRIP_MAX_DAYS} THEN 'Day Trip'
        WHEN number_of_days <= {SHORT_TRIP_MAX_DAYS} THEN 'Short Trip'
        WHEN number_of_days <= {WEEK_TRIP_MAX_DAYS} THEN 'Week Trip'
        ELSE 'Long Trip'
    END AS trip_duration_category,
    CASE
        WHEN COALESCE(total_cost, 0) <= {LOW_PRICE_MAX} THEN 'Low Price'
        WHEN COALESCE(total_cost, 0) <= {MEDIUM_PRICE_MAX} THEN 'Medium Price'
        ELSE 'High Price'
    END AS price_category
FROM {bookings}
WHERE booked_at >= {start}",
            details = self.table(&self.booking_details),
            bookings = self.table(&self.bookings),
            booked_on = self.date_of("booked_at"),
            day_of_week = self.day_of_week("booked_at"),
            month = self.ident("month"),
            year = self.ident("year"),
            start = self.history_start(),
        )
    }

    /// ARIMA_PLUS training over the last year of `daily_bookings`.
    ///
    /// # Errors
    /// Returns [`WarehouseError::InvalidIdentifier`] if the model name is rejected.
    pub fn train_model(&self, series: ForecastSeries) -> Result<String, WarehouseError> {
        let filter = format!("{} >= {}", self.ident("date"), self.history_start_date());
        self.training(series, Some(filter))
    }

    /// ARIMA_PLUS training over every row of a seeded `daily_bookings`. Sample
    /// days sit outside the history window, so there is no date filter; revenue
    /// skips days without revenue.
    ///
    /// # Errors
    /// Returns [`WarehouseError::InvalidIdentifier`] if the model name is rejected.
    pub fn train_seeded_model(&self, series: ForecastSeries) -> Result<String, WarehouseError> {
        let filter = match series {
            ForecastSeries::Bookings => None,
            ForecastSeries::Revenue => Some(format!("{} > 0", series.data_column())),
        };
        self.training(series, filter)
    }

    fn training(&self, series: ForecastSeries, filter: Option<String>) -> Result<String, WarehouseError> {
        let model = self.model(series.model_name())?;
        let column = series.data_column();
        let date = self.ident("date");
        let filter = filter.map(|filter| format!("\nWHERE {filter}")).unwrap_or_default();
        Ok(format!(
            "CREATE OR REPLACE MODEL {model}
OPTIONS(
    model_type = 'ARIMA_PLUS',
    time_series_timestamp_col = 'date',
    time_series_data_col = '{column}',
    auto_arima = TRUE,
    data_frequency = 'AUTO_FREQUENCY',
    decompose_time_series = TRUE
) AS
SELECT {date}, {column}
FROM {daily}{filter}
ORDER BY {date} ASC",
            model = self.table(&model),
            daily = self.table(&self.daily_bookings),
        ))
    }

    /// Forecast rows ordered by date; the caller validates the parameters.
    ///
    /// # Errors
    /// Returns [`WarehouseError::InvalidIdentifier`] if the model name is rejected.
    pub fn forecast(
        &self,
        series: ForecastSeries,
        horizon_days: u32,
        confidence_level: f64,
    ) -> Result<String, WarehouseError> {
        let model = self.model(series.model_name())?;
        Ok(format!(
            "SELECT
    forecast_timestamp AS {date},
    forecast_value AS {value},
    standard_error,
    confidence_level,
    prediction_interval_lower_bound AS lower_bound,
    prediction_interval_upper_bound AS upper_bound
FROM ML.FORECAST(
    MODEL {model},
    STRUCT({horizon_days} AS horizon, {confidence_level} AS confidence_level)
)
ORDER BY forecast_timestamp ASC",
            date = self.ident("date"),
            value = series.value_alias(),
            model = self.table(&model),
        ))
    }

    /// # Errors
    /// Returns [`WarehouseError::InvalidIdentifier`] if `model_name` is not a plain identifier.
    pub fn evaluate(&self, model_name: &str) -> Result<String, WarehouseError> {
        let model = self.model(model_name)?;
        Ok(format!(
            "SELECT *\nFROM ML.EVALUATE(MODEL {})",
            self.table(&model)
        ))
    }

    /// Most recent days first.
    #[must_use]
    pub fn daily_trends(&self, limit: u32) -> String {
        format!(
            "SELECT *\nFROM {}\nORDER BY {} DESC\nLIMIT {limit}",
            self.table(&self.daily_bookings),
            self.ident("date"),
        )
    }

    /// Most recent bookings first.
    #[must_use]
    pub fn recent_booking_details(&self, limit: u32) -> String {
        format!(
            "SELECT *\nFROM {}\nORDER BY booking_date DESC, booking_id DESC\nLIMIT {limit}",
            self.table(&self.booking_details),
        )
    }
}
