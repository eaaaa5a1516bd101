//! # Forecast Query Layer
//!
//! Templated reads against the trained models and the derived tables, shaped
//! into domain records for reports.

use bookcast_warehouse::{Row, WarehouseClient};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::domain::{
    BookingDetail, DailyAggregate, ForecastPoint, ForecastSeries, ModelPerformance, ModelStatus,
};
use crate::error::{AnalyticsError, ValidationError};
use crate::statements::Statements;

pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;
pub const DEFAULT_TREND_LIMIT: u32 = 10;

const FORECAST_MODEL_TYPE: &str = "ARIMA_PLUS";

pub struct ForecastLayer<'a> {
    warehouse: &'a dyn WarehouseClient,
    statements: Statements,
}

impl<'a> ForecastLayer<'a> {
    #[must_use]
    pub fn new(warehouse: &'a dyn WarehouseClient, statements: Statements) -> Self {
        Self {
            warehouse,
            statements,
        }
    }

    #[must_use]
    pub fn statements(&self) -> &Statements {
        &self.statements
    }

    /// Predicted days for `series`, ascending by date.
    ///
    /// # Errors
    /// Returns [`ValidationError`] for a zero horizon or a confidence outside
    /// (0, 1), and warehouse or row-shape errors from the query.
    pub async fn get_forecast(
        &self,
        series: ForecastSeries,
        horizon_days: u32,
        confidence_level: f64,
    ) -> Result<Vec<ForecastPoint>, AnalyticsError> {
        if horizon_days == 0 {
            return Err(ValidationError::InvalidHorizon {
                value: horizon_days,
            }
            .into());
        }
        if !(confidence_level > 0.0 && confidence_level < 1.0) {
            return Err(ValidationError::InvalidConfidence {
                value: confidence_level,
            }
            .into());
        }

        let sql = self
            .statements
            .forecast(series, horizon_days, confidence_level)?;
        let rows = self.warehouse.query(&sql).await?;
        debug!(series = %series, rows = rows.len(), "forecast returned");
        rows.iter()
            .enumerate()
            .map(|(index, row)| forecast_point(series, index, row))
            .collect()
    }

    /// Whatever evaluation metrics the warehouse reports for `model_name`.
    ///
    /// # Errors
    /// Returns warehouse errors, including a rejected model name.
    pub async fn get_model_metrics(&self, model_name: &str) -> Result<Vec<Row>, AnalyticsError> {
        let sql = self.statements.evaluate(model_name)?;
        Ok(self.warehouse.query(&sql).await?)
    }

    /// The most recent `limit` days of `daily_bookings`, newest first.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidLimit`] for a zero limit, warehouse
    /// errors, and [`AnalyticsError::UnexpectedRow`] for rows that do not decode.
    pub async fn get_daily_trends(&self, limit: u32) -> Result<Vec<DailyAggregate>, AnalyticsError> {
        if limit == 0 {
            return Err(ValidationError::InvalidLimit.into());
        }
        let rows = self.warehouse.query(&self.statements.daily_trends(limit)).await?;
        decode_rows(rows)
    }

    /// The most recent `limit` categorized bookings.
    ///
    /// # Errors
    /// Same as [`Self::get_daily_trends`].
    pub async fn get_booking_details(&self, limit: u32) -> Result<Vec<BookingDetail>, AnalyticsError> {
        if limit == 0 {
            return Err(ValidationError::InvalidLimit.into());
        }
        let rows = self
            .warehouse
            .query(&self.statements.recent_booking_details(limit))
            .await?;
        decode_rows(rows)
    }

    /// Training state of every forecast model.
    ///
    /// # Errors
    /// Returns warehouse errors from the model lookups.
    pub async fn get_model_performance(&self) -> Result<Vec<ModelPerformance>, AnalyticsError> {
        let mut models = Vec::with_capacity(ForecastSeries::ALL.len());
        for series in ForecastSeries::ALL {
            let model = self.statements.model(series.model_name())?;
            let performance = match self.warehouse.model_info(&model).await? {
                Some(info) => ModelPerformance {
                    model_name: series.model_name().to_string(),
                    model_type: info
                        .model_type
                        .unwrap_or_else(|| String::from(FORECAST_MODEL_TYPE)),
                    status: ModelStatus::Trained,
                    created_at: info.created_at,
                },
                None => ModelPerformance {
                    model_name: series.model_name().to_string(),
                    model_type: String::from(FORECAST_MODEL_TYPE),
                    status: ModelStatus::NotTrained,
                    created_at: None,
                },
            };
            models.push(performance);
        }
        Ok(models)
    }
}

/// Totals over a set of trend rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSummary {
    pub days: usize,
    pub total_bookings: i64,
    pub total_revenue: f64,
    pub avg_bookings_per_day: f64,
}

#[must_use]
pub fn summarize_trends(trends: &[DailyAggregate]) -> TrendSummary {
    let total_bookings = trends.iter().map(|day| day.total_bookings).sum::<i64>();
    let total_revenue = trends.iter().map(|day| day.total_revenue).sum::<f64>();
    let avg_bookings_per_day = if trends.is_empty() {
        0.0
    } else {
        total_bookings as f64 / trends.len() as f64
    };
    TrendSummary {
        days: trends.len(),
        total_bookings,
        total_revenue,
        avg_bookings_per_day,
    }
}

/// Reverse newest-first trend rows into charting order.
#[must_use]
pub fn chronological(mut trends: Vec<DailyAggregate>) -> Vec<DailyAggregate> {
    trends.reverse();
    trends
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, AnalyticsError> {
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| {
            serde_json::from_value(Value::Object(row)).map_err(|error| AnalyticsError::UnexpectedRow {
                row: index,
                column: String::from("*"),
                problem: error.to_string(),
            })
        })
        .collect()
}

fn forecast_point(series: ForecastSeries, index: usize, row: &Row) -> Result<ForecastPoint, AnalyticsError> {
    let date = match row.get("date") {
        Some(Value::String(date)) => date.clone(),
        other => return Err(unexpected(index, "date", other, "a timestamp string")),
    };
    Ok(ForecastPoint {
        date,
        predicted: number(index, row, series.value_alias())?,
        standard_error: number(index, row, "standard_error")?,
        confidence_level: number(index, row, "confidence_level")?,
        lower_bound: number(index, row, "lower_bound")?,
        upper_bound: number(index, row, "upper_bound")?,
    })
}

fn number(index: usize, row: &Row, column: &str) -> Result<f64, AnalyticsError> {
    let value = row.get(column);
    value
        .and_then(Value::as_f64)
        .ok_or_else(|| unexpected(index, column, value, "a number"))
}

fn unexpected(index: usize, column: &str, value: Option<&Value>, expected: &str) -> AnalyticsError {
    let problem = match value {
        None => String::from("is missing"),
        Some(value) => format!("is {value}, expected {expected}"),
    };
    AnalyticsError::UnexpectedRow {
        row: index,
        column: column.to_string(),
        problem,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trend(date: &str, bookings: i64, revenue: f64) -> DailyAggregate {
        serde_json::from_value(json!({
            "date": date,
            "total_bookings": bookings,
            "total_revenue": revenue
        }))
        .expect("trend")
    }

    #[test]
    fn summary_of_no_trends_is_zero() {
        let summary = summarize_trends(&[]);
        assert_eq!(summary.days, 0);
        assert_eq!(summary.avg_bookings_per_day, 0.0);
    }

    #[test]
    fn summary_totals_and_averages_bookings() {
        let summary = summarize_trends(&[
            trend("2024-01-03", 3, 1_500.0),
            trend("2024-01-02", 8, 4_000.0),
            trend("2024-01-01", 5, 2_500.0),
        ]);

        assert_eq!(summary.total_bookings, 16);
        assert_eq!(summary.total_revenue, 8_000.0);
        assert!((summary.avg_bookings_per_day - 16.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn chronological_reverses_newest_first_rows() {
        let ordered = chronological(vec![trend("2024-01-02", 1, 1.0), trend("2024-01-01", 2, 2.0)]);
        assert_eq!(ordered[0].date, "2024-01-01");
    }

    #[test]
    fn forecast_row_missing_bound_is_reported_by_column() {
        let row = json!({
            "date": "2024-01-01T00:00:00Z",
            "predicted_revenue": 1200.5,
            "standard_error": 40.0,
            "confidence_level": 0.95,
            "lower_bound": 1100.0
        });
        let Value::Object(row) = row else { unreachable!() };

        let error = forecast_point(ForecastSeries::Revenue, 4, &row).expect_err("missing bound");

        assert_eq!(error.to_string(), "row 4: column `upper_bound` is missing");
    }
}
