//! Analytics overview: run each report query once and note whether it works.

use std::fmt;

use serde::Serialize;

use crate::domain::ForecastSeries;
use crate::error::AnalyticsError;
use crate::forecast::{ForecastLayer, DEFAULT_CONFIDENCE_LEVEL, DEFAULT_TREND_LIMIT};

const ERROR_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OverviewCheck {
    #[serde(rename = "Booking Forecast")]
    BookingForecast,
    #[serde(rename = "Revenue Forecast")]
    RevenueForecast,
    #[serde(rename = "Model Performance")]
    ModelPerformance,
    #[serde(rename = "Daily Trends")]
    DailyTrends,
}

impl OverviewCheck {
    pub const ALL: [Self; 4] = [
        Self::BookingForecast,
        Self::RevenueForecast,
        Self::ModelPerformance,
        Self::DailyTrends,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::BookingForecast => "Booking Forecast",
            Self::RevenueForecast => "Revenue Forecast",
            Self::ModelPerformance => "Model Performance",
            Self::DailyTrends => "Daily Trends",
        }
    }

    async fn record_count(self, layer: &ForecastLayer<'_>, horizon_days: u32) -> Result<usize, AnalyticsError> {
        match self {
            Self::BookingForecast => layer
                .get_forecast(ForecastSeries::Bookings, horizon_days, DEFAULT_CONFIDENCE_LEVEL)
                .await
                .map(|points| points.len()),
            Self::RevenueForecast => layer
                .get_forecast(ForecastSeries::Revenue, horizon_days, DEFAULT_CONFIDENCE_LEVEL)
                .await
                .map(|points| points.len()),
            Self::ModelPerformance => layer.get_model_performance().await.map(|models| models.len()),
            Self::DailyTrends => layer
                .get_daily_trends(DEFAULT_TREND_LIMIT)
                .await
                .map(|trends| trends.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckStatus {
    Working { records: usize },
    NoData,
    Error { message: String },
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Working { records } => write!(f, "Working - {records} records"),
            Self::NoData => f.write_str("No data available"),
            Self::Error { message } => write!(f, "Error: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub check: OverviewCheck,
    #[serde(flatten)]
    pub status: CheckStatus,
    pub summary: String,
}

/// Run every check in order. A failing check never stops the next.
pub async fn run_overview(layer: &ForecastLayer<'_>, horizon_days: u32) -> Vec<CheckResult> {
    let mut results = Vec::with_capacity(OverviewCheck::ALL.len());
    for check in OverviewCheck::ALL {
        let status = match check.record_count(layer, horizon_days).await {
            Ok(0) => CheckStatus::NoData,
            Ok(records) => CheckStatus::Working { records },
            Err(error) => CheckStatus::Error {
                message: error.to_string().chars().take(ERROR_PREVIEW_CHARS).collect(),
            },
        };
        results.push(CheckResult {
            check,
            summary: status.to_string(),
            status,
        });
    }
    results
}
