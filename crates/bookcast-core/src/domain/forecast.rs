use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// A daily series that has its own forecast model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastSeries {
    Bookings,
    Revenue,
}

impl ForecastSeries {
    pub const ALL: [Self; 2] = [Self::Bookings, Self::Revenue];

    #[must_use]
    pub const fn model_name(self) -> &'static str {
        match self {
            Self::Bookings => "booking_forecast_model",
            Self::Revenue => "revenue_forecast_model",
        }
    }

    /// Column of `daily_bookings` the model is trained on.
    #[must_use]
    pub const fn data_column(self) -> &'static str {
        match self {
            Self::Bookings => "total_bookings",
            Self::Revenue => "total_revenue",
        }
    }

    /// Alias of the predicted value in forecast results.
    #[must_use]
    pub const fn value_alias(self) -> &'static str {
        match self {
            Self::Bookings => "predicted_bookings",
            Self::Revenue => "predicted_revenue",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bookings => "bookings",
            Self::Revenue => "revenue",
        }
    }
}

impl fmt::Display for ForecastSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForecastSeries {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bookings" | "booking" | "booking_forecast_model" => Ok(Self::Bookings),
            "revenue" | "revenue_forecast_model" => Ok(Self::Revenue),
            _ => Err(ValidationError::UnknownSeries {
                value: value.to_string(),
            }),
        }
    }
}

/// One predicted step of a forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    /// RFC 3339 timestamp of the predicted day.
    pub date: String,
    pub predicted: f64,
    pub standard_error: f64,
    pub confidence_level: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl ForecastPoint {
    #[must_use]
    pub fn within_bounds(&self) -> bool {
        self.lower_bound <= self.predicted && self.predicted <= self.upper_bound
    }
}

/// Training state of one forecast model as seen by the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelPerformance {
    pub model_name: String,
    pub model_type: String,
    pub status: ModelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModelStatus {
    Trained,
    #[serde(rename = "Not Trained")]
    NotTrained,
}
