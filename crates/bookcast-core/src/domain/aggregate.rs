use std::fmt;

use serde::{Deserialize, Serialize};

/// Upper bounds (inclusive) of the trip duration buckets, in days.
pub const DAY_TRIP_MAX_DAYS: i64 = 1;
pub const SHORT_TRIP_MAX_DAYS: i64 = 3;
pub const WEEK_TRIP_MAX_DAYS: i64 = 7;

/// Upper bounds (inclusive) of the price buckets.
pub const LOW_PRICE_MAX: f64 = 5_000.0;
pub const MEDIUM_PRICE_MAX: f64 = 15_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TripDuration {
    #[serde(rename = "Day Trip")]
    DayTrip,
    #[serde(rename = "Short Trip")]
    ShortTrip,
    #[serde(rename = "Week Trip")]
    WeekTrip,
    #[serde(rename = "Long Trip")]
    LongTrip,
}

impl TripDuration {
    #[must_use]
    pub const fn from_days(days: i64) -> Self {
        if days <= DAY_TRIP_MAX_DAYS {
            Self::DayTrip
        } else if days <= SHORT_TRIP_MAX_DAYS {
            Self::ShortTrip
        } else if days <= WEEK_TRIP_MAX_DAYS {
            Self::WeekTrip
        } else {
            Self::LongTrip
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::DayTrip => "Day Trip",
            Self::ShortTrip => "Short Trip",
            Self::WeekTrip => "Week Trip",
            Self::LongTrip => "Long Trip",
        }
    }
}

impl fmt::Display for TripDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceCategory {
    #[serde(rename = "Low Price")]
    Low,
    #[serde(rename = "Medium Price")]
    Medium,
    #[serde(rename = "High Price")]
    High,
}

impl PriceCategory {
    #[must_use]
    pub fn from_price(price: f64) -> Self {
        if price <= LOW_PRICE_MAX {
            Self::Low
        } else if price <= MEDIUM_PRICE_MAX {
            Self::Medium
        } else {
            Self::High
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "Low Price",
            Self::Medium => "Medium Price",
            Self::High => "High Price",
        }
    }
}

impl fmt::Display for PriceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One row of `daily_bookings`.
///
/// The migration builds `canceled_bookings`/`completed_bookings` while the
/// setup scripts create `cancelled_bookings`/`confirmed_bookings`. Both shapes
/// decode here; whichever columns the table lacks stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: String,
    pub total_bookings: i64,
    pub total_revenue: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_booking_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canceled_bookings: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_bookings: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_bookings: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_bookings: Option<i64>,
}

/// One row of `booking_details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingDetail {
    pub booking_id: i64,
    pub booking_date: String,
    pub destination: String,
    pub pickup_point: String,
    pub number_of_days: i64,
    pub number_of_buses: i64,
    pub price: f64,
    /// 1 = Sunday through 7 = Saturday.
    pub day_of_week: i64,
    pub month: i64,
    pub year: i64,
    pub trip_duration_category: TripDuration,
    pub price_category: PriceCategory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trip_duration_boundaries() {
        assert_eq!(TripDuration::from_days(0), TripDuration::DayTrip);
        assert_eq!(TripDuration::from_days(1), TripDuration::DayTrip);
        assert_eq!(TripDuration::from_days(2), TripDuration::ShortTrip);
        assert_eq!(TripDuration::from_days(3), TripDuration::ShortTrip);
        assert_eq!(TripDuration::from_days(7), TripDuration::WeekTrip);
        assert_eq!(TripDuration::from_days(8), TripDuration::LongTrip);
    }

    #[test]
    fn price_category_boundaries() {
        assert_eq!(PriceCategory::from_price(5_000.0), PriceCategory::Low);
        assert_eq!(PriceCategory::from_price(5_000.01), PriceCategory::Medium);
        assert_eq!(PriceCategory::from_price(15_000.0), PriceCategory::Medium);
        assert_eq!(PriceCategory::from_price(15_001.0), PriceCategory::High);
    }

    #[test]
    fn legacy_daily_rows_decode_without_canonical_counts() {
        let row = serde_json::json!({
            "date": "2024-01-01",
            "total_bookings": 5,
            "total_revenue": 2500.0,
            "cancelled_bookings": 0,
            "confirmed_bookings": 5
        });

        let aggregate: DailyAggregate = serde_json::from_value(row).expect("decode");

        assert_eq!(aggregate.confirmed_bookings, Some(5));
        assert_eq!(aggregate.completed_bookings, None);
    }
}
