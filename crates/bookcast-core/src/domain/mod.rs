//! # Domain Models
//!
//! Records flowing through the migration pipeline and the forecast layer.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`BookingRecord`] | A booking joined with its costs, as exported from the source store |
//! | [`DailyAggregate`] | One day of `daily_bookings` |
//! | [`BookingDetail`] | One categorized booking of `booking_details` |
//! | [`ForecastPoint`] | One predicted day from a trained model |
//! | [`ForecastSeries`] | Which series (and model) a forecast is about |
//!
//! The bucket thresholds used by [`TripDuration`] and [`PriceCategory`] are the
//! same constants the warehouse statements are built from.

mod aggregate;
mod booking;
mod forecast;

pub use aggregate::{
    BookingDetail, DailyAggregate, PriceCategory, TripDuration, DAY_TRIP_MAX_DAYS, LOW_PRICE_MAX,
    MEDIUM_PRICE_MAX, SHORT_TRIP_MAX_DAYS, WEEK_TRIP_MAX_DAYS,
};
pub use booking::{warehouse_timestamp, BookingRecord};
pub use forecast::{ForecastPoint, ForecastSeries, ModelPerformance, ModelStatus};
