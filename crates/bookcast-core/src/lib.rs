//! # Bookcast Core
//!
//! Booking analytics on top of a cloud warehouse: the migration pipeline that
//! moves bookings into the warehouse and trains forecast models, and the
//! query layer that reads forecasts and trends back out.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`auth`] | Service-account and static bearer tokens |
//! | [`bigquery`] | BigQuery REST v2 implementation of the warehouse contract |
//! | [`config`] | Layered configuration and readiness report |
//! | [`domain`] | Booking, aggregate and forecast records |
//! | [`error`] | Validation, analytics and pipeline errors |
//! | [`export`] | Booking window export to CSV-shaped tables |
//! | [`forecast`] | Forecast, metrics, trend and detail queries |
//! | [`http_client`] | HTTP transport seam |
//! | [`overview`] | Analytics overview checks |
//! | [`pipeline`] | Migration state machine and single-booking sync |
//! | [`setup`] | Dataset provisioning and sample data |
//! | [`source`] | Source store adapters (MySQL, in-memory) |
//! | [`statements`] | Per-dialect SQL templates |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │ BookingSource│────▶│ MigrationPipeline│────▶│ WarehouseClient  │
//! │ (MySQL/CSV)  │     └──────────────────┘     │ (BigQuery/DuckDB)│
//! └──────────────┘     ┌──────────────────┐     │                  │
//!                      │ ForecastLayer    │────▶│                  │
//!                      └──────────────────┘     └──────────────────┘
//! ```

pub mod auth;
pub mod bigquery;
pub mod config;
pub mod domain;
pub mod error;
pub mod export;
pub mod forecast;
pub mod http_client;
pub mod overview;
pub mod pipeline;
pub mod setup;
pub mod source;
pub mod statements;

pub use auth::{ServiceAccountKey, ServiceAccountTokenProvider, StaticToken, TokenProvider};
pub use bigquery::BigQueryClient;
pub use config::{AnalyticsConfig, ConfigError, ReadinessReport};
pub use domain::{
    BookingDetail, BookingRecord, DailyAggregate, ForecastPoint, ForecastSeries, ModelPerformance,
    ModelStatus, PriceCategory, TripDuration,
};
pub use error::{AnalyticsError, PipelineError, ValidationError};
pub use export::{export_bookings, tabular_from_records, ExportOutcome};
pub use forecast::{chronological, summarize_trends, ForecastLayer, TrendSummary};
pub use http_client::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use overview::{run_overview, CheckResult, CheckStatus, OverviewCheck};
pub use pipeline::{
    sync_booking, MigrationPipeline, MigrationReport, MigrationStatus, MigrationStep,
    ModelTrainingReport, StepReport,
};
pub use setup::{provision, SetupOptions, SetupReport};
pub use source::{BookingSource, InMemoryBookingSource, MySqlBookingSource, SourceError};
pub use statements::Statements;
