use bookcast_warehouse::WarehouseError;
use thiserror::Error;

use crate::source::SourceError;

/// Invalid arguments rejected before any warehouse call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("forecast horizon must be at least 1 day, got {value}")]
    InvalidHorizon { value: u32 },
    #[error("confidence level must be strictly between 0 and 1, got {value}")]
    InvalidConfidence { value: f64 },
    #[error("trend limit must be at least 1")]
    InvalidLimit,
    #[error("unknown forecast series '{value}', expected bookings or revenue")]
    UnknownSeries { value: String },
}

/// Failures of the forecast and reporting queries.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    /// A result row is missing a column or holds the wrong kind of value.
    #[error("row {row}: column `{column}` {problem}")]
    UnexpectedRow {
        row: usize,
        column: String,
        problem: String,
    },
}

/// Failures of migration steps and booking sync.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("booking {booking_id} not found in the source store")]
    BookingNotFound { booking_id: i64 },

    #[error("failed to write export {path}: {source}")]
    ExportFile {
        path: String,
        #[source]
        source: WarehouseError,
    },
}
