use bookcast_core::{AnalyticsError, ConfigError, MigrationStep, PipelineError, SourceError, ValidationError};
use bookcast_warehouse::WarehouseError;
use thiserror::Error;

/// Exit code for an empty export window.
pub const NO_DATA_EXIT_CODE: u8 = 3;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Analytics(#[from] AnalyticsError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("strict mode failed: warnings={warning_count}, errors={error_count}")]
    StrictModeViolation {
        warning_count: usize,
        error_count: usize,
    },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Validation(_) => 2,
            Self::Analytics(AnalyticsError::Validation(_)) => 2,
            Self::Pipeline(PipelineError::BookingNotFound { .. }) => NO_DATA_EXIT_CODE,
            Self::StrictModeViolation { .. } => 5,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
            Self::Source(_) | Self::Pipeline(PipelineError::Source(_)) => 21,
            Self::Warehouse(_)
            | Self::Analytics(_)
            | Self::Pipeline(PipelineError::Warehouse(_) | PipelineError::ExportFile { .. }) => 20,
        }
    }
}

/// Distinct exit code per failed migration step.
pub const fn step_exit_code(step: MigrationStep) -> u8 {
    match step {
        MigrationStep::Export => 11,
        MigrationStep::EnsureSchema => 12,
        MigrationStep::LoadBase => 13,
        MigrationStep::BuildAggregates => 14,
        MigrationStep::BuildDetails => 15,
        MigrationStep::TrainModels | MigrationStep::Done => 16,
    }
}
