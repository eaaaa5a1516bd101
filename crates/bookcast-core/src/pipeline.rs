//! # Migration Pipeline
//!
//! Moves the trailing year of bookings into the warehouse and rebuilds
//! everything derived from it:
//!
//! ```text
//! Export → EnsureSchema → LoadBase → BuildAggregates → BuildDetails → TrainModels → Done
//! ```
//!
//! Steps run strictly in order. A failing step before `TrainModels` stops the
//! run with [`MigrationStatus::Failed`]. An empty export window stops it with
//! [`MigrationStatus::NoData`]. Each model trains independently and a failed
//! model only marks the run [`MigrationStatus::CompletedWithTrainingFailures`].
//!
//! Every derived table is replaced wholesale with `CREATE OR REPLACE`. Two
//! migrations running against the same dataset race and the last one wins.

use std::fmt;
use std::path::{Path, PathBuf};

use bookcast_warehouse::{PollPolicy, Provisioned, Row, TabularData, WarehouseClient, WarehouseError};
use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::ReadinessThresholds;
use crate::domain::ForecastSeries;
use crate::error::PipelineError;
use crate::export::{export_bookings, readiness_warnings, ExportOutcome};
use crate::source::BookingSource;
use crate::statements::{bookings_schema, Statements};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    Export,
    EnsureSchema,
    LoadBase,
    BuildAggregates,
    BuildDetails,
    TrainModels,
    Done,
}

impl MigrationStep {
    pub const ORDER: [Self; 7] = [
        Self::Export,
        Self::EnsureSchema,
        Self::LoadBase,
        Self::BuildAggregates,
        Self::BuildDetails,
        Self::TrainModels,
        Self::Done,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::EnsureSchema => "ensure_schema",
            Self::LoadBase => "load_base",
            Self::BuildAggregates => "build_aggregates",
            Self::BuildDetails => "build_details",
            Self::TrainModels => "train_models",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub step: MigrationStep,
    pub detail: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl StepReport {
    fn new(step: MigrationStep, detail: impl Into<String>) -> Self {
        Self {
            step,
            detail: detail.into(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelTrainingReport {
    pub series: ForecastSeries,
    pub model_name: String,
    pub trained: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationStatus {
    Completed,
    CompletedWithTrainingFailures { failed: Vec<String> },
    NoData,
    Failed { step: MigrationStep, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    #[serde(flatten)]
    pub status: MigrationStatus,
    pub exported_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_path: Option<PathBuf>,
    pub steps: Vec<StepReport>,
    pub models: Vec<ModelTrainingReport>,
}

impl MigrationReport {
    fn new() -> Self {
        Self {
            status: MigrationStatus::Completed,
            exported_rows: 0,
            export_path: None,
            steps: Vec::new(),
            models: Vec::new(),
        }
    }

    /// A run that stopped at `step` before any step completed.
    #[must_use]
    pub fn failed_at(step: MigrationStep, error: &dyn fmt::Display) -> Self {
        Self::new().fail(step, error)
    }

    fn fail(mut self, step: MigrationStep, error: &dyn fmt::Display) -> Self {
        let message = error.to_string();
        warn!(%step, %message, "migration step failed");
        self.status = MigrationStatus::Failed { step, message };
        self
    }

    /// The last step that finished successfully.
    #[must_use]
    pub fn last_completed_step(&self) -> Option<MigrationStep> {
        self.steps.last().map(|report| report.step)
    }
}

pub struct MigrationPipeline<'a> {
    warehouse: &'a dyn WarehouseClient,
    source: &'a dyn BookingSource,
    statements: Statements,
    poll: PollPolicy,
    export_path: Option<PathBuf>,
    readiness: ReadinessThresholds,
}

impl<'a> MigrationPipeline<'a> {
    #[must_use]
    pub fn new(
        warehouse: &'a dyn WarehouseClient,
        source: &'a dyn BookingSource,
        statements: Statements,
        poll: PollPolicy,
    ) -> Self {
        Self {
            warehouse,
            source,
            statements,
            poll,
            export_path: None,
            readiness: ReadinessThresholds::default(),
        }
    }

    /// Also write the exported window to a CSV file.
    #[must_use]
    pub fn with_export_path(mut self, path: Option<PathBuf>) -> Self {
        self.export_path = path;
        self
    }

    #[must_use]
    pub fn with_readiness(mut self, readiness: ReadinessThresholds) -> Self {
        self.readiness = readiness;
        self
    }

    #[must_use]
    pub fn statements(&self) -> &Statements {
        &self.statements
    }

    /// Run every step for the window ending at `now`.
    pub async fn run(&self, now: NaiveDateTime) -> MigrationReport {
        let mut report = MigrationReport::new();
        info!(
            dataset = self.statements.dataset().dataset(),
            backend = %self.warehouse.dialect(),
            "starting migration"
        );

        let (records, table) = match export_bookings(self.source, now).await {
            Ok(ExportOutcome::Exported { records, table }) => (records, table),
            Ok(ExportOutcome::NoData) => {
                warn!("no bookings found for the last 365 days");
                report.status = MigrationStatus::NoData;
                return report;
            }
            Err(error) => return report.fail(MigrationStep::Export, &error),
        };
        report.exported_rows = table.row_count();

        let mut export = StepReport::new(
            MigrationStep::Export,
            format!("exported {} booking records", table.row_count()),
        );
        export.warnings = readiness_warnings(&records, &self.readiness);
        for warning in &export.warnings {
            warn!(%warning, "thin booking history");
        }
        if let Some(path) = &self.export_path {
            if let Err(error) = write_export(&table, path) {
                return report.fail(MigrationStep::Export, &error);
            }
            report.export_path = Some(path.clone());
        }
        info!(rows = table.row_count(), "export complete");
        report.steps.push(export);

        match self.ensure_schema().await {
            Ok(step) => report.steps.push(step),
            Err(error) => return report.fail(MigrationStep::EnsureSchema, &error),
        }

        match self.load_base(&table).await {
            Ok(step) => report.steps.push(step),
            Err(error) => return report.fail(MigrationStep::LoadBase, &error),
        }

        match self.build_aggregates().await {
            Ok(step) => report.steps.push(step),
            Err(error) => return report.fail(MigrationStep::BuildAggregates, &error),
        }

        match self.build_details().await {
            Ok(step) => report.steps.push(step),
            Err(error) => return report.fail(MigrationStep::BuildDetails, &error),
        }

        report.models = self.train_models().await;
        let failed = report
            .models
            .iter()
            .filter(|model| !model.trained)
            .map(|model| model.model_name.clone())
            .collect::<Vec<_>>();
        let trained = report.models.len() - failed.len();
        report.steps.push(StepReport::new(
            MigrationStep::TrainModels,
            format!("trained {trained} of {} models", report.models.len()),
        ));
        report.steps.push(StepReport::new(MigrationStep::Done, "migration finished"));

        report.status = if failed.is_empty() {
            MigrationStatus::Completed
        } else {
            MigrationStatus::CompletedWithTrainingFailures { failed }
        };
        info!(status = ?report.status, "migration finished");
        report
    }

    /// Create the dataset and the base table when absent. Safe to repeat.
    ///
    /// # Errors
    /// Propagates the first warehouse failure.
    pub async fn ensure_schema(&self) -> Result<StepReport, WarehouseError> {
        let dataset = self
            .warehouse
            .create_dataset_if_absent(self.statements.dataset())
            .await?;
        let table = self
            .warehouse
            .create_table_if_absent(self.statements.bookings(), &bookings_schema())
            .await?;
        Ok(StepReport::new(
            MigrationStep::EnsureSchema,
            format!(
                "dataset {}, table {} {}",
                describe(dataset),
                self.statements.bookings(),
                describe(table)
            ),
        ))
    }

    /// Replace the base table's rows with the export.
    ///
    /// # Errors
    /// Fails when the load job cannot be submitted, fails, or times out.
    pub async fn load_base(
        &self,
        table: &TabularData,
    ) -> Result<StepReport, WarehouseError> {
        let job = self
            .warehouse
            .load_table(self.statements.bookings(), &bookings_schema(), table)
            .await?;
        self.warehouse
            .await_completion(&job, &self.poll)
            .await?
            .into_result(&job)?;
        Ok(StepReport::new(
            MigrationStep::LoadBase,
            format!("loaded {} rows into {}", table.row_count(), self.statements.bookings()),
        ))
    }

    /// # Errors
    /// Fails when the statement job fails or times out.
    pub async fn build_aggregates(&self) -> Result<StepReport, WarehouseError> {
        self.run_job(&self.statements.build_daily_aggregates()).await?;
        Ok(StepReport::new(
            MigrationStep::BuildAggregates,
            format!("rebuilt {}", self.statements.daily_bookings()),
        ))
    }

    /// # Errors
    /// Fails when the statement job fails or times out.
    pub async fn build_details(&self) -> Result<StepReport, WarehouseError> {
        self.run_job(&self.statements.build_booking_details()).await?;
        Ok(StepReport::new(
            MigrationStep::BuildDetails,
            format!("rebuilt {}", self.statements.booking_details()),
        ))
    }

    /// Train each series in turn. A failure is recorded and the next model still trains.
    pub async fn train_models(&self) -> Vec<ModelTrainingReport> {
        train_forecast_models(self.warehouse, &self.poll, |series| {
            self.statements.train_model(series)
        })
        .await
    }

    async fn run_job(&self, sql: &str) -> Result<(), WarehouseError> {
        run_statement(self.warehouse, sql, &self.poll).await
    }
}

/// Train every forecast series with the statement `training` renders for it.
pub(crate) async fn train_forecast_models<F>(
    warehouse: &dyn WarehouseClient,
    poll: &PollPolicy,
    training: F,
) -> Vec<ModelTrainingReport>
where
    F: Fn(ForecastSeries) -> Result<String, WarehouseError>,
{
    let mut reports = Vec::with_capacity(ForecastSeries::ALL.len());
    for series in ForecastSeries::ALL {
        let result = match training(series) {
            Ok(sql) => run_statement(warehouse, &sql, poll).await,
            Err(error) => Err(error),
        };
        let error = match result {
            Ok(()) => {
                info!(model = series.model_name(), "trained model");
                None
            }
            Err(error) => {
                warn!(model = series.model_name(), %error, "model training failed");
                Some(error.to_string())
            }
        };
        reports.push(ModelTrainingReport {
            series,
            model_name: series.model_name().to_string(),
            trained: error.is_none(),
            error,
        });
    }
    reports
}

async fn run_statement(
    warehouse: &dyn WarehouseClient,
    sql: &str,
    poll: &PollPolicy,
) -> Result<(), WarehouseError> {
    let job = warehouse.run_sql(sql).await?;
    warehouse
        .await_completion(&job, poll)
        .await?
        .into_result(&job)
}

fn describe(provisioned: Provisioned) -> &'static str {
    match provisioned {
        Provisioned::Created => "created",
        Provisioned::AlreadyExists => "already exists",
    }
}

fn write_export(table: &TabularData, path: &Path) -> Result<(), PipelineError> {
    table
        .write_csv(path)
        .map_err(|source| PipelineError::ExportFile {
            path: path.display().to_string(),
            source,
        })?;
    info!(path = %path.display(), "wrote booking export");
    Ok(())
}

/// Copy one booking from the source store into the warehouse `bookings` table.
///
/// # Errors
/// Returns [`PipelineError::BookingNotFound`] for unknown ids and propagates
/// source or insert failures.
pub async fn sync_booking(
    warehouse: &dyn WarehouseClient,
    source: &dyn BookingSource,
    statements: &Statements,
    booking_id: i64,
) -> Result<usize, PipelineError> {
    let record = source
        .booking_by_id(booking_id)
        .await?
        .ok_or(PipelineError::BookingNotFound { booking_id })?;
    let row: Row = match serde_json::to_value(&record) {
        Ok(Value::Object(row)) => row,
        Ok(other) => {
            return Err(WarehouseError::InvalidData(format!(
                "booking {booking_id} is not a row: {other}"
            ))
            .into())
        }
        Err(error) => return Err(WarehouseError::InvalidData(error.to_string()).into()),
    };
    let inserted = warehouse
        .insert_rows(statements.bookings(), std::slice::from_ref(&row))
        .await?;
    info!(booking_id, table = %statements.bookings(), "synced booking");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_status_serializes_with_step() {
        let status = MigrationStatus::Failed {
            step: MigrationStep::LoadBase,
            message: String::from("job load_1 failed: bad cell"),
        };

        assert_eq!(
            serde_json::to_value(&status).expect("serialize"),
            json!({"status": "failed", "step": "load_base", "message": "job load_1 failed: bad cell"})
        );
    }

    #[test]
    fn steps_run_in_declared_order() {
        let names = MigrationStep::ORDER.map(MigrationStep::as_str);
        assert_eq!(
            names,
            ["export", "ensure_schema", "load_base", "build_aggregates", "build_details", "train_models", "done"]
        );
    }
}
