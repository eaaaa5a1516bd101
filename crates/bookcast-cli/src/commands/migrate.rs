use bookcast_core::{MigrationPipeline, MigrationReport, MigrationStatus, MigrationStep};
use chrono::Utc;

use crate::cli::MigrateArgs;
use crate::envelope::EnvelopeError;
use crate::error::{step_exit_code, CliError, NO_DATA_EXIT_CODE};

use super::{training_warnings, CommandResult, Context};

pub async fn run(args: &MigrateArgs, context: &Context) -> Result<CommandResult, CliError> {
    let session = context.session()?;
    // An unreachable or unreadable source fails the export step like any other read error.
    let source = match context.source().await {
        Ok(source) => source,
        Err(CliError::Source(error)) => {
            let report = MigrationReport::failed_at(MigrationStep::Export, &error);
            return Ok(CommandResult::ok(serde_json::to_value(&report)?)
                .with_error(step_error(MigrationStep::Export, &error.to_string()))
                .with_exit_code(step_exit_code(MigrationStep::Export)));
        }
        Err(error) => return Err(error),
    };

    let export_path = if args.no_export_file {
        None
    } else {
        args.export_path
            .clone()
            .or_else(|| context.config.export_path.clone())
    };

    let pipeline = MigrationPipeline::new(
        session.warehouse.as_ref(),
        source.as_ref(),
        session.statements,
        context.config.poll.policy(),
    )
    .with_export_path(export_path)
    .with_readiness(context.config.readiness.clone());

    let report = pipeline.run(Utc::now().naive_utc()).await;

    let step_warnings = report
        .steps
        .iter()
        .flat_map(|step| step.warnings.iter().cloned())
        .collect::<Vec<_>>();

    let mut result = CommandResult::ok(serde_json::to_value(&report)?)
        .with_warnings(step_warnings)
        .with_warnings(training_warnings(&report.models));

    match &report.status {
        MigrationStatus::Completed | MigrationStatus::CompletedWithTrainingFailures { .. } => {}
        MigrationStatus::NoData => {
            result = result
                .with_warning("no bookings found for the last 365 days")
                .with_exit_code(NO_DATA_EXIT_CODE);
        }
        MigrationStatus::Failed { step, message } => {
            result = result
                .with_error(step_error(*step, message))
                .with_exit_code(step_exit_code(*step));
        }
    }

    Ok(result)
}

fn step_error(step: MigrationStep, message: &str) -> EnvelopeError {
    EnvelopeError::new(format!("migration.{}", step.as_str()), message)
}

