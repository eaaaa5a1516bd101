use bookcast_core::{provision, SetupOptions};
use bookcast_warehouse::Provisioned;

use crate::cli::SetupArgs;
use crate::error::CliError;

use super::{training_warnings, CommandResult, Context};

pub async fn run(args: &SetupArgs, context: &Context) -> Result<CommandResult, CliError> {
    let session = context.session()?;
    let options = SetupOptions {
        sample_data: args.sample_data,
        train: args.train,
        poll: context.config.poll.policy(),
    };
    let report = provision(session.warehouse.as_ref(), &session.statements, &options).await?;

    let preexisting = report
        .tables
        .iter()
        .filter(|table| table.outcome == Provisioned::AlreadyExists)
        .count();

    let mut result = CommandResult::ok(serde_json::to_value(&report)?)
        .with_warnings(training_warnings(&report.models));
    if args.sample_data && preexisting > 0 {
        result = result.with_warning(format!(
            "sample rows appended to existing tables ({preexisting} table(s) already existed)"
        ));
    }
    Ok(result)
}
