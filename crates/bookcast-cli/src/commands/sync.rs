use serde_json::json;

use bookcast_core::sync_booking;

use crate::cli::SyncArgs;
use crate::error::CliError;

use super::{CommandResult, Context};

pub async fn run(args: &SyncArgs, context: &Context) -> Result<CommandResult, CliError> {
    let session = context.session()?;
    let source = context.source().await?;

    let inserted = sync_booking(
        session.warehouse.as_ref(),
        source.as_ref(),
        &session.statements,
        args.booking_id,
    )
    .await?;

    Ok(CommandResult::ok(json!({
        "booking_id": args.booking_id,
        "table": session.statements.bookings().to_string(),
        "inserted_rows": inserted,
    })))
}
