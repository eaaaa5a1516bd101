use serde::Serialize;

use bookcast_core::ReadinessReport;

use crate::error::CliError;

use super::{CommandResult, Context};

#[derive(Debug, Serialize)]
struct StatusResponseData {
    #[serde(flatten)]
    readiness: ReadinessReport,
    backend: &'static str,
    source: &'static str,
    location: Option<String>,
}

/// Readiness from configuration alone; no remote calls.
pub fn run(context: &Context) -> Result<CommandResult, CliError> {
    let readiness = context.config.readiness();

    let mut warnings = Vec::new();
    if !readiness.enabled {
        warnings.push(String::from("analytics is disabled"));
    } else if !readiness.configured && context.config.access_token.is_none() {
        warnings.push(String::from(
            "BigQuery is not configured: a credentials file and project id are required",
        ));
    }
    if context.source_kind() == "none" {
        warnings.push(String::from("no booking source configured"));
    }

    let data = StatusResponseData {
        readiness,
        backend: context.backend_label(),
        source: context.source_kind(),
        location: context.config.location.clone(),
    };

    Ok(CommandResult::ok(serde_json::to_value(data)?).with_warnings(warnings))
}
