use serde::Serialize;
use serde_json::json;

use bookcast_core::{
    chronological, run_overview, summarize_trends, DailyAggregate, ForecastLayer, ForecastPoint,
    ForecastSeries, ModelStatus, CheckStatus, TrendSummary,
};

use crate::cli::{DetailsArgs, ForecastArgs, MetricsArgs, OverviewArgs, TrendsArgs};
use crate::error::CliError;

use super::{CommandResult, Context};

#[derive(Debug, Serialize)]
struct ForecastResponseData {
    series: ForecastSeries,
    model: &'static str,
    horizon_days: u32,
    confidence_level: f64,
    points: Vec<ForecastPoint>,
}

#[derive(Debug, Serialize)]
struct TrendsResponseData {
    summary: TrendSummary,
    days: Vec<DailyAggregate>,
}

pub async fn forecast(args: &ForecastArgs, context: &Context) -> Result<CommandResult, CliError> {
    let session = context.session()?;
    let layer = ForecastLayer::new(session.warehouse.as_ref(), session.statements);

    let settings = &context.config.forecast;
    let horizon_days = args.horizon.unwrap_or(match args.series {
        ForecastSeries::Bookings => settings.booking_horizon_days,
        ForecastSeries::Revenue => settings.revenue_horizon_days,
    });
    let confidence_level = args.confidence.unwrap_or(settings.confidence_level);

    let points = layer
        .get_forecast(args.series, horizon_days, confidence_level)
        .await?;
    let empty = points.is_empty();

    let mut result = CommandResult::ok(serde_json::to_value(ForecastResponseData {
        series: args.series,
        model: args.series.model_name(),
        horizon_days,
        confidence_level,
        points,
    })?);
    if empty {
        result = result.with_warning(format!(
            "{} returned no forecast rows",
            args.series.model_name()
        ));
    }
    Ok(result)
}

pub async fn metrics(args: &MetricsArgs, context: &Context) -> Result<CommandResult, CliError> {
    let session = context.session()?;
    let layer = ForecastLayer::new(session.warehouse.as_ref(), session.statements);

    // `bookings` and `revenue` name the two forecast models
    let model_name = match args.model.parse::<ForecastSeries>() {
        Ok(series) => series.model_name(),
        Err(_) => args.model.as_str(),
    };
    let rows = layer.get_model_metrics(model_name).await?;

    Ok(CommandResult::ok(json!({
        "model": model_name,
        "metrics": rows,
    })))
}

pub async fn trends(args: &TrendsArgs, context: &Context) -> Result<CommandResult, CliError> {
    let session = context.session()?;
    let layer = ForecastLayer::new(session.warehouse.as_ref(), session.statements);

    let limit = args.limit.unwrap_or(context.config.forecast.trend_days);
    let mut days = layer.get_daily_trends(limit).await?;
    let summary = summarize_trends(&days);
    if args.chronological {
        days = chronological(days);
    }

    let empty = days.is_empty();

    let mut result = CommandResult::ok(serde_json::to_value(TrendsResponseData { summary, days })?);
    if empty {
        result = result.with_warning("daily_bookings has no rows yet");
    }
    Ok(result)
}

pub async fn details(args: &DetailsArgs, context: &Context) -> Result<CommandResult, CliError> {
    let session = context.session()?;
    let layer = ForecastLayer::new(session.warehouse.as_ref(), session.statements);

    let details = layer.get_booking_details(args.limit).await?;
    Ok(CommandResult::ok(json!({ "bookings": details })))
}

pub async fn models(context: &Context) -> Result<CommandResult, CliError> {
    let session = context.session()?;
    let layer = ForecastLayer::new(session.warehouse.as_ref(), session.statements);

    let models = layer.get_model_performance().await?;
    let untrained = models
        .iter()
        .filter(|model| model.status == ModelStatus::NotTrained)
        .map(|model| format!("{} has not been trained", model.model_name))
        .collect::<Vec<_>>();

    Ok(CommandResult::ok(json!({ "models": models })).with_warnings(untrained))
}

pub async fn overview(args: &OverviewArgs, context: &Context) -> Result<CommandResult, CliError> {
    let session = context.session()?;
    let layer = ForecastLayer::new(session.warehouse.as_ref(), session.statements);

    let horizon_days = args
        .horizon
        .unwrap_or(context.config.forecast.booking_horizon_days);
    let checks = run_overview(&layer, horizon_days).await;
    let failing = checks
        .iter()
        .filter_map(|result| match &result.status {
            CheckStatus::Error { message } => Some(format!("{}: {message}", result.check.label())),
            _ => None,
        })
        .collect::<Vec<_>>();

    Ok(CommandResult::ok(json!({ "checks": checks })).with_warnings(failing))
}
