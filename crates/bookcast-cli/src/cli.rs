//! CLI argument definitions for bookcast.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `migrate` | Export bookings, rebuild warehouse tables, train models |
//! | `setup` | Provision the dataset and tables, optionally seeded and trained |
//! | `forecast` | Forecast bookings or revenue |
//! | `metrics` | Evaluation metrics of a trained model |
//! | `trends` | Recent daily aggregates |
//! | `details` | Recent categorized bookings |
//! | `models` | Training state of the forecast models |
//! | `overview` | Try every report query once |
//! | `status` | Configuration readiness |
//! | `sync` | Copy one booking into the warehouse |
//!
//! # Examples
//!
//! ```bash
//! bookcast migrate --pretty
//! bookcast setup --sample-data --train
//! bookcast forecast revenue --horizon 14 --confidence 0.9
//! bookcast --backend local --source-csv bookings_export.csv migrate
//! ```

use std::path::PathBuf;

use bookcast_core::ForecastSeries;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "bookcast",
    author,
    version,
    about = "Booking analytics migration and forecasting",
    long_about = "bookcast moves the last year of bookings into a data warehouse, rebuilds the \
daily and per-booking analytics tables, trains ARIMA_PLUS forecast models, and reads \
forecasts back out.\n\
\n\
The BigQuery backend needs a service-account key; the local backend runs every \
non-ML step against a DuckDB file."
)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Warehouse to run against.
    #[arg(long, global = true, value_enum, default_value_t = Backend::Bigquery)]
    pub backend: Backend,

    /// DuckDB file for the local backend.
    #[arg(long, global = true)]
    pub local_db: Option<PathBuf>,

    /// MySQL URL of the booking store (overrides DATABASE_URL).
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Read bookings from a CSV export instead of the database.
    #[arg(long, global = true, conflicts_with = "database_url")]
    pub source_csv: Option<PathBuf>,

    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Treat warnings (including failed model training) as failures (exit code 5).
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,

    /// Log at debug level on stderr.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Bigquery,
    Local,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the full migration pipeline.
    Migrate(MigrateArgs),
    /// Create the dataset and tables when absent.
    Setup(SetupArgs),
    /// Forecast a daily series.
    Forecast(ForecastArgs),
    /// Evaluation metrics reported for a model.
    Metrics(MetricsArgs),
    /// Most recent daily aggregates.
    Trends(TrendsArgs),
    /// Most recent categorized bookings.
    Details(DetailsArgs),
    /// Training state of the forecast models.
    Models,
    /// Run every report query once and summarize.
    Overview(OverviewArgs),
    /// Show whether analytics is configured.
    Status,
    /// Copy one booking from the source store into the warehouse.
    Sync(SyncArgs),
}

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Where to write the CSV export (overrides the configured path).
    #[arg(long)]
    pub export_path: Option<PathBuf>,

    /// Keep the export in memory only.
    #[arg(long, default_value_t = false, conflicts_with = "export_path")]
    pub no_export_file: bool,
}

#[derive(Debug, Args)]
pub struct SetupArgs {
    /// Insert twenty sample days and fifteen sample bookings.
    #[arg(long, default_value_t = false)]
    pub sample_data: bool,

    /// Train both forecast models on daily_bookings once the tables exist.
    #[arg(long, default_value_t = false)]
    pub train: bool,
}

#[derive(Debug, Args)]
pub struct ForecastArgs {
    /// bookings or revenue.
    #[arg(value_parser = parse_series)]
    pub series: ForecastSeries,

    /// Days to forecast (defaults to the configured horizon).
    #[arg(long)]
    pub horizon: Option<u32>,

    /// Prediction interval confidence, strictly between 0 and 1.
    #[arg(long)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Args)]
pub struct MetricsArgs {
    /// Model name, or `bookings` / `revenue`.
    pub model: String,
}

#[derive(Debug, Args)]
pub struct TrendsArgs {
    /// Number of days (defaults to the configured trend window).
    #[arg(long)]
    pub limit: Option<u32>,

    /// Oldest day first.
    #[arg(long, default_value_t = false)]
    pub chronological: bool,
}

#[derive(Debug, Args)]
pub struct DetailsArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: u32,
}

#[derive(Debug, Args)]
pub struct OverviewArgs {
    /// Forecast horizon used by the forecast checks.
    #[arg(long)]
    pub horizon: Option<u32>,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    pub booking_id: i64,
}

fn parse_series(value: &str) -> Result<ForecastSeries, String> {
    value.parse::<ForecastSeries>().map_err(|error| error.to_string())
}
