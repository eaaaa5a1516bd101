mod migrate;
mod reports;
mod setup;
mod status;
mod sync;

use std::sync::Arc;
use std::time::Instant;

use bookcast_core::{
    AnalyticsConfig, BigQueryClient, BookingSource, ConfigError, InMemoryBookingSource,
    ModelTrainingReport, MySqlBookingSource, ReqwestHttpClient, Statements,
};
use bookcast_warehouse::{DuckDbWarehouse, LocalWarehouseConfig, WarehouseClient};
use serde_json::Value;
use tracing::debug;

use crate::cli::{Backend, Cli, Command};
use crate::envelope::{Envelope, EnvelopeError, EnvelopeMeta};
use crate::error::CliError;

/// Project name for the local backend, which has no project level.
const LOCAL_PROJECT: &str = "local";

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    pub exit_code: u8,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
            exit_code: 0,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_error(mut self, error: EnvelopeError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn with_exit_code(mut self, exit_code: u8) -> Self {
        self.exit_code = exit_code;
        self
    }
}

/// Rendered envelope plus the process exit code it implies.
pub struct CommandOutput {
    pub envelope: Envelope<Value>,
    pub exit_code: u8,
}

/// Resolved configuration shared by every command.
pub struct Context {
    pub config: AnalyticsConfig,
    pub backend: Backend,
    source_csv: Option<std::path::PathBuf>,
}

impl Context {
    /// Config file, then process environment, then command-line flags.
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let mut config = AnalyticsConfig::load(cli.config.as_deref())?;
        config.apply_process_env()?;
        if let Some(url) = &cli.database_url {
            config.database_url = Some(url.clone());
        }
        if let Some(path) = &cli.local_db {
            config.local_db_path = path.clone();
        }
        Ok(Self {
            config,
            backend: cli.backend,
            source_csv: cli.source_csv.clone(),
        })
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            Backend::Bigquery => "bigquery",
            Backend::Local => "local",
        }
    }

    /// Connect to the selected warehouse and bind the table names to it.
    pub fn session(&self) -> Result<Session, CliError> {
        match self.backend {
            Backend::Bigquery => {
                let client =
                    BigQueryClient::from_config(&self.config, Arc::new(ReqwestHttpClient::new()))?;
                let dataset = self.config.dataset_ref(client.project_id())?;
                let statements = Statements::new(client.dialect(), dataset)?;
                Ok(Session {
                    warehouse: Box::new(client),
                    statements,
                })
            }
            Backend::Local => {
                let warehouse = DuckDbWarehouse::open(LocalWarehouseConfig::at(
                    self.config.local_db_path.clone(),
                ))?;
                debug!(path = %warehouse.db_path().display(), "opened local warehouse");
                let dataset = self.config.dataset_ref(LOCAL_PROJECT)?;
                let statements = Statements::new(warehouse.dialect(), dataset)?;
                Ok(Session {
                    warehouse: Box::new(warehouse),
                    statements,
                })
            }
        }
    }

    /// The booking store: a CSV export when given, else the MySQL database.
    pub async fn source(&self) -> Result<Box<dyn BookingSource>, CliError> {
        if let Some(path) = &self.source_csv {
            return Ok(Box::new(InMemoryBookingSource::from_csv_path(path)?));
        }
        let url = self
            .config
            .database_url
            .as_deref()
            .ok_or(ConfigError::MissingSource)?;
        Ok(Box::new(MySqlBookingSource::connect(url).await?))
    }

    pub fn source_kind(&self) -> &'static str {
        if self.source_csv.is_some() {
            "csv"
        } else if self.config.database_url.is_some() {
            "mysql"
        } else {
            "none"
        }
    }
}

pub struct Session {
    pub warehouse: Box<dyn WarehouseClient>,
    pub statements: Statements,
}

/// One warning per model that failed to train.
fn training_warnings(models: &[ModelTrainingReport]) -> Vec<String> {
    models
        .iter()
        .filter_map(|model| {
            model
                .error
                .as_ref()
                .map(|error| format!("training {} failed: {error}", model.model_name))
        })
        .collect()
}

pub async fn run(cli: &Cli) -> Result<CommandOutput, CliError> {
    let started = Instant::now();
    let context = Context::from_cli(cli)?;

    let (command, result) = match &cli.command {
        Command::Migrate(args) => ("migrate", migrate::run(args, &context).await?),
        Command::Setup(args) => ("setup", setup::run(args, &context).await?),
        Command::Forecast(args) => ("forecast", reports::forecast(args, &context).await?),
        Command::Metrics(args) => ("metrics", reports::metrics(args, &context).await?),
        Command::Trends(args) => ("trends", reports::trends(args, &context).await?),
        Command::Details(args) => ("details", reports::details(args, &context).await?),
        Command::Models => ("models", reports::models(&context).await?),
        Command::Overview(args) => ("overview", reports::overview(args, &context).await?),
        Command::Status => ("status", status::run(&context)?),
        Command::Sync(args) => ("sync", sync::run(args, &context).await?),
    };

    let CommandResult {
        data,
        warnings,
        errors,
        exit_code,
    } = result;

    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let mut meta = EnvelopeMeta::new(command, context.backend_label(), latency_ms);
    for warning in warnings {
        meta.push_warning(warning);
    }

    Ok(CommandOutput {
        envelope: Envelope { meta, data, errors },
        exit_code,
    })
}
