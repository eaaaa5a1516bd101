//! Analytics configuration, built once at startup and passed by reference.
//!
//! Layering, lowest to highest precedence: built-in defaults, an optional TOML
//! file, environment variables, then whatever the CLI sets explicitly.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bookcast_warehouse::{Backoff, DatasetRef, PollPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_DATASET: &str = "booking_analytics";
pub const DEFAULT_CREDENTIALS_PATH: &str = "storage/google-credentials.json";
pub const DEFAULT_EXPORT_PATH: &str = "bookings_export.csv";
pub const DEFAULT_LOCAL_DB_PATH: &str = "storage/analytics.duckdb";
/// Project id shipped in example credentials; never a real project.
pub const PLACEHOLDER_PROJECT_ID: &str = "your-project-id";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("credentials file not found at {0}")]
    MissingCredentials(PathBuf),

    #[error("credentials file {path} is not a usable service account key: {message}")]
    InvalidCredentials { path: PathBuf, message: String },

    #[error(
        "no project id: set project_id in the credentials file, GOOGLE_CLOUD_PROJECT_ID, or the config file"
    )]
    MissingProjectId,

    #[error("project id is still the placeholder 'your-project-id'")]
    PlaceholderProjectId,

    #[error("analytics is disabled in the configuration")]
    Disabled,

    #[error("no source database configured: set DATABASE_URL, --database-url, or --source-csv")]
    MissingSource,

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Job polling knobs, in config-file units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollSettings {
    pub initial_interval_ms: u64,
    pub growth_factor: f64,
    pub max_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1_000,
            growth_factor: 1.5,
            max_interval_ms: 10_000,
            timeout_secs: 15 * 60,
        }
    }
}

impl PollSettings {
    #[must_use]
    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.initial_interval_ms.max(1)),
                factor: self.growth_factor.max(1.0),
                max: Duration::from_millis(self.max_interval_ms.max(self.initial_interval_ms)),
                jitter: true,
            },
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForecastSettings {
    pub booking_horizon_days: u32,
    pub revenue_horizon_days: u32,
    pub confidence_level: f64,
    pub trend_days: u32,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            booking_horizon_days: 30,
            revenue_horizon_days: 30,
            confidence_level: 0.95,
            trend_days: 10,
        }
    }
}

/// Below these the export still succeeds but forecasts are unlikely to be useful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadinessThresholds {
    pub min_data_days: usize,
    pub min_bookings: usize,
}

impl Default for ReadinessThresholds {
    fn default() -> Self {
        Self {
            min_data_days: 90,
            min_bookings: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub project_id: Option<String>,
    pub dataset: String,
    pub credentials_path: PathBuf,
    /// BigQuery location, e.g. `US` or `asia-southeast1`.
    pub location: Option<String>,
    #[serde(skip_serializing)]
    pub database_url: Option<String>,
    /// Pre-issued bearer token used instead of the service-account key.
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    /// Where `Export` writes its CSV copy; `None` keeps it in memory only.
    pub export_path: Option<PathBuf>,
    pub local_db_path: PathBuf,
    pub poll: PollSettings,
    pub forecast: ForecastSettings,
    pub readiness: ReadinessThresholds,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            project_id: None,
            dataset: String::from(DEFAULT_DATASET),
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            location: None,
            database_url: None,
            access_token: None,
            export_path: Some(PathBuf::from(DEFAULT_EXPORT_PATH)),
            local_db_path: PathBuf::from(DEFAULT_LOCAL_DB_PATH),
            poll: PollSettings::default(),
            forecast: ForecastSettings::default(),
            readiness: ReadinessThresholds::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CredentialsProject {
    project_id: Option<String>,
}

impl AnalyticsConfig {
    /// Parse a TOML document; absent keys keep their defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Defaults, overlaid by the TOML file at `path` when given.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&content, path)
            }
        }
    }

    /// Overlay values from an environment lookup.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] for an unparsable boolean.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("BOOKCAST_ENABLED") {
            self.enabled = parse_bool("BOOKCAST_ENABLED", &value)?;
        }
        if let Some(value) = get("GOOGLE_CLOUD_PROJECT_ID") {
            self.project_id = Some(value);
        }
        if let Some(value) = get("BOOKCAST_DATASET") {
            self.dataset = value;
        }
        if let Some(value) = get("BOOKCAST_CREDENTIALS") {
            self.credentials_path = PathBuf::from(value);
        }
        if let Some(value) = get("BOOKCAST_LOCATION") {
            self.location = Some(value);
        }
        if let Some(value) = get("DATABASE_URL") {
            self.database_url = Some(value);
        }
        if let Some(value) = get("BOOKCAST_ACCESS_TOKEN") {
            self.access_token = Some(value);
        }
        if let Some(value) = get("BOOKCAST_EXPORT_PATH") {
            self.export_path = Some(PathBuf::from(value));
        }
        if let Some(value) = get("BOOKCAST_LOCAL_DB") {
            self.local_db_path = PathBuf::from(value);
        }
        Ok(())
    }

    /// # Errors
    /// See [`AnalyticsConfig::apply_env`].
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    #[must_use]
    pub fn credentials_present(&self) -> bool {
        self.credentials_path.is_file()
    }

    /// The project to address: the credentials file's `project_id` wins,
    /// then the configured value.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingProjectId`] or [`ConfigError::PlaceholderProjectId`].
    pub fn resolve_project_id(&self) -> Result<String, ConfigError> {
        let from_credentials = self.project_id_from_credentials()?;
        let project_id = from_credentials
            .or_else(|| self.project_id.clone())
            .ok_or(ConfigError::MissingProjectId)?;
        if project_id == PLACEHOLDER_PROJECT_ID {
            return Err(ConfigError::PlaceholderProjectId);
        }
        Ok(project_id)
    }

    fn project_id_from_credentials(&self) -> Result<Option<String>, ConfigError> {
        if !self.credentials_present() {
            return Ok(None);
        }
        let content =
            fs::read_to_string(&self.credentials_path).map_err(|source| ConfigError::Read {
                path: self.credentials_path.clone(),
                source,
            })?;
        let parsed: CredentialsProject =
            serde_json::from_str(&content).map_err(|error| ConfigError::InvalidCredentials {
                path: self.credentials_path.clone(),
                message: error.to_string(),
            })?;
        Ok(parsed.project_id.filter(|id| !id.trim().is_empty()))
    }

    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] when project or dataset are not valid identifiers.
    pub fn dataset_ref(&self, project_id: &str) -> Result<DatasetRef, ConfigError> {
        DatasetRef::new(project_id, self.dataset.clone()).map_err(|error| {
            ConfigError::InvalidValue {
                key: String::from("dataset"),
                message: error.to_string(),
            }
        })
    }

    #[must_use]
    pub fn readiness(&self) -> ReadinessReport {
        let project_id = self.resolve_project_id().ok();
        let credentials_file = self.credentials_present();
        ReadinessReport {
            enabled: self.enabled,
            configured: credentials_file && project_id.is_some(),
            credentials_file,
            project_id,
            dataset: self.dataset.clone(),
        }
    }
}

/// Whether BigQuery analytics can run with the current configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub enabled: bool,
    pub configured: bool,
    pub credentials_file: bool,
    pub project_id: Option<String>,
    pub dataset: String,
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}
