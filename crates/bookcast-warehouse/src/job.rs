//! Asynchronous job handles and their observed states.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::WarehouseError;

/// Reference to a submitted warehouse job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobHandle {
    pub job_id: String,
    /// Region the job runs in; BigQuery requires it when polling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl JobHandle {
    #[must_use]
    pub fn new(job_id: impl Into<String>, location: Option<String>) -> Self {
        Self {
            job_id: job_id.into(),
            location,
        }
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.job_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Done,
}

impl JobState {
    /// Parse the state string reported by the remote job API.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "DONE" => Self::Done,
            "RUNNING" => Self::Running,
            _ => Self::Pending,
        }
    }
}

/// One observation of a job: its state plus the failure message once done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatus {
    #[must_use]
    pub fn running() -> Self {
        Self {
            state: JobState::Running,
            error: None,
        }
    }

    #[must_use]
    pub fn succeeded() -> Self {
        Self {
            state: JobState::Done,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: JobState::Done,
            error: Some(reason.into()),
        }
    }
}

/// Terminal result of waiting for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed { reason: String },
    TimedOut { elapsed_ms: u64 },
}

impl JobOutcome {
    #[must_use]
    pub fn timed_out(elapsed: Duration) -> Self {
        Self::TimedOut {
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Turn a non-successful outcome into an error attributed to `job`.
    ///
    /// # Errors
    /// Returns [`WarehouseError::JobFailed`] or [`WarehouseError::JobTimedOut`].
    pub fn into_result(self, job: &JobHandle) -> Result<(), WarehouseError> {
        match self {
            Self::Succeeded => Ok(()),
            Self::Failed { reason } => Err(WarehouseError::JobFailed {
                job_id: job.job_id.clone(),
                reason,
            }),
            Self::TimedOut { elapsed_ms } => Err(WarehouseError::JobTimedOut {
                job_id: job.job_id.clone(),
                elapsed_ms,
            }),
        }
    }
}

/// Whether an idempotent create made anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

/// A rejected row from a streaming insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub index: usize,
    pub reasons: Vec<String>,
}

/// Metadata about a trained model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}
