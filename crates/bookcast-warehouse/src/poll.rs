//! Waiting on asynchronous warehouse jobs.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::job::{JobHandle, JobOutcome, JobState, JobStatus};
use crate::WarehouseError;

/// Spacing between successive job status checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed { delay: Duration },
    /// `base * factor^attempt`, capped at `max`, optionally spread by ±25%.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Backoff {
    /// Delay before the status check following `attempt` (0-based).
    #[must_use]
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = (base.as_secs_f64() * factor.powi(exponent)).min(max.as_secs_f64());
                let delay = Duration::from_secs_f64(seconds.max(0.0));
                if !jitter {
                    return delay;
                }
                let spread = 0.75 + fastrand::f64() * 0.5;
                delay.mul_f64(spread).min(max)
            }
        }
    }
}

/// How long and how often to poll a job before giving up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub backoff: Backoff,
    /// Ceiling on total wall time spent waiting.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
                factor: 1.5,
                max: Duration::from_secs(10),
                jitter: true,
            },
            timeout: Duration::from_secs(15 * 60),
        }
    }
}

impl PollPolicy {
    /// Fixed-interval polling, mostly useful for tests and local backends.
    #[must_use]
    pub fn fixed(delay: Duration, timeout: Duration) -> Self {
        Self {
            backoff: Backoff::Fixed { delay },
            timeout,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Poll `fetch_status` until the job reports done or `policy.timeout` elapses.
///
/// A done job with an error message yields [`JobOutcome::Failed`]; transport errors
/// from `fetch_status` abort the wait and propagate.
///
/// # Errors
/// Returns whatever error `fetch_status` produced.
pub async fn poll_job<F, Fut>(
    job: &JobHandle,
    policy: &PollPolicy,
    mut fetch_status: F,
) -> Result<JobOutcome, WarehouseError>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<JobStatus, WarehouseError>> + Send,
{
    let started = Instant::now();
    let mut attempt = 0_u32;

    loop {
        let status = fetch_status().await?;
        if status.state == JobState::Done {
            return Ok(match status.error {
                Some(reason) => JobOutcome::Failed { reason },
                None => JobOutcome::Succeeded,
            });
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            return Ok(JobOutcome::timed_out(elapsed));
        }

        let delay = policy
            .backoff
            .delay(attempt)
            .min(policy.timeout.saturating_sub(elapsed));
        debug!(job_id = %job, state = ?status.state, delay_ms = delay.as_millis() as u64, "job not done yet");
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}
