//! Async job polling
//!
//! Some upstreams accept a generation request and return a task id to
//! poll. This module drives that loop: probe the task on a fixed
//! interval until it settles or the attempt budget runs out.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::utils::error::{RelayError, RelayResult};

/// Polling schedule
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 20,
        }
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone)]
pub enum JobState {
    /// Still pending or running
    Running,
    /// Status string the probe did not recognize; terminal
    Unknown(String),
    /// Finished with a result payload
    Succeeded(serde_json::Value),
    /// Finished with an upstream failure
    Failed {
        code: Option<String>,
        message: String,
    },
    Canceled,
}

/// Poll a job until it settles.
///
/// The probe receives the 1-based attempt number. Transport errors from
/// the probe abort the loop immediately.
pub async fn poll_job<F, Fut>(config: PollConfig, mut probe: F) -> RelayResult<serde_json::Value>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RelayResult<JobState>>,
{
    for attempt in 1..=config.max_attempts {
        tokio::time::sleep(config.interval).await;

        match probe(attempt).await? {
            JobState::Succeeded(result) => {
                debug!("Job succeeded after {} attempts", attempt);
                return Ok(result);
            }
            JobState::Failed { code, message } => {
                return Err(RelayError::Upstream {
                    status: 500,
                    error_type: "upstream_error".to_string(),
                    message,
                    code,
                });
            }
            JobState::Canceled => {
                return Err(RelayError::Upstream {
                    status: 500,
                    error_type: "upstream_error".to_string(),
                    message: "task was canceled upstream".to_string(),
                    code: Some("task_canceled".to_string()),
                });
            }
            JobState::Running => {
                debug!("Job still running (attempt {})", attempt);
            }
            JobState::Unknown(status) => {
                return Err(RelayError::BadResponse(format!(
                    "job ended in unrecognized state {status:?}"
                )));
            }
        }
    }

    Err(RelayError::Timeout(format!(
        "job did not settle within {} attempts",
        config.max_attempts
    )))
}
