//! Worker error types
//!
//! Every variant carries the worker name and, when known, the scheduler
//! job id and session contact, so a failed substantiate or insubstantiate
//! cycle can be traced back to a job on the grid.

use gridlatent_client::DrmError;
use gridlatent_core::domain::job::JobId;
use thiserror::Error;

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Errors surfaced to the orchestrator by a latent worker
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Worker cannot be built from its configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Opening or using the scheduler session failed
    #[error(
        "Worker {worker}: scheduler session ({contact}) unavailable{job}: {source}",
        job = for_job(.job_id)
    )]
    Session {
        worker: String,
        contact: String,
        job_id: Option<JobId>,
        #[source]
        source: DrmError,
    },

    /// The scheduler refused the job
    #[error("Worker {worker}: submission to {contact} failed: {source}")]
    Submit {
        worker: String,
        contact: String,
        #[source]
        source: DrmError,
    },

    /// Terminating the job failed for a reason other than the job being gone
    #[error("Worker {worker}: terminating {contact} job {job_id} failed: {source}")]
    Terminate {
        worker: String,
        contact: String,
        job_id: JobId,
        #[source]
        source: DrmError,
    },

    /// Querying the job state failed
    #[error("Worker {worker}: status of {contact} job {job_id} unavailable: {source}")]
    Status {
        worker: String,
        contact: String,
        job_id: JobId,
        #[source]
        source: DrmError,
    },

    /// `start` was called while a job is still recorded
    #[error("Worker {worker}: job {job_id} is still active")]
    AlreadyRunning { worker: String, job_id: JobId },

    /// A blocking pool task panicked or was cancelled
    #[error("{}", describe_task_failure(.worker, .job_id, .message))]
    Pool {
        worker: Option<String>,
        job_id: Option<JobId>,
        message: String,
    },
}

fn for_job(job_id: &Option<JobId>) -> String {
    job_id
        .as_ref()
        .map(|id| format!(" for job {}", id))
        .unwrap_or_default()
}

fn describe_task_failure(worker: &Option<String>, job_id: &Option<JobId>, message: &str) -> String {
    match worker {
        Some(worker) => format!(
            "Worker {}: scheduler call{} failed: {}",
            worker,
            for_job(job_id),
            message
        ),
        None => format!("Blocking task failed: {}", message),
    }
}

impl WorkerError {
    /// A pool failure not yet tied to a worker
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool {
            worker: None,
            job_id: None,
            message: message.into(),
        }
    }

    /// Attributes a pool failure to the worker (and job) that ran the task
    ///
    /// Other variants already carry their context and are returned as is.
    pub fn for_worker(self, name: &str, job: Option<&JobId>) -> Self {
        match self {
            Self::Pool {
                worker: None,
                job_id,
                message,
            } => Self::Pool {
                worker: Some(name.to_string()),
                job_id: job_id.or_else(|| job.cloned()),
                message,
            },
            other => other,
        }
    }

    /// The scheduler error behind this failure, if any
    pub fn drm_error(&self) -> Option<&DrmError> {
        match self {
            Self::Session { source, .. }
            | Self::Submit { source, .. }
            | Self::Terminate { source, .. }
            | Self::Status { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Check if this error is a configuration error
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminate_message_includes_context() {
        let err = WorkerError::Terminate {
            worker: "bot".to_string(),
            contact: "default contact".to_string(),
            job_id: JobId::from("build_id"),
            source: DrmError::Internal("boom".to_string()),
        };

        let message = err.to_string();
        assert!(message.contains("bot"));
        assert!(message.contains("build_id"));
        assert!(message.contains("default contact"));
        assert!(matches!(err.drm_error(), Some(DrmError::Internal(_))));
    }

    #[test]
    fn test_session_message_includes_job() {
        let err = WorkerError::Session {
            worker: "bot".to_string(),
            contact: "default contact".to_string(),
            job_id: Some(JobId::from("build_id")),
            source: DrmError::NoActiveSession,
        };
        assert_eq!(
            err.to_string(),
            "Worker bot: scheduler session (default contact) unavailable for job build_id: No active session"
        );

        let err = WorkerError::Session {
            worker: "bot".to_string(),
            contact: "default contact".to_string(),
            job_id: None,
            source: DrmError::NoActiveSession,
        };
        assert_eq!(
            err.to_string(),
            "Worker bot: scheduler session (default contact) unavailable: No active session"
        );
    }

    #[test]
    fn test_pool_error_for_worker() {
        let err = WorkerError::pool("task 3 panicked");
        assert_eq!(err.to_string(), "Blocking task failed: task 3 panicked");

        let err = err.for_worker("bot", Some(&JobId::from("42")));
        assert_eq!(
            err.to_string(),
            "Worker bot: scheduler call for job 42 failed: task 3 panicked"
        );

        let config = WorkerError::Config("x".to_string()).for_worker("bot", None);
        assert!(config.is_config());
    }

    #[test]
    fn test_config_error() {
        let err = WorkerError::Config("no scheduler".to_string());
        assert!(err.is_config());
        assert!(err.drm_error().is_none());
    }
}
