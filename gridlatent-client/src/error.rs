//! Error types for the scheduler client

use gridlatent_core::domain::job::JobControlAction;
use thiserror::Error;

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, DrmError>;

/// Errors reported by a DRMAA-style scheduler
#[derive(Debug, Error)]
pub enum DrmError {
    /// Contact string does not name a reachable session
    #[error("Invalid contact string: {0}")]
    InvalidContactString(String),

    /// Caller is not allowed to use the scheduler
    #[error("Authorization denied: {0}")]
    Authorization(String),

    /// Scheduler tooling or libraries are not available on this host
    #[error("DRM system initialization failed: {0}")]
    DrmsInit(String),

    /// Scheduler could not be reached
    #[error("DRM communication failure: {0}")]
    DrmCommunication(String),

    /// Operation requires a session that has not been opened, or was exited
    #[error("No active session")]
    NoActiveSession,

    /// A session is already open in this client
    #[error("A session is already active: {0}")]
    AlreadyActiveSession(String),

    /// Template was not issued by this session, or is incomplete
    #[error("Invalid job template: {0}")]
    InvalidJobTemplate(String),

    /// Job does not exist (anymore)
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// Scheduler rejected the request
    #[error("Denied by DRM: {0}")]
    DeniedByDrm(String),

    /// Scheduler is temporarily overloaded
    #[error("Try later: {0}")]
    TryLater(String),

    /// Control action does not apply to the job's current state
    #[error("Cannot {action} job {job_id} in its current state")]
    InconsistentState {
        action: JobControlAction,
        job_id: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DrmError {
    /// Check if this error means the job no longer exists
    pub fn is_invalid_job(&self) -> bool {
        matches!(self, Self::InvalidJob(_))
    }

    /// Check if this error is a connectivity or authorization failure
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::InvalidContactString(_)
                | Self::DrmsInit(_)
                | Self::Authorization(_)
                | Self::DrmCommunication(_)
                | Self::NoActiveSession
                | Self::AlreadyActiveSession(_)
        )
    }

    /// Check if retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TryLater(_) | Self::DrmCommunication(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(DrmError::InvalidJob("1".to_string()).is_invalid_job());
        assert!(!DrmError::Internal("x".to_string()).is_invalid_job());

        assert!(DrmError::NoActiveSession.is_connectivity());
        assert!(DrmError::InvalidContactString("x".to_string()).is_connectivity());
        assert!(!DrmError::InvalidJobTemplate("x".to_string()).is_connectivity());

        assert!(DrmError::TryLater("busy".to_string()).is_transient());
        assert!(!DrmError::DeniedByDrm("no".to_string()).is_transient());
    }

    #[test]
    fn test_inconsistent_state_message() {
        let err = DrmError::InconsistentState {
            action: JobControlAction::Release,
            job_id: "42".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot release job 42 in its current state");
    }
}
