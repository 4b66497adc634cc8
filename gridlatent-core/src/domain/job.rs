//! Job domain types
//!
//! Identifiers, states and control actions for jobs managed by a
//! DRMAA-style grid scheduler.

use serde::{Deserialize, Serialize};

/// Scheduler-assigned job identifier
///
/// Opaque to everything but the scheduler that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// State of a job as reported by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// The scheduler cannot tell what state the job is in
    Undetermined,
    /// Queued and eligible to run
    QueuedActive,
    SystemOnHold,
    UserOnHold,
    UserSystemOnHold,
    Running,
    SystemSuspended,
    UserSuspended,
    UserSystemSuspended,
    /// Finished normally
    Done,
    /// Finished abnormally or was removed before completion
    Failed,
}

impl JobState {
    /// Returns true once the job can no longer change state
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    pub fn is_on_hold(&self) -> bool {
        matches!(
            self,
            JobState::SystemOnHold | JobState::UserOnHold | JobState::UserSystemOnHold
        )
    }

    pub fn is_suspended(&self) -> bool {
        matches!(
            self,
            JobState::SystemSuspended | JobState::UserSuspended | JobState::UserSystemSuspended
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Undetermined => "undetermined",
            JobState::QueuedActive => "queued_active",
            JobState::SystemOnHold => "system_on_hold",
            JobState::UserOnHold => "user_on_hold",
            JobState::UserSystemOnHold => "user_system_on_hold",
            JobState::Running => "running",
            JobState::SystemSuspended => "system_suspended",
            JobState::UserSuspended => "user_suspended",
            JobState::UserSystemSuspended => "user_system_suspended",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Action passed to the scheduler's job control call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobControlAction {
    Suspend,
    Resume,
    Hold,
    Release,
    Terminate,
}

impl JobControlAction {
    pub const ALL: [JobControlAction; 5] = [
        JobControlAction::Suspend,
        JobControlAction::Resume,
        JobControlAction::Hold,
        JobControlAction::Release,
        JobControlAction::Terminate,
    ];
}

impl std::fmt::Display for JobControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobControlAction::Suspend => "suspend",
            JobControlAction::Resume => "resume",
            JobControlAction::Hold => "hold",
            JobControlAction::Release => "release",
            JobControlAction::Terminate => "terminate",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_display() {
        let id = JobId::from("4711");
        assert_eq!(id.to_string(), "4711");
        assert_eq!(id.as_str(), "4711");
    }

    #[test]
    fn test_finished_states() {
        assert!(JobState::Done.is_finished());
        assert!(JobState::Failed.is_finished());
        assert!(!JobState::Running.is_finished());
        assert!(!JobState::QueuedActive.is_finished());
        assert!(!JobState::Undetermined.is_finished());
    }

    #[test]
    fn test_hold_and_suspend_groups() {
        assert!(JobState::UserSystemOnHold.is_on_hold());
        assert!(!JobState::UserSystemOnHold.is_suspended());
        assert!(JobState::SystemSuspended.is_suspended());
        assert!(!JobState::Running.is_on_hold());
    }

    #[test]
    fn test_control_action_names() {
        let names: Vec<String> = JobControlAction::ALL.iter().map(|a| a.to_string()).collect();
        assert_eq!(
            names,
            vec!["suspend", "resume", "hold", "release", "terminate"]
        );
    }
}
