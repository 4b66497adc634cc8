//! Gridlatent Scheduler Client
//!
//! The capability the latent worker needs from a DRMAA-style grid
//! scheduler: open (or attach to) a session, hand out job templates,
//! submit jobs, control them and query their state.
//!
//! Every call on these traits is blocking. Async callers are expected to
//! run them on a blocking pool rather than on their event loop.
//!
//! Two backends ship with this crate:
//! - [`memory::MemoryClient`]: an in-process scheduler, used for tests and
//!   dry runs
//! - [`grid_engine::GridEngineClient`]: drives a Grid Engine cell through
//!   its `qsub`/`qdel`/`qstat` command line tools
//!
//! # Example
//!
//! ```
//! use gridlatent_client::{DrmClient, memory::MemoryClient};
//! use gridlatent_core::domain::job::JobControlAction;
//!
//! # fn main() -> gridlatent_client::Result<()> {
//! let client = MemoryClient::new();
//! let session = client.connect(None)?;
//!
//! let mut template = session.create_job_template()?;
//! template.remote_command = "run-worker.sh".to_string();
//!
//! let job_id = session.run_job(&template)?;
//! session.control(&job_id, JobControlAction::Terminate)?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod grid_engine;
pub mod memory;

// Re-export commonly used types
pub use error::{DrmError, Result};

use gridlatent_core::domain::job::{JobControlAction, JobId, JobState};
use gridlatent_core::domain::template::JobTemplate;
use std::sync::Arc;

/// Entry point into a scheduler: opens sessions
pub trait DrmClient: Send + Sync {
    /// Short backend name used in logs (e.g. "memory", "grid-engine")
    fn backend(&self) -> &'static str;

    /// Opens a session with the scheduler
    ///
    /// # Arguments
    /// * `contact` - Contact string of an existing session to attach to,
    ///   or `None` to create a new one
    ///
    /// # Returns
    /// The session handle. Its [`DrmSession::contact`] is the resolved
    /// contact string, which may be assigned by the scheduler.
    fn connect(&self, contact: Option<&str>) -> Result<Arc<dyn DrmSession>>;
}

/// An open session with the scheduler
pub trait DrmSession: Send + Sync {
    /// Contact string identifying this session
    fn contact(&self) -> &str;

    /// Returns a blank job template bound to this session
    fn create_job_template(&self) -> Result<JobTemplate>;

    /// Submits a job
    ///
    /// Fails with [`DrmError::InvalidJobTemplate`] if the template was not
    /// issued by this session or has no remote command.
    fn run_job(&self, template: &JobTemplate) -> Result<JobId>;

    /// Applies a control action to a job
    ///
    /// Fails with [`DrmError::InvalidJob`] if the job no longer exists.
    fn control(&self, job_id: &JobId, action: JobControlAction) -> Result<()>;

    /// Queries the current state of a job
    fn job_status(&self, job_id: &JobId) -> Result<JobState>;

    /// Closes the session; every later call fails with
    /// [`DrmError::NoActiveSession`]
    fn exit(&self) -> Result<()>;
}

/// Checks that a template may be submitted through the session with the
/// given contact
pub(crate) fn check_template(contact: &str, template: &JobTemplate) -> Result<()> {
    if template.origin() != contact {
        return Err(DrmError::InvalidJobTemplate(format!(
            "template was issued by session '{}', not '{}'",
            template.origin(),
            contact
        )));
    }

    if template.remote_command.trim().is_empty() {
        return Err(DrmError::InvalidJobTemplate(
            "remote command is not set".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_template_foreign_origin() {
        let mut template = JobTemplate::blank("other");
        template.remote_command = "cmd".to_string();

        let err = check_template("mine", &template).unwrap_err();
        assert!(matches!(err, DrmError::InvalidJobTemplate(_)));
    }

    #[test]
    fn test_check_template_missing_command() {
        let template = JobTemplate::blank("mine");
        assert!(check_template("mine", &template).is_err());
    }

    #[test]
    fn test_check_template_valid() {
        let mut template = JobTemplate::blank("mine");
        template.remote_command = "run-worker.sh".to_string();
        assert!(check_template("mine", &template).is_ok());
    }
}
