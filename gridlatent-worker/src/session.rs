//! Scheduler session
//!
//! Holds the single scheduler session shared by every latent worker in the
//! process. The session is opened lazily by whichever worker needs it
//! first and kept until the process exits.
//!
//! Construct one [`SchedulerSession`] at startup and hand an `Arc` of it to
//! each worker.

use gridlatent_client::{DrmClient, DrmError, DrmSession};
use gridlatent_core::domain::job::{JobControlAction, JobId};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Outcome of a successful termination request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The scheduler accepted the terminate action
    Terminated,

    /// The job had already finished or been removed
    AlreadyGone,
}

/// Process-wide scheduler session
pub struct SchedulerSession {
    client: Arc<dyn DrmClient>,

    /// Open session; first opener wins
    handle: Mutex<Option<Arc<dyn DrmSession>>>,
}

impl SchedulerSession {
    /// Creates an unopened session on the given scheduler client
    pub fn new(client: Arc<dyn DrmClient>) -> Self {
        Self {
            client,
            handle: Mutex::new(None),
        }
    }

    /// Backend name of the underlying client
    pub fn backend(&self) -> &'static str {
        self.client.backend()
    }

    /// Returns the open session, opening it on first use
    ///
    /// The first caller decides which session is used: `contact` attaches
    /// to an existing scheduler session, `None` creates a new one. Once a
    /// session is open, `contact` is ignored.
    ///
    /// This blocks while the scheduler is contacted. Concurrent first-time
    /// callers wait for the one that is connecting.
    pub fn acquire(&self, contact: Option<&str>) -> Result<Arc<dyn DrmSession>, DrmError> {
        let mut handle = self.lock();

        if let Some(session) = handle.as_ref() {
            return Ok(Arc::clone(session));
        }

        let session = self.client.connect(contact)?;
        match contact {
            Some(_) => info!(
                "Connected to existing {} session {}",
                self.client.backend(),
                session.contact()
            ),
            None => info!(
                "Created a new {} session {}",
                self.client.backend(),
                session.contact()
            ),
        }

        *handle = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Contact of the open session, if one has been opened
    pub fn contact(&self) -> Option<String> {
        self.lock()
            .as_ref()
            .map(|session| session.contact().to_string())
    }

    /// Returns true once a session has been opened
    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Closes the open session, if any
    ///
    /// Only meant for process shutdown; a later `acquire` opens a new one.
    pub fn exit(&self) -> Result<(), DrmError> {
        let session = self.lock().take();
        if let Some(session) = session {
            info!("Closing {} session {}", self.client.backend(), session.contact());
            session.exit()?;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<dyn DrmSession>>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Terminates a job, treating a job that no longer exists as success
pub fn terminate_job(
    session: &dyn DrmSession,
    job_id: &JobId,
) -> Result<TerminateOutcome, DrmError> {
    match session.control(job_id, JobControlAction::Terminate) {
        Ok(()) => Ok(TerminateOutcome::Terminated),
        Err(e) if e.is_invalid_job() => Ok(TerminateOutcome::AlreadyGone),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridlatent_client::memory::{DEFAULT_CONTACT, MemoryClient};

    #[test]
    fn test_acquire_opens_once() {
        let client = MemoryClient::new();
        let session = SchedulerSession::new(Arc::new(client.clone()));
        assert!(!session.is_open());
        assert_eq!(session.contact(), None);

        let first = session.acquire(None).unwrap();
        let second = session.acquire(None).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(client.connects().len(), 1);
        assert_eq!(session.contact().as_deref(), Some(DEFAULT_CONTACT));
    }

    #[test]
    fn test_first_contact_wins() {
        let client = MemoryClient::new();
        let session = SchedulerSession::new(Arc::new(client.clone()));

        let first = session.acquire(Some("first contact")).unwrap();
        let second = session.acquire(Some("second contact")).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(session.contact().as_deref(), Some("first contact"));
        assert_eq!(client.connects(), vec![Some("first contact".to_string())]);
    }

    #[test]
    fn test_failed_connect_is_not_cached() {
        let client = MemoryClient::new();
        let session = SchedulerSession::new(Arc::new(client.clone()));

        client.set_unreachable(true);
        assert!(session.acquire(None).is_err());
        assert!(!session.is_open());

        client.set_unreachable(false);
        assert!(session.acquire(None).is_ok());
        assert_eq!(client.connects().len(), 2);
    }

    #[test]
    fn test_exit_closes_session() {
        let client = MemoryClient::new();
        let session = SchedulerSession::new(Arc::new(client.clone()));
        session.acquire(None).unwrap();

        session.exit().unwrap();
        assert!(!session.is_open());
        assert_eq!(client.active_contact(), None);

        // Nothing to close the second time
        session.exit().unwrap();
    }

    #[test]
    fn test_terminate_job_outcomes() {
        let client = MemoryClient::new().with_job_id("build_id");
        let session = SchedulerSession::new(Arc::new(client.clone()));
        let handle = session.acquire(None).unwrap();

        let mut template = handle.create_job_template().unwrap();
        template.remote_command = "cmd".to_string();
        let job_id = handle.run_job(&template).unwrap();

        assert_eq!(
            terminate_job(handle.as_ref(), &job_id).unwrap(),
            TerminateOutcome::Terminated
        );
        assert_eq!(
            terminate_job(handle.as_ref(), &job_id).unwrap(),
            TerminateOutcome::AlreadyGone
        );

        client.fail_next_control(DrmError::Internal("boom".to_string()));
        assert!(terminate_job(handle.as_ref(), &job_id).is_err());
    }
}
