//! In-memory scheduler
//!
//! A DRMAA-like scheduler that lives entirely inside the process. Jobs are
//! never executed; they sit in a job table whose states follow the control
//! actions applied to them. Every call is recorded in a journal so tests
//! can assert on exactly what reached the scheduler.
//!
//! Like a real DRMAA implementation, a client allows a single active
//! session at a time.

use chrono::{DateTime, Utc};
use gridlatent_core::domain::job::{JobControlAction, JobId, JobState};
use gridlatent_core::domain::template::JobTemplate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::error::{DrmError, Result};
use crate::{DrmClient, DrmSession, check_template};

/// Contact assigned to new sessions unless one is requested
pub const DEFAULT_CONTACT: &str = "default contact";

/// A job known to the in-memory scheduler
#[derive(Debug, Clone)]
pub struct MemoryJob {
    pub template: JobTemplate,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    /// Contact of the active session, if any
    active: Option<String>,
    jobs: HashMap<JobId, MemoryJob>,
    next_id: u64,
    fixed_job_id: Option<JobId>,
    unreachable: bool,

    // Injected one-shot failures
    submit_failure: Option<DrmError>,
    control_failure: Option<DrmError>,

    // Journal
    connects: Vec<Option<String>>,
    submitted: Vec<JobTemplate>,
    controls: Vec<(JobId, JobControlAction)>,
}

/// In-process scheduler client
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone, Default)]
pub struct MemoryClient {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryClient {
    /// Creates an empty scheduler issuing sequential job ids ("1", "2", ...)
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every submission return the same job id
    pub fn with_job_id(self, job_id: impl Into<JobId>) -> Self {
        self.lock().fixed_job_id = Some(job_id.into());
        self
    }

    /// Makes `connect` fail with a communication error while set
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Fails the next `run_job` call with the given error
    pub fn fail_next_submit(&self, error: DrmError) {
        self.lock().submit_failure = Some(error);
    }

    /// Fails the next `control` call with the given error
    pub fn fail_next_control(&self, error: DrmError) {
        self.lock().control_failure = Some(error);
    }

    /// Forces a job into the given state, e.g. to simulate dispatch or
    /// completion on the grid
    pub fn set_job_state(&self, job_id: &JobId, state: JobState) -> Result<()> {
        let mut guard = self.lock();
        let job = guard
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| DrmError::InvalidJob(job_id.to_string()))?;
        job.state = state;
        Ok(())
    }

    /// Looks up a job in the job table
    pub fn job(&self, job_id: &JobId) -> Option<MemoryJob> {
        self.lock().jobs.get(job_id).cloned()
    }

    /// Contact requested by every `connect` call, in order
    pub fn connects(&self) -> Vec<Option<String>> {
        self.lock().connects.clone()
    }

    /// Every template passed to `run_job`, in order
    pub fn submitted(&self) -> Vec<JobTemplate> {
        self.lock().submitted.clone()
    }

    /// Every `control` call, in order
    pub fn controls(&self) -> Vec<(JobId, JobControlAction)> {
        self.lock().controls.clone()
    }

    /// Contact of the active session
    pub fn active_contact(&self) -> Option<String> {
        self.lock().active.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DrmClient for MemoryClient {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn connect(&self, contact: Option<&str>) -> Result<Arc<dyn DrmSession>> {
        let mut state = self.lock();
        state.connects.push(contact.map(str::to_string));

        if state.unreachable {
            return Err(DrmError::DrmCommunication(
                "in-memory scheduler is unreachable".to_string(),
            ));
        }

        if let Some(active) = &state.active {
            return Err(DrmError::AlreadyActiveSession(active.clone()));
        }

        let contact = match contact {
            Some(c) if c.trim().is_empty() => {
                return Err(DrmError::InvalidContactString(c.to_string()));
            }
            Some(c) => c.to_string(),
            None => DEFAULT_CONTACT.to_string(),
        };

        debug!("In-memory session opened: {}", contact);
        state.active = Some(contact.clone());

        Ok(Arc::new(MemorySession {
            contact,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Session on a [`MemoryClient`]
pub struct MemorySession {
    contact: String,
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySession {
    /// Locks the scheduler state, failing if this session was exited
    fn active_state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.active.as_deref() != Some(self.contact.as_str()) {
            return Err(DrmError::NoActiveSession);
        }
        Ok(state)
    }
}

impl DrmSession for MemorySession {
    fn contact(&self) -> &str {
        &self.contact
    }

    fn create_job_template(&self) -> Result<JobTemplate> {
        self.active_state()?;
        Ok(JobTemplate::blank(self.contact.clone()))
    }

    fn run_job(&self, template: &JobTemplate) -> Result<JobId> {
        let mut state = self.active_state()?;
        check_template(&self.contact, template)?;

        if template.uses_parametric_index() {
            return Err(DrmError::InvalidArgument(
                "parametric index placeholder outside a bulk job".to_string(),
            ));
        }

        state.submitted.push(template.clone());

        if let Some(err) = state.submit_failure.take() {
            return Err(err);
        }

        let job_id = if let Some(id) = state.fixed_job_id.clone() {
            id
        } else {
            state.next_id += 1;
            JobId::new(state.next_id.to_string())
        };

        state.jobs.insert(
            job_id.clone(),
            MemoryJob {
                template: template.clone(),
                state: JobState::QueuedActive,
                submitted_at: Utc::now(),
            },
        );

        debug!("In-memory job {} queued", job_id);
        Ok(job_id)
    }

    fn control(&self, job_id: &JobId, action: JobControlAction) -> Result<()> {
        let mut state = self.active_state()?;
        state.controls.push((job_id.clone(), action));

        if let Some(err) = state.control_failure.take() {
            return Err(err);
        }

        let current = match state.jobs.get(job_id) {
            Some(job) if !job.state.is_finished() => job.state,
            _ => return Err(DrmError::InvalidJob(job_id.to_string())),
        };

        if action == JobControlAction::Terminate {
            state.jobs.remove(job_id);
            debug!("In-memory job {} terminated", job_id);
            return Ok(());
        }

        let next = transition(current, action).ok_or_else(|| DrmError::InconsistentState {
            action,
            job_id: job_id.to_string(),
        })?;

        if let Some(job) = state.jobs.get_mut(job_id) {
            job.state = next;
        }

        Ok(())
    }

    fn job_status(&self, job_id: &JobId) -> Result<JobState> {
        let state = self.active_state()?;
        state
            .jobs
            .get(job_id)
            .map(|job| job.state)
            .ok_or_else(|| DrmError::InvalidJob(job_id.to_string()))
    }

    fn exit(&self) -> Result<()> {
        let mut state = self.active_state()?;
        state.active = None;
        debug!("In-memory session closed: {}", self.contact);
        Ok(())
    }
}

/// State reached by applying a hold/release/suspend/resume action
fn transition(state: JobState, action: JobControlAction) -> Option<JobState> {
    use JobControlAction::*;
    use JobState::*;

    match (action, state) {
        (Hold, QueuedActive) => Some(UserOnHold),
        (Hold, SystemOnHold) => Some(UserSystemOnHold),
        (Release, UserOnHold) => Some(QueuedActive),
        (Release, UserSystemOnHold) => Some(SystemOnHold),
        (Suspend, Running) => Some(UserSuspended),
        (Suspend, SystemSuspended) => Some(UserSystemSuspended),
        (Resume, UserSuspended) => Some(Running),
        (Resume, UserSystemSuspended) => Some(SystemSuspended),
        _ => None,
    }
}
