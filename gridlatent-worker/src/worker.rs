//! DRMAA latent worker
//!
//! A latent worker whose process is started as a job on a grid scheduler.
//! When the orchestrator asks for the worker, its job is queued with the
//! scheduler for dispatch to some execute node, where the worker process
//! starts and attaches to the orchestrator. When the orchestrator releases
//! the worker, the job is terminated.
//!
//! State per worker is a single optional job id: present from a successful
//! submission until the following termination completes.

use async_trait::async_trait;
use gridlatent_client::DrmSession;
use gridlatent_core::domain::job::{JobId, JobState};
use gridlatent_core::domain::template::JobTemplate;
use gridlatent_core::domain::worker::{BuildContext, WorkerIdentity};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info};

use crate::error::{Result, WorkerError};
use crate::latent::LatentWorker;
use crate::pool::BlockingPool;
use crate::session::{SchedulerSession, TerminateOutcome, terminate_job};

/// Shown in errors raised before any session contact is known
const NO_CONTACT: &str = "<new session>";

/// Optional job template settings applied at build time
#[derive(Debug, Clone, Default)]
pub struct JobSettings {
    /// Arguments passed to the start command
    pub args: Vec<String>,

    /// Job name on the grid; defaults to the worker name
    pub job_name: Option<String>,

    /// Scheduler-native submission options
    pub native_specification: Option<String>,

    pub working_directory: Option<String>,
    pub output_path: Option<String>,
    pub error_path: Option<String>,
    pub join_files: bool,
    pub env: BTreeMap<String, String>,
}

impl JobSettings {
    fn apply(self, template: &mut JobTemplate, worker_name: &str) {
        template.args = self.args;
        template.job_name = Some(self.job_name.unwrap_or_else(|| worker_name.to_string()));
        template.native_specification = self.native_specification;
        template.working_directory = self.working_directory;
        template.output_path = self.output_path;
        template.error_path = self.error_path;
        template.join_files = self.join_files;
        template.env = self.env;
    }
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No job was recorded; the scheduler was not contacted
    NotRunning,

    /// The job was terminated
    Terminated,

    /// The job had already finished or been removed
    AlreadyGone,
}

impl From<TerminateOutcome> for StopOutcome {
    fn from(outcome: TerminateOutcome) -> Self {
        match outcome {
            TerminateOutcome::Terminated => StopOutcome::Terminated,
            TerminateOutcome::AlreadyGone => StopOutcome::AlreadyGone,
        }
    }
}

/// Job recorded between a successful submission and its termination
#[derive(Debug, Clone)]
struct ActiveJob {
    id: JobId,

    /// Contact of the session the job was submitted through
    contact: String,
}

/// State shared with the blocking pool tasks
struct Inner {
    identity: WorkerIdentity,

    /// Contact to attach to if this worker opens the session
    requested_contact: Option<String>,

    session: Arc<SchedulerSession>,
    template: JobTemplate,
    job: Mutex<Option<ActiveJob>>,
}

impl Inner {
    fn name(&self) -> &str {
        &self.identity.name
    }

    fn job(&self) -> MutexGuard<'_, Option<ActiveJob>> {
        self.job.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_job(&self) -> Option<JobId> {
        self.job().as_ref().map(|job| job.id.clone())
    }

    fn clear_job(&self) {
        *self.job() = None;
    }

    /// Contact to report in logs and errors
    ///
    /// A recorded job keeps the contact it was submitted through, even if
    /// the session has since gone away.
    fn contact_label(&self) -> String {
        let recorded = self.job().as_ref().map(|job| job.contact.clone());
        recorded
            .or_else(|| self.session.contact())
            .or_else(|| self.requested_contact.clone())
            .unwrap_or_else(|| NO_CONTACT.to_string())
    }

    fn acquire(&self, job_id: Option<&JobId>) -> Result<Arc<dyn DrmSession>> {
        self.session
            .acquire(self.requested_contact.as_deref())
            .map_err(|source| WorkerError::Session {
                worker: self.name().to_string(),
                contact: self.contact_label(),
                job_id: job_id.cloned(),
                source,
            })
    }

    fn submit(&self) -> Result<JobId> {
        let session = self.acquire(None)?;

        let job_id = session
            .run_job(&self.template)
            .map_err(|source| WorkerError::Submit {
                worker: self.name().to_string(),
                contact: session.contact().to_string(),
                source,
            })?;

        *self.job() = Some(ActiveJob {
            id: job_id.clone(),
            contact: session.contact().to_string(),
        });
        info!("{} job {} queued ({})", session.contact(), job_id, self.name());

        Ok(job_id)
    }

    fn terminate(&self, job_id: &JobId) -> Result<TerminateOutcome> {
        let contact = self.contact_label();

        let result = self.acquire(Some(job_id)).and_then(|session| {
            terminate_job(session.as_ref(), job_id).map_err(|source| WorkerError::Terminate {
                worker: self.name().to_string(),
                contact: contact.clone(),
                job_id: job_id.clone(),
                source,
            })
        });

        // Cleared even on failure, so a later stop is a no-op
        self.clear_job();

        match &result {
            Ok(TerminateOutcome::Terminated) => {
                info!("Stopped {} job {} ({})", contact, job_id, self.name());
            }
            Ok(TerminateOutcome::AlreadyGone) => {
                info!(
                    "{} job {} is no longer valid ({})",
                    contact,
                    job_id,
                    self.name()
                );
            }
            Err(e) => self.log_terminate_error(&contact, job_id, e),
        }

        result
    }

    fn log_terminate_error(&self, contact: &str, job_id: &JobId, e: &WorkerError) {
        error!(
            "Terminate error for {} job {} ({}): {}",
            contact,
            job_id,
            self.name(),
            e
        );
    }

    fn status(&self, job_id: &JobId) -> Result<JobState> {
        let session = self.acquire(Some(job_id))?;
        session
            .job_status(job_id)
            .map_err(|source| WorkerError::Status {
                worker: self.name().to_string(),
                contact: session.contact().to_string(),
                job_id: job_id.clone(),
                source,
            })
    }
}

/// Latent worker started through a DRMAA-style scheduler
pub struct DrmLatentWorker {
    inner: Arc<Inner>,
    pool: BlockingPool,

    /// Serializes start and stop on this worker
    lifecycle: tokio::sync::Mutex<()>,
}

impl DrmLatentWorker {
    /// Starts building a worker
    ///
    /// # Arguments
    /// * `identity` - Worker name and credential
    /// * `start_command` - Command that starts the worker process on the
    ///   execute node, e.g. a script that creates the worker directory and
    ///   runs a non-daemonized worker
    pub fn builder(
        identity: WorkerIdentity,
        start_command: impl Into<String>,
    ) -> DrmLatentWorkerBuilder {
        DrmLatentWorkerBuilder::new(identity, start_command)
    }

    /// Worker identity
    pub fn identity(&self) -> &WorkerIdentity {
        &self.inner.identity
    }

    /// Job id of the queued or running job, if any
    pub fn job_id(&self) -> Option<JobId> {
        self.inner.current_job()
    }

    /// Template submitted on every start
    pub fn template(&self) -> &JobTemplate {
        &self.inner.template
    }

    /// Shared scheduler session
    pub fn session(&self) -> &Arc<SchedulerSession> {
        &self.inner.session
    }

    /// Contact of the scheduler session in use
    pub fn contact(&self) -> Option<String> {
        self.inner.session.contact()
    }

    /// Submits the worker job
    ///
    /// Runs on the blocking pool. Fails if a job is already recorded;
    /// submission errors are returned as is, without retrying.
    ///
    /// # Returns
    /// The scheduler-assigned job id
    pub async fn start(&self) -> Result<JobId> {
        let _guard = self.lifecycle.lock().await;

        if let Some(job_id) = self.inner.current_job() {
            return Err(WorkerError::AlreadyRunning {
                worker: self.inner.name().to_string(),
                job_id,
            });
        }

        let inner = Arc::clone(&self.inner);
        self.pool
            .run(move || inner.submit())
            .await
            .map_err(|e| e.for_worker(self.inner.name(), None))
    }

    /// Terminates the worker job
    ///
    /// Returns immediately without contacting the scheduler if no job is
    /// recorded. Otherwise terminates the job on the blocking pool and
    /// clears the job id whatever the outcome.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let _guard = self.lifecycle.lock().await;

        let Some(job_id) = self.inner.current_job() else {
            debug!("Worker {} has no job to stop", self.inner.name());
            return Ok(StopOutcome::NotRunning);
        };

        let contact = self.inner.contact_label();
        info!("Stopping {} job {} ({})", contact, job_id, self.inner.name());

        let inner = Arc::clone(&self.inner);
        let task_job_id = job_id.clone();
        let result = self.pool.run(move || inner.terminate(&task_job_id)).await;

        // A task that panicked never reached the clear in terminate
        self.inner.clear_job();

        match result {
            Ok(outcome) => Ok(outcome.into()),
            Err(e @ WorkerError::Pool { .. }) => {
                let e = e.for_worker(self.inner.name(), Some(&job_id));
                self.inner.log_terminate_error(&contact, &job_id, &e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Queries the scheduler for the state of the worker job
    ///
    /// # Returns
    /// `None` if no job is recorded
    pub async fn status(&self) -> Result<Option<JobState>> {
        let Some(job_id) = self.inner.current_job() else {
            return Ok(None);
        };

        let inner = Arc::clone(&self.inner);
        let task_job_id = job_id.clone();
        self.pool
            .run(move || inner.status(&task_job_id).map(Some))
            .await
            .map_err(|e| e.for_worker(self.inner.name(), Some(&job_id)))
    }
}

#[async_trait]
impl LatentWorker for DrmLatentWorker {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn start_instance(&self, build: &BuildContext) -> Result<bool> {
        debug!("Worker {} requested for build {}", self.inner.name(), build);
        self.start().await?;
        Ok(true)
    }

    async fn stop_instance(&self, fast: bool) -> Result<()> {
        if fast {
            debug!(
                "Fast stop of worker {}: termination is already immediate",
                self.inner.name()
            );
        }
        self.stop().await?;
        Ok(())
    }
}

/// Builder for [`DrmLatentWorker`]
pub struct DrmLatentWorkerBuilder {
    identity: WorkerIdentity,
    start_command: String,
    session: Option<Arc<SchedulerSession>>,
    session_contact: Option<String>,
    pool: Option<BlockingPool>,
    settings: JobSettings,
}

impl DrmLatentWorkerBuilder {
    pub fn new(identity: WorkerIdentity, start_command: impl Into<String>) -> Self {
        Self {
            identity,
            start_command: start_command.into(),
            session: None,
            session_contact: None,
            pool: None,
            settings: JobSettings::default(),
        }
    }

    /// Scheduler session shared with the other workers of this process
    pub fn session(mut self, session: Arc<SchedulerSession>) -> Self {
        self.session = Some(session);
        self
    }

    /// Existing scheduler session to attach to, if this worker is the one
    /// opening the shared session
    pub fn session_contact(mut self, contact: Option<String>) -> Self {
        self.session_contact = contact;
        self
    }

    /// Pool running the blocking scheduler calls; a default-sized pool is
    /// created if none is given
    pub fn pool(mut self, pool: BlockingPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn job_settings(mut self, settings: JobSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Builds the worker
    ///
    /// Opens the shared session if needed and prepares the job template.
    /// Fails with a configuration error if no scheduler session was given
    /// or the start command is empty.
    pub async fn build(self) -> Result<DrmLatentWorker> {
        let name = self.identity.name.clone();

        if name.trim().is_empty() {
            return Err(WorkerError::Config("worker name cannot be empty".to_string()));
        }

        let session = self.session.ok_or_else(|| {
            WorkerError::Config(format!("no scheduler client available for worker {}", name))
        })?;

        if self.start_command.trim().is_empty() {
            return Err(WorkerError::Config(format!(
                "start command for worker {} cannot be empty",
                name
            )));
        }

        let pool = self.pool.unwrap_or_default();
        let contact = self.session_contact;
        let start_command = self.start_command;
        let settings = self.settings;

        let template = {
            let session = Arc::clone(&session);
            let contact = contact.clone();
            pool.run(move || {
                let handle = session.acquire(contact.as_deref()).map_err(|source| {
                    WorkerError::Session {
                        worker: name.clone(),
                        contact: contact.clone().unwrap_or_else(|| NO_CONTACT.to_string()),
                        job_id: None,
                        source,
                    }
                })?;

                let mut template =
                    handle
                        .create_job_template()
                        .map_err(|source| WorkerError::Session {
                            worker: name.clone(),
                            contact: handle.contact().to_string(),
                            job_id: None,
                            source,
                        })?;

                template.remote_command = start_command;
                settings.apply(&mut template, &name);
                Ok(template)
            })
            .await
            .map_err(|e| e.for_worker(&self.identity.name, None))?
        };

        debug!(
            "Worker {} will run '{}' via {} session {}",
            self.identity.name,
            template.remote_command,
            session.backend(),
            template.origin()
        );

        Ok(DrmLatentWorker {
            inner: Arc::new(Inner {
                identity: self.identity,
                requested_contact: contact,
                session,
                template,
                job: Mutex::new(None),
            }),
            pool,
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }
}
