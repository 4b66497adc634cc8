//! Worker configuration
//!
//! Defines the configurable parameters of a latent worker: its identity,
//! the command that starts it on the grid, how the job is submitted and
//! which scheduler backend is used.

use gridlatent_client::DrmClient;
use gridlatent_client::grid_engine::GridEngineClient;
use gridlatent_client::memory::MemoryClient;
use gridlatent_core::domain::template::PARAMETRIC_INDEX;
use gridlatent_core::domain::worker::WorkerIdentity;
use std::sync::Arc;
use std::time::Duration;

use crate::error::WorkerError;
use crate::pool::{BlockingPool, DEFAULT_POOL_SIZE};
use crate::session::SchedulerSession;
use crate::worker::{DrmLatentWorker, DrmLatentWorkerBuilder, JobSettings};

/// Scheduler backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// In-process scheduler; jobs are recorded but never run
    Memory,

    /// Grid Engine through its command line tools
    GridEngine,
}

impl Backend {
    /// Creates the scheduler client for this backend
    ///
    /// Fails with a configuration error if the backend is not usable on
    /// this host.
    pub fn client(&self) -> Result<Arc<dyn DrmClient>, WorkerError> {
        match self {
            Backend::Memory => Ok(Arc::new(MemoryClient::new())),
            Backend::GridEngine => {
                let client = GridEngineClient::detect().map_err(|e| {
                    WorkerError::Config(format!("grid-engine backend unavailable: {}", e))
                })?;
                Ok(Arc::new(client))
            }
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "grid-engine" | "gridengine" | "sge" => Ok(Backend::GridEngine),
            other => anyhow::bail!("unknown backend '{}' (expected memory or grid-engine)", other),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Memory => write!(f, "memory"),
            Backend::GridEngine => write!(f, "grid-engine"),
        }
    }
}

/// Latent worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Worker name, as known to the orchestrator
    pub worker_name: String,

    /// Credential the worker uses to attach to the orchestrator
    pub worker_password: String,

    /// Command that starts the worker process on the execute node
    pub start_command: String,

    /// Arguments passed to the start command
    pub start_args: Vec<String>,

    /// Existing scheduler session to attach to; a new one is created if unset
    pub session_contact: Option<String>,

    pub backend: Backend,

    /// Scheduler-native submission options (e.g. "-q build.q -l h_vmem=4G")
    pub native_specification: Option<String>,

    /// Job name on the grid; defaults to the worker name
    pub job_name: Option<String>,

    pub working_directory: Option<String>,
    pub output_path: Option<String>,

    /// Merge the job's stderr into its output path
    pub join_files: bool,

    /// Maximum number of concurrent scheduler calls
    pub pool_size: usize,

    /// How often `run` polls the scheduler for the job state
    pub status_interval: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(worker_name: String, start_command: String) -> Self {
        Self {
            worker_name,
            worker_password: String::new(),
            start_command,
            start_args: Vec::new(),
            session_contact: None,
            backend: Backend::GridEngine,
            native_specification: None,
            job_name: None,
            working_directory: None,
            output_path: None,
            join_files: false,
            pool_size: DEFAULT_POOL_SIZE,
            status_interval: Duration::from_secs(30),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - GRIDLATENT_WORKER_NAME (required)
    /// - GRIDLATENT_START_COMMAND (required)
    /// - GRIDLATENT_WORKER_PASSWORD (optional, default: empty)
    /// - GRIDLATENT_START_ARGS (optional, whitespace separated)
    /// - GRIDLATENT_SESSION_CONTACT (optional)
    /// - GRIDLATENT_BACKEND (optional, memory | grid-engine, default: grid-engine)
    /// - GRIDLATENT_NATIVE_SPEC (optional)
    /// - GRIDLATENT_JOB_NAME (optional)
    /// - GRIDLATENT_WORKING_DIR (optional)
    /// - GRIDLATENT_OUTPUT_PATH (optional)
    /// - GRIDLATENT_JOIN_FILES (optional, true | 1)
    /// - GRIDLATENT_POOL_SIZE (optional, default: 4)
    /// - GRIDLATENT_STATUS_INTERVAL (optional, seconds, default: 30)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let worker_name = non_empty("GRIDLATENT_WORKER_NAME")
            .ok_or_else(|| anyhow::anyhow!("GRIDLATENT_WORKER_NAME environment variable not set"))?;

        let start_command = non_empty("GRIDLATENT_START_COMMAND").ok_or_else(|| {
            anyhow::anyhow!("GRIDLATENT_START_COMMAND environment variable not set")
        })?;

        let mut config = Self::new(worker_name, start_command);

        if let Some(password) = lookup("GRIDLATENT_WORKER_PASSWORD") {
            config.worker_password = password;
        }

        config.start_args = non_empty("GRIDLATENT_START_ARGS")
            .map(|args| args.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        config.session_contact = non_empty("GRIDLATENT_SESSION_CONTACT");

        if let Some(backend) = non_empty("GRIDLATENT_BACKEND") {
            config.backend = backend.parse()?;
        }

        config.native_specification = non_empty("GRIDLATENT_NATIVE_SPEC");
        config.job_name = non_empty("GRIDLATENT_JOB_NAME");
        config.working_directory = non_empty("GRIDLATENT_WORKING_DIR");
        config.output_path = non_empty("GRIDLATENT_OUTPUT_PATH");

        config.join_files = non_empty("GRIDLATENT_JOIN_FILES")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        config.pool_size = non_empty("GRIDLATENT_POOL_SIZE")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        config.status_interval = non_empty("GRIDLATENT_STATUS_INTERVAL")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_name.trim().is_empty() {
            anyhow::bail!("worker_name cannot be empty");
        }

        if self.start_command.trim().is_empty() {
            anyhow::bail!("start_command cannot be empty");
        }

        if matches!(&self.session_contact, Some(contact) if contact.trim().is_empty()) {
            anyhow::bail!("session_contact cannot be blank");
        }

        if self.pool_size == 0 {
            anyhow::bail!("pool_size must be greater than 0");
        }

        if self.status_interval.as_secs() == 0 {
            anyhow::bail!("status_interval must be greater than 0");
        }

        for path in [&self.working_directory, &self.output_path].into_iter().flatten() {
            if path.contains(PARAMETRIC_INDEX) {
                anyhow::bail!(
                    "{} is only valid for bulk jobs and cannot be used in '{}'",
                    PARAMETRIC_INDEX,
                    path
                );
            }
        }

        Ok(())
    }

    /// Worker identity
    pub fn identity(&self) -> WorkerIdentity {
        WorkerIdentity::new(self.worker_name.clone(), self.worker_password.clone())
    }

    /// Job template settings
    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            args: self.start_args.clone(),
            job_name: self.job_name.clone(),
            native_specification: self.native_specification.clone(),
            working_directory: self.working_directory.clone(),
            output_path: self.output_path.clone(),
            join_files: self.join_files,
            ..JobSettings::default()
        }
    }

    /// Worker builder preloaded with this configuration
    ///
    /// # Arguments
    /// * `session` - Scheduler session shared by the workers of this process
    /// * `pool` - Pool running the blocking scheduler calls
    pub fn worker_builder(
        &self,
        session: Arc<SchedulerSession>,
        pool: BlockingPool,
    ) -> DrmLatentWorkerBuilder {
        DrmLatentWorker::builder(self.identity(), self.start_command.clone())
            .session(session)
            .session_contact(self.session_contact.clone())
            .pool(pool)
            .job_settings(self.job_settings())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::new("bot".to_string(), "run-worker.sh".to_string());
        assert_eq!(config.backend, Backend::GridEngine);
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.status_interval, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_required() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("GRIDLATENT_WORKER_NAME", "bot")])).is_err());

        let config = Config::from_lookup(lookup(&[
            ("GRIDLATENT_WORKER_NAME", "bot"),
            ("GRIDLATENT_START_COMMAND", "run-worker.sh"),
        ]))
        .unwrap();
        assert_eq!(config.worker_name, "bot");
        assert_eq!(config.start_command, "run-worker.sh");
        assert_eq!(config.session_contact, None);
    }

    #[test]
    fn test_from_lookup_full() {
        let config = Config::from_lookup(lookup(&[
            ("GRIDLATENT_WORKER_NAME", "bot"),
            ("GRIDLATENT_WORKER_PASSWORD", "pass"),
            ("GRIDLATENT_START_COMMAND", "run-worker.sh"),
            ("GRIDLATENT_START_ARGS", "--master  ci:9989"),
            ("GRIDLATENT_SESSION_CONTACT", "session=abc"),
            ("GRIDLATENT_BACKEND", "memory"),
            ("GRIDLATENT_NATIVE_SPEC", "-q build.q"),
            ("GRIDLATENT_JOIN_FILES", "TRUE"),
            ("GRIDLATENT_POOL_SIZE", "8"),
            ("GRIDLATENT_STATUS_INTERVAL", "5"),
        ]))
        .unwrap();

        assert_eq!(config.worker_password, "pass");
        assert_eq!(config.start_args, vec!["--master", "ci:9989"]);
        assert_eq!(config.session_contact.as_deref(), Some("session=abc"));
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.native_specification.as_deref(), Some("-q build.q"));
        assert!(config.join_files);
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.status_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_unknown_backend() {
        let result = Config::from_lookup(lookup(&[
            ("GRIDLATENT_WORKER_NAME", "bot"),
            ("GRIDLATENT_START_COMMAND", "cmd"),
            ("GRIDLATENT_BACKEND", "pbs"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::new("bot".to_string(), "cmd".to_string());
        assert!(config.validate().is_ok());

        config.pool_size = 0;
        assert!(config.validate().is_err());
        config.pool_size = 2;

        config.session_contact = Some(" ".to_string());
        assert!(config.validate().is_err());
        config.session_contact = None;

        config.output_path = Some("out.$drmaa_incr_ph$".to_string());
        assert!(config.validate().is_err());
        config.output_path = Some("$drmaa_hd_ph$/out".to_string());
        assert!(config.validate().is_ok());

        config.start_command = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_parse_and_display() {
        assert_eq!("memory".parse::<Backend>().unwrap(), Backend::Memory);
        assert_eq!("SGE".parse::<Backend>().unwrap(), Backend::GridEngine);
        assert_eq!(Backend::GridEngine.to_string(), "grid-engine");
    }

    #[test]
    fn test_identity_and_settings() {
        let mut config = Config::new("bot".to_string(), "cmd".to_string());
        config.worker_password = "pass".to_string();
        config.job_name = Some("bb".to_string());

        let identity = config.identity();
        assert_eq!(identity.name, "bot");
        assert_eq!(identity.password, "pass");
        assert_eq!(config.job_settings().job_name.as_deref(), Some("bb"));
    }

    #[tokio::test]
    async fn test_worker_builder_uses_config() {
        let mut config = Config::new("bot".to_string(), "run-worker.sh".to_string());
        config.backend = Backend::Memory;
        config.session_contact = Some("some string".to_string());

        let session = Arc::new(SchedulerSession::new(config.backend.client().unwrap()));
        let worker = config
            .worker_builder(Arc::clone(&session), BlockingPool::new(config.pool_size))
            .build()
            .await
            .unwrap();

        assert_eq!(worker.template().remote_command, "run-worker.sh");
        assert_eq!(session.contact().as_deref(), Some("some string"));
    }
}
