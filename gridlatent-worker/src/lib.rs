//! Gridlatent Worker
//!
//! Latent build workers provisioned through a DRMAA-style grid scheduler.
//!
//! Architecture:
//! - Session: one scheduler session per process, opened on first use and
//!   shared by every worker ([`SchedulerSession`])
//! - Pool: a bounded pool running the blocking scheduler calls off the
//!   async control loop ([`BlockingPool`])
//! - Worker: the per-identity controller that turns "start an instance" and
//!   "stop an instance" into job submission and termination
//!   ([`DrmLatentWorker`], driven through the [`LatentWorker`] trait)
//! - Configuration: worker settings loaded from the environment ([`Config`])

pub mod config;
pub mod error;
pub mod latent;
pub mod pool;
pub mod session;
pub mod worker;

pub use config::{Backend, Config};
pub use error::WorkerError;
pub use latent::LatentWorker;
pub use pool::BlockingPool;
pub use session::{SchedulerSession, TerminateOutcome};
pub use worker::{DrmLatentWorker, DrmLatentWorkerBuilder, JobSettings, StopOutcome};
