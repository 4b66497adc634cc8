//! Command handlers
//!
//! Every command opens the process-wide scheduler session through a
//! [`SchedulerSession`] and closes it again before returning.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use gridlatent_client::DrmSession;
use gridlatent_core::domain::job::{JobId, JobState};
use gridlatent_core::domain::worker::BuildContext;
use gridlatent_worker::session::terminate_job;
use gridlatent_worker::{
    BlockingPool, Config, LatentWorker, SchedulerSession, TerminateOutcome, WorkerError,
};
use std::sync::Arc;
use tokio::time;
use tracing::{info, warn};

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Substantiate the worker, wait for its job to finish (or Ctrl-C), then
    /// insubstantiate it
    Run {
        /// Builder the worker is requested for
        #[arg(long, default_value = "manual")]
        builder: String,

        /// Build number the worker is requested for
        #[arg(long)]
        build_number: Option<u64>,
    },
    /// Submit the worker job once and print its id
    Submit,
    /// Terminate a job
    Terminate {
        /// Scheduler job id
        job_id: String,
    },
    /// Show the scheduler state of a job
    Status {
        /// Scheduler job id
        job_id: String,

        /// Print the state as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Handle a CLI command
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The validated worker configuration
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let client = config.backend.client()?;
    let session = Arc::new(SchedulerSession::new(client));
    let pool = BlockingPool::new(config.pool_size);

    let result = match command {
        Commands::Run {
            builder,
            build_number,
        } => run(config, &session, &pool, BuildContext::new(builder, build_number)).await,
        Commands::Submit => submit(config, &session, &pool).await,
        Commands::Terminate { job_id } => {
            terminate(config, &session, &pool, JobId::new(job_id)).await
        }
        Commands::Status { job_id, json } => {
            status(config, &session, &pool, JobId::new(job_id), json).await
        }
    };

    let closing = Arc::clone(&session);
    let worker = config.worker_name.clone();
    let closed = pool
        .run(move || {
            let contact = closing.contact().unwrap_or_default();
            closing.exit().map_err(|source| WorkerError::Session {
                worker,
                contact,
                job_id: None,
                source,
            })
        })
        .await;
    if let Err(e) = closed {
        warn!("Failed to close scheduler session: {}", e);
    }

    result
}

/// Runs one full substantiate/insubstantiate cycle
async fn run(
    config: &Config,
    session: &Arc<SchedulerSession>,
    pool: &BlockingPool,
    build: BuildContext,
) -> Result<()> {
    let worker = config
        .worker_builder(Arc::clone(session), pool.clone())
        .build()
        .await?;

    worker
        .start_instance(&build)
        .await
        .context("Failed to substantiate worker")?;

    let job_id = worker.job_id().map(|id| id.to_string()).unwrap_or_default();
    println!(
        "{} Worker {} queued as job {}",
        "▸".cyan(),
        worker.name().bold(),
        job_id.bold()
    );

    let mut ticker = time::interval(config.status_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping worker {}", worker.name());
                break;
            }
            _ = ticker.tick() => {
                match worker.status().await {
                    Ok(Some(state)) if state.is_finished() => {
                        info!("Job {} finished: {}", job_id, state);
                        break;
                    }
                    Ok(Some(state)) => info!("Job {} is {}", job_id, state),
                    Ok(None) => break,
                    Err(e) => warn!("Failed to query job state: {}", e),
                }
            }
        }
    }

    worker
        .stop_instance(false)
        .await
        .context("Failed to insubstantiate worker")?;

    println!("{} Worker {} released", "▸".cyan(), worker.name().bold());
    Ok(())
}

/// Submits the worker job without waiting for it
async fn submit(config: &Config, session: &Arc<SchedulerSession>, pool: &BlockingPool) -> Result<()> {
    let worker = config
        .worker_builder(Arc::clone(session), pool.clone())
        .build()
        .await?;

    let job_id = worker.start().await.context("Failed to submit job")?;

    println!("{}", job_id);
    Ok(())
}

/// Terminates a job by id
async fn terminate(
    config: &Config,
    session: &Arc<SchedulerSession>,
    pool: &BlockingPool,
    job_id: JobId,
) -> Result<()> {
    let outcome = {
        let session = Arc::clone(session);
        let worker = config.worker_name.clone();
        let contact = config.session_contact.clone();
        let id = job_id.clone();
        pool.run(move || {
            let handle = acquire(&session, &worker, contact, &id)?;
            terminate_job(handle.as_ref(), &id).map_err(|source| WorkerError::Terminate {
                worker,
                contact: handle.contact().to_string(),
                job_id: id.clone(),
                source,
            })
        })
        .await
        .with_context(|| format!("Failed to terminate job {}", job_id))?
    };

    match outcome {
        TerminateOutcome::Terminated => {
            println!("{} Job {} terminated", "✓".green(), job_id.to_string().bold());
        }
        TerminateOutcome::AlreadyGone => {
            println!(
                "{}",
                format!("Job {} is no longer valid", job_id).yellow()
            );
        }
    }

    Ok(())
}

/// Prints the scheduler state of a job
async fn status(
    config: &Config,
    session: &Arc<SchedulerSession>,
    pool: &BlockingPool,
    job_id: JobId,
    json: bool,
) -> Result<()> {
    let state = {
        let session = Arc::clone(session);
        let worker = config.worker_name.clone();
        let contact = config.session_contact.clone();
        let id = job_id.clone();
        pool.run(move || {
            let handle = acquire(&session, &worker, contact, &id)?;
            handle
                .job_status(&id)
                .map_err(|source| WorkerError::Status {
                    worker,
                    contact: handle.contact().to_string(),
                    job_id: id.clone(),
                    source,
                })
        })
        .await
        .with_context(|| format!("Failed to query job {}", job_id))?
    };

    if json {
        println!(
            "{}",
            serde_json::json!({ "job_id": job_id, "state": state })
        );
    } else {
        println!("  Job {}: {}", job_id.to_string().bold(), colorize_state(state));
    }

    Ok(())
}

/// Opens the shared session on behalf of a one-shot command
fn acquire(
    session: &SchedulerSession,
    worker: &str,
    contact: Option<String>,
    job_id: &JobId,
) -> Result<Arc<dyn DrmSession>, WorkerError> {
    session
        .acquire(contact.as_deref())
        .map_err(|source| WorkerError::Session {
            worker: worker.to_string(),
            contact: contact.unwrap_or_else(|| "<new session>".to_string()),
            job_id: Some(job_id.clone()),
            source,
        })
}

/// Colorize job state for display
fn colorize_state(state: JobState) -> colored::ColoredString {
    let state_str = state.to_string();
    match state {
        JobState::Running => state_str.green(),
        JobState::Done => state_str.blue(),
        JobState::Failed => state_str.red(),
        JobState::Undetermined => state_str.dimmed(),
        _ if state.is_on_hold() || state.is_suspended() => state_str.yellow(),
        _ => state_str.normal(),
    }
}
