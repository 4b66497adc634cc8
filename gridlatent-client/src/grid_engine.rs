//! Grid Engine backend
//!
//! Drives a (Sun/Son of/Univa) Grid Engine cell through its command line
//! tools:
//! - `qsub -terse` to submit a job and read back its id
//! - `qdel`, `qhold`, `qrls` and `qmod -sj/-usj` for job control
//! - `qstat` to find the state of a job
//!
//! Sessions are bookkeeping only: Grid Engine has no session concept, so
//! the contact string is generated locally and jobs submitted through a
//! session are remembered until they are terminated, so that a job which
//! left `qstat` on its own can be reported as done rather than unknown.

use gridlatent_core::domain::job::{JobControlAction, JobId, JobState};
use gridlatent_core::domain::template::{HOME_DIRECTORY, JobTemplate, WORKING_DIRECTORY};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{DrmError, Result};
use crate::{DrmClient, DrmSession, check_template};

/// Prefix of every contact string issued by this backend
const CONTACT_PREFIX: &str = "session=";

/// Checks whether an executable with the given name is on `PATH`
fn find_on_path(tool: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|candidate| candidate.is_file())
}

/// Grid Engine client
#[derive(Clone)]
pub struct GridEngineClient {
    /// Directory holding the q* tools; `None` resolves them through `PATH`
    bin_dir: Option<PathBuf>,

    /// Contact of the active session, if any
    active: Arc<Mutex<Option<String>>>,
}

impl GridEngineClient {
    /// Creates a client using the Grid Engine tools found on `PATH`
    ///
    /// Fails if `qsub` cannot be found, which means this host is not a
    /// Grid Engine submit host.
    pub fn detect() -> Result<Self> {
        let qsub = find_on_path("qsub").ok_or_else(|| {
            DrmError::DrmsInit("qsub not found on PATH; is this a Grid Engine submit host?".into())
        })?;

        info!("Grid Engine tools found at {}", qsub.display());
        Ok(Self {
            bin_dir: None,
            active: Arc::new(Mutex::new(None)),
        })
    }

    /// Creates a client using the Grid Engine tools in the given directory
    pub fn with_bin_dir(bin_dir: impl Into<PathBuf>) -> Result<Self> {
        let bin_dir = bin_dir.into();
        if !bin_dir.join("qsub").is_file() {
            return Err(DrmError::DrmsInit(format!(
                "qsub not found in {}",
                bin_dir.display()
            )));
        }

        Ok(Self {
            bin_dir: Some(bin_dir),
            active: Arc::new(Mutex::new(None)),
        })
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<String>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DrmClient for GridEngineClient {
    fn backend(&self) -> &'static str {
        "grid-engine"
    }

    fn connect(&self, contact: Option<&str>) -> Result<Arc<dyn DrmSession>> {
        let mut active = self.lock_active();
        if let Some(current) = active.as_ref() {
            return Err(DrmError::AlreadyActiveSession(current.clone()));
        }

        let contact = match contact {
            Some(c) if !c.starts_with(CONTACT_PREFIX) || c.len() == CONTACT_PREFIX.len() => {
                return Err(DrmError::InvalidContactString(c.to_string()));
            }
            Some(c) => c.to_string(),
            None => format!("{}{}", CONTACT_PREFIX, uuid::Uuid::new_v4().simple()),
        };

        let session = GridEngineSession {
            contact,
            bin_dir: self.bin_dir.clone(),
            active: Arc::clone(&self.active),
            submitted: Mutex::new(HashSet::new()),
        };

        // Make sure the qmaster answers before handing out the session
        session.run_tool("qstat", &[])?;

        *active = Some(session.contact.clone());
        Ok(Arc::new(session))
    }
}

/// Session on a [`GridEngineClient`]
pub struct GridEngineSession {
    contact: String,
    bin_dir: Option<PathBuf>,
    active: Arc<Mutex<Option<String>>>,

    /// Jobs submitted through this session and not terminated since
    submitted: Mutex<HashSet<JobId>>,
}

impl GridEngineSession {
    fn ensure_active(&self) -> Result<()> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.as_deref() != Some(self.contact.as_str()) {
            return Err(DrmError::NoActiveSession);
        }
        Ok(())
    }

    fn tool_path(&self, tool: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(tool),
            None => Path::new(tool).to_path_buf(),
        }
    }

    /// Runs a Grid Engine tool and returns its stdout
    fn run_tool(&self, tool: &str, args: &[String]) -> Result<String> {
        debug!("Running {} {:?}", tool, args);

        let output = Command::new(self.tool_path(tool))
            .args(args)
            .output()
            .map_err(|e| DrmError::DrmCommunication(format!("Failed to execute {}: {}", tool, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !stderr.trim().is_empty() {
            debug!("{} stderr: {}", tool, stderr.trim());
        }

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            };
            return Err(classify_failure(message));
        }

        Ok(stdout)
    }

    fn submitted(&self) -> MutexGuard<'_, HashSet<JobId>> {
        self.submitted.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DrmSession for GridEngineSession {
    fn contact(&self) -> &str {
        &self.contact
    }

    fn create_job_template(&self) -> Result<JobTemplate> {
        self.ensure_active()?;
        Ok(JobTemplate::blank(self.contact.clone()))
    }

    fn run_job(&self, template: &JobTemplate) -> Result<JobId> {
        self.ensure_active()?;
        check_template(&self.contact, template)?;

        let args = qsub_args(template)?;
        let stdout = self.run_tool("qsub", &args)?;
        let job_id = parse_terse_job_id(&stdout)?;

        self.submitted().insert(job_id.clone());
        Ok(job_id)
    }

    fn control(&self, job_id: &JobId, action: JobControlAction) -> Result<()> {
        self.ensure_active()?;

        let (tool, mut args) = match action {
            JobControlAction::Terminate => ("qdel", Vec::new()),
            JobControlAction::Hold => ("qhold", Vec::new()),
            JobControlAction::Release => ("qrls", Vec::new()),
            JobControlAction::Suspend => ("qmod", vec!["-sj".to_string()]),
            JobControlAction::Resume => ("qmod", vec!["-usj".to_string()]),
        };
        args.push(job_id.to_string());

        let result = self.run_tool(tool, &args).map(|_| ());

        // A deleted job also leaves qstat; it must not be reported as done
        if action == JobControlAction::Terminate
            && matches!(&result, Ok(()) | Err(DrmError::InvalidJob(_)))
        {
            self.submitted().remove(job_id);
        }

        result
    }

    fn job_status(&self, job_id: &JobId) -> Result<JobState> {
        self.ensure_active()?;

        let listing = self.run_tool("qstat", &[])?;
        match find_state_letters(&listing, job_id) {
            Some(letters) => Ok(parse_state_letters(letters)),
            // Finished jobs drop out of qstat
            None if self.submitted().contains(job_id) => Ok(JobState::Done),
            None => Err(DrmError::InvalidJob(job_id.to_string())),
        }
    }

    fn exit(&self) -> Result<()> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.as_deref() != Some(self.contact.as_str()) {
            return Err(DrmError::NoActiveSession);
        }
        *active = None;
        Ok(())
    }
}

/// Replaces DRMAA path placeholders with their Grid Engine equivalents
fn expand_path(path: &str, working_directory: Option<&str>) -> String {
    path.replace(HOME_DIRECTORY, "$HOME")
        .replace(WORKING_DIRECTORY, working_directory.unwrap_or("."))
}

/// Builds the `qsub` argument list for a template
///
/// The native specification is split on whitespace and passed through as
/// separate arguments; quoting is not supported. Environment values are
/// sent as one comma-separated `-v` list and so cannot contain commas.
fn qsub_args(template: &JobTemplate) -> Result<Vec<String>> {
    if template.uses_parametric_index() {
        return Err(DrmError::InvalidArgument(
            "parametric index placeholder outside a bulk job".to_string(),
        ));
    }

    // Binary submission: run the command as-is instead of spooling a script
    let mut args = vec!["-terse".to_string(), "-b".to_string(), "y".to_string()];

    if let Some(name) = &template.job_name {
        args.push("-N".to_string());
        args.push(name.clone());
    }

    let working_directory = template
        .working_directory
        .as_deref()
        .map(|wd| expand_path(wd, None));
    if let Some(wd) = &working_directory {
        args.push("-wd".to_string());
        args.push(wd.clone());
    }

    if let Some(path) = &template.output_path {
        args.push("-o".to_string());
        args.push(expand_path(path, working_directory.as_deref()));
    }

    if let Some(path) = &template.error_path {
        args.push("-e".to_string());
        args.push(expand_path(path, working_directory.as_deref()));
    }

    if template.join_files {
        args.push("-j".to_string());
        args.push("y".to_string());
    }

    if !template.env.is_empty() {
        for (key, value) in &template.env {
            if key.is_empty() || key.contains(['=', ',']) || value.contains(',') {
                return Err(DrmError::InvalidArgument(format!(
                    "environment entry '{}={}' cannot be passed to qsub -v",
                    key, value
                )));
            }
        }

        let vars: Vec<String> = template
            .env
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        args.push("-v".to_string());
        args.push(vars.join(","));
    }

    if let Some(category) = &template.job_category {
        debug!("Job category '{}' has no qsub equivalent, ignoring", category);
    }

    if let Some(native) = &template.native_specification {
        if native.contains(['"', '\'']) {
            return Err(DrmError::InvalidArgument(format!(
                "native specification is split on whitespace, quotes are not supported: {}",
                native
            )));
        }
        args.extend(native.split_whitespace().map(str::to_string));
    }

    args.push(template.remote_command.clone());
    args.extend(template.args.iter().cloned());

    Ok(args)
}

/// Extracts the job id from `qsub -terse` output
///
/// Array jobs print "<id>.<range>"; only the id is kept.
fn parse_terse_job_id(stdout: &str) -> Result<JobId> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty()).ok_or_else(|| {
        DrmError::Internal("qsub printed no job id".to_string())
    })?;

    let id = line.split('.').next().unwrap_or(line);
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(DrmError::Internal(format!(
            "unexpected qsub output: {}",
            line
        )));
    }

    Ok(JobId::new(id))
}

/// Finds the state column for a job in plain `qstat` output
fn find_state_letters<'a>(listing: &'a str, job_id: &JobId) -> Option<&'a str> {
    listing.lines().find_map(|line| {
        let mut columns = line.split_whitespace();
        if columns.next()? != job_id.as_str() {
            return None;
        }
        // job-ID prior name user state ...
        columns.nth(3)
    })
}

/// Maps Grid Engine state letters to a job state
fn parse_state_letters(letters: &str) -> JobState {
    let has = |c: char| letters.contains(c);

    if has('E') || has('d') {
        return JobState::Failed;
    }

    let user_suspended = has('s');
    let system_suspended = has('S') || has('T');
    match (user_suspended, system_suspended) {
        (true, true) => return JobState::UserSystemSuspended,
        (true, false) => return JobState::UserSuspended,
        (false, true) => return JobState::SystemSuspended,
        (false, false) => {}
    }

    if has('h') {
        return JobState::UserOnHold;
    }

    if has('r') || has('t') || has('R') {
        return JobState::Running;
    }

    if has('q') || has('w') {
        return JobState::QueuedActive;
    }

    JobState::Undetermined
}

/// Maps an error message printed by a Grid Engine tool to an error kind
fn classify_failure(message: &str) -> DrmError {
    let lower = message.to_lowercase();
    let message = message.to_string();

    if lower.contains("does not exist") || lower.contains("unknown job") {
        DrmError::InvalidJob(message)
    } else if lower.contains("unable to contact")
        || lower.contains("commlib error")
        || lower.contains("can't connect")
    {
        DrmError::DrmCommunication(message)
    } else if lower.contains("permission denied")
        || lower.contains("not authorized")
        || lower.contains("has no permission")
    {
        DrmError::Authorization(message)
    } else if lower.contains("try later") || lower.contains("too many") {
        DrmError::TryLater(message)
    } else if lower.contains("denied") || lower.contains("rejected") {
        DrmError::DeniedByDrm(message)
    } else {
        DrmError::Internal(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(command: &str) -> JobTemplate {
        let mut template = JobTemplate::blank("session=test");
        template.remote_command = command.to_string();
        template
    }

    #[test]
    fn test_qsub_args_minimal() {
        let args = qsub_args(&template("run-worker.sh")).unwrap();
        assert_eq!(args, vec!["-terse", "-b", "y", "run-worker.sh"]);
    }

    #[test]
    fn test_qsub_args_full() {
        let mut t = template("run-worker.sh");
        t.args = vec!["--master".to_string(), "ci:9989".to_string()];
        t.job_name = Some("bot".to_string());
        t.working_directory = Some(format!("{}/work", HOME_DIRECTORY));
        t.output_path = Some(format!(":{}/bot.log", WORKING_DIRECTORY));
        t.join_files = true;
        t.env.insert("A".to_string(), "1".to_string());
        t.env.insert("B".to_string(), "2".to_string());
        t.native_specification = Some("-q build.q  -l h_vmem=4G".to_string());

        let args = qsub_args(&t).unwrap();
        assert_eq!(
            args,
            vec![
                "-terse",
                "-b",
                "y",
                "-N",
                "bot",
                "-wd",
                "$HOME/work",
                "-o",
                ":$HOME/work/bot.log",
                "-j",
                "y",
                "-v",
                "A=1,B=2",
                "-q",
                "build.q",
                "-l",
                "h_vmem=4G",
                "run-worker.sh",
                "--master",
                "ci:9989",
            ]
        );
    }

    #[test]
    fn test_qsub_args_rejects_parametric_index() {
        let mut t = template("cmd");
        t.output_path = Some("out.$drmaa_incr_ph$".to_string());
        assert!(matches!(
            qsub_args(&t).unwrap_err(),
            DrmError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_qsub_args_rejects_comma_in_env() {
        let mut t = template("cmd");
        t.env.insert("PATH_LIST".to_string(), "/a,/b".to_string());
        assert!(matches!(
            qsub_args(&t).unwrap_err(),
            DrmError::InvalidArgument(_)
        ));

        let mut t = template("cmd");
        t.env.insert("A=B".to_string(), "1".to_string());
        assert!(matches!(
            qsub_args(&t).unwrap_err(),
            DrmError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_qsub_args_rejects_quoted_native_spec() {
        let mut t = template("cmd");
        t.native_specification = Some("-l 'h_rt=1:00:00'".to_string());
        assert!(matches!(
            qsub_args(&t).unwrap_err(),
            DrmError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_parse_terse_job_id() {
        assert_eq!(parse_terse_job_id("4711\n").unwrap().as_str(), "4711");
        assert_eq!(parse_terse_job_id("\n  88.1-10:1\n").unwrap().as_str(), "88");
        assert!(parse_terse_job_id("").is_err());
        assert!(parse_terse_job_id("Your job 12 has been submitted").is_err());
    }

    #[test]
    fn test_find_state_letters() {
        let listing = "\
job-ID  prior   name       user         state submit/start at     queue                          slots ja-task-ID
-----------------------------------------------------------------------------------------------------------------
    101 0.55500 bot        buildbot     r     10/19/2026 10:00:00 build.q@node01                     1
    102 0.00000 bot2       buildbot     qw    10/19/2026 10:01:00                                    1
";
        assert_eq!(find_state_letters(listing, &JobId::from("101")), Some("r"));
        assert_eq!(find_state_letters(listing, &JobId::from("102")), Some("qw"));
        assert_eq!(find_state_letters(listing, &JobId::from("10")), None);
    }

    #[test]
    fn test_parse_state_letters() {
        assert_eq!(parse_state_letters("qw"), JobState::QueuedActive);
        assert_eq!(parse_state_letters("hqw"), JobState::UserOnHold);
        assert_eq!(parse_state_letters("r"), JobState::Running);
        assert_eq!(parse_state_letters("t"), JobState::Running);
        assert_eq!(parse_state_letters("Rr"), JobState::Running);
        assert_eq!(parse_state_letters("s"), JobState::UserSuspended);
        assert_eq!(parse_state_letters("S"), JobState::SystemSuspended);
        assert_eq!(parse_state_letters("sS"), JobState::UserSystemSuspended);
        assert_eq!(parse_state_letters("Eqw"), JobState::Failed);
        assert_eq!(parse_state_letters("dr"), JobState::Failed);
        assert_eq!(parse_state_letters("?"), JobState::Undetermined);
    }

    #[test]
    fn test_classify_failure() {
        assert!(classify_failure("denied: job \"42\" does not exist").is_invalid_job());
        assert!(matches!(
            classify_failure("error: commlib error: can't connect to service"),
            DrmError::DrmCommunication(_)
        ));
        assert!(matches!(
            classify_failure("buildbot has no permission for job 42"),
            DrmError::Authorization(_)
        ));
        assert!(matches!(
            classify_failure("Unable to run job: job rejected: no suitable queues"),
            DrmError::DeniedByDrm(_)
        ));
        assert!(matches!(
            classify_failure("something odd"),
            DrmError::Internal(_)
        ));
    }

    /// Writes shell scripts standing in for the Grid Engine tools
    #[cfg(unix)]
    fn fake_tools(tools: &[(&str, &str)]) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!(
            "gridlatent-sge-{}",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        for (name, body) in tools {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        dir
    }

    #[cfg(unix)]
    #[test]
    fn test_terminated_job_is_not_reported_done() {
        let dir = fake_tools(&[("qsub", "echo 4711"), ("qstat", "exit 0"), ("qdel", "exit 0")]);
        let client = GridEngineClient::with_bin_dir(dir.clone()).unwrap();
        let session = client.connect(None).unwrap();

        let mut t = session.create_job_template().unwrap();
        t.remote_command = "run-worker.sh".to_string();
        let job_id = session.run_job(&t).unwrap();
        assert_eq!(job_id.as_str(), "4711");

        // Left qstat on its own
        assert_eq!(session.job_status(&job_id).unwrap(), JobState::Done);

        session.control(&job_id, JobControlAction::Terminate).unwrap();
        assert!(session.job_status(&job_id).unwrap_err().is_invalid_job());

        session.exit().unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_with_bin_dir_requires_qsub() {
        let dir = std::env::temp_dir().join("gridlatent-no-such-sge-bin");
        assert!(matches!(
            GridEngineClient::with_bin_dir(&dir),
            Err(DrmError::DrmsInit(_))
        ));
    }
}
