//! Job template
//!
//! The submission record describing what a job runs and how. A blank
//! template is always obtained from a scheduler session, which stamps it
//! with the session contact so that a template can only be submitted
//! through the session that issued it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placeholder expanded to the user's home directory on the execute node
pub const HOME_DIRECTORY: &str = "$drmaa_hd_ph$";

/// Placeholder expanded to the job's working directory
pub const WORKING_DIRECTORY: &str = "$drmaa_wd_ph$";

/// Placeholder expanded to the task index of a bulk job
pub const PARAMETRIC_INDEX: &str = "$drmaa_incr_ph$";

/// Submission template for a single job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTemplate {
    /// Contact of the session that created this template
    origin: String,

    /// Command started on the execute node
    pub remote_command: String,

    /// Arguments passed to the remote command
    pub args: Vec<String>,

    /// Job name shown by the scheduler
    pub job_name: Option<String>,

    /// Scheduler-native submission options (e.g. "-q build.q -l h_vmem=4G")
    pub native_specification: Option<String>,

    pub working_directory: Option<String>,
    pub output_path: Option<String>,
    pub error_path: Option<String>,

    /// Merge stderr into the output path
    pub join_files: bool,

    /// Environment variables exported to the job
    pub env: BTreeMap<String, String>,

    pub job_category: Option<String>,
}

impl JobTemplate {
    /// Creates a blank template bound to the session with the given contact
    ///
    /// Scheduler sessions call this from their template factory; callers
    /// outside a session implementation should ask the session instead.
    pub fn blank(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            remote_command: String::new(),
            args: Vec::new(),
            job_name: None,
            native_specification: None,
            working_directory: None,
            output_path: None,
            error_path: None,
            join_files: false,
            env: BTreeMap::new(),
            job_category: None,
        }
    }

    /// Contact of the session that issued this template
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns true if any path field uses the bulk job index placeholder
    pub fn uses_parametric_index(&self) -> bool {
        [
            self.working_directory.as_deref(),
            self.output_path.as_deref(),
            self.error_path.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|path| path.contains(PARAMETRIC_INDEX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_template() {
        let template = JobTemplate::blank("default contact");
        assert_eq!(template.origin(), "default contact");
        assert!(template.remote_command.is_empty());
        assert!(template.args.is_empty());
        assert!(!template.join_files);
        assert!(!template.uses_parametric_index());
    }

    #[test]
    fn test_parametric_index_detection() {
        let mut template = JobTemplate::blank("c");
        template.output_path = Some(format!("{}/out.{}", HOME_DIRECTORY, PARAMETRIC_INDEX));
        assert!(template.uses_parametric_index());

        template.output_path = Some(format!("{}/out", WORKING_DIRECTORY));
        assert!(!template.uses_parametric_index());
    }
}
