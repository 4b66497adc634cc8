//! Worker domain types
//!
//! Identity of a latent worker and the build context the orchestrator
//! hands over when it asks for one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Orchestrator-level identity of a latent worker
#[derive(Clone, Serialize, Deserialize)]
pub struct WorkerIdentity {
    /// Worker name, as known to the orchestrator
    pub name: String,

    /// Credential the worker process uses to attach to the orchestrator
    pub password: String,
}

impl WorkerIdentity {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
        }
    }
}

// Keep the credential out of logs.
impl std::fmt::Debug for WorkerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerIdentity")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The build that caused the orchestrator to request a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildContext {
    /// Name of the builder the build belongs to
    pub builder: String,

    pub build_number: Option<u64>,

    /// When the orchestrator asked for the worker
    pub requested_at: DateTime<Utc>,
}

impl BuildContext {
    pub fn new(builder: impl Into<String>, build_number: Option<u64>) -> Self {
        Self {
            builder: builder.into(),
            build_number,
            requested_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.build_number {
            Some(number) => write!(f, "{} #{}", self.builder, number),
            None => write!(f, "{}", self.builder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_debug_redacts_password() {
        let identity = WorkerIdentity::new("bot", "pass");
        let rendered = format!("{:?}", identity);
        assert!(rendered.contains("bot"));
        assert!(!rendered.contains("pass\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_build_context_display() {
        assert_eq!(BuildContext::new("linux", Some(42)).to_string(), "linux #42");
        assert_eq!(BuildContext::new("linux", None).to_string(), "linux");
    }
}
