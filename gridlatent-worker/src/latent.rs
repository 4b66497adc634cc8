//! Latent worker contract
//!
//! The two entry points an orchestrator drives on any on-demand worker
//! provisioner. Deciding when to call them (build queue pressure, idle
//! timeouts) is the orchestrator's business.

use async_trait::async_trait;
use gridlatent_core::domain::worker::BuildContext;

use crate::error::Result;

/// A worker that exists only while it is needed
///
/// Callers must not overlap `start_instance` and `stop_instance` on the
/// same worker and should wait for one to complete before issuing the
/// other.
#[async_trait]
pub trait LatentWorker: Send + Sync {
    /// Worker name, as known to the orchestrator
    fn name(&self) -> &str;

    /// Brings the worker up (substantiate)
    ///
    /// # Arguments
    /// * `build` - The build that needs the worker
    ///
    /// # Returns
    /// `true` once the worker has been requested from its provider
    async fn start_instance(&self, build: &BuildContext) -> Result<bool>;

    /// Tears the worker down (insubstantiate)
    ///
    /// # Arguments
    /// * `fast` - Skip any graceful shutdown the provider offers
    async fn stop_instance(&self, fast: bool) -> Result<()>;
}
