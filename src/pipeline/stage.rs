//! Long-running service loops of a session

use anyhow::Result;
use async_trait::async_trait;
use log::{error, info};
use tokio::task::JoinHandle;

/// Trait for service loops driven by the runtime (bus dispatch, side channel)
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Run the stage until it finishes or is shut down
    async fn run(&mut self) -> Result<()>;

    /// Get the name of this stage for logging
    fn name(&self) -> &'static str;

    /// Gracefully shutdown the stage
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Spawn a stage on the runtime, logging how it ended.
pub fn spawn_stage<S>(mut stage: S) -> JoinHandle<S>
where
    S: PipelineStage + 'static,
{
    tokio::spawn(async move {
        match stage.run().await {
            Ok(()) => info!("{} finished", stage.name()),
            Err(e) => error!("{} error: {}", stage.name(), e),
        }
        stage
    })
}
