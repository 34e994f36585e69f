use std::{sync::Arc, time::Duration};

use super::Partition;
use crate::{
    error::{Error, Result},
    recordset::CompactionOutcome,
    scheduler::{BackgroundTask, Context},
};

pub struct CompactionTask {
    partition: Arc<Partition>,
}

impl CompactionTask {
    pub fn new(partition: Arc<Partition>) -> Self {
        Self { partition }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for CompactionTask {
    fn name(&self) -> &'static str {
        "compaction"
    }

    fn interval(&self) -> Duration {
        self.partition.config().compaction_interval
    }

    async fn execute(&self, ctx: Context) -> Result<()> {
        if ctx.is_shutting_down() {
            return Ok(());
        }
        // compaction reads and writes whole files, keep it off the async workers
        let partition = self.partition.clone();
        let outcome = tokio::task::spawn_blocking(move || partition.compact())
            .await
            .map_err(|e| Error::Runtime(format!("compaction task failed: {}", e)))??;

        if let CompactionOutcome::Compacted { datafile, .. } = outcome {
            tracing::debug!(
                task = ctx.task_name,
                run_id = ctx.run_id,
                datafile = %datafile.display(),
                "Compaction run finished"
            );
        }
        Ok(())
    }
}

/// Persists the partition state whenever it changed since the last run.
pub struct CheckpointTask {
    partition: Arc<Partition>,
}

impl CheckpointTask {
    pub fn new(partition: Arc<Partition>) -> Self {
        Self { partition }
    }

    async fn checkpoint(&self) -> Result<()> {
        let partition = self.partition.clone();
        tokio::task::spawn_blocking(move || partition.checkpoint_if_changed())
            .await
            .map_err(|e| Error::Runtime(format!("checkpoint task failed: {}", e)))??;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BackgroundTask for CheckpointTask {
    fn name(&self) -> &'static str {
        "checkpoint"
    }

    fn interval(&self) -> Duration {
        self.partition.config().compaction_interval
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        self.checkpoint().await
    }

    /// Persists what the last interval missed, and deletes garbage left by
    /// the final compaction run.
    async fn on_shutdown(&self) -> Result<()> {
        self.checkpoint().await
    }
}
