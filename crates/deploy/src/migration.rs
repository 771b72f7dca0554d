//! Migration definitions and the sequential task runner.

use anyhow::{Context, Result};
use futures::future::BoxFuture;

use crate::chain::ChainClient;
use crate::context::MigrationContext;
use crate::settings::Layer;

/// One step of a migration. Tasks take no arguments; everything they need
/// is captured from the [`MigrationContext`] when the list is built.
pub type MigrationTask<'a> = BoxFuture<'a, Result<()>>;

/// A numbered batch of sequential tasks bound to one layer.
///
/// The index is the position in the global registry and drives the per-layer
/// version cursor; gaps are allowed and preserved.
pub struct Migration<C: ChainClient> {
    pub index: u32,
    pub name: &'static str,
    pub layer: Layer,
    pub(crate) tasks: for<'a> fn(&'a MigrationContext<C>) -> Vec<MigrationTask<'a>>,
}

impl<C: ChainClient> Migration<C> {
    /// Runs every task in order, flushing metadata after each success.
    ///
    /// The first failing task aborts the whole migration; tasks after it
    /// never run and no task-level cursor is kept.
    pub async fn run(&self, context: &MigrationContext<C>) -> Result<()> {
        let tasks = (self.tasks)(context);
        let total = tasks.len();
        tracing::info!(
            migration = %self.name,
            index = self.index,
            layer = %self.layer,
            tasks = total,
            "Running migration..."
        );
        for (position, task) in tasks.into_iter().enumerate() {
            tracing::info!(migration = %self.name, task = position + 1, total = total, "Running task...");
            task.await.with_context(|| {
                format!(
                    "Migration {:04} ({}) failed at task {}/{}",
                    self.index,
                    self.name,
                    position + 1,
                    total
                )
            })?;
            context.metadata.save()?;
        }
        tracing::info!(migration = %self.name, "Migration complete");
        Ok(())
    }
}
