//! Phase orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::RunConfig;
use crate::data::ImportDataset;
use crate::error::MigrateError;
use crate::events::MigrateEvent;
use crate::migrate::{
    RunContext, categories, config_swap, flush, posts, reconcile, topics, users,
};
use crate::snapshot::SnapshotStore;
use crate::store::TargetStore;

/// One migration run: owns the run context and drives the fixed phase
/// sequence against the target store.
pub struct Migrator {
    ctx: Arc<RunContext>,
    store: Arc<dyn TargetStore>,
    snapshots: SnapshotStore,
}

impl Migrator {
    pub fn new(
        data: ImportDataset,
        config: RunConfig,
        store: Arc<dyn TargetStore>,
        snapshot_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ctx: Arc::new(RunContext::new(data, config)),
            store,
            snapshots: SnapshotStore::new(snapshot_path),
        }
    }

    /// The run's context, mainly for inspecting record states afterwards.
    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    /// Observe the run's structured event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<MigrateEvent> {
        self.ctx.events().subscribe()
    }

    /// Execute the full phase sequence.
    ///
    /// Phases are strictly sequential; the first infrastructure failure
    /// aborts the run. Once the temporary configuration has been pushed,
    /// restore is attempted even on the failure path; the snapshot file
    /// keeps covering the crash case.
    pub async fn run(&self) -> Result<(), MigrateError> {
        let ctx = &self.ctx;
        ctx.success(format!(
            "to be imported: {} users, {} categories, {} topics, {} posts",
            ctx.data.user_ids().len(),
            ctx.data.category_ids().len(),
            ctx.data.topic_ids().len(),
            ctx.data.post_ids().len(),
        ));

        flush::flush_target(ctx, &self.store).await?;
        config_swap::backup_config(ctx, &self.store, &self.snapshots).await?;

        let outcome = self.migrate_content().await;
        if let Err(err) = &outcome {
            ctx.error(format!("migration aborted: {}", err));
        }
        // the target must get its own config back whether or not the
        // content phases survived
        config_swap::restore_config(ctx, &self.store, &self.snapshots).await;
        outcome?;

        ctx.phase("teardown_start");
        ctx.phase("teardown_done");
        ctx.events().emit(MigrateEvent::Complete);
        Ok(())
    }

    async fn migrate_content(&self) -> Result<(), MigrateError> {
        let ctx = &self.ctx;
        config_swap::apply_temporary_config(ctx, &self.store).await?;
        categories::import_categories(ctx, &self.store).await?;
        users::import_users(ctx, &self.store).await?;
        topics::import_topics(ctx, &self.store).await?;
        posts::import_posts(ctx, &self.store).await?;
        reconcile::relock_topics(ctx, &self.store).await?;
        reconcile::fix_topic_timestamps(ctx, &self.store).await
    }
}
