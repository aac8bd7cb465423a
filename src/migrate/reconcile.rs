//! Post-import reconciliation passes over the topic list.
//!
//! Both passes need state that only exists once every post has been
//! created: the re-lock pass applies the lock state deferred by the topic
//! pipeline, and the timestamp fix re-keys each topic in its category by
//! the most recent post the target actually holds.

use std::sync::Arc;

use serde_json::json;

use crate::error::MigrateError;
use crate::migrate::{RunContext, batch};
use crate::store::TargetStore;

/// Re-apply the source lock state to topics imported unlocked.
pub async fn relock_topics(
    ctx: &Arc<RunContext>,
    store: &Arc<dyn TargetStore>,
) -> Result<(), MigrateError> {
    ctx.phase("relock_topics_start");

    let ids = ctx.data.topic_ids().to_vec();
    let limit = ctx.run_config().batch_size;

    {
        let worker_ctx = Arc::clone(ctx);
        let worker_store = Arc::clone(store);
        batch::for_each_limit(ctx, &ids, limit, move |_, id| {
            let ctx = Arc::clone(&worker_ctx);
            let store = Arc::clone(&worker_store);
            async move { relock_one(&ctx, &store, &id).await }
        })
        .await?;
    }

    ctx.phase("relock_topics_done");
    Ok(())
}

async fn relock_one(
    ctx: &RunContext,
    store: &Arc<dyn TargetStore>,
    id: &str,
) -> Result<(), MigrateError> {
    let target = {
        let Some(record) = ctx.data.topics.get(id) else {
            return Ok(());
        };
        if !record.truthy("_locked") {
            return Ok(());
        }
        match record.imported_id() {
            Some(tid) => tid,
            None => {
                ctx.warn(format!(
                    "not relocking topic {}: it was skipped earlier",
                    id
                ));
                return Ok(());
            }
        }
    };

    match store
        .set_object_field(&format!("topic:{}", target), "locked", json!(1))
        .await
    {
        Ok(()) => ctx.log(format!("locked topic {} back", target)),
        Err(err) => ctx.warn(format!("could not relock topic {}: {}", target, err)),
    }
    Ok(())
}

/// Re-key every imported topic in its category by the timestamp of its most
/// recent post. Corrects the drift introduced by posts being created after
/// their topic's initial insertion; idempotent.
pub async fn fix_topic_timestamps(
    ctx: &Arc<RunContext>,
    store: &Arc<dyn TargetStore>,
) -> Result<(), MigrateError> {
    ctx.phase("fix_topic_timestamps_start");

    let ids = ctx.data.topic_ids().to_vec();
    let limit = ctx.run_config().batch_size;

    {
        let worker_ctx = Arc::clone(ctx);
        let worker_store = Arc::clone(store);
        batch::for_each_limit(ctx, &ids, limit, move |_, id| {
            let ctx = Arc::clone(&worker_ctx);
            let store = Arc::clone(&worker_store);
            async move { fix_one(&ctx, &store, &id).await }
        })
        .await?;
    }

    ctx.phase("fix_topic_timestamps_done");
    Ok(())
}

async fn fix_one(
    ctx: &RunContext,
    store: &Arc<dyn TargetStore>,
    id: &str,
) -> Result<(), MigrateError> {
    let tid = {
        let Some(record) = ctx.data.topics.get(id) else {
            return Ok(());
        };
        match record.imported_id() {
            Some(tid) => tid,
            None => return Ok(()),
        }
    };

    let pids = store
        .sorted_set_rev_range(&format!("topic:{}:posts", tid), 0, -1)
        .await?;
    let Some(latest_pid) = pids.first() else {
        return Ok(());
    };

    let cid = store
        .get_object_field(&format!("topic:{}", tid), "cid")
        .await?;
    let last_post_timestamp = store
        .get_object_field(&format!("post:{}", latest_pid), "timestamp")
        .await?;

    let (Some(cid), Some(timestamp)) = (
        cid.and_then(|v| v.as_i64()),
        last_post_timestamp.and_then(|v| v.as_i64()),
    ) else {
        return Ok(());
    };

    store
        .sorted_set_add(
            &format!("category:{}:topics", cid),
            timestamp as f64,
            &tid.to_string(),
        )
        .await?;
    Ok(())
}
