//! Target flush: clear previously imported content before a run.
//!
//! Purges every category (the target cascades topics and posts), every user
//! except the target's account 1, and resets the global id/count counters.
//! Purge enumeration is paged and always restarts at offset 0 (deletion
//! shifts the remaining range), stopping when a convergence predicate says
//! the remaining page is final.

use std::sync::Arc;

use serde_json::json;
use tokio::task::JoinSet;

use crate::error::MigrateError;
use crate::migrate::{ADMIN_UID, RunContext};
use crate::store::TargetStore;

/// Page size for purge enumeration.
const PURGE_PAGE_SIZE: usize = 50;

/// Counter fields on the target's global object, all reset to 1.
const GLOBAL_COUNTER_FIELDS: &[&str] = &[
    "next_uid",
    "user_count",
    "next_cid",
    "category_count",
    "next_tid",
    "topic_count",
    "next_pid",
    "post_count",
];

pub async fn flush_target(
    ctx: &Arc<RunContext>,
    store: &Arc<dyn TargetStore>,
) -> Result<(), MigrateError> {
    purge_categories(ctx, store).await?;
    purge_users(ctx, store).await?;
    reset_global_counters(ctx, store).await
}

async fn purge_categories(
    ctx: &Arc<RunContext>,
    store: &Arc<dyn TargetStore>,
) -> Result<(), MigrateError> {
    ctx.phase("purge_categories_start");
    ctx.progress(0, 1);

    let total = store.category_count().await?;
    let limit = ctx.run_config().batch_size.max(1);
    let mut purged = 0usize;

    loop {
        let ids = store.category_ids(0, PURGE_PAGE_SIZE - 1).await?;
        if ids.is_empty() {
            break;
        }
        let final_page = ids.len() < PURGE_PAGE_SIZE;

        for chunk in ids.chunks(limit) {
            let mut tasks: JoinSet<Result<(), MigrateError>> = JoinSet::new();
            for &cid in chunk {
                let store = Arc::clone(store);
                tasks.spawn(async move { Ok(store.purge_category(cid).await?) });
            }
            while let Some(joined) = tasks.join_next().await {
                joined.map_err(|err| MigrateError::Worker(err.to_string()))??;
                purged += 1;
                ctx.progress(purged.min(total), total.max(1));
            }
        }

        if final_page {
            break;
        }
    }

    ctx.progress(1, 1);
    ctx.phase("purge_categories_done");
    Ok(())
}

async fn purge_users(
    ctx: &Arc<RunContext>,
    store: &Arc<dyn TargetStore>,
) -> Result<(), MigrateError> {
    ctx.phase("purge_users_start");
    ctx.progress(0, 1);

    let total = store.user_count().await?;
    let limit = ctx.run_config().batch_size.max(1);
    let mut seen = 0usize;

    loop {
        let ids = store.user_ids(0, PURGE_PAGE_SIZE - 1).await?;
        if ids.is_empty() {
            break;
        }
        // converged once the target's own account 1 is the only one left
        let final_page = ids.len() == 1 && ids[0] == ADMIN_UID;

        for chunk in ids.chunks(limit) {
            let mut tasks: JoinSet<Result<(), MigrateError>> = JoinSet::new();
            for &uid in chunk {
                if uid == ADMIN_UID {
                    seen += 1;
                    ctx.progress(seen.min(total), total.max(1));
                    continue;
                }
                let store = Arc::clone(store);
                tasks.spawn(async move { Ok(store.delete_user(uid).await?) });
            }
            while let Some(joined) = tasks.join_next().await {
                joined.map_err(|err| MigrateError::Worker(err.to_string()))??;
                seen += 1;
                ctx.progress(seen.min(total), total.max(1));
            }
        }

        if final_page {
            break;
        }
    }

    ctx.progress(1, 1);
    ctx.phase("purge_users_done");
    Ok(())
}

async fn reset_global_counters(
    ctx: &Arc<RunContext>,
    store: &Arc<dyn TargetStore>,
) -> Result<(), MigrateError> {
    ctx.phase("reset_globals_start");
    ctx.progress(0, 1);

    for field in GLOBAL_COUNTER_FIELDS {
        store.set_object_field("global", field, json!(1)).await?;
    }

    ctx.progress(1, 1);
    ctx.phase("reset_globals_done");
    Ok(())
}
