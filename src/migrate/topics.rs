//! Topic import pipeline.
//!
//! Topics gate on their category's import state and are created through the
//! target's combined topic+first-post call. The source lock state is
//! deferred: the target would refuse posts into a locked topic, so every
//! topic imports unlocked and the reconcile pass re-locks afterwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use serde_json::json;

use crate::data::{FieldBag, SkipReason, can_import_child, merge_fields};
use crate::error::MigrateError;
use crate::migrate::{RunContext, batch, resolve_author};
use crate::store::{NewTopic, TargetStore};

/// Sort key placing pinned topics above any timestamp-keyed one.
pub const PINNED_SORT_SCORE: f64 = 9007199254740992.0; // 2^53

pub async fn import_topics(
    ctx: &Arc<RunContext>,
    store: &Arc<dyn TargetStore>,
) -> Result<(), MigrateError> {
    ctx.phase("topics_import_start");

    let started = Instant::now();
    let ids = ctx.data.topic_ids().to_vec();
    ctx.success(format!("importing {} topics", ids.len()));

    let imported = Arc::new(AtomicUsize::new(0));
    let limit = ctx.run_config().batch_size;

    {
        let worker_ctx = Arc::clone(ctx);
        let worker_store = Arc::clone(store);
        let worker_imported = Arc::clone(&imported);
        batch::for_each_limit(ctx, &ids, limit, move |_, id| {
            let ctx = Arc::clone(&worker_ctx);
            let store = Arc::clone(&worker_store);
            let imported = Arc::clone(&worker_imported);
            async move { import_one(&ctx, &store, &id, &imported).await }
        })
        .await?;
    }

    ctx.success(format!(
        "imported {}/{} topics in {:.2}s",
        imported.load(Ordering::Relaxed),
        ids.len(),
        started.elapsed().as_secs_f64()
    ));
    ctx.phase("topics_import_done");
    Ok(())
}

async fn import_one(
    ctx: &RunContext,
    store: &Arc<dyn TargetStore>,
    id: &str,
    imported: &AtomicUsize,
) -> Result<(), MigrateError> {
    let (source_cid, source_uid) = {
        let Some(record) = ctx.data.topics.get(id) else {
            return Ok(());
        };
        (record.source_ref("_cid"), record.source_ref("_uid"))
    };

    // dependency gate: the declared category must already be imported
    let category_cid = source_cid.as_ref().and_then(|cid| {
        let category = ctx.data.categories.get(cid);
        if can_import_child(category.as_deref()) {
            category.and_then(|c| c.imported_id())
        } else {
            None
        }
    });
    let Some(cid) = category_cid else {
        ctx.warn(format!(
            "skipping topic {}: category {} not imported",
            id,
            source_cid.as_deref().unwrap_or("?")
        ));
        if let Some(mut record) = ctx.data.topics.get_mut(id) {
            record.mark_skipped(SkipReason::MissingParent {
                parent: source_cid.unwrap_or_default(),
            });
        }
        return Ok(());
    };

    ctx.log(format!("saving topic {}", id));

    let request = {
        let Some(record) = ctx.data.topics.get(id) else {
            return Ok(());
        };
        NewTopic {
            uid: resolve_author(ctx, source_uid.clone()),
            cid,
            title: record.str_field("_title").unwrap_or_default().to_string(),
            content: record.str_field("_content").unwrap_or_default().to_string(),
            thumbnail: record
                .str_field("_thumb")
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        }
    };

    let created = match store.create_topic(request).await {
        Ok(created) => created,
        Err(err) => {
            ctx.warn(format!("skipping topic {}: {}", id, err));
            if let Some(mut record) = ctx.data.topics.get_mut(id) {
                record.mark_skipped(SkipReason::CreationFailed(err.to_string()));
            }
            return Ok(());
        }
    };

    let (topic_fields, timestamp, pinned) = {
        let Some(record) = ctx.data.topics.get(id) else {
            return Ok(());
        };
        let timestamp = record.i64_field("_timestamp").unwrap_or(ctx.started_at());
        let pinned = record.truthy("_pinned");

        let mut fields = FieldBag::new();
        fields.insert(
            "viewcount".into(),
            json!(record.i64_field("_viewcount").unwrap_or(0)),
        );
        // unlocked during import; reconcile restores the source lock state
        fields.insert("locked".into(), json!(0));
        fields.insert("deleted".into(), json!(record.truthy("_deleted") as i64));
        fields.insert("pinned".into(), json!(pinned as i64));
        fields.insert("timestamp".into(), json!(timestamp));
        fields.insert("lastposttime".into(), json!(timestamp));

        fields.insert("_imported_tid".into(), json!(id));
        fields.insert("_imported_uid".into(), json!(source_uid.unwrap_or_default()));
        fields.insert(
            "_imported_cid".into(),
            json!(record.source_ref("_cid").unwrap_or_default()),
        );
        fields.insert(
            "_imported_slug".into(),
            json!(record.str_field("_slug").unwrap_or_default()),
        );
        fields.insert(
            "_imported_title".into(),
            json!(record.str_field("_title").unwrap_or_default()),
        );
        fields.insert(
            "_imported_content".into(),
            json!(record.str_field("_content").unwrap_or_default()),
        );
        (fields, timestamp, pinned)
    };

    // pinned = 1 alone is not enough to float the topic in its category
    let score = if pinned {
        PINNED_SORT_SCORE
    } else {
        timestamp as f64
    };
    store
        .sorted_set_add(
            &format!("category:{}:topics", cid),
            score,
            &created.tid.to_string(),
        )
        .await?;

    store
        .set_object(&format!("topic:{}", created.tid), topic_fields.clone())
        .await?;

    // the generated first post carries the topic's timestamp
    let mut post_fields = FieldBag::new();
    post_fields.insert("timestamp".into(), json!(timestamp));
    store.set_post_fields(created.main_pid, post_fields).await?;

    if let Some(mut record) = ctx.data.topics.get_mut(id) {
        let mut authoritative = topic_fields;
        merge_fields(&mut authoritative, &created.fields);
        authoritative.insert("tid".into(), json!(created.tid));
        authoritative.insert("main_pid".into(), json!(created.main_pid));
        record.mark_imported(created.tid, &authoritative);
    }
    imported.fetch_add(1, Ordering::Relaxed);
    Ok(())
}
