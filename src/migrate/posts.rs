//! Post import pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use serde_json::json;

use crate::data::{FieldBag, SkipReason, can_import_child, merge_fields};
use crate::error::MigrateError;
use crate::migrate::{RunContext, batch, resolve_author};
use crate::store::{NewPost, TargetStore};

pub async fn import_posts(
    ctx: &Arc<RunContext>,
    store: &Arc<dyn TargetStore>,
) -> Result<(), MigrateError> {
    ctx.phase("posts_import_start");

    let started = Instant::now();
    let ids = ctx.data.post_ids().to_vec();
    ctx.success(format!("importing {} posts", ids.len()));

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
        "imported {}/{} posts in {:.2}s",
        imported.load(Ordering::Relaxed),
        ids.len(),
        started.elapsed().as_secs_f64()
    ));
    ctx.phase("posts_import_done");
    Ok(())
}

async fn import_one(
    ctx: &RunContext,
    store: &Arc<dyn TargetStore>,
    id: &str,
    imported: &AtomicUsize,
) -> Result<(), MigrateError> {
    let (source_tid, source_uid) = {
        let Some(record) = ctx.data.posts.get(id) else {
            return Ok(());
        };
        (record.source_ref("_tid"), record.source_ref("_uid"))
    };

    // dependency gate: the declared topic must already be imported
    let topic_tid = source_tid.as_ref().and_then(|tid| {
        let topic = ctx.data.topics.get(tid);
        if can_import_child(topic.as_deref()) {
            topic.and_then(|t| t.imported_id())
        } else {
            None
        }
    });
    let Some(tid) = topic_tid else {
        ctx.warn(format!(
            "skipping post {}: topic {} not imported",
            id,
            source_tid.as_deref().unwrap_or("?")
        ));
        if let Some(mut record) = ctx.data.posts.get_mut(id) {
            record.mark_skipped(SkipReason::MissingParent {
                parent: source_tid.unwrap_or_default(),
            });
        }
        return Ok(());
    };

    ctx.log(format!("saving post {}", id));

    let request = {
        let Some(record) = ctx.data.posts.get(id) else {
            return Ok(());
        };
        NewPost {
            uid: resolve_author(ctx, source_uid.clone()),
            tid,
            content: record.str_field("_content").unwrap_or_default().to_string(),
            timestamp: record.i64_field("_timestamp").unwrap_or(ctx.started_at()),
            // best-effort reference, may point at a post that never existed
            reply_to: record.i64_field("_reply_to"),
        }
    };

    let created = match store.create_post(request).await {
        Ok(created) => created,
        Err(err) => {
            ctx.warn(format!("skipping post {}: {}", id, err));
            if let Some(mut record) = ctx.data.posts.get_mut(id) {
                record.mark_skipped(SkipReason::CreationFailed(err.to_string()));
            }
            return Ok(());
        }
    };

    let fields = {
        let Some(record) = ctx.data.posts.get(id) else {
            return Ok(());
        };
        let mut fields = FieldBag::new();
        fields.insert(
            "reputation".into(),
            json!(record.i64_field("_reputation").unwrap_or(0)),
        );
        fields.insert("votes".into(), json!(record.i64_field("_votes").unwrap_or(0)));
        fields.insert("edited".into(), json!(record.i64_field("_edited").unwrap_or(0)));
        fields.insert("deleted".into(), json!(record.truthy("_deleted") as i64));

        fields.insert("_imported_pid".into(), json!(id));
        fields.insert("_imported_uid".into(), json!(source_uid.unwrap_or_default()));
        fields.insert(
            "_imported_tid".into(),
            json!(record.source_ref("_tid").unwrap_or_default()),
        );
        fields.insert(
            "_imported_content".into(),
            json!(record.str_field("_content").unwrap_or_default()),
        );
        fields
    };

    if let Err(err) = store.set_post_fields(created.pid, fields.clone()).await {
        ctx.warn(format!("failed to set fields on post {}: {}", created.pid, err));
    }

    if let Some(mut record) = ctx.data.posts.get_mut(id) {
        let mut authoritative = fields;
        merge_fields(&mut authoritative, &created.fields);
        authoritative.insert("pid".into(), json!(created.pid));
        record.mark_imported(created.pid, &authoritative);
    }
    imported.fetch_add(1, Ordering::Relaxed);
    Ok(())
}
