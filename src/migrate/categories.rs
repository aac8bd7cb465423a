//! Category import pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use serde_json::{Value, json};

use crate::data::{FieldBag, SkipReason, merge_fields};
use crate::error::MigrateError;
use crate::migrate::{RunContext, batch};
use crate::store::{NewCategory, TargetStore};

pub async fn import_categories(
    ctx: &Arc<RunContext>,
    store: &Arc<dyn TargetStore>,
) -> Result<(), MigrateError> {
    ctx.phase("categories_import_start");

    let started = Instant::now();
    let ids = ctx.data.category_ids().to_vec();
    ctx.success(format!("importing {} categories", ids.len()));

    let imported = Arc::new(AtomicUsize::new(0));
    let limit = ctx.run_config().batch_size;

    {
        let worker_ctx = Arc::clone(ctx);
        let worker_store = Arc::clone(store);
        let worker_imported = Arc::clone(&imported);
        batch::for_each_limit(ctx, &ids, limit, move |index, id| {
            let ctx = Arc::clone(&worker_ctx);
            let store = Arc::clone(&worker_store);
            let imported = Arc::clone(&worker_imported);
            async move { import_one(&ctx, &store, index, &id, &imported).await }
        })
        .await?;
    }

    ctx.success(format!(
        "imported {}/{} categories in {:.2}s",
        imported.load(Ordering::Relaxed),
        ids.len(),
        started.elapsed().as_secs_f64()
    ));
    ctx.phase("categories_import_done");
    Ok(())
}

async fn import_one(
    ctx: &RunContext,
    store: &Arc<dyn TargetStore>,
    index: usize,
    id: &str,
    imported: &AtomicUsize,
) -> Result<(), MigrateError> {
    ctx.log(format!("saving category {}", id));

    let config = ctx.run_config();
    let request = {
        let Some(record) = ctx.data.categories.get(id) else {
            return Ok(());
        };
        let ordinal = (index + 1) as i64;
        NewCategory {
            name: record
                .str_field("_name")
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Category {}", ordinal)),
            description: record
                .str_field("_description")
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| "no description available".to_string()),
            order: record.i64_field("_order").unwrap_or(ordinal),
            parent_cid: record
                .i64_field("_parent")
                .or_else(|| record.i64_field("_parent_cid")),
            disabled: record.truthy("_disabled"),
            link: record
                .str_field("_link")
                .filter(|link| !link.is_empty())
                .map(str::to_string),
            icon: ctx
                .pick(&config.category_icons)
                .unwrap_or_default()
                .to_string(),
            color: ctx
                .pick(&config.category_text_colors)
                .unwrap_or_default()
                .to_string(),
            bg_color: ctx
                .pick(&config.category_bg_colors)
                .unwrap_or_default()
                .to_string(),
        }
    };

    let created = match store.create_category(request).await {
        Ok(created) => created,
        Err(err) => {
            ctx.warn(format!("skipping category {}: {}", id, err));
            if let Some(mut record) = ctx.data.categories.get_mut(id) {
                record.mark_skipped(SkipReason::CreationFailed(err.to_string()));
            }
            return Ok(());
        }
    };

    let provenance = {
        let Some(record) = ctx.data.categories.get(id) else {
            return Ok(());
        };
        let mut fields = FieldBag::new();
        fields.insert("_imported_cid".into(), Value::String(id.to_string()));
        fields.insert(
            "_imported_name".into(),
            json!(record.str_field("_name").unwrap_or_default()),
        );
        fields.insert(
            "_imported_slug".into(),
            json!(record.str_field("_slug").unwrap_or_default()),
        );
        fields.insert(
            "_imported_description".into(),
            json!(record.str_field("_description").unwrap_or_default()),
        );
        fields.insert(
            "_imported_link".into(),
            json!(record.str_field("_link").unwrap_or_default()),
        );
        fields
    };

    if let Err(err) = store
        .set_object(&format!("category:{}", created.cid), provenance.clone())
        .await
    {
        ctx.warn(format!(
            "failed to persist provenance on category {}: {}",
            created.cid, err
        ));
    }

    if let Some(mut record) = ctx.data.categories.get_mut(id) {
        let mut authoritative = provenance;
        merge_fields(&mut authoritative, &created.fields);
        authoritative.insert("cid".into(), json!(created.cid));
        record.mark_imported(created.cid, &authoritative);
    }
    imported.fetch_add(1, Ordering::Relaxed);
    Ok(())
}
