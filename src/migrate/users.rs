//! User import pipeline.
//!
//! Besides plain account creation this pipeline owns the admin-takeover
//! special case (remapping one legacy admin record onto the target's
//! account 1), role grants for moderators/administrators, and the
//! best-effort cleanup of stale email-confirmation keys.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use serde_json::{Value, json};

use crate::data::{FieldBag, SkipReason};
use crate::error::MigrateError;
use crate::migrate::{ADMIN_UID, RunContext, batch, usernames};
use crate::store::{NewUser, TargetStore};

/// The target caps signatures at 255 chars; leave room for the ellipsis.
const MAX_SIGNATURE_LEN: usize = 252;

pub async fn import_users(
    ctx: &Arc<RunContext>,
    store: &Arc<dyn TargetStore>,
) -> Result<(), MigrateError> {
    ctx.phase("users_import_start");

    let started = Instant::now();
    let ids = ctx.data.user_ids().to_vec();
    ctx.success(format!("importing {} users", ids.len()));

    let imported = Arc::new(AtomicUsize::new(0));
    // the takeover fires at most once per run
    let takeover_pending = Arc::new(AtomicBool::new(
        ctx.run_config().admin_take_ownership.enable,
    ));
    let limit = ctx.run_config().batch_size;

    {
        let worker_ctx = Arc::clone(ctx);
        let worker_store = Arc::clone(store);
        let worker_imported = Arc::clone(&imported);
        let worker_takeover = Arc::clone(&takeover_pending);
        batch::for_each_limit(ctx, &ids, limit, move |_, id| {
            let ctx = Arc::clone(&worker_ctx);
            let store = Arc::clone(&worker_store);
            let imported = Arc::clone(&worker_imported);
            let takeover = Arc::clone(&worker_takeover);
            async move { import_one(&ctx, &store, &id, &imported, &takeover).await }
        })
        .await?;
    }

    ctx.success(format!(
        "imported {}/{} users in {:.2}s",
        imported.load(Ordering::Relaxed),
        ids.len(),
        started.elapsed().as_secs_f64()
    ));

    if ctx.run_config().auto_confirm_emails {
        cleanup_confirmation_keys(ctx, store).await?;
    }

    ctx.phase("users_import_done");
    Ok(())
}

async fn import_one(
    ctx: &RunContext,
    store: &Arc<dyn TargetStore>,
    id: &str,
    imported: &AtomicUsize,
    takeover_pending: &AtomicBool,
) -> Result<(), MigrateError> {
    ctx.log(format!("saving user {}", id));

    let (raw_username, alt_username) = {
        let Some(record) = ctx.data.users.get(id) else {
            return Ok(());
        };
        (
            record.str_field("_username").unwrap_or_default().to_string(),
            record
                .str_field("_alternative_username")
                .unwrap_or_default()
                .to_string(),
        )
    };

    let takeover = &ctx.run_config().admin_take_ownership;
    if takeover.enable
        && raw_username.eq_ignore_ascii_case(&takeover.username)
        && takeover_pending
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    {
        ctx.warn(format!(
            "user \"{}\" matches the takeover policy, remapping onto account {}",
            raw_username, ADMIN_UID
        ));
        // cache the source id so topics and posts resolve this author to 1
        ctx.config().set_takeover_source(id.to_string());
        if let Some(mut record) = ctx.data.users.get_mut(id) {
            // account 1 already holds the role, drop the elevation marker
            record.set_field("_level", Value::Null);
        }
        return finish_user(ctx, store, id, &raw_username, ADMIN_UID, None, imported).await;
    }

    let Some(resolved) = usernames::resolve_username(&raw_username, &alt_username) else {
        ctx.warn(format!(
            "skipping user {}: username \"{}\" is invalid",
            id, raw_username
        ));
        if let Some(mut record) = ctx.data.users.get_mut(id) {
            record.mark_skipped(SkipReason::InvalidUsername);
        }
        return Ok(());
    };

    let (email, password) = {
        let Some(record) = ctx.data.users.get(id) else {
            return Ok(());
        };
        let email = record
            .str_field("_email")
            .filter(|e| !e.is_empty())
            .map(str::to_string);
        let password = record
            .str_field("_password")
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .or_else(|| ctx.generate_password());
        (email, password)
    };

    let uid = match store
        .create_user(NewUser {
            username: resolved.username.clone(),
            email,
            password,
        })
        .await
    {
        Ok(uid) => uid,
        Err(err) => {
            ctx.warn(format!(
                "skipping user {}: \"{}\" {}",
                id, raw_username, err
            ));
            if let Some(mut record) = ctx.data.users.get_mut(id) {
                record.mark_skipped(SkipReason::CreationFailed(err.to_string()));
            }
            return Ok(());
        }
    };

    finish_user(
        ctx,
        store,
        id,
        &raw_username,
        uid,
        Some(resolved.slug),
        imported,
    )
    .await
}

/// Shared success path: role grants, extended profile fields, optional email
/// confirmation, authoritative merge.
async fn finish_user(
    ctx: &RunContext,
    store: &Arc<dyn TargetStore>,
    id: &str,
    username: &str,
    uid: i64,
    slug: Option<String>,
    imported: &AtomicUsize,
) -> Result<(), MigrateError> {
    let level = {
        let Some(record) = ctx.data.users.get(id) else {
            return Ok(());
        };
        record.str_field("_level").map(str::to_string)
    };

    match level.as_deref() {
        Some(level) if level.eq_ignore_ascii_case("moderator") => {
            make_moderator_on_all_categories(ctx, store, uid).await;
            ctx.warn(format!("{} is now a moderator on all categories", username));
        }
        Some(level) if level.eq_ignore_ascii_case("administrator") => {
            if let Err(err) = store.join_group("administrators", uid).await {
                ctx.warn(format!("could not make {} an administrator: {}", username, err));
            } else {
                ctx.warn(format!("{} became an administrator", username));
            }
        }
        _ => {}
    }

    let (fields, email, kept_picture) = {
        let Some(record) = ctx.data.users.get(id) else {
            return Ok(());
        };
        let config = ctx.run_config();

        let mut fields = FieldBag::new();
        fields.insert(
            "signature".into(),
            json!(truncate_chars(
                record.str_field("_signature").unwrap_or_default(),
                MAX_SIGNATURE_LEN
            )),
        );
        fields.insert(
            "website".into(),
            json!(record.str_field("_website").unwrap_or_default()),
        );
        fields.insert("banned".into(), json!(record.truthy("_banned") as i64));
        fields.insert(
            "location".into(),
            json!(record.str_field("_location").unwrap_or_default()),
        );
        fields.insert(
            "joindate".into(),
            json!(record.i64_field("_joindate").unwrap_or(ctx.started_at())),
        );
        let reputation = record.i64_field("_reputation").unwrap_or(0) as f64
            * config.user_reputation_multiplier;
        fields.insert("reputation".into(), json!(reputation.round() as i64));
        fields.insert(
            "profileviews".into(),
            json!(record.i64_field("_profile_views").unwrap_or(0)),
        );
        fields.insert(
            "fullname".into(),
            json!(record.str_field("_fullname").unwrap_or_default()),
        );
        fields.insert(
            "birthday".into(),
            json!(record.str_field("_birthday").unwrap_or_default()),
        );
        fields.insert("showemail".into(), json!(record.truthy("_showemail") as i64));
        // a migration script is running, nobody is online
        fields.insert("status".into(), json!("offline"));

        fields.insert("_imported_uid".into(), json!(id));
        fields.insert(
            "_imported_username".into(),
            json!(record.str_field("_username").unwrap_or_default()),
        );
        fields.insert(
            "_imported_slug".into(),
            json!(
                record
                    .str_field("_slug")
                    .or_else(|| record.str_field("_userslug"))
                    .unwrap_or_default()
            ),
        );
        fields.insert(
            "_imported_signature".into(),
            record.field("_signature").cloned().unwrap_or(Value::Null),
        );

        let mut kept_picture = false;
        if let Some(picture) = record.str_field("_picture").filter(|p| !p.is_empty()) {
            fields.insert("picture".into(), json!(picture));
            fields.insert("gravatarpicture".into(), json!(picture));
            kept_picture = true;
        }

        let email = record
            .str_field("_email")
            .filter(|e| !e.is_empty())
            .map(str::to_string);
        (fields, email, kept_picture)
    };

    store.set_user_fields(uid, fields.clone()).await?;

    if ctx.run_config().auto_confirm_emails {
        if let Some(email) = &email {
            store
                .set_object_field("email:confirmed", email, json!("1"))
                .await?;
        }
    }

    if let Some(mut record) = ctx.data.users.get_mut(id) {
        let mut authoritative = fields;
        authoritative.insert("uid".into(), json!(uid));
        authoritative.insert("kept_picture".into(), json!(kept_picture));
        if let Some(slug) = slug {
            authoritative.insert("userslug".into(), json!(slug));
        }
        record.mark_imported(uid, &authoritative);
    }
    imported.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

/// Grant the moderator privilege group on every imported category.
async fn make_moderator_on_all_categories(
    ctx: &RunContext,
    store: &Arc<dyn TargetStore>,
    uid: i64,
) {
    let cids: Vec<i64> = ctx
        .data
        .categories
        .iter()
        .filter_map(|entry| entry.value().imported_id())
        .collect();
    for cid in cids {
        let group = format!("category:{}:moderators", cid);
        if let Err(err) = store.join_group(&group, uid).await {
            ctx.warn(format!("moderator grant on category {} failed: {}", cid, err));
        }
    }
}

/// Delete stale confirmation keys left behind by pre-confirmed accounts.
/// Skipped when the store cannot enumerate keys by pattern.
async fn cleanup_confirmation_keys(
    ctx: &RunContext,
    store: &Arc<dyn TargetStore>,
) -> Result<(), MigrateError> {
    for pattern in ["confirm:*", "email:*:confirm"] {
        match store.keys_matching(pattern).await? {
            Some(keys) => {
                for key in keys {
                    if let Err(err) = store.delete_key(&key).await {
                        ctx.warn(format!("could not delete {}: {}", key, err));
                    }
                }
            }
            None => {
                ctx.log(format!(
                    "key enumeration unsupported, skipping {} cleanup",
                    pattern
                ));
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Truncate to `max` chars, marking the cut with an ellipsis, the way the
/// target's own profile editor does.
fn truncate_chars(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    let kept: String = input.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}
