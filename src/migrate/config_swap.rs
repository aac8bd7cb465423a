//! Temporary-configuration swap protocol.
//!
//! The run needs the target's validation relaxed (historic content rarely
//! passes current limits), but must leave the target's own configuration
//! untouched afterwards, on success, on failure, and across crashes. The
//! durable snapshot file is the recovery marker: it is written before the
//! temporary config is applied and deleted only after a successful restore,
//! so a file found at run start means the target still carries the
//! temporary config from an earlier, unfinished run.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::data::merge_fields;
use crate::error::MigrateError;
use crate::migrate::RunContext;
use crate::snapshot::SnapshotStore;
use crate::store::TargetStore;

/// Config key whose blanking stops the target from sending confirmation
/// mail while emails are being auto-confirmed.
const SMTP_HOST_KEY: &str = "email_smtp_host";

/// Capture the target's configuration before touching it.
pub async fn backup_config(
    ctx: &Arc<RunContext>,
    store: &Arc<dyn TargetStore>,
    snapshots: &SnapshotStore,
) -> Result<(), MigrateError> {
    if snapshots.exists() {
        // an earlier run never restored; the target config is assumed to be
        // the temporary one, so the file is the truth and must not be
        // overwritten
        let backup = snapshots.load()?;
        ctx.warn(format!(
            "found existing config snapshot at {}, resuming from it",
            snapshots.path().display()
        ));
        ctx.config().set_backup(backup);
        return Ok(());
    }

    let backup = store.get_object("config").await?.unwrap_or_default();
    snapshots.save(&backup)?;
    ctx.config().set_backup(backup);
    Ok(())
}

/// Push the relaxed temporary configuration to the target.
pub async fn apply_temporary_config(
    ctx: &Arc<RunContext>,
    store: &Arc<dyn TargetStore>,
) -> Result<(), MigrateError> {
    let mut temporary = ctx.config().backup().unwrap_or_default();
    merge_fields(&mut temporary, &ctx.run_config().temporary_config);

    if ctx.run_config().auto_confirm_emails {
        // no mail host, no confirmation emails with expiring links
        temporary.insert(SMTP_HOST_KEY.into(), Value::String(String::new()));
    }

    store.set_object("config", temporary.clone()).await?;
    ctx.config().set_temporary(temporary);
    Ok(())
}

/// Put the captured configuration back and drop the recovery marker.
///
/// Never fails the run: forum content is already imported at this point and
/// losing it over a config write would be a far worse outcome than asking
/// an operator to apply the logged configuration by hand.
pub async fn restore_config(
    ctx: &Arc<RunContext>,
    store: &Arc<dyn TargetStore>,
    snapshots: &SnapshotStore,
) {
    if !snapshots.exists() {
        ctx.warn(format!(
            "cannot restore the target config, {} does not exist",
            snapshots.path().display()
        ));
        return;
    }

    let backup = match snapshots.load() {
        Ok(backup) => backup,
        Err(err) => {
            ctx.error(format!("could not read the config snapshot: {}", err));
            log_for_manual_recovery(ctx);
            return;
        }
    };
    ctx.config().set_backup(backup.clone());

    // replace, not merge: keys added by the temporary overlay must not
    // survive the restore
    let push = async {
        store.delete_key("config").await?;
        store.set_object("config", backup.clone()).await
    };
    if let Err(err) = push.await {
        ctx.error(format!("restoring the target config failed: {}", err));
        log_for_manual_recovery(ctx);
        return;
    }

    ctx.success(format!(
        "config restored: {}",
        Value::Object(backup.clone())
    ));

    if let Err(err) = snapshots.remove() {
        ctx.warn(format!(
            "config restored but the snapshot file could not be removed: {}",
            err
        ));
    }
}

/// The snapshot file stays on disk in this path; dump the cached config at
/// error severity so an operator can apply it manually.
fn log_for_manual_recovery(ctx: &RunContext) {
    let cached = ctx
        .config()
        .backup()
        .map(Value::Object)
        .unwrap_or(json!(null));
    ctx.error(format!(
        "apply this configuration manually to recover: {}",
        cached
    ));
}
