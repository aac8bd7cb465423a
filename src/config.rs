//! Run configuration and the per-run config store.
//!
//! `RunConfig` deserializes with field-level defaults, so a partial override
//! document merges naturally over the built-in defaults. The `ConfigStore`
//! additionally caches the two target-config snapshots handled by the swap
//! protocol and the admin-takeover mapping discovered during the user phase.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::data::FieldBag;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RunConfig {
    pub logging: LoggingConfig,
    pub password_gen: PasswordGenConfig,
    /// Cosmetic palettes for created categories; one entry of each is picked
    /// uniformly at random per category.
    pub category_text_colors: Vec<String>,
    pub category_bg_colors: Vec<String>,
    pub category_icons: Vec<String>,
    /// Mark every imported user's email address confirmed in the target.
    pub auto_confirm_emails: bool,
    /// Source reputation values are scaled by this factor.
    pub user_reputation_multiplier: f64,
    pub admin_take_ownership: AdminTakeOwnership,
    /// Overlay pushed over the target's config for the duration of the run:
    /// relaxed limits so historic content passes validation.
    pub temporary_config: FieldBag,
    /// Records processed concurrently per phase.
    pub batch_size: usize,
    /// Minimum percentage-point advance between two progress events.
    pub progress_interval: f64,
    /// Fixed RNG seed for deterministic palette/password choices in tests.
    pub random_seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Per-record chatter ("saving topic ...") on the log facade.
    pub verbose: bool,
    /// Emit `Log` events on the bus in addition to warnings/errors.
    pub emit_log_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            emit_log_events: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PasswordGenConfig {
    pub enabled: bool,
    pub chars: String,
    pub len: usize,
}

impl Default for PasswordGenConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            chars: "{}.-_=+qwertyuiopasdfghjklzxcvbnmQWERTYUIOPASDFGHJKLZXCVBNM1234567890"
                .to_string(),
            len: 13,
        }
    }
}

/// Remap one orphaned legacy admin account onto the target's account 1
/// instead of creating a fresh user for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AdminTakeOwnership {
    pub enable: bool,
    /// Legacy admin username, matched case-insensitively.
    pub username: String,
}

impl Default for AdminTakeOwnership {
    fn default() -> Self {
        Self {
            enable: false,
            username: "admin".to_string(),
        }
    }
}

fn default_temporary_config() -> FieldBag {
    match json!({
        "post_delay": 0,
        "min_post_length": 1,
        "min_password_length": 0,
        "min_title_length": 1,
        "max_title_length": 300,
        "max_username_length": 100,
        "require_email_confirmation": 0,
        "allow_guest_posting": 1
    }) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            password_gen: PasswordGenConfig::default(),
            category_text_colors: vec!["#FFFFFF".to_string()],
            category_bg_colors: vec![
                "#ab1290".to_string(),
                "#004c66".to_string(),
                "#0059b2".to_string(),
            ],
            category_icons: vec!["fa-comment".to_string()],
            auto_confirm_emails: true,
            user_reputation_multiplier: 1.0,
            admin_take_ownership: AdminTakeOwnership::default(),
            temporary_config: default_temporary_config(),
            batch_size: 10,
            progress_interval: 2.0,
            random_seed: None,
        }
    }
}

/// Per-run configuration state: the merged `RunConfig` plus the cached
/// target-config snapshots and the takeover mapping.
#[derive(Debug)]
pub struct ConfigStore {
    run: RunConfig,
    /// Target config captured before the temporary overlay was applied.
    backup: RwLock<Option<FieldBag>>,
    /// The merged temporary config as pushed to the target.
    temporary: RwLock<Option<FieldBag>>,
    /// Source id of the record remapped to the target's account 1.
    takeover_source: RwLock<Option<String>>,
}

impl ConfigStore {
    pub fn new(run: RunConfig) -> Self {
        Self {
            run,
            backup: RwLock::new(None),
            temporary: RwLock::new(None),
            takeover_source: RwLock::new(None),
        }
    }

    pub fn run(&self) -> &RunConfig {
        &self.run
    }

    pub fn set_backup(&self, config: FieldBag) {
        *self.backup.write() = Some(config);
    }

    pub fn backup(&self) -> Option<FieldBag> {
        self.backup.read().clone()
    }

    pub fn set_temporary(&self, config: FieldBag) {
        *self.temporary.write() = Some(config);
    }

    pub fn temporary(&self) -> Option<FieldBag> {
        self.temporary.read().clone()
    }

    pub fn set_takeover_source(&self, source_id: String) {
        *self.takeover_source.write() = Some(source_id);
    }

    pub fn takeover_source(&self) -> Option<String> {
        self.takeover_source.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_overrides_merge_over_defaults() {
        let config: RunConfig = serde_json::from_value(json!({
            "auto_confirm_emails": false,
            "admin_take_ownership": { "enable": true, "username": "root" }
        }))
        .unwrap();

        assert!(!config.auto_confirm_emails);
        assert!(config.admin_take_ownership.enable);
        assert_eq!(config.admin_take_ownership.username, "root");
        // untouched fields keep their defaults
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.category_icons, vec!["fa-comment".to_string()]);
        assert_eq!(config.password_gen.len, 13);
    }

    #[test]
    fn temporary_config_defaults_relax_limits() {
        let config = RunConfig::default();
        assert_eq!(config.temporary_config["min_post_length"], json!(1));
        assert_eq!(config.temporary_config["require_email_confirmation"], json!(0));
    }
}
