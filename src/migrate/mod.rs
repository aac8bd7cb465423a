//! Staged bulk-migration engine.
//!
//! Moves a normalized forum export (categories, users, topics, posts) into a
//! live target forum through the [`TargetStore`](crate::store::TargetStore)
//! contract, while the target keeps enforcing its own referential and
//! validation rules.
//!
//! # Architecture Overview
//!
//! - **`runner`**: Phase orchestrator. Runs the fixed sequence (flush,
//!   config backup, temporary config, the four import pipelines, the
//!   reconciliation passes, config restore, teardown) and propagates the
//!   first infrastructure failure; restore is still attempted once the
//!   temporary config has been applied.
//!
//! - **`batch`**: Bounded-concurrency executor over an ordered id list with
//!   throttled progress reporting. All per-record work goes through it.
//!
//! - **`flush`**: Clears previously imported content from the target (purge
//!   categories with cascade, purge users except account 1, reset the
//!   global id/count counters) using paged id enumeration.
//!
//! - **`categories` / `users` / `topics` / `posts`**: One pipeline per
//!   entity type. Each builds a creation request from the raw record, calls
//!   the target, merges the authoritative result back into the dataset and
//!   tags the record imported. Topics and posts gate on their parent's
//!   import state first; a failed gate is a warning and a skip, never an
//!   error.
//!
//! - **`reconcile`**: Post-import corrective passes that need the final
//!   post ordering: re-locking topics whose lock was deferred during the
//!   post phase, and re-keying each topic in its category by the most
//!   recent post's timestamp.
//!
//! - **`config_swap`**: Backup → temporary overlay → restore of the
//!   target's configuration, crash-resumable through the durable snapshot
//!   file.
//!
//! - **`usernames`**: Deterministic username/slug resolution cascade.
//!
//! # Error Model
//!
//! Record-level failures (one entity rejected) are warnings; the record is
//! tagged `Skipped` and the batch continues. Infrastructure failures
//! surface as [`MigrateError`](crate::error::MigrateError) and abort the
//! run.

pub mod batch;
pub mod categories;
pub mod config_swap;
pub mod flush;
pub mod posts;
pub mod reconcile;
pub mod runner;
pub mod topics;
pub mod usernames;
pub mod users;

pub use runner::Migrator;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{ConfigStore, RunConfig};
use crate::data::ImportDataset;
use crate::events::{EventBus, MigrateEvent, ProgressGate};

/// Target uid for unresolved authors; the target treats it as a guest.
pub const GUEST_UID: i64 = 0;
/// The target's pre-existing administrator account.
pub const ADMIN_UID: i64 = 1;

/// Everything one run owns: the merged configuration, the dataset arena,
/// the event bus and the seeded RNG. Created at run start, dropped at run
/// end; no process-wide state.
pub struct RunContext {
    config: ConfigStore,
    pub data: ImportDataset,
    events: EventBus,
    progress_gate: Mutex<ProgressGate>,
    rng: Mutex<StdRng>,
    started_at: i64,
}

impl RunContext {
    pub fn new(data: ImportDataset, run_config: RunConfig) -> Self {
        let rng = match run_config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let progress_gate = Mutex::new(ProgressGate::new(run_config.progress_interval));
        Self {
            config: ConfigStore::new(run_config),
            data,
            events: EventBus::new(),
            progress_gate,
            rng: Mutex::new(rng),
            started_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn run_config(&self) -> &RunConfig {
        self.config.run()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run start time in epoch milliseconds; the fallback timestamp for
    /// records without one.
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    // -- reporter: every notification goes to the log facade and, as a
    //    structured event, to the bus --

    pub fn phase(&self, name: &str) {
        self.progress_gate.lock().reset();
        log::debug!("phase: {}", name);
        self.events.emit(MigrateEvent::Phase {
            phase: name.to_string(),
            data: None,
        });
    }

    pub fn progress(&self, count: usize, total: usize) {
        let percentage = ProgressGate::percentage(count, total);
        if self.progress_gate.lock().admit(percentage) {
            self.events.emit(MigrateEvent::Progress {
                count,
                total,
                percentage,
            });
        }
    }

    /// Per-record chatter; dropped entirely unless verbose logging is on.
    pub fn log(&self, message: impl Into<String>) {
        let logging = &self.run_config().logging;
        if !logging.verbose {
            return;
        }
        let message = message.into();
        log::debug!("{}", message);
        if logging.emit_log_events {
            self.events.emit(MigrateEvent::Log { message });
        }
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}", message);
        self.events.emit(MigrateEvent::Warn { message });
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        log::error!("{}", message);
        self.events.emit(MigrateEvent::Error { message });
    }

    pub fn success(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        self.events.emit(MigrateEvent::Success { message });
    }

    // -- seeded randomness --

    /// Uniform pick from a cosmetic palette.
    pub fn pick<'a>(&self, palette: &'a [String]) -> Option<&'a str> {
        if palette.is_empty() {
            return None;
        }
        let index = self.rng.lock().gen_range(0..palette.len());
        Some(&palette[index])
    }

    /// Generated password when password generation is enabled, uniform char
    /// choice per position.
    pub fn generate_password(&self) -> Option<String> {
        let policy = &self.run_config().password_gen;
        if !policy.enabled || policy.chars.is_empty() {
            return None;
        }
        let chars: Vec<char> = policy.chars.chars().collect();
        let mut rng = self.rng.lock();
        Some(
            (0..policy.len)
                .map(|_| chars[rng.gen_range(0..chars.len())])
                .collect(),
        )
    }
}

/// Author uid for a topic or post, from its source author id.
///
/// The takeover mapping (cached during the user phase) wins; otherwise the
/// source author's imported uid; otherwise guest.
pub(crate) fn resolve_author(ctx: &RunContext, source_uid: Option<String>) -> i64 {
    let Some(source_uid) = source_uid else {
        return GUEST_UID;
    };
    if ctx.config.takeover_source().as_deref() == Some(source_uid.as_str()) {
        return ADMIN_UID;
    }
    ctx.data
        .users
        .get(&source_uid)
        .and_then(|user| user.imported_id())
        .unwrap_or(GUEST_UID)
}
