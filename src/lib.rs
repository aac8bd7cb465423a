//! Staged bulk migration of forum exports into a live target forum.
//!
//! The engine takes a normalized [`ImportDataset`] (users, categories,
//! topics, posts keyed by their original ids) plus a [`RunConfig`], and
//! drives the full phase sequence against an abstract [`TargetStore`]:
//! flush, config backup, temporary config, the four dependency-gated import
//! pipelines, the reconciliation passes, config restore, teardown. Progress
//! and outcomes are observable as structured events.
//!
//! ```no_run
//! use std::sync::Arc;
//! use forum_migrate::{ImportDataset, Migrator, RunConfig};
//! use forum_migrate::test_support::MemoryStore;
//!
//! # async fn demo() -> Result<(), forum_migrate::MigrateError> {
//! let store = Arc::new(MemoryStore::new());
//! let migrator = Migrator::new(
//!     ImportDataset::new(),
//!     RunConfig::default(),
//!     store,
//!     "tmp/config-backup.json",
//! );
//! let _events = migrator.subscribe();
//! migrator.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod migrate;
pub mod snapshot;
pub mod store;
pub mod test_support;

pub use config::RunConfig;
pub use data::{FieldBag, ImportDataset, ImportState, Record, SkipReason};
pub use error::MigrateError;
pub use events::{EventBus, MigrateEvent};
pub use migrate::{Migrator, RunContext};
pub use snapshot::SnapshotStore;
pub use store::{StoreError, TargetStore};

use env_logger::Env;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Initialize the process logger once; embedding applications and tests
/// call this instead of wiring `env_logger` themselves.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    });
}
