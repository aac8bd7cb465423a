use thiserror::Error;

use crate::store::StoreError;

/// Infrastructure-level failures that abort the current phase and the run.
///
/// Record-level failures (a single entity rejected by the target) are not
/// represented here; pipelines log them and mark the record skipped.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("target store error: {0}")]
    Store(#[from] StoreError),
    #[error("config snapshot io: {0}")]
    SnapshotIo(#[from] std::io::Error),
    #[error("config snapshot format: {0}")]
    SnapshotFormat(#[from] serde_json::Error),
    #[error("batch worker failed: {0}")]
    Worker(String),
}
