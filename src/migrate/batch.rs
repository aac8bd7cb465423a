//! Bounded-concurrency batch execution.
//!
//! Dispatches a worker per id in list order with at most `limit` in flight,
//! waits for all of them to settle, and reports throttled progress after
//! each completion. Workers return `Err` only for infrastructure failures;
//! that aborts the batch (outstanding tasks are dropped) and propagates.
//! Record-level problems are handled inside the worker: warn, tag the
//! record skipped, return `Ok`.

use std::future::Future;

use tokio::task::JoinSet;

use crate::error::MigrateError;
use crate::migrate::RunContext;

/// Run `worker(index, id)` for every id with bounded concurrency.
///
/// Completion order is unspecified; dispatch order follows the id list up
/// to the concurrency window.
pub async fn for_each_limit<F, Fut>(
    ctx: &RunContext,
    ids: &[String],
    limit: usize,
    worker: F,
) -> Result<(), MigrateError>
where
    F: Fn(usize, String) -> Fut,
    Fut: Future<Output = Result<(), MigrateError>> + Send + 'static,
{
    let total = ids.len();
    ctx.progress(0, total);
    if total == 0 {
        return Ok(());
    }

    let limit = limit.max(1);
    let mut tasks: JoinSet<Result<(), MigrateError>> = JoinSet::new();
    let mut completed = 0usize;

    for (index, id) in ids.iter().enumerate() {
        while tasks.len() >= limit {
            if let Some(joined) = tasks.join_next().await {
                settle(joined)?;
                completed += 1;
                ctx.progress(completed, total);
            }
        }
        tasks.spawn(worker(index, id.clone()));
    }

    while let Some(joined) = tasks.join_next().await {
        settle(joined)?;
        completed += 1;
        ctx.progress(completed, total);
    }

    Ok(())
}

fn settle(
    joined: Result<Result<(), MigrateError>, tokio::task::JoinError>,
) -> Result<(), MigrateError> {
    joined.map_err(|err| MigrateError::Worker(err.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::data::ImportDataset;
    use crate::events::MigrateEvent;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    fn drain_progress(
        rx: &mut tokio::sync::broadcast::Receiver<MigrateEvent>,
    ) -> Vec<(usize, usize, f64)> {
        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let MigrateEvent::Progress {
                count,
                total,
                percentage,
            } = event
            {
                progress.push((count, total, percentage));
            }
        }
        progress
    }

    #[tokio::test]
    async fn visits_every_id_and_respects_the_limit() {
        let ctx = Arc::new(RunContext::new(ImportDataset::new(), RunConfig::default()));
        let visited = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let all = ids(57);
        for_each_limit(&ctx, &all, 5, |_, _| {
            let visited = visited.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                visited.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(visited.load(Ordering::SeqCst), 57);
        assert!(peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn progress_hits_zero_and_total_with_threshold_gaps() {
        let ctx = Arc::new(RunContext::new(ImportDataset::new(), RunConfig::default()));
        let mut rx = ctx.events().subscribe();

        let all = ids(200);
        for_each_limit(&ctx, &all, 10, |_, _| async { Ok(()) })
            .await
            .unwrap();

        let progress = drain_progress(&mut rx);
        assert_eq!(progress.first().map(|p| p.0), Some(0));
        assert_eq!(progress.last().map(|p| p.0), Some(200));

        let interval = ctx.run_config().progress_interval;
        for pair in progress.windows(2) {
            assert!(pair[1].2 >= pair[0].2, "progress must not regress");
            if pair[1].2 < 100.0 {
                assert!(pair[1].2 - pair[0].2 > interval);
            }
        }
    }

    #[tokio::test]
    async fn a_worker_error_aborts_the_batch() {
        let ctx = Arc::new(RunContext::new(ImportDataset::new(), RunConfig::default()));
        let completed = Arc::new(AtomicUsize::new(0));

        let all = ids(40);
        let result = for_each_limit(&ctx, &all, 4, |index, _| {
            let completed = completed.clone();
            async move {
                if index == 7 {
                    return Err(MigrateError::Worker("store unreachable".into()));
                }
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(result.is_err());
        assert!(completed.load(Ordering::SeqCst) < 40);
    }

    #[tokio::test]
    async fn an_empty_batch_completes_immediately() {
        let ctx = Arc::new(RunContext::new(ImportDataset::new(), RunConfig::default()));
        let mut rx = ctx.events().subscribe();

        for_each_limit(&ctx, &[], 10, |_, _| async { Ok(()) })
            .await
            .unwrap();

        let progress = drain_progress(&mut rx);
        assert_eq!(progress, vec![(0, 0, 100.0)]);
    }
}
