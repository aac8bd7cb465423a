//! Structured run events.
//!
//! Every run owns one `EventBus`; the engine publishes phase changes,
//! throttled progress, and log/warning/error/success notifications, and any
//! number of observers consume them via `subscribe`. The event stream is
//! deliberately separate from the `log` facade: sinks configure the logger,
//! observers subscribe here.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Buffered events per subscriber before the channel starts lagging.
const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MigrateEvent {
    /// A phase started or finished.
    Phase {
        phase: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    /// Throttled progress inside the current phase.
    Progress {
        count: usize,
        total: usize,
        percentage: f64,
    },
    Log { message: String },
    Warn { message: String },
    Error { message: String },
    Success { message: String },
    /// The run finished, config restored, teardown done.
    Complete,
}

/// Broadcast fan-out of `MigrateEvent` to all subscribers.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<MigrateEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Receive every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<MigrateEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: MigrateEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress throttle for one phase.
///
/// Admits the first emission (0%), the last (>= 100%), and any advance of
/// more than `interval` percentage points since the previously admitted
/// one; everything else is dropped to bound event volume on large batches.
#[derive(Debug)]
pub struct ProgressGate {
    interval: f64,
    last: f64,
}

impl ProgressGate {
    pub fn new(interval: f64) -> Self {
        Self { interval, last: 0.0 }
    }

    /// Reset at a phase boundary.
    pub fn reset(&mut self) {
        self.last = 0.0;
    }

    /// Percentage for `(count, total)`; an empty batch is complete.
    pub fn percentage(count: usize, total: usize) -> f64 {
        if total == 0 {
            100.0
        } else {
            count as f64 / total as f64 * 100.0
        }
    }

    pub fn admit(&mut self, percentage: f64) -> bool {
        if percentage == 0.0 || percentage >= 100.0 || percentage - self.last > self.interval {
            self.last = percentage;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_admits_first_last_and_threshold_steps() {
        let mut gate = ProgressGate::new(2.0);
        let total = 200usize;

        let mut admitted = Vec::new();
        for count in 0..=total {
            let pct = ProgressGate::percentage(count, total);
            if gate.admit(pct) {
                admitted.push(pct);
            }
        }

        assert_eq!(admitted.first(), Some(&0.0));
        assert_eq!(admitted.last(), Some(&100.0));
        for pair in admitted.windows(2) {
            assert!(pair[1] > pair[0]);
            if pair[1] < 100.0 {
                assert!(pair[1] - pair[0] > 2.0);
            }
        }
    }

    #[test]
    fn empty_batches_report_complete() {
        assert_eq!(ProgressGate::percentage(0, 0), 100.0);
    }

    #[tokio::test]
    async fn bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(MigrateEvent::Complete);
        assert_eq!(rx.recv().await.unwrap(), MigrateEvent::Complete);
    }
}
