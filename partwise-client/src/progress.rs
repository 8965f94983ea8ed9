//! Aggregation of per-worker byte counts into one progress value

use partwise_core::ProgressEvent;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Observer of upload progress
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

#[derive(Default)]
struct Slots {
    transferred: Vec<u64>,
    high_water: u64,
}

/// Combines the transfer counters of concurrent workers.
///
/// Each worker owns a slot holding the bytes it has moved in the current
/// attempt (finished parts plus the in-flight part). Reported `loaded` values
/// never decrease over the life of the aggregator, even when an attempt is
/// abandoned mid-part and its partial bytes disappear.
pub struct ProgressAggregator {
    total: Option<u64>,
    callback: Option<ProgressCallback>,
    slots: Mutex<Slots>,
    /// Last value handed to the callback; serializes delivery
    delivered: Mutex<u64>,
}

impl ProgressAggregator {
    pub fn new(total: Option<u64>, callback: Option<ProgressCallback>) -> Arc<Self> {
        Arc::new(ProgressAggregator {
            total,
            callback,
            slots: Mutex::new(Slots::default()),
            delivered: Mutex::new(0),
        })
    }

    /// Drop all worker slots ahead of a new attempt
    pub fn reset(&self) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.transferred.clear();
        }
    }

    /// Allocate a slot for one worker
    pub fn listener(self: &Arc<Self>) -> ProgressListener {
        let slot = match self.slots.lock() {
            Ok(mut slots) => {
                slots.transferred.push(0);
                slots.transferred.len() - 1
            }
            Err(_) => usize::MAX,
        };
        ProgressListener {
            aggregator: Arc::clone(self),
            slot,
        }
    }

    /// Highest `loaded` value reported so far
    pub fn loaded(&self) -> u64 {
        self.slots.lock().map(|s| s.high_water).unwrap_or(0)
    }

    fn update(&self, slot: usize, transferred: u64) {
        let loaded = {
            let Ok(mut slots) = self.slots.lock() else {
                return;
            };
            if let Some(value) = slots.transferred.get_mut(slot) {
                *value = transferred;
            }
            let sum: u64 = slots.transferred.iter().sum();
            slots.high_water = slots.high_water.max(sum);
            slots.high_water
        };

        let Some(callback) = &self.callback else {
            return;
        };
        let Ok(mut delivered) = self.delivered.lock() else {
            return;
        };
        // A concurrent update may have delivered a larger value already
        if loaded < *delivered {
            return;
        }
        *delivered = loaded;
        let event = ProgressEvent {
            loaded,
            total: self.total,
        };
        if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            warn!("progress callback panicked; ignoring");
        }
    }
}

/// One worker's handle on the aggregator
pub struct ProgressListener {
    aggregator: Arc<ProgressAggregator>,
    slot: usize,
}

impl ProgressListener {
    /// Record that this worker has transferred `transferred` bytes in total
    pub fn report(&self, transferred: u64) {
        self.aggregator.update(self.slot, transferred);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (ProgressCallback, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: ProgressCallback = Arc::new(move |event| sink.lock().unwrap().push(event));
        (callback, events)
    }

    #[test]
    fn test_sums_worker_slots() {
        let (callback, events) = recording();
        let aggregator = ProgressAggregator::new(Some(100), Some(callback));
        let a = aggregator.listener();
        let b = aggregator.listener();

        a.report(10);
        b.report(25);
        a.report(40);

        let loaded: Vec<u64> = events.lock().unwrap().iter().map(|e| e.loaded).collect();
        assert_eq!(loaded, vec![10, 35, 65]);
        assert!(events.lock().unwrap().iter().all(|e| e.total == Some(100)));
    }

    #[test]
    fn test_loaded_is_monotonic_across_reset() {
        let (callback, events) = recording();
        let aggregator = ProgressAggregator::new(None, Some(callback));
        let worker = aggregator.listener();
        worker.report(50);

        // The attempt is abandoned, the next one starts from its skipped parts only
        aggregator.reset();
        let worker = aggregator.listener();
        worker.report(30);
        worker.report(70);

        let loaded: Vec<u64> = events.lock().unwrap().iter().map(|e| e.loaded).collect();
        assert_eq!(loaded, vec![50, 50, 70]);
        assert_eq!(aggregator.loaded(), 70);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let callback: ProgressCallback = Arc::new(|_| panic!("observer bug"));
        let aggregator = ProgressAggregator::new(Some(10), Some(callback));
        aggregator.listener().report(5);
        assert_eq!(aggregator.loaded(), 5);
    }
}
