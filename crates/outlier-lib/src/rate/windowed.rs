//! Windowed actual rate
//!
//! Counts events over a trailing window split into a ring of buckets.
//! The ring holds one bucket more than the window so the bucket sliding out
//! can be counted in proportion to the part still inside the window.
//! Each bucket is a single `AtomicU64` packing the bucket epoch in the high
//! 32 bits and the event count in the low 32 bits, so producers only ever
//! CAS and never lock against each other.

use crate::clock::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default trailing window (1 second)
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Default number of buckets in the window
pub const DEFAULT_BUCKETS: usize = 10;

const COUNT_MASK: u64 = u32::MAX as u64;

fn pack(epoch: u32, count: u32) -> u64 {
    ((epoch as u64) << 32) | count as u64
}

fn unpack(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, (packed & COUNT_MASK) as u32)
}

/// Lock-free trailing-window event counter
pub struct WindowedCounter {
    slots: Box<[AtomicU64]>,
    buckets: u32,
    bucket_nanos: u64,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl WindowedCounter {
    /// Create a counter over `window` divided into `buckets` slots.
    ///
    /// Callers validate that both are non-zero; a zero bucket count is
    /// clamped to one.
    pub fn new(clock: Arc<dyn Clock>, window: Duration, buckets: usize) -> Self {
        let buckets = buckets.max(1);
        let bucket_nanos = ((window.as_nanos() as u64) / buckets as u64).max(1);
        let slots = (0..=buckets).map(|_| AtomicU64::new(0)).collect();

        Self {
            slots,
            buckets: buckets as u32,
            bucket_nanos,
            window: Duration::from_nanos(bucket_nanos * buckets as u64),
            clock,
        }
    }

    /// Effective window after rounding to whole buckets
    pub fn window(&self) -> Duration {
        self.window
    }

    fn epoch_at(&self, nanos: u64) -> u32 {
        // Truncation wraps after 2^32 buckets; comparisons use wrapping arithmetic
        (nanos / self.bucket_nanos) as u32
    }

    fn now_nanos(&self) -> u64 {
        self.clock.now().as_nanos() as u64
    }

    /// Register `n` events at the current instant
    pub fn observe(&self, n: u64) {
        if n == 0 {
            return;
        }
        let n = n.min(COUNT_MASK) as u32;
        let epoch = self.epoch_at(self.now_nanos());
        let slot = &self.slots[epoch as usize % self.slots.len()];

        let _ = slot.fetch_update(Ordering::AcqRel, Ordering::Acquire, |packed| {
            let (slot_epoch, count) = unpack(packed);
            let slot_is_older = (epoch.wrapping_sub(slot_epoch) as i32) > 0;
            if slot_is_older {
                Some(pack(epoch, n))
            } else {
                // Same bucket, or a producer whose clock read went stale while
                // the bucket rolled forward: count into whatever is there.
                Some(pack(slot_epoch, count.saturating_add(n)))
            }
        });
    }

    /// Events counted in the trailing window
    ///
    /// Buckets fully inside the window count whole. The oldest bucket is
    /// weighted by the share of it that has not yet slid out.
    pub fn count(&self) -> f64 {
        let now = self.now_nanos();
        let epoch = self.epoch_at(now);
        let elapsed = (now % self.bucket_nanos) as f64 / self.bucket_nanos as f64;

        self.slots
            .iter()
            .map(|slot| unpack(slot.load(Ordering::Acquire)))
            .map(|(slot_epoch, count)| {
                let age = epoch.wrapping_sub(slot_epoch);
                if age < self.buckets {
                    count as f64
                } else if age == self.buckets {
                    count as f64 * (1.0 - elapsed)
                } else {
                    0.0
                }
            })
            .sum()
    }

    /// Events per second over the trailing window
    pub fn rate(&self) -> f64 {
        self.count() / self.window.as_secs_f64()
    }
}
