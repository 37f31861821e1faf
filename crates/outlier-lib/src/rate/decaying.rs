//! Exponentially decayed average rate
//!
//! Meter-style moving average: marks accumulate in an `uncounted` counter
//! and the average is advanced once per elapsed tick, lazily, by whichever
//! caller wins the CAS on `last_tick`.

use crate::clock::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default interval between decay ticks (5 seconds)
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Default averaging window (1 minute)
pub const DEFAULT_AVERAGING_WINDOW: Duration = Duration::from_secs(60);

/// Exponentially weighted moving average of an event rate, in events/sec
pub struct DecayingRate {
    uncounted: AtomicU64,
    /// f64 bit pattern of the current average
    rate_bits: AtomicU64,
    last_tick_nanos: AtomicU64,
    tick_nanos: u64,
    tick_secs: f64,
    alpha: f64,
    clock: Arc<dyn Clock>,
}

impl DecayingRate {
    /// Create an average advanced every `tick` with time constant `window`
    pub fn new(clock: Arc<dyn Clock>, tick: Duration, window: Duration) -> Self {
        let tick_nanos = (tick.as_nanos() as u64).max(1);
        let tick_secs = tick_nanos as f64 / 1e9;
        let alpha = 1.0 - (-tick_secs / window.as_secs_f64().max(f64::MIN_POSITIVE)).exp();
        let start = clock.now().as_nanos() as u64;

        Self {
            uncounted: AtomicU64::new(0),
            rate_bits: AtomicU64::new(0f64.to_bits()),
            last_tick_nanos: AtomicU64::new(start),
            tick_nanos,
            tick_secs,
            alpha,
            clock,
        }
    }

    /// Smoothing factor applied per tick
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Register `n` events at the current instant
    pub fn observe(&self, n: u64) {
        self.tick_if_necessary();
        self.uncounted.fetch_add(n, Ordering::AcqRel);
    }

    /// Current decayed average in events/sec
    pub fn rate(&self) -> f64 {
        self.tick_if_necessary();
        f64::from_bits(self.rate_bits.load(Ordering::Acquire))
    }

    fn tick_if_necessary(&self) {
        let old = self.last_tick_nanos.load(Ordering::Acquire);
        let now = self.clock.now().as_nanos() as u64;
        let age = now.saturating_sub(old);
        if age < self.tick_nanos {
            return;
        }

        let new_tick = now - age % self.tick_nanos;
        if self
            .last_tick_nanos
            .compare_exchange(old, new_tick, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.apply_ticks(age / self.tick_nanos);
        }
    }

    fn apply_ticks(&self, ticks: u64) {
        let count = self.uncounted.swap(0, Ordering::AcqRel);
        let instant = count as f64 / self.tick_secs;
        let alpha = self.alpha;
        // Every tick after the first sees an empty accumulator and only decays
        let idle_decay = (1.0 - alpha).powf(ticks.saturating_sub(1) as f64);

        let _ = self
            .rate_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let rate = f64::from_bits(bits);
                let next = (rate + alpha * (instant - rate)) * idle_decay;
                Some(next.max(0.0).to_bits())
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn meter(clock: &ManualClock) -> DecayingRate {
        DecayingRate::new(
            Arc::new(clock.clone()),
            DEFAULT_TICK_INTERVAL,
            DEFAULT_AVERAGING_WINDOW,
        )
    }

    #[test]
    fn test_seeded_from_zero() {
        let clock = ManualClock::new();
        let meter = meter(&clock);
        assert_eq!(meter.rate(), 0.0);

        // Marks are not visible until the next tick
        meter.observe(100);
        assert_eq!(meter.rate(), 0.0);
    }

    #[test]
    fn test_single_tick_update() {
        let clock = ManualClock::new();
        let meter = meter(&clock);

        meter.observe(100);
        clock.advance(Duration::from_secs(5));

        let expected = meter.alpha() * 20.0;
        assert!((meter.rate() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_converges_to_sustained_rate() {
        let clock = ManualClock::new();
        let meter = meter(&clock);

        for _ in 0..600 {
            meter.observe(50);
            clock.advance(Duration::from_secs(1));
        }

        assert!((meter.rate() - 50.0).abs() < 0.5, "rate = {}", meter.rate());
    }

    #[test]
    fn test_decays_when_idle() {
        let clock = ManualClock::new();
        let meter = meter(&clock);

        for _ in 0..300 {
            meter.observe(40);
            clock.advance(Duration::from_secs(1));
        }
        let busy = meter.rate();

        clock.advance(Duration::from_secs(60));
        let idle = meter.rate();
        assert!(idle < busy);
        assert!(idle > 0.0);

        // Catching up many ticks at once matches ticking one at a time
        let stepped = meter_after_idle_steps(40, 300, 12);
        assert!((idle - stepped).abs() < 1e-6);
    }

    fn meter_after_idle_steps(per_sec: u64, busy_secs: usize, idle_ticks: usize) -> f64 {
        let clock = ManualClock::new();
        let meter = meter(&clock);
        for _ in 0..busy_secs {
            meter.observe(per_sec);
            clock.advance(Duration::from_secs(1));
        }
        meter.rate();
        for _ in 0..idle_ticks {
            clock.advance(Duration::from_secs(5));
            meter.rate();
        }
        meter.rate()
    }

    #[test]
    fn test_never_negative() {
        let clock = ManualClock::new();
        let meter = meter(&clock);
        meter.observe(1);
        clock.advance(Duration::from_secs(3600));
        assert!(meter.rate() >= 0.0);
    }
}
