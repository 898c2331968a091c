//! Monotonic time source for the cooperative loops

use embedded_hal::delay::DelayNs;

/// Millisecond clock plus blocking delay.
///
/// Every timer in the crate (line timeouts, transfer window, announce and
/// heartbeat intervals, idle timeout, relay interval) reads `now_ms`, so a
/// host test can drive them by advancing a fake clock.
pub trait Clock: DelayNs {
    /// Milliseconds since boot
    fn now_ms(&self) -> u64;

    /// Milliseconds elapsed since `since`, saturating on clock skew
    fn elapsed_ms(&self, since: u64) -> u64 {
        self.now_ms().saturating_sub(since)
    }
}

impl<T: Clock + ?Sized> Clock for &mut T {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// Boot-relative clock backed by the embassy time driver
#[cfg(feature = "esp32s3")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[cfg(feature = "esp32s3")]
impl DelayNs for SystemClock {
    fn delay_ns(&mut self, ns: u32) {
        embassy_time::block_for(embassy_time::Duration::from_micros(ns.div_ceil(1_000) as u64));
    }

    fn delay_ms(&mut self, ms: u32) {
        embassy_time::block_for(embassy_time::Duration::from_millis(ms as u64));
    }
}

#[cfg(feature = "esp32s3")]
impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        embassy_time::Instant::now().as_millis()
    }
}

/// Fixed-period gate used by the supervisor and relay loops.
#[derive(Debug, Clone, Copy)]
pub struct Interval {
    period_ms: u64,
    last_ms: u64,
    due_now: bool,
}

impl Interval {
    /// Creates an interval whose first period starts at `now_ms`
    pub fn new(period_ms: u64, now_ms: u64) -> Self {
        Self {
            period_ms,
            last_ms: now_ms,
            due_now: false,
        }
    }

    /// Returns true once per elapsed period and restarts the period
    pub fn tick(&mut self, now_ms: u64) -> bool {
        if self.due_now || now_ms.saturating_sub(self.last_ms) >= self.period_ms {
            self.due_now = false;
            self.last_ms = now_ms;
            true
        } else {
            false
        }
    }

    /// Restarts the period at `now_ms`
    pub fn reset(&mut self, now_ms: u64) {
        self.due_now = false;
        self.last_ms = now_ms;
    }

    /// Forces the next `tick` to fire
    pub fn expire(&mut self) {
        self.due_now = true;
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }
}
