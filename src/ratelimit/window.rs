//! Weighted two-window sliding counter.
//!
//! The admission rate over a rolling window is approximated from two adjacent
//! fixed windows: the count in the previous window is weighted by how much of
//! it still overlaps the rolling window and added to the current count. This
//! bounds a boundary-straddling burst to at most one extra quota over two
//! adjacent windows, instead of the doubled quota a plain fixed window
//! permits.
//!
//! Everything in this module is pure: callers pass `now_ms` in, no clock is
//! read here. Counter stores run this math inside their per-key atomic unit;
//! the Redis store mirrors it in Lua.

use std::time::Duration;

/// Mutable per-key window record. Owned by a counter store, never cached by
/// the engine across calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowState {
    pub current: u64,
    pub previous: u64,
    pub window_start_ms: u64,
}

impl WindowState {
    /// Fresh record, as created on the first request for a key.
    pub fn new(now_ms: u64) -> Self {
        Self {
            current: 0,
            previous: 0,
            window_start_ms: now_ms,
        }
    }

    fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.window_start_ms)
    }

    /// True once the record has sat idle past its TTL (two full windows).
    pub fn is_expired(&self, now_ms: u64, window_ms: u64) -> bool {
        self.elapsed_ms(now_ms) >= 2 * window_ms
    }

    /// Shift windows if the current one has ended.
    ///
    /// One elapsed window moves current into previous; two or more elapsed
    /// windows mean there was no traffic for a full window, so both counts
    /// are stale and the record resets entirely.
    pub fn roll(&mut self, now_ms: u64, window_ms: u64) {
        let elapsed = self.elapsed_ms(now_ms);
        if elapsed >= 2 * window_ms {
            self.current = 0;
            self.previous = 0;
            self.window_start_ms = now_ms;
        } else if elapsed >= window_ms {
            self.previous = self.current;
            self.current = 0;
            self.window_start_ms = now_ms;
        }
    }

    /// Roll, estimate, and admit-and-increment if under the limit.
    ///
    /// This is the read-check-increment sequence that stores must execute
    /// atomically per key.
    pub fn try_admit(&mut self, now_ms: u64, window_ms: u64, limit: u64) -> WindowSnapshot {
        self.roll(now_ms, window_ms);
        let elapsed_ms = self.elapsed_ms(now_ms);
        let estimated = weighted_estimate(self.current, self.previous, elapsed_ms, window_ms);

        let admitted = estimated < limit as f64;
        if admitted {
            self.current += 1;
        }

        WindowSnapshot {
            admitted,
            current_count: self.current,
            previous_count: self.previous,
            elapsed_ms,
            window_ms,
        }
    }

    /// Estimate without mutating: what `try_admit` would see, with no
    /// increment applied and no record written.
    pub fn observe(&self, now_ms: u64, window_ms: u64, limit: u64) -> WindowSnapshot {
        let mut probe = self.clone();
        probe.roll(now_ms, window_ms);
        let elapsed_ms = probe.elapsed_ms(now_ms);
        let estimated = weighted_estimate(probe.current, probe.previous, elapsed_ms, window_ms);

        WindowSnapshot {
            admitted: estimated < limit as f64,
            current_count: probe.current,
            previous_count: probe.previous,
            elapsed_ms,
            window_ms,
        }
    }
}

/// `current + previous * (1 - elapsed_fraction)`
pub fn weighted_estimate(current: u64, previous: u64, elapsed_ms: u64, window_ms: u64) -> f64 {
    let fraction = elapsed_fraction(elapsed_ms, window_ms);
    current as f64 + previous as f64 * (1.0 - fraction)
}

fn elapsed_fraction(elapsed_ms: u64, window_ms: u64) -> f64 {
    if window_ms == 0 {
        return 1.0;
    }
    (elapsed_ms as f64 / window_ms as f64).clamp(0.0, 1.0)
}

/// Result of one atomic store operation on a key's window record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSnapshot {
    /// Whether the request was admitted (and the increment applied).
    pub admitted: bool,
    /// Count in the active window, after any increment.
    pub current_count: u64,
    /// Count in the preceding window.
    pub previous_count: u64,
    /// Milliseconds elapsed in the active window at decision time.
    pub elapsed_ms: u64,
    /// The window length the record was evaluated against.
    pub window_ms: u64,
}

impl WindowSnapshot {
    /// Fraction of the active window that has elapsed, in `[0, 1]`.
    pub fn elapsed_fraction(&self) -> f64 {
        elapsed_fraction(self.elapsed_ms, self.window_ms)
    }

    /// The weighted estimate the decision was (or would be) based on.
    pub fn estimated(&self) -> f64 {
        weighted_estimate(
            self.current_count,
            self.previous_count,
            self.elapsed_ms,
            self.window_ms,
        )
    }

    /// Quota left in the rolling window: `limit - ceil(estimated)`, floored
    /// at zero.
    pub fn remaining(&self, limit: u64) -> u64 {
        limit.saturating_sub(self.estimated().ceil() as u64)
    }

    /// Time until the active fixed window ends.
    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.window_ms.saturating_sub(self.elapsed_ms))
    }

    /// Time until the weighted estimate decays below the limit.
    ///
    /// While the previous window still carries weight, its contribution
    /// decays linearly and the crossing time solves directly. If the current
    /// window alone is already at the limit, decay cannot help until the next
    /// rollover demotes the current count, after which the same linear decay
    /// applies to it. Always positive for a rejected request; at most two
    /// windows out.
    pub fn retry_after(&self, limit: u64) -> Duration {
        let window = self.window_ms as f64;
        let limit = limit as f64;
        let current = self.current_count as f64;
        let previous = self.previous_count as f64;

        let wait_ms = if current < limit && previous > 0.0 {
            // Solve current + previous * (1 - (elapsed + dt) / window) = limit.
            window * (current + previous - limit) / previous - self.elapsed_ms as f64
        } else {
            // Wait out this window, then for the demoted current count to
            // decay: current * (1 - dt' / window) = limit.
            let to_rollover = window - self.elapsed_ms as f64;
            let decay = if current > limit {
                window * (1.0 - limit / current)
            } else {
                0.0
            };
            to_rollover + decay
        };

        Duration::from_millis(wait_ms.max(1.0).ceil() as u64)
    }
}
