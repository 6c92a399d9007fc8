//! Monotonic tick timebase and compressed expiry tags.
//!
//! The dispatcher advances a millisecond tick counter. Expiry deadlines for
//! table entries are not stored as full ticks: each entry carries a 16-bit
//! tag against one of two global counters, `fast` (1 s granularity) and
//! `slow` (60 s granularity). Tag comparison uses sequence-number
//! arithmetic modulo 2^16, so the counters may wrap freely as long as an
//! entry's tag cannot lap its counter before the entry expires.

use serde::{Deserialize, Serialize};

/// Monotonic milliseconds since the forwarder started.
pub type Ticks = u64;

/// Granularity of the fast expiry counter.
pub const FAST_TICK_MS: Ticks = 1_000;
/// Granularity of the slow expiry counter.
pub const SLOW_TICK_MS: Ticks = 60_000;

/// Which of the two global counters an expiry tag is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerClass {
    Fast,
    Slow,
}

/// A compressed per-entry expiry deadline: 2 bytes plus the class flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryTag {
    pub class: TimerClass,
    pub tag: u16,
}

/// Sequence-number greater-than: `a` is strictly after `b` modulo 2^16.
pub fn seq_gt(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000
}

/// The current values of both counters, captured for a sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerSnapshot {
    pub fast: u16,
    pub slow: u16,
}

impl TimerSnapshot {
    /// True when `tag` has been reached or passed by its counter.
    pub fn is_expired(&self, tag: ExpiryTag) -> bool {
        let now = match tag.class {
            TimerClass::Fast => self.fast,
            TimerClass::Slow => self.slow,
        };
        !seq_gt(tag.tag, now)
    }
}

/// What rolled over during a call to [`Timebase::advance`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TimebaseStep {
    pub fast_rolled: bool,
    pub slow_rolled: bool,
}

/// The forwarder clock: millisecond ticks plus the two 16-bit counters.
#[derive(Debug)]
pub struct Timebase {
    now: Ticks,
    fast: u16,
    slow: u16,
    next_fast_at: Ticks,
    next_slow_at: Ticks,
}

impl Timebase {
    pub fn new() -> Self {
        Self {
            now: 0,
            fast: 0,
            slow: 0,
            next_fast_at: FAST_TICK_MS,
            next_slow_at: SLOW_TICK_MS,
        }
    }

    pub fn now(&self) -> Ticks {
        self.now
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            fast: self.fast,
            slow: self.slow,
        }
    }

    /// Move the clock forward to `now`. Ticks never run backwards; a stale
    /// `now` is ignored.
    pub fn advance(&mut self, now: Ticks) -> TimebaseStep {
        let mut step = TimebaseStep::default();
        if now <= self.now {
            return step;
        }
        self.now = now;
        while self.now >= self.next_fast_at {
            self.fast = self.fast.wrapping_add(1);
            self.next_fast_at += FAST_TICK_MS;
            step.fast_rolled = true;
        }
        while self.now >= self.next_slow_at {
            self.slow = self.slow.wrapping_add(1);
            self.next_slow_at += SLOW_TICK_MS;
            step.slow_rolled = true;
        }
        step
    }

    /// Pick the tag for an absolute expiry tick. The class is chosen so the
    /// 16-bit tag cannot wrap past its counter before the deadline.
    pub fn tag_for_expiry(&self, expiry: Ticks) -> ExpiryTag {
        let remaining = expiry.saturating_sub(self.now);
        let fast_delta = remaining.div_ceil(FAST_TICK_MS).max(1);
        if fast_delta < 0x7fff {
            ExpiryTag {
                class: TimerClass::Fast,
                tag: self.fast.wrapping_add(fast_delta as u16),
            }
        } else {
            let slow_delta = remaining.div_ceil(SLOW_TICK_MS).max(1).min(0x7fff);
            ExpiryTag {
                class: TimerClass::Slow,
                tag: self.slow.wrapping_add(slow_delta as u16),
            }
        }
    }
}

impl Default for Timebase {
    fn default() -> Self {
        Self::new()
    }
}
