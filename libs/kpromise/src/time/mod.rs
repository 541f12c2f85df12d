// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Time keeping for the promise engine.
//!
//! An [`Executor`](crate::executor::Executor) reads the current time from a [`Clock`] once per
//! tick and fires due entries of its [`Timer`], a hierarchical timing wheel. The promise-level
//! operations built on top of it are [`Promise::delay`](crate::Promise::delay) and
//! [`Promise::timeout`](crate::Promise::timeout).

mod clock;
mod delay;
mod timeout;
mod timer;

use core::fmt;
use core::time::Duration;

pub use clock::{Clock, ManualClock, StdClock};
pub use timer::{Expired, Ticks, Timer, TimerHandle};

pub(crate) const NANOS_PER_SEC: u64 = 1_000_000_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum TimeError {
    /// The requested duration can't be represented by the timer.
    DurationTooLong { requested: Duration, max: Duration },
    /// The executor that owned the timer is gone.
    Shutdown,
}

impl fmt::Display for TimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeError::DurationTooLong { requested, max } => write!(
                f,
                "duration too long: {requested:?}. maximum duration {max:?}"
            ),
            TimeError::Shutdown => f.write_str("the executor owning the timer was shut down"),
        }
    }
}

impl core::error::Error for TimeError {}

/// The longest duration a timer with the given tick duration can track.
#[inline]
pub(crate) fn max_duration(tick_duration: Duration) -> Duration {
    let nanos = u64::try_from(tick_duration.as_nanos()).unwrap_or(u64::MAX);
    Duration::from_nanos(nanos.saturating_mul(Timer::MAX_DELAY_TICKS))
}
