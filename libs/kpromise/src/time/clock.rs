// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cell::Cell;
use core::fmt;
use core::time::Duration;
use std::rc::Rc;
use std::thread;
use std::time::Instant;

/// The host's source of time.
///
/// Executors read the clock once per tick and ask it to park the host thread when there is
/// nothing to do until the next timer deadline.
pub trait Clock {
    /// Time elapsed since the clock's origin. Must never go backwards.
    fn now(&self) -> Duration;

    /// Blocks the host until `deadline` (measured like [`Clock::now`]) is reached, or until
    /// woken for another reason. `None` means there is no deadline at all.
    ///
    /// Spurious returns are fine, the executor checks again.
    fn park_until(&self, deadline: Option<Duration>);

    /// A human readable name for diagnostics.
    fn name(&self) -> &'static str {
        "<unnamed mystery clock>"
    }
}

/// A [`Clock`] backed by [`std::time::Instant`] that parks the current thread.
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    anchor: Instant,
}

/// A manually advanced [`Clock`] for deterministic hosts and tests.
///
/// Clones share the same time, so one clone can be handed to an executor while the other is
/// used to advance time. Parking jumps time forward to the requested deadline.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

// === impl StdClock ===

impl StdClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now(&self) -> Duration {
        self.anchor.elapsed()
    }

    fn park_until(&self, deadline: Option<Duration>) {
        if let Some(deadline) = deadline {
            let timeout = deadline.saturating_sub(self.now());
            tracing::trace!(?timeout, "parking current thread until deadline...");
            thread::park_timeout(timeout);
        } else {
            tracing::trace!("parking current thread...");
            thread::park();
        }
    }

    fn name(&self) -> &'static str {
        "std"
    }
}

// === impl ManualClock ===

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Sets the current time. Setting a time in the past is ignored.
    pub fn set(&self, now: Duration) {
        if now > self.now.get() {
            self.now.set(now);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    /// # Panics
    ///
    /// Panics if `deadline` is `None`: nothing could ever advance a manual clock from inside a
    /// park, so the executor would hang forever.
    fn park_until(&self, deadline: Option<Duration>) {
        let deadline =
            deadline.expect("parked a manual clock without a deadline, nothing can make progress");
        tracing::trace!(?deadline, "advancing manual clock to deadline");
        self.set(deadline);
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &self.now.get())
            .finish()
    }
}
