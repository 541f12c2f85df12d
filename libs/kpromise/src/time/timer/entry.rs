// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use crate::time::Ticks;

pub(super) type Callback = Box<dyn FnOnce()>;

/// An entry in a timing [`Wheel`][super::wheel::Wheel].
pub(super) struct Entry {
    pub(super) deadline: Ticks,
    /// Insertion sequence number, doubles as the generation of the entry's slab key.
    pub(super) seq: u64,
    /// The wheel and slot this entry is currently filed under.
    pub(super) wheel: usize,
    pub(super) slot: usize,
    pub(super) callback: Callback,
}

/// A timer entry that became due during a [`Timer::turn`](super::Timer::turn).
#[must_use = "expired timers do nothing unless fired"]
pub struct Expired {
    deadline: Ticks,
    seq: u64,
    callback: Callback,
}

// === impl Entry ===

impl Entry {
    pub(super) fn into_expired(self) -> Expired {
        Expired {
            deadline: self.deadline,
            seq: self.seq,
            callback: self.callback,
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("deadline", &self.deadline)
            .field("seq", &self.seq)
            .field("wheel", &self.wheel)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

// === impl Expired ===

impl Expired {
    pub fn deadline(&self) -> Ticks {
        self.deadline
    }

    pub(super) fn order(&self) -> (Ticks, u64) {
        (self.deadline, self.seq)
    }

    /// Runs the entry's callback.
    pub fn fire(self) {
        tracing::trace!(deadline = ?self.deadline, seq = self.seq, "firing timer");
        (self.callback)();
    }
}

impl fmt::Debug for Expired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expired")
            .field("deadline", &self.deadline)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}
