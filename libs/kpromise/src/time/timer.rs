// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod entry;
mod wheel;

use core::fmt;
use core::time::Duration;

use entry::{Callback, Entry};
pub use entry::Expired;
use wasmtime_slab::{Id, Slab};
use wheel::Wheel;

use crate::time::{NANOS_PER_SEC, TimeError, max_duration};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticks(pub u64);

/// Identifies a scheduled timer entry so it can be cancelled.
///
/// Handles stay valid after their entry fired or was cancelled; using them then is a no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerHandle {
    key: Id,
    seq: u64,
}

#[derive(Copy, Clone, Debug)]
struct Deadline {
    ticks: Ticks,
    slot: usize,
    wheel: usize,
}

/// A hierarchical timing wheel holding callbacks to run at a given tick.
///
/// The timer doesn't read a clock itself, its owner passes the current time into
/// [`Timer::turn`].
pub struct Timer {
    tick_duration: Duration,
    tick_duration_nanos: u64,
    /// The ticks that have elapsed since the wheel started.
    now: Ticks,
    entries: Slab<Entry>,
    /// Timer wheels
    ///
    /// Each timer has 6 wheels with 64 slots, giving each wheel a precision multiplier
    /// of `64^x` where `x` is the wheel level:
    ///
    /// | wheel | multiplier | with the default 1 ms tick duration |
    /// |-------|------------|-------------------------------------|
    /// | 0     | 64^0       | 1 ms slots / 64 ms range            |
    /// | 1     | 64^1       | 64 ms slots / ~ 4 sec range         |
    /// | 2     | 64^2       | ~ 4 sec slots / ~ 4 min range       |
    /// | 3     | 64^3       | ~ 4 min slots / ~ 4 hr range        |
    /// | 4     | 64^4       | ~ 4 hr slots / ~ 12 day range       |
    /// | 5     | 64^5       | ~ 12 day slots / ~ 2 yr range       |
    wheels: [Wheel; Timer::WHEELS],
    next_seq: u64,
}

// === impl Timer ===

impl Timer {
    const WHEELS: usize = Wheel::BITS;
    pub(crate) const MAX_TICKS: u64 = (1 << (Wheel::BITS * Self::WHEELS)) - 1;
    /// The longest accepted delay: one top-level slot short of a full rotation, so a
    /// deadline never lands in the current top-level slot of the next rotation.
    pub(crate) const MAX_DELAY_TICKS: u64 =
        Self::MAX_TICKS + 1 - (1 << (Wheel::BITS * (Self::WHEELS - 1)));

    /// # Panics
    ///
    /// Panics if `tick_duration` is zero or longer than `u64::MAX` nanoseconds.
    #[must_use]
    pub fn new(tick_duration: Duration) -> Self {
        let tick_duration_nanos = checked_duration_to_nanos(tick_duration)
            .filter(|nanos| *nanos > 0)
            .expect("timer tick duration must be non-zero and fit into 64 bits of nanoseconds");

        Self {
            tick_duration,
            tick_duration_nanos,
            now: Ticks(0),
            entries: Slab::new(),
            wheels: [
                Wheel::new(0),
                Wheel::new(1),
                Wheel::new(2),
                Wheel::new(3),
                Wheel::new(4),
                Wheel::new(5),
            ],
            next_seq: 0,
        }
    }

    /// Returns the [`Duration`] of one tick of this Timer.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Returns the maximum duration of this Timer.
    #[must_use]
    pub fn max_duration(&self) -> Duration {
        max_duration(self.tick_duration())
    }

    /// The tick this timer was last turned to.
    pub fn now(&self) -> Ticks {
        self.now
    }

    /// Number of entries waiting to fire.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert the given raw [`Ticks`] into a [`Duration`] using this timers
    /// internal tick duration.
    pub fn ticks_to_duration(&self, ticks: Ticks) -> Duration {
        Duration::from_nanos(ticks.0.saturating_mul(self.tick_duration_nanos))
    }

    /// Convert the given [`Duration`] into a raw [`Ticks`] using this timers
    /// internal tick duration, rounding down.
    ///
    /// # Errors
    ///
    /// This method returns a `[TimeError::DurationTooLong`] if the conversion from the given [`Duration`]
    /// into the 64-bits [`Ticks`] would overflow.
    pub fn duration_to_ticks(&self, duration: Duration) -> Result<Ticks, TimeError> {
        let duration_nanos =
            checked_duration_to_nanos(duration).ok_or_else(|| self.too_long(duration))?;

        Ok(Ticks(duration_nanos / self.tick_duration_nanos))
    }

    /// Returns the tick at which an entry scheduled `delay` after `now` is due.
    ///
    /// The deadline is rounded up to the next tick boundary and lies at least one tick after
    /// the tick containing `now`, so even a zero delay waits for the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::DurationTooLong`] if `delay` exceeds [`Timer::max_duration`].
    pub fn deadline_after(&self, now: Duration, delay: Duration) -> Result<Ticks, TimeError> {
        if delay > self.max_duration() {
            return Err(self.too_long(delay));
        }

        let end = now
            .checked_add(delay)
            .and_then(checked_duration_to_nanos)
            .ok_or_else(|| self.too_long(delay))?;
        let now = self.duration_to_ticks(now)?;

        let deadline = end.div_ceil(self.tick_duration_nanos).max(now.0 + 1);
        Ok(Ticks(deadline))
    }

    /// Schedules `callback` to run once the timer is turned to `deadline` or later.
    pub fn insert(&mut self, deadline: Ticks, callback: impl FnOnce() + 'static) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;

        let callback: Callback = Box::new(callback);
        // entries are never filed into the past, that would break the wheel's rotation math
        let deadline = deadline.max(self.now);
        let key = self.entries.alloc(Entry {
            deadline,
            seq,
            wheel: 0,
            slot: 0,
            callback,
        });
        self.file(key);

        tracing::trace!(?deadline, seq, now = ?self.now, "registered timer entry");
        TimerHandle { key, seq }
    }

    /// Removes the entry identified by `handle`, returning whether it was still scheduled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.remove(handle).is_some()
    }

    /// Like [`Timer::cancel`], but hands the removed entry back so its callback can be dropped
    /// outside of any borrow of the timer.
    pub(crate) fn remove(&mut self, handle: TimerHandle) -> Option<Expired> {
        let entry = self.entries.get(handle.key)?;
        if entry.seq != handle.seq {
            return None;
        }

        let did_unlink = self.wheels[entry.wheel].remove(entry.slot, handle.key);
        debug_assert!(did_unlink, "timer entry {entry:?} wasn't filed where it said it was");

        let entry = self.entries.dealloc(handle.key);
        tracing::trace!(deadline = ?entry.deadline, seq = entry.seq, "cancelled timer entry");
        Some(entry.into_expired())
    }

    /// Advances the timer to `now`, returning the entries that became due.
    ///
    /// The returned entries are sorted by deadline, entries sharing a deadline by insertion
    /// order. Firing them is up to the caller, which lets it release any borrow of the timer
    /// first.
    pub fn turn(&mut self, mut now: Ticks) -> Vec<Expired> {
        if now < self.now {
            tracing::warn!(?now, timer.now = ?self.now, "time went backwards!");
            now = self.now;
        }

        // entries that need to be rescheduled on lower-level wheels need to be
        // processed after we have finished turning the wheel, to avoid looping
        // infinitely.
        let mut pending_reschedule = Vec::new();
        let mut expired = Vec::new();

        let mut next_deadline = self.next_deadline_inner();
        while let Some(deadline) = next_deadline {
            // if the deadline is in the future we don't need to continue
            if deadline.ticks > now {
                break;
            }

            // all entries have to come off the slot before any of them is refiled,
            // they might end up in the very same slot again.
            for key in self.wheels[deadline.wheel].take_slot(deadline.slot) {
                let Some(entry) = self.entries.get(key) else {
                    debug_assert!(false, "wheel slot referenced a vacant timer entry");
                    continue;
                };

                if entry.deadline > now {
                    // this entry was on a coarser wheel and needs to be refiled on a
                    // finer one, rather than firing now.
                    debug_assert_ne!(
                        deadline.wheel, 0,
                        "if a timer is being rescheduled, it must not have been on the lowest-level wheel"
                    );
                    pending_reschedule.push(key);
                } else {
                    expired.push(self.entries.dealloc(key).into_expired());
                }
            }

            self.now = deadline.ticks;
            next_deadline = self.next_deadline_inner();
        }

        self.now = now;

        for key in pending_reschedule {
            self.file(key);
        }

        expired.sort_by_key(Expired::order);
        expired
    }

    /// The earliest tick at which the timer needs to be turned again.
    ///
    /// Entries on coarse wheels report the start of their slot, which may lie before their
    /// actual deadline; turning the timer then refiles them.
    pub fn next_deadline(&self) -> Option<Ticks> {
        self.next_deadline_inner().map(|deadline| deadline.ticks)
    }

    /// Removes every entry, returning the callbacks so they can be dropped by the caller.
    pub(crate) fn clear(&mut self) -> Vec<Expired> {
        for wheel in &mut self.wheels {
            wheel.clear();
        }
        let mut keys = Vec::with_capacity(self.entries.len());
        keys.extend(self.entries.iter().map(|(key, _)| key));
        keys.into_iter()
            .map(|key| self.entries.dealloc(key).into_expired())
            .collect()
    }

    fn next_deadline_inner(&self) -> Option<Deadline> {
        self.wheels
            .iter()
            .find_map(|wheel| wheel.next_deadline(self.now))
    }

    /// Files the entry at `key` under the wheel and slot matching its deadline.
    fn file(&mut self, key: Id) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        let wheel = wheel::wheel_index(self.now, entry.deadline);
        let slot = self.wheels[wheel].insert(entry.deadline, key);
        entry.wheel = wheel;
        entry.slot = slot;
    }

    fn too_long(&self, requested: Duration) -> TimeError {
        TimeError::DurationTooLong {
            requested,
            max: self.max_duration(),
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("tick_duration", &self.tick_duration)
            .field("now", &self.now)
            .field("entries", &self.entries.len())
            .field("next_deadline", &self.next_deadline())
            .finish_non_exhaustive()
    }
}

#[inline]
fn checked_duration_to_nanos(duration: Duration) -> Option<u64> {
    duration
        .as_secs()
        .checked_mul(NANOS_PER_SEC)?
        .checked_add(u64::from(duration.subsec_nanos()))
}
