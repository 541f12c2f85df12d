// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::mem;

use wasmtime_slab::Id;

use super::{Deadline, Ticks, Timer};

#[derive(Debug)]
pub(super) struct Wheel {
    /// A bitmap of the slots that are occupied.
    ///
    /// The least-significant bit represents slot zero.
    ///
    /// See <https://lwn.net/Articles/646056/> for details on
    /// this strategy.
    occupied_slots: u64,
    /// Keys of the timer entries filed under each slot, in no particular order.
    slots: [Vec<Id>; Wheel::SLOTS],
    /// This wheel's level.
    level: usize,
    /// The number of ticks represented by a single slot in this wheel.
    ticks_per_slot: Ticks,
    /// The number of ticks represented by this entire wheel.
    ticks_per_wheel: Ticks,
    /// A bitmask for masking out all lower wheels' indices from a `now` timestamp.
    wheel_mask: u64,
}

impl Wheel {
    /// The number of slots per timer wheel is fixed at 64 slots.
    ///
    /// This is because we can use a 64-bit bitmap for each wheel to store which
    /// slots are occupied.
    const SLOTS: usize = 64;

    pub(super) const BITS: usize = Self::SLOTS.trailing_zeros() as usize;

    #[allow(
        clippy::cast_possible_truncation,
        reason = "wheel level is at most 5"
    )]
    pub(super) fn new(level: usize) -> Self {
        // how many ticks does a single slot represent in a wheel of this level?
        let ticks_per_slot = Ticks((Self::SLOTS as u64).pow(level as u32));
        let ticks_per_wheel = Ticks(ticks_per_slot.0 * Self::SLOTS as u64);

        debug_assert!(ticks_per_slot.0.is_power_of_two());
        debug_assert!(ticks_per_wheel.0.is_power_of_two());

        // because `ticks_per_wheel` is a power of two, we can calculate a
        // bitmask for masking out the indices in all lower wheels from a `now`
        // timestamp.
        let wheel_mask = !(ticks_per_wheel.0 - 1);

        Self {
            occupied_slots: 0,
            slots: [const { Vec::new() }; Self::SLOTS],
            level,
            ticks_per_slot,
            ticks_per_wheel,
            wheel_mask,
        }
    }

    /// Files `key` under the slot for `deadline`, returning the slot index.
    pub(super) fn insert(&mut self, deadline: Ticks, key: Id) -> usize {
        let slot = self.slot_index(deadline);
        self.slots[slot].push(key);
        self.fill_slot(slot);
        slot
    }

    /// Removes `key` from `slot`, returning whether it was filed there.
    pub(super) fn remove(&mut self, slot: usize, key: Id) -> bool {
        let entries = &mut self.slots[slot];
        let Some(pos) = entries.iter().position(|k| *k == key) else {
            return false;
        };
        entries.swap_remove(pos);

        if entries.is_empty() {
            // if that was the only entry in that slot, clear the
            // corresponding occupied bit.
            self.clear_slot(slot);
        }
        true
    }

    pub(super) fn next_deadline(&self, now: Ticks) -> Option<Deadline> {
        let distance = self.next_slot_distance(now)?;
        let slot = distance % Self::SLOTS;
        // does the next slot lie in the next rotation of this wheel?
        let skipped = distance / Self::SLOTS;

        debug_assert!(
            distance < Self::SLOTS * 2,
            "distance must be less than 2*{}, but found {distance}",
            Self::SLOTS
        );
        debug_assert!(
            skipped == 0 || self.level == Timer::WHEELS - 1,
            "if the next expiring slot wraps around, we must be on the top level wheel\
            \n    dist: {distance}\
            \n    slot: {slot}\
            \n skipped: {skipped}\
            \n   level: {}",
            self.level,
        );

        // when did the current rotation of this wheel begin? since all wheels
        // represent a power-of-two number of ticks, we can determine the
        // beginning of this rotation by masking out the bits for all lower wheels.
        let rotation_start = now.0 & self.wheel_mask;
        let ticks = {
            let skipped_ticks = skipped as u64 * self.ticks_per_wheel.0;
            Ticks(rotation_start + (slot as u64 * self.ticks_per_slot.0) + skipped_ticks)
        };

        Some(Deadline {
            ticks,
            slot,
            wheel: self.level,
        })
    }

    pub(super) fn take_slot(&mut self, slot: usize) -> Vec<Id> {
        debug_assert!(
            self.occupied_slots & (1 << slot) != 0,
            "taking an unoccupied slot!"
        );
        let entries = mem::take(&mut self.slots[slot]);
        debug_assert!(
            !entries.is_empty(),
            "if a slot is occupied, its entries must not be empty"
        );
        self.clear_slot(slot);
        entries
    }

    /// Drops every filed key.
    pub(super) fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.occupied_slots = 0;
    }

    /// Returns the index of the next occupied slot, counted from slot zero of the current
    /// rotation. Indices past the last slot wrapped around into the next rotation.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "slot index can be at most 64"
    )]
    fn next_slot_distance(&self, now: Ticks) -> Option<usize> {
        if self.occupied_slots == 0 {
            return None;
        }

        // which slot is indexed by the `now` timestamp?
        let now_slot = (now.0 / self.ticks_per_slot.0) as u32 % Self::SLOTS as u32;
        let next_dist = next_set_bit(self.occupied_slots, now_slot)?;
        tracing::trace!(level = self.level, now_slot, next_dist);

        Some(next_dist)
    }

    fn clear_slot(&mut self, slot_index: usize) {
        debug_assert!(slot_index < Self::SLOTS);
        self.occupied_slots &= !(1 << slot_index);
    }

    fn fill_slot(&mut self, slot_index: usize) {
        debug_assert!(slot_index < Self::SLOTS);
        self.occupied_slots |= 1 << slot_index;
    }

    /// Given a deadline, returns the slot into which an entry for that deadline
    /// would be inserted.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "slot index can be at most 64"
    )]
    fn slot_index(&self, ticks: Ticks) -> usize {
        let shift = self.level * Self::BITS;
        ((ticks.0 >> shift) % Self::SLOTS as u64) as usize
    }
}

/// Returns the level of the wheel an entry with the given deadline belongs on.
pub(super) fn wheel_index(now: Ticks, ticks: Ticks) -> usize {
    const WHEEL_MASK: u64 = (1 << Wheel::BITS) - 1;

    // mask out the bits representing the index in the wheel
    let mut wheel_indices = now.0 ^ ticks.0 | WHEEL_MASK;

    // put entries over the max duration in the top level wheel
    if wheel_indices >= Timer::MAX_TICKS {
        wheel_indices = Timer::MAX_TICKS - 1;
    }

    let zeros = wheel_indices.leading_zeros();
    let rest = u64::BITS - 1 - zeros;

    rest as usize / Wheel::BITS
}

/// Finds the index of the next set bit in `bitmap` after the `offset`th` bit.
/// If the `offset`th bit is set, returns `offset`.
///
/// Based on
/// <https://github.com/torvalds/linux/blob/d0e60d46bc03252b8d4ffaaaa0b371970ac16cda/include/linux/find.h#L21-L45>
fn next_set_bit(bitmap: u64, offset: u32) -> Option<usize> {
    debug_assert!(offset < 64, "offset: {offset}");
    if bitmap == 0 {
        return None;
    }
    let shifted = bitmap >> offset;
    let zeros = if shifted == 0 {
        bitmap.rotate_right(offset).trailing_zeros()
    } else {
        shifted.trailing_zeros()
    };
    Some(zeros as usize + offset as usize)
}
