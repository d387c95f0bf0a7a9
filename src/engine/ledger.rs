use std::sync::Arc;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::model::SlotKey;

pub type SharedSlot = Arc<RwLock<SlotState>>;

/// Guests held by active reservations in one `(date, period)`.
#[derive(Debug)]
pub struct SlotState {
    pub key: SlotKey,
    pub booked: u32,
    /// Bumped on every change; lets readers tell two snapshots apart.
    pub version: u64,
}

impl SlotState {
    pub fn new(key: SlotKey) -> Self {
        Self {
            key,
            booked: 0,
            version: 0,
        }
    }

    pub fn hold(&mut self, guests: u32) {
        self.booked = self.booked.saturating_add(guests);
        self.version += 1;
    }

    pub fn release(&mut self, guests: u32) {
        debug_assert!(self.booked >= guests, "slot {} would go negative", self.key);
        self.booked = self.booked.saturating_sub(guests);
        self.version += 1;
    }
}

/// Write guards over a sorted set of slots, held for one mutation.
pub struct LockedSlots {
    guards: Vec<OwnedRwLockWriteGuard<SlotState>>,
}

impl LockedSlots {
    pub(super) fn new(guards: Vec<OwnedRwLockWriteGuard<SlotState>>) -> Self {
        Self { guards }
    }

    pub fn get_mut(&mut self, key: &SlotKey) -> Option<&mut SlotState> {
        self.guards
            .iter_mut()
            .find(|g| g.key == *key)
            .map(|g| &mut **g)
    }

    pub fn booked(&self, key: &SlotKey) -> u32 {
        self.guards
            .iter()
            .find(|g| g.key == *key)
            .map_or(0, |g| g.booked)
    }

    pub fn hold(&mut self, key: &SlotKey, guests: u32) {
        match self.get_mut(key) {
            Some(slot) => slot.hold(guests),
            None => debug_assert!(false, "slot {key} not locked"),
        }
    }

    pub fn release(&mut self, key: &SlotKey, guests: u32) {
        match self.get_mut(key) {
            Some(slot) => slot.release(guests),
            None => debug_assert!(false, "slot {key} not locked"),
        }
    }
}
