use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;

pub type SharedSlotSet = Arc<RwLock<SlotSet>>;
pub type SharedBooking = Arc<Mutex<Booking>>;

/// Slot records partitioned by (resource, date). Each partition has its own
/// lock; holding its write guard serializes resolve + write for that day.
pub struct SlotStore {
    sets: DashMap<SlotKey, SharedSlotSet>,
}

impl Default for SlotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotStore {
    pub fn new() -> Self {
        Self {
            sets: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn get(&self, key: &SlotKey) -> Option<SharedSlotSet> {
        self.sets.get(key).map(|e| e.value().clone())
    }

    pub fn get_or_create(&self, key: SlotKey) -> SharedSlotSet {
        self.sets
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(SlotSet::new(key))))
            .value()
            .clone()
    }

    pub(super) fn insert(&self, set: SlotSet) {
        self.sets.insert(set.key, Arc::new(RwLock::new(set)));
    }

    pub fn keys(&self) -> Vec<SlotKey> {
        self.sets.iter().map(|e| *e.key()).collect()
    }

    /// Drop the partition if it is empty and nobody else holds it.
    /// The strong-count check runs under the shard lock, so a concurrent
    /// `get_or_create` either sees the old set (and keeps it alive) or a fresh one.
    pub fn prune(&self, key: &SlotKey) -> bool {
        self.sets
            .remove_if(key, |_, set| {
                Arc::strong_count(set) == 1 && set.try_read().is_ok_and(|g| g.is_empty())
            })
            .is_some()
    }

    /// Open a transaction scope on the partition, creating it if needed.
    pub async fn begin(&self, key: SlotKey) -> SlotTxn {
        let set = self.get_or_create(key);
        SlotTxn::new(set.write_owned().await)
    }

    /// Like `begin`, but never creates an empty partition.
    pub async fn begin_existing(&self, key: &SlotKey) -> Option<SlotTxn> {
        let set = self.get(key)?;
        Some(SlotTxn::new(set.write_owned().await))
    }
}

/// Write scope over one slot set. Changes are staged and only become visible
/// when the engine commits them; dropping the scope aborts.
pub struct SlotTxn {
    guard: OwnedRwLockWriteGuard<SlotSet>,
    changes: Vec<Change>,
}

impl SlotTxn {
    fn new(guard: OwnedRwLockWriteGuard<SlotSet>) -> Self {
        Self {
            guard,
            changes: Vec::new(),
        }
    }

    pub fn key(&self) -> SlotKey {
        self.guard.key
    }

    /// Committed state of the partition (staged changes are not visible).
    pub fn set(&self) -> &SlotSet {
        &self.guard
    }

    pub fn find(&self) -> &[SlotRecord] {
        &self.guard.records
    }

    pub fn create(&mut self, record: SlotRecord) {
        debug_assert_eq!(record.key(), self.key());
        self.changes.push(Change::SlotCreated { record });
    }

    pub fn update(&mut self, record: SlotRecord) {
        debug_assert_eq!(record.key(), self.key());
        self.changes.push(Change::SlotUpdated { record });
    }

    pub fn delete(&mut self, id: Ulid) {
        let key = self.key();
        self.changes.push(Change::SlotDeleted { key, id });
    }

    /// Stage a non-slot change (booking side) into the same commit.
    pub fn stage(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub(super) fn into_parts(self) -> (OwnedRwLockWriteGuard<SlotSet>, Vec<Change>) {
        (self.guard, self.changes)
    }
}

/// Booking repository: bookings behind per-booking mutexes, settlements by id.
pub struct Ledger {
    bookings: DashMap<Ulid, SharedBooking>,
    settlements: DashMap<Ulid, Settlement>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            settlements: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn insert(&self, booking: Booking) {
        self.bookings.insert(booking.id, Arc::new(Mutex::new(booking)));
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn settlement(&self, id: &Ulid) -> Option<Settlement> {
        self.settlements.get(id).map(|e| e.value().clone())
    }

    pub fn insert_settlement(&self, settlement: Settlement) {
        self.settlements.insert(settlement.id, settlement);
    }
}

// ── Change application ───────────────────────────────────────────

/// Apply a slot change to its partition (caller holds the lock).
pub fn apply_slot_change(set: &mut SlotSet, change: &Change) {
    match change {
        Change::SlotCreated { record } => set.insert(record.clone()),
        Change::SlotUpdated { record } => set.replace(record.clone()),
        Change::SlotDeleted { id, .. } => {
            set.remove(*id);
        }
        Change::BookingCreated { .. }
        | Change::BookingStatusChanged { .. }
        | Change::SettlementRecorded { .. } => {}
    }
}

/// Apply a booking-side change to an existing booking (caller holds the lock).
/// Re-applying the same settlement does not duplicate its reference.
pub fn apply_booking_change(booking: &mut Booking, change: &Change) {
    match change {
        Change::BookingStatusChanged { status, .. } => booking.status = *status,
        Change::SettlementRecorded {
            settlement,
            pending_amount,
            status,
        } => {
            booking.pending_amount = *pending_amount;
            booking.status = *status;
            if !booking.settlements.contains(&settlement.id) {
                booking.settlements.push(settlement.id);
            }
        }
        Change::SlotCreated { .. }
        | Change::SlotUpdated { .. }
        | Change::SlotDeleted { .. }
        | Change::BookingCreated { .. } => {}
    }
}
