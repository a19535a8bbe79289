use std::collections::BTreeMap;

use tracing::debug;
use ulid::Ulid;

use crate::model::*;

use super::store::{apply_booking_change, apply_slot_change};

/// Plain, lock-free materialization of a commit log. Used for startup replay
/// and for compaction, which folds the on-disk log rather than live state.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub slots: BTreeMap<SlotKey, SlotSet>,
    pub bookings: BTreeMap<Ulid, Booking>,
    pub settlements: BTreeMap<Ulid, Settlement>,
}

impl Snapshot {
    pub fn fold(commits: &[Commit]) -> Self {
        let mut snapshot = Self::default();
        for commit in commits {
            for change in &commit.changes {
                snapshot.apply(change);
            }
        }
        snapshot.slots.retain(|_, set| !set.is_empty());
        snapshot
    }

    pub fn apply(&mut self, change: &Change) {
        if let Some(key) = change.slot_key() {
            let set = self.slots.entry(key).or_insert_with(|| SlotSet::new(key));
            apply_slot_change(set, change);
            return;
        }
        match change {
            Change::BookingCreated { booking } => {
                self.bookings.insert(booking.id, booking.clone());
            }
            Change::BookingStatusChanged { id, .. } => match self.bookings.get_mut(id) {
                Some(booking) => apply_booking_change(booking, change),
                None => debug!("replay: status change for unknown booking {id}"),
            },
            Change::SettlementRecorded { settlement, .. } => {
                match self.bookings.get_mut(&settlement.booking_id) {
                    Some(booking) => apply_booking_change(booking, change),
                    None => debug!(
                        "replay: settlement {} for unknown booking {}",
                        settlement.id, settlement.booking_id
                    ),
                }
                self.settlements.insert(settlement.id, settlement.clone());
            }
            Change::SlotCreated { .. } | Change::SlotUpdated { .. } | Change::SlotDeleted { .. } => {}
        }
    }

    /// Minimal commits that recreate this snapshot: one per booking (with its
    /// settlements) and one per slot set.
    pub fn into_commits(self, at: Ms) -> Vec<Commit> {
        let mut commits = Vec::with_capacity(self.bookings.len() + self.slots.len());

        for booking in self.bookings.into_values() {
            let mut changes = Vec::with_capacity(1 + booking.settlements.len());
            let pending_amount = booking.pending_amount;
            let status = booking.status;
            let settlement_ids = booking.settlements.clone();
            changes.push(Change::BookingCreated { booking });
            for id in settlement_ids {
                if let Some(settlement) = self.settlements.get(&id) {
                    changes.push(Change::SettlementRecorded {
                        settlement: settlement.clone(),
                        pending_amount,
                        status,
                    });
                }
            }
            commits.push(Commit { at, changes });
        }

        for set in self.slots.into_values() {
            if set.is_empty() {
                continue;
            }
            let changes = set
                .records
                .into_iter()
                .map(|record| Change::SlotCreated { record })
                .collect();
            commits.push(Commit { at, changes });
        }

        commits
    }
}
