use ulid::Ulid;

use crate::model::*;

use super::error::ConflictReason;
use super::resolver::{resolve, Resolution};
use super::{Engine, EngineError};

/// Answer to "could this actor claim this window right now?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub reason: Option<ConflictReason>,
    /// The actor's own overlapping lock, which a booking would promote.
    pub same_actor_lock: Option<SlotRecord>,
}

impl From<Resolution> for Availability {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Free => Availability {
                available: true,
                reason: None,
                same_actor_lock: None,
            },
            Resolution::Conflict { reason, .. } => Availability {
                available: false,
                reason: Some(reason),
                same_actor_lock: None,
            },
            Resolution::SameActorLock(record) => Availability {
                available: true,
                reason: None,
                same_actor_lock: Some(record),
            },
        }
    }
}

impl Engine {
    pub async fn check_availability(&self, key: SlotKey, window: Window, actor: Ulid) -> Availability {
        let Some(set) = self.slots.get(&key) else {
            return Resolution::Free.into();
        };
        let guard = set.read().await;
        resolve(&guard, &window, actor, self.clock.now_ms()).into()
    }

    /// Live records for one resource and date, ordered by window start.
    pub async fn list_slots(&self, key: SlotKey) -> Vec<SlotRecord> {
        let Some(set) = self.slots.get(&key) else {
            return Vec::new();
        };
        let now = self.clock.now_ms();
        let guard = set.read().await;
        guard
            .records
            .iter()
            .filter(|r| effective_status(r, now) != EffectiveStatus::Expired)
            .cloned()
            .collect()
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let shared = self
            .ledger
            .get(&booking_id)
            .ok_or(EngineError::NotFound("booking"))?;
        let booking = shared.lock().await;
        Ok(booking.clone())
    }

    /// Settlements of a booking in the order they were recorded.
    pub async fn list_settlements(&self, booking_id: Ulid) -> Result<Vec<Settlement>, EngineError> {
        let booking = self.get_booking(booking_id).await?;
        Ok(booking
            .settlements
            .iter()
            .filter_map(|id| self.ledger.settlement(id))
            .collect())
    }

    pub fn slot_set_count(&self) -> usize {
        self.slots.len()
    }
}
