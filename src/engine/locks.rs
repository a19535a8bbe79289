use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::resolver::{ensure_capacity, ensure_not_elapsed, expiry_after, resolve, Resolution};
use super::{Engine, EngineError};

impl Engine {
    /// Place an actor-owned hold on `window`. The hold lives until the end of the
    /// window plus `ttl_minutes` (default: the configured grace).
    pub async fn lock_slot(
        &self,
        key: SlotKey,
        window: Window,
        actor: Ulid,
        ttl_minutes: Option<u32>,
    ) -> Result<SlotRecord, EngineError> {
        let ttl = ttl_minutes.unwrap_or(self.policy.lock_grace_minutes);
        if ttl > MAX_TTL_MINUTES {
            return Err(EngineError::LimitExceeded("lock ttl too long"));
        }
        let now = self.clock.now_ms();
        ensure_not_elapsed(key.date, &window, now)?;

        let mut txn = self.slots.begin(key).await;
        ensure_capacity(txn.set(), now)?;

        match resolve(txn.set(), &window, actor, now) {
            Resolution::Free => {}
            Resolution::Conflict { reason, record_id } => {
                debug!("lock {key} {window} by {actor} rejected by {record_id}: {reason}");
                metrics::counter!(crate::observability::CONFLICTS_TOTAL, "reason" => reason.label())
                    .increment(1);
                return Err(EngineError::SlotUnavailable(reason));
            }
            Resolution::SameActorLock(existing) => {
                return Err(EngineError::DuplicateLock(existing.id));
            }
        }

        let record = SlotRecord {
            id: Ulid::new(),
            resource_id: key.resource_id,
            date: key.date,
            window,
            status: SlotStatus::Locked,
            holder: Some(actor),
            expires_at: Some(expiry_after(key.date, &window, ttl)),
            booking_ref: None,
        };
        txn.create(record.clone());
        self.commit(txn, None).await?;

        info!("lock {} placed on {key} {window} by {actor}", record.id);
        metrics::counter!(crate::observability::LOCKS_PLACED_TOTAL).increment(1);
        Ok(record)
    }

    /// Remove the actor's live lock on exactly `window`.
    pub async fn release_slot(
        &self,
        key: SlotKey,
        window: Window,
        actor: Ulid,
    ) -> Result<(), EngineError> {
        let mut txn = self
            .slots
            .begin_existing(&key)
            .await
            .ok_or(EngineError::NotFound("lock"))?;
        let now = self.clock.now_ms();

        let record = txn
            .find()
            .iter()
            .find(|r| r.window == window && effective_status(r, now) != EffectiveStatus::Expired)
            .cloned()
            .ok_or(EngineError::NotFound("lock"))?;
        if record.status != SlotStatus::Locked {
            return Err(EngineError::InvalidState("slot is not locked"));
        }
        if record.holder != Some(actor) {
            return Err(EngineError::Forbidden("lock is held by another employee"));
        }

        txn.delete(record.id);
        self.commit(txn, None).await?;
        info!("lock {} on {key} {window} released by {actor}", record.id);
        Ok(())
    }
}
