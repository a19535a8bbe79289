use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::Notification;

use super::resolver::{ensure_capacity, ensure_not_elapsed, expiry_after, resolve, Resolution};
use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookingRequest {
    pub customer_id: Ulid,
    /// The acting employee; must own any lock being promoted.
    pub employee_id: Ulid,
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub window: Window,
    pub quoted_amount: Amount,
    /// Where to send the confirmation, if anywhere.
    #[serde(default)]
    pub contact: Option<String>,
}

impl BookingRequest {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.resource_id, self.date)
    }
}

impl Engine {
    /// Create a booking and its booked slot record in one commit. The actor's own
    /// lock on the same window is promoted in place; any other overlap rejects.
    pub async fn create_booking(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        if request
            .contact
            .as_ref()
            .is_some_and(|c| c.len() > MAX_CONTACT_LEN)
        {
            return Err(EngineError::LimitExceeded("contact too long"));
        }
        let key = request.key();
        let window = request.window;
        let actor = request.employee_id;
        let now = self.clock.now_ms();
        ensure_not_elapsed(key.date, &window, now)?;

        let mut txn = self.slots.begin(key).await;
        ensure_capacity(txn.set(), now)?;
        let resolution = resolve(txn.set(), &window, actor, now);

        let booking = Booking {
            id: Ulid::new(),
            customer_id: request.customer_id,
            employee_id: actor,
            resource_id: key.resource_id,
            date: key.date,
            window,
            quoted_amount: request.quoted_amount,
            pending_amount: request.quoted_amount,
            status: BookingStatus::Initiated,
            settlements: Vec::new(),
            created_at: now,
        };
        let expires_at = Some(expiry_after(
            key.date,
            &window,
            self.policy.booking_retention_minutes,
        ));

        match resolution {
            Resolution::Conflict { reason, record_id } => {
                debug!("booking {key} {window} by {actor} rejected by {record_id}: {reason}");
                metrics::counter!(crate::observability::CONFLICTS_TOTAL, "reason" => reason.label())
                    .increment(1);
                return Err(EngineError::SlotUnavailable(reason));
            }
            Resolution::SameActorLock(lock) => {
                if lock.window != window {
                    return Err(EngineError::LockWindowMismatch {
                        lock_id: lock.id,
                        held: lock.window,
                    });
                }
                txn.stage(Change::BookingCreated {
                    booking: booking.clone(),
                });
                txn.update(SlotRecord {
                    status: SlotStatus::Booked,
                    holder: Some(actor),
                    expires_at,
                    booking_ref: Some(booking.id),
                    ..lock
                });
                debug!("promoting lock on {key} {window} to booking {}", booking.id);
            }
            Resolution::Free => {
                txn.stage(Change::BookingCreated {
                    booking: booking.clone(),
                });
                txn.create(SlotRecord {
                    id: Ulid::new(),
                    resource_id: key.resource_id,
                    date: key.date,
                    window,
                    status: SlotStatus::Booked,
                    holder: Some(actor),
                    expires_at,
                    booking_ref: Some(booking.id),
                });
            }
        }

        self.commit(txn, None).await?;
        info!("booking {} created on {key} {window} by {actor}", booking.id);
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);

        if let Some(to) = request.contact {
            self.send_confirmation(&booking, to);
        }
        Ok(booking)
    }

    /// Record a payment against a booking's outstanding balance.
    pub async fn record_settlement(
        &self,
        booking_id: Ulid,
        amount: Amount,
        kind: SettlementKind,
        proof: String,
        status: Option<BookingStatus>,
    ) -> Result<Booking, EngineError> {
        if amount == 0 {
            return Err(EngineError::InvalidAmount("settlement amount must be positive"));
        }
        if proof.len() > MAX_PROOF_LEN {
            return Err(EngineError::LimitExceeded("proof reference too long"));
        }
        if status == Some(BookingStatus::Terminated) {
            return Err(EngineError::InvalidState(
                "bookings are terminated by cancelling them",
            ));
        }
        let shared = self
            .ledger
            .get(&booking_id)
            .ok_or(EngineError::NotFound("booking"))?;
        let mut booking = shared.lock().await;

        if booking.status == BookingStatus::Terminated {
            return Err(EngineError::InvalidState("booking is terminated"));
        }
        if let Some(next) = status
            && !booking.status.can_advance_to(next)
        {
            return Err(EngineError::InvalidState("booking status cannot move backwards"));
        }
        if amount > booking.pending_amount {
            return Err(EngineError::AmountExceedsPending {
                amount,
                pending: booking.pending_amount,
            });
        }

        let settlement = Settlement {
            id: Ulid::new(),
            booking_id,
            amount,
            kind,
            proof,
            recorded_at: self.clock.now_ms(),
        };
        let change = Change::SettlementRecorded {
            pending_amount: booking.pending_amount - amount,
            status: status.unwrap_or(booking.status),
            settlement,
        };
        self.persist_and_apply(None, Some(&mut *booking), vec![change])
            .await?;

        info!(
            "settlement of {amount} on booking {booking_id}, pending now {}",
            booking.pending_amount
        );
        Ok(booking.clone())
    }

    /// Terminate a booking and free its window in one commit.
    pub async fn cancel_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let shared = self
            .ledger
            .get(&booking_id)
            .ok_or(EngineError::NotFound("booking"))?;
        let mut booking = shared.lock().await;
        if booking.status == BookingStatus::Terminated {
            return Err(EngineError::InvalidState("booking already terminated"));
        }

        let status_change = Change::BookingStatusChanged {
            id: booking_id,
            status: BookingStatus::Terminated,
        };
        match self.slots.begin_existing(&booking.key()).await {
            Some(mut txn) => {
                let guard_id = txn
                    .find()
                    .iter()
                    .find(|r| r.booking_ref == Some(booking_id))
                    .map(|r| r.id);
                if let Some(id) = guard_id {
                    txn.delete(id);
                }
                txn.stage(status_change);
                self.commit(txn, Some(&mut *booking)).await?;
            }
            None => {
                self.persist_and_apply(None, Some(&mut *booking), vec![status_change])
                    .await?;
            }
        }

        info!("booking {booking_id} cancelled");
        Ok(booking.clone())
    }

    /// Fire-and-forget confirmation. Failures are logged, never returned.
    fn send_confirmation(&self, booking: &Booking, to: String) {
        let notification = Notification {
            to,
            subject: format!("Booking {} confirmed", booking.id),
            body: format!(
                "Your charter on {} ({}) is confirmed. Amount due: {}.",
                booking.date, booking.window, booking.pending_amount
            ),
        };
        let notifier = self.notifier.clone();
        let booking_id = booking.id;
        tokio::spawn(async move {
            if let Err(e) = notifier.send(notification).await {
                warn!("confirmation for booking {booking_id} not sent: {e}");
                metrics::counter!(crate::observability::NOTIFICATION_FAILURES_TOTAL).increment(1);
            }
        });
    }
}
