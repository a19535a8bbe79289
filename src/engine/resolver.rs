use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_RECORDS_PER_SLOT_SET;
use crate::model::*;

use super::error::ConflictReason;
use super::EngineError;

/// Outcome of checking a candidate window against one slot set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Free,
    Conflict { reason: ConflictReason, record_id: Ulid },
    /// The actor's own live lock overlaps the window.
    SameActorLock(SlotRecord),
}

/// Classify `window` for `actor` against the records of one (resource, date).
///
/// Overlapping records are visited in stored order. A booked record or a lock
/// held by someone else is a terminal conflict; the actor's own lock is only
/// reported once no conflict turns up. Records whose expiry has elapsed are
/// ignored whether or not they have been swept.
pub fn resolve(set: &SlotSet, window: &Window, actor: Ulid, now: Ms) -> Resolution {
    let mut own_lock: Option<&SlotRecord> = None;
    for record in set.overlapping(window) {
        match effective_status(record, now) {
            EffectiveStatus::Booked => {
                return Resolution::Conflict {
                    reason: ConflictReason::AlreadyBooked,
                    record_id: record.id,
                };
            }
            EffectiveStatus::Locked if record.holder != Some(actor) => {
                return Resolution::Conflict {
                    reason: ConflictReason::LockedByAnotherActor,
                    record_id: record.id,
                };
            }
            EffectiveStatus::Locked => {
                own_lock.get_or_insert(record);
            }
            EffectiveStatus::Available | EffectiveStatus::Expired => {}
        }
    }
    match own_lock {
        Some(record) => Resolution::SameActorLock(record.clone()),
        None => Resolution::Free,
    }
}

/// Instant at which a record guarding `window` stops mattering: the end of the
/// activity plus `extra_minutes`.
pub(crate) fn expiry_after(date: NaiveDate, window: &Window, extra_minutes: u32) -> Ms {
    window.end().on(date) + extra_minutes as Ms * MINUTE_MS
}

/// Reject windows whose activity has already ended.
pub(crate) fn ensure_not_elapsed(date: NaiveDate, window: &Window, now: Ms) -> Result<(), EngineError> {
    if window.end().on(date) <= now {
        return Err(EngineError::WindowElapsed(*window));
    }
    Ok(())
}

/// Reject a new record once the live records of a slot set reach the cap.
/// Expired records awaiting the sweeper do not count.
pub(crate) fn ensure_capacity(set: &SlotSet, now: Ms) -> Result<(), EngineError> {
    let live = set
        .records
        .iter()
        .filter(|r| effective_status(r, now) != EffectiveStatus::Expired)
        .count();
    if live >= MAX_RECORDS_PER_SLOT_SET {
        return Err(EngineError::LimitExceeded("too many records for resource and date"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()
    }

    fn w(start: &str, end: &str) -> Window {
        Window::parse(start, end).unwrap()
    }

    fn record(window: Window, status: SlotStatus, holder: Option<Ulid>, expires_at: Option<Ms>) -> SlotRecord {
        SlotRecord {
            id: Ulid::new(),
            resource_id: Ulid::nil(),
            date: date(),
            window,
            status,
            holder,
            expires_at,
            booking_ref: None,
        }
    }

    fn set_of(records: Vec<SlotRecord>) -> SlotSet {
        let mut set = SlotSet::new(SlotKey::new(Ulid::nil(), date()));
        for r in records {
            set.insert(r);
        }
        set
    }

    #[test]
    fn empty_set_is_free() {
        let set = set_of(vec![]);
        assert_eq!(resolve(&set, &w("09:00", "10:00"), Ulid::new(), 0), Resolution::Free);
    }

    #[test]
    fn booked_overlap_conflicts() {
        let booked = record(w("10:00", "12:00"), SlotStatus::Booked, Some(Ulid::new()), None);
        let id = booked.id;
        let set = set_of(vec![booked]);
        assert_eq!(
            resolve(&set, &w("11:00", "13:00"), Ulid::new(), 0),
            Resolution::Conflict {
                reason: ConflictReason::AlreadyBooked,
                record_id: id
            }
        );
    }

    #[test]
    fn booked_by_same_actor_still_conflicts() {
        let actor = Ulid::new();
        let set = set_of(vec![record(w("10:00", "12:00"), SlotStatus::Booked, Some(actor), None)]);
        assert!(matches!(
            resolve(&set, &w("10:00", "12:00"), actor, 0),
            Resolution::Conflict {
                reason: ConflictReason::AlreadyBooked,
                ..
            }
        ));
    }

    #[test]
    fn foreign_lock_conflicts() {
        let x = Ulid::new();
        let set = set_of(vec![record(w("09:00", "10:00"), SlotStatus::Locked, Some(x), None)]);
        assert!(matches!(
            resolve(&set, &w("09:30", "10:30"), Ulid::new(), 0),
            Resolution::Conflict {
                reason: ConflictReason::LockedByAnotherActor,
                ..
            }
        ));
    }

    #[test]
    fn own_lock_is_reported() {
        let x = Ulid::new();
        let lock = record(w("09:00", "10:00"), SlotStatus::Locked, Some(x), None);
        let set = set_of(vec![lock.clone()]);
        assert_eq!(resolve(&set, &w("09:00", "10:00"), x, 0), Resolution::SameActorLock(lock));
    }

    #[test]
    fn conflict_after_own_lock_wins() {
        let x = Ulid::new();
        let set = set_of(vec![
            record(w("09:00", "10:00"), SlotStatus::Locked, Some(x), None),
            record(w("10:00", "11:00"), SlotStatus::Booked, Some(Ulid::new()), None),
        ]);
        assert!(matches!(
            resolve(&set, &w("09:00", "11:00"), x, 0),
            Resolution::Conflict {
                reason: ConflictReason::AlreadyBooked,
                ..
            }
        ));
    }

    #[test]
    fn first_conflict_in_order_wins() {
        let set = set_of(vec![
            record(w("08:00", "10:00"), SlotStatus::Locked, Some(Ulid::new()), None),
            record(w("10:00", "12:00"), SlotStatus::Booked, Some(Ulid::new()), None),
        ]);
        assert!(matches!(
            resolve(&set, &w("09:00", "11:00"), Ulid::new(), 0),
            Resolution::Conflict {
                reason: ConflictReason::LockedByAnotherActor,
                ..
            }
        ));
    }

    #[test]
    fn touching_windows_are_free() {
        let set = set_of(vec![
            record(w("08:00", "10:00"), SlotStatus::Booked, Some(Ulid::new()), None),
            record(w("12:00", "13:00"), SlotStatus::Locked, Some(Ulid::new()), None),
        ]);
        assert_eq!(resolve(&set, &w("10:00", "12:00"), Ulid::new(), 0), Resolution::Free);
    }

    #[test]
    fn expired_records_are_free_before_sweep() {
        let now = 50_000;
        let set = set_of(vec![
            record(w("09:00", "10:00"), SlotStatus::Booked, Some(Ulid::new()), Some(now)),
            record(w("09:00", "10:00"), SlotStatus::Locked, Some(Ulid::new()), Some(now - 1)),
        ]);
        assert_eq!(resolve(&set, &w("09:00", "10:00"), Ulid::new(), now), Resolution::Free);
        assert!(matches!(
            resolve(&set, &w("09:00", "10:00"), Ulid::new(), now - 1),
            Resolution::Conflict { .. }
        ));
    }

    #[test]
    fn available_records_never_block() {
        let set = set_of(vec![record(w("09:00", "17:00"), SlotStatus::Available, None, None)]);
        assert_eq!(resolve(&set, &w("10:00", "11:00"), Ulid::new(), 0), Resolution::Free);
    }

    #[test]
    fn expiry_is_anchored_to_window_end() {
        let d = date();
        let window = w("09:00", "10:00");
        assert_eq!(expiry_after(d, &window, 15), TimeOfDay::new(10, 15).unwrap().on(d));
        assert_eq!(expiry_after(d, &window, 0), window.end().on(d));
    }

    #[test]
    fn elapsed_windows_are_rejected() {
        let d = date();
        let window = w("09:00", "10:00");
        let end = window.end().on(d);
        assert!(ensure_not_elapsed(d, &window, end - 1).is_ok());
        assert!(matches!(
            ensure_not_elapsed(d, &window, end),
            Err(EngineError::WindowElapsed(_))
        ));
    }

    #[test]
    fn capacity_ignores_expired_records() {
        let window = w("09:00", "10:00");
        let now = 10_000;
        let stale: Vec<SlotRecord> = (0..MAX_RECORDS_PER_SLOT_SET)
            .map(|_| record(window, SlotStatus::Locked, Some(Ulid::new()), Some(now)))
            .collect();
        assert!(ensure_capacity(&set_of(stale), now).is_ok());

        let mut live: Vec<SlotRecord> = (0..MAX_RECORDS_PER_SLOT_SET - 1)
            .map(|_| record(window, SlotStatus::Locked, Some(Ulid::new()), Some(now + 1)))
            .collect();
        live.push(record(window, SlotStatus::Locked, Some(Ulid::new()), Some(now)));
        assert!(ensure_capacity(&set_of(live.clone()), now).is_ok());

        live.push(record(window, SlotStatus::Booked, Some(Ulid::new()), None));
        assert!(matches!(
            ensure_capacity(&set_of(live), now),
            Err(EngineError::LimitExceeded(_))
        ));
    }
}
