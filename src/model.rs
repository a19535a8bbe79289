use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC). The only absolute time type.
pub type Ms = i64;

/// Money in minor currency units.
pub type Amount = u64;

pub const MINUTE_MS: Ms = 60_000;
const DAY_MS: Ms = 86_400_000;
const MINUTES_PER_DAY: u16 = 1440;
/// `num_days_from_ce()` of 1970-01-01.
const EPOCH_DAYS_FROM_CE: i64 = 719_163;

// ── Time of day ──────────────────────────────────────────────────

/// Minute-precision wall-clock time, `00:00..=24:00`.
///
/// `24:00` only makes sense as the end of a window that runs to midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);
    pub const END_OF_DAY: TimeOfDay = TimeOfDay(MINUTES_PER_DAY);

    pub fn new(hour: u16, minute: u16) -> Result<Self, ParseError> {
        if minute >= 60 || hour > 24 || (hour == 24 && minute != 0) {
            return Err(ParseError::TimeOutOfRange { hour, minute });
        }
        Ok(Self(hour * 60 + minute))
    }

    pub fn from_minutes(minutes: u16) -> Result<Self, ParseError> {
        if minutes > MINUTES_PER_DAY {
            return Err(ParseError::TimeOutOfRange {
                hour: minutes / 60,
                minute: minutes % 60,
            });
        }
        Ok(Self(minutes))
    }

    /// Minutes since midnight.
    pub fn minutes(self) -> u16 {
        self.0
    }

    /// Absolute instant of this time on `date`, read as UTC.
    pub fn on(self, date: NaiveDate) -> Ms {
        let days = date.num_days_from_ce() as i64 - EPOCH_DAYS_FROM_CE;
        days * DAY_MS + self.0 as Ms * MINUTE_MS
    }
}

impl FromStr for TimeOfDay {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseError::MalformedTime(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(malformed)?;
        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if h.len() > 2 || m.len() != 2 || !digits(h) || !digits(m) {
            return Err(malformed());
        }
        let hour: u16 = h.parse().map_err(|_| malformed())?;
        let minute: u16 = m.parse().map_err(|_| malformed())?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

// ── Window ───────────────────────────────────────────────────────

/// Half-open interval `[start, end)` within one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct Window {
    start: TimeOfDay,
    end: TimeOfDay,
}

#[derive(Deserialize)]
struct RawWindow {
    start: TimeOfDay,
    end: TimeOfDay,
}

impl TryFrom<RawWindow> for Window {
    type Error = ParseError;

    fn try_from(raw: RawWindow) -> Result<Self, Self::Error> {
        Window::new(raw.start, raw.end)
    }
}

impl Window {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Result<Self, ParseError> {
        if start >= end {
            return Err(ParseError::EmptyWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse a window from two `"HH:MM"` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, ParseError> {
        Self::new(start.parse()?, end.parse()?)
    }

    pub fn start(&self) -> TimeOfDay {
        self.start
    }

    pub fn end(&self) -> TimeOfDay {
        self.end
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end.minutes() - self.start.minutes()
    }

    /// Touching windows (`a.end == b.start`) never overlap.
    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// ── Slot records ─────────────────────────────────────────────────

/// A bookable resource on one calendar day. Slot records are partitioned by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub resource_id: Ulid,
    pub date: NaiveDate,
}

impl SlotKey {
    pub fn new(resource_id: Ulid, date: NaiveDate) -> Self {
        Self { resource_id, date }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.resource_id, self.date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Locked,
    Booked,
}

/// Status of a record as seen at a particular instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveStatus {
    Available,
    Locked,
    Booked,
    /// `expires_at` has elapsed; the record no longer guards its window.
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub window: Window,
    pub status: SlotStatus,
    pub holder: Option<Ulid>,
    pub expires_at: Option<Ms>,
    pub booking_ref: Option<Ulid>,
}

impl SlotRecord {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.resource_id, self.date)
    }
}

/// Single source of truth for expiry, shared by the resolver and the sweeper.
pub fn effective_status(record: &SlotRecord, now: Ms) -> EffectiveStatus {
    if record.expires_at.is_some_and(|at| at <= now) {
        return EffectiveStatus::Expired;
    }
    match record.status {
        SlotStatus::Available => EffectiveStatus::Available,
        SlotStatus::Locked => EffectiveStatus::Locked,
        SlotStatus::Booked => EffectiveStatus::Booked,
    }
}

/// Every record for one (resource, date), sorted by window start.
#[derive(Debug, Clone)]
pub struct SlotSet {
    pub key: SlotKey,
    pub records: Vec<SlotRecord>,
}

impl SlotSet {
    pub fn new(key: SlotKey) -> Self {
        Self {
            key,
            records: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert maintaining sort order by window start. Equal starts keep arrival order.
    pub fn insert(&mut self, record: SlotRecord) {
        let start = record.window.start();
        let pos = self.records.partition_point(|r| r.window.start() <= start);
        self.records.insert(pos, record);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<SlotRecord> {
        let pos = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(pos))
    }

    /// Replace the record with the same id, keeping its position when the window is unchanged.
    pub fn replace(&mut self, record: SlotRecord) {
        match self.records.iter().position(|r| r.id == record.id) {
            Some(pos) if self.records[pos].window == record.window => self.records[pos] = record,
            Some(pos) => {
                self.records.remove(pos);
                self.insert(record);
            }
            None => self.insert(record),
        }
    }

    pub fn get(&self, id: Ulid) -> Option<&SlotRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Records whose window overlaps `query`, in stored order.
    pub fn overlapping(&self, query: &Window) -> impl Iterator<Item = &SlotRecord> {
        let query_end = query.end();
        let query_start = query.start();
        let right_bound = self
            .records
            .partition_point(|r| r.window.start() < query_end);
        self.records[..right_bound]
            .iter()
            .filter(move |r| r.window.end() > query_start)
    }
}

// ── Bookings & settlements ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Initiated,
    InProgress,
    Success,
    Terminated,
}

impl BookingStatus {
    /// Whether a settlement may move a booking from `self` to `next`.
    /// The lifecycle only moves forward, and `Terminated` is reached by
    /// cancellation alone.
    pub fn can_advance_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        match (self, next) {
            (Terminated, _) | (_, Terminated) => false,
            (Success, Initiated | InProgress) | (InProgress, Initiated) => false,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub customer_id: Ulid,
    pub employee_id: Ulid,
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub window: Window,
    pub quoted_amount: Amount,
    /// Always within `0..=quoted_amount`.
    pub pending_amount: Amount,
    pub status: BookingStatus,
    pub settlements: Vec<Ulid>,
    pub created_at: Ms,
}

impl Booking {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.resource_id, self.date)
    }

    pub fn paid_amount(&self) -> Amount {
        self.quoted_amount - self.pending_amount
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementKind {
    Advance,
    Final,
}

/// A recorded payment. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub amount: Amount,
    pub kind: SettlementKind,
    /// Reference to the payment proof (receipt id, upload key, ...).
    pub proof: String,
    pub recorded_at: Ms,
}

// ── WAL records ──────────────────────────────────────────────────

/// One state mutation. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    SlotCreated {
        record: SlotRecord,
    },
    SlotUpdated {
        record: SlotRecord,
    },
    SlotDeleted {
        key: SlotKey,
        id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        status: BookingStatus,
    },
    SettlementRecorded {
        settlement: Settlement,
        pending_amount: Amount,
        status: BookingStatus,
    },
}

impl Change {
    /// The slot set this change touches, if any.
    pub fn slot_key(&self) -> Option<SlotKey> {
        match self {
            Change::SlotCreated { record } | Change::SlotUpdated { record } => Some(record.key()),
            Change::SlotDeleted { key, .. } => Some(*key),
            Change::BookingCreated { .. }
            | Change::BookingStatusChanged { .. }
            | Change::SettlementRecorded { .. } => None,
        }
    }
}

/// All changes of one logical operation. The unit of durability: one WAL frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub at: Ms,
    pub changes: Vec<Change>,
}

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    MalformedTime(String),
    TimeOutOfRange { hour: u16, minute: u16 },
    EmptyWindow { start: TimeOfDay, end: TimeOfDay },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MalformedTime(s) => write!(f, "malformed time of day: {s:?} (expected HH:MM)"),
            ParseError::TimeOutOfRange { hour, minute } => {
                write!(f, "time of day out of range: {hour}:{minute:02}")
            }
            ParseError::EmptyWindow { start, end } => {
                write!(f, "window start {start} must be before end {end}")
            }
        }
    }
}

impl std::error::Error for ParseError {}
