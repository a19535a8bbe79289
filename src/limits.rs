// Hard limits on input and in-memory state. Violations surface as `LimitExceeded`.

/// Records (live or awaiting sweep) in one (resource, date) slot set.
pub const MAX_RECORDS_PER_SLOT_SET: usize = 1_440;

/// Upper bound for a caller-supplied lock TTL: one week.
pub const MAX_TTL_MINUTES: u32 = 7 * 24 * 60;

/// Upper bound for booking retention after the trip ends: one year.
pub const MAX_RETENTION_MINUTES: u32 = 366 * 24 * 60;

pub const MAX_PROOF_LEN: usize = 1_024;

pub const MAX_CONTACT_LEN: usize = 320;

/// Longest accepted request line on the wire, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
