/// Seats one `(date, slot)` pair may hold, as reported by availability lookups.
pub const DEFAULT_SLOT_CEILING: u32 = 20;

/// Seats one calendar day may hold across all slots, as reported by availability lookups.
pub const DEFAULT_DAY_CEILING: u32 = 100;

/// Seats one `(date, slot)` pair may hold when a new reservation is admitted.
pub const DEFAULT_ADMISSION_CEILING: u32 = 5;

pub const MIN_PARTY_SIZE: u32 = 1;
pub const MAX_PARTY_SIZE: u32 = 15;

pub const MAX_CONTACT_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 2048;

/// Widest `[start, end]` window an availability query may ask for, in days (inclusive).
pub const MAX_AVAILABILITY_DAYS: i64 = 92;

pub const MAX_RESERVATIONS_PER_SLOT: usize = 10_000;
