use std::fmt;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

/// One of the fixed time labels a reservation can be booked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeSlot {
    Noon,
    Afternoon,
    LateAfternoon,
    Evening,
    Night,
}

impl TimeSlot {
    pub const ALL: [TimeSlot; 5] = [
        TimeSlot::Noon,
        TimeSlot::Afternoon,
        TimeSlot::LateAfternoon,
        TimeSlot::Evening,
        TimeSlot::Night,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TimeSlot::Noon => "12:00",
            TimeSlot::Afternoon => "14:00",
            TimeSlot::LateAfternoon => "16:00",
            TimeSlot::Evening => "18:00",
            TimeSlot::Night => "20:00",
        }
    }

    /// Accepts `"18:00"` as well as `"18:00:00"`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_suffix(":00").filter(|h| h.len() == 5).unwrap_or(s);
        TimeSlot::ALL.into_iter().find(|slot| slot.label() == s)
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reservation lifecycle state. `Completed` is a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Confirmed => "confirmed",
            Status::Cancelled => "cancelled",
            Status::Completed => "completed",
        }
    }

    /// English labels, plus the labels stored by the original Turkish front end.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" | "beklemede" => Some(Status::Pending),
            "confirmed" | "onaylandı" | "onaylandi" => Some(Status::Confirmed),
            "cancelled" | "canceled" | "iptal edildi" => Some(Status::Cancelled),
            "completed" | "tamamlandı" | "tamamlandi" => Some(Status::Completed),
            _ => None,
        }
    }

    /// Only these states hold seats.
    pub fn holds_seats(self) -> bool {
        matches!(self, Status::Pending | Status::Confirmed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grouping key for capacity accounting and admission locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub slot: TimeSlot,
}

impl SlotKey {
    pub fn new(date: NaiveDate, slot: TimeSlot) -> Self {
        Self { date, slot }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.slot)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub party_size: u32,
    pub status: Status,
    pub notes: Option<String>,
    pub created_at: Ms,
}

impl Reservation {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.date, self.slot)
    }

    pub fn holds_seats(&self) -> bool {
        self.status.holds_seats()
    }
}

/// A public booking request, before admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub party_size: u32,
    pub notes: Option<String>,
}

/// WAL record format. One variant per store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        reservation: Reservation,
    },
    StatusChanged {
        id: Ulid,
        key: SlotKey,
        status: Status,
    },
    ReservationDeleted {
        id: Ulid,
        key: SlotKey,
    },
    /// Bulk transition written by the daily sweep, one per slot touched.
    ReservationsCompleted {
        key: SlotKey,
        ids: Vec<Ulid>,
    },
}

impl Event {
    pub fn key(&self) -> SlotKey {
        match self {
            Event::ReservationCreated { reservation } => reservation.key(),
            Event::StatusChanged { key, .. }
            | Event::ReservationDeleted { key, .. }
            | Event::ReservationsCompleted { key, .. } => *key,
        }
    }
}

/// Caller role, as decided by the authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Editor,
    User,
}

impl Role {
    pub fn from_user(user: Option<&str>) -> Self {
        match user {
            Some("admin") => Role::Admin,
            Some("editor") => Role::Editor,
            _ => Role::User,
        }
    }

    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }
}

/// Strip any time-of-day from a date input. RFC 3339 timestamps are read in local time.
pub fn normalize_date(input: &str) -> Option<NaiveDate> {
    let s = input.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Local).date_naive());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.date())
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotCapacity {
    pub used: u32,
    pub remaining: u32,
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAvailability {
    pub date: NaiveDate,
    /// In slot order.
    pub slots: Vec<(TimeSlot, SlotCapacity)>,
    pub total_used: u32,
    pub total_remaining: u32,
    pub is_available: bool,
}

impl DayAvailability {
    pub fn slot(&self, slot: TimeSlot) -> Option<&SlotCapacity> {
        self.slots.iter().find(|(s, _)| *s == slot).map(|(_, c)| c)
    }
}
