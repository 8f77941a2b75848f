use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

// ── Capacity policy ──────────────────────────────────────────────

/// Every seat ceiling the engine knows about.
///
/// `slot_ceiling` and `day_ceiling` drive availability lookups; `admission_ceiling`
/// is the stricter per-`(date, slot)` limit enforced when a reservation is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityPolicy {
    pub slot_ceiling: u32,
    pub day_ceiling: u32,
    pub admission_ceiling: u32,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self {
            slot_ceiling: DEFAULT_SLOT_CEILING,
            day_ceiling: DEFAULT_DAY_CEILING,
            admission_ceiling: DEFAULT_ADMISSION_CEILING,
        }
    }
}

/// Seats held at `key`. Only `pending` and `confirmed` reservations count.
pub fn seats_used<'a>(reservations: impl IntoIterator<Item = &'a Reservation>, key: SlotKey) -> u32 {
    reservations
        .into_iter()
        .filter(|r| r.holds_seats() && r.key() == key)
        .map(|r| r.party_size)
        .sum()
}

fn slot_capacity(used: u32, ceiling: u32) -> SlotCapacity {
    SlotCapacity {
        used,
        remaining: ceiling.saturating_sub(used),
        is_available: used < ceiling,
    }
}

pub fn capacity_for_slot<'a>(
    reservations: impl IntoIterator<Item = &'a Reservation>,
    date: NaiveDate,
    slot: TimeSlot,
    policy: &CapacityPolicy,
) -> SlotCapacity {
    let used = seats_used(reservations, SlotKey::new(date, slot));
    slot_capacity(used, policy.slot_ceiling)
}

/// Per-slot usage plus day totals for one date. Reservations on other dates are ignored.
pub fn capacity_for_day<'a>(
    reservations: impl IntoIterator<Item = &'a Reservation>,
    date: NaiveDate,
    policy: &CapacityPolicy,
) -> DayAvailability {
    let mut used = [0u32; TimeSlot::ALL.len()];
    for r in reservations {
        if r.date == date && r.holds_seats() {
            used[r.slot as usize] += r.party_size;
        }
    }

    let slots: Vec<(TimeSlot, SlotCapacity)> = TimeSlot::ALL
        .iter()
        .map(|&slot| (slot, slot_capacity(used[slot as usize], policy.slot_ceiling)))
        .collect();
    let total_used: u32 = used.iter().sum();
    let any_slot_open = slots.iter().any(|(_, c)| c.is_available);

    DayAvailability {
        date,
        slots,
        total_used,
        total_remaining: policy.day_ceiling.saturating_sub(total_used),
        is_available: any_slot_open && total_used < policy.day_ceiling,
    }
}

/// Reject when `requested` more seats would push `used` past `ceiling`.
pub fn check_admission(used: u32, requested: u32, ceiling: u32) -> Result<(), EngineError> {
    if used.saturating_add(requested) > ceiling {
        return Err(EngineError::CapacityExceeded {
            used,
            remaining: ceiling.saturating_sub(used),
            ceiling,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn june(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn res(date: NaiveDate, slot: TimeSlot, party_size: u32, status: Status) -> Reservation {
        Reservation {
            id: Ulid::new(),
            full_name: "Guest".into(),
            email: "guest@example.com".into(),
            phone: "555-0100".into(),
            date,
            slot,
            party_size,
            status,
            notes: None,
            created_at: 0,
        }
    }

    #[test]
    fn only_pending_and_confirmed_count() {
        let rs = vec![
            res(june(1), TimeSlot::Evening, 2, Status::Pending),
            res(june(1), TimeSlot::Evening, 3, Status::Confirmed),
            res(june(1), TimeSlot::Evening, 7, Status::Cancelled),
            res(june(1), TimeSlot::Evening, 9, Status::Completed),
        ];
        let key = SlotKey::new(june(1), TimeSlot::Evening);
        assert_eq!(seats_used(&rs, key), 5);
    }

    #[test]
    fn other_slots_and_dates_ignored() {
        let rs = vec![
            res(june(1), TimeSlot::Evening, 4, Status::Confirmed),
            res(june(1), TimeSlot::Night, 6, Status::Confirmed),
            res(june(2), TimeSlot::Evening, 8, Status::Pending),
        ];
        let cap = capacity_for_slot(&rs, june(1), TimeSlot::Evening, &CapacityPolicy::default());
        assert_eq!(cap, SlotCapacity { used: 4, remaining: 16, is_available: true });
    }

    #[test]
    fn slot_full_at_ceiling() {
        let rs = vec![
            res(june(1), TimeSlot::Noon, 15, Status::Confirmed),
            res(june(1), TimeSlot::Noon, 5, Status::Pending),
        ];
        let cap = capacity_for_slot(&rs, june(1), TimeSlot::Noon, &CapacityPolicy::default());
        assert_eq!(cap.used, 20);
        assert_eq!(cap.remaining, 0);
        assert!(!cap.is_available);
    }

    #[test]
    fn remaining_never_negative() {
        let rs = vec![
            res(june(1), TimeSlot::Noon, 15, Status::Confirmed),
            res(june(1), TimeSlot::Noon, 15, Status::Confirmed),
        ];
        let cap = capacity_for_slot(&rs, june(1), TimeSlot::Noon, &CapacityPolicy::default());
        assert_eq!(cap.used, 30);
        assert_eq!(cap.remaining, 0);
    }

    #[test]
    fn day_lists_every_slot_in_order() {
        let day = capacity_for_day(&Vec::<Reservation>::new(), june(1), &CapacityPolicy::default());
        let order: Vec<TimeSlot> = day.slots.iter().map(|(s, _)| *s).collect();
        assert_eq!(order, TimeSlot::ALL.to_vec());
        assert_eq!(day.total_used, 0);
        assert_eq!(day.total_remaining, 100);
        assert!(day.is_available);
    }

    #[test]
    fn day_totals_sum_slots() {
        let rs = vec![
            res(june(1), TimeSlot::Noon, 4, Status::Confirmed),
            res(june(1), TimeSlot::Night, 6, Status::Pending),
            res(june(1), TimeSlot::Night, 3, Status::Cancelled),
            res(june(2), TimeSlot::Night, 10, Status::Pending),
        ];
        let day = capacity_for_day(&rs, june(1), &CapacityPolicy::default());
        assert_eq!(day.total_used, 10);
        assert_eq!(day.total_remaining, 90);
        assert_eq!(day.slot(TimeSlot::Night).unwrap().used, 6);
        assert_eq!(day.slot(TimeSlot::Evening).unwrap().used, 0);
    }

    #[test]
    fn day_closed_when_every_slot_full() {
        let policy = CapacityPolicy { slot_ceiling: 4, day_ceiling: 100, admission_ceiling: 5 };
        let rs: Vec<Reservation> = TimeSlot::ALL
            .iter()
            .map(|&slot| res(june(1), slot, 4, Status::Confirmed))
            .collect();
        let day = capacity_for_day(&rs, june(1), &policy);
        assert_eq!(day.total_used, 20);
        assert!(!day.is_available);
    }

    #[test]
    fn day_closed_at_day_ceiling_with_open_slots() {
        let policy = CapacityPolicy { slot_ceiling: 20, day_ceiling: 30, admission_ceiling: 5 };
        let rs = vec![
            res(june(1), TimeSlot::Noon, 15, Status::Confirmed),
            res(june(1), TimeSlot::Afternoon, 15, Status::Confirmed),
        ];
        let day = capacity_for_day(&rs, june(1), &policy);
        assert!(day.slot(TimeSlot::Night).unwrap().is_available);
        assert_eq!(day.total_remaining, 0);
        assert!(!day.is_available);
    }

    #[test]
    fn admission_rejects_overflow_with_remaining() {
        // One confirmed party of 4 at a ceiling of 5.
        match check_admission(4, 2, 5) {
            Err(EngineError::CapacityExceeded { used, remaining, ceiling }) => {
                assert_eq!((used, remaining, ceiling), (4, 1, 5));
            }
            other => panic!("expected CapacityExceeded, got {other:?}"),
        }
        assert!(check_admission(4, 1, 5).is_ok());
        assert!(check_admission(0, 5, 5).is_ok());
        assert!(check_admission(0, 6, 5).is_err());
    }

    #[test]
    fn admission_over_ceiling_reports_zero_remaining() {
        match check_admission(7, 1, 5) {
            Err(EngineError::CapacityExceeded { remaining, .. }) => assert_eq!(remaining, 0),
            other => panic!("expected CapacityExceeded, got {other:?}"),
        }
    }
}
