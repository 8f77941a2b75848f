use chrono::{Days, NaiveDate};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::capacity::capacity_for_day;
use super::{Engine, EngineError};

impl Engine {
    /// Per-day, per-slot seat usage for every date in `[start, end]`.
    pub async fn list_availability(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayAvailability>, EngineError> {
        if end < start {
            return Err(EngineError::invalid("end", "must not be before start"));
        }
        if (end - start).num_days() >= MAX_AVAILABILITY_DAYS {
            return Err(EngineError::LimitExceeded("availability window too wide"));
        }

        let reservations = self.store.find_by_date_range(start, end).await;
        let mut days = Vec::new();
        let mut date = start;
        while date <= end {
            days.push(capacity_for_day(&reservations, date, &self.policy));
            date = match date.checked_add_days(Days::new(1)) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(days)
    }

    /// Every reservation, newest first.
    pub async fn list_reservations(&self) -> Vec<Reservation> {
        let mut all = self.store.all().await;
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        all
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.store.find_by_id(id).await.ok_or(EngineError::NotFound(id))
    }

    /// Reservations dated in `[start, end]`, in date then slot then creation order.
    pub async fn reservations_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<Reservation> {
        self.store.find_by_date_range(start, end).await
    }

    pub async fn reservations_in_slot(&self, key: SlotKey, statuses: &[Status]) -> Vec<Reservation> {
        self.store.find_by_slot(key, statuses).await
    }
}
