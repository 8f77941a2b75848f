use chrono::NaiveDate;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{RESERVATIONS_ADMITTED_TOTAL, RESERVATIONS_REJECTED_TOTAL};

use super::capacity::check_admission;
use super::lifecycle::{Operation, SeatEffect};
use super::{Engine, EngineError, WalCommand, now_ms};

fn require_text(field: &'static str, value: &str) -> Result<String, EngineError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::invalid(field, "required"));
    }
    if value.len() > MAX_CONTACT_LEN {
        return Err(EngineError::invalid(field, format!("longer than {MAX_CONTACT_LEN} bytes")));
    }
    Ok(value.to_string())
}

/// Check presence and ranges, returning the trimmed record to admit.
pub(super) fn validate(req: &NewReservation) -> Result<NewReservation, EngineError> {
    if !(MIN_PARTY_SIZE..=MAX_PARTY_SIZE).contains(&req.party_size) {
        return Err(EngineError::invalid(
            "number_of_people",
            format!("must be between {MIN_PARTY_SIZE} and {MAX_PARTY_SIZE}"),
        ));
    }
    let notes = match req.notes.as_deref().map(str::trim) {
        Some(n) if n.len() > MAX_NOTES_LEN => {
            return Err(EngineError::invalid("notes", format!("longer than {MAX_NOTES_LEN} bytes")));
        }
        Some("") | None => None,
        Some(n) => Some(n.to_string()),
    };
    Ok(NewReservation {
        full_name: require_text("full_name", &req.full_name)?,
        email: require_text("email", &req.email)?,
        phone: require_text("phone", &req.phone)?,
        date: req.date,
        slot: req.slot,
        party_size: req.party_size,
        notes,
    })
}

impl Engine {
    /// Admit a public booking request as a `pending` reservation.
    ///
    /// The slot's write lock is held from the capacity read through the WAL commit, so
    /// admissions for one `(date, slot)` are serialized and cannot overbook it.
    pub async fn create_reservation(&self, req: NewReservation) -> Result<Reservation, EngineError> {
        let req = validate(&req)?;
        let key = SlotKey::new(req.date, req.slot);
        let ceiling = self.policy.admission_ceiling;

        let _gate = self.write_gate.read().await;
        let slot = self.store.slot_or_insert(key);
        let mut guard = slot.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_SLOT {
            return Err(EngineError::LimitExceeded("too many reservations in slot"));
        }

        let used = guard.seats_used();
        if let Err(e) = check_admission(used, req.party_size, ceiling) {
            tracing::debug!("rejected party of {} at {key}: {e}", req.party_size);
            metrics::counter!(RESERVATIONS_REJECTED_TOTAL).increment(1);
            return Err(e);
        }

        let reservation = Reservation {
            id: Ulid::new(),
            full_name: req.full_name,
            email: req.email,
            phone: req.phone,
            date: req.date,
            slot: req.slot,
            party_size: req.party_size,
            status: Status::Pending,
            notes: req.notes,
            created_at: now_ms(),
        };
        self.store.guard_admission(&guard, &reservation, ceiling)?;

        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(RESERVATIONS_ADMITTED_TOTAL).increment(1);
        tracing::debug!("admitted {} (party of {}) at {key}", reservation.id, reservation.party_size);
        Ok(reservation)
    }

    /// Move a reservation to `status`. Completed reservations are fixed. A cancelled
    /// reservation brought back to `pending`/`confirmed` must fit under the admission ceiling again.
    pub async fn update_status(&self, id: Ulid, status: Status) -> Result<Reservation, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_write(id).await?;
        let effect = self
            .store
            .guard_mutation(&guard, id, Operation::SetStatus(status))?;

        let current = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        if current.status == status {
            return Ok(current);
        }
        if effect == SeatEffect::Reacquires {
            check_admission(guard.seats_used(), current.party_size, self.policy.admission_ceiling)?;
        }

        let event = Event::StatusChanged {
            id,
            key: guard.key,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!("reservation {id}: {} -> {status}", current.status);
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Delete a reservation that is not completed. Returns the deleted record.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_write(id).await?;
        self.store.guard_mutation(&guard, id, Operation::Delete)?;
        let removed = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;

        let event = Event::ReservationDeleted { id, key: guard.key };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!("reservation {id} deleted ({})", removed.status);
        Ok(removed)
    }

    /// Complete every `pending`/`confirmed` reservation dated on or before `cutoff`.
    /// Returns how many records changed; a second call for the same cutoff returns 0.
    pub async fn complete_through(&self, cutoff: NaiveDate) -> Result<usize, EngineError> {
        let _gate = self.write_gate.read().await;
        let mut completed = 0;
        for key in self.store.keys_between(NaiveDate::MIN, cutoff) {
            let Some(slot) = self.store.slot(&key) else {
                continue;
            };
            let mut guard = slot.write().await;
            let ids: Vec<Ulid> = guard
                .matching(&[Status::Pending, Status::Confirmed])
                .map(|r| r.id)
                .collect();
            if ids.is_empty() {
                continue;
            }
            let count = ids.len();
            let event = Event::ReservationsCompleted { key, ids };
            self.persist_and_apply(&mut guard, &event).await?;
            completed += count;
        }
        Ok(completed)
    }

    /// Rewrite the WAL as one `ReservationCreated` per live record, carrying its current status.
    /// Slots emptied by deletes are dropped here too, since the exclusive gate keeps writers out.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.write_gate.write().await;
        let pruned = self.store.prune_empty_slots();
        if pruned > 0 {
            tracing::debug!("pruned {pruned} empty slots");
        }
        let mut reservations = self.store.all().await;
        reservations.sort_by_key(|r| (r.created_at, r.id));
        let events: Vec<Event> = reservations
            .into_iter()
            .map(|reservation| Event::ReservationCreated { reservation })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
