use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::capacity::{check_admission, seats_used};
use super::lifecycle::{self, Operation, SeatEffect};
use super::EngineError;

pub type SharedSlot = Arc<RwLock<SlotState>>;

/// All reservations booked at one `(date, slot)`. The lock around it is the admission lock.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub key: SlotKey,
    /// Creation order.
    pub reservations: Vec<Reservation>,
}

impl SlotState {
    pub fn new(key: SlotKey) -> Self {
        Self { key, reservations: Vec::new() }
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    fn get_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    pub fn seats_used(&self) -> u32 {
        seats_used(&self.reservations, self.key)
    }

    pub fn matching(&self, statuses: &[Status]) -> impl Iterator<Item = &Reservation> {
        self.reservations
            .iter()
            .filter(move |r| statuses.contains(&r.status))
    }
}

/// In-memory reservation index: one locked `SlotState` per `(date, slot)` plus an id lookup.
///
/// Reads take the slot's read lock, so they always see every committed write.
/// Nothing here is cached on behalf of callers.
pub struct ReservationStore {
    slots: DashMap<SlotKey, SharedSlot>,
    index: DashMap<Ulid, SlotKey>,
}

impl Default for ReservationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservationStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            index: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Drop slots with no reservations left. Only safe while no writer can be holding a
    /// slot handle, i.e. under the engine's exclusive write gate. Returns how many went.
    pub fn prune_empty_slots(&self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| match slot.try_read() {
            Ok(state) => !state.reservations.is_empty(),
            Err(_) => true,
        });
        before - self.slots.len()
    }

    pub fn slot(&self, key: &SlotKey) -> Option<SharedSlot> {
        self.slots.get(key).map(|e| e.value().clone())
    }

    pub fn slot_or_insert(&self, key: SlotKey) -> SharedSlot {
        self.slots
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(SlotState::new(key))))
            .value()
            .clone()
    }

    pub fn key_for(&self, id: &Ulid) -> Option<SlotKey> {
        self.index.get(id).map(|e| *e.value())
    }

    /// Keys whose date falls in `[start, end]`, sorted.
    pub fn keys_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<SlotKey> {
        let mut keys: Vec<SlotKey> = self
            .slots
            .iter()
            .map(|e| *e.key())
            .filter(|k| start <= k.date && k.date <= end)
            .collect();
        keys.sort();
        keys
    }

    pub fn all_keys(&self) -> Vec<SlotKey> {
        let mut keys: Vec<SlotKey> = self.slots.iter().map(|e| *e.key()).collect();
        keys.sort();
        keys
    }

    // ── Reads ────────────────────────────────────────────────

    pub async fn find_by_id(&self, id: Ulid) -> Option<Reservation> {
        let key = self.key_for(&id)?;
        let slot = self.slot(&key)?;
        let guard = slot.read().await;
        guard.get(id).cloned()
    }

    pub async fn find_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<Reservation> {
        let mut out = Vec::new();
        for key in self.keys_between(start, end) {
            if let Some(slot) = self.slot(&key) {
                out.extend(slot.read().await.reservations.iter().cloned());
            }
        }
        out
    }

    pub async fn find_by_slot(&self, key: SlotKey, statuses: &[Status]) -> Vec<Reservation> {
        match self.slot(&key) {
            Some(slot) => slot.read().await.matching(statuses).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn all(&self) -> Vec<Reservation> {
        let mut out = Vec::with_capacity(self.len());
        for key in self.all_keys() {
            if let Some(slot) = self.slot(&key) {
                out.extend(slot.read().await.reservations.iter().cloned());
            }
        }
        out
    }

    // ── Write-path guards (caller holds the slot write lock) ──

    /// Re-derive seat usage from the locked slot right before commit.
    pub fn guard_admission(
        &self,
        slot: &SlotState,
        reservation: &Reservation,
        ceiling: u32,
    ) -> Result<(), EngineError> {
        debug_assert_eq!(slot.key, reservation.key());
        if !reservation.holds_seats() {
            return Ok(());
        }
        check_admission(slot.seats_used(), reservation.party_size, ceiling)
    }

    /// Check the stored record, not the caller's copy, against the lifecycle rules.
    pub fn guard_mutation(
        &self,
        slot: &SlotState,
        id: Ulid,
        op: Operation,
    ) -> Result<SeatEffect, EngineError> {
        let current = slot.get(id).ok_or(EngineError::NotFound(id))?;
        lifecycle::check(id, current.status, op)
    }

    // ── Event application ────────────────────────────────────

    /// Apply a committed event. Infallible: validation happened before the WAL append,
    /// and replay trusts the log.
    pub fn apply_event(&self, slot: &mut SlotState, event: &Event) {
        match event {
            Event::ReservationCreated { reservation } => {
                self.index.insert(reservation.id, reservation.key());
                slot.reservations.push(reservation.clone());
            }
            Event::StatusChanged { id, status, .. } => {
                if let Some(r) = slot.get_mut(*id) {
                    r.status = *status;
                }
            }
            Event::ReservationDeleted { id, .. } => {
                slot.reservations.retain(|r| r.id != *id);
                self.index.remove(id);
            }
            Event::ReservationsCompleted { ids, .. } => {
                for r in slot.reservations.iter_mut() {
                    if r.holds_seats() && ids.contains(&r.id) {
                        r.status = Status::Completed;
                    }
                }
            }
        }
    }
}
