use ulid::Ulid;

use crate::model::Status;

use super::EngineError;

/// A mutation an operator can request on an existing reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SetStatus(Status),
    Delete,
}

/// What an allowed operation does to seat accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatEffect {
    /// Seats held before and after (or neither).
    Unchanged,
    /// Seats go back to the pool.
    Releases,
    /// A reservation that held no seats starts holding them again; it must pass admission.
    Reacquires,
}

/// The single gate consulted by status updates, deletes and the sweep.
///
/// `completed` is a sink: nothing may change or delete it. Every other state may move
/// to any state, and may be deleted.
pub fn check(id: Ulid, current: Status, op: Operation) -> Result<SeatEffect, EngineError> {
    if current == Status::Completed {
        return Err(EngineError::FixedState { id, status: current });
    }
    let effect = match op {
        Operation::Delete => {
            if current.holds_seats() {
                SeatEffect::Releases
            } else {
                SeatEffect::Unchanged
            }
        }
        Operation::SetStatus(next) => match (current.holds_seats(), next.holds_seats()) {
            (true, false) => SeatEffect::Releases,
            (false, true) => SeatEffect::Reacquires,
            _ => SeatEffect::Unchanged,
        },
    };
    Ok(effect)
}
