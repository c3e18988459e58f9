use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::seat::{Seat, SeatState, SeatStatus};

/// Outcome of a single conditional transition.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum Transition {
    Applied { previous: SeatState },
    /// The seat was not in the expected status; nothing changed.
    Conflict { actual: SeatStatus },
}

/// One member of an all-or-nothing group transition.
#[derive(Debug, Clone)]
pub struct SeatChange {
    pub seat_id: Uuid,
    pub expected: SeatStatus,
    pub next: SeatState,
}

#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum GroupTransition {
    Applied { previous: Vec<SeatState> },
    /// First member whose precondition failed; no seat in the group changed.
    Conflict { seat_id: Uuid, actual: SeatStatus },
}

/// Ordered, fixed-size seat collection of one trip.
///
/// Seat state can only change through [`SeatInventory::apply_transition`] and
/// [`SeatInventory::apply_group`]; counts are always derived from the seats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatInventory {
    seats: Vec<Seat>,
}

impl SeatInventory {
    /// Lay out `total` available seats numbered from 1, all at the same price.
    pub fn with_capacity(total: u32, price_cents: i64) -> Self {
        Self {
            seats: (1..=total).map(|number| Seat::new(number, price_cents)).collect(),
        }
    }

    pub fn find(&self, seat_id: &Uuid) -> Option<&Seat> {
        self.seats.iter().find(|s| s.id == *seat_id)
    }

    pub fn find_by_number(&self, number: u32) -> Option<&Seat> {
        self.seats.iter().find(|s| s.number == number)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Seat> {
        self.seats.iter()
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn count(&self, status: SeatStatus) -> usize {
        self.seats.iter().filter(|s| s.status() == status).count()
    }

    pub fn available_count(&self) -> usize {
        self.count(SeatStatus::Available)
    }

    /// Held seats whose expiry is at or before `now`, in seat order.
    pub fn elapsed_holds(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.seats
            .iter()
            .filter(|s| s.hold_elapsed(now))
            .map(|s| s.id)
            .collect()
    }

    /// Move a seat to `next` only if its current status is `expected`.
    pub fn apply_transition(
        &mut self,
        seat_id: &Uuid,
        expected: SeatStatus,
        next: SeatState,
    ) -> Result<Transition, InventoryError> {
        let seat = self
            .seats
            .iter_mut()
            .find(|s| s.id == *seat_id)
            .ok_or(InventoryError::SeatNotFound(*seat_id))?;

        let actual = seat.status();
        if actual != expected {
            return Ok(Transition::Conflict { actual });
        }

        let previous = seat.replace_state(next);
        Ok(Transition::Applied { previous })
    }

    /// Apply every change or none of them.
    ///
    /// All preconditions are checked before the first seat is touched, so a
    /// conflict on the last member leaves the earlier ones untouched.
    pub fn apply_group(&mut self, changes: Vec<SeatChange>) -> Result<GroupTransition, InventoryError> {
        let mut seen = HashSet::with_capacity(changes.len());
        let mut positions = Vec::with_capacity(changes.len());

        for change in &changes {
            if !seen.insert(change.seat_id) {
                return Err(InventoryError::DuplicateSeat(change.seat_id));
            }
            let index = self
                .seats
                .iter()
                .position(|s| s.id == change.seat_id)
                .ok_or(InventoryError::SeatNotFound(change.seat_id))?;
            positions.push(index);
        }

        for (change, &index) in changes.iter().zip(&positions) {
            let actual = self.seats[index].status();
            if actual != change.expected {
                return Ok(GroupTransition::Conflict {
                    seat_id: change.seat_id,
                    actual,
                });
            }
        }

        let previous = changes
            .into_iter()
            .zip(positions)
            .map(|(change, index)| self.seats[index].replace_state(change.next))
            .collect();

        Ok(GroupTransition::Applied { previous })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Seat not found: {0}")]
    SeatNotFound(Uuid),

    #[error("Seat {0} appears more than once in the request")]
    DuplicateSeat(Uuid),

    #[error("Invalid trip: {0}")]
    InvalidTrip(String),

    #[error("Seat {seat_id} is inconsistent: {reason}")]
    CorruptSeat { seat_id: Uuid, reason: String },
}
