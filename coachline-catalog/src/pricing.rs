use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::inventory::{InventoryError, SeatInventory};
use crate::seat::SeatStatus;

/// Availability badge shown next to a trip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvailabilityLevel {
    Available,
    /// Fewer than a fifth of the seats left.
    AlmostFull,
    SoldOut,
}

impl AvailabilityLevel {
    pub fn classify(available: usize, total: usize) -> Self {
        if available == 0 {
            AvailabilityLevel::SoldOut
        } else if available * 5 < total {
            AvailabilityLevel::AlmostFull
        } else {
            AvailabilityLevel::Available
        }
    }
}

/// Price of a seat selection. Every id must exist on the trip.
pub fn quote_cents(seats: &SeatInventory, seat_ids: &[Uuid]) -> Result<i64, InventoryError> {
    seat_ids.iter().try_fold(0i64, |total, id| {
        let seat = seats.find(id).ok_or(InventoryError::SeatNotFound(*id))?;
        total
            .checked_add(seat.price_cents)
            .ok_or_else(|| InventoryError::InvalidTrip("seat prices overflow the booking total".into()))
    })
}

/// Money taken so far: sum of sold seat prices, saturating at `i64::MAX`.
pub fn revenue_cents(seats: &SeatInventory) -> i64 {
    seats
        .iter()
        .filter(|s| s.status() == SeatStatus::Sold)
        .fold(0i64, |total, s| total.saturating_add(s.price_cents))
}

/// `2050` -> `"$20.50"`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}${}.{:02}", sign, abs / 100, abs % 100)
}
