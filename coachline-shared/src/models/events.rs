use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SeatHeldEvent {
    pub trip_id: Uuid,
    pub seat_id: Uuid,
    pub seat_number: u32,
    pub hold_expiry: DateTime<Utc>,
    pub held_at: DateTime<Utc>,
    pub available_seats: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SeatReleasedEvent {
    pub trip_id: Uuid,
    pub seat_id: Uuid,
    pub seat_number: u32,
    pub released_at: DateTime<Utc>,
    pub available_seats: usize,
}

/// A hold that ran out without a release or purchase. Kept apart from
/// `SeatReleasedEvent` so listeners can tell the passenger why the seat went.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HoldExpiredEvent {
    pub trip_id: Uuid,
    pub seat_id: Uuid,
    pub seat_number: u32,
    pub hold_expiry: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
    pub available_seats: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SeatsSoldEvent {
    pub trip_id: Uuid,
    pub booking_id: Uuid,
    pub seat_numbers: Vec<u32>,
    pub total_cents: i64,
    pub sold_at: DateTime<Utc>,
    pub available_seats: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OperationFailedEvent {
    pub trip_id: Uuid,
    pub seat_numbers: Vec<u32>,
    pub operation: String,
    /// Machine code of the failure, e.g. `SEAT_CONFLICT`.
    pub reason: String,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

/// Everything the reservation engine tells the outside world.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationEvent {
    SeatHeld(SeatHeldEvent),
    SeatReleased(SeatReleasedEvent),
    HoldExpired(HoldExpiredEvent),
    SeatsSold(SeatsSoldEvent),
    OperationFailed(OperationFailedEvent),
}

impl ReservationEvent {
    pub fn trip_id(&self) -> Uuid {
        match self {
            ReservationEvent::SeatHeld(e) => e.trip_id,
            ReservationEvent::SeatReleased(e) => e.trip_id,
            ReservationEvent::HoldExpired(e) => e.trip_id,
            ReservationEvent::SeatsSold(e) => e.trip_id,
            ReservationEvent::OperationFailed(e) => e.trip_id,
        }
    }

    /// Seats left on the trip right after this event, when it changed them.
    pub fn available_seats(&self) -> Option<usize> {
        match self {
            ReservationEvent::SeatHeld(e) => Some(e.available_seats),
            ReservationEvent::SeatReleased(e) => Some(e.available_seats),
            ReservationEvent::HoldExpired(e) => Some(e.available_seats),
            ReservationEvent::SeatsSold(e) => Some(e.available_seats),
            ReservationEvent::OperationFailed(_) => None,
        }
    }

    /// Stable name used for SSE event types and Kafka keys.
    pub fn kind(&self) -> &'static str {
        match self {
            ReservationEvent::SeatHeld(_) => "seat_held",
            ReservationEvent::SeatReleased(_) => "seat_released",
            ReservationEvent::HoldExpired(_) => "hold_expired",
            ReservationEvent::SeatsSold(_) => "seats_sold",
            ReservationEvent::OperationFailed(_) => "operation_failed",
        }
    }

    /// Text a notification toast would show for this event.
    pub fn describe(&self) -> String {
        match self {
            ReservationEvent::SeatHeld(e) => {
                format!("Seat {} held until {}", e.seat_number, e.hold_expiry.format("%H:%M:%S"))
            }
            ReservationEvent::SeatReleased(e) => format!("Seat {} released", e.seat_number),
            ReservationEvent::HoldExpired(e) => {
                format!("Seat {} hold expired and has been released", e.seat_number)
            }
            ReservationEvent::SeatsSold(e) => {
                let seats = e
                    .seat_numbers
                    .iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Booking {} confirmed for seats {}", e.booking_id, seats)
            }
            ReservationEvent::OperationFailed(e) => e.message.clone(),
        }
    }
}
