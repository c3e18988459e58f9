pub mod booking;
pub mod clock;
pub mod notify;
pub mod repository;

use chrono::{DateTime, Utc};
use coachline_catalog::InventoryError;
use uuid::Uuid;

pub use booking::{BookingReceipt, BookingRecord, PassengerDetails};
pub use clock::{Clock, ManualClock, SystemClock};
pub use notify::{EventSink, NullSink};
pub use repository::{BookingRepository, RepoResult, TripRepository};

/// Every way a hold, release or purchase can be refused.
///
/// Messages are written for the passenger; [`ReservationError::kind`] is the
/// stable code for clients and metrics.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReservationError {
    #[error("Trip {0} does not exist")]
    TripNotFound(Uuid),

    #[error("Seat {seat_id} does not exist on trip {trip_id}")]
    SeatNotFound { trip_id: Uuid, seat_id: Uuid },

    #[error("Seat {seat_number} has already been sold")]
    SeatUnavailable { seat_number: u32 },

    #[error("Seat {seat_number} was just taken by another passenger")]
    SeatConflict { seat_number: u32 },

    #[error("Seat {seat_number} is sold and cannot be released")]
    SeatAlreadySold { seat_number: u32 },

    #[error("Booking for this trip closed at {cutoff}")]
    BookingWindowClosed { cutoff: DateTime<Utc> },

    #[error("Select at least one seat, each seat only once")]
    EmptyOrInvalidSeatSet,

    #[error("At most {limit} seats can be booked at once, {requested} were requested")]
    TooManySeats { requested: usize, limit: usize },

    #[error("Seat {seat_number} is held by another passenger")]
    HoldNotOwned { seat_number: u32 },

    #[error("Passenger details are incomplete: {0}")]
    InvalidPassenger(String),

    #[error("Invalid trip: {0}")]
    InvalidTrip(String),

    #[error("Idempotency key '{key}' was already used for a different purchase")]
    IdempotencyKeyReused { key: String },
}

impl ReservationError {
    pub fn kind(&self) -> &'static str {
        match self {
            ReservationError::TripNotFound(_) => "TRIP_NOT_FOUND",
            ReservationError::SeatNotFound { .. } => "SEAT_NOT_FOUND",
            ReservationError::SeatUnavailable { .. } => "SEAT_UNAVAILABLE",
            ReservationError::SeatConflict { .. } => "SEAT_CONFLICT",
            ReservationError::SeatAlreadySold { .. } => "SEAT_ALREADY_SOLD",
            ReservationError::BookingWindowClosed { .. } => "BOOKING_WINDOW_CLOSED",
            ReservationError::EmptyOrInvalidSeatSet => "EMPTY_OR_INVALID_SEAT_SET",
            ReservationError::TooManySeats { .. } => "TOO_MANY_SEATS",
            ReservationError::HoldNotOwned { .. } => "HOLD_NOT_OWNED",
            ReservationError::InvalidPassenger(_) => "INVALID_PASSENGER",
            ReservationError::InvalidTrip(_) => "INVALID_TRIP",
            ReservationError::IdempotencyKeyReused { .. } => "IDEMPOTENCY_KEY_REUSED",
        }
    }

    /// Seat number the error is about, when there is exactly one.
    pub fn seat_number(&self) -> Option<u32> {
        match self {
            ReservationError::SeatUnavailable { seat_number }
            | ReservationError::SeatConflict { seat_number }
            | ReservationError::SeatAlreadySold { seat_number }
            | ReservationError::HoldNotOwned { seat_number } => Some(*seat_number),
            _ => None,
        }
    }
}

impl ReservationError {
    /// Lift an inventory error raised while working on `trip_id`.
    pub fn from_inventory(trip_id: Uuid, err: InventoryError) -> Self {
        match err {
            InventoryError::SeatNotFound(seat_id) => ReservationError::SeatNotFound { trip_id, seat_id },
            InventoryError::DuplicateSeat(_) => ReservationError::EmptyOrInvalidSeatSet,
            InventoryError::InvalidTrip(msg) => ReservationError::InvalidTrip(msg),
            InventoryError::CorruptSeat { seat_id, reason } => {
                ReservationError::InvalidTrip(format!("seat {} is inconsistent: {}", seat_id, reason))
            }
        }
    }
}

pub type ReservationResult<T> = Result<T, ReservationError>;
