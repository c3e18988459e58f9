use chrono::{DateTime, Utc};
use coachline_catalog::PassengerInfo;
use coachline_shared::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ReservationError;

/// Contact details supplied with a purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassengerDetails {
    pub name: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
}

impl PassengerDetails {
    pub fn validate(&self) -> Result<(), ReservationError> {
        if self.name.trim().is_empty() {
            return Err(ReservationError::InvalidPassenger("name is required".into()));
        }
        if self.email.is_blank() || !self.email.expose().contains('@') {
            return Err(ReservationError::InvalidPassenger("a valid email is required".into()));
        }
        Ok(())
    }

    /// Stamp the details with the booking they belong to.
    pub fn into_passenger(self, booking_id: Uuid, booked_at: DateTime<Utc>) -> PassengerInfo {
        PassengerInfo {
            booking_id,
            name: self.name.trim().to_string(),
            email: self.email,
            phone: self.phone,
            booked_at,
        }
    }
}

/// What a successful purchase returns to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingReceipt {
    pub booking_id: Uuid,
    pub trip_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub seat_numbers: Vec<u32>,
    pub total_cents: i64,
    pub booked_at: DateTime<Utc>,
}

/// Durable form of a completed sale, handed to the booking repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub booking_id: Uuid,
    pub trip_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub seat_numbers: Vec<u32>,
    pub passenger: PassengerInfo,
    pub total_cents: i64,
}

impl BookingRecord {
    pub fn receipt(&self) -> BookingReceipt {
        BookingReceipt {
            booking_id: self.booking_id,
            trip_id: self.trip_id,
            seat_ids: self.seat_ids.clone(),
            seat_numbers: self.seat_numbers.clone(),
            total_cents: self.total_cents,
            booked_at: self.passenger.booked_at,
        }
    }
}
