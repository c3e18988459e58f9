use chrono::{DateTime, Duration, NaiveDate, Utc};
use coachline_catalog::{HoldToken, Trip};
use coachline_core::PassengerDetails;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_HOLD_MINUTES: i64 = 10;
pub const DEFAULT_MAX_SEATS_PER_BOOKING: usize = 4;

/// Tunables of the reservation engine.
#[derive(Debug, Clone)]
pub struct ReservationPolicy {
    pub hold_duration: Duration,
    pub max_seats_per_booking: usize,
    pub enforce_booking_window: bool,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            hold_duration: Duration::minutes(DEFAULT_HOLD_MINUTES),
            max_seats_per_booking: DEFAULT_MAX_SEATS_PER_BOOKING,
            enforce_booking_window: true,
        }
    }
}

/// Returned by a successful hold. The token is the only proof of ownership
/// the caller gets; it is not shown to anyone else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldReceipt {
    pub trip_id: Uuid,
    pub seat_id: Uuid,
    pub seat_number: u32,
    pub hold_expiry: DateTime<Utc>,
    pub hold_token: HoldToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseOutcome {
    Released,
    /// Nothing to do: the seat was not held.
    AlreadyAvailable,
}

#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub trip_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub passenger: PassengerDetails,
    /// When set, every held seat in the request must carry this token.
    pub hold_token: Option<HoldToken>,
    /// Repeating a purchase with the same key returns the first receipt.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub trips_scanned: usize,
    pub holds_expired: usize,
}

/// Filter for trip listings. Empty fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TripQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub date: Option<NaiveDate>,
}

impl TripQuery {
    pub fn matches(&self, trip: &Trip) -> bool {
        let city = |wanted: &Option<String>, actual: &str| match wanted.as_deref().map(str::trim) {
            Some(w) if !w.is_empty() => w.eq_ignore_ascii_case(actual),
            _ => true,
        };
        city(&self.from, &trip.from)
            && city(&self.to, &trip.to)
            && self.date.map_or(true, |d| d == trip.date)
    }
}
