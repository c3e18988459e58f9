use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::inventory::{InventoryError, SeatInventory};
use crate::pricing::{self, AvailabilityLevel};
use crate::seat::SeatStatus;

/// Largest seat count a single trip may be created with.
pub const MAX_SEATS_PER_TRIP: u32 = 100;

pub const DEFAULT_BOOKING_WINDOW_HOURS: u32 = 48;

/// One year.
pub const MAX_BOOKING_WINDOW_HOURS: u32 = 24 * 365;

/// Highest base fare accepted, in cents. Keeps every seat sum far from `i64::MAX`.
pub const MAX_SEAT_PRICE_CENTS: i64 = 100_000_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusType {
    #[default]
    Standard,
    Luxury,
    Sleeper,
}

impl BusType {
    /// Seat count used when a trip does not override it.
    pub fn default_capacity(&self) -> u32 {
        match self {
            BusType::Standard => 40,
            BusType::Luxury => 36,
            BusType::Sleeper => 32,
        }
    }
}

impl fmt::Display for BusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BusType::Standard => "standard",
            BusType::Luxury => "luxury",
            BusType::Sleeper => "sleeper",
        };
        f.write_str(s)
    }
}

impl FromStr for BusType {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(BusType::Standard),
            "luxury" => Ok(BusType::Luxury),
            "sleeper" => Ok(BusType::Sleeper),
            other => Err(InventoryError::InvalidTrip(format!("unknown bus type '{}'", other))),
        }
    }
}

/// Everything needed to lay out a new trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrip {
    pub from: String,
    pub to: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    #[serde(default)]
    pub bus_type: BusType,
    pub base_price_cents: i64,
    /// Overrides the bus type's capacity.
    #[serde(default)]
    pub total_seats: Option<u32>,
    #[serde(default = "default_booking_window")]
    pub booking_window_hours: u32,
}

fn default_booking_window() -> u32 {
    DEFAULT_BOOKING_WINDOW_HOURS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub bus_type: BusType,
    pub base_price_cents: i64,
    /// New holds and purchases stop this many hours before departure.
    pub booking_window_hours: u32,
    pub seats: SeatInventory,
    pub created_at: DateTime<Utc>,
}

impl Trip {
    pub fn new(new_trip: NewTrip, created_at: DateTime<Utc>) -> Result<Self, InventoryError> {
        let from = new_trip.from.trim().to_string();
        let to = new_trip.to.trim().to_string();
        if from.is_empty() || to.is_empty() {
            return Err(InventoryError::InvalidTrip("origin and destination are required".into()));
        }
        if from.eq_ignore_ascii_case(&to) {
            return Err(InventoryError::InvalidTrip("origin and destination must differ".into()));
        }
        if new_trip.base_price_cents < 0 {
            return Err(InventoryError::InvalidTrip("base price cannot be negative".into()));
        }
        if new_trip.base_price_cents > MAX_SEAT_PRICE_CENTS {
            return Err(InventoryError::InvalidTrip(format!(
                "base price cannot exceed {} cents",
                MAX_SEAT_PRICE_CENTS
            )));
        }
        if new_trip.booking_window_hours > MAX_BOOKING_WINDOW_HOURS {
            return Err(InventoryError::InvalidTrip(format!(
                "booking window cannot exceed {} hours, got {}",
                MAX_BOOKING_WINDOW_HOURS, new_trip.booking_window_hours
            )));
        }
        let departure = new_trip.date.and_time(new_trip.time).and_utc();
        if cutoff_before(departure, new_trip.booking_window_hours).is_none() {
            return Err(InventoryError::InvalidTrip("departure date is out of range".into()));
        }

        let total = new_trip.total_seats.unwrap_or_else(|| new_trip.bus_type.default_capacity());
        if total == 0 || total > MAX_SEATS_PER_TRIP {
            return Err(InventoryError::InvalidTrip(format!(
                "seat count must be between 1 and {}, got {}",
                MAX_SEATS_PER_TRIP, total
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            from,
            to,
            date: new_trip.date,
            time: new_trip.time,
            bus_type: new_trip.bus_type,
            base_price_cents: new_trip.base_price_cents,
            booking_window_hours: new_trip.booking_window_hours,
            seats: SeatInventory::with_capacity(total, new_trip.base_price_cents),
            created_at,
        })
    }

    /// Departure instant; date and time are taken as UTC.
    pub fn departure(&self) -> DateTime<Utc> {
        self.date.and_time(self.time).and_utc()
    }

    /// Trips loaded from storage skip [`Trip::new`]; a cutoff that does not
    /// fit in a `DateTime` is clamped to the earliest instant, which closes
    /// booking instead of panicking.
    pub fn booking_cutoff(&self) -> DateTime<Utc> {
        cutoff_before(self.departure(), self.booking_window_hours).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_bookable_at(&self, now: DateTime<Utc>) -> bool {
        now < self.booking_cutoff()
    }

    pub fn total_seats(&self) -> usize {
        self.seats.len()
    }

    pub fn available_seats(&self) -> usize {
        self.seats.available_count()
    }

    pub fn summary(&self) -> TripSummary {
        let available = self.seats.available_count();
        let total = self.seats.len();
        TripSummary {
            total_seats: total,
            available_seats: available,
            held_seats: self.seats.count(SeatStatus::Held),
            sold_seats: self.seats.count(SeatStatus::Sold),
            availability: AvailabilityLevel::classify(available, total),
            revenue_cents: pricing::revenue_cents(&self.seats),
        }
    }
}

fn cutoff_before(departure: DateTime<Utc>, window_hours: u32) -> Option<DateTime<Utc>> {
    departure.checked_sub_signed(Duration::hours(i64::from(window_hours)))
}

/// Counts derived from the seat list at the time of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripSummary {
    pub total_seats: usize,
    pub available_seats: usize,
    pub held_seats: usize,
    pub sold_seats: usize,
    pub availability: AvailabilityLevel,
    pub revenue_cents: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lisbon_porto() -> NewTrip {
        NewTrip {
            from: "Lisbon".to_string(),
            to: "Porto".to_string(),
            date: NaiveDate::from_ymd_opt(2030, 6, 1).unwrap(),
            time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            bus_type: BusType::Luxury,
            base_price_cents: 2000,
            total_seats: None,
            booking_window_hours: 48,
        }
    }

    #[test]
    fn test_capacity_follows_bus_type_unless_overridden() {
        let trip = Trip::new(lisbon_porto(), Utc::now()).unwrap();
        assert_eq!(trip.total_seats(), 36);
        assert_eq!(trip.available_seats(), 36);

        let small = Trip::new(NewTrip { total_seats: Some(4), ..lisbon_porto() }, Utc::now()).unwrap();
        assert_eq!(small.total_seats(), 4);
    }

    #[test]
    fn test_booking_cutoff_is_window_before_departure() {
        let trip = Trip::new(lisbon_porto(), Utc::now()).unwrap();
        let departure = trip.departure();
        assert_eq!(departure.to_rfc3339(), "2030-06-01T09:30:00+00:00");
        assert_eq!(trip.booking_cutoff(), departure - Duration::hours(48));
        assert!(trip.is_bookable_at(departure - Duration::hours(49)));
        assert!(!trip.is_bookable_at(departure - Duration::hours(48)));
    }

    #[test]
    fn test_invalid_trips_are_rejected() {
        let blank = NewTrip { from: "  ".into(), ..lisbon_porto() };
        assert!(Trip::new(blank, Utc::now()).is_err());

        let same = NewTrip { to: "lisbon".into(), ..lisbon_porto() };
        assert!(Trip::new(same, Utc::now()).is_err());

        let empty = NewTrip { total_seats: Some(0), ..lisbon_porto() };
        assert!(Trip::new(empty, Utc::now()).is_err());

        let negative = NewTrip { base_price_cents: -1, ..lisbon_porto() };
        assert!(Trip::new(negative, Utc::now()).is_err());
    }

    #[test]
    fn test_out_of_range_numbers_are_rejected() {
        let endless = NewTrip { booking_window_hours: u32::MAX, ..lisbon_porto() };
        assert!(matches!(Trip::new(endless, Utc::now()), Err(InventoryError::InvalidTrip(_))));

        let year = NewTrip { booking_window_hours: MAX_BOOKING_WINDOW_HOURS, ..lisbon_porto() };
        assert!(Trip::new(year, Utc::now()).is_ok());

        let pricey = NewTrip { base_price_cents: i64::MAX / 2 + 1, ..lisbon_porto() };
        assert!(matches!(Trip::new(pricey, Utc::now()), Err(InventoryError::InvalidTrip(_))));

        let dawn_of_time = NewTrip { date: NaiveDate::MIN, booking_window_hours: 1, ..lisbon_porto() };
        assert!(matches!(Trip::new(dawn_of_time, Utc::now()), Err(InventoryError::InvalidTrip(_))));
    }

    #[test]
    fn test_stored_trip_with_huge_window_is_never_bookable() {
        let mut trip = Trip::new(lisbon_porto(), Utc::now()).unwrap();
        trip.booking_window_hours = u32::MAX;
        assert_eq!(trip.booking_cutoff(), DateTime::<Utc>::MIN_UTC);
        assert!(!trip.is_bookable_at(Utc::now()));
    }

    #[test]
    fn test_bus_type_parsing() {
        assert_eq!("Sleeper".parse::<BusType>().unwrap(), BusType::Sleeper);
        assert!("double-decker".parse::<BusType>().is_err());
    }

    #[test]
    fn test_new_trip_defaults_from_json() {
        let json = serde_json::json!({
            "from": "Lisbon",
            "to": "Faro",
            "date": "2030-06-01",
            "time": "09:30:00",
            "base_price_cents": 1500
        });
        let new_trip: NewTrip = serde_json::from_value(json).unwrap();
        assert_eq!(new_trip.bus_type, BusType::Standard);
        assert_eq!(new_trip.booking_window_hours, DEFAULT_BOOKING_WINDOW_HOURS);
        assert_eq!(new_trip.total_seats, None);
    }
}
