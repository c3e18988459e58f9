use chrono::{DateTime, Utc};
use coachline_shared::Masked;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::inventory::InventoryError;

/// Coarse seat status, used as the precondition of a conditional transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Held,
    Sold,
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SeatStatus::Available => "available",
            SeatStatus::Held => "held",
            SeatStatus::Sold => "sold",
        };
        f.write_str(s)
    }
}

/// Opaque requester token bound to a hold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct HoldToken(Uuid);

impl HoldToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for HoldToken {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for HoldToken {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for HoldToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl fmt::Display for HoldToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The passenger record attached to every seat of a booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassengerInfo {
    pub booking_id: Uuid,
    pub name: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
    pub booked_at: DateTime<Utc>,
}

/// Seat lifecycle. The hold expiry only exists while held and the passenger
/// only exists once sold, so the two can never disagree with the status.
#[derive(Debug, Clone, PartialEq)]
pub enum SeatState {
    Available,
    Held {
        expires_at: DateTime<Utc>,
        token: HoldToken,
    },
    Sold {
        passenger: PassengerInfo,
    },
}

impl SeatState {
    pub fn status(&self) -> SeatStatus {
        match self {
            SeatState::Available => SeatStatus::Available,
            SeatState::Held { .. } => SeatStatus::Held,
            SeatState::Sold { .. } => SeatStatus::Sold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "SeatRecord", try_from = "SeatRecord")]
pub struct Seat {
    pub id: Uuid,
    /// 1-based position on the bus.
    pub number: u32,
    pub price_cents: i64,
    state: SeatState,
}

impl Seat {
    pub fn new(number: u32, price_cents: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            number,
            price_cents,
            state: SeatState::Available,
        }
    }

    pub fn state(&self) -> &SeatState {
        &self.state
    }

    pub fn status(&self) -> SeatStatus {
        self.state.status()
    }

    pub fn hold_expiry(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            SeatState::Held { expires_at, .. } => Some(*expires_at),
            _ => None,
        }
    }

    pub fn hold_token(&self) -> Option<HoldToken> {
        match &self.state {
            SeatState::Held { token, .. } => Some(*token),
            _ => None,
        }
    }

    pub fn passenger(&self) -> Option<&PassengerInfo> {
        match &self.state {
            SeatState::Sold { passenger } => Some(passenger),
            _ => None,
        }
    }

    /// True when the seat is held and its hold ran out at or before `now`.
    pub fn hold_elapsed(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, SeatState::Held { expires_at, .. } if expires_at <= now)
    }

    pub(crate) fn replace_state(&mut self, next: SeatState) -> SeatState {
        std::mem::replace(&mut self.state, next)
    }
}

/// Flat storage form of a seat: status plus the optional fields it governs.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SeatRecord {
    id: Uuid,
    number: u32,
    status: SeatStatus,
    price_cents: i64,
    hold_expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    hold_token: Option<HoldToken>,
    passenger_info: Option<PassengerInfo>,
}

impl From<Seat> for SeatRecord {
    fn from(seat: Seat) -> Self {
        let status = seat.status();
        let (hold_expiry, hold_token, passenger_info) = match seat.state {
            SeatState::Available => (None, None, None),
            SeatState::Held { expires_at, token } => (Some(expires_at), Some(token), None),
            SeatState::Sold { passenger } => (None, None, Some(passenger)),
        };
        Self {
            id: seat.id,
            number: seat.number,
            status,
            price_cents: seat.price_cents,
            hold_expiry,
            hold_token,
            passenger_info,
        }
    }
}

impl TryFrom<SeatRecord> for Seat {
    type Error = InventoryError;

    fn try_from(record: SeatRecord) -> Result<Self, Self::Error> {
        let corrupt = |reason: &str| InventoryError::CorruptSeat {
            seat_id: record.id,
            reason: reason.to_string(),
        };

        let state = match (record.status, record.hold_expiry, record.hold_token, &record.passenger_info) {
            (SeatStatus::Available, None, None, None) => SeatState::Available,
            (SeatStatus::Held, Some(expires_at), Some(token), None) => SeatState::Held { expires_at, token },
            (SeatStatus::Sold, None, None, Some(passenger)) => SeatState::Sold {
                passenger: passenger.clone(),
            },
            (SeatStatus::Available, ..) => return Err(corrupt("available seat carries hold or passenger data")),
            (SeatStatus::Held, ..) => return Err(corrupt("held seat needs an expiry and token and no passenger")),
            (SeatStatus::Sold, ..) => return Err(corrupt("sold seat needs a passenger and no hold")),
        };

        if record.number == 0 {
            return Err(corrupt("seat numbers start at 1"));
        }

        Ok(Seat {
            id: record.id,
            number: record.number,
            price_cents: record.price_cents,
            state,
        })
    }
}
