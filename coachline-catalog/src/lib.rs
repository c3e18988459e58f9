pub mod seat;
pub mod trip;
pub mod pricing;
pub mod inventory;

pub use seat::{HoldToken, PassengerInfo, Seat, SeatState, SeatStatus};
pub use trip::{BusType, NewTrip, Trip, TripSummary};
pub use pricing::AvailabilityLevel;
pub use inventory::{GroupTransition, InventoryError, SeatChange, SeatInventory, Transition};
