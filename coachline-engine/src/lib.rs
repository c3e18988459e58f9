pub mod engine;
pub mod events;
pub mod expiry;
pub mod models;

pub use engine::{ReservationEngine, ReservationEngineBuilder};
pub use events::{BroadcastSink, FanoutSink};
pub use expiry::ExpiryScheduler;
pub use models::{HoldReceipt, PurchaseRequest, ReleaseOutcome, ReservationPolicy, SweepReport, TripQuery};
