pub mod app_config;
pub mod booking_repo;
pub mod database;
#[cfg(feature = "kafka")]
pub mod events;
pub mod memory;

pub use app_config::Config;
pub use booking_repo::{PgBookingRepository, PgTripRepository};
pub use database::DbClient;
#[cfg(feature = "kafka")]
pub use events::KafkaEventSink;
pub use memory::{InMemoryBookingRepository, InMemoryTripRepository};
