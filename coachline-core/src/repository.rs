use async_trait::async_trait;
use coachline_catalog::Trip;
use uuid::Uuid;

use crate::booking::BookingRecord;

pub type RepoResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Durable home of trip definitions. The engine writes a trip once, when it
/// is created, and reads all of them back at start-up.
#[async_trait]
pub trait TripRepository: Send + Sync {
    async fn create_trip(&self, trip: &Trip) -> RepoResult<()>;

    async fn list_trips(&self) -> RepoResult<Vec<Trip>>;
}

/// Durable record of completed sales.
///
/// Called after the in-memory sale has committed; a failure here is
/// reported but never undoes the sale.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn record_booking(&self, booking: &BookingRecord) -> RepoResult<()>;

    async fn list_bookings(&self, trip_id: Uuid) -> RepoResult<Vec<BookingRecord>>;
}
