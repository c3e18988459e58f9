use async_trait::async_trait;
use coachline_catalog::Trip;
use coachline_core::{BookingRecord, BookingRepository, RepoResult, TripRepository};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local trip store, used when no database is configured.
#[derive(Default)]
pub struct InMemoryTripRepository {
    trips: RwLock<HashMap<Uuid, Trip>>,
}

impl InMemoryTripRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TripRepository for InMemoryTripRepository {
    async fn create_trip(&self, trip: &Trip) -> RepoResult<()> {
        let mut trips = self.trips.write().await;
        if trips.contains_key(&trip.id) {
            return Err(format!("trip {} already exists", trip.id).into());
        }
        trips.insert(trip.id, trip.clone());
        Ok(())
    }

    async fn list_trips(&self) -> RepoResult<Vec<Trip>> {
        let trips = self.trips.read().await;
        let mut all: Vec<Trip> = trips.values().cloned().collect();
        all.sort_by_key(|t| t.created_at);
        Ok(all)
    }
}

#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: RwLock<Vec<BookingRecord>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn record_booking(&self, booking: &BookingRecord) -> RepoResult<()> {
        let mut bookings = self.bookings.write().await;
        if bookings.iter().any(|b| b.booking_id == booking.booking_id) {
            return Err(format!("booking {} already recorded", booking.booking_id).into());
        }
        bookings.push(booking.clone());
        Ok(())
    }

    async fn list_bookings(&self, trip_id: Uuid) -> RepoResult<Vec<BookingRecord>> {
        let bookings = self.bookings.read().await;
        Ok(bookings.iter().filter(|b| b.trip_id == trip_id).cloned().collect())
    }
}
