use axum::{extract::State, http::StatusCode};
use coachline_shared::ReservationEvent;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Reservation counters, fed from the engine's event stream.
pub struct Metrics {
    pub registry: Registry,
    holds: IntCounter,
    releases: IntCounter,
    expirations: IntCounter,
    seats_sold: IntCounter,
    bookings: IntCounter,
    failures: IntCounterVec,
    available: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("coachline".into()), None)?;

        let holds = IntCounter::new("seat_holds_total", "Seats placed on hold")?;
        let releases = IntCounter::new("seat_releases_total", "Holds released by the passenger")?;
        let expirations = IntCounter::new("hold_expirations_total", "Holds reverted after timing out")?;
        let seats_sold = IntCounter::new("seats_sold_total", "Seats sold")?;
        let bookings = IntCounter::new("bookings_total", "Completed bookings")?;
        let failures = IntCounterVec::new(
            Opts::new("operation_failures_total", "Rejected reservation operations"),
            &["operation", "reason"],
        )?;
        let available = IntGaugeVec::new(
            Opts::new("available_seats", "Seats currently available per trip"),
            &["trip_id"],
        )?;

        registry.register(Box::new(holds.clone()))?;
        registry.register(Box::new(releases.clone()))?;
        registry.register(Box::new(expirations.clone()))?;
        registry.register(Box::new(seats_sold.clone()))?;
        registry.register(Box::new(bookings.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(available.clone()))?;

        Ok(Self {
            registry,
            holds,
            releases,
            expirations,
            seats_sold,
            bookings,
            failures,
            available,
        })
    }

    pub fn set_available(&self, trip_id: Uuid, seats: usize) {
        let trip_id = trip_id.to_string();
        self.available
            .with_label_values(&[trip_id.as_str()])
            .set(i64::try_from(seats).unwrap_or(i64::MAX));
    }

    pub fn observe(&self, event: &ReservationEvent) {
        match event {
            ReservationEvent::SeatHeld(_) => self.holds.inc(),
            ReservationEvent::SeatReleased(_) => self.releases.inc(),
            ReservationEvent::HoldExpired(_) => self.expirations.inc(),
            ReservationEvent::SeatsSold(e) => {
                self.bookings.inc();
                self.seats_sold.inc_by(e.seat_numbers.len() as u64);
            }
            ReservationEvent::OperationFailed(e) => {
                self.failures
                    .with_label_values(&[e.operation.as_str(), e.reason.as_str()])
                    .inc();
            }
        }
        if let Some(seats) = event.available_seats() {
            self.set_available(event.trip_id(), seats);
        }
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Count every event until the channel closes.
pub fn spawn_listener(metrics: Arc<Metrics>, mut rx: broadcast::Receiver<ReservationEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => metrics.observe(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Metrics listener fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Metrics listener stopped");
    })
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> (StatusCode, String) {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics encode error: {e}")),
    }
}
