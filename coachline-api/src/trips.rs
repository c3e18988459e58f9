use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use coachline_catalog::{pricing, AvailabilityLevel, BusType, NewTrip, Seat, SeatStatus, Trip};
use coachline_engine::TripQuery;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, RequestError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTripRequest {
    pub from: String,
    pub to: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub bus_type: Option<String>,
    pub price_cents: i64,
    pub total_seats: Option<u32>,
    pub booking_window_hours: Option<u32>,
}

impl CreateTripRequest {
    fn into_new_trip(self) -> Result<NewTrip, RequestError> {
        let bus_type = match self.bus_type.as_deref() {
            Some(s) => s
                .parse::<BusType>()
                .map_err(|e| RequestError::InvalidBody(e.to_string()))?,
            None => BusType::default(),
        };
        Ok(NewTrip {
            from: self.from,
            to: self.to,
            date: self.date,
            time: self.time,
            bus_type,
            base_price_cents: self.price_cents,
            total_seats: self.total_seats,
            booking_window_hours: self
                .booking_window_hours
                .unwrap_or(coachline_catalog::trip::DEFAULT_BOOKING_WINDOW_HOURS),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct TripSummaryResponse {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub departure: DateTime<Utc>,
    pub booking_cutoff: DateTime<Utc>,
    pub bus_type: BusType,
    pub price_cents: i64,
    pub price: String,
    pub total_seats: usize,
    pub available_seats: usize,
    pub held_seats: usize,
    pub sold_seats: usize,
    pub availability: AvailabilityLevel,
    pub revenue_cents: i64,
}

impl From<&Trip> for TripSummaryResponse {
    fn from(trip: &Trip) -> Self {
        let summary = trip.summary();
        Self {
            id: trip.id,
            from: trip.from.clone(),
            to: trip.to.clone(),
            date: trip.date,
            time: trip.time,
            departure: trip.departure(),
            booking_cutoff: trip.booking_cutoff(),
            bus_type: trip.bus_type,
            price_cents: trip.base_price_cents,
            price: pricing::format_cents(trip.base_price_cents),
            total_seats: summary.total_seats,
            available_seats: summary.available_seats,
            held_seats: summary.held_seats,
            sold_seats: summary.sold_seats,
            availability: summary.availability,
            revenue_cents: summary.revenue_cents,
        }
    }
}

/// Public view of a seat: no hold token, no passenger details.
#[derive(Debug, Serialize)]
pub struct SeatView {
    pub id: Uuid,
    pub number: u32,
    pub status: SeatStatus,
    pub price_cents: i64,
    pub hold_expiry: Option<DateTime<Utc>>,
}

impl From<&Seat> for SeatView {
    fn from(seat: &Seat) -> Self {
        Self {
            id: seat.id,
            number: seat.number,
            status: seat.status(),
            price_cents: seat.price_cents,
            hold_expiry: seat.hold_expiry(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TripDetailResponse {
    #[serde(flatten)]
    pub summary: TripSummaryResponse,
    pub seats: Vec<SeatView>,
}

impl From<&Trip> for TripDetailResponse {
    fn from(trip: &Trip) -> Self {
        Self {
            summary: TripSummaryResponse::from(trip),
            seats: trip.seats.iter().map(SeatView::from).collect(),
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/trips", get(list_trips).post(create_trip))
        .route("/v1/trips/{trip_id}", get(get_trip))
}

async fn create_trip(
    State(state): State<AppState>,
    Json(req): Json<CreateTripRequest>,
) -> Result<(StatusCode, Json<TripDetailResponse>), AppError> {
    let new_trip = req.into_new_trip()?;
    let trip = state.engine.create_trip(new_trip).await?;
    state.metrics.set_available(trip.id, trip.available_seats());

    Ok((StatusCode::CREATED, Json(TripDetailResponse::from(&trip))))
}

async fn list_trips(
    State(state): State<AppState>,
    Query(query): Query<TripQuery>,
) -> Json<Vec<TripSummaryResponse>> {
    let trips = state.engine.list_trips(&query).await;
    Json(trips.iter().map(TripSummaryResponse::from).collect())
}

async fn get_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<TripDetailResponse>, AppError> {
    let trip = state.engine.trip(trip_id).await?;
    Ok(Json(TripDetailResponse::from(&trip)))
}
