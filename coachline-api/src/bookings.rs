use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use coachline_catalog::pricing;
use coachline_core::{BookingReceipt, BookingRecord, PassengerDetails};
use coachline_engine::PurchaseRequest;
use coachline_shared::Masked;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, RequestError};
use crate::holds::hold_token;
use crate::state::AppState;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
pub struct PassengerBody {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub seat_ids: Vec<Uuid>,
    pub passenger: PassengerBody,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub booking_id: Uuid,
    pub trip_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub seat_numbers: Vec<u32>,
    pub total_cents: i64,
    pub total: String,
    pub booked_at: DateTime<Utc>,
}

impl From<BookingReceipt> for BookingResponse {
    fn from(receipt: BookingReceipt) -> Self {
        Self {
            booking_id: receipt.booking_id,
            trip_id: receipt.trip_id,
            total: pricing::format_cents(receipt.total_cents),
            seat_ids: receipt.seat_ids,
            seat_numbers: receipt.seat_numbers,
            total_cents: receipt.total_cents,
            booked_at: receipt.booked_at,
        }
    }
}

/// Booking as listed to the operator; contact details stay out.
#[derive(Debug, Serialize)]
pub struct BookingView {
    pub booking_id: Uuid,
    pub seat_numbers: Vec<u32>,
    pub passenger_name: String,
    pub total_cents: i64,
    pub booked_at: DateTime<Utc>,
}

impl From<BookingRecord> for BookingView {
    fn from(record: BookingRecord) -> Self {
        Self {
            booking_id: record.booking_id,
            seat_numbers: record.seat_numbers,
            passenger_name: record.passenger.name,
            total_cents: record.total_cents,
            booked_at: record.passenger.booked_at,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/trips/{trip_id}/bookings", post(create_booking).get(list_bookings))
}

fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, RequestError> {
    let Some(value) = headers.get(IDEMPOTENCY_HEADER) else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .map_err(|e| RequestError::InvalidHeader {
            header: "Idempotency-Key",
            reason: e.to_string(),
        })?
        .trim();
    if key.is_empty() {
        return Err(RequestError::InvalidHeader {
            header: "Idempotency-Key",
            reason: "must not be blank".into(),
        });
    }
    Ok(Some(key.to_string()))
}

async fn create_booking(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    let request = PurchaseRequest {
        trip_id,
        seat_ids: req.seat_ids,
        passenger: PassengerDetails {
            name: req.passenger.name,
            email: Masked::new(req.passenger.email),
            phone: Masked::new(req.passenger.phone),
        },
        hold_token: hold_token(&headers)?,
        idempotency_key: idempotency_key(&headers)?,
    };

    let receipt = state.engine.purchase(request).await?;
    info!(%trip_id, booking_id = %receipt.booking_id, "Booking confirmed");

    Ok((StatusCode::CREATED, Json(receipt.into())))
}

async fn list_bookings(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<Vec<BookingView>>, AppError> {
    // 404 for unknown trips rather than an empty list
    state.engine.trip(trip_id).await?;

    let records = state.engine.bookings(trip_id).await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(Json(records.into_iter().map(BookingView::from).collect()))
}
