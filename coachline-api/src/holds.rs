use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use coachline_catalog::HoldToken;
use coachline_engine::{HoldReceipt, ReleaseOutcome};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, RequestError};
use crate::state::AppState;

pub const HOLD_TOKEN_HEADER: &str = "x-hold-token";

#[derive(Debug, Serialize)]
pub struct HoldResponse {
    pub trip_id: Uuid,
    pub seat_id: Uuid,
    pub seat_number: u32,
    pub hold_expiry: DateTime<Utc>,
    /// Send back as `X-Hold-Token` to release or buy this seat.
    pub hold_token: HoldToken,
}

impl From<HoldReceipt> for HoldResponse {
    fn from(receipt: HoldReceipt) -> Self {
        Self {
            trip_id: receipt.trip_id,
            seat_id: receipt.seat_id,
            seat_number: receipt.seat_number,
            hold_expiry: receipt.hold_expiry,
            hold_token: receipt.hold_token,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub seat_id: Uuid,
    pub outcome: ReleaseOutcome,
}

pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/v1/trips/{trip_id}/seats/{seat_id}/hold",
        post(hold_seat).delete(release_seat),
    )
}

/// Optional `X-Hold-Token`; present but malformed is an error.
pub(crate) fn hold_token(headers: &HeaderMap) -> Result<Option<HoldToken>, RequestError> {
    let Some(value) = headers.get(HOLD_TOKEN_HEADER) else {
        return Ok(None);
    };
    let invalid = |reason: String| RequestError::InvalidHeader {
        header: "X-Hold-Token",
        reason,
    };
    let text = value.to_str().map_err(|e| invalid(e.to_string()))?;
    text.parse::<HoldToken>().map(Some).map_err(|e| invalid(e.to_string()))
}

async fn hold_seat(
    State(state): State<AppState>,
    Path((trip_id, seat_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<HoldResponse>), AppError> {
    let token = hold_token(&headers)?;
    let receipt = state.engine.hold(trip_id, seat_id, token).await?;
    Ok((StatusCode::CREATED, Json(receipt.into())))
}

async fn release_seat(
    State(state): State<AppState>,
    Path((trip_id, seat_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<Json<ReleaseResponse>, AppError> {
    let token = hold_token(&headers)?;
    let outcome = state.engine.release(trip_id, seat_id, token).await?;
    Ok(Json(ReleaseResponse { seat_id, outcome }))
}
