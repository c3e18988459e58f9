use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coachline_core::ReservationError;
use serde_json::json;

/// Malformed input the router could not reject on its own.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Invalid {header} header: {reason}")]
    InvalidHeader { header: &'static str, reason: String },

    #[error("{0}")]
    InvalidBody(String),
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Anyhow(anyhow::Error),
}

impl AppError {
    fn parts(&self) -> (StatusCode, String, &'static str) {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), "NOT_FOUND"),
            AppError::Anyhow(err) => {
                if let Some(e) = err.downcast_ref::<ReservationError>() {
                    (reservation_status(e), e.to_string(), e.kind())
                } else if let Some(e) = err.downcast_ref::<RequestError>() {
                    (StatusCode::BAD_REQUEST, e.to_string(), "BAD_REQUEST")
                } else {
                    tracing::error!("Internal Server Error: {:#}", err);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal Server Error".to_string(),
                        "INTERNAL",
                    )
                }
            }
        }
    }
}

pub fn reservation_status(err: &ReservationError) -> StatusCode {
    match err {
        ReservationError::TripNotFound(_) | ReservationError::SeatNotFound { .. } => StatusCode::NOT_FOUND,
        ReservationError::SeatConflict { .. } | ReservationError::IdempotencyKeyReused { .. } => StatusCode::CONFLICT,
        ReservationError::SeatUnavailable { .. } | ReservationError::SeatAlreadySold { .. } => StatusCode::GONE,
        ReservationError::HoldNotOwned { .. } | ReservationError::BookingWindowClosed { .. } => StatusCode::FORBIDDEN,
        ReservationError::EmptyOrInvalidSeatSet
        | ReservationError::TooManySeats { .. }
        | ReservationError::InvalidPassenger(_)
        | ReservationError::InvalidTrip(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, code) = self.parts();

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Anyhow(err.into())
    }
}
