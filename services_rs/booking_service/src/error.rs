use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
    pub code: Option<&'static str>,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, detail)
    }

    pub fn unprocessable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = axum::Json(ErrorBody {
            detail: self.detail.as_str(),
            code: self.code,
        });
        (self.status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Failures of the booking, order and archival flows. Catalog reads map
/// straight to `ApiError`; anything that mutates seat or order state goes
/// through this taxonomy so callers can tell a conflict from a stale
/// reference from a timeout.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("seats no longer available: {0:?}")]
    SeatConflict(Vec<i32>),
    #[error("journey not found")]
    JourneyNotFound,
    #[error("invalid seat selection: {0}")]
    InvalidSelection(String),
    #[error("price_per_seat is not configured for this journey")]
    Pricing,
    #[error("payment signature rejected")]
    PaymentVerificationFailed,
    #[error("operation timed out")]
    Timeout,
    #[error("database error")]
    Db(#[from] sqlx::Error),
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::SeatConflict(seats) => {
                let list = seats
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                ApiError::conflict(format!("seats no longer available: [{list}]"))
                    .with_code("seat_conflict")
            }
            BookingError::JourneyNotFound => {
                ApiError::not_found("journey not found").with_code("journey_not_found")
            }
            BookingError::InvalidSelection(reason) => {
                ApiError::bad_request(format!("invalid seat selection: {reason}"))
                    .with_code("invalid_selection")
            }
            BookingError::Pricing => {
                ApiError::unprocessable("price_per_seat is not configured for this journey")
                    .with_code("pricing_error")
            }
            BookingError::PaymentVerificationFailed => {
                ApiError::bad_request("payment signature rejected")
                    .with_code("payment_verification_failed")
            }
            BookingError::Timeout => {
                ApiError::new(StatusCode::GATEWAY_TIMEOUT, "operation timed out")
                    .with_code("timeout")
            }
            BookingError::Db(e) => {
                tracing::error!(error = %e, "database error");
                ApiError::internal("database error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_conflict_maps_to_409_naming_seats() {
        let api: ApiError = BookingError::SeatConflict(vec![1, 7]).into();
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_eq!(api.code, Some("seat_conflict"));
        assert!(api.detail.contains("[1,7]"));
    }

    #[test]
    fn taxonomy_status_codes() {
        let api: ApiError = BookingError::JourneyNotFound.into();
        assert_eq!(api.status, StatusCode::NOT_FOUND);

        let api: ApiError = BookingError::InvalidSelection("empty".to_string()).into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);

        let api: ApiError = BookingError::Pricing.into();
        assert_eq!(api.status, StatusCode::UNPROCESSABLE_ENTITY);

        let api: ApiError = BookingError::PaymentVerificationFailed.into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);

        let api: ApiError = BookingError::Timeout.into();
        assert_eq!(api.status, StatusCode::GATEWAY_TIMEOUT);
    }
}
