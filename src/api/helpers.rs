// API Helper Functions
//
// Error responses shared by the handlers and middleware.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, warn};

use super::types::ApiError;
use crate::error::AnalysisError;

/// Standard error result type for API handlers
pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

/// Helper to create a 400 Bad Request error response
pub fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (StatusCode::BAD_REQUEST, Json(ApiError::new(message)))
}

/// Helper to create a 403 Forbidden error response
pub fn forbidden(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (StatusCode::FORBIDDEN, Json(ApiError::new(message)))
}

/// Helper to create a 500 Internal Server Error response
pub fn internal_error(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError::new(message)))
}

/// 429 with `Retry-After` in seconds
pub fn too_many_requests(retry_after_secs: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ApiError::new("Too many requests. Please try again later.")),
    )
        .into_response();
    response
        .headers_mut()
        .insert("retry-after", HeaderValue::from(retry_after_secs.max(1)));
    response
}

/// Map an analysis failure to its HTTP response
pub fn analysis_error(e: AnalysisError) -> (StatusCode, Json<ApiError>) {
    match e {
        AnalysisError::Validation(message) => bad_request(message),
        AnalysisError::Cancelled => {
            warn!("Analysis cancelled before completion");
            internal_error("Analysis cancelled")
        }
        other => {
            error!(error = %other, kind = other.kind(), "Analysis failed");
            internal_error("Internal server error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_400() {
        let (status, Json(body)) = analysis_error(AnalysisError::Validation("No assets selected for analysis".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "No assets selected for analysis");
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let (status, Json(body)) = analysis_error(AnalysisError::AggregationInternal("slot 9".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.error.contains("slot"));
    }

    #[test]
    fn test_too_many_requests_sets_retry_after() {
        let response = too_many_requests(0);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "1");
    }
}
