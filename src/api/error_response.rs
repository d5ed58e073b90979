//! The `{ "error": "<category>" }` body the control server returns for
//! every non-2xx response. Never echoes a wrapped error's `Display` text.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::DaemonError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, category = self.category(), "control request failed");
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody { error: self.category() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{DaemonError, NotFoundError};

    use super::*;

    #[test]
    fn not_found_serializes_to_expected_category() {
        let err = DaemonError::NotFound(NotFoundError::Run);
        let body = ErrorBody { error: err.category() };
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["error"], "not_found");
    }
}
