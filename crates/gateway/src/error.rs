//! HTTP rendering of `RelayError`

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_common::RelayError;
use relay_proto::MessageResponse;
use tracing::{debug, error};

/// Error returned by handlers; rendered as `{"message": ...}`
#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl ApiError {
    /// Text shown to the caller. Client errors carry their bare message.
    pub fn message(&self) -> String {
        match &self.0 {
            RelayError::Validation(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if self.0.is_client_error() {
            debug!("Rejected request: {}", self.0);
        } else {
            error!("Request failed: {}", self.0);
        }

        (status, Json(MessageResponse::new(self.message()))).into_response()
    }
}
