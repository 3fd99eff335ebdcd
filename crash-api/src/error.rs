use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use crash_types::CoreError;
use serde_json::json;

/// Wraps the two shapes a handler can fail with: a `CoreError` from the
/// round engine/ledger/oracle, or a facade-level not-found (round/player
/// ids that never existed, which is not itself a `CoreError` taxonomy
/// bucket since it never reaches the core).
pub enum ApiError {
    Core(CoreError),
    NotFound(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Core(err)
    }
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Core(err) => {
                let status = match &err {
                    CoreError::Validation(_) => StatusCode::BAD_REQUEST,
                    CoreError::State(_) => StatusCode::CONFLICT,
                    CoreError::Funds(_) => StatusCode::PAYMENT_REQUIRED,
                    CoreError::Infrastructure(_) => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, err.code(), err.message())
            }
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
        };
        (status, Json(json!({ "code": code, "message": message }))).into_response()
    }
}
