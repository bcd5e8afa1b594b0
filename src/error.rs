use aide::OperationOutput;
use axum::{http::StatusCode, response::IntoResponse, Json};
use schemars::JsonSchema;
use serde_json::json;

/// Represent errors in the application
///
/// All `ServiceError`s can be transformed to http errors.
#[derive(Debug, Clone, PartialEq, JsonSchema)]
pub enum ServiceError {
    /// Deposit or withdrawal with a non positive amount.
    InvalidAmount,
    /// Withdrawal larger than the current account balance.
    InsufficientFunds,
    BadRequest(String),
    Unauthorized(&'static str),
    Forbidden(&'static str),
    NotFound,
    InternalServerError(String),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for ServiceError {}

/// Helper for `ServiceError` result
pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ServiceError::NotFound,
            err => ServiceError::InternalServerError(err.to_string()),
        }
    }
}

impl OperationOutput for ServiceError {
    type Inner = String;
}
impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ServiceError::InvalidAmount => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Amount must be positive" })),
            ),
            ServiceError::InsufficientFunds => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Insufficient funds" })),
            ),
            ServiceError::BadRequest(ref cause) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": cause })))
            }
            ServiceError::Unauthorized(cause) => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": cause })))
            }
            ServiceError::Forbidden(cause) => {
                (StatusCode::FORBIDDEN, Json(json!({ "error": cause })))
            }
            ServiceError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": "Not found",
                })),
            ),
            ServiceError::InternalServerError(ref cause) => {
                // Internals go to the log, clients get a generic message.
                log::error!("internal server error: {cause}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Something went wrong!" })),
                )
            }
        }
        .into_response()
    }
}
