use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use kiln_engine::ServiceError;
use kiln_store::StoreError;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::CONFLICT, message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Store(StoreError::InvalidInput(_)) => ApiError::bad_request(e.to_string()),
            ServiceError::Store(StoreError::NotFound(_)) => ApiError::not_found(e.to_string()),
            ServiceError::Store(StoreError::Duplicate(_))
            | ServiceError::Store(StoreError::NoRowsUpdated(_))
            | ServiceError::ResourceActive(_) => ApiError::conflict(e.to_string()),
            ServiceError::Store(StoreError::Transient(_)) => ApiError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: e.to_string(),
            },
            _ => ApiError::internal(e.to_string()),
        }
    }
}
