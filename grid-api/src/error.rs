use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// Thin wrapper so every handler can `?`-propagate into a JSON `{detail}`
/// body with an appropriate status code.
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
        }
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

impl From<grid_core::store::StoreError> for ApiError {
    fn from(e: grid_core::store::StoreError) -> Self {
        match e {
            grid_core::store::StoreError::NotFound(what) => ApiError::not_found(what),
            grid_core::store::StoreError::Conflict(why) => ApiError::conflict(why),
            grid_core::store::StoreError::Backend(why) => ApiError::internal(why),
        }
    }
}

impl From<grid_core::engine::EngineError> for ApiError {
    fn from(e: grid_core::engine::EngineError) -> Self {
        match e {
            grid_core::engine::EngineError::NoActiveMarket => ApiError::bad_request(e.to_string()),
            grid_core::engine::EngineError::AlreadyActive(_) => ApiError::conflict(e.to_string()),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<grid_core::config::ConfigError> for ApiError {
    fn from(e: grid_core::config::ConfigError) -> Self {
        ApiError::bad_request(e.to_string())
    }
}
