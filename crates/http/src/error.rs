//! Maps [`ServiceError`] onto HTTP status codes (spec.md §6.2, §7), the way
//! the teacher centralizes its error-to-JSON mapping in one place rather
//! than scattering status codes across handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use imagefinder_core::{RootSetError, ServiceError};
use serde_json::json;

pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = status_for(&self.0);
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn status_for(err: &ServiceError) -> (StatusCode, String) {
    let status = match err {
        ServiceError::RootSet(RootSetError::Empty) => StatusCode::BAD_REQUEST,
        ServiceError::RootSet(RootSetError::Overlap { .. }) => StatusCode::BAD_REQUEST,
        ServiceError::NoIndex => StatusCode::CONFLICT,
        ServiceError::JobInProgress => StatusCode::LOCKED,
        ServiceError::BadConfirmation => StatusCode::BAD_REQUEST,
        ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ServiceError::JobNotRunning => StatusCode::CONFLICT,
        ServiceError::NotCancellable => StatusCode::CONFLICT,
        ServiceError::JobIdMismatch => StatusCode::CONFLICT,
        ServiceError::PathNotIndexed(_) => StatusCode::NOT_FOUND,
        ServiceError::PathNotUnderRoot(_) => StatusCode::FORBIDDEN,
        ServiceError::NoRoots => StatusCode::CONFLICT,
        ServiceError::MetaStore(_)
        | ServiceError::VectorStore(_)
        | ServiceError::Embedding(_)
        | ServiceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}
