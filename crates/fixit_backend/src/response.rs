use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::{
    error::FieldError,
    pagination::{Page, Pagination},
};

/// Uniform body of every response, success or failure
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

impl<T> ApiResponse<T> {
    fn new(status: StatusCode, message: impl Into<String>, data: Option<T>) -> ApiResponse<T> {
        ApiResponse {
            success: status.is_success(),
            status_code: status.as_u16(),
            message: message.into(),
            data,
            pagination: None,
            errors: None,
        }
    }

    pub fn ok(data: T, message: impl Into<String>) -> ApiResponse<T> {
        ApiResponse::new(StatusCode::OK, message, Some(data))
    }

    pub fn created(data: T, message: impl Into<String>) -> ApiResponse<T> {
        ApiResponse::new(StatusCode::CREATED, message, Some(data))
    }

    /// Success without a payload
    pub fn message(message: impl Into<String>) -> ApiResponse<T> {
        ApiResponse::new(StatusCode::OK, message, None)
    }

    pub fn failure(
        status: StatusCode,
        message: impl Into<String>,
        errors: Option<Vec<FieldError>>,
    ) -> ApiResponse<T> {
        ApiResponse {
            errors,
            ..ApiResponse::new(status, message, None)
        }
    }
}

impl<T> ApiResponse<Vec<T>> {
    pub fn paginated(page: Page<T>, message: impl Into<String>) -> ApiResponse<Vec<T>> {
        ApiResponse {
            pagination: Some(page.pagination),
            ..ApiResponse::new(StatusCode::OK, message, Some(page.items))
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}
