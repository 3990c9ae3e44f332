use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::{error, warn};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{db::StoreError, models::TransitionError, response::ApiResponse};

pub type ApiResult<T> = Result<T, ApiError>;

/// Field level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> FieldError {
        FieldError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// One entry per failed rule, keyed by the camelCase wire name and sorted
    /// by field
    pub fn from_validation(errors: &ValidationErrors) -> Vec<FieldError> {
        let mut fields: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, failures)| {
                let field = camel_case(&field);
                failures.iter().map(move |failure| {
                    let message = match &failure.message {
                        Some(message) => message.to_string(),
                        None => format!("{field} is invalid ({})", failure.code),
                    };
                    FieldError::new(field.clone(), message)
                })
            })
            .collect();
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        fields
    }
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Everything a request can fail with. Services return these unchanged and the
/// HTTP layer turns them into the response envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest {
        message: String,
        errors: Vec<FieldError>,
    },
    #[error("{0}")]
    Unauthenticated(String),
    #[error("Your account has been disabled")]
    AccountDisabled,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    /// Operation not valid for the current lifecycle state
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    InvalidOperation(String),
    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> ApiError {
        ApiError::BadRequest {
            message: message.into(),
            errors: vec![],
        }
    }

    pub fn validation(errors: Vec<FieldError>) -> ApiError {
        ApiError::BadRequest {
            message: "Validation failed".into(),
            errors,
        }
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> ApiError {
        ApiError::Internal(err.into())
    }

    pub fn admin_only() -> ApiError {
        ApiError::Forbidden("Admin access required".into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::AccountDisabled => StatusCode::FORBIDDEN,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InvalidState(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(entity) => ApiError::NotFound(format!("{entity} not found")),
            StoreError::VersionConflict { .. } => ApiError::Conflict(
                "The issue was modified by another request, reload and try again".into(),
            ),
            StoreError::DuplicateEmail => {
                ApiError::Conflict("User with this email already exists".into())
            },
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::validation(FieldError::from_validation(&errors))
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        ApiError::InvalidState(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ApiError::Internal(source) => error!("request failed: {source:#}"),
            other => warn!("request rejected ({}): {other}", status.as_u16()),
        }

        let errors = match &self {
            ApiError::BadRequest { errors, .. } if !errors.is_empty() => Some(errors.clone()),
            _ => None,
        };
        ApiResponse::<()>::failure(status, self.to_string(), errors).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status_codes() {
        let cases = [
            (ApiError::bad_request("x"), 400),
            (ApiError::Unauthenticated("x".into()), 401),
            (ApiError::AccountDisabled, 403),
            (ApiError::Forbidden("x".into()), 403),
            (ApiError::NotFound("x".into()), 404),
            (ApiError::Conflict("x".into()), 409),
            (ApiError::InvalidState("x".into()), 400),
            (ApiError::InvalidOperation("x".into()), 400),
            (ApiError::internal(anyhow::anyhow!("boom")), 500),
        ];
        for (err, code) in cases {
            assert_eq!(err.status_code().as_u16(), code, "{err:?}");
        }
    }

    #[test]
    fn internal_detail_is_not_exposed() {
        let err = ApiError::internal(anyhow::anyhow!("connection refused to 10.0.0.3"));
        assert_eq!(err.to_string(), "Internal server error");
    }

    #[test]
    fn store_errors_convert() {
        assert!(matches!(
            ApiError::from(StoreError::NotFound("Issue")),
            ApiError::NotFound(msg) if msg == "Issue not found"
        ));
        assert!(matches!(
            ApiError::from(StoreError::DuplicateEmail),
            ApiError::Conflict(_)
        ));
        assert!(matches!(
            ApiError::from(StoreError::Timeout(std::time::Duration::from_secs(5))),
            ApiError::Internal(_)
        ));
    }

    #[test]
    fn transition_errors_are_invalid_state() {
        let err = ApiError::from(TransitionError::AlreadyResolved);
        assert!(matches!(err, ApiError::InvalidState(msg) if msg == "This issue has already been resolved"));
    }

    #[test]
    fn validation_errors_use_wire_names_and_messages() {
        let mut errors = ValidationErrors::new();
        errors.add(
            "student_id",
            validator::ValidationError::new("length").with_message("Student ID cannot exceed 20 characters".into()),
        );
        errors.add("email", validator::ValidationError::new("email"));

        let ApiError::BadRequest { message, errors } = ApiError::from(errors) else {
            panic!("expected a validation failure");
        };
        assert_eq!(message, "Validation failed");
        assert_eq!(
            errors,
            [
                FieldError::new("email", "email is invalid (email)"),
                FieldError::new("studentId", "Student ID cannot exceed 20 characters"),
            ]
        );
    }
}
