pub mod admin;
pub mod auth;
pub mod issue;
pub mod upload;
pub mod user;

use async_trait::async_trait;
use axum::{
    body::HttpBody,
    extract::{FromRequest, FromRequestParts, Json, Query},
    http::{request::Parts, Request},
    routing::get,
    BoxError, Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::{error::ApiError, response::ApiResponse, AppState};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth::router(state))
        .nest("/issues", issue::router(state))
        .nest("/users", user::router(state))
        .nest("/admin", admin::router(state))
}

async fn health() -> ApiResponse<serde_json::Value> {
    ApiResponse::ok(
        json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }),
        "Server is running",
    )
}

/// [`Json`] whose rejections use the error envelope
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S, B> FromRequest<S, B> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    B: HttpBody + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Rejection = ApiError;

    async fn from_request(request: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(request, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
        }
    }
}

/// [`Query`] whose rejections use the error envelope
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
        }
    }
}
