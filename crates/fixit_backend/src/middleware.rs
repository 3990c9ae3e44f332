use axum::{
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    auth::{AuthUser, TOKEN_MISSING},
    error::ApiError,
    AppState,
};

/// Token of an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolve the bearer token to an [`AuthUser`] request extension, or reject
/// the request
pub async fn require_auth<B>(
    State(state): State<AppState>,
    mut request: Request<B>,
    next: Next<B>,
) -> Response {
    let Some(token) = bearer_token(request.headers()).map(str::to_string) else {
        return ApiError::Unauthenticated(TOKEN_MISSING.into()).into_response();
    };

    match state.services.auth.authenticate(&token).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        },
        Err(err) => err.into_response(),
    }
}

/// Must sit inside [`require_auth`]
pub async fn require_admin<B>(request: Request<B>, next: Next<B>) -> Response {
    match request.extensions().get::<AuthUser>() {
        Some(principal) if principal.is_admin() => next.run(request).await,
        Some(_) => ApiError::admin_only().into_response(),
        None => ApiError::Unauthenticated(TOKEN_MISSING.into()).into_response(),
    }
}
