use axum::{
    extract::State,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Extension, Router,
};
use serde::{Deserialize, Serialize};

use super::ApiJson;
use crate::{
    auth::{AuthTokens, AuthUser},
    error::{ApiError, ApiResult, FieldError},
    middleware::require_auth,
    models::UserView,
    response::ApiResponse,
    services::auth::Session,
    validation::{ChangePasswordForm, LoginForm, RegisterForm},
    AppState,
};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/change-password", put(change_password))
        .route("/logout", post(logout))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBody {
    user: UserView,
    #[serde(flatten)]
    tokens: AuthTokens,
}

impl From<Session> for SessionBody {
    fn from(session: Session) -> Self {
        SessionBody {
            user: session.user.view(),
            tokens: session.tokens,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserBody {
    user: UserView,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshForm {
    refresh_token: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(form): ApiJson<RegisterForm>,
) -> ApiResult<ApiResponse<SessionBody>> {
    let session = state.services.auth.register(form.into_new_user()?).await?;
    Ok(ApiResponse::created(session.into(), "User registered successfully"))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(form): ApiJson<LoginForm>,
) -> ApiResult<ApiResponse<SessionBody>> {
    let (email, password) = form.into_credentials()?;
    let session = state.services.auth.login(&email, password).await?;
    Ok(ApiResponse::ok(session.into(), "Login successful"))
}

pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(form): ApiJson<RefreshForm>,
) -> ApiResult<ApiResponse<AuthTokens>> {
    let token = form
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| {
            ApiError::validation(vec![FieldError::new(
                "refreshToken",
                "Refresh token is required",
            )])
        })?;
    let tokens = state.services.auth.refresh(token.trim()).await?;
    Ok(ApiResponse::ok(tokens, "Token refreshed successfully"))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
) -> ApiResult<ApiResponse<UserBody>> {
    let user = state.services.auth.me(&principal).await?;
    Ok(ApiResponse::ok(
        UserBody { user: user.view() },
        "User fetched successfully",
    ))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    ApiJson(form): ApiJson<ChangePasswordForm>,
) -> ApiResult<ApiResponse<()>> {
    let (current, new) = form.into_passwords()?;
    state
        .services
        .auth
        .change_password(&principal, current, new)
        .await?;
    Ok(ApiResponse::message("Password updated successfully"))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
) -> ApiResult<ApiResponse<()>> {
    state.services.auth.logout(&principal).await?;
    Ok(ApiResponse::message("Logout successful"))
}
