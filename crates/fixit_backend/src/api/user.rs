use axum::{
    extract::{Multipart, Path, State},
    middleware::from_fn_with_state,
    routing::{get, put},
    Extension, Router,
};
use serde::Deserialize;

use super::{upload::read_multipart, ApiJson};
use crate::{
    auth::AuthUser,
    error::ApiResult,
    middleware::require_auth,
    models::UserView,
    response::ApiResponse,
    validation::ProfileForm,
    AppState,
};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/profile", get(profile).put(update_profile))
        .route("/device-token", put(device_token))
        .route("/:id", get(fetch))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
}

const AVATAR_FIELD: &str = "avatar";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTokenForm {
    fcm_token: Option<String>,
}

pub async fn profile(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
) -> ApiResult<ApiResponse<UserView>> {
    let user = state.services.auth.me(&principal).await?;
    Ok(ApiResponse::ok(user.view(), "User fetched successfully"))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    multipart: Multipart,
) -> ApiResult<ApiResponse<UserView>> {
    let mut form = read_multipart(multipart, AVATAR_FIELD, &state.upload).await?;
    let edit = ProfileForm {
        name: form.take("name"),
        phone: form.take("phone"),
        department: form.take("department"),
        student_id: form.take("studentId"),
    }
    .into_edit()?;

    let user = state
        .services
        .users
        .update_profile(&principal, edit, form.image)
        .await?;
    Ok(ApiResponse::ok(user.view(), "Profile updated successfully"))
}

pub async fn device_token(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    ApiJson(form): ApiJson<DeviceTokenForm>,
) -> ApiResult<ApiResponse<()>> {
    state
        .services
        .users
        .set_device_token(&principal, form.fcm_token)
        .await?;
    Ok(ApiResponse::message("Device token updated successfully"))
}

pub async fn fetch(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<UserView>> {
    let user = state.services.users.get(&principal, &id).await?;
    Ok(ApiResponse::ok(user.view(), "User fetched successfully"))
}
