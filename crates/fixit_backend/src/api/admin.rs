use axum::{
    extract::{Path, State},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch},
    Extension, Router,
};
use serde::Serialize;

use super::{ApiJson, ApiQuery};
use crate::{
    auth::AuthUser,
    error::ApiResult,
    middleware::{require_admin, require_auth},
    models::{Issue, IssueStats, UserStats, UserView},
    response::ApiResponse,
    services::{issue::IssueFilters, user::UserFilters},
    validation::{RemarksForm, RoleForm, StatusForm},
    AppState,
};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/issues", get(list_issues))
        .route("/issues/:id/status", patch(update_status))
        .route("/issues/:id/assign", patch(assign_to_self))
        .route("/issues/:id/assign/:admin_id", patch(assign_to))
        .route("/issues/:id/remarks", patch(add_remarks))
        .route("/issues/:id/resolve", patch(resolve))
        .route("/users", get(list_users))
        .route("/users/:id/toggle-status", patch(toggle_status))
        .route("/users/:id/role", patch(update_role))
        .route("/users/:id", delete(delete_user))
        .route("/stats", get(dashboard))
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
}

pub async fn list_issues(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    ApiQuery(filters): ApiQuery<IssueFilters>,
) -> ApiResult<ApiResponse<Vec<Issue>>> {
    let page = state.services.issues.list(&principal, &filters).await?;
    Ok(ApiResponse::paginated(page, "Issues fetched successfully"))
}

pub async fn update_status(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(form): ApiJson<StatusForm>,
) -> ApiResult<ApiResponse<Issue>> {
    let (status, remarks) = form.into_change()?;
    let issue = state
        .services
        .issues
        .update_status(&principal, &id, status, remarks)
        .await?;
    Ok(ApiResponse::ok(issue, "Issue status updated successfully"))
}

pub async fn assign_to_self(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<Issue>> {
    let issue = state.services.issues.assign(&principal, &id, None).await?;
    Ok(ApiResponse::ok(issue, "Issue assigned successfully"))
}

pub async fn assign_to(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    Path((id, admin_id)): Path<(String, String)>,
) -> ApiResult<ApiResponse<Issue>> {
    let issue = state
        .services
        .issues
        .assign(&principal, &id, Some(&admin_id))
        .await?;
    Ok(ApiResponse::ok(issue, "Issue assigned successfully"))
}

pub async fn add_remarks(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(form): ApiJson<RemarksForm>,
) -> ApiResult<ApiResponse<Issue>> {
    let remarks = form.required()?;
    let issue = state
        .services
        .issues
        .add_remarks(&principal, &id, remarks)
        .await?;
    Ok(ApiResponse::ok(issue, "Remarks added successfully"))
}

/// Remarks are optional here, so an absent or empty body is fine
pub async fn resolve(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    Path(id): Path<String>,
    form: Option<ApiJson<RemarksForm>>,
) -> ApiResult<ApiResponse<Issue>> {
    let remarks = match form {
        Some(ApiJson(form)) => form.optional()?,
        None => None,
    };
    let issue = state
        .services
        .issues
        .resolve(&principal, &id, remarks)
        .await?;
    Ok(ApiResponse::ok(issue, "Issue marked as resolved"))
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    ApiQuery(filters): ApiQuery<UserFilters>,
) -> ApiResult<ApiResponse<Vec<UserView>>> {
    let page = state.services.users.list(&principal, &filters).await?;
    Ok(ApiResponse::paginated(
        page.map(|user| user.view()),
        "Users fetched successfully",
    ))
}

pub async fn toggle_status(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<UserView>> {
    let user = state.services.users.toggle_active(&principal, &id).await?;
    let message = if user.is_active {
        "User activated successfully"
    } else {
        "User deactivated successfully"
    };
    Ok(ApiResponse::ok(user.view(), message))
}

pub async fn update_role(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(form): ApiJson<RoleForm>,
) -> ApiResult<ApiResponse<UserView>> {
    let role = form.into_role()?;
    let user = state
        .services
        .users
        .update_role(&principal, &id, role)
        .await?;
    Ok(ApiResponse::ok(user.view(), "User role updated successfully"))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<()>> {
    state.services.users.delete(&principal, &id).await?;
    Ok(ApiResponse::message("User deleted successfully"))
}

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    issues: IssueStats,
    users: UserStats,
}

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
) -> ApiResult<ApiResponse<DashboardStats>> {
    let (issues, users) = tokio::try_join!(
        state.services.issues.stats(&principal),
        state.services.users.stats(&principal),
    )?;
    Ok(ApiResponse::ok(
        DashboardStats { issues, users },
        "Dashboard statistics fetched successfully",
    ))
}
