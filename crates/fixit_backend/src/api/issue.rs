use axum::{
    extract::{Multipart, Path, State},
    middleware::from_fn_with_state,
    routing::get,
    Extension, Router,
};

use super::{
    upload::{read_multipart, MultipartForm},
    ApiQuery,
};
use crate::{
    auth::AuthUser,
    error::ApiResult,
    middleware::require_auth,
    models::{Issue, IssueStats},
    response::ApiResponse,
    services::issue::IssueFilters,
    validation::IssueForm,
    AppState,
};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/my", get(mine))
        .route("/search", get(search))
        .route("/stats", get(stats))
        .route("/:id", get(fetch).put(update).delete(remove))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
}

/// Name of the multipart part holding the issue photo
const IMAGE_FIELD: &str = "image";

fn issue_form(form: &mut MultipartForm) -> IssueForm {
    IssueForm {
        title: form.take("title"),
        description: form.take("description"),
        category: form.take("category"),
        priority: form.take("priority"),
        location: form.take("location"),
    }
}

pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    multipart: Multipart,
) -> ApiResult<ApiResponse<Issue>> {
    let mut form = read_multipart(multipart, IMAGE_FIELD, &state.upload).await?;
    let fields = issue_form(&mut form);
    let issue = state
        .services
        .issues
        .create(&principal, fields, form.image)
        .await?;
    Ok(ApiResponse::created(issue, "Issue reported successfully"))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    ApiQuery(filters): ApiQuery<IssueFilters>,
) -> ApiResult<ApiResponse<Vec<Issue>>> {
    let page = state.services.issues.list(&principal, &filters).await?;
    Ok(ApiResponse::paginated(page, "Issues fetched successfully"))
}

pub async fn mine(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    ApiQuery(filters): ApiQuery<IssueFilters>,
) -> ApiResult<ApiResponse<Vec<Issue>>> {
    let page = state.services.issues.mine(&principal, &filters).await?;
    Ok(ApiResponse::paginated(page, "Issues fetched successfully"))
}

pub async fn search(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    ApiQuery(filters): ApiQuery<IssueFilters>,
) -> ApiResult<ApiResponse<Vec<Issue>>> {
    let page = state.services.issues.search(&principal, &filters).await?;
    Ok(ApiResponse::paginated(page, "Search results fetched successfully"))
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
) -> ApiResult<ApiResponse<IssueStats>> {
    let stats = state.services.issues.stats(&principal).await?;
    Ok(ApiResponse::ok(stats, "Statistics fetched successfully"))
}

pub async fn fetch(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<Issue>> {
    let issue = state.services.issues.get(&principal, &id).await?;
    Ok(ApiResponse::ok(issue, "Issue fetched successfully"))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> ApiResult<ApiResponse<Issue>> {
    let mut form = read_multipart(multipart, IMAGE_FIELD, &state.upload).await?;
    let fields = issue_form(&mut form);
    let issue = state
        .services
        .issues
        .update(&principal, &id, fields, form.image)
        .await?;
    Ok(ApiResponse::ok(issue, "Issue updated successfully"))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<()>> {
    state.services.issues.delete(&principal, &id).await?;
    Ok(ApiResponse::message("Issue deleted successfully"))
}
