use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use serde::Deserialize;

use super::{require_admin, Deps};
use crate::{
    auth::AuthUser,
    config::PaginationConfig,
    db::{UserQuery, UserStore},
    error::{ApiError, ApiResult, FieldError},
    images::{ImageStore, ImageUpload, AVATAR_FOLDER},
    models::{ProfileEdit, Role, User, UserStats},
    pagination::{Page, PageQuery, SortOrder, UserSort},
    validation::query_variant,
};

/// Query string of the user list endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFilters {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub role: Option<String>,
    pub is_active: Option<String>,
    pub search: Option<String>,
}

impl UserFilters {
    fn page_query(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            limit: self.limit,
            sort_by: self.sort_by.clone(),
            sort_order: self.sort_order,
        }
    }

    fn to_query(&self) -> ApiResult<UserQuery> {
        let is_active = match self.is_active.as_deref().map(str::trim) {
            None | Some("") => None,
            Some("true") => Some(true),
            Some("false") => Some(false),
            Some(_) => {
                return Err(ApiError::validation(vec![FieldError::new(
                    "isActive",
                    "isActive must be true or false",
                )]))
            },
        };

        Ok(UserQuery {
            role: query_variant::<Role>("role", "Role", self.role.clone())?,
            is_active,
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }
}

#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserStore>,
    images: Arc<dyn ImageStore>,
    pagination: PaginationConfig,
}

impl UserService {
    pub fn new(deps: &Deps) -> UserService {
        UserService {
            users: deps.users.clone(),
            images: deps.images.clone(),
            pagination: deps.pagination,
        }
    }

    async fn load(&self, id: &str) -> ApiResult<User> {
        self.users
            .get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".into()))
    }

    pub async fn get(&self, principal: &AuthUser, id: &str) -> ApiResult<User> {
        if !principal.is_admin() && principal.id() != id {
            return Err(ApiError::Forbidden(
                "You can only view your own profile".into(),
            ));
        }
        self.load(id).await
    }

    pub async fn list(&self, principal: &AuthUser, filters: &UserFilters) -> ApiResult<Page<User>> {
        require_admin(principal)?;
        let request = filters
            .page_query()
            .resolve::<UserSort>(&self.pagination, UserSort::NAMES)?;
        let query = filters.to_query()?;

        let (items, total) = self.users.list(&query, &request).await?;
        debug!("user page {} of {total} ({} items)", request.page, items.len());
        Ok(Page::new(items, total, &request))
    }

    pub async fn toggle_active(&self, principal: &AuthUser, id: &str) -> ApiResult<User> {
        require_admin(principal)?;
        let mut user = self.load(id).await?;
        user.is_active = !user.is_active;
        user.updated_at = Utc::now();
        self.users.update(&user).await?;

        info!(
            "User {id} {} by {}",
            if user.is_active { "enabled" } else { "disabled" },
            principal.id()
        );
        Ok(user)
    }

    pub async fn update_role(&self, principal: &AuthUser, id: &str, role: Role) -> ApiResult<User> {
        require_admin(principal)?;
        let mut user = self.load(id).await?;
        let previous = user.role;
        user.role = role;
        user.updated_at = Utc::now();
        self.users.update(&user).await?;

        info!("User {id} role {previous} -> {role} by {}", principal.id());
        Ok(user)
    }

    pub async fn delete(&self, principal: &AuthUser, id: &str) -> ApiResult<()> {
        require_admin(principal)?;
        if principal.id() == id {
            return Err(ApiError::InvalidOperation(
                "You cannot delete your own account".into(),
            ));
        }

        let user = self.load(id).await?;
        if !self.users.remove(id).await? {
            return Err(ApiError::NotFound("User not found".into()));
        }
        info!("User {id} ({}) deleted by {}", user.email, principal.id());
        Ok(())
    }

    pub async fn update_profile(
        &self,
        principal: &AuthUser,
        edit: ProfileEdit,
        avatar: Option<ImageUpload>,
    ) -> ApiResult<User> {
        let mut user = self.load(principal.id()).await?;

        if let Some(name) = edit.name {
            user.name = name;
        }
        if let Some(phone) = edit.phone {
            user.phone = Some(phone);
        }
        if let Some(department) = edit.department {
            user.department = Some(department);
        }
        if let Some(student_id) = edit.student_id {
            user.student_id = Some(student_id);
        }
        let uploaded = match avatar {
            Some(avatar) => Some(self.images.upload(avatar, AVATAR_FOLDER).await?),
            None => None,
        };
        if let Some(image) = &uploaded {
            user.avatar = Some(image.url.clone());
        }
        user.updated_at = Utc::now();

        if let Err(err) = self.users.update(&user).await {
            if let Some(image) = uploaded {
                self.images.schedule_delete(image.public_id);
            }
            return Err(err.into());
        }
        info!("Profile of {} updated", user.id);
        Ok(user)
    }

    pub async fn set_device_token(&self, principal: &AuthUser, token: Option<String>) -> ApiResult<()> {
        let Some(token) = token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) else {
            return Err(ApiError::validation(vec![FieldError::new(
                "fcmToken",
                "Device token is required",
            )]));
        };

        let mut user = self.load(principal.id()).await?;
        user.device_token = Some(token);
        user.updated_at = Utc::now();
        self.users.update(&user).await?;
        debug!("device token registered for {}", user.id);
        Ok(())
    }

    pub async fn stats(&self, principal: &AuthUser) -> ApiResult<UserStats> {
        require_admin(principal)?;

        let total = self.users.count(&UserQuery::default()).await?;
        let by_role = |role| UserQuery {
            role: Some(role),
            ..Default::default()
        };
        let (mut students, mut admins) = (0, 0);
        for &role in Role::ALL {
            let count = self.users.count(&by_role(role)).await?;
            match role {
                Role::Student => students = count,
                Role::Admin => admins = count,
            }
        }
        let active_users = self
            .users
            .count(&UserQuery {
                is_active: Some(true),
                ..Default::default()
            })
            .await?;

        Ok(UserStats {
            total,
            students,
            admins,
            active_users,
            inactive_users: total.saturating_sub(active_users),
        })
    }
}
