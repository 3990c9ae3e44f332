//! Business rules. Handlers only parse requests and render responses; every
//! permission check and state change happens here.

pub mod auth;
pub mod issue;
pub mod user;

use std::sync::Arc;

use crate::{
    auth::{AuthUser, Passwords, TokenKeys},
    config::PaginationConfig,
    db::{IssueStore, UserStore},
    error::{ApiError, ApiResult},
    images::ImageStore,
    notify::Notifier,
};

pub use self::{auth::AuthService, issue::IssueService, user::UserService};

/// Everything the services need from the outside world
#[derive(Clone)]
pub struct Deps {
    pub issues: Arc<dyn IssueStore>,
    pub users: Arc<dyn UserStore>,
    pub notifier: Arc<dyn Notifier>,
    pub images: Arc<dyn ImageStore>,
    pub passwords: Passwords,
    pub tokens: Arc<TokenKeys>,
    pub pagination: PaginationConfig,
}

#[derive(Clone)]
pub struct Services {
    pub issues: IssueService,
    pub users: UserService,
    pub auth: AuthService,
}

impl Services {
    pub fn new(deps: Deps) -> Services {
        Services {
            issues: IssueService::new(&deps),
            users: UserService::new(&deps),
            auth: AuthService::new(&deps),
        }
    }
}

pub(crate) fn require_admin(principal: &AuthUser) -> ApiResult<()> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(ApiError::admin_only())
    }
}
