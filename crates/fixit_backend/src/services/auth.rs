use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use uuid::Uuid;

use super::Deps;
use crate::{
    auth::{AuthTokens, AuthUser, Passwords, TokenKeys, TokenKind, TOKEN_INVALID},
    config::SeedAdminConfig,
    db::{StoreError, UserQuery, UserStore},
    error::{ApiError, ApiResult},
    models::{NewUser, Role, User},
    notify::Notifier,
};

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const USER_EXISTS: &str = "User with this email already exists";

/// Account plus a fresh token pair, returned by register and login
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub tokens: AuthTokens,
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    notifier: Arc<dyn Notifier>,
    passwords: Passwords,
    tokens: Arc<TokenKeys>,
}

impl AuthService {
    pub fn new(deps: &Deps) -> AuthService {
        AuthService {
            users: deps.users.clone(),
            notifier: deps.notifier.clone(),
            passwords: deps.passwords.clone(),
            tokens: deps.tokens.clone(),
        }
    }

    async fn create_account(&self, fields: NewUser, role: Role) -> ApiResult<User> {
        if self.users.find_by_email(&fields.email).await?.is_some() {
            return Err(ApiError::Conflict(USER_EXISTS.into()));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            name: fields.name,
            email: fields.email.to_lowercase(),
            password_hash: self.passwords.hash(fields.password).await?,
            role,
            student_id: fields.student_id,
            department: fields.department,
            phone: fields.phone,
            avatar: None,
            is_active: true,
            device_token: None,
            created_at: now,
            updated_at: now,
        };

        // concurrent registrations are caught by the unique email index
        match self.users.insert(&user).await {
            Ok(()) => Ok(user),
            Err(StoreError::DuplicateEmail) => Err(ApiError::Conflict(USER_EXISTS.into())),
            Err(err) => Err(err.into()),
        }
    }

    /// Self-service registration. Always creates a student account.
    pub async fn register(&self, fields: NewUser) -> ApiResult<Session> {
        let user = self.create_account(fields, Role::Student).await?;
        info!("New user registered: {} ({})", user.id, user.email);

        self.notifier.welcome(&user);
        let tokens = self.tokens.issue(&user)?;
        Ok(Session { user, tokens })
    }

    pub async fn login(&self, email: &str, password: String) -> ApiResult<Session> {
        let Some(user) = self.users.find_by_email(email).await? else {
            warn!("Login attempt for unknown email {email}");
            return Err(ApiError::Unauthenticated(INVALID_CREDENTIALS.into()));
        };
        if !self
            .passwords
            .verify(password, user.password_hash.clone())
            .await?
        {
            warn!("Login attempt with wrong password for {}", user.id);
            return Err(ApiError::Unauthenticated(INVALID_CREDENTIALS.into()));
        }
        if !user.is_active {
            warn!("Login attempt by disabled user {}", user.id);
            return Err(ApiError::AccountDisabled);
        }

        info!("User {} logged in", user.id);
        let tokens = self.tokens.issue(&user)?;
        Ok(Session { user, tokens })
    }

    /// Load the account a verified token names and make sure it may still act
    async fn active_user(&self, id: &str) -> ApiResult<User> {
        let user = self.users.get(id).await?.ok_or_else(|| {
            warn!("Token presented for missing user {id}");
            ApiError::Unauthenticated("User not found".into())
        })?;
        if !user.is_active {
            warn!("Token presented by disabled user {id}");
            return Err(ApiError::AccountDisabled);
        }
        Ok(user)
    }

    pub async fn refresh(&self, refresh_token: &str) -> ApiResult<AuthTokens> {
        let claims = self.tokens.verify(refresh_token, TokenKind::Refresh)?;
        let user = self.active_user(&claims.sub).await?;
        debug!("tokens refreshed for {}", user.id);
        self.tokens.issue(&user)
    }

    /// Resolve a bearer access token to the current state of its account
    pub async fn authenticate(&self, access_token: &str) -> ApiResult<AuthUser> {
        if access_token.is_empty() {
            return Err(ApiError::Unauthenticated(TOKEN_INVALID.into()));
        }
        let claims = self.tokens.verify(access_token, TokenKind::Access)?;
        let user = self.active_user(&claims.sub).await?;
        Ok(AuthUser { user })
    }

    pub async fn me(&self, principal: &AuthUser) -> ApiResult<User> {
        self.users
            .get(principal.id())
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".into()))
    }

    pub async fn change_password(
        &self,
        principal: &AuthUser,
        current: String,
        new: String,
    ) -> ApiResult<()> {
        let mut user = self.me(principal).await?;
        if !self
            .passwords
            .verify(current, user.password_hash.clone())
            .await?
        {
            warn!("Password change with wrong current password for {}", user.id);
            return Err(ApiError::bad_request("Current password is incorrect"));
        }

        user.password_hash = self.passwords.hash(new).await?;
        user.updated_at = Utc::now();
        self.users.update(&user).await?;
        info!("Password changed for {}", user.id);
        Ok(())
    }

    /// Forget the device token so the signed-out device stops receiving pushes
    pub async fn logout(&self, principal: &AuthUser) -> ApiResult<()> {
        let mut user = self.me(principal).await?;
        if user.device_token.take().is_some() {
            user.updated_at = Utc::now();
            self.users.update(&user).await?;
        }
        info!("User {} logged out", user.id);
        Ok(())
    }

    /// Create the default admin account unless an admin already exists.
    /// Returns whether an account was created.
    pub async fn seed_admin(&self, seed: &SeedAdminConfig) -> ApiResult<bool> {
        let admins = self
            .users
            .count(&UserQuery {
                role: Some(Role::Admin),
                ..Default::default()
            })
            .await?;
        if admins > 0 {
            info!("Admin account already present, not seeding");
            return Ok(false);
        }

        let fields = NewUser {
            name: seed.name.clone(),
            email: seed.email.to_lowercase(),
            password: seed.password.clone(),
            student_id: None,
            department: None,
            phone: None,
        };
        let admin = self.create_account(fields, Role::Admin).await?;
        info!("Seeded admin account {}", admin.email);
        warn!("Change the seeded admin password after the first login");
        Ok(true)
    }
}
