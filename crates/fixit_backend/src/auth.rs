//! Session tokens and password hashing.

use std::time::{Duration, SystemTime};

use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::debug;
use scrypt::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Params, Scrypt,
};
use serde::{Deserialize, Serialize};

use crate::{
    config::AuthConfig,
    error::{ApiError, ApiResult},
    models::{Role, User},
};

pub const TOKEN_MISSING: &str = "Authentication token is missing";
pub const TOKEN_INVALID: &str = "Invalid or expired token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub kind: TokenKind,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// The authenticated caller of a request
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
}

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.user.id
    }

    pub fn is_admin(&self) -> bool {
        self.user.is_admin()
    }
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl KeyPair {
    fn new(secret: &str, ttl: Duration) -> KeyPair {
        KeyPair {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

/// Signs and verifies HS256 session tokens. Access and refresh tokens use
/// separate secrets, so one can never be replayed as the other.
pub struct TokenKeys {
    access: KeyPair,
    refresh: KeyPair,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl TokenKeys {
    pub fn new(config: &AuthConfig) -> TokenKeys {
        TokenKeys {
            access: KeyPair::new(&config.jwt_secret, config.jwt_expires_in),
            refresh: KeyPair::new(&config.refresh_secret, config.refresh_expires_in),
        }
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    fn sign(&self, user: &User, kind: TokenKind) -> ApiResult<String> {
        let keys = self.keys(kind);
        let now = now_secs();
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            kind,
            iat: now,
            exp: now.saturating_add(keys.ttl.as_secs()),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding).map_err(ApiError::internal)
    }

    pub fn issue(&self, user: &User) -> ApiResult<AuthTokens> {
        Ok(AuthTokens {
            access_token: self.sign(user, TokenKind::Access)?,
            refresh_token: self.sign(user, TokenKind::Refresh)?,
        })
    }

    /// Check signature, expiry and kind of `token`
    pub fn verify(&self, token: &str, kind: TokenKind) -> ApiResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.keys(kind).decoding, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => debug!("{kind:?} token expired"),
                other => debug!("{kind:?} token rejected: {other:?}"),
            }
            ApiError::Unauthenticated(TOKEN_INVALID.into())
        })?;

        if data.claims.kind != kind {
            debug!("expected {kind:?} token, got {:?}", data.claims.kind);
            return Err(ApiError::Unauthenticated(TOKEN_INVALID.into()));
        }
        Ok(data.claims)
    }
}

/// Salted scrypt hashing. Hashes embed their own parameters, so changing the
/// cost only affects new hashes.
#[derive(Clone)]
pub struct Passwords {
    params: Params,
}

impl Passwords {
    pub fn new(log_n: u8) -> anyhow::Result<Passwords> {
        let params = Params::new(log_n, 8, 1, 32)
            .map_err(|e| anyhow::anyhow!("invalid scrypt parameters: {e}"))?;
        Ok(Passwords { params })
    }

    pub async fn hash(&self, password: String) -> ApiResult<String> {
        let params = self.params;
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            Scrypt
                .hash_password_customized(password.as_bytes(), None, None, params, &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| anyhow::anyhow!("hashing password: {e}"))
        })
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::internal)
    }

    pub async fn verify(&self, password: String, hash: String) -> ApiResult<bool> {
        tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&hash)
                .map_err(|e| anyhow::anyhow!("stored password hash is malformed: {e}"))?;
            Ok::<_, anyhow::Error>(Scrypt.verify_password(password.as_bytes(), &parsed).is_ok())
        })
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::internal)
    }
}
