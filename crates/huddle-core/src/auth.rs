use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use huddle_db::DbPool;
use huddle_models::user::UserIdentity;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("registration disabled")]
    RegistrationDisabled,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub exp: usize,
    pub iat: usize,
}

/// Login input: `login` is either a username or an email address.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    #[serde(alias = "username", alias = "email")]
    pub login: String,
    pub password: String,
}

/// Resolves credentials and session tokens to users.
#[async_trait]
pub trait AuthService: Send + Sync + 'static {
    async fn authenticate(&self, credentials: &Credentials) -> Result<UserIdentity, AuthError>;

    /// Returns the user id the token was issued for, or `None` when the token
    /// is malformed, forged or expired.
    async fn validate_session_token(&self, token: &str) -> Option<i64>;
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Internal(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash).map_err(|e| AuthError::Internal(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub fn create_token(user_id: i64, secret: &str, expiry_secs: u64) -> Result<String, AuthError> {
    let now = chrono::Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: user_id,
        iat: now,
        exp: now + expiry_secs as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Internal(e.to_string()))
}

pub fn validate_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AuthError::InvalidToken)
}

/// Password + JWT authentication backed by the users table.
#[derive(Clone)]
pub struct JwtAuthService {
    db: DbPool,
    secret: String,
    expiry_secs: u64,
}

impl JwtAuthService {
    pub fn new(db: DbPool, secret: impl Into<String>, expiry_secs: u64) -> Self {
        Self {
            db,
            secret: secret.into(),
            expiry_secs,
        }
    }

    pub fn issue_token(&self, user_id: i64) -> Result<String, AuthError> {
        create_token(user_id, &self.secret, self.expiry_secs)
    }
}

#[async_trait]
impl AuthService for JwtAuthService {
    async fn authenticate(&self, credentials: &Credentials) -> Result<UserIdentity, AuthError> {
        let user = huddle_db::users::get_user_by_login(&self.db, credentials.login.trim())
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(&credentials.password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(UserIdentity::new(user.id, user.username, user.display_name))
    }

    async fn validate_session_token(&self, token: &str) -> Option<i64> {
        validate_token(token, &self.secret).ok().map(|claims| claims.sub)
    }
}
