use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{
    DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::{ApiError, ApiResult},
    models::User,
    repository::RepositoryState,
};

/// Claims
///
/// The payload signed into every bearer token.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Subject (sub): the id of the user the token was issued to.
    pub sub: Uuid,
    /// Issued At (iat).
    pub iat: usize,
    /// Token id. Two tokens issued to the same user in the same second still differ.
    pub jti: Uuid,
    /// Expiration Time (exp). Absent when the issuing flow has no TTL configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<usize>,
}

/// issue_token
///
/// Signs a fresh token for `user_id`. `ttl_secs` of `None` produces a token without
/// an `exp` claim.
pub fn issue_token(config: &AppConfig, user_id: Uuid, ttl_secs: Option<i64>) -> ApiResult<String> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        iat: now as usize,
        jti: Uuid::new_v4(),
        exp: ttl_secs.map(|ttl| (now + ttl) as usize),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("failed to sign token: {e}")))
}

/// decode_token
///
/// Verifies the signature and, when present, the expiry. Every failure collapses to
/// `Unauthenticated`.
pub fn decode_token(config: &AppConfig, token: &str) -> ApiResult<Claims> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    // `exp` is optional: login tokens may be issued without one.
    validation.required_spec_claims.clear();

    let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    match decode::<Claims>(token, &decoding_key, &validation) {
        Ok(data) => Ok(data.claims),
        Err(e) => {
            match e.kind() {
                ErrorKind::ExpiredSignature => tracing::debug!("rejected expired token"),
                other => tracing::debug!("rejected token: {:?}", other),
            }
            Err(ApiError::Unauthenticated)
        }
    }
}

/// Hashes a password with bcrypt on the blocking pool.
pub async fn hash_password(plain: String, cost: u32) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(plain, cost))
        .await
        .map_err(|e| ApiError::Internal(format!("hashing task failed: {e}")))?
        .map_err(|e| ApiError::Internal(format!("failed to hash password: {e}")))
}

/// Compares a password against a stored bcrypt hash. A malformed hash counts as a
/// mismatch.
pub async fn verify_password(plain: String, hash: String) -> ApiResult<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hash).unwrap_or(false))
        .await
        .map_err(|e| ApiError::Internal(format!("verification task failed: {e}")))
}

/// AuthUser
///
/// The resolved identity of an authenticated request: the full user record and the
/// exact token string that proved it. Logout removes `token` and nothing else.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

impl AuthUser {
    pub fn id(&self) -> Uuid {
        self.user.id
    }
}

/// AuthUser Extractor Implementation
///
/// Protected routes run this once in `auth_middleware`, which stores the result in
/// the request extensions; handlers then pick it up from there without touching the
/// store again.
///
/// Otherwise the checks are, in order:
/// 1. `Authorization: Bearer <token>` header present.
/// 2. Signature valid and not expired.
/// 3. `sub` references an existing user.
/// 4. The token is still in that user's active token set.
///
/// Any failure rejects with `ApiError::Unauthenticated` (401). The guard never
/// mutates the store.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(resolved) = parts.extensions.get::<AuthUser>() {
            return Ok(resolved.clone());
        }

        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ApiError::Unauthenticated)?;

        let claims = decode_token(&config, token)?;

        let user = repo
            .find_user(claims.sub)
            .await?
            .ok_or(ApiError::Unauthenticated)?;

        if !user.tokens.iter().any(|t| t == token) {
            tracing::debug!(user_id = %user.id, "token is not in the active set");
            return Err(ApiError::Unauthenticated);
        }

        Ok(AuthUser {
            user,
            token: token.to_string(),
        })
    }
}
