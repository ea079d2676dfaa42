//! Bearer token verification and the caller identity extractor

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::auth::roles::Role;
use crate::error::{AppError, Result};
use crate::state::AppState;

/// The authenticated caller of a request
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub user_id: String,
    pub role: Role,
    pub university_id: Option<String>,
    pub department_id: Option<String>,
}

/// SHA-256 hex digest of a token; the raw token is never stored
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Resolves a bearer token to the caller it was issued to
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<CallerIdentity>;
}

/// Verifier backed by the access_tokens table
///
/// Mirrored claims take precedence over the profile row, so a caller's
/// effective role is whatever their last claims refresh saw.
pub struct TokenVerifier {
    pool: SqlitePool,
}

impl TokenVerifier {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityVerifier for TokenVerifier {
    async fn verify(&self, token: &str) -> Result<CallerIdentity> {
        let row = sqlx::query_as::<_, CallerRow>(
            r#"
            SELECT u.id AS user_id,
                   COALESCE(u.claims_role, u.role) AS role,
                   COALESCE(u.claims_university_id, u.university_id) AS university_id,
                   COALESCE(u.claims_department_id, u.department_id) AS department_id
            FROM access_tokens t
            JOIN users u ON u.id = t.user_id
            WHERE t.token_hash = ?
            "#,
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("invalid access token".to_string()))?;

        let role = Role::parse(&row.role)
            .ok_or_else(|| AppError::Internal(format!("unknown role '{}'", row.role)))?;

        Ok(CallerIdentity {
            user_id: row.user_id,
            role,
            university_id: row.university_id,
            department_id: row.department_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CallerRow {
    user_id: String,
    role: String,
    university_id: Option<String>,
    department_id: Option<String>,
}

#[async_trait]
impl FromRequestParts<AppState> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthenticated("missing Authorization header".to_string())
            })?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Unauthenticated("expected a bearer token".to_string())
        })?;
        if token.is_empty() {
            return Err(AppError::Unauthenticated("empty bearer token".to_string()));
        }

        state.identity().verify(token).await
    }
}
