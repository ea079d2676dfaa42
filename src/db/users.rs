//! User account, claims mirror and audit log queries

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::auth::{hash_token, CustomClaims, Role};
use crate::error::{AppError, Result};

/// A user account with its mirrored token claims
#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub role: Role,
    #[serde(rename = "universityId", skip_serializing_if = "Option::is_none")]
    pub university_id: Option<String>,
    #[serde(rename = "departmentId", skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
    /// Claims as last mirrored into issued tokens, if ever seeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<CustomClaims>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: Role,
    pub university_id: Option<String>,
    pub department_id: Option<String>,
}

/// One entry from the claims audit log
#[derive(Debug, Clone, Serialize)]
pub struct ClaimsAuditRecord {
    pub id: String,
    #[serde(rename = "targetUserId")]
    pub target_user_id: String,
    pub action: String,
    #[serde(rename = "performedBy")]
    pub performed_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(rename = "occurredAt")]
    pub occurred_at: DateTime<Utc>,
}

/// Repository for accounts, access tokens and the claims audit log
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, user: &NewUser) -> Result<UserRecord> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, email, display_name, role, university_id, department_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.role.as_str())
        .bind(&user.university_id)
        .bind(&user.department_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(self.pool)
        .await;

        if let Err(sqlx::Error::Database(db)) = &result {
            if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) {
                return Err(AppError::InvalidArgument(
                    "a user with this email already exists".to_string(),
                ));
            }
        }
        result?;

        Ok(UserRecord {
            id: user.id.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role: user.role,
            university_id: user.university_id.clone(),
            department_id: user.department_id.clone(),
            claims: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, display_name, role, university_id, department_id,
                   claims_role, claims_university_id, claims_department_id,
                   claims_permissions, claims_updated_at, created_at, updated_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(|r| r.into_record()).transpose()
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    /// Change a user's role, optionally moving them to another university
    pub async fn update_role(
        &self,
        user_id: &str,
        role: Role,
        university_id: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET role = ?, university_id = COALESCE(?, university_id), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(role.as_str())
        .bind(university_id)
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("user not found: {user_id}")));
        }
        Ok(())
    }

    /// Mirror claims into the account row so future token checks see them
    pub async fn write_claims(&self, user_id: &str, claims: &CustomClaims) -> Result<()> {
        let permissions = claims
            .permissions
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE users
            SET claims_role = ?, claims_university_id = ?, claims_department_id = ?,
                claims_permissions = ?, claims_updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(claims.role.as_str())
        .bind(&claims.university_id)
        .bind(&claims.department_id)
        .bind(permissions)
        .bind(claims.last_updated.to_rfc3339())
        .bind(user_id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("user not found: {user_id}")));
        }
        Ok(())
    }

    /// Users whose claims mirror is older than `cutoff` or was never seeded,
    /// oldest first
    pub async fn stale_claims(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<UserRecord>> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, display_name, role, university_id, department_id,
                   claims_role, claims_university_id, claims_department_id,
                   claims_permissions, claims_updated_at, created_at, updated_at
            FROM users
            WHERE claims_updated_at IS NULL OR claims_updated_at < ?
            ORDER BY claims_updated_at
            LIMIT ?
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(|row| row.into_record()).collect()
    }

    /// Mint an access token for a user, storing only its digest
    pub async fn issue_token(&self, user_id: &str) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        self.register_token(user_id, &token).await?;
        Ok(token)
    }

    /// Store the digest of a caller-chosen token, e.g. the bootstrap token
    pub async fn register_token(&self, user_id: &str, token: &str) -> Result<()> {
        if self.get(user_id).await?.is_none() {
            return Err(AppError::NotFound(format!("user not found: {user_id}")));
        }

        sqlx::query("INSERT INTO access_tokens (token_hash, user_id, issued_at) VALUES (?, ?, ?)")
            .bind(hash_token(token))
            .bind(user_id)
            .bind(Utc::now().to_rfc3339())
            .execute(self.pool)
            .await?;

        Ok(())
    }

    pub async fn audit_append(
        &self,
        target_user_id: &str,
        action: &str,
        performed_by: &str,
        details: Option<&serde_json::Value>,
    ) -> Result<()> {
        let details = details.map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO claims_audit_log (id, target_user_id, action, performed_by, details, occurred_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(target_user_id)
        .bind(action)
        .bind(performed_by)
        .bind(details)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Audit entries for a user, most recent first
    pub async fn audit_list(
        &self,
        target_user_id: &str,
        limit: i64,
    ) -> Result<Vec<ClaimsAuditRecord>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, target_user_id, action, performed_by, details, occurred_at
            FROM claims_audit_log
            WHERE target_user_id = ?
            ORDER BY occurred_at DESC
            LIMIT ?
            "#,
        )
        .bind(target_user_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(|row| row.into_record()).collect()
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    display_name: Option<String>,
    role: String,
    university_id: Option<String>,
    department_id: Option<String>,
    claims_role: Option<String>,
    claims_university_id: Option<String>,
    claims_department_id: Option<String>,
    claims_permissions: Option<String>,
    claims_updated_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl UserRow {
    fn into_record(self) -> Result<UserRecord> {
        let role = Role::parse(&self.role)
            .ok_or_else(|| AppError::Internal(format!("unknown role '{}'", self.role)))?;

        // A partial mirror counts as absent; validation reports it as missing
        let claims = match (&self.claims_role, &self.claims_updated_at) {
            (Some(claims_role), Some(updated)) => {
                let claims_role = Role::parse(claims_role).ok_or_else(|| {
                    AppError::Internal(format!("unknown role '{claims_role}'"))
                })?;
                let permissions = match &self.claims_permissions {
                    Some(raw) => Some(serde_json::from_str(raw)?),
                    None => None,
                };
                Some(CustomClaims {
                    role: claims_role,
                    university_id: self.claims_university_id.clone(),
                    department_id: self.claims_department_id.clone(),
                    permissions,
                    last_updated: DateTime::parse_from_rfc3339(updated)?.with_timezone(&Utc),
                })
            }
            _ => None,
        };

        Ok(UserRecord {
            id: self.id,
            email: self.email,
            display_name: self.display_name,
            role,
            university_id: self.university_id,
            department_id: self.department_id,
            claims,
            created_at: DateTime::parse_from_rfc3339(&self.created_at)?.with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&self.updated_at)?.with_timezone(&Utc),
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    target_user_id: String,
    action: String,
    performed_by: String,
    details: Option<String>,
    occurred_at: String,
}

impl AuditRow {
    fn into_record(self) -> Result<ClaimsAuditRecord> {
        let details = match self.details {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };

        Ok(ClaimsAuditRecord {
            id: self.id,
            target_user_id: self.target_user_id,
            action: self.action,
            performed_by: self.performed_by,
            details,
            occurred_at: DateTime::parse_from_rfc3339(&self.occurred_at)?.with_timezone(&Utc),
        })
    }
}
