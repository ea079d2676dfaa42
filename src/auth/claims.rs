//! Claims mirror maintenance
//!
//! Token checks resolve against a mirrored copy of each account's role and
//! scope instead of the authoritative columns. The mirror is rebuilt by an
//! explicit refresh, checked for drift against the account, and swept in
//! batches once it goes stale.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::auth::roles::{permission_strings, Role};
use crate::db::UserRepository;
use crate::error::{AppError, Result};

/// A mirror older than this counts as outdated during validation
pub const CLAIMS_STALE_HOURS: i64 = 24;

/// Users examined per cleanup run
const CLEANUP_BATCH_SIZE: i64 = 100;

/// Role and scope as mirrored into token checks
#[derive(Debug, Clone, Serialize)]
pub struct CustomClaims {
    pub role: Role,
    #[serde(rename = "universityId", skip_serializing_if = "Option::is_none")]
    pub university_id: Option<String>,
    #[serde(rename = "departmentId", skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
    /// Permission table rows encoded as `resource:action,action`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
}

/// Drift report for one user's mirror
#[derive(Debug, Clone, Serialize)]
pub struct ClaimsValidation {
    pub consistent: bool,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Outcome of one cleanup run
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CleanupReport {
    pub processed: u32,
    pub updated: u32,
    pub errors: u32,
}

/// Rebuilds, validates and sweeps the per-user claims mirror
pub struct ClaimsService<'a> {
    users: UserRepository<'a>,
}

impl<'a> ClaimsService<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self {
            users: UserRepository::new(pool),
        }
    }

    /// Rebuild the mirror from the authoritative account columns
    pub async fn refresh(&self, user_id: &str, performed_by: &str) -> Result<CustomClaims> {
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user not found: {user_id}")))?;

        let claims = CustomClaims {
            role: user.role,
            university_id: user.university_id.clone(),
            department_id: user.department_id.clone(),
            permissions: Some(permission_strings(user.role)),
            last_updated: Utc::now(),
        };
        self.users.write_claims(user_id, &claims).await?;

        self.users
            .audit_append(
                user_id,
                "claims_refreshed",
                performed_by,
                Some(&serde_json::json!({ "role": user.role.as_str() })),
            )
            .await?;

        Ok(claims)
    }

    /// Compare the mirror against the account and report every divergence
    pub async fn validate(&self, user_id: &str) -> Result<ClaimsValidation> {
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user not found: {user_id}")))?;

        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        match &user.claims {
            None => {
                issues.push("no claims mirror has been seeded".to_string());
                recommendations.push("refresh the user's claims".to_string());
            }
            Some(mirror) => {
                if mirror.role != user.role {
                    issues.push(format!(
                        "role mismatch: mirror '{}' vs account '{}'",
                        mirror.role.as_str(),
                        user.role.as_str()
                    ));
                    recommendations
                        .push("refresh the claims to pick up the current role".to_string());
                }
                if mirror.university_id != user.university_id {
                    issues.push(
                        "university assignment differs between mirror and account".to_string(),
                    );
                    recommendations
                        .push("refresh the claims to pick up the current university".to_string());
                }
                if mirror.last_updated < Utc::now() - Duration::hours(CLAIMS_STALE_HOURS) {
                    issues.push(format!(
                        "claims mirror is older than {CLAIMS_STALE_HOURS} hours"
                    ));
                    recommendations.push("refresh the claims to renew the mirror".to_string());
                }
            }
        }

        Ok(ClaimsValidation {
            consistent: issues.is_empty(),
            issues,
            recommendations,
        })
    }

    /// Refresh every drifted mirror among users stale past `max_age_hours`
    ///
    /// Failures are counted, not propagated, so one broken account cannot
    /// stall the batch.
    pub async fn cleanup(&self, max_age_hours: i64, performed_by: &str) -> Result<CleanupReport> {
        let cutoff = Utc::now() - Duration::hours(max_age_hours);
        let candidates = self.users.stale_claims(cutoff, CLEANUP_BATCH_SIZE).await?;

        let mut report = CleanupReport {
            processed: 0,
            updated: 0,
            errors: 0,
        };

        for user in &candidates {
            report.processed += 1;
            match self.validate(&user.id).await {
                Ok(validation) if !validation.consistent => {
                    match self.refresh(&user.id, performed_by).await {
                        Ok(_) => report.updated += 1,
                        Err(e) => {
                            tracing::warn!("Claims refresh failed for user {}: {}", user.id, e);
                            report.errors += 1;
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Claims validation failed for user {}: {}", user.id, e);
                    report.errors += 1;
                }
            }
        }

        self.users
            .audit_append(
                "system",
                "claims_cleanup",
                performed_by,
                Some(&serde_json::json!({
                    "processed": report.processed,
                    "updated": report.updated,
                    "errors": report.errors,
                    "maxAgeHours": max_age_hours,
                })),
            )
            .await?;

        tracing::info!(
            "Claims cleanup completed: processed {}, updated {}, errors {}",
            report.processed,
            report.updated,
            report.errors
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_pool, NewUser};

    async fn seed_user(pool: &SqlitePool, id: &str, email: &str, role: Role) {
        UserRepository::new(pool)
            .create(&NewUser {
                id: id.to_string(),
                email: email.to_string(),
                display_name: None,
                role,
                university_id: Some("uni-1".to_string()),
                department_id: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_refresh_seeds_the_mirror() {
        let pool = test_pool().await;
        seed_user(&pool, "user-1", "a@example.com", Role::Student).await;
        let service = ClaimsService::new(&pool);

        let claims = service.refresh("user-1", "admin-1").await.unwrap();
        assert_eq!(claims.role, Role::Student);
        assert_eq!(claims.university_id.as_deref(), Some("uni-1"));
        assert!(claims
            .permissions
            .as_ref()
            .unwrap()
            .contains(&"courses:read,enroll".to_string()));

        let users = UserRepository::new(&pool);
        let mirrored = users.get("user-1").await.unwrap().unwrap().claims.unwrap();
        assert_eq!(mirrored.role, Role::Student);

        let audit = users.audit_list("user-1", 10).await.unwrap();
        assert_eq!(audit[0].action, "claims_refreshed");
        assert_eq!(audit[0].performed_by, "admin-1");
    }

    #[tokio::test]
    async fn test_refresh_unknown_user_is_not_found() {
        let pool = test_pool().await;
        let service = ClaimsService::new(&pool);

        let err = service.refresh("missing", "admin-1").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_validate_flags_missing_mirror() {
        let pool = test_pool().await;
        seed_user(&pool, "user-1", "a@example.com", Role::Student).await;
        let service = ClaimsService::new(&pool);

        let validation = service.validate("user-1").await.unwrap();
        assert!(!validation.consistent);
        assert!(validation.issues[0].contains("no claims mirror"));
        assert_eq!(validation.issues.len(), validation.recommendations.len());
    }

    #[tokio::test]
    async fn test_validate_flags_role_drift() {
        let pool = test_pool().await;
        seed_user(&pool, "user-1", "a@example.com", Role::Student).await;
        let service = ClaimsService::new(&pool);
        service.refresh("user-1", "admin-1").await.unwrap();

        UserRepository::new(&pool)
            .update_role("user-1", Role::Instructor, None)
            .await
            .unwrap();

        let validation = service.validate("user-1").await.unwrap();
        assert!(!validation.consistent);
        assert!(validation.issues.iter().any(|i| i.contains("role mismatch")));
    }

    #[tokio::test]
    async fn test_validate_flags_stale_mirror() {
        let pool = test_pool().await;
        seed_user(&pool, "user-1", "a@example.com", Role::Student).await;
        let service = ClaimsService::new(&pool);

        let old = CustomClaims {
            role: Role::Student,
            university_id: Some("uni-1".to_string()),
            department_id: None,
            permissions: Some(permission_strings(Role::Student)),
            last_updated: Utc::now() - Duration::hours(30),
        };
        UserRepository::new(&pool)
            .write_claims("user-1", &old)
            .await
            .unwrap();

        let validation = service.validate("user-1").await.unwrap();
        assert!(!validation.consistent);
        assert!(validation.issues.iter().any(|i| i.contains("older than")));
    }

    #[tokio::test]
    async fn test_validate_passes_fresh_mirror() {
        let pool = test_pool().await;
        seed_user(&pool, "user-1", "a@example.com", Role::Instructor).await;
        let service = ClaimsService::new(&pool);
        service.refresh("user-1", "admin-1").await.unwrap();

        let validation = service.validate("user-1").await.unwrap();
        assert!(validation.consistent);
        assert!(validation.issues.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_refreshes_only_drifted_users() {
        let pool = test_pool().await;
        seed_user(&pool, "never-seeded", "a@example.com", Role::Student).await;
        seed_user(&pool, "outdated", "b@example.com", Role::Student).await;
        seed_user(&pool, "fresh", "c@example.com", Role::Student).await;
        let service = ClaimsService::new(&pool);

        let users = UserRepository::new(&pool);
        let old = CustomClaims {
            role: Role::Student,
            university_id: Some("uni-1".to_string()),
            department_id: None,
            permissions: Some(permission_strings(Role::Student)),
            last_updated: Utc::now() - Duration::hours(200),
        };
        users.write_claims("outdated", &old).await.unwrap();
        service.refresh("fresh", "admin-1").await.unwrap();

        let report = service.cleanup(168, "admin-1").await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.updated, 2);
        assert_eq!(report.errors, 0);

        for id in ["never-seeded", "outdated"] {
            let validation = service.validate(id).await.unwrap();
            assert!(validation.consistent, "expected {id} to be refreshed");
        }

        let audit = users.audit_list("system", 10).await.unwrap();
        assert_eq!(audit[0].action, "claims_cleanup");
        assert_eq!(audit[0].details.as_ref().unwrap()["processed"], 2);
    }
}
