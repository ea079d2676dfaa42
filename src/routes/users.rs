//! User administration and claims API endpoints
//!
//! Account creation and role changes follow the permission table: admins act
//! anywhere, university admins only inside their own university. The claims
//! endpoints let a user inspect their own mirror while admin-level roles can
//! inspect anyone's.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{
    can_change_role, has_permission, CallerIdentity, ClaimsService, ClaimsValidation,
    CleanupReport, CustomClaims, Role,
};
use crate::db::{ClaimsAuditRecord, NewUser, UserRecord, UserRepository};
use crate::error::{AppError, Result};
use crate::state::AppState;

const DEFAULT_AUDIT_LIMIT: i64 = 50;
const MAX_AUDIT_LIMIT: i64 = 100;
const MAX_CLEANUP_AGE_HOURS: i64 = 720;

/// Create the users router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_user))
        .route("/:user_id/role", put(change_role))
        .route("/:user_id/tokens", post(issue_token))
        .route("/:user_id/claims/refresh", post(refresh_claims))
        .route("/:user_id/claims/validate", get(validate_claims))
        .route("/:user_id/claims/audit", get(claims_audit))
}

/// Create the claims maintenance router
pub fn claims_router() -> Router<AppState> {
    Router::new().route("/cleanup", post(run_cleanup))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub id: Option<String>,
    pub email: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub role: Option<Role>,
    #[serde(rename = "universityId")]
    pub university_id: Option<String>,
    #[serde(rename = "departmentId")]
    pub department_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
    #[serde(rename = "universityId")]
    pub university_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChangeRoleResponse {
    pub success: bool,
    pub message: String,
    pub user: UserRecord,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub success: bool,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ClaimsRefreshResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub claims: CustomClaims,
}

#[derive(Debug, Serialize)]
pub struct ClaimsValidationResponse {
    pub success: bool,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub validation: ClaimsValidation,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AuditLogResponse {
    pub success: bool,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "auditLog")]
    pub audit_log: Vec<ClaimsAuditRecord>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    #[serde(rename = "maxAgeHours")]
    pub max_age_hours: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub message: String,
    pub results: CleanupReport,
}

/// Access rule shared by the claims inspection endpoints
fn require_self_or_admin(caller: &CallerIdentity, user_id: &str) -> Result<()> {
    if caller.user_id == user_id {
        return Ok(());
    }
    if caller.role.hierarchy_level() >= Role::UniversityAdmin.hierarchy_level() {
        return Ok(());
    }

    Err(AppError::PermissionDenied(
        "requires admin privileges or your own account".into(),
    ))
}

/// Create a user account and seed its claims mirror
async fn create_user(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserRecord>)> {
    let scope = request.university_id.as_deref();
    if !has_permission(
        caller.role,
        caller.university_id.as_deref(),
        "students",
        "create",
        scope,
    ) {
        return Err(AppError::PermissionDenied(
            "not allowed to create user accounts".into(),
        ));
    }

    let role = request.role.unwrap_or(Role::Student);
    if role != Role::Student
        && !can_change_role(caller.role, caller.university_id.as_deref(), role, scope)
    {
        return Err(AppError::PermissionDenied(format!(
            "not allowed to grant the {} role",
            role.as_str()
        )));
    }

    if request.email.trim().is_empty() || !request.email.contains('@') {
        return Err(AppError::InvalidArgument("a valid email is required".into()));
    }

    let id = match request.id {
        Some(id) if !id.trim().is_empty() => id,
        _ => Uuid::new_v4().to_string(),
    };

    let repo = UserRepository::new(state.db());
    repo.create(&NewUser {
        id: id.clone(),
        email: request.email,
        display_name: request.display_name,
        role,
        university_id: request.university_id,
        department_id: request.department_id,
    })
    .await?;

    ClaimsService::new(state.db())
        .refresh(&id, &caller.user_id)
        .await?;

    let user = repo
        .get(&id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("user vanished after create: {id}")))?;

    tracing::info!("User {} created with role {} by {}", id, role.as_str(), caller.user_id);

    Ok((StatusCode::CREATED, Json(user)))
}

/// Change a user's role, re-mirroring claims and appending an audit entry
async fn change_role(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(user_id): Path<String>,
    Json(request): Json<ChangeRoleRequest>,
) -> Result<Json<ChangeRoleResponse>> {
    let repo = UserRepository::new(state.db());
    let target = repo
        .get(&user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user not found: {user_id}")))?;

    // the scope the target will live in after the change
    let scope = request
        .university_id
        .as_deref()
        .or(target.university_id.as_deref());
    if !can_change_role(caller.role, caller.university_id.as_deref(), request.role, scope) {
        return Err(AppError::PermissionDenied(
            "not allowed to assign this role".into(),
        ));
    }

    repo.update_role(&user_id, request.role, request.university_id.as_deref())
        .await?;
    repo.audit_append(
        &user_id,
        "role_changed",
        &caller.user_id,
        Some(&serde_json::json!({
            "previousRole": target.role.as_str(),
            "newRole": request.role.as_str(),
        })),
    )
    .await?;

    // re-mirror so the next token check sees the new role
    ClaimsService::new(state.db())
        .refresh(&user_id, &caller.user_id)
        .await?;

    let user = repo
        .get(&user_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("user vanished after role change: {user_id}")))?;

    tracing::info!(
        "Role of user {} changed from {} to {} by {}",
        user_id,
        target.role.as_str(),
        request.role.as_str(),
        caller.user_id
    );

    Ok(Json(ChangeRoleResponse {
        success: true,
        message: "Role updated".to_string(),
        user,
    }))
}

/// Issue an access token for a user (admin only)
async fn issue_token(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(user_id): Path<String>,
) -> Result<Json<TokenResponse>> {
    if caller.role != Role::Admin {
        return Err(AppError::PermissionDenied(
            "only admins can issue tokens".into(),
        ));
    }

    let repo = UserRepository::new(state.db());
    let token = repo.issue_token(&user_id).await?;
    repo.audit_append(&user_id, "token_issued", &caller.user_id, None)
        .await?;

    Ok(Json(TokenResponse {
        success: true,
        user_id,
        token,
    }))
}

/// Rebuild a user's claims mirror
async fn refresh_claims(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(user_id): Path<String>,
) -> Result<Json<ClaimsRefreshResponse>> {
    require_self_or_admin(&caller, &user_id)?;

    let claims = ClaimsService::new(state.db())
        .refresh(&user_id, &caller.user_id)
        .await?;

    Ok(Json(ClaimsRefreshResponse {
        success: true,
        message: "Claims refreshed".to_string(),
        user_id,
        claims,
    }))
}

/// Report drift between a user's claims mirror and their account
async fn validate_claims(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(user_id): Path<String>,
) -> Result<Json<ClaimsValidationResponse>> {
    require_self_or_admin(&caller, &user_id)?;

    let validation = ClaimsService::new(state.db()).validate(&user_id).await?;

    Ok(Json(ClaimsValidationResponse {
        success: true,
        user_id,
        validation,
    }))
}

/// List a user's claims audit entries, newest first
async fn claims_audit(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(user_id): Path<String>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditLogResponse>> {
    require_self_or_admin(&caller, &user_id)?;

    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
    if !(1..=MAX_AUDIT_LIMIT).contains(&limit) {
        return Err(AppError::InvalidArgument(format!(
            "limit must be between 1 and {MAX_AUDIT_LIMIT}"
        )));
    }

    let audit_log = UserRepository::new(state.db())
        .audit_list(&user_id, limit)
        .await?;

    Ok(Json(AuditLogResponse {
        success: true,
        user_id,
        total: audit_log.len(),
        audit_log,
    }))
}

/// Run a claims sweep on demand (admin only)
async fn run_cleanup(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(request): Json<CleanupRequest>,
) -> Result<Json<CleanupResponse>> {
    if caller.role != Role::Admin {
        return Err(AppError::PermissionDenied(
            "only admins can run claims cleanup".into(),
        ));
    }

    let max_age_hours = request
        .max_age_hours
        .unwrap_or(state.config().claims.max_age_hours);
    if !(1..=MAX_CLEANUP_AGE_HOURS).contains(&max_age_hours) {
        return Err(AppError::InvalidArgument(format!(
            "maxAgeHours must be between 1 and {MAX_CLEANUP_AGE_HOURS}"
        )));
    }

    let results = ClaimsService::new(state.db())
        .cleanup(max_age_hours, &caller.user_id)
        .await?;

    Ok(Json(CleanupResponse {
        success: true,
        message: "Claims cleanup completed".to_string(),
        results,
    }))
}
