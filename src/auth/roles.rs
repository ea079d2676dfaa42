//! Role hierarchy and the static permission table

use serde::{Deserialize, Serialize};

/// Platform role, ordered from least to most privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Instructor,
    UniversityAdmin,
    Admin,
}

impl Role {
    /// Position in the hierarchy; a higher level implies broader authority
    pub fn hierarchy_level(&self) -> u8 {
        match self {
            Role::Student => 1,
            Role::Instructor => 2,
            Role::UniversityAdmin => 3,
            Role::Admin => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
            Role::UniversityAdmin => "university_admin",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Role::Student),
            "instructor" => Some(Role::Instructor),
            "university_admin" => Some(Role::UniversityAdmin),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Actions a role may perform on one resource
#[derive(Debug, Clone, Copy)]
pub struct Permission {
    pub resource: &'static str,
    pub actions: &'static [&'static str],
}

const STUDENT_PERMISSIONS: &[Permission] = &[
    Permission { resource: "courses", actions: &["read", "enroll"] },
    Permission { resource: "lessons", actions: &["read"] },
    Permission { resource: "quizzes", actions: &["read", "submit"] },
    Permission { resource: "profile", actions: &["read", "update"] },
    Permission { resource: "certificates", actions: &["read"] },
    Permission { resource: "progress", actions: &["read", "update"] },
    Permission { resource: "enrollments", actions: &["read", "create"] },
    Permission { resource: "reviews", actions: &["read", "create"] },
    Permission { resource: "wishlist", actions: &["read", "create", "delete"] },
];

const INSTRUCTOR_PERMISSIONS: &[Permission] = &[
    Permission { resource: "courses", actions: &["create", "read", "update", "delete"] },
    Permission { resource: "lessons", actions: &["create", "read", "update", "delete"] },
    Permission { resource: "quizzes", actions: &["create", "read", "update", "delete"] },
    Permission { resource: "modules", actions: &["create", "read", "update", "delete"] },
    Permission { resource: "objectives", actions: &["create", "read", "update", "delete"] },
    Permission { resource: "students", actions: &["read"] },
    Permission { resource: "analytics", actions: &["read"] },
    Permission { resource: "profile", actions: &["read", "update"] },
    Permission { resource: "enrollments", actions: &["read"] },
    Permission { resource: "progress", actions: &["read"] },
    Permission { resource: "certificates", actions: &["read", "create"] },
    Permission { resource: "reviews", actions: &["read"] },
];

const UNIVERSITY_ADMIN_PERMISSIONS: &[Permission] = &[
    Permission { resource: "university", actions: &["read", "update"] },
    Permission { resource: "departments", actions: &["create", "read", "update", "delete"] },
    Permission { resource: "instructors", actions: &["read", "create", "update"] },
    Permission { resource: "courses", actions: &["read", "approve", "update"] },
    Permission { resource: "students", actions: &["read", "create", "update"] },
    Permission { resource: "reports", actions: &["read", "create"] },
    Permission { resource: "analytics", actions: &["read"] },
    Permission { resource: "enrollments", actions: &["read", "create", "update"] },
    Permission { resource: "certificates", actions: &["read"] },
    Permission { resource: "categories", actions: &["read", "create", "update"] },
    Permission { resource: "profile", actions: &["read", "update"] },
];

const ADMIN_PERMISSIONS: &[Permission] = &[Permission { resource: "*", actions: &["*"] }];

/// The full permission table for a role
pub fn permissions_for(role: Role) -> &'static [Permission] {
    match role {
        Role::Student => STUDENT_PERMISSIONS,
        Role::Instructor => INSTRUCTOR_PERMISSIONS,
        Role::UniversityAdmin => UNIVERSITY_ADMIN_PERMISSIONS,
        Role::Admin => ADMIN_PERMISSIONS,
    }
}

/// Permission table encoded as `resource:action,action` strings, the shape
/// mirrored into token claims
pub fn permission_strings(role: Role) -> Vec<String> {
    permissions_for(role)
        .iter()
        .map(|p| format!("{}:{}", p.resource, p.actions.join(",")))
        .collect()
}

/// Check whether a role may perform `action` on `resource`
///
/// University admins are additionally scoped to their own institution: when
/// the checked resource belongs to a university, the caller's university must
/// match it. `*` in the table matches any resource or action.
pub fn has_permission(
    role: Role,
    caller_university: Option<&str>,
    resource: &str,
    action: &str,
    resource_university: Option<&str>,
) -> bool {
    if role == Role::UniversityAdmin {
        if let Some(scope) = resource_university {
            if caller_university != Some(scope) {
                return false;
            }
        }
    }

    permissions_for(role).iter().any(|p| {
        (p.resource == "*" || p.resource == resource)
            && (p.actions.contains(&"*") || p.actions.contains(&action))
    })
}

/// Check whether `actor` may assign `new_role` to a target user
///
/// Admins may assign any role. University admins may assign student or
/// instructor within their own university. Nobody else changes roles.
pub fn can_change_role(
    actor: Role,
    actor_university: Option<&str>,
    new_role: Role,
    target_university: Option<&str>,
) -> bool {
    match actor {
        Role::Admin => true,
        Role::UniversityAdmin => {
            matches!(new_role, Role::Student | Role::Instructor)
                && actor_university.is_some()
                && actor_university == target_university
        }
        _ => false,
    }
}
