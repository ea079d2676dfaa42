//! Authentication and authorization
//!
//! Bearer tokens resolve to a [`CallerIdentity`] through the verifier seam,
//! roles carry a static permission table, and each account keeps a claims
//! mirror that is refreshed, validated and swept by [`ClaimsService`].

pub mod claims;
pub mod identity;
pub mod roles;

pub use claims::{ClaimsService, ClaimsValidation, CleanupReport, CustomClaims};
pub use identity::{hash_token, CallerIdentity, IdentityVerifier, TokenVerifier};
pub use roles::{can_change_role, has_permission, permission_strings, permissions_for, Role};
