//! Role and permission checks for an authenticated user.
//!
//! Both checks use OR semantics and look only at ACTIVE roles on a user that
//! was resolved from the credential store on this request.

use tracing::debug;

use super::{error::AuthError, models::User};

/// Succeeds if the user holds at least one of `allowed_roles`.
///
/// # Errors
/// Returns [`AuthError::Forbidden`] naming the accepted roles.
pub fn require_role(user: &User, allowed_roles: &[&str]) -> Result<(), AuthError> {
    let granted = user
        .roles
        .iter()
        .filter(|role| role.is_active)
        .any(|role| allowed_roles.contains(&role.name.as_str()));

    if granted {
        Ok(())
    } else {
        debug!(user_id = %user.id, "Role check failed");
        Err(AuthError::Forbidden(format!(
            "Access denied. Required role(s): {}",
            allowed_roles.join(", ")
        )))
    }
}

/// Succeeds if any active role grants at least one of `required_permissions`.
///
/// # Errors
/// Returns [`AuthError::Forbidden`] naming the accepted permissions.
pub fn require_permission(user: &User, required_permissions: &[&str]) -> Result<(), AuthError> {
    let granted = user.permissions();
    if required_permissions
        .iter()
        .any(|permission| granted.contains(*permission))
    {
        Ok(())
    } else {
        debug!(user_id = %user.id, "Permission check failed");
        Err(AuthError::Forbidden(format!(
            "Access denied. Required permission(s): {}",
            required_permissions.join(", ")
        )))
    }
}
