//! Role assignment seam
//!
//! Role and permission management lives in an external authorization
//! system. The entitlement core only needs to hand a freshly created user
//! to it, best-effort: a missing role is skipped, never an error that
//! fails user creation.

use agsuite_shared::UserId;

use crate::error::EntitlementResult;

/// Capability interface for the external authorization collaborator
pub trait RoleAssigner {
    /// Assign the named role to the user if such a role exists.
    /// Returns true when the role was found and applied, false when the
    /// role is absent (a no-op, not a failure).
    fn assign_role_if_exists(
        &self,
        user_id: UserId,
        role_name: &str,
    ) -> impl std::future::Future<Output = EntitlementResult<bool>> + Send;
}

/// Default assigner for deployments without an authorization system
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRoleAssigner;

impl RoleAssigner for NoopRoleAssigner {
    async fn assign_role_if_exists(
        &self,
        _user_id: UserId,
        _role_name: &str,
    ) -> EntitlementResult<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_assigner_skips() {
        let assigner = NoopRoleAssigner;
        let applied = assigner
            .assign_role_if_exists(UserId::new(), "Super Administrador")
            .await
            .unwrap();
        assert!(!applied);
    }
}
