//! Caller authentication against an engine's identity service.

use crate::domain::{AuthError, ExternalTask};
use crate::ports::IdentityService;

/// Members of this group see tasks of every tenant.
pub const ADMIN_GROUP: &str = "camunda-admin";

/// User id and password taken from the request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authenticated caller with its memberships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    pub user_id: String,
    pub group_ids: Vec<String>,
    pub tenant_ids: Vec<String>,
}

impl Authentication {
    pub fn is_admin(&self) -> bool {
        self.group_ids.iter().any(|g| g == ADMIN_GROUP)
    }

    /// Tenant check: tasks without tenant are visible to everybody.
    pub fn can_access(&self, task: &ExternalTask) -> bool {
        match task.tenant_id() {
            None => true,
            Some(tenant) => self.is_admin() || self.tenant_ids.iter().any(|t| t == tenant),
        }
    }
}

/// Verifies the password and loads group and tenant memberships.
pub async fn authenticate(
    identity: &dyn IdentityService,
    credentials: &Credentials,
) -> Result<Authentication, AuthError> {
    if !identity
        .check_password(&credentials.user_id, &credentials.password)
        .await
    {
        return Err(AuthError::InvalidPassword(credentials.user_id.clone()));
    }

    Ok(Authentication {
        user_id: credentials.user_id.clone(),
        group_ids: identity.group_ids(&credentials.user_id).await,
        tenant_ids: identity.tenant_ids(&credentials.user_id).await,
    })
}
