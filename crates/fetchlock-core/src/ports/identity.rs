//! IdentityService port: user credentials, groups and tenant memberships.

use async_trait::async_trait;

#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn check_password(&self, user_id: &str, password: &str) -> bool;

    async fn group_ids(&self, user_id: &str) -> Vec<String>;

    async fn tenant_ids(&self, user_id: &str) -> Vec<String>;
}
