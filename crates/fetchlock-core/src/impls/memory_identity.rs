//! In-memory identity service seeded from configuration.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ports::IdentityService;

/// A user as written in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserEntry {
    pub id: String,
    pub password: String,
    pub groups: Vec<String>,
    pub tenants: Vec<String>,
}

impl UserEntry {
    pub fn new(id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn in_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenants.push(tenant.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct InMemoryIdentityService {
    users: HashMap<String, UserEntry>,
}

impl InMemoryIdentityService {
    pub fn new(users: impl IntoIterator<Item = UserEntry>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.id.clone(), u)).collect(),
        }
    }
}

#[async_trait]
impl IdentityService for InMemoryIdentityService {
    async fn check_password(&self, user_id: &str, password: &str) -> bool {
        self.users
            .get(user_id)
            .is_some_and(|user| user.password == password)
    }

    async fn group_ids(&self, user_id: &str) -> Vec<String> {
        self.users
            .get(user_id)
            .map(|user| user.groups.clone())
            .unwrap_or_default()
    }

    async fn tenant_ids(&self, user_id: &str) -> Vec<String> {
        self.users
            .get(user_id)
            .map(|user| user.tenants.clone())
            .unwrap_or_default()
    }
}
