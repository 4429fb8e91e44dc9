//! External data consulted during resolution: users and their secrets
//!
//! Loaders are called concurrently from resolver workers and must be free of
//! side effects. Caching, if any, is up to the loader.

use dashmap::DashMap;
use keel_types::User;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Loads users by id
pub trait UserLoader: Send + Sync {
    fn load_user_by_id(&self, id: &str) -> Option<User>;
}

/// Loads secrets by user name
pub trait SecretLoader: Send + Sync {
    fn load_secrets_by_user_name(&self, name: &str) -> BTreeMap<String, String>;
}

/// Bundle of external loaders handed to the resolver
#[derive(Clone)]
pub struct ExternalData {
    pub users: Arc<dyn UserLoader>,
    pub secrets: Arc<dyn SecretLoader>,
}

impl ExternalData {
    pub fn new(users: Arc<dyn UserLoader>, secrets: Arc<dyn SecretLoader>) -> Self {
        Self { users, secrets }
    }
}

impl std::fmt::Debug for ExternalData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalData").finish_non_exhaustive()
    }
}

/// In-memory user loader
#[derive(Debug, Default)]
pub struct InMemoryUserLoader {
    users: DashMap<String, User>,
}

impl InMemoryUserLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }
}

impl UserLoader for InMemoryUserLoader {
    fn load_user_by_id(&self, id: &str) -> Option<User> {
        self.users.get(id).map(|u| u.clone())
    }
}

/// In-memory secret loader
#[derive(Debug, Default)]
pub struct InMemorySecretLoader {
    secrets: DashMap<String, BTreeMap<String, String>>,
}

impl InMemorySecretLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_secret(&self, user_name: &str, name: impl Into<String>, value: impl Into<String>) {
        self.secrets
            .entry(user_name.to_string())
            .or_default()
            .insert(name.into(), value.into());
    }
}

impl SecretLoader for InMemorySecretLoader {
    fn load_secrets_by_user_name(&self, name: &str) -> BTreeMap<String, String> {
        self.secrets
            .get(name)
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_loaders() {
        let users = InMemoryUserLoader::new();
        users.add_user(User::new("1", "alice").with_label("team", "platform"));
        assert_eq!(users.load_user_by_id("1").unwrap().name, "alice");
        assert!(users.load_user_by_id("2").is_none());

        let secrets = InMemorySecretLoader::new();
        secrets.add_secret("alice", "token", "s3cr3t");
        assert_eq!(secrets.load_secrets_by_user_name("alice")["token"], "s3cr3t");
        assert!(secrets.load_secrets_by_user_name("bob").is_empty());
    }
}
