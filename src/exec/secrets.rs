//! Secret provider contract
//!
//! The core only consumes `get`/`set`/`initialize`. The encrypted local
//! store lives outside this crate; the environment-variable fallback is
//! implemented here because the interpolator's synchronous path depends on
//! its naming convention.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{InterpolationError, InterpolationResult};

/// Secret storage contract consumed by the interpolator
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Prepare the provider (open stores, check permissions)
    async fn initialize(&self) -> InterpolationResult<()>;

    /// Look up a secret by key
    async fn get(&self, key: &str) -> Option<String>;

    /// Store a secret
    async fn set(&self, key: &str, value: &str) -> InterpolationResult<()>;
}

/// Environment variable a secret key falls back to: `SECRET_<KEY>` with the
/// key upper-cased and non-alphanumerics mapped to underscores
pub fn secret_env_key(key: &str) -> String {
    let mut name = String::with_capacity(key.len() + 7);
    name.push_str("SECRET_");
    for ch in key.chars() {
        if ch.is_ascii_alphanumeric() {
            name.push(ch.to_ascii_uppercase());
        } else {
            name.push('_');
        }
    }
    name
}

/// Read-only provider backed by an environment snapshot
pub struct EnvSecrets {
    env: HashMap<String, String>,
}

impl EnvSecrets {
    pub fn new(env: HashMap<String, String>) -> Self {
        EnvSecrets { env }
    }
}

#[async_trait]
impl SecretProvider for EnvSecrets {
    async fn initialize(&self) -> InterpolationResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.env.get(&secret_env_key(key)).cloned()
    }

    async fn set(&self, key: &str, _value: &str) -> InterpolationResult<()> {
        Err(InterpolationError::SecretUnavailable(format!(
            "environment provider is read-only, cannot store '{}'",
            key
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_env_key() {
        assert_eq!(secret_env_key("db-password"), "SECRET_DB_PASSWORD");
        assert_eq!(secret_env_key("api.token"), "SECRET_API_TOKEN");
        assert_eq!(secret_env_key("PLAIN"), "SECRET_PLAIN");
    }

    #[tokio::test]
    async fn test_env_secrets_get() {
        let mut env = HashMap::new();
        env.insert("SECRET_DB_PASSWORD".to_string(), "hunter2".to_string());
        let secrets = EnvSecrets::new(env);

        assert_eq!(secrets.get("db-password").await.as_deref(), Some("hunter2"));
        assert_eq!(secrets.get("missing").await, None);
    }

    #[tokio::test]
    async fn test_env_secrets_set_is_rejected() {
        let secrets = EnvSecrets::new(HashMap::new());
        assert!(secrets.set("key", "value").await.is_err());
    }
}
