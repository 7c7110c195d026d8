//! Credential lookup for external services.
//!
//! Secrets are read once when the provider is constructed and then only
//! handed out by reference. Neither the provider nor [`Secret`] ever prints
//! a secret value.

use std::collections::HashMap;

use crate::domain::{DeployError, Result};

/// Every credential an adapter may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKey {
    DifyApiKey,
    LlmApiKey,
    GitUsername,
    GitToken,
    JenkinsUser,
    JenkinsToken,
    McpApiKey,
    SmtpPassword,
}

impl SecretKey {
    pub const ALL: [SecretKey; 8] = [
        SecretKey::DifyApiKey,
        SecretKey::LlmApiKey,
        SecretKey::GitUsername,
        SecretKey::GitToken,
        SecretKey::JenkinsUser,
        SecretKey::JenkinsToken,
        SecretKey::McpApiKey,
        SecretKey::SmtpPassword,
    ];

    /// Environment variable holding this credential.
    pub fn env_var(self) -> &'static str {
        match self {
            SecretKey::DifyApiKey => "AUTODEPLOY_DIFY_API_KEY",
            SecretKey::LlmApiKey => "AUTODEPLOY_LLM_API_KEY",
            SecretKey::GitUsername => "AUTODEPLOY_GIT_USERNAME",
            SecretKey::GitToken => "AUTODEPLOY_GIT_TOKEN",
            SecretKey::JenkinsUser => "AUTODEPLOY_JENKINS_USER",
            SecretKey::JenkinsToken => "AUTODEPLOY_JENKINS_TOKEN",
            SecretKey::McpApiKey => "AUTODEPLOY_MCP_API_KEY",
            SecretKey::SmtpPassword => "AUTODEPLOY_SMTP_PASSWORD",
        }
    }
}

/// A credential value. `Debug` and `Display` never reveal it.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

/// Source of credentials for adapters.
pub trait CredentialProvider: Send + Sync {
    fn get(&self, key: SecretKey) -> Option<Secret>;

    /// Like [`get`](Self::get) but a missing credential is an error.
    fn require(&self, key: SecretKey) -> Result<Secret> {
        self.get(key)
            .ok_or_else(|| DeployError::MissingCredential(key.env_var().to_string()))
    }
}

/// Credentials snapshotted from the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    values: HashMap<SecretKey, Secret>,
}

impl EnvCredentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary lookup; empty values count as absent.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let values = SecretKey::ALL
            .iter()
            .filter_map(|key| {
                lookup(key.env_var())
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (*key, Secret::new(v)))
            })
            .collect();
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl CredentialProvider for EnvCredentials {
    fn get(&self, key: SecretKey) -> Option<Secret> {
        self.values.get(&key).cloned()
    }
}

/// Fixed credentials, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    values: HashMap<SecretKey, Secret>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: SecretKey, value: impl Into<String>) -> Self {
        self.values.insert(key, Secret::new(value));
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn get(&self, key: SecretKey) -> Option<Secret> {
        self.values.get(&key).cloned()
    }
}
