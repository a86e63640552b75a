use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::security::token::TokenOptions;

/// Top-level service configuration, loaded from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    pub tokens: Vec<TokenOptions>,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub seed: SeedData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Lifetime of cached permission sets, seconds.
    #[serde(default = "default_permission_ttl")]
    pub permission_ttl_secs: u64,
    /// Lifetime of the cached permission epoch, seconds.
    #[serde(default = "default_epoch_ttl")]
    pub epoch_ttl_secs: u64,
    /// Lifetime of entries promoted from the shared tier into the local
    /// tier, seconds.
    #[serde(default = "default_promotion_ttl")]
    pub promotion_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            permission_ttl_secs: default_permission_ttl(),
            epoch_ttl_secs: default_epoch_ttl(),
            promotion_ttl_secs: default_promotion_ttl(),
        }
    }
}

/// Bootstrap users, roles, and menu permissions for the in-memory directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub roles: Vec<SeedRole>,
    /// Every permission token any menu route can require. This is the set a
    /// super-admin resolves to.
    #[serde(default)]
    pub menu_permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedUser {
    pub username: String,
    #[serde(default)]
    pub nickname: String,
    /// Plain-text password, hashed at startup.
    pub password: String,
    #[serde(default)]
    pub roles: Vec<u64>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedRole {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn default_port() -> u16 {
    8006
}

fn default_permission_ttl() -> u64 {
    600
}

fn default_epoch_ttl() -> u64 {
    600
}

fn default_promotion_ttl() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self
            .tokens
            .iter()
            .any(|t| t.name == crate::security::token::DEFAULT_TOKEN_CONFIG)
        {
            anyhow::bail!("config must define a token configuration named 'Default'");
        }
        for token in &self.tokens {
            if token.secret.len() < 16 {
                anyhow::bail!(
                    "token configuration '{}' has a secret shorter than 16 bytes",
                    token.name
                );
            }
        }
        Ok(())
    }
}
