use config::{Config, ConfigError, Environment, File};
use secrecy::Secret;
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Top-level sandbox configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    /// Master switch for the whole sandbox feature.
    pub enabled: bool,
    /// Seconds until a sandbox session expires.
    pub ttl_seconds: u64,
    pub demo_credentials: DemoCredentials,
    /// Record ids captured into the initial snapshot.
    pub demo_record_ids: Vec<String>,
    /// Tables captured into the initial snapshot.
    pub snapshot_tables: Vec<String>,
    /// Tables the overlay never touches; reads and writes pass through.
    pub excluded_tables: Vec<String>,
    /// Table backing authentication; must be excluded.
    pub auth_table: String,
    pub cache: CacheConfig,
    pub activation: ActivationConfig,
    pub cleanup: CleanupConfig,
}

/// Demo user credentials honored inside a sandbox.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DemoCredentials {
    pub email: String,
    pub password: Secret<String>,
}

/// Read-through cache settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub prefix: String,
    pub ttl_seconds: u64,
}

/// Patterns that switch sandboxing on for a request.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ActivationConfig {
    /// Query-parameter equality checks, e.g. `sandbox=1`.
    pub parameters: HashMap<String, String>,
    /// Path prefixes, e.g. `/demo`.
    pub paths: Vec<String>,
}

/// Expired-session sweep settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

impl SandboxConfig {
    /// Load configuration from layered sources: `config/default`, then
    /// `config/local`, then environment variables.
    ///
    /// Maps `SANDBOXER__CACHE__TTL_SECONDS=60` to `cache.ttl_seconds`.
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("SANDBOXER").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Reject configurations the engine cannot run with. Fatal at startup,
    /// not recoverable per-request.
    pub fn validate(&self) -> Result<()> {
        if self.ttl_seconds == 0 {
            return Err(Error::configuration("session ttl_seconds must be positive"));
        }
        if self.snapshot_tables.is_empty() {
            return Err(Error::configuration("snapshot_tables must not be empty"));
        }
        if !self.excluded_tables.contains(&self.auth_table) {
            return Err(Error::configuration(format!(
                "auth table '{}' must be in excluded_tables",
                self.auth_table
            )));
        }
        if self.cache.enabled && self.cache.ttl_seconds == 0 {
            return Err(Error::configuration("cache.ttl_seconds must be positive"));
        }
        if self.cleanup.enabled && self.cleanup.interval_seconds == 0 {
            return Err(Error::configuration(
                "cleanup.interval_seconds must be positive",
            ));
        }
        Ok(())
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_seconds: 3600,
            demo_credentials: DemoCredentials::default(),
            demo_record_ids: vec!["1".into()],
            snapshot_tables: vec!["users".into()],
            excluded_tables: vec![
                "users".into(),
                "sessions".into(),
                "password_reset_tokens".into(),
                "migrations".into(),
            ],
            auth_table: "users".into(),
            cache: CacheConfig::default(),
            activation: ActivationConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl Default for DemoCredentials {
    fn default() -> Self {
        Self {
            email: "admin@admin.com".into(),
            password: Secret::new("admin".into()),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "sandbox".into(),
            ttl_seconds: 3600,
        }
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        let mut parameters = HashMap::new();
        parameters.insert("sandbox".into(), "1".into());
        parameters.insert("demo".into(), "true".into());
        Self {
            parameters,
            paths: vec!["/demo".into(), "/sandbox".into(), "/try".into()],
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        SandboxConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let cfg = SandboxConfig {
            ttl_seconds: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn auth_table_must_stay_excluded() {
        let cfg = SandboxConfig {
            excluded_tables: vec!["sessions".into()],
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn empty_snapshot_set_is_rejected() {
        let cfg = SandboxConfig {
            snapshot_tables: vec![],
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }
}
