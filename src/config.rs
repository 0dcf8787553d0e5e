//! Layered TOML configuration.
//!
//! Priority: project (./caproute.toml) > user (~/.caproute/config.toml),
//! merged field-wise on top of built-in defaults.

use crate::audit::AuditConfig;
use crate::resolver::ResolverPolicy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for dispatch
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Directory scanned for SKILL.md definitions
    #[serde(default)]
    pub skills_dir: Option<PathBuf>,
    #[serde(default)]
    pub resolver: ResolverPolicy,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Config {
    /// Load configuration from default paths
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        // User-level config first, project-level overrides it
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".caproute").join("config.toml");
            if user_config.exists() {
                config.merge(Self::load_from(&user_config)?);
            }
        }

        let project_config = Path::new("caproute.toml");
        if project_config.exists() {
            config.merge(Self::load_from(project_config)?);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge another config into this one (other takes priority).
    /// Section values are taken wholesale from the overriding config,
    /// which keeps the rules easy to reason about.
    pub fn merge(&mut self, other: Config) {
        if other.skills_dir.is_some() {
            self.skills_dir = other.skills_dir;
        }
        self.resolver = other.resolver;
        self.dispatch = other.dispatch;
        self.audit = other.audit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.dispatch.timeout_ms, 30_000);
        assert_eq!(config.resolver.max_depth, 6);
        assert!((config.resolver.ambiguity_margin - 0.05).abs() < 1e-9);
        assert!(config.skills_dir.is_none());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
skills_dir = "skills"

[resolver]
max_depth = 4

[dispatch]
timeout_ms = 5000
"#,
        )
        .unwrap();
        assert_eq!(config.skills_dir.as_deref().unwrap().to_str(), Some("skills"));
        assert_eq!(config.resolver.max_depth, 4);
        // Unset fields keep serde defaults
        assert_eq!(config.resolver.max_alternatives, 3);
        assert_eq!(config.dispatch.timeout_ms, 5000);
        assert_eq!(config.audit.queue_capacity, 256);
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = Config::default();
        let other: Config = toml::from_str("skills_dir = \"project-skills\"").unwrap();
        base.merge(other);
        assert_eq!(
            base.skills_dir.as_deref().unwrap().to_str(),
            Some("project-skills")
        );
    }
}
