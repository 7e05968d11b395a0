//! YAML configuration parsing.
//!
//! Parses the service configuration (`overseer.yaml`) and standalone plan
//! files. Every configuration field has a default, so an empty document is a
//! valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use super::error::ConfigError;
use crate::core::retry::RetryPolicy;
use crate::execution::PoolConfig;
use crate::planning::PlannerResponse;
use crate::ratelimit::{RateLimitRule, RateLimitTier, TierRules};

/// Service configuration (overseer.yaml).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverseerConfig {
    /// Execution pool settings.
    pub pool: PoolConfig,
    /// Mission retry policy.
    pub retry: RetryPolicy,
    /// Task store settings.
    pub store: StoreConfig,
    /// Pattern store settings.
    pub learning: LearningConfig,
    /// Request admission settings.
    pub rate_limit: RateLimitConfig,
    /// HTTP listener.
    pub api: ApiConfig,
    /// Plan templates, one per mission type.
    pub templates: Vec<PlannerResponse>,
}

/// Task store settings. Without a path the store lives in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

/// Pattern store settings. Without a path learning records stay in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub tiers: TierRules,
    /// Tier per client id. Clients not listed get `standard`.
    pub clients: BTreeMap<String, RateLimitTier>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tiers: TierRules::default(),
            clients: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl ApiConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8565,
        }
    }
}

/// YAML configuration loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the service configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<OverseerConfig, ConfigError> {
        let path = path.as_ref();
        let content = read(path)?;
        let config: OverseerConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Parse the service configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<OverseerConfig, ConfigError> {
        let config: OverseerConfig = serde_yaml::from_str(yaml)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load a plan file. Structural validation happens when the plan is built.
    pub fn load_plan(path: impl AsRef<Path>) -> Result<PlannerResponse, ConfigError> {
        let path = path.as_ref();
        let content = read(path)?;
        let plan: PlannerResponse =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        validate_template(&plan)?;
        Ok(plan)
    }

    /// Parse a plan from a YAML string.
    pub fn parse_plan(yaml: &str) -> Result<PlannerResponse, ConfigError> {
        let plan: PlannerResponse = serde_yaml::from_str(yaml)?;
        validate_template(&plan)?;
        Ok(plan)
    }

    fn validate(config: &OverseerConfig) -> Result<(), ConfigError> {
        if config.pool.max_concurrency == 0 {
            return Err(ConfigError::InvalidConfig(
                "pool.max_concurrency cannot be zero".into(),
            ));
        }
        if config.pool.step_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "pool.step_timeout_ms cannot be zero".into(),
            ));
        }

        let threshold = config.retry.quality_threshold;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(ConfigError::InvalidConfig(format!(
                "retry.quality_threshold must be within 0..=100, got {}",
                threshold
            )));
        }

        let tiers = &config.rate_limit.tiers;
        for (name, rule) in [
            ("standard", tiers.standard),
            ("premium", tiers.premium),
            ("enterprise", tiers.enterprise),
        ] {
            validate_rule(name, rule)?;
        }

        let mut seen = HashSet::new();
        for template in &config.templates {
            validate_template(template)?;
            if !seen.insert(template.mission_type.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate template for mission type '{}'",
                    template.mission_type
                )));
            }
        }

        Ok(())
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
        path: path.to_path_buf(),
        source,
    })
}

fn validate_rule(tier: &str, rule: RateLimitRule) -> Result<(), ConfigError> {
    if rule.max_requests == 0 {
        return Err(ConfigError::InvalidConfig(format!(
            "rate_limit.{}.max_requests cannot be zero",
            tier
        )));
    }
    if rule.window_ms == 0 {
        return Err(ConfigError::InvalidConfig(format!(
            "rate_limit.{}.window_ms cannot be zero",
            tier
        )));
    }
    Ok(())
}

fn validate_template(template: &PlannerResponse) -> Result<(), ConfigError> {
    if template.mission_type.trim().is_empty() {
        return Err(ConfigError::MissingField("missionType".into()));
    }
    Ok(())
}
