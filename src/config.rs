use serde::{Deserialize, Serialize};

use crate::types::AccessType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub migration: MigrationConfig,
    pub evaluation: EvaluationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// First id handed out for a group/user name the directory does not know
    pub placeholder_id_base: u64,
    /// Abort the batch on the first per-rule failure
    pub fail_fast: bool,
    /// Drop duplicate literals/terms and contradictory terms during DNF conversion
    pub simplify_dnf: bool,
    /// Upper bound on DNF terms per rule string
    pub max_dnf_terms: usize,
    /// Subnet used when an iplist name is unknown
    pub loopback_fallback: String,
    /// Access types migrated from each node
    pub access_types: Vec<AccessType>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            placeholder_id_base: 9_999_999,
            fail_fast: false,
            simplify_dnf: true,
            max_dnf_terms: 4096,
            loopback_fallback: "127.0.0.1/32".to_string(),
            access_types: AccessType::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Number of principals whose group sets are cached by the evaluator
    pub principal_cache_size: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            principal_cache_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive passed to tracing-subscriber, e.g. "info" or "treeacl=debug"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::error::AclError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.migration.validate()?;

        if self.logging.level.trim().is_empty() {
            return Err(crate::error::AclError::InvalidConfig(
                "logging.level cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl MigrationConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_dnf_terms == 0 {
            return Err(crate::error::AclError::InvalidConfig(
                "migration.max_dnf_terms must be greater than 0".to_string(),
            ));
        }

        if self.loopback_fallback.parse::<ipnetwork::Ipv4Network>().is_err() {
            return Err(crate::error::AclError::InvalidConfig(format!(
                "migration.loopback_fallback is not an IPv4 network: {}",
                self.loopback_fallback
            )));
        }

        if self.access_types.is_empty() {
            return Err(crate::error::AclError::InvalidConfig(
                "migration.access_types must name at least one access type".to_string(),
            ));
        }

        Ok(())
    }

    pub fn loopback_network(&self) -> crate::Result<ipnetwork::Ipv4Network> {
        self.loopback_fallback
            .parse()
            .map_err(|e: ipnetwork::IpNetworkError| crate::error::AclError::InvalidConfig(e.to_string()))
    }
}
