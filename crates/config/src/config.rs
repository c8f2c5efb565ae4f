//! The `meridian.toml` schema and its validation rules.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// A node's full configuration, one TOML file end to end.
///
/// Every section is validated on load; a config that parses but carries an
/// impossible value (zero period, empty roster) never reaches the caller.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Chain identity
    pub chain: ChainConfig,

    /// Witness rotation and finality parameters
    pub dpos: DposConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Reads, parses, and validates a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        info!(path = %path.display(), "loading configuration");

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::from_str(&content)?;

        info!(
            chain_id = config.chain.chain_id,
            chain = %config.chain.chain_name,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parses and validates TOML held in memory.
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every section for values the node cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        self.chain.validate()?;
        self.dpos.validate()?;
        self.logging.validate()?;

        debug!("all configuration sections valid");
        Ok(())
    }

    /// Renders the configuration back to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}

/// The `[chain]` section: which network this node belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Numeric network identifier; zero is reserved
    pub chain_id: u64,

    /// Display name used in logs and tooling
    pub chain_name: String,
}

impl ChainConfig {
    /// Rejects the reserved zero chain id.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.chain_id == 0 {
            return Err(ConfigError::InvalidChainId);
        }

        Ok(())
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            chain_name: "Meridian Local".to_string(),
        }
    }
}

/// The `[dpos]` section: witness rotation and BFT finality parameters.
///
/// The production schedule is fully determined by these two values: every
/// `period` seconds the production slot advances to the next witness in the
/// roster of `witnesses_num` elected witnesses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DposConfig {
    /// Seconds between production slots
    pub period: u64,

    /// Number of elected witnesses in the active roster
    pub witnesses_num: u32,
}

impl DposConfig {
    /// Rejects a zero slot length or an empty roster.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.period == 0 {
            return Err(ConfigError::InvalidPeriod(self.period));
        }

        if self.witnesses_num == 0 {
            return Err(ConfigError::NoWitnesses);
        }

        Ok(())
    }

    /// Seconds between witness roster refreshes from the election contract.
    ///
    /// Three full rotations of the roster pass between refreshes.
    pub fn update_interval(&self) -> u64 {
        3 * self.witnesses_num as u64 * self.period
    }
}

impl Default for DposConfig {
    fn default() -> Self {
        Self {
            period: 2,
            witnesses_num: 4,
        }
    }
}

/// The `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level the subscriber emits, `trace` through `error`
    pub level: String,

    /// Output encoding, `json` or human `pretty`
    pub format: String,

    /// Log file path; stderr only when unset
    #[serde(default)]
    pub file: Option<String>,
}

impl LoggingConfig {
    /// Rejects levels and formats the tracing setup cannot honor.
    ///
    /// Values are matched case-insensitively.
    pub fn validate(&self) -> ConfigResult<()> {
        match self.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(ConfigError::InvalidLogLevel(self.level.clone())),
        }

        match self.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => return Err(ConfigError::InvalidLogFormat(self.format.clone())),
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: Some("./logs/meridian.log".to_string()),
        }
    }
}
