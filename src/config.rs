//! Configuration module for the netaudit engine

use crate::network::protocol::ServiceDatabase;
use crate::snmp::discovery::DEFAULT_COMMUNITIES;
use crate::utils::target_parser::{CREDENTIALED_TARGET_CAP, SNMP_TARGET_CAP};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration structure for scan runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of targets scanned at the same time
    pub max_concurrent_targets: usize,

    /// Target cap when credentialed modules are enabled
    pub credentialed_target_cap: usize,

    /// Target cap for SNMP / port discovery runs
    pub snmp_target_cap: usize,

    pub ports: PortScanConfig,
    pub snmp: SnmpConfig,
    pub web: WebConfig,
    pub ssh: SshConfig,
    pub database: DatabaseConfig,
    pub lookup: LookupConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_targets: 4,
            credentialed_target_cap: CREDENTIALED_TARGET_CAP,
            snmp_target_cap: SNMP_TARGET_CAP,
            ports: PortScanConfig::default(),
            snmp: SnmpConfig::default(),
            web: WebConfig::default(),
            ssh: SshConfig::default(),
            database: DatabaseConfig::default(),
            lookup: LookupConfig::default(),
        }
    }
}

/// TCP port probing options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortScanConfig {
    /// Ports probed when the request does not name any
    pub ports: Vec<u16>,
    /// Maximum simultaneous connection attempts per target
    pub concurrency: usize,
    /// Connect timeout in milliseconds
    pub timeout_ms: u64,
    /// Read a banner from open ports
    pub grab_banners: bool,
    pub banner_timeout_ms: u64,
}

impl Default for PortScanConfig {
    fn default() -> Self {
        Self {
            ports: ServiceDatabase::default_tcp_ports(),
            concurrency: 50,
            timeout_ms: 1000,
            grab_banners: true,
            banner_timeout_ms: 1500,
        }
    }
}

/// SNMP discovery options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnmpConfig {
    pub ports: Vec<u16>,
    pub communities: Vec<String>,
    /// Per-query timeout in milliseconds
    pub timeout_ms: u64,
    /// Caller-level retries on timeout for each port/community attempt
    pub retries: usize,
    pub max_interfaces: u32,
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            ports: vec![161],
            communities: DEFAULT_COMMUNITIES.iter().map(|c| c.to_string()).collect(),
            timeout_ms: 5000,
            retries: 2,
            max_interfaces: 5,
        }
    }
}

/// Web form login and crawl options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub login_path: String,
    pub username_field: String,
    pub password_field: String,
    pub max_depth: u32,
    pub max_pages: usize,
    pub timeout_ms: u64,
    pub user_agent: String,
    /// Scheme used when a credential carries no base URL
    pub default_scheme: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            username_field: "username".to_string(),
            password_field: "password".to_string(),
            max_depth: 2,
            max_pages: 25,
            timeout_ms: 10_000,
            user_agent: format!("netaudit/{}", env!("CARGO_PKG_VERSION")),
            default_scheme: "http".to_string(),
        }
    }
}

/// Shell session options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub port: u16,
    pub timeout_ms: u64,
    /// Per-command timeout in milliseconds
    pub command_timeout_ms: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            port: 22,
            timeout_ms: 10_000,
            command_timeout_ms: 30_000,
        }
    }
}

/// Database session options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub timeout_ms: u64,
    /// Engine assumed when a credential does not name one
    pub default_type: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            default_type: "mysql".to_string(),
        }
    }
}

/// External vulnerability database lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub max_results: usize,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://services.nvd.nist.gov/rest/json/cves/2.0".to_string(),
            api_key: None,
            timeout_ms: 30_000,
            max_results: 5,
        }
    }
}

impl EngineConfig {
    /// Set the ports probed by default
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports.ports = ports;
        self
    }

    /// Set the SNMP community strings tried during discovery
    pub fn with_communities(mut self, communities: Vec<String>) -> Self {
        self.snmp.communities = communities;
        self
    }

    /// Set the SNMP ports tried during discovery
    pub fn with_snmp_ports(mut self, ports: Vec<u16>) -> Self {
        self.snmp.ports = ports;
        self
    }

    /// Set the SNMP query timeout and caller-level retries
    pub fn with_snmp_timing(mut self, timeout_ms: u64, retries: usize) -> Self {
        self.snmp.timeout_ms = timeout_ms;
        self.snmp.retries = retries;
        self
    }

    pub fn with_max_concurrent_targets(mut self, max: usize) -> Self {
        self.max_concurrent_targets = max;
        self
    }

    /// Load configuration from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| crate::ScanError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| crate::ScanError::ConfigError(format!("Failed to parse TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load_default_config() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let config_path = home_dir.join(".netaudit.toml");

        if config_path.exists() {
            match Self::from_toml_file(&config_path) {
                Ok(config) => {
                    log::info!("Loaded config from {}", config_path.display());
                    return config;
                }
                Err(e) => log::warn!("Ignoring {}: {}", config_path.display(), e),
            }
        }

        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_concurrent_targets == 0 {
            return Err(crate::ScanError::ConfigError(
                "max_concurrent_targets must be greater than 0".to_string(),
            ));
        }

        if self.ports.concurrency == 0 {
            return Err(crate::ScanError::ConfigError(
                "Port probe concurrency must be greater than 0".to_string(),
            ));
        }

        if self.snmp.ports.is_empty() {
            return Err(crate::ScanError::ConfigError("No SNMP ports configured".to_string()));
        }

        if self.snmp.timeout_ms == 0 || self.ports.timeout_ms == 0 {
            return Err(crate::ScanError::ConfigError("Timeouts must be non-zero".to_string()));
        }

        if self.credentialed_target_cap == 0 || self.snmp_target_cap == 0 {
            return Err(crate::ScanError::ConfigError("Target caps must be non-zero".to_string()));
        }

        if self.web.max_pages == 0 {
            return Err(crate::ScanError::ConfigError("web.max_pages must be at least 1".to_string()));
        }

        Ok(())
    }
}
