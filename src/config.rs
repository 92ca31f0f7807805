//! Configuration management for herakles-pal.
//!
//! This module handles loading and validating configuration files. It
//! supports YAML, JSON, and TOML formats. Command line overrides are merged
//! on top by the binary.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::enumeration::PurgePolicy;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9216;
pub const DEFAULT_SAMPLING_INTERVAL_SECS: u64 = 60;

/// Output format for `config` and `dump`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Sampling thread periods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// CPU tick sampling interval in seconds (default: 60)
    #[serde(default = "default_interval_seconds")]
    pub cpu_interval_seconds: u64,

    /// Memory page counter sampling interval in seconds (default: 60)
    #[serde(default = "default_interval_seconds")]
    pub memory_interval_seconds: u64,

    /// Process table sampling interval in seconds (default: 60)
    #[serde(default = "default_interval_seconds")]
    pub process_interval_seconds: u64,

    /// Disk statistics sampling interval in seconds (default: 60)
    #[serde(default = "default_interval_seconds")]
    pub disk_interval_seconds: u64,
}

fn default_interval_seconds() -> u64 {
    DEFAULT_SAMPLING_INTERVAL_SECS
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            cpu_interval_seconds: default_interval_seconds(),
            memory_interval_seconds: default_interval_seconds(),
            process_interval_seconds: default_interval_seconds(),
            disk_interval_seconds: default_interval_seconds(),
        }
    }
}

impl SamplingConfig {
    pub fn cpu_interval(&self) -> Duration {
        Duration::from_secs(self.cpu_interval_seconds)
    }

    pub fn memory_interval(&self) -> Duration {
        Duration::from_secs(self.memory_interval_seconds)
    }

    pub fn process_interval(&self) -> Duration {
        Duration::from_secs(self.process_interval_seconds)
    }

    pub fn disk_interval(&self) -> Duration {
        Duration::from_secs(self.disk_interval_seconds)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,

    // Logging
    pub log_level: Option<String>,

    // Performance tuning
    pub parallelism: Option<usize>,

    // Resource enable flags
    #[serde(alias = "enable-cpu")]
    pub enable_cpu: Option<bool>,
    #[serde(alias = "enable-memory")]
    pub enable_memory: Option<bool>,
    #[serde(alias = "enable-process")]
    pub enable_process: Option<bool>,
    #[serde(alias = "enable-disk")]
    pub enable_disk: Option<bool>,
    #[serde(alias = "enable-network")]
    pub enable_network: Option<bool>,
    #[serde(alias = "enable-os")]
    pub enable_os: Option<bool>,

    // Reconciliation policies
    #[serde(alias = "cpu-purge-policy")]
    pub cpu_purge_policy: Option<PurgePolicy>,
    #[serde(alias = "disk-purge-policy")]
    pub disk_purge_policy: Option<PurgePolicy>,
    #[serde(alias = "process-purge-policy")]
    pub process_purge_policy: Option<PurgePolicy>,
    #[serde(alias = "network-purge-policy")]
    pub network_purge_policy: Option<PurgePolicy>,

    // Disk filters
    /// File system types skipped in addition to the built-in list
    #[serde(alias = "ignored-filesystems")]
    pub ignored_filesystems: Option<Vec<String>>,
    /// Regular expressions matched against device paths
    #[serde(alias = "ignored-devices")]
    pub ignored_devices: Option<Vec<String>>,

    #[serde(default)]
    pub sampling: SamplingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            port: Some(DEFAULT_PORT),
            log_level: Some("info".into()),
            parallelism: None,
            enable_cpu: Some(true),
            enable_memory: Some(true),
            enable_process: Some(true),
            enable_disk: Some(true),
            enable_network: Some(true),
            enable_os: Some(true),
            cpu_purge_policy: Some(PurgePolicy::Retain),
            disk_purge_policy: Some(PurgePolicy::Retain),
            process_purge_policy: Some(PurgePolicy::Purge),
            network_purge_policy: Some(PurgePolicy::Purge),
            ignored_filesystems: None,
            ignored_devices: None,
            sampling: SamplingConfig::default(),
        }
    }
}

impl Config {
    pub fn cpu_policy(&self) -> PurgePolicy {
        self.cpu_purge_policy.unwrap_or(PurgePolicy::Retain)
    }

    pub fn disk_policy(&self) -> PurgePolicy {
        self.disk_purge_policy.unwrap_or(PurgePolicy::Retain)
    }

    pub fn process_policy(&self) -> PurgePolicy {
        self.process_purge_policy.unwrap_or(PurgePolicy::Purge)
    }

    pub fn network_policy(&self) -> PurgePolicy {
        self.network_purge_policy.unwrap_or(PurgePolicy::Purge)
    }
}

/// Validate effective config (used by `check` and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let enabled = [
        cfg.enable_cpu,
        cfg.enable_memory,
        cfg.enable_process,
        cfg.enable_disk,
        cfg.enable_network,
        cfg.enable_os,
    ];
    if !enabled.iter().any(|flag| flag.unwrap_or(true)) {
        return Err("At least one of enable_cpu/enable_memory/enable_process/enable_disk/\
            enable_network/enable_os must be true"
            .into());
    }

    let intervals = [
        ("cpu_interval_seconds", cfg.sampling.cpu_interval_seconds),
        ("memory_interval_seconds", cfg.sampling.memory_interval_seconds),
        ("process_interval_seconds", cfg.sampling.process_interval_seconds),
        ("disk_interval_seconds", cfg.sampling.disk_interval_seconds),
    ];
    for (name, value) in intervals {
        if value == 0 {
            return Err(format!("sampling.{} must be greater than 0", name).into());
        }
    }

    if let Some(patterns) = &cfg.ignored_devices {
        for pattern in patterns {
            regex::Regex::new(pattern)
                .map_err(|e| format!("Invalid ignored_devices pattern '{}': {}", pattern, e))?;
        }
    }

    if cfg.parallelism == Some(0) {
        return Err("parallelism must be greater than 0 when set".into());
    }

    if let Some(bind) = cfg.bind.as_deref() {
        bind.parse::<std::net::IpAddr>()
            .map_err(|e| format!("Invalid bind address '{}': {}", bind, e))?;
    }

    Ok(())
}

/// Loads configuration from `path`, or from the first default location
/// that exists. Missing files yield the default configuration.
pub fn load_config(path: Option<&str>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = if let Some(p) = path {
        PathBuf::from(p)
    } else {
        // Try default locations
        let defaults = [
            "/etc/herakles/pal.yaml",
            "/etc/herakles/pal.yml",
            "/etc/herakles/pal.json",
            "/etc/herakles/pal.toml",
            "./herakles-pal.yaml",
            "./herakles-pal.yml",
            "./herakles-pal.json",
            "./herakles-pal.toml",
        ];

        defaults
            .iter()
            .find(|p| Path::new(p).exists())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(""))
    };

    if path.to_string_lossy().is_empty() || !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path)?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let config: Config = serde_json::from_str(&content)?;
            info!("Loaded JSON configuration from: {}", path.display());
            Ok(config)
        }
        Some("toml") => {
            let config: Config = toml::from_str(&content)?;
            info!("Loaded TOML configuration from: {}", path.display());
            Ok(config)
        }
        _ => {
            // Default to YAML
            let config: Config = serde_yaml::from_str(&content)?;
            info!("Loaded YAML configuration from: {}", path.display());
            Ok(config)
        }
    }
}

/// Serializes `config` in the requested format.
pub fn render_config(
    config: &Config,
    format: ConfigFormat,
) -> Result<String, Box<dyn std::error::Error>> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = Config::default();
        assert!(validate_effective_config(&cfg).is_ok());
        assert_eq!(cfg.disk_policy(), PurgePolicy::Retain);
        assert_eq!(cfg.process_policy(), PurgePolicy::Purge);
        assert_eq!(cfg.cpu_policy(), PurgePolicy::Retain);
        assert_eq!(cfg.sampling.memory_interval(), Duration::from_secs(60));
        assert_eq!(cfg.sampling.cpu_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_all_resources_disabled_is_invalid() {
        let cfg = Config {
            enable_cpu: Some(false),
            enable_memory: Some(false),
            enable_process: Some(false),
            enable_disk: Some(false),
            enable_network: Some(false),
            enable_os: Some(false),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let cfg = Config {
            ignored_devices: Some(vec!["[unclosed".into()]),
            ..Config::default()
        };
        let err = validate_effective_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("ignored_devices"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut cfg = Config::default();
        cfg.sampling.process_interval_seconds = 0;
        assert!(validate_effective_config(&cfg).is_err());
    }

    #[test]
    fn test_load_yaml_with_partial_sampling() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(
            file,
            "port: 9999\ndisk_purge_policy: purge\nsampling:\n  memory_interval_seconds: 5"
        )
        .unwrap();

        let cfg = load_config(file.path().to_str()).unwrap();
        assert_eq!(cfg.port, Some(9999));
        assert_eq!(cfg.disk_policy(), PurgePolicy::Purge);
        assert_eq!(cfg.sampling.memory_interval_seconds, 5);
        assert_eq!(cfg.sampling.disk_interval_seconds, 60);
    }

    #[test]
    fn test_load_missing_file_yields_default() {
        let cfg = load_config(Some("/nonexistent/herakles-pal.yaml")).unwrap();
        assert_eq!(cfg.port, Some(DEFAULT_PORT));
    }

    #[test]
    fn test_render_formats() {
        let cfg = Config::default();
        for format in [ConfigFormat::Yaml, ConfigFormat::Json, ConfigFormat::Toml] {
            let out = render_config(&cfg, format).unwrap();
            assert!(out.contains("9216"), "{:?} output missing port", format);
        }
    }
}
