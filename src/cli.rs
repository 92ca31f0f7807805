//! CLI arguments and subcommands for herakles-pal.
//!
//! This module defines the command-line interface using clap and merges
//! command line overrides into the loaded configuration.

use clap::{Parser, Subcommand, ValueEnum};
use herakles_pal::config::{load_config, Config, ConfigFormat};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Resources selectable for `dump`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Resource {
    Cpu,
    Memory,
    Process,
    Disk,
    Network,
    Os,
    Testitem,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "herakles-pal",
    about = "Platform abstraction layer for OS metrics with a Prometheus endpoint",
    long_about = "Platform abstraction layer for OS metrics.\n\n\
                  Enumerates CPUs, memory, disks, processes, network interfaces and the \
                  operating system, samples their counters in background threads \
                  and serves the results over HTTP.",
    author = "Michael Moll <exporter@herakles.now> - Herakles",
    version = "0.1.0",
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Parallel process scanning threads
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// CPU sampling interval in seconds
    #[arg(long)]
    pub cpu_interval: Option<u64>,

    /// Memory sampling interval in seconds
    #[arg(long)]
    pub memory_interval: Option<u64>,

    /// Process sampling interval in seconds
    #[arg(long)]
    pub process_interval: Option<u64>,

    /// Disk sampling interval in seconds
    #[arg(long)]
    pub disk_interval: Option<u64>,

    /// Disable the process enumeration
    #[arg(long)]
    pub disable_process: bool,

    /// Disable the disk enumerations
    #[arg(long)]
    pub disable_disk: bool,

    /// Disable the network enumeration
    #[arg(long)]
    pub disable_network: bool,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and /proc access
    Check {
        /// Also run one discovery pass of every enabled enumeration
        #[arg(long)]
        all: bool,
    },

    /// Generate a configuration file
    Config {
        /// Output file path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Initialize enumerations once and print every instance
    Dump {
        /// Restrict output to one resource
        #[arg(short = 'r', long, value_enum)]
        resource: Option<Resource>,

        /// Print property sets instead of dump strings
        #[arg(long)]
        properties: bool,

        /// Number of update passes before printing
        #[arg(short = 'n', long, default_value_t = 1)]
        updates: usize,
    },
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Resolve effective configuration (CLI > config file > defaults).
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        let path = args.config.as_ref().map(|p| p.to_string_lossy().to_string());
        if let Some(p) = &path {
            if !std::path::Path::new(p).exists() {
                return Err(format!("Config file not found: {}", p).into());
            }
        }
        load_config(path.as_deref())?
    };

    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(bind) = args.bind {
        config.bind = Some(bind.to_string());
    }
    config.log_level = Some(args.log_level.as_str().to_string());
    if let Some(threads) = args.parallelism {
        config.parallelism = Some(threads);
    }
    if let Some(secs) = args.cpu_interval {
        config.sampling.cpu_interval_seconds = secs;
    }
    if let Some(secs) = args.memory_interval {
        config.sampling.memory_interval_seconds = secs;
    }
    if let Some(secs) = args.process_interval {
        config.sampling.process_interval_seconds = secs;
    }
    if let Some(secs) = args.disk_interval {
        config.sampling.disk_interval_seconds = secs;
    }
    if args.disable_process {
        config.enable_process = Some(false);
    }
    if args.disable_disk {
        config.enable_disk = Some(false);
    }
    if args.disable_network {
        config.enable_network = Some(false);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let args = Args::parse_from([
            "herakles-pal",
            "--no-config",
            "--port",
            "9999",
            "--process-interval",
            "5",
            "--cpu-interval",
            "15",
            "--disable-network",
        ]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.port, Some(9999));
        assert_eq!(config.sampling.process_interval_seconds, 5);
        assert_eq!(config.sampling.cpu_interval_seconds, 15);
        assert_eq!(config.enable_network, Some(false));
        assert_eq!(config.log_level.as_deref(), Some("info"));
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let args = Args::parse_from(["herakles-pal", "-c", "/nonexistent/pal.yaml"]);
        assert!(resolve_config(&args).is_err());
    }
}
