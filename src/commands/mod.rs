//! CLI command implementations for herakles-pal.
//!
//! This module provides implementations for all CLI subcommands:
//! - `check`: Configuration and `/proc` access validation
//! - `config`: Configuration file generation
//! - `dump`: One-shot enumeration dump

pub mod check;
pub mod config;
pub mod dump;

// Re-export command functions
pub use check::command_check;
pub use config::command_config;
pub use dump::command_dump;
