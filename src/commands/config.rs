//! Config command implementation.
//!
//! Generates configuration files in various formats.

use herakles_pal::config::render_config;
use herakles_pal::{Config, ConfigFormat};
use std::fs;
use std::path::PathBuf;

/// Writes the default configuration to `output`, or to stdout for `-`.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let output = match output {
        Some(path) => path,
        None => PathBuf::from(default_file_name(format)),
    };

    let mut content = render_config(&Config::default(), format)?;
    if format == ConfigFormat::Yaml {
        content = format!("{}{}", YAML_HEADER, content);
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

fn default_file_name(format: ConfigFormat) -> &'static str {
    match format {
        ConfigFormat::Yaml => "herakles-pal.yaml",
        ConfigFormat::Json => "herakles-pal.json",
        ConfigFormat::Toml => "herakles-pal.toml",
    }
}

const YAML_HEADER: &str = r#"# Herakles PAL Configuration
# ==========================
#
# bind / port                 HTTP listener
# enable_<resource>           cpu, memory, process, disk, network, os
# <resource>_purge_policy     retain (keep offline instances) or purge
# ignored_filesystems         extra file system types to skip
# ignored_devices             regex patterns of device names to skip
# sampling.*_interval_seconds background sampling periods
#
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use herakles_pal::config::load_config;
    use tempfile::tempdir;

    #[test]
    fn test_generated_files_load_back() {
        let dir = tempdir().unwrap();
        for format in [ConfigFormat::Yaml, ConfigFormat::Json, ConfigFormat::Toml] {
            let path = dir.path().join(default_file_name(format));
            command_config(Some(path.clone()), format).unwrap();
            let cfg = load_config(path.to_str()).unwrap();
            assert_eq!(cfg.port, Config::default().port);
            assert_eq!(cfg.sampling.disk_interval_seconds, 60);
        }
    }
}
