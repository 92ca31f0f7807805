//! Check command implementation.
//!
//! Validates configuration, `/proc` access and optionally runs one
//! discovery pass of every enabled enumeration.

use herakles_pal::config::validate_effective_config;
use herakles_pal::{Config, PalContext};
use std::path::Path;

use crate::startup_checks;
use crate::state::Enumerations;

/// Validates system requirements and configuration.
pub fn command_check(all: bool, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Herakles PAL - System Check");
    println!("==============================");

    let mut all_ok = true;

    println!("\n📁 Checking /proc filesystem...");
    if Path::new("/proc").exists() {
        println!("   ✅ /proc filesystem accessible");
    } else {
        println!("   ❌ /proc filesystem not found");
        all_ok = false;
    }

    match startup_checks::validate_requirements() {
        Ok(()) => println!("   ✅ Process information readable"),
        Err(e) => {
            println!("   ❌ {}", e);
            all_ok = false;
        }
    }

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    if all {
        println!("\n📊 Running one discovery pass...");
        let ctx = PalContext::new(config.clone());
        let set = Enumerations::build(&ctx, None)?;
        let failures = set.init_all();
        set.clean_up_all();
        if failures == 0 {
            println!("   ✅ All enabled enumerations initialized");
        } else {
            println!("   ❌ {} enumeration(s) failed to initialize", failures);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review warnings");
        std::process::exit(1);
    }
}
