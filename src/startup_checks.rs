//! Startup requirement validation for herakles-pal.
//!
//! Without root, `/proc/<pid>` entries of other users are only partly
//! readable; processes whose stat cannot be read are skipped.

use nix::unistd::geteuid;
use std::fs;
use tracing::{error, info, warn};

/// Validate all runtime requirements
pub fn validate_requirements() -> Result<(), ValidationError> {
    info!("Validating runtime requirements...");

    check_user_privileges();
    check_proc_access()?;

    info!("All runtime requirements validated");
    Ok(())
}

fn check_user_privileges() {
    if geteuid().is_root() {
        info!("Running as root (uid=0)");
    } else {
        warn!("Not running as root - owner and command line of other users' processes may be unreadable");
    }
}

/// Reads the stat file of init, which every process table scan depends on.
fn check_proc_access() -> Result<(), ValidationError> {
    let test_file = "/proc/1/stat";
    match fs::read_to_string(test_file) {
        Ok(_) => {
            info!("/proc access: process stat files readable");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error!("Cannot find {} - is /proc mounted?", test_file);
            Err(ValidationError::ProcUnavailable(e.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            error!("Cannot read {} - insufficient permissions", test_file);
            error!("   Run as root or grant cap_dac_read_search,cap_sys_ptrace");
            Err(ValidationError::InsufficientPermissions(e.to_string()))
        }
        Err(e) => {
            warn!("Could not test /proc access: {}", e);
            Ok(())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Insufficient permissions: {0}")]
    InsufficientPermissions(String),

    #[error("/proc not available: {0}")]
    ProcUnavailable(String),
}
