//! Data sources for the operating system instance.

use ahash::AHashMap;
use std::ffi::CStr;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{PalError, Result};
use crate::procfs;

/// Kernel identification as returned by `uname(2)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnameInfo {
    pub sysname: String,
    pub nodename: String,
    pub release: String,
    pub version: String,
    pub machine: String,
}

pub trait OsDependencies: Send + Sync {
    fn uname(&self) -> Result<UnameInfo>;

    /// Seconds since boot.
    fn uptime_seconds(&self) -> Result<f64>;

    /// Key/value pairs of `os-release`, quotes removed.
    fn os_release(&self) -> Result<AHashMap<String, String>>;

    fn process_count(&self) -> Result<u64>;

    /// Number of logged in user sessions.
    fn user_count(&self) -> Result<u64>;

    /// Highest pid the kernel hands out.
    fn max_processes(&self) -> Result<u64>;
}

/// Parses `os-release` content.
pub fn parse_os_release(content: &str) -> AHashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let value = value.trim().trim_matches('"').trim_matches('\'');
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

fn c_field(field: &[libc::c_char]) -> String {
    // SAFETY: uname fills every field with a NUL-terminated string.
    unsafe { CStr::from_ptr(field.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

// getutxent walks process-global state.
static UTMP_LOCK: Mutex<()> = Mutex::new(());

pub struct ProcOsDependencies {
    proc_root: PathBuf,
    os_release_paths: Vec<PathBuf>,
}

impl ProcOsDependencies {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            os_release_paths: vec![
                PathBuf::from("/etc/os-release"),
                PathBuf::from("/usr/lib/os-release"),
            ],
        }
    }

    pub fn with_roots(proc_root: impl Into<PathBuf>, os_release: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            os_release_paths: vec![os_release.into()],
        }
    }
}

impl Default for ProcOsDependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl OsDependencies for ProcOsDependencies {
    fn uname(&self) -> Result<UnameInfo> {
        // SAFETY: utsname is plain old data; uname only writes into it.
        let mut buf: libc::utsname = unsafe { std::mem::zeroed() };
        if unsafe { libc::uname(&mut buf) } != 0 {
            return Err(PalError::io("uname", std::io::Error::last_os_error()));
        }
        Ok(UnameInfo {
            sysname: c_field(&buf.sysname),
            nodename: c_field(&buf.nodename),
            release: c_field(&buf.release),
            version: c_field(&buf.version),
            machine: c_field(&buf.machine),
        })
    }

    fn uptime_seconds(&self) -> Result<f64> {
        let content = procfs::read_string(&self.proc_root.join("uptime"))?;
        let first = content
            .split_whitespace()
            .next()
            .ok_or_else(|| PalError::parse("uptime", &content))?;
        procfs::parse_token(first, "uptime")
    }

    fn os_release(&self) -> Result<AHashMap<String, String>> {
        let mut last_err = None;
        for path in &self.os_release_paths {
            match procfs::read_string(path) {
                Ok(content) => return Ok(parse_os_release(&content)),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| PalError::not_found("os-release")))
    }

    fn process_count(&self) -> Result<u64> {
        let entries = fs::read_dir(&self.proc_root)
            .map_err(|e| PalError::io(format!("reading {}", self.proc_root.display()), e))?;
        Ok(entries
            .flatten()
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            })
            .count() as u64)
    }

    fn user_count(&self) -> Result<u64> {
        let _guard = UTMP_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let mut count = 0;
        // SAFETY: serialized by UTMP_LOCK; entries are not retained past
        // the next getutxent call.
        unsafe {
            libc::setutxent();
            loop {
                let entry = libc::getutxent();
                if entry.is_null() {
                    break;
                }
                if (*entry).ut_type == libc::USER_PROCESS {
                    count += 1;
                }
            }
            libc::endutxent();
        }
        Ok(count)
    }

    fn max_processes(&self) -> Result<u64> {
        let content = procfs::read_string(&self.proc_root.join("sys/kernel/pid_max"))?;
        procfs::parse_token(content.trim(), "pid_max")
    }
}
