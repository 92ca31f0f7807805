//! Data sources for the memory instance.

use std::path::PathBuf;

use crate::error::Result;
use crate::procfs;

/// Raw memory counters as text lines.
pub trait MemoryDependencies: Send + Sync {
    /// Lines of `/proc/meminfo`.
    fn meminfo_lines(&self) -> Result<Vec<String>>;

    /// Lines of `/proc/vmstat`.
    fn vmstat_lines(&self) -> Result<Vec<String>>;
}

/// Reads memory counters from procfs.
pub struct ProcMemoryDependencies {
    proc_root: PathBuf,
}

impl ProcMemoryDependencies {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl Default for ProcMemoryDependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDependencies for ProcMemoryDependencies {
    fn meminfo_lines(&self) -> Result<Vec<String>> {
        procfs::read_lines(&self.proc_root.join("meminfo"))
    }

    fn vmstat_lines(&self) -> Result<Vec<String>> {
        procfs::read_lines(&self.proc_root.join("vmstat"))
    }
}
