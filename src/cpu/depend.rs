//! Data sources for the CPU enumeration.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::{PalError, Result};
use crate::procfs;

/// Raw CPU counters as text lines.
pub trait CpuDependencies: Send + Sync {
    /// Lines of `/proc/stat`.
    fn stat_lines(&self) -> Result<Vec<String>>;

    /// Lines of `/proc/cpuinfo`.
    fn cpuinfo_lines(&self) -> Result<Vec<String>>;
}

/// Reads CPU counters from procfs.
pub struct ProcCpuDependencies {
    proc_root: PathBuf,
}

impl ProcCpuDependencies {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl Default for ProcCpuDependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuDependencies for ProcCpuDependencies {
    fn stat_lines(&self) -> Result<Vec<String>> {
        procfs::read_lines(&self.proc_root.join("stat"))
    }

    fn cpuinfo_lines(&self) -> Result<Vec<String>> {
        procfs::read_lines(&self.proc_root.join("cpuinfo"))
    }
}

/// Cumulative tick counters of one `cpu` row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
}

impl CpuTicks {
    /// Sum of every tracked state. Steal and guest time are left out.
    pub fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle + self.iowait + self.irq + self.softirq
    }
}

/// Which row of `/proc/stat` a reading belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpuRow {
    /// The aggregate `cpu` line.
    Total,
    /// A `cpuN` line, keyed by `N`.
    Processor(String),
}

/// Parses the `cpu` lines of `/proc/stat`.
///
/// Kernels older than 2.6 only report the first four columns; the missing
/// ones read as zero.
pub fn parse_stat(lines: &[String]) -> Result<Vec<(CpuRow, CpuTicks)>> {
    let mut rows = Vec::new();
    for line in lines {
        let mut tokens = line.split_whitespace();
        let Some(label) = tokens.next() else {
            continue;
        };
        let Some(number) = label.strip_prefix("cpu") else {
            continue;
        };

        let columns: Vec<&str> = tokens.collect();
        if columns.len() < 4 {
            return Err(PalError::parse("cpu row", line.as_str()));
        }
        let column = |i: usize| -> Result<u64> {
            match columns.get(i) {
                Some(token) => procfs::parse_token(token, "cpu ticks"),
                None => Ok(0),
            }
        };
        let ticks = CpuTicks {
            user: column(0)?,
            nice: column(1)?,
            system: column(2)?,
            idle: column(3)?,
            iowait: column(4)?,
            irq: column(5)?,
            softirq: column(6)?,
        };

        let row = if number.is_empty() {
            CpuRow::Total
        } else {
            CpuRow::Processor(number.to_string())
        };
        rows.push((row, ticks));
    }

    if rows.is_empty() {
        return Err(PalError::parse("cpu rows", "/proc/stat"));
    }
    Ok(rows)
}

/// Number of distinct `physical id` values, i.e. populated sockets.
/// Zero when the kernel does not report them.
pub fn count_physical_processors(cpuinfo: &[String]) -> usize {
    cpuinfo
        .iter()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key.trim() == "physical id").then(|| value.trim().to_string())
        })
        .collect::<BTreeSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &str) -> Vec<String> {
        s.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_parse_stat_rows() {
        let rows = parse_stat(&lines(
            "cpu  2255 34 2290 22625563 6290 127 456 0 0 0\n\
             cpu0 1132 34 1441 11311718 3675 127 438 0 0 0\n\
             cpu1 1123 0 849 11313845 2614 0 18 0 0 0\n\
             intr 114930548 113199788 3 0 5 263 0 4 [... lots more numbers ...]\n\
             ctxt 1990473\n\
             btime 1062191376",
        ))
        .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].0, CpuRow::Total);
        assert_eq!(rows[1].0, CpuRow::Processor("0".into()));
        assert_eq!(rows[2].1.idle, 11313845);
        assert_eq!(rows[0].1.total(), 2255 + 34 + 2290 + 22625563 + 6290 + 127 + 456);
    }

    #[test]
    fn test_parse_stat_short_rows_default_to_zero() {
        let rows = parse_stat(&lines("cpu 10 20 30 40")).unwrap();
        assert_eq!(rows[0].1.iowait, 0);
        assert_eq!(rows[0].1.total(), 100);
    }

    #[test]
    fn test_parse_stat_rejects_garbage() {
        assert!(parse_stat(&lines("cpu 10 x 30 40")).is_err());
        assert!(parse_stat(&lines("cpu 10 20")).is_err());
        assert!(parse_stat(&lines("ctxt 1990473")).is_err());
    }

    #[test]
    fn test_count_physical_processors() {
        let info = lines(
            "processor\t: 0\nphysical id\t: 0\n\n\
             processor\t: 1\nphysical id\t: 3\n\n\
             processor\t: 2\nphysical id\t: 0\n",
        );
        assert_eq!(count_physical_processors(&info), 2);
        assert_eq!(count_physical_processors(&lines("processor : 0")), 0);
    }
}
