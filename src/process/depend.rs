//! Data sources for process instances.

use once_cell::sync::Lazy;
use std::fs;
use std::path::PathBuf;

use crate::error::{PalError, Result};
use crate::procfs;

/// Fields of `/proc/<pid>/stat` used by the process instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: i32,
    pub pgid: i64,
    pub sid: i64,
    pub tty_nr: i64,
    pub minflt: u64,
    pub majflt: u64,
    /// User mode time in clock ticks.
    pub utime: u64,
    /// Kernel mode time in clock ticks.
    pub stime: u64,
    pub cutime: u64,
    pub cstime: u64,
    pub priority: i64,
    pub nice: i64,
    pub num_threads: u64,
    /// Start time in clock ticks after boot.
    pub starttime: u64,
    pub vsize: u64,
    /// Resident set size in pages.
    pub rss: u64,
}

/// `/proc/<pid>/statm`, all values in pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcStatm {
    pub size: u64,
    pub resident: u64,
    pub shared: u64,
    pub text: u64,
    pub data: u64,
}

pub trait ProcessDependencies: Send + Sync {
    /// Every pid currently listed by the kernel.
    fn list_pids(&self) -> Result<Vec<u32>>;

    /// Fails with `NotFound` once the process is gone.
    fn read_stat(&self, pid: u32) -> Result<ProcStat>;

    fn read_statm(&self, pid: u32) -> Result<ProcStatm>;

    /// Command line arguments. Empty for kernel threads.
    fn read_cmdline(&self, pid: u32) -> Result<Vec<String>>;

    /// Real user id of the owner.
    fn read_owner(&self, pid: u32) -> Result<u32>;

    fn page_size(&self) -> u64;

    fn clock_ticks(&self) -> u64;

    /// Boot time in seconds since the epoch.
    fn boot_time(&self) -> Result<i64>;

    fn total_memory_bytes(&self) -> Result<u64>;
}

fn sysconf_or(name: libc::c_int, fallback: u64) -> u64 {
    // SAFETY: sysconf has no preconditions; -1 and 0 are handled below.
    let value = unsafe { libc::sysconf(name) };
    if value > 0 {
        value as u64
    } else {
        fallback
    }
}

/// System clock ticks per second (usually 100).
pub static CLK_TCK: Lazy<u64> = Lazy::new(|| sysconf_or(libc::_SC_CLK_TCK, 100));

pub static PAGE_SIZE: Lazy<u64> = Lazy::new(|| sysconf_or(libc::_SC_PAGESIZE, 4096));

/// Parses `/proc/<pid>/stat`. The command name sits in parentheses and may
/// itself contain spaces and parentheses, so fields are split after the
/// last `)`.
pub fn parse_stat(content: &str) -> Result<ProcStat> {
    let open = content
        .find('(')
        .ok_or_else(|| PalError::parse("process stat", content))?;
    let close = content
        .rfind(')')
        .ok_or_else(|| PalError::parse("process stat", content))?;
    if close < open {
        return Err(PalError::parse("process stat", content));
    }

    let pid = procfs::parse_token(content[..open].trim(), "pid")?;
    let comm = content[open + 1..close].to_string();
    // Fields after the name, starting at `state` (field 3).
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if rest.len() < 22 {
        return Err(PalError::parse("process stat", content));
    }
    let field = |n: usize| rest[n - 3];

    Ok(ProcStat {
        pid,
        comm,
        state: field(3).chars().next().unwrap_or('?'),
        ppid: procfs::parse_token(field(4), "ppid")?,
        pgid: procfs::parse_token(field(5), "pgrp")?,
        sid: procfs::parse_token(field(6), "session")?,
        tty_nr: procfs::parse_token(field(7), "tty_nr")?,
        minflt: procfs::parse_token(field(10), "minflt")?,
        majflt: procfs::parse_token(field(12), "majflt")?,
        utime: procfs::parse_token(field(14), "utime")?,
        stime: procfs::parse_token(field(15), "stime")?,
        cutime: procfs::parse_token(field(16), "cutime")?,
        cstime: procfs::parse_token(field(17), "cstime")?,
        priority: procfs::parse_token(field(18), "priority")?,
        nice: procfs::parse_token(field(19), "nice")?,
        num_threads: procfs::parse_token(field(20), "num_threads")?,
        starttime: procfs::parse_token(field(22), "starttime")?,
        vsize: procfs::parse_token(field(23), "vsize")?,
        rss: procfs::parse_token(field(24), "rss")?,
    })
}

pub fn parse_statm(content: &str) -> Result<ProcStatm> {
    let fields: Vec<u64> = content
        .split_whitespace()
        .map(|t| procfs::parse_token(t, "statm"))
        .collect::<Result<_>>()?;
    if fields.len() < 6 {
        return Err(PalError::parse("statm", content));
    }
    Ok(ProcStatm {
        size: fields[0],
        resident: fields[1],
        shared: fields[2],
        text: fields[3],
        data: fields[5],
    })
}

/// Splits NUL-separated `/proc/<pid>/cmdline` content.
pub fn parse_cmdline(raw: &[u8]) -> Vec<String> {
    raw.split(|&b| b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

/// Linux implementation over a procfs root.
pub struct ProcProcessDependencies {
    proc_root: PathBuf,
}

impl ProcProcessDependencies {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn pid_path(&self, pid: u32, file: &str) -> PathBuf {
        self.proc_root.join(pid.to_string()).join(file)
    }
}

impl Default for ProcProcessDependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessDependencies for ProcProcessDependencies {
    fn list_pids(&self) -> Result<Vec<u32>> {
        let entries = fs::read_dir(&self.proc_root)
            .map_err(|e| PalError::io(format!("reading {}", self.proc_root.display()), e))?;
        let mut pids: Vec<u32> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn read_stat(&self, pid: u32) -> Result<ProcStat> {
        parse_stat(&procfs::read_string(&self.pid_path(pid, "stat"))?)
    }

    fn read_statm(&self, pid: u32) -> Result<ProcStatm> {
        parse_statm(&procfs::read_string(&self.pid_path(pid, "statm"))?)
    }

    fn read_cmdline(&self, pid: u32) -> Result<Vec<String>> {
        let path = self.pid_path(pid, "cmdline");
        let raw = fs::read(&path)
            .map_err(|e| PalError::from_io_path(&path.display().to_string(), e))?;
        Ok(parse_cmdline(&raw))
    }

    fn read_owner(&self, pid: u32) -> Result<u32> {
        let lines = procfs::read_lines(&self.pid_path(pid, "status"))?;
        procfs::find_value(&lines, "Uid:")
            .ok_or_else(|| PalError::parse("Uid", format!("/proc/{}/status", pid)))
    }

    fn page_size(&self) -> u64 {
        *PAGE_SIZE
    }

    fn clock_ticks(&self) -> u64 {
        *CLK_TCK
    }

    fn boot_time(&self) -> Result<i64> {
        let lines = procfs::read_lines(&self.proc_root.join("stat"))?;
        procfs::find_value(&lines, "btime").ok_or_else(|| PalError::parse("btime", "/proc/stat"))
    }

    fn total_memory_bytes(&self) -> Result<u64> {
        let lines = procfs::read_lines(&self.proc_root.join("meminfo"))?;
        procfs::find_value::<u64>(&lines, "MemTotal:")
            .map(|kb| kb * 1024)
            .ok_or_else(|| PalError::parse("MemTotal", "/proc/meminfo"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const STAT: &str = "4242 (my (odd) proc) S 1 4242 4242 0 -1 4194560 500 0 7 0 \
                        150 50 0 0 20 0 3 0 12000 104857600 2560 18446744073709551615";

    #[test]
    fn test_parse_stat_with_parenthesised_name() {
        let stat = parse_stat(STAT).unwrap();
        assert_eq!(stat.pid, 4242);
        assert_eq!(stat.comm, "my (odd) proc");
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.ppid, 1);
        assert_eq!(stat.majflt, 7);
        assert_eq!(stat.utime, 150);
        assert_eq!(stat.stime, 50);
        assert_eq!(stat.priority, 20);
        assert_eq!(stat.nice, 0);
        assert_eq!(stat.starttime, 12000);
        assert_eq!(stat.rss, 2560);
    }

    #[test]
    fn test_parse_stat_truncated() {
        assert!(matches!(
            parse_stat("1 (init) S 0 1"),
            Err(PalError::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_cmdline() {
        assert_eq!(
            parse_cmdline(b"/usr/bin/foo\0--bar\0baz\0"),
            vec!["/usr/bin/foo", "--bar", "baz"]
        );
        assert!(parse_cmdline(b"").is_empty());
    }

    #[test]
    fn test_proc_dependencies_read_tree() {
        let dir = tempdir().expect("Failed to create temp dir");
        let pid_dir = dir.path().join("4242");
        fs::create_dir(&pid_dir).unwrap();
        fs::create_dir(dir.path().join("self")).unwrap();
        fs::write(pid_dir.join("stat"), STAT).unwrap();
        fs::write(pid_dir.join("statm"), "25600 2560 300 10 0 2000 0\n").unwrap();
        fs::write(pid_dir.join("status"), "Name:\tx\nUid:\t1000\t1000\t1000\t1000\n").unwrap();
        fs::write(dir.path().join("stat"), "cpu 1 2 3\nbtime 1700000000\n").unwrap();

        let deps = ProcProcessDependencies::with_root(dir.path());
        assert_eq!(deps.list_pids().unwrap(), vec![4242]);
        assert_eq!(deps.read_owner(4242).unwrap(), 1000);
        assert_eq!(deps.read_statm(4242).unwrap().resident, 2560);
        assert_eq!(deps.boot_time().unwrap(), 1_700_000_000);
        assert!(deps.read_stat(4343).unwrap_err().is_not_found());
    }
}
