//! Data sources for disk enumerations.
//!
//! The Linux implementation reads the mount table from `/proc/mounts`,
//! cumulative I/O counters from `/proc/diskstats`, device properties from
//! `/sys/block`, and space usage through `statvfs(3)`.

use regex::Regex;
use std::ffi::CString;
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{PalError, Result};
use crate::procfs;

/// Sector size assumed when the kernel does not report one.
pub const DEFAULT_SECTOR_SIZE: u64 = 512;

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
    pub options: Vec<String>,
}

impl MountEntry {
    pub fn is_read_only(&self) -> bool {
        self.options.iter().any(|o| o == "ro")
    }
}

/// Space and inode figures of a mounted file system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: u64,
    pub fragment_size: u64,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub available_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub available_inodes: u64,
    pub max_filename_len: u64,
    pub read_only: bool,
}

impl FsStats {
    pub fn size_bytes(&self) -> u64 {
        self.fragment_size * self.total_blocks
    }

    /// Space available to unprivileged users.
    pub fn available_bytes(&self) -> u64 {
        self.fragment_size * self.available_blocks
    }

    pub fn used_bytes(&self) -> u64 {
        self.size_bytes()
            .saturating_sub(self.fragment_size * self.free_blocks)
    }
}

/// Cumulative I/O counters of one block device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskCounters {
    pub reads: u64,
    pub writes: u64,
    pub sectors_read: u64,
    pub sectors_written: u64,
}

/// Static properties of a whole block device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDeviceInfo {
    pub name: String,
    pub size_bytes: u64,
    pub sector_size: u64,
    pub removable: bool,
    pub model: Option<String>,
    pub vendor: Option<String>,
}

pub trait DiskDependencies: Send + Sync {
    /// Re-reads the mount table.
    fn refresh_mount_table(&self) -> Result<()>;

    /// Mount table as of the last refresh.
    fn mount_table(&self) -> Vec<MountEntry>;

    /// True for pseudo, network and other file systems not reported as disks.
    fn file_system_ignored(&self, fs_type: &str) -> bool;

    /// True for devices excluded by configuration.
    fn device_ignored(&self, device: &str) -> bool;

    fn statvfs(&self, path: &str) -> Result<FsStats>;

    /// Counters for `device` (a `/dev` path or a kernel name).
    /// Fails with `NotFound` when the kernel no longer lists it.
    fn disk_stats(&self, device: &str) -> Result<DiskCounters>;

    /// Kernel names of whole disks.
    fn block_devices(&self) -> Result<Vec<String>>;

    fn block_device_info(&self, device: &str) -> Result<BlockDeviceInfo>;

    /// Bytes per sector of `device`, defaulting to 512.
    fn sector_size(&self, device: &str) -> u64;
}

// File system types never reported as disks.
const IGNORED_FILESYSTEMS: &[&str] = &[
    "autofs", "bdev", "binfmt_misc", "bpf", "cachefs", "cdfs", "cdrfs", "cgroup", "cgroup2",
    "cifs", "configfs", "ctfs", "debugfs", "devfs", "devpts", "devtmpfs", "efivarfs",
    "eventpollfs", "fd", "ffs", "fifofs", "fusectl", "futexfs", "hsfs", "hugetlbfs",
    "inotifyfs", "iso9660", "lofs", "mntfs", "mqueue", "namefs", "none", "nsfs", "objfs",
    "overlay", "pipefs", "proc", "procfs", "pstore", "ramfs", "rootfs", "rpc_pipefs",
    "securityfs", "sharefs", "sockfs", "specfs", "squashfs", "subfs", "sysfs", "tmpfs",
    "tracefs", "udfs", "usbfs", "vmblock", "vmhgfs", "vmware-hgfs", "zfs",
];

// Prefix and substring matches.
const IGNORED_FILESYSTEM_PREFIXES: &[&str] = &["nfs"];
const IGNORED_FILESYSTEM_PARTS: &[&str] = &["gvfs"];

/// Whether `fs_type` is on the built-in ignore list. Case-insensitive.
pub fn builtin_file_system_ignored(fs_type: &str) -> bool {
    let fs = fs_type.to_lowercase();
    IGNORED_FILESYSTEM_PARTS.iter().any(|p| fs.contains(p))
        || IGNORED_FILESYSTEM_PREFIXES.iter().any(|p| fs.starts_with(p))
        || IGNORED_FILESYSTEMS.contains(&fs.as_str())
}

/// Parses `/proc/mounts` content.
pub fn parse_mount_table(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            Some(MountEntry {
                device: unescape_mount_field(parts[0]),
                mount_point: unescape_mount_field(parts[1]),
                fs_type: parts[2].to_string(),
                options: parts[3].split(',').map(str::to_string).collect(),
            })
        })
        .collect()
}

// The kernel escapes blanks in mount fields as octal sequences.
fn unescape_mount_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

/// Extracts the counters of `name` from `/proc/diskstats` content.
///
/// Whole-disk lines carry at least 14 columns; old kernels report
/// partitions with 7.
pub fn parse_diskstats_line(content: &str, name: &str) -> Result<DiskCounters> {
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 || parts[2] != name {
            continue;
        }

        return if parts.len() >= 14 {
            Ok(DiskCounters {
                reads: procfs::parse_token(parts[3], "reads completed")?,
                sectors_read: procfs::parse_token(parts[5], "sectors read")?,
                writes: procfs::parse_token(parts[7], "writes completed")?,
                sectors_written: procfs::parse_token(parts[9], "sectors written")?,
            })
        } else if parts.len() == 7 {
            Ok(DiskCounters {
                reads: procfs::parse_token(parts[3], "reads issued")?,
                sectors_read: procfs::parse_token(parts[4], "read sectors")?,
                writes: procfs::parse_token(parts[5], "writes issued")?,
                sectors_written: procfs::parse_token(parts[6], "write sectors")?,
            })
        } else {
            Err(PalError::parse(
                format!("diskstats for {} ({} columns)", name, parts.len()),
                line,
            ))
        };
    }
    Err(PalError::not_found(format!("diskstats entry for {}", name)))
}

/// Kernel name of a device path: `/dev/sda1` becomes `sda1`, and symlinks
/// such as `/dev/mapper/vg-root` resolve to their `dm-N` target.
pub fn kernel_device_name(device: &str) -> String {
    let resolved = if device.starts_with("/dev/") {
        fs::canonicalize(device).unwrap_or_else(|_| PathBuf::from(device))
    } else {
        PathBuf::from(device)
    };
    resolved
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| device.to_string())
}

/// Linux implementation backed by procfs, sysfs and statvfs.
pub struct ProcDiskDependencies {
    proc_root: PathBuf,
    sys_root: PathBuf,
    mounts: Mutex<Vec<MountEntry>>,
    extra_ignored_fs: Vec<String>,
    ignored_devices: Vec<Regex>,
}

impl ProcDiskDependencies {
    pub fn new() -> Self {
        Self::with_roots("/proc", "/sys")
    }

    pub fn with_roots(proc_root: impl Into<PathBuf>, sys_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            sys_root: sys_root.into(),
            mounts: Mutex::new(Vec::new()),
            extra_ignored_fs: Vec::new(),
            ignored_devices: Vec::new(),
        }
    }

    /// Adds configured file system types and device patterns.
    pub fn with_filters(mut self, file_systems: &[String], device_patterns: &[String]) -> Result<Self> {
        self.extra_ignored_fs = file_systems.iter().map(|f| f.to_lowercase()).collect();
        self.ignored_devices = device_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| PalError::parse("device pattern", format!("{}: {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new().with_filters(
            config.ignored_filesystems.as_deref().unwrap_or(&[]),
            config.ignored_devices.as_deref().unwrap_or(&[]),
        )
    }

    fn sys_block(&self, device: &str) -> PathBuf {
        self.sys_root.join("block").join(kernel_device_name(device))
    }

    fn read_sys_value(path: &Path) -> Option<String> {
        fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl Default for ProcDiskDependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskDependencies for ProcDiskDependencies {
    fn refresh_mount_table(&self) -> Result<()> {
        let content = procfs::read_string(&self.proc_root.join("mounts"))?;
        let entries = parse_mount_table(&content);
        trace!("Read {} mount table entries", entries.len());
        *self.mounts.lock().unwrap_or_else(|p| p.into_inner()) = entries;
        Ok(())
    }

    fn mount_table(&self) -> Vec<MountEntry> {
        self.mounts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn file_system_ignored(&self, fs_type: &str) -> bool {
        builtin_file_system_ignored(fs_type)
            || self
                .extra_ignored_fs
                .iter()
                .any(|f| f.eq_ignore_ascii_case(fs_type))
    }

    fn device_ignored(&self, device: &str) -> bool {
        self.ignored_devices.iter().any(|r| r.is_match(device))
    }

    fn statvfs(&self, path: &str) -> Result<FsStats> {
        let c_path = CString::new(path).map_err(|_| PalError::parse("mount point", path))?;

        // SAFETY: c_path is a valid NUL-terminated string and stat is a
        // zeroed out-parameter of the type statvfs expects.
        let stat = unsafe {
            let mut stat: libc::statvfs = mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                let err = std::io::Error::last_os_error();
                return Err(PalError::from_io_path(path, err));
            }
            stat
        };

        Ok(FsStats {
            block_size: stat.f_bsize as u64,
            fragment_size: stat.f_frsize as u64,
            total_blocks: stat.f_blocks as u64,
            free_blocks: stat.f_bfree as u64,
            available_blocks: stat.f_bavail as u64,
            total_inodes: stat.f_files as u64,
            free_inodes: stat.f_ffree as u64,
            available_inodes: stat.f_favail as u64,
            max_filename_len: stat.f_namemax as u64,
            read_only: (stat.f_flag & libc::ST_RDONLY) != 0,
        })
    }

    fn disk_stats(&self, device: &str) -> Result<DiskCounters> {
        let content = procfs::read_string(&self.proc_root.join("diskstats"))?;
        parse_diskstats_line(&content, &kernel_device_name(device))
    }

    fn block_devices(&self) -> Result<Vec<String>> {
        let dir = self.sys_root.join("block");
        let entries = fs::read_dir(&dir)
            .map_err(|e| PalError::from_io_path(&dir.display().to_string(), e))?;

        let mut names: Vec<String> = entries
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| !name.starts_with("loop") && !name.starts_with("ram"))
            .filter(|name| !self.device_ignored(&format!("/dev/{}", name)))
            .collect();
        names.sort();
        debug!("Found {} block devices", names.len());
        Ok(names)
    }

    fn block_device_info(&self, device: &str) -> Result<BlockDeviceInfo> {
        let base = self.sys_block(device);
        let size_path = base.join("size");
        let sectors: u64 = procfs::parse_token(
            procfs::read_string(&size_path)?.trim(),
            "block device size",
        )?;

        Ok(BlockDeviceInfo {
            name: kernel_device_name(device),
            // sysfs reports size in 512-byte units regardless of sector size.
            size_bytes: sectors * 512,
            sector_size: self.sector_size(device),
            removable: Self::read_sys_value(&base.join("removable")).as_deref() == Some("1"),
            model: Self::read_sys_value(&base.join("device").join("model")),
            vendor: Self::read_sys_value(&base.join("device").join("vendor")),
        })
    }

    fn sector_size(&self, device: &str) -> u64 {
        let name = kernel_device_name(device);
        let candidates = [
            self.sys_root
                .join("block")
                .join(&name)
                .join("queue/hw_sector_size"),
            self.sys_root
                .join("class/block")
                .join(&name)
                .join("../queue/hw_sector_size"),
        ];
        candidates
            .iter()
            .filter_map(|p| Self::read_sys_value(p))
            .find_map(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SECTOR_SIZE)
    }
}
