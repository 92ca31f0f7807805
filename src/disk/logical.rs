//! Static logical disks: one instance per mounted local file system.

use std::sync::Arc;

use crate::entity::{base_properties, EntityInstance, InstanceBase};
use crate::error::Result;
use crate::property::PropertySet;

use super::depend::{DiskDependencies, FsStats, MountEntry};

pub struct StaticLogicalDiskInstance {
    base: InstanceBase,
    deps: Arc<dyn DiskDependencies>,
    device: String,
    mount_point: String,
    fs_type: String,
    mounted_read_only: bool,
    stats: Option<FsStats>,
}

impl StaticLogicalDiskInstance {
    pub fn new(deps: Arc<dyn DiskDependencies>, entry: &MountEntry) -> Self {
        Self {
            base: InstanceBase::new(entry.mount_point.clone(), false),
            deps,
            device: entry.device.clone(),
            mount_point: entry.mount_point.clone(),
            fs_type: entry.fs_type.clone(),
            mounted_read_only: entry.is_read_only(),
            stats: None,
        }
    }

    /// Refreshes mount-table derived fields after a remount.
    pub(crate) fn set_mount_entry(&mut self, entry: &MountEntry) {
        self.device = entry.device.clone();
        self.fs_type = entry.fs_type.clone();
        self.mounted_read_only = entry.is_read_only();
    }

    pub fn device_name(&self) -> Option<&str> {
        Some(&self.device)
    }

    pub fn mount_point(&self) -> Option<&str> {
        Some(&self.mount_point)
    }

    pub fn file_system_type(&self) -> Option<&str> {
        Some(&self.fs_type)
    }

    pub fn size_in_bytes(&self) -> Option<u64> {
        self.stats.map(|s| s.size_bytes())
    }

    pub fn available_space_in_bytes(&self) -> Option<u64> {
        self.stats.map(|s| s.available_bytes())
    }

    pub fn block_size(&self) -> Option<u64> {
        self.stats.map(|s| s.block_size)
    }

    /// Total inodes. File systems without an inode limit report zero and
    /// are treated as unsupported.
    pub fn total_inodes(&self) -> Option<u64> {
        self.stats.map(|s| s.total_inodes).filter(|&n| n > 0)
    }

    pub fn available_inodes(&self) -> Option<u64> {
        self.total_inodes()?;
        self.stats.map(|s| s.available_inodes)
    }

    pub fn max_filename_len(&self) -> Option<u64> {
        self.stats.map(|s| s.max_filename_len)
    }

    pub fn is_read_only(&self) -> Option<bool> {
        Some(self.mounted_read_only || self.stats.is_some_and(|s| s.read_only))
    }

    /// Linux does not report compression per file system.
    pub fn compression_method(&self) -> Option<&str> {
        None
    }

    /// Linux does not report encryption per file system.
    pub fn encryption_method(&self) -> Option<&str> {
        None
    }

    pub fn is_healthy(&self) -> Option<bool> {
        Some(self.is_online())
    }
}

impl EntityInstance for StaticLogicalDiskInstance {
    fn base(&self) -> &InstanceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut InstanceBase {
        &mut self.base
    }

    fn update(&mut self) -> Result<()> {
        self.stats = Some(self.deps.statvfs(&self.mount_point)?);
        Ok(())
    }

    fn dump_string(&self) -> String {
        format!(
            "StaticLogicalDiskInstance: Device = {}, MountPoint = {}, FsType = {}, Size = {:?}, \
             Available = {:?}, ReadOnly = {:?}, Online = {}",
            self.device,
            self.mount_point,
            self.fs_type,
            self.size_in_bytes(),
            self.available_space_in_bytes(),
            self.is_read_only(),
            self.is_online()
        )
    }

    fn properties(&self) -> PropertySet {
        let mut set = base_properties(&self.base);
        set.add_optional("DeviceName", self.device_name());
        set.add_optional("MountPoint", self.mount_point());
        set.add_optional("FileSystemType", self.file_system_type());
        set.add_optional("SizeInBytes", self.size_in_bytes());
        set.add_optional("AvailableSpaceInBytes", self.available_space_in_bytes());
        set.add_optional("BlockSize", self.block_size());
        set.add_optional("TotalInodes", self.total_inodes());
        set.add_optional("AvailableInodes", self.available_inodes());
        set.add_optional("MaxFilenameLen", self.max_filename_len());
        set.add_optional("IsReadOnly", self.is_read_only());
        set.add_optional("HealthState", self.is_healthy());
        set
    }
}
