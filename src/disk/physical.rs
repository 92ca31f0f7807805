//! Static physical disks: one instance per whole block device.

use std::sync::Arc;

use crate::entity::{base_properties, EntityInstance, InstanceBase};
use crate::error::Result;
use crate::property::PropertySet;

use super::depend::{BlockDeviceInfo, DiskDependencies};

pub struct StaticPhysicalDiskInstance {
    base: InstanceBase,
    deps: Arc<dyn DiskDependencies>,
    info: Option<BlockDeviceInfo>,
}

impl StaticPhysicalDiskInstance {
    /// `name` is the kernel device name, e.g. `sda` or `nvme0n1`.
    pub fn new(deps: Arc<dyn DiskDependencies>, name: &str) -> Self {
        Self {
            base: InstanceBase::new(name, false),
            deps,
            info: None,
        }
    }

    pub fn disk_name(&self) -> Option<&str> {
        Some(self.id())
    }

    pub fn disk_device(&self) -> Option<String> {
        Some(format!("/dev/{}", self.id()))
    }

    pub fn size_in_bytes(&self) -> Option<u64> {
        self.info.as_ref().map(|i| i.size_bytes)
    }

    pub fn sector_size(&self) -> Option<u64> {
        self.info.as_ref().map(|i| i.sector_size)
    }

    pub fn total_sectors(&self) -> Option<u64> {
        let info = self.info.as_ref()?;
        (info.sector_size > 0).then(|| info.size_bytes / info.sector_size)
    }

    pub fn is_removable(&self) -> Option<bool> {
        self.info.as_ref().map(|i| i.removable)
    }

    pub fn model(&self) -> Option<&str> {
        self.info.as_ref()?.model.as_deref()
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.info.as_ref()?.vendor.as_deref()
    }

    /// Disk geometry is meaningless for modern Linux block devices.
    pub fn total_cylinders(&self) -> Option<u64> {
        None
    }

    pub fn total_heads(&self) -> Option<u64> {
        None
    }

    pub fn is_healthy(&self) -> Option<bool> {
        Some(self.is_online())
    }
}

impl EntityInstance for StaticPhysicalDiskInstance {
    fn base(&self) -> &InstanceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut InstanceBase {
        &mut self.base
    }

    fn update(&mut self) -> Result<()> {
        self.info = Some(self.deps.block_device_info(self.base.id())?);
        Ok(())
    }

    fn dump_string(&self) -> String {
        format!(
            "StaticPhysicalDiskInstance: Name = {}, Size = {:?}, SectorSize = {:?}, Model = {:?}, Online = {}",
            self.id(),
            self.size_in_bytes(),
            self.sector_size(),
            self.model(),
            self.is_online()
        )
    }

    fn properties(&self) -> PropertySet {
        let mut set = base_properties(&self.base);
        set.add_optional("DiskDevice", self.disk_device());
        set.add_optional("SizeInBytes", self.size_in_bytes());
        set.add_optional("SectorSize", self.sector_size());
        set.add_optional("TotalSectors", self.total_sectors());
        set.add_optional("Removable", self.is_removable());
        set.add_optional("Model", self.model());
        set.add_optional("Manufacturer", self.manufacturer());
        set.add_optional("HealthState", self.is_healthy());
        set
    }
}
