//! Statistical disks: I/O rates derived from cumulative kernel counters.
//!
//! The same instance type serves logical disks (keyed by mount point,
//! sampling the counters of the backing device) and physical disks (keyed
//! by kernel device name). Counters are pushed by the enumeration's
//! sampling thread; rates span the whole sampler window.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::entity::{base_properties, EntityInstance, InstanceBase};
use crate::error::Result;
use crate::property::PropertySet;
use crate::sampler::{percentage, DataSampler};

use super::depend::{DiskCounters, DiskDependencies, MountEntry};

/// Number of counter samples kept per disk.
pub const DISK_SAMPLE_DEPTH: usize = 6;

/// Consecutive "device not found" reports logged before going quiet.
pub const MAX_LOGGED_FAILED_FINDS: u32 = 10;

type CounterSampler = DataSampler<u64, DISK_SAMPLE_DEPTH>;

/// Cumulative operations and bytes, as stored in the samplers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoTotals {
    pub reads: u64,
    pub writes: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

impl IoTotals {
    pub fn accumulate(&mut self, other: IoTotals) {
        self.reads += other.reads;
        self.writes += other.writes;
        self.read_bytes += other.read_bytes;
        self.write_bytes += other.write_bytes;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskKind {
    Logical,
    Physical,
}

pub struct StatisticalDiskInstance {
    base: InstanceBase,
    deps: Arc<dyn DiskDependencies>,
    kind: DiskKind,
    device: String,
    mount_point: Option<String>,
    sector_size: u64,

    reads: CounterSampler,
    writes: CounterSampler,
    transfers: CounterSampler,
    read_bytes: CounterSampler,
    write_bytes: CounterSampler,
    total_bytes: CounterSampler,

    // (size, free) in bytes
    space: Option<(u64, u64)>,
    failed_finds: u32,
    // Total row only: running sum of per-disk increments.
    accumulated: IoTotals,
}

impl StatisticalDiskInstance {
    fn build(
        deps: Arc<dyn DiskDependencies>,
        base: InstanceBase,
        kind: DiskKind,
        device: String,
        mount_point: Option<String>,
    ) -> Self {
        let sector_size = if device.is_empty() {
            0
        } else {
            deps.sector_size(&device)
        };
        Self {
            base,
            deps,
            kind,
            device,
            mount_point,
            sector_size,
            reads: CounterSampler::new(),
            writes: CounterSampler::new(),
            transfers: CounterSampler::new(),
            read_bytes: CounterSampler::new(),
            write_bytes: CounterSampler::new(),
            total_bytes: CounterSampler::new(),
            space: None,
            failed_finds: 0,
            accumulated: IoTotals::default(),
        }
    }

    pub fn new_logical(deps: Arc<dyn DiskDependencies>, entry: &MountEntry) -> Self {
        Self::build(
            deps,
            InstanceBase::new(entry.mount_point.clone(), false),
            DiskKind::Logical,
            entry.device.clone(),
            Some(entry.mount_point.clone()),
        )
    }

    pub fn new_physical(deps: Arc<dyn DiskDependencies>, name: &str) -> Self {
        Self::build(
            deps,
            InstanceBase::new(name, false),
            DiskKind::Physical,
            name.to_string(),
            None,
        )
    }

    /// The aggregate row. Its samplers hold a running sum of the per-disk
    /// increments, so disks joining or leaving do not move the counters.
    pub fn new_total(deps: Arc<dyn DiskDependencies>, kind: DiskKind) -> Self {
        Self::build(deps, InstanceBase::total(), kind, String::new(), None)
    }

    pub fn kind(&self) -> DiskKind {
        self.kind
    }

    pub fn device(&self) -> Option<&str> {
        (!self.device.is_empty()).then_some(self.device.as_str())
    }

    pub fn mount_point(&self) -> Option<&str> {
        self.mount_point.as_deref()
    }

    /// Counters of the previous device are dropped on a remount.
    pub(crate) fn set_device(&mut self, device: &str) {
        if self.device != device {
            debug!("Disk '{}' moved from '{}' to '{}'", self.id(), self.device, device);
            self.device = device.to_string();
            self.sector_size = self.deps.sector_size(device);
            self.failed_finds = 0;
            for sampler in [
                &mut self.reads,
                &mut self.writes,
                &mut self.transfers,
                &mut self.read_bytes,
                &mut self.write_bytes,
                &mut self.total_bytes,
            ] {
                sampler.clear();
            }
        }
    }

    /// Pushes one set of raw counters, converting sectors to bytes.
    pub(crate) fn add_counters(&mut self, counters: DiskCounters) {
        self.add_totals(IoTotals {
            reads: counters.reads,
            writes: counters.writes,
            read_bytes: counters.sectors_read * self.sector_size,
            write_bytes: counters.sectors_written * self.sector_size,
        });
    }

    /// Pushes already converted totals. Used directly by the Total row.
    pub(crate) fn add_totals(&mut self, totals: IoTotals) {
        self.reads.add_sample(totals.reads);
        self.writes.add_sample(totals.writes);
        self.transfers.add_sample(totals.reads + totals.writes);
        self.read_bytes.add_sample(totals.read_bytes);
        self.write_bytes.add_sample(totals.write_bytes);
        self.total_bytes
            .add_sample(totals.read_bytes + totals.write_bytes);
    }

    /// Records the outcome of reading this disk's counters. Returns whether
    /// a sample was pushed.
    pub(crate) fn record_sample(&mut self, result: Result<DiskCounters>) -> bool {
        match result {
            Ok(counters) => {
                self.failed_finds = 0;
                trace!("Disk '{}' sample: {:?}", self.id(), counters);
                self.add_counters(counters);
                return true;
            }
            Err(e) if e.is_not_found() => {
                self.failed_finds = self.failed_finds.saturating_add(1);
                if self.failed_finds < MAX_LOGGED_FAILED_FINDS {
                    warn!("Unable to find disk '{}': {}", self.device, e);
                } else if self.failed_finds == MAX_LOGGED_FAILED_FINDS {
                    warn!(
                        "Unable to find disk '{}': {} (suppressing further reports)",
                        self.device, e
                    );
                } else {
                    trace!("Unable to find disk '{}': {}", self.device, e);
                }
            }
            Err(e) => {
                warn!("Failed to sample disk '{}': {}", self.device, e);
                self.base.set_unexpected_error(true);
            }
        }
        false
    }

    /// Growth between the two newest samples. `None` until a second sample
    /// exists; counter resets count as zero.
    pub(crate) fn latest_increment(&self) -> Option<IoTotals> {
        Some(IoTotals {
            reads: self.reads.delta(2)?,
            writes: self.writes.delta(2)?,
            read_bytes: self.read_bytes.delta(2)?,
            write_bytes: self.write_bytes.delta(2)?,
        })
    }

    /// Advances the Total row by the summed increments of this pass.
    pub(crate) fn advance_total(&mut self, increment: IoTotals) {
        self.accumulated.accumulate(increment);
        let totals = self.accumulated;
        self.add_totals(totals);
    }

    pub(crate) fn set_space(&mut self, space: Option<(u64, u64)>) {
        self.space = space;
    }

    pub(crate) fn space(&self) -> Option<(u64, u64)> {
        self.space
    }

    fn per_second(sampler: &CounterSampler) -> Option<u64> {
        sampler
            .rate_per_second(DISK_SAMPLE_DEPTH)
            .map(|r| r.round() as u64)
    }

    pub fn reads_per_second(&self) -> Option<u64> {
        Self::per_second(&self.reads)
    }

    pub fn writes_per_second(&self) -> Option<u64> {
        Self::per_second(&self.writes)
    }

    pub fn transfers_per_second(&self) -> Option<u64> {
        Self::per_second(&self.transfers)
    }

    /// `(read, write)` bytes per second.
    pub fn bytes_per_second(&self) -> Option<(u64, u64)> {
        Some((
            Self::per_second(&self.read_bytes)?,
            Self::per_second(&self.write_bytes)?,
        ))
    }

    pub fn bytes_per_second_total(&self) -> Option<u64> {
        Self::per_second(&self.total_bytes)
    }

    /// `(used, free)` bytes.
    pub fn disk_size(&self) -> Option<(u64, u64)> {
        self.space
            .map(|(size, free)| (size.saturating_sub(free), free))
    }

    pub fn percent_free_space(&self) -> Option<u64> {
        let (size, free) = self.space?;
        Some(percentage(free as f64, size as f64))
    }

    pub fn percent_used_space(&self) -> Option<u64> {
        let (size, free) = self.space?;
        Some(percentage(size.saturating_sub(free) as f64, size as f64))
    }

    /// Average read and write times are not exposed by Linux diskstats in a
    /// comparable form.
    pub fn io_times(&self) -> Option<(f64, f64)> {
        None
    }

    pub fn io_times_total(&self) -> Option<f64> {
        None
    }

    pub fn disk_queue_length(&self) -> Option<f64> {
        None
    }

    pub fn sample_count(&self) -> usize {
        self.reads.len()
    }
}

impl EntityInstance for StatisticalDiskInstance {
    fn base(&self) -> &InstanceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut InstanceBase {
        &mut self.base
    }

    /// Refreshes space usage. Counters come from the sampling thread.
    fn update(&mut self) -> Result<()> {
        if self.base.is_total() {
            return Ok(());
        }
        match (self.kind, self.mount_point.as_deref()) {
            (DiskKind::Logical, Some(mount_point)) => {
                let stats = self.deps.statvfs(mount_point)?;
                self.space = Some((stats.size_bytes(), stats.available_bytes()));
            }
            (DiskKind::Physical, _) => {
                // Fails with NotFound once the device is detached.
                self.deps.block_device_info(&self.device)?;
            }
            (DiskKind::Logical, None) => {}
        }
        Ok(())
    }

    fn dump_string(&self) -> String {
        format!(
            "StatisticalDiskInstance: Name = {}, Device = {}, Kind = {:?}, Samples = {}, \
             Reads/s = {:?}, Writes/s = {:?}, Bytes/s = {:?}, Online = {}",
            self.id(),
            self.device,
            self.kind,
            self.sample_count(),
            self.reads_per_second(),
            self.writes_per_second(),
            self.bytes_per_second_total(),
            self.is_online()
        )
    }

    fn properties(&self) -> PropertySet {
        let mut set = base_properties(&self.base);
        set.add_optional("Device", self.device());
        set.add_optional("MountPoint", self.mount_point());
        set.add_optional("ReadsPerSecond", self.reads_per_second());
        set.add_optional("WritesPerSecond", self.writes_per_second());
        set.add_optional("TransfersPerSecond", self.transfers_per_second());
        if let Some((read, write)) = self.bytes_per_second() {
            set.add_optional("ReadBytesPerSecond", Some(read));
            set.add_optional("WriteBytesPerSecond", Some(write));
        }
        set.add_optional("BytesPerSecondTotal", self.bytes_per_second_total());
        set.add_optional("PercentFreeSpace", self.percent_free_space());
        set.add_optional("PercentUsedSpace", self.percent_used_space());
        set
    }
}
