//! The memory instance: a single `_Total` row describing physical memory
//! and swap, plus page traffic rates sampled in the background.

use std::sync::Arc;
use tracing::trace;

use crate::entity::{base_properties, EntityInstance, InstanceBase};
use crate::error::{PalError, Result};
use crate::procfs;
use crate::property::PropertySet;
use crate::sampler::DataSampler;

use super::depend::MemoryDependencies;

/// Number of page counter samples kept for rate computation.
pub const MEMORY_SAMPLE_DEPTH: usize = 6;

pub type PageSampler = DataSampler<u64, MEMORY_SAMPLE_DEPTH>;

/// Cumulative paging counters read from `/proc/vmstat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCounters {
    pub pages_in: u64,
    pub pages_out: u64,
}

/// Reads `pgpgin`/`pgpgout` through `deps`.
pub fn read_page_counters(deps: &dyn MemoryDependencies) -> Result<PageCounters> {
    let lines = deps.vmstat_lines()?;
    let pages_in = procfs::find_value(&lines, "pgpgin")
        .ok_or_else(|| PalError::parse("pgpgin", "/proc/vmstat"))?;
    let pages_out = procfs::find_value(&lines, "pgpgout")
        .ok_or_else(|| PalError::parse("pgpgout", "/proc/vmstat"))?;
    Ok(PageCounters {
        pages_in,
        pages_out,
    })
}

pub struct MemoryInstance {
    base: InstanceBase,
    deps: Arc<dyn MemoryDependencies>,
    seconds_per_sample: u64,

    total_physical: u64,
    available: u64,
    used: u64,
    total_swap: u64,
    available_swap: u64,
    used_swap: u64,

    page_reads: PageSampler,
    page_writes: PageSampler,
}

impl MemoryInstance {
    /// Creates the Total row. `seconds_per_sample` is the sampling period,
    /// used to turn per-sample deltas into per-second rates.
    pub fn new(deps: Arc<dyn MemoryDependencies>, seconds_per_sample: u64) -> Self {
        Self {
            base: InstanceBase::total(),
            deps,
            seconds_per_sample: seconds_per_sample.max(1),
            total_physical: 0,
            available: 0,
            used: 0,
            total_swap: 0,
            available_swap: 0,
            used_swap: 0,
            page_reads: PageSampler::new(),
            page_writes: PageSampler::new(),
        }
    }

    /// Pushes one paging sample. Called by the sampling thread.
    pub(crate) fn add_page_sample(&mut self, counters: PageCounters) {
        trace!(
            "Memory page sample: in={} out={}",
            counters.pages_in,
            counters.pages_out
        );
        self.page_reads.add_sample(counters.pages_in);
        self.page_writes.add_sample(counters.pages_out);
    }

    /// Total physical memory in bytes.
    pub fn total_physical_memory(&self) -> Option<u64> {
        Some(self.total_physical)
    }

    /// Free memory plus buffers and page cache, in bytes.
    pub fn available_memory(&self) -> Option<u64> {
        Some(self.available)
    }

    pub fn used_memory(&self) -> Option<u64> {
        Some(self.used)
    }

    /// Memory reserved by the kernel. Not reported by Linux.
    pub fn reserved_memory(&self) -> Option<u64> {
        None
    }

    pub fn total_swap(&self) -> Option<u64> {
        Some(self.total_swap)
    }

    pub fn available_swap(&self) -> Option<u64> {
        Some(self.available_swap)
    }

    pub fn used_swap(&self) -> Option<u64> {
        Some(self.used_swap)
    }

    /// Pages read from disk per second, averaged over the sampler window.
    pub fn page_reads(&self) -> Option<u64> {
        self.page_reads
            .average_delta(MEMORY_SAMPLE_DEPTH)
            .map(|d| d / self.seconds_per_sample)
    }

    /// Pages written to disk per second, averaged over the sampler window.
    pub fn page_writes(&self) -> Option<u64> {
        self.page_writes
            .average_delta(MEMORY_SAMPLE_DEPTH)
            .map(|d| d / self.seconds_per_sample)
    }

    pub fn page_read_history(&self) -> Vec<u64> {
        self.page_reads.history()
    }

    pub fn page_write_history(&self) -> Vec<u64> {
        self.page_writes.history()
    }
}

fn required(lines: &[String], key: &str) -> Result<u64> {
    procfs::find_value::<u64>(lines, key)
        .map(|kb| kb * 1024)
        .ok_or_else(|| PalError::parse(key.trim_end_matches(':'), "/proc/meminfo"))
}

impl EntityInstance for MemoryInstance {
    fn base(&self) -> &InstanceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut InstanceBase {
        &mut self.base
    }

    fn update(&mut self) -> Result<()> {
        let lines = self.deps.meminfo_lines()?;

        let total = required(&lines, "MemTotal:")?;
        let free = required(&lines, "MemFree:")?;
        let total_swap = required(&lines, "SwapTotal:")?;
        let free_swap = required(&lines, "SwapFree:")?;
        let buffers = procfs::find_value::<u64>(&lines, "Buffers:").unwrap_or(0) * 1024;
        let cached = procfs::find_value::<u64>(&lines, "Cached:").unwrap_or(0) * 1024;

        self.total_physical = total;
        self.available = free + buffers + cached;
        self.used = total.saturating_sub(self.available);
        self.total_swap = total_swap;
        self.available_swap = free_swap;
        self.used_swap = total_swap.saturating_sub(free_swap);
        Ok(())
    }

    fn dump_string(&self) -> String {
        format!(
            "MemoryInstance: totalPhysicalMemory = {}, availableMemory = {}, usedMemory = {}, \
             totalSwap = {}, availableSwap = {}, usedSwap = {}, pageReads = {:?}, pageWrites = {:?}",
            self.total_physical,
            self.available,
            self.used,
            self.total_swap,
            self.available_swap,
            self.used_swap,
            self.page_reads(),
            self.page_writes()
        )
    }

    fn properties(&self) -> PropertySet {
        let mut set = base_properties(&self.base);
        set.add_optional("TotalPhysicalMemory", self.total_physical_memory());
        set.add_optional("AvailableMemory", self.available_memory());
        set.add_optional("UsedMemory", self.used_memory());
        set.add_optional("ReservedMemory", self.reserved_memory());
        set.add_optional("TotalSwap", self.total_swap());
        set.add_optional("AvailableSwap", self.available_swap());
        set.add_optional("UsedSwap", self.used_swap());
        set.add_optional("PagesReadPerSec", self.page_reads());
        set.add_optional("PagesWrittenPerSec", self.page_writes());
        set
    }
}
