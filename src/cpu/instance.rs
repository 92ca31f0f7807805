//! One logical processor, or the `_Total` row over all of them.
//!
//! Tick counters are pushed by the enumeration's sampling thread. Every
//! percentage is the share of one state in the total ticks elapsed across
//! the sampler window.

use tracing::trace;

use crate::entity::{base_properties, EntityInstance, InstanceBase};
use crate::error::Result;
use crate::property::PropertySet;
use crate::sampler::{percentage, DataSampler};

use super::depend::CpuTicks;

/// Number of tick samples kept per processor.
pub const CPU_SAMPLE_DEPTH: usize = 6;

type TickSampler = DataSampler<u64, CPU_SAMPLE_DEPTH>;

pub struct CpuInstance {
    base: InstanceBase,

    user: TickSampler,
    nice: TickSampler,
    system: TickSampler,
    idle: TickSampler,
    iowait: TickSampler,
    irq: TickSampler,
    softirq: TickSampler,
    total: TickSampler,
}

impl CpuInstance {
    /// A processor row keyed by its number, e.g. `"0"`.
    pub fn new(number: &str) -> Self {
        Self::with_base(InstanceBase::new(number, false))
    }

    pub fn new_total() -> Self {
        Self::with_base(InstanceBase::total())
    }

    fn with_base(base: InstanceBase) -> Self {
        Self {
            base,
            user: TickSampler::new(),
            nice: TickSampler::new(),
            system: TickSampler::new(),
            idle: TickSampler::new(),
            iowait: TickSampler::new(),
            irq: TickSampler::new(),
            softirq: TickSampler::new(),
            total: TickSampler::new(),
        }
    }

    /// Pushes one reading of every counter.
    pub(crate) fn add_ticks(&mut self, ticks: CpuTicks) {
        trace!("CPU '{}' sample: {:?}", self.id(), ticks);
        self.user.add_sample(ticks.user);
        self.nice.add_sample(ticks.nice);
        self.system.add_sample(ticks.system);
        self.idle.add_sample(ticks.idle);
        self.iowait.add_sample(ticks.iowait);
        self.irq.add_sample(ticks.irq);
        self.softirq.add_sample(ticks.softirq);
        self.total.add_sample(ticks.total());
    }

    fn share(&self, sampler: &TickSampler) -> Option<u64> {
        let whole = self.total.delta(CPU_SAMPLE_DEPTH)?;
        if whole == 0 {
            return None;
        }
        let part = sampler.delta(CPU_SAMPLE_DEPTH)?;
        Some(percentage(part as f64, whole as f64).min(100))
    }

    /// Busy time: everything except idle.
    pub fn processor_time(&self) -> Option<u64> {
        self.idle_time().map(|idle| 100 - idle)
    }

    pub fn idle_time(&self) -> Option<u64> {
        self.share(&self.idle)
    }

    pub fn user_time(&self) -> Option<u64> {
        self.share(&self.user)
    }

    pub fn nice_time(&self) -> Option<u64> {
        self.share(&self.nice)
    }

    pub fn privileged_time(&self) -> Option<u64> {
        self.share(&self.system)
    }

    pub fn iowait_time(&self) -> Option<u64> {
        self.share(&self.iowait)
    }

    pub fn interrupt_time(&self) -> Option<u64> {
        self.share(&self.irq)
    }

    /// Soft interrupt (deferred procedure call) time.
    pub fn dpc_time(&self) -> Option<u64> {
        self.share(&self.softirq)
    }

    pub fn sample_count(&self) -> usize {
        self.total.len()
    }
}

impl EntityInstance for CpuInstance {
    fn base(&self) -> &InstanceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut InstanceBase {
        &mut self.base
    }

    /// Counters come from the sampling thread.
    fn update(&mut self) -> Result<()> {
        Ok(())
    }

    fn dump_string(&self) -> String {
        format!(
            "CpuInstance: Name = {}, Samples = {}, Processor = {:?}%, User = {:?}%, \
             Nice = {:?}%, Privileged = {:?}%, IOWait = {:?}%, Interrupt = {:?}%, \
             DPC = {:?}%, Idle = {:?}%, Online = {}",
            self.id(),
            self.sample_count(),
            self.processor_time(),
            self.user_time(),
            self.nice_time(),
            self.privileged_time(),
            self.iowait_time(),
            self.interrupt_time(),
            self.dpc_time(),
            self.idle_time(),
            self.is_online()
        )
    }

    fn properties(&self) -> PropertySet {
        let mut set = base_properties(&self.base);
        set.add_optional("PercentProcessorTime", self.processor_time());
        set.add_optional("PercentIdleTime", self.idle_time());
        set.add_optional("PercentUserTime", self.user_time());
        set.add_optional("PercentNiceTime", self.nice_time());
        set.add_optional("PercentPrivilegedTime", self.privileged_time());
        set.add_optional("PercentIOWaitTime", self.iowait_time());
        set.add_optional("PercentInterruptTime", self.interrupt_time());
        set.add_optional("PercentDPCTime", self.dpc_time());
        set
    }
}
