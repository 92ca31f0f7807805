//! CPU enumeration.
//!
//! One instance per logical processor plus a `_Total` row fed by the
//! aggregate `cpu` line of `/proc/stat`. Processors are discovered on
//! `update`; tick counters are pushed by a background thread every sampling
//! interval. Processors that go offline are kept, offline, unless the purge
//! policy says otherwise.

pub mod depend;
pub mod instance;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, trace};

use crate::context::PalContext;
use crate::entity::EntityInstance;
use crate::enumeration::{
    reconcile, EntityCollection, Enumeration, KeyNormalization, LogThrottle, PurgePolicy,
};
use crate::error::Result;
use crate::locks::NamedLock;
use crate::sampling::SamplerSlot;

pub use depend::{
    count_physical_processors, parse_stat, CpuDependencies, CpuRow, CpuTicks,
    ProcCpuDependencies,
};
pub use instance::{CpuInstance, CPU_SAMPLE_DEPTH};

type CpuCollection = NamedLock<EntityCollection<CpuInstance>>;

/// State shared between the enumeration and its sampling thread.
#[derive(Clone)]
struct CpuShared {
    collection: CpuCollection,
    deps: Arc<dyn CpuDependencies>,
    policy: PurgePolicy,
}

impl CpuShared {
    fn read(&self) -> Result<Vec<(CpuRow, CpuTicks)>> {
        parse_stat(&self.deps.stat_lines()?)
    }

    fn apply(
        &self,
        collection: &mut EntityCollection<CpuInstance>,
        rows: Vec<(CpuRow, CpuTicks)>,
        update_instances: bool,
    ) {
        let processors = rows.into_iter().filter_map(|(row, _)| match row {
            CpuRow::Processor(number) => Some((number, ())),
            CpuRow::Total => None,
        });
        reconcile(
            collection,
            processors,
            self.policy,
            update_instances,
            |_, _| {},
            |number, _| Some(CpuInstance::new(number)),
        );
    }

    /// One sampling pass: `/proc/stat` is read without the lock held. Rows
    /// of processors not yet discovered are skipped.
    fn sample(&self) -> Result<()> {
        let rows = self.read()?;
        let mut guard = self.collection.lock();
        for (row, ticks) in rows {
            let instance = match &row {
                CpuRow::Total => guard.total_instance_mut(),
                CpuRow::Processor(number) => guard.get_instance_mut(number),
            };
            match instance {
                Some(instance) => instance.add_ticks(ticks),
                None => trace!("No instance for {:?} yet", row),
            }
        }
        Ok(())
    }
}

pub struct CpuEnumeration {
    sampler: SamplerSlot,
    shared: CpuShared,
    interval: Duration,
}

impl CpuEnumeration {
    pub fn new(ctx: &PalContext, deps: Arc<dyn CpuDependencies>) -> Self {
        Self {
            sampler: SamplerSlot::new(),
            shared: CpuShared {
                collection: ctx.create_lock(
                    "herakles_pal.cpu",
                    EntityCollection::new(KeyNormalization::Exact),
                ),
                deps,
                policy: ctx.config().cpu_policy(),
            },
            interval: ctx.config().sampling.cpu_interval(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_policy(mut self, policy: PurgePolicy) -> Self {
        self.shared.policy = policy;
        self
    }

    /// Takes one tick sample in the calling thread.
    pub fn sample_now(&self) -> Result<()> {
        self.shared.sample()
    }

    /// Starts the background thread. The first sample is taken immediately.
    pub fn start_sampling(&self) -> Result<()> {
        let shared = self.shared.clone();
        let mut throttle = LogThrottle::new("CPU sampling", 1);

        self.sampler
            .start("pal-cpu-sampler", self.interval, move || match shared.sample() {
                Ok(()) => throttle.success(),
                Err(e) => throttle.failure(&e),
            })
    }

    pub fn is_sampling(&self) -> bool {
        self.sampler.is_running()
    }

    /// Online logical processors.
    pub fn processor_count_logical(&self) -> usize {
        self.lock().iter().filter(|cpu| cpu.is_online()).count()
    }

    /// Populated sockets, or zero when `/proc/cpuinfo` does not say.
    pub fn processor_count_physical(&self) -> Result<usize> {
        Ok(count_physical_processors(&self.shared.deps.cpuinfo_lines()?))
    }
}

impl Enumeration for CpuEnumeration {
    type Instance = CpuInstance;

    fn collection(&self) -> &CpuCollection {
        &self.shared.collection
    }

    #[instrument(skip(self))]
    fn init(&self) -> Result<()> {
        self.shared
            .collection
            .lock()
            .set_total_instance(CpuInstance::new_total());
        self.update(false)?;
        self.start_sampling()?;
        info!("CPU enumeration initialized with {} processors", self.size());
        Ok(())
    }

    /// Reads `/proc/stat` first and takes the lock only to reconcile.
    fn update(&self, update_instances: bool) -> Result<()> {
        let rows = self.shared.read()?;
        let mut guard = self.shared.collection.lock();
        self.shared.apply(&mut guard, rows, update_instances);
        debug!("CPU enumeration updated, {} processors", guard.size());
        Ok(())
    }

    fn update_no_lock(
        &self,
        collection: &mut EntityCollection<CpuInstance>,
        update_instances: bool,
    ) -> Result<()> {
        let rows = self.shared.read()?;
        self.shared.apply(collection, rows, update_instances);
        Ok(())
    }

    fn clean_up(&self) {
        self.sampler.stop();
        self.shared.collection.lock().clean_up();
    }
}

impl Drop for CpuEnumeration {
    fn drop(&mut self) {
        self.sampler.stop();
    }
}
