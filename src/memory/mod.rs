//! Memory enumeration.
//!
//! Memory has no per-item rows: the enumeration holds only the `_Total`
//! instance. Static values (totals, free, swap) are refreshed on `update`,
//! while paging counters are pushed by a background thread every sampling
//! interval.

pub mod depend;
pub mod instance;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::context::PalContext;
use crate::enumeration::{
    apply_update, EntityCollection, Enumeration, KeyNormalization, LogThrottle,
};
use crate::error::Result;
use crate::locks::NamedLock;
use crate::sampling::SamplerSlot;

pub use depend::{MemoryDependencies, ProcMemoryDependencies};
pub use instance::{read_page_counters, MemoryInstance, PageCounters, MEMORY_SAMPLE_DEPTH};

pub struct MemoryEnumeration {
    sampler: SamplerSlot,
    collection: NamedLock<EntityCollection<MemoryInstance>>,
    deps: Arc<dyn MemoryDependencies>,
    interval: Duration,
}

impl MemoryEnumeration {
    pub fn new(ctx: &PalContext, deps: Arc<dyn MemoryDependencies>) -> Self {
        Self::with_interval(ctx, deps, ctx.config().sampling.memory_interval())
    }

    pub fn with_interval(
        ctx: &PalContext,
        deps: Arc<dyn MemoryDependencies>,
        interval: Duration,
    ) -> Self {
        Self {
            sampler: SamplerSlot::new(),
            collection: ctx.create_lock(
                "herakles_pal.memory",
                EntityCollection::new(KeyNormalization::Exact),
            ),
            deps,
            interval,
        }
    }

    /// Starts the paging sampler. The first sample is taken immediately.
    pub fn start_sampling(&self) -> Result<()> {
        let collection = self.collection.clone();
        let deps = self.deps.clone();
        let mut throttle = LogThrottle::new("Memory page sampling", 1);

        self.sampler
            .start("pal-memory-sampler", self.interval, move || {
                // Read outside the lock; only the push happens under it.
                match read_page_counters(deps.as_ref()) {
                    Ok(counters) => {
                        throttle.success();
                        let mut guard = collection.lock();
                        if let Some(total) = guard.total_instance_mut() {
                            total.add_page_sample(counters);
                        }
                    }
                    Err(e) => throttle.failure(&e),
                }
            })
    }

    pub fn is_sampling(&self) -> bool {
        self.sampler.is_running()
    }
}

impl Enumeration for MemoryEnumeration {
    type Instance = MemoryInstance;

    fn collection(&self) -> &NamedLock<EntityCollection<MemoryInstance>> {
        &self.collection
    }

    #[instrument(skip(self))]
    fn init(&self) -> Result<()> {
        {
            let mut guard = self.collection.lock();
            let seconds = self.interval.as_secs().max(1);
            guard.set_total_instance(MemoryInstance::new(self.deps.clone(), seconds));
            self.update_no_lock(&mut guard, true)?;
        }
        self.start_sampling()?;
        info!("Memory enumeration initialized");
        Ok(())
    }

    fn update_no_lock(
        &self,
        collection: &mut EntityCollection<MemoryInstance>,
        update_instances: bool,
    ) -> Result<()> {
        if update_instances {
            if let Some(total) = collection.total_instance_mut() {
                apply_update(total);
            }
        }
        debug!("Memory enumeration updated");
        Ok(())
    }

    fn clean_up(&self) {
        self.sampler.stop();
        self.collection.lock().clean_up();
    }
}

impl Drop for MemoryEnumeration {
    fn drop(&mut self) {
        self.sampler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use std::time::Instant;
    use tempfile::tempdir;

    fn write_proc(dir: &std::path::Path, pages_in: u64) {
        fs::write(
            dir.join("meminfo"),
            "MemTotal: 1000 kB\nMemFree: 200 kB\nBuffers: 100 kB\nCached: 100 kB\n\
             SwapTotal: 500 kB\nSwapFree: 500 kB\n",
        )
        .unwrap();
        fs::write(
            dir.join("vmstat"),
            format!("pgpgin {}\npgpgout 10\n", pages_in),
        )
        .unwrap();
    }

    #[test]
    fn test_init_populates_total_and_samples() {
        let dir = tempdir().expect("Failed to create temp dir");
        write_proc(dir.path(), 100);

        let ctx = PalContext::default();
        let deps = Arc::new(ProcMemoryDependencies::with_root(dir.path()));
        let mem = MemoryEnumeration::with_interval(&ctx, deps, Duration::from_millis(10));
        mem.init().unwrap();

        assert_eq!(mem.size(), 0);
        assert!(mem.is_sampling());
        {
            let guard = mem.lock();
            let total = guard.total_instance().unwrap();
            assert_eq!(total.available_memory(), Some(400 * 1024));
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let samples = mem
                .lock()
                .total_instance()
                .map(|t| t.page_read_history().len())
                .unwrap_or(0);
            if samples >= 2 || Instant::now() > deadline {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(mem.lock().total_instance().unwrap().page_read_history().len() >= 2);

        mem.clean_up();
        assert!(!mem.is_sampling());
        assert!(mem.lock().total_instance().is_none());
    }
}
