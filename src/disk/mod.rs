//! Disk enumerations.
//!
//! Four collections share one dependency object:
//!
//! - static logical disks, keyed by mount point,
//! - static physical disks, keyed by kernel device name,
//! - statistical logical and physical disks, whose I/O counters are pushed
//!   by a background sampling thread.
//!
//! Disks are retained offline by default when they disappear so that the
//! enumeration order stays stable across unmount/remount.

pub mod depend;
pub mod logical;
pub mod physical;
pub mod statistical;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::context::PalContext;
use crate::entity::EntityInstance;
use crate::enumeration::{
    reconcile, EntityCollection, Enumeration, KeyNormalization, LogThrottle, PurgePolicy,
};
use crate::error::Result;
use crate::locks::NamedLock;
use crate::sampling::SamplerSlot;

pub use depend::{
    BlockDeviceInfo, DiskCounters, DiskDependencies, FsStats, MountEntry, ProcDiskDependencies,
};
pub use logical::StaticLogicalDiskInstance;
pub use physical::StaticPhysicalDiskInstance;
pub use statistical::{DiskKind, IoTotals, StatisticalDiskInstance, DISK_SAMPLE_DEPTH};

/// Refreshes the mount table and returns the local disk mounts, keyed by
/// mount point.
pub fn discover_mounts(deps: &dyn DiskDependencies) -> Result<Vec<(String, MountEntry)>> {
    deps.refresh_mount_table()?;
    Ok(deps
        .mount_table()
        .into_iter()
        .filter(|e| !deps.file_system_ignored(&e.fs_type))
        .filter(|e| !deps.device_ignored(&e.device))
        .map(|e| (e.mount_point.clone(), e))
        .collect())
}

/// Whole disks, keyed by kernel name.
pub fn discover_block_devices(deps: &dyn DiskDependencies) -> Result<Vec<(String, ())>> {
    Ok(deps
        .block_devices()?
        .into_iter()
        .filter(|name| !deps.device_ignored(&format!("/dev/{}", name)))
        .map(|name| (name, ()))
        .collect())
}

pub struct StaticLogicalDiskEnumeration {
    collection: NamedLock<EntityCollection<StaticLogicalDiskInstance>>,
    deps: Arc<dyn DiskDependencies>,
    policy: PurgePolicy,
}

impl StaticLogicalDiskEnumeration {
    pub fn new(ctx: &PalContext, deps: Arc<dyn DiskDependencies>) -> Self {
        Self {
            collection: ctx.create_lock(
                "herakles_pal.disk.static_logical",
                EntityCollection::new(KeyNormalization::Exact),
            ),
            deps,
            policy: ctx.config().disk_policy(),
        }
    }

    pub fn with_policy(mut self, policy: PurgePolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Enumeration for StaticLogicalDiskEnumeration {
    type Instance = StaticLogicalDiskInstance;

    fn collection(&self) -> &NamedLock<EntityCollection<StaticLogicalDiskInstance>> {
        &self.collection
    }

    #[instrument(skip(self, collection))]
    fn update_no_lock(
        &self,
        collection: &mut EntityCollection<StaticLogicalDiskInstance>,
        update_instances: bool,
    ) -> Result<()> {
        let mounts = discover_mounts(self.deps.as_ref())?;
        let deps = self.deps.clone();
        reconcile(
            collection,
            mounts,
            self.policy,
            update_instances,
            |instance, entry| instance.set_mount_entry(&entry),
            |_, entry| Some(StaticLogicalDiskInstance::new(deps.clone(), &entry)),
        );
        Ok(())
    }
}

pub struct StaticPhysicalDiskEnumeration {
    collection: NamedLock<EntityCollection<StaticPhysicalDiskInstance>>,
    deps: Arc<dyn DiskDependencies>,
    policy: PurgePolicy,
}

impl StaticPhysicalDiskEnumeration {
    pub fn new(ctx: &PalContext, deps: Arc<dyn DiskDependencies>) -> Self {
        Self {
            collection: ctx.create_lock(
                "herakles_pal.disk.static_physical",
                EntityCollection::new(KeyNormalization::CaseInsensitive),
            ),
            deps,
            policy: ctx.config().disk_policy(),
        }
    }

    pub fn with_policy(mut self, policy: PurgePolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Enumeration for StaticPhysicalDiskEnumeration {
    type Instance = StaticPhysicalDiskInstance;

    fn collection(&self) -> &NamedLock<EntityCollection<StaticPhysicalDiskInstance>> {
        &self.collection
    }

    #[instrument(skip(self, collection))]
    fn update_no_lock(
        &self,
        collection: &mut EntityCollection<StaticPhysicalDiskInstance>,
        update_instances: bool,
    ) -> Result<()> {
        let devices = discover_block_devices(self.deps.as_ref())?;
        let deps = self.deps.clone();
        reconcile(
            collection,
            devices,
            self.policy,
            update_instances,
            |_, _| {},
            |name, _| Some(StaticPhysicalDiskInstance::new(deps.clone(), name)),
        );
        Ok(())
    }
}

type StatisticalCollection = NamedLock<EntityCollection<StatisticalDiskInstance>>;

/// State shared between a statistical enumeration and its sampling thread.
#[derive(Clone)]
struct StatisticalShared {
    collection: StatisticalCollection,
    deps: Arc<dyn DiskDependencies>,
    kind: DiskKind,
    policy: PurgePolicy,
}

impl StatisticalShared {
    fn reconcile_no_lock(
        &self,
        collection: &mut EntityCollection<StatisticalDiskInstance>,
        update_instances: bool,
    ) -> Result<()> {
        let deps = self.deps.clone();
        match self.kind {
            DiskKind::Logical => {
                let mounts = discover_mounts(self.deps.as_ref())?;
                reconcile(
                    collection,
                    mounts,
                    self.policy,
                    update_instances,
                    |instance, entry| instance.set_device(&entry.device),
                    |_, entry| Some(StatisticalDiskInstance::new_logical(deps.clone(), &entry)),
                );
            }
            DiskKind::Physical => {
                let devices = discover_block_devices(self.deps.as_ref())?;
                reconcile(
                    collection,
                    devices,
                    self.policy,
                    update_instances,
                    |_, _| {},
                    |name, _| Some(StatisticalDiskInstance::new_physical(deps.clone(), name)),
                );
            }
        }

        let space = collection
            .iter()
            .filter(|i| i.is_online())
            .filter_map(|i| i.space())
            .fold(None, |acc: Option<(u64, u64)>, (size, free)| {
                let (s, f) = acc.unwrap_or((0, 0));
                Some((s + size, f + free))
            });
        if let Some(total) = collection.total_instance_mut() {
            total.set_space(space);
        }
        Ok(())
    }

    /// One sampling pass: counters are read without the lock held, then
    /// pushed to the instances under it. The Total row advances by the sum
    /// of this pass's per-disk increments.
    fn sample(&self) {
        let targets: Vec<(String, String)> = {
            let guard = self.collection.lock();
            guard
                .iter()
                .filter(|i| i.is_online())
                .filter_map(|i| Some((i.id().to_string(), i.device()?.to_string())))
                .collect()
        };

        let readings: Vec<(String, Result<DiskCounters>)> = targets
            .into_iter()
            .map(|(id, device)| {
                let result = self.deps.disk_stats(&device);
                (id, result)
            })
            .collect();

        let mut guard = self.collection.lock();
        let mut increment = IoTotals::default();
        let mut sampled = 0;
        for (id, result) in readings {
            let Some(instance) = guard.get_instance_mut(&id) else {
                continue;
            };
            if instance.record_sample(result) {
                sampled += 1;
                // A disk's first sample only sets its baseline.
                if let Some(growth) = instance.latest_increment() {
                    increment.accumulate(growth);
                }
            }
        }
        if sampled > 0 {
            if let Some(total) = guard.total_instance_mut() {
                total.advance_total(increment);
            }
        }
    }
}

/// Statistical disks of one flavour.
pub struct StatisticalDiskEnumeration {
    sampler: SamplerSlot,
    shared: StatisticalShared,
    interval: Duration,
}

impl StatisticalDiskEnumeration {
    pub fn new_logical(ctx: &PalContext, deps: Arc<dyn DiskDependencies>) -> Self {
        Self::new(ctx, deps, DiskKind::Logical)
    }

    pub fn new_physical(ctx: &PalContext, deps: Arc<dyn DiskDependencies>) -> Self {
        Self::new(ctx, deps, DiskKind::Physical)
    }

    fn new(ctx: &PalContext, deps: Arc<dyn DiskDependencies>, kind: DiskKind) -> Self {
        let (name, normalization) = match kind {
            DiskKind::Logical => ("herakles_pal.disk.statistical_logical", KeyNormalization::Exact),
            DiskKind::Physical => (
                "herakles_pal.disk.statistical_physical",
                KeyNormalization::CaseInsensitive,
            ),
        };
        Self {
            sampler: SamplerSlot::new(),
            shared: StatisticalShared {
                collection: ctx.create_lock(name, EntityCollection::new(normalization)),
                deps,
                kind,
                policy: ctx.config().disk_policy(),
            },
            interval: ctx.config().sampling.disk_interval(),
        }
    }

    pub fn with_policy(mut self, policy: PurgePolicy) -> Self {
        self.shared.policy = policy;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn kind(&self) -> DiskKind {
        self.shared.kind
    }

    /// Takes one counter sample of every online disk in the calling thread.
    pub fn sample_now(&self) {
        self.shared.sample();
    }

    /// Starts the background thread: rediscover, then sample, every interval.
    pub fn start_sampling(&self) -> Result<()> {
        let shared = self.shared.clone();
        let mut throttle = LogThrottle::new("Disk discovery", 1);
        let name = match self.shared.kind {
            DiskKind::Logical => "pal-disk-logical-sampler",
            DiskKind::Physical => "pal-disk-physical-sampler",
        };

        self.sampler.start(name, self.interval, move || {
            let discovered = {
                let mut guard = shared.collection.lock();
                shared.reconcile_no_lock(&mut guard, true)
            };
            match discovered {
                Ok(()) => throttle.success(),
                Err(e) => throttle.failure(&e),
            }
            shared.sample();
        })
    }

    pub fn is_sampling(&self) -> bool {
        self.sampler.is_running()
    }
}

impl Enumeration for StatisticalDiskEnumeration {
    type Instance = StatisticalDiskInstance;

    fn collection(&self) -> &StatisticalCollection {
        &self.shared.collection
    }

    #[instrument(skip(self), fields(kind = ?self.shared.kind))]
    fn init(&self) -> Result<()> {
        {
            let mut guard = self.shared.collection.lock();
            guard.set_total_instance(StatisticalDiskInstance::new_total(
                self.shared.deps.clone(),
                self.shared.kind,
            ));
            self.update_no_lock(&mut guard, false)?;
            debug!("Found {} {:?} disks", guard.size(), self.shared.kind);
        }
        self.start_sampling()?;
        info!("Statistical {:?} disk enumeration initialized", self.shared.kind);
        Ok(())
    }

    fn update_no_lock(
        &self,
        collection: &mut EntityCollection<StatisticalDiskInstance>,
        update_instances: bool,
    ) -> Result<()> {
        self.shared.reconcile_no_lock(collection, update_instances)
    }

    fn clean_up(&self) {
        self.sampler.stop();
        self.shared.collection.lock().clean_up();
    }
}

impl Drop for StatisticalDiskEnumeration {
    fn drop(&mut self) {
        self.sampler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PalError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeDisks {
        mounts: Mutex<Vec<MountEntry>>,
        counters: Mutex<Vec<(String, DiskCounters)>>,
    }

    impl FakeDisks {
        fn mount(&self, device: &str, mount_point: &str, fs: &str) {
            self.mounts.lock().unwrap().push(MountEntry {
                device: device.into(),
                mount_point: mount_point.into(),
                fs_type: fs.into(),
                options: vec!["rw".into()],
            });
        }

        fn unmount(&self, mount_point: &str) {
            self.mounts
                .lock()
                .unwrap()
                .retain(|m| m.mount_point != mount_point);
        }

        fn set_counters(&self, device: &str, reads: u64, sectors: u64) {
            let mut c = self.counters.lock().unwrap();
            c.retain(|(d, _)| d != device);
            c.push((
                device.into(),
                DiskCounters {
                    reads,
                    writes: reads / 2,
                    sectors_read: sectors,
                    sectors_written: sectors,
                },
            ));
        }
    }

    impl DiskDependencies for FakeDisks {
        fn refresh_mount_table(&self) -> Result<()> {
            Ok(())
        }
        fn mount_table(&self) -> Vec<MountEntry> {
            self.mounts.lock().unwrap().clone()
        }
        fn file_system_ignored(&self, fs_type: &str) -> bool {
            depend::builtin_file_system_ignored(fs_type)
        }
        fn device_ignored(&self, _device: &str) -> bool {
            false
        }
        fn statvfs(&self, path: &str) -> Result<FsStats> {
            if !self.mounts.lock().unwrap().iter().any(|m| m.mount_point == path) {
                return Err(PalError::not_found(path));
            }
            Ok(FsStats {
                block_size: 4096,
                fragment_size: 4096,
                total_blocks: 100,
                free_blocks: 30,
                available_blocks: 25,
                total_inodes: 1000,
                free_inodes: 900,
                available_inodes: 900,
                max_filename_len: 255,
                read_only: false,
            })
        }
        fn disk_stats(&self, device: &str) -> Result<DiskCounters> {
            self.counters
                .lock()
                .unwrap()
                .iter()
                .find(|(d, _)| d == device)
                .map(|(_, c)| *c)
                .ok_or_else(|| PalError::not_found(device))
        }
        fn block_devices(&self) -> Result<Vec<String>> {
            Ok(vec!["sda".into(), "SDB".into()])
        }
        fn block_device_info(&self, device: &str) -> Result<BlockDeviceInfo> {
            Ok(BlockDeviceInfo {
                name: device.into(),
                size_bytes: 1 << 30,
                sector_size: 512,
                ..BlockDeviceInfo::default()
            })
        }
        fn sector_size(&self, _device: &str) -> u64 {
            512
        }
    }

    fn fake() -> Arc<FakeDisks> {
        let deps = Arc::new(FakeDisks::default());
        deps.mount("/dev/sda1", "/", "ext4");
        deps.mount("/dev/sda2", "/home", "xfs");
        deps.mount("proc", "/proc", "proc");
        deps
    }

    #[test]
    fn test_static_logical_skips_ignored_and_retains_offline() {
        let ctx = PalContext::default();
        let deps = fake();
        let disks = StaticLogicalDiskEnumeration::new(&ctx, deps.clone());
        disks.init().unwrap();
        disks.update(true).unwrap();

        {
            let guard = disks.lock();
            assert_eq!(guard.size(), 2);
            let root = guard.get_instance("/").unwrap();
            assert_eq!(root.size_in_bytes(), Some(409600));
            assert_eq!(root.available_space_in_bytes(), Some(25 * 4096));
            assert_eq!(root.compression_method(), None);
        }

        deps.unmount("/home");
        disks.update(true).unwrap();
        let guard = disks.lock();
        assert_eq!(guard.size(), 2);
        assert!(!guard.get_instance("/home").unwrap().is_online());
        assert!(guard.get_instance("/").unwrap().is_online());
    }

    #[test]
    fn test_static_physical_case_insensitive_keys() {
        let ctx = PalContext::default();
        let disks = StaticPhysicalDiskEnumeration::new(&ctx, fake());
        disks.init().unwrap();
        disks.update(true).unwrap();
        let guard = disks.lock();
        assert_eq!(guard.size(), 2);
        assert!(guard.get_instance("sdb").is_some());
        assert_eq!(guard.get_instance("sda").unwrap().size_in_bytes(), Some(1 << 30));
    }

    #[test]
    fn test_statistical_logical_rates_and_total() {
        let ctx = PalContext::default();
        let deps = fake();
        deps.set_counters("/dev/sda1", 100, 1000);
        deps.set_counters("/dev/sda2", 10, 100);

        let disks = StatisticalDiskEnumeration::new_logical(&ctx, deps.clone());
        {
            let mut guard = disks.lock();
            guard.set_total_instance(StatisticalDiskInstance::new_total(
                deps.clone(),
                DiskKind::Logical,
            ));
        }
        disks.update(true).unwrap();

        disks.sample_now();
        {
            let guard = disks.lock();
            assert_eq!(guard.get_instance("/").unwrap().reads_per_second(), None);
        }

        std::thread::sleep(Duration::from_millis(50));
        deps.set_counters("/dev/sda1", 200, 2000);
        disks.sample_now();

        let guard = disks.lock();
        let root = guard.get_instance("/").unwrap();
        assert!(root.reads_per_second().unwrap() > 0);
        assert_eq!(root.percent_free_space(), Some(25));
        assert_eq!(root.percent_used_space(), Some(75));
        assert_eq!(root.io_times(), None);
        assert_eq!(root.disk_queue_length(), None);

        let home = guard.get_instance("/home").unwrap();
        assert_eq!(home.reads_per_second(), Some(0));

        let total = guard.total_instance().unwrap();
        assert_eq!(total.sample_count(), 2);
        assert!(total.reads_per_second().unwrap() > 0);
        assert_eq!(total.percent_free_space(), Some(25));
    }

    fn statistical_with_total(deps: &Arc<FakeDisks>) -> StatisticalDiskEnumeration {
        let disks = StatisticalDiskEnumeration::new_logical(&PalContext::default(), deps.clone());
        disks.lock().set_total_instance(StatisticalDiskInstance::new_total(
            deps.clone(),
            DiskKind::Logical,
        ));
        disks
    }

    #[test]
    fn test_total_ignores_counters_of_newly_mounted_disk() {
        let deps = Arc::new(FakeDisks::default());
        deps.mount("/dev/sda1", "/", "ext4");
        deps.set_counters("/dev/sda1", 100, 1000);
        let disks = statistical_with_total(&deps);
        disks.update(false).unwrap();

        disks.sample_now();
        std::thread::sleep(Duration::from_millis(20));
        disks.sample_now();

        deps.mount("/dev/sdb1", "/data", "ext4");
        deps.set_counters("/dev/sdb1", 10_000_000, 50_000_000);
        disks.update(false).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        disks.sample_now();

        {
            let guard = disks.lock();
            assert_eq!(guard.get_instance("/").unwrap().reads_per_second(), Some(0));
            assert_eq!(guard.get_instance("/data").unwrap().reads_per_second(), None);
            assert_eq!(guard.total_instance().unwrap().reads_per_second(), Some(0));
        }

        // Unmounting must not read as a counter reset either.
        deps.unmount("/data");
        disks.update(false).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        deps.set_counters("/dev/sda1", 100, 1000);
        disks.sample_now();

        let guard = disks.lock();
        let total = guard.total_instance().unwrap();
        assert_eq!(total.sample_count(), 4);
        assert_eq!(total.reads_per_second(), Some(0));
    }

    #[test]
    fn test_total_advances_with_disk_activity() {
        let deps = fake();
        deps.set_counters("/dev/sda1", 100, 1000);
        deps.set_counters("/dev/sda2", 10, 100);
        let disks = statistical_with_total(&deps);
        disks.update(false).unwrap();

        disks.sample_now();
        std::thread::sleep(Duration::from_millis(20));
        deps.set_counters("/dev/sda1", 150, 1000);
        deps.set_counters("/dev/sda2", 60, 100);
        disks.sample_now();

        let guard = disks.lock();
        let total = guard.total_instance().unwrap();
        let root = guard.get_instance("/").unwrap();
        let home = guard.get_instance("/home").unwrap();
        // Same two sample instants, so the total rate is close to the sum.
        let sum = root.reads_per_second().unwrap() + home.reads_per_second().unwrap();
        let reported = total.reads_per_second().unwrap();
        assert!(reported > 0);
        assert!(reported.abs_diff(sum) <= sum / 10 + 1);
    }

    #[test]
    fn test_remount_on_other_device_drops_old_counters() {
        let deps = Arc::new(FakeDisks::default());
        deps.mount("/dev/sda1", "/", "ext4");
        deps.set_counters("/dev/sda1", 100, 1000);
        deps.set_counters("/dev/sdc1", 9_000, 90_000);
        let disks = StatisticalDiskEnumeration::new_logical(&PalContext::default(), deps.clone());
        disks.update(false).unwrap();
        disks.sample_now();
        disks.sample_now();
        assert_eq!(disks.lock().get_instance("/").unwrap().sample_count(), 2);

        deps.unmount("/");
        deps.mount("/dev/sdc1", "/", "ext4");
        disks.update(false).unwrap();
        {
            let guard = disks.lock();
            let root = guard.get_instance("/").unwrap();
            assert_eq!(root.device(), Some("/dev/sdc1"));
            assert_eq!(root.sample_count(), 0);
        }

        disks.sample_now();
        let guard = disks.lock();
        let root = guard.get_instance("/").unwrap();
        assert_eq!(root.sample_count(), 1);
        assert_eq!(root.reads_per_second(), None);
    }

    #[test]
    fn test_statistical_missing_device_goes_quiet_not_offline() {
        let ctx = PalContext::default();
        let deps = fake();
        let disks = StatisticalDiskEnumeration::new_logical(&ctx, deps.clone());
        disks.update(false).unwrap();
        for _ in 0..12 {
            disks.sample_now();
        }
        let guard = disks.lock();
        let root = guard.get_instance("/").unwrap();
        assert!(root.is_online());
        assert_eq!(root.sample_count(), 0);
    }
}
