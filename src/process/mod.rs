//! Process enumeration.
//!
//! The process table is rebuilt from the live pid listing on every sampling
//! cycle. Snapshots are read in parallel without the collection lock held;
//! only reconciliation happens under it. Exited processes are purged.

pub mod depend;
pub mod instance;

use rayon::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

use crate::context::PalContext;
use crate::entity::EntityInstance;
use crate::enumeration::{
    reconcile, EntityCollection, Enumeration, KeyNormalization, LogThrottle, PurgePolicy,
    Reconciled,
};
use crate::error::{PalError, Result};
use crate::locks::NamedLock;
use crate::sampling::SamplerSlot;

pub use depend::{ProcProcessDependencies, ProcStat, ProcStatm, ProcessDependencies};
pub use instance::{
    read_snapshot, ExecutionState, ProcessInstance, ProcessSnapshot, PROCESS_SAMPLE_DEPTH,
};

/// Live processes keyed by pid.
pub type ProcMap = EntityCollection<ProcessInstance>;

#[derive(Clone)]
struct ProcessShared {
    collection: NamedLock<ProcMap>,
    deps: Arc<dyn ProcessDependencies>,
    policy: PurgePolicy,
}

impl ProcessShared {
    /// Reads every listed process. Processes exiting mid-scan are skipped.
    fn scan(&self) -> Result<Vec<(String, ProcessSnapshot)>> {
        let pids = self.deps.list_pids()?;
        let deps = self.deps.as_ref();

        let snapshots: Vec<(String, ProcessSnapshot)> = pids
            .par_iter()
            .filter_map(|&pid| match read_snapshot(deps, pid) {
                Ok(snapshot) => Some((pid.to_string(), snapshot)),
                Err(e) if e.is_not_found() => {
                    trace!("Process {} exited during scan", pid);
                    None
                }
                Err(e) => {
                    debug!("Skipping process {}: {}", pid, e);
                    None
                }
            })
            .collect();

        trace!("Scanned {} of {} listed processes", snapshots.len(), pids.len());
        Ok(snapshots)
    }

    /// Snapshots carry fresh counters, so instances are not updated again.
    /// With `sample` unset the snapshots only refresh identity and state.
    /// A pid whose start time changed belongs to a new process and gets a
    /// fresh instance.
    fn apply(
        &self,
        collection: &mut ProcMap,
        snapshots: Vec<(String, ProcessSnapshot)>,
        sample: bool,
    ) -> Reconciled {
        let deps = &self.deps;
        let build = |snapshot: ProcessSnapshot| {
            if sample {
                ProcessInstance::new(deps.clone(), snapshot)
            } else {
                ProcessInstance::discovered(deps.clone(), snapshot)
            }
        };
        reconcile(
            collection,
            snapshots,
            self.policy,
            false,
            |instance, snapshot| {
                if !instance.is_same_process(&snapshot) {
                    debug!("Pid {} was reused by '{}'", snapshot.stat.pid, snapshot.stat.comm);
                    *instance = build(snapshot);
                    instance.set_online(true);
                } else if sample {
                    instance.apply_snapshot(snapshot);
                } else {
                    instance.set_snapshot(snapshot);
                }
            },
            |_, snapshot| Some(build(snapshot)),
        )
    }
}

pub struct ProcessEnumeration {
    sampler: SamplerSlot,
    shared: ProcessShared,
    interval: Duration,
}

impl ProcessEnumeration {
    pub fn new(ctx: &PalContext, deps: Arc<dyn ProcessDependencies>) -> Self {
        Self {
            sampler: SamplerSlot::new(),
            shared: ProcessShared {
                collection: ctx.create_lock(
                    "herakles_pal.process",
                    EntityCollection::new(KeyNormalization::Exact),
                ),
                deps,
                policy: ctx.config().process_policy(),
            },
            interval: ctx.config().sampling.process_interval(),
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

    /// Starts the background thread that rescans the process table.
    pub fn start_sampling(&self) -> Result<()> {
        let shared = self.shared.clone();
        let mut throttle = LogThrottle::new("Process enumeration", 1);

        self.sampler
            .start("pal-process-sampler", self.interval, move || {
                match shared.scan() {
                    Ok(snapshots) => {
                        throttle.success();
                        let mut guard = shared.collection.lock();
                        shared.apply(&mut guard, snapshots, true);
                    }
                    Err(e) => throttle.failure(&e),
                }
            })
    }

    pub fn is_sampling(&self) -> bool {
        self.sampler.is_running()
    }

    pub fn number_of_processes(&self) -> usize {
        self.size()
    }

    /// Pids of online processes whose name matches exactly.
    pub fn find_by_name(&self, name: &str) -> Vec<u32> {
        self.lock()
            .iter()
            .filter(|p| p.is_online() && p.name() == Some(name))
            .map(ProcessInstance::pid)
            .collect()
    }

    /// Sends `signal` to every process named `name`. Returns how many were
    /// signalled; fails only when none could be.
    #[instrument(skip(self))]
    pub fn send_signal_by_name(&self, name: &str, signal: i32) -> Result<usize> {
        let pids = self.find_by_name(name);
        if pids.is_empty() {
            return Err(PalError::not_found(format!("process '{}'", name)));
        }

        let mut signalled = 0;
        let mut last_error = None;
        for pid in pids {
            // SAFETY: kill has no memory-safety preconditions.
            let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
            if rc == 0 {
                signalled += 1;
            } else {
                let err = std::io::Error::last_os_error();
                warn!("Failed to send signal {} to pid {}: {}", signal, pid, err);
                last_error = Some(PalError::io(format!("kill({}, {})", pid, signal), err));
            }
        }

        match last_error {
            Some(e) if signalled == 0 => Err(e),
            _ => Ok(signalled),
        }
    }
}

impl Enumeration for ProcessEnumeration {
    type Instance = ProcessInstance;

    fn collection(&self) -> &NamedLock<ProcMap> {
        &self.shared.collection
    }

    #[instrument(skip(self))]
    fn init(&self) -> Result<()> {
        self.update(true)?;
        self.start_sampling()?;
        info!("Process enumeration initialized with {} processes", self.size());
        Ok(())
    }

    /// Scans the process table first and takes the lock only to reconcile.
    fn update(&self, update_instances: bool) -> Result<()> {
        let snapshots = self.shared.scan()?;
        let mut guard = self.shared.collection.lock();
        self.shared.apply(&mut guard, snapshots, update_instances);
        Ok(())
    }

    /// Scans while the caller holds the lock. Prefer `update`.
    fn update_no_lock(&self, collection: &mut ProcMap, update_instances: bool) -> Result<()> {
        let snapshots = self.shared.scan()?;
        self.shared.apply(collection, snapshots, update_instances);
        Ok(())
    }

    fn clean_up(&self) {
        self.sampler.stop();
        self.shared.collection.lock().clean_up();
    }
}

impl Drop for ProcessEnumeration {
    fn drop(&mut self) {
        self.sampler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Mutex};
    use std::time::Instant;

    #[derive(Default)]
    struct FakeProcesses {
        table: Mutex<AHashMap<u32, ProcStat>>,
        // When set, list_pids checks whether this lock can be taken.
        watched: Mutex<Option<NamedLock<ProcMap>>>,
        lock_free_during_scan: AtomicBool,
    }

    impl FakeProcesses {
        fn spawn(&self, pid: u32, name: &str, utime: u64) {
            self.spawn_started_at(pid, name, utime, 500);
        }

        fn spawn_started_at(&self, pid: u32, name: &str, utime: u64, starttime: u64) {
            self.table.lock().unwrap().insert(
                pid,
                ProcStat {
                    pid,
                    comm: name.into(),
                    state: 'S',
                    ppid: 1,
                    utime,
                    stime: 10,
                    priority: 20,
                    starttime,
                    ..ProcStat::default()
                },
            );
        }

        fn set_state(&self, pid: u32, state: char) {
            if let Some(stat) = self.table.lock().unwrap().get_mut(&pid) {
                stat.state = state;
            }
        }

        fn exit(&self, pid: u32) {
            self.table.lock().unwrap().remove(&pid);
        }

        fn stat(&self, pid: u32) -> Result<ProcStat> {
            self.table
                .lock()
                .unwrap()
                .get(&pid)
                .cloned()
                .ok_or_else(|| PalError::not_found(format!("/proc/{}", pid)))
        }
    }

    impl ProcessDependencies for FakeProcesses {
        fn list_pids(&self) -> Result<Vec<u32>> {
            if let Some(lock) = self.watched.lock().unwrap().clone() {
                let (tx, rx) = mpsc::channel();
                std::thread::spawn(move || {
                    let _guard = lock.lock();
                    let _ = tx.send(());
                });
                let free = rx.recv_timeout(Duration::from_millis(500)).is_ok();
                self.lock_free_during_scan.store(free, Ordering::SeqCst);
            }
            let mut pids: Vec<u32> = self.table.lock().unwrap().keys().copied().collect();
            pids.sort_unstable();
            Ok(pids)
        }
        fn read_stat(&self, pid: u32) -> Result<ProcStat> {
            self.stat(pid)
        }
        fn read_statm(&self, pid: u32) -> Result<ProcStatm> {
            self.stat(pid)?;
            Ok(ProcStatm {
                resident: 256,
                ..ProcStatm::default()
            })
        }
        fn read_cmdline(&self, pid: u32) -> Result<Vec<String>> {
            Ok(vec![self.stat(pid)?.comm, "--flag".into()])
        }
        fn read_owner(&self, pid: u32) -> Result<u32> {
            self.stat(pid).map(|_| 0)
        }
        fn page_size(&self) -> u64 {
            4096
        }
        fn clock_ticks(&self) -> u64 {
            100
        }
        fn boot_time(&self) -> Result<i64> {
            Ok(1_700_000_000)
        }
        fn total_memory_bytes(&self) -> Result<u64> {
            Ok(4096 * 1024)
        }
    }

    fn fake() -> Arc<FakeProcesses> {
        let deps = Arc::new(FakeProcesses::default());
        deps.spawn(1, "init", 0);
        deps.spawn(200, "sshd", 0);
        deps.spawn(300, "sshd", 0);
        deps
    }

    #[test]
    fn test_exited_processes_are_purged() {
        let ctx = PalContext::default();
        let deps = fake();
        let procs = ProcessEnumeration::new(&ctx, deps.clone());
        procs.update(true).unwrap();
        assert_eq!(procs.number_of_processes(), 3);

        deps.exit(200);
        deps.spawn(400, "cron", 0);
        procs.update(true).unwrap();

        let guard = procs.lock();
        assert_eq!(guard.size(), 3);
        assert!(guard.get_instance("200").is_none());
        assert!(guard.get_instance("400").is_some());
    }

    #[test]
    fn test_find_by_name_and_accessors() {
        let ctx = PalContext::default();
        let procs = ProcessEnumeration::new(&ctx, fake());
        procs.update(false).unwrap();

        assert_eq!(procs.find_by_name("sshd"), vec![200, 300]);
        assert!(procs.find_by_name("nothing").is_empty());

        let guard = procs.lock();
        let init = guard.get_instance("1").unwrap();
        assert_eq!(init.pid(), 1);
        assert_eq!(init.parent_pid(), Some(1));
        assert_eq!(init.priority(), Some(80));
        assert_eq!(init.used_memory(), Some(256 * 4096));
        assert_eq!(init.percent_used_memory(), Some(25));
        assert_eq!(init.execution_state(), Some(ExecutionState::SuspendedReady));
        assert_eq!(init.creation_date().unwrap().timestamp(), 1_700_000_005);
        assert_eq!(init.termination_date(), None);
        assert_eq!(init.block_reads_per_second(), None);
        assert_eq!(
            init.parameters().unwrap(),
            &["init".to_string(), "--flag".to_string()]
        );
        // One sample only.
        assert_eq!(init.cpu_percent(), None);
    }

    #[test]
    fn test_cpu_percent_over_window() {
        let deps = fake();
        let t0 = Instant::now();
        let mut snapshot = read_snapshot(deps.as_ref(), 200).unwrap();
        snapshot.taken_at = Some(t0);
        let mut instance = ProcessInstance::new(deps.clone(), snapshot);

        let mut later = read_snapshot(deps.as_ref(), 200).unwrap();
        later.stat.utime = 50;
        later.stat.stime = 35;
        later.taken_at = Some(t0 + Duration::from_secs(1));
        instance.apply_snapshot(later);

        assert_eq!(instance.percent_user_time(), Some(50));
        assert_eq!(instance.percent_privileged_time(), Some(25));
        assert_eq!(instance.cpu_percent(), Some(75));
        assert_eq!(instance.user_mode_time(), Some(500));
    }

    #[test]
    fn test_zombie_records_termination_date() {
        let deps = fake();
        let snapshot = read_snapshot(deps.as_ref(), 300).unwrap();
        let mut instance = ProcessInstance::new(deps.clone(), snapshot);
        assert!(instance.termination_date().is_none());

        let mut zombie = read_snapshot(deps.as_ref(), 300).unwrap();
        zombie.stat.state = 'Z';
        instance.apply_snapshot(zombie);
        assert!(instance.termination_date().is_some());
        assert_eq!(instance.execution_state(), Some(ExecutionState::Terminated));
    }

    #[test]
    fn test_reused_pid_gets_fresh_instance() {
        let ctx = PalContext::default();
        let deps = fake();
        deps.set_state(300, 'Z');
        let procs = ProcessEnumeration::new(&ctx, deps.clone());
        procs.update(true).unwrap();
        assert!(procs
            .lock()
            .get_instance("300")
            .unwrap()
            .termination_date()
            .is_some());

        deps.exit(300);
        deps.spawn_started_at(300, "new", 0, 900);
        procs.update(true).unwrap();

        let guard = procs.lock();
        let reused = guard.get_instance("300").unwrap();
        assert!(reused.is_online());
        assert_eq!(reused.name(), Some("new"));
        assert_eq!(reused.execution_state(), Some(ExecutionState::SuspendedReady));
        assert_eq!(reused.termination_date(), None);
        assert_eq!(reused.sample_count(), 1);
        assert_eq!(reused.creation_date().unwrap().timestamp(), 1_700_000_009);
    }

    #[test]
    fn test_instance_update_rejects_reused_pid() {
        let deps = fake();
        let snapshot = read_snapshot(deps.as_ref(), 200).unwrap();
        let mut instance = ProcessInstance::new(deps.clone(), snapshot);
        instance.update().unwrap();

        deps.exit(200);
        deps.spawn_started_at(200, "other", 0, 700);
        assert!(instance.update().unwrap_err().is_not_found());
        assert_eq!(instance.name(), Some("sshd"));
    }

    #[test]
    fn test_discovery_pass_takes_no_samples() {
        let ctx = PalContext::default();
        let procs = ProcessEnumeration::new(&ctx, fake());
        procs.update(false).unwrap();
        procs.update(false).unwrap();
        {
            let guard = procs.lock();
            let init = guard.get_instance("1").unwrap();
            assert_eq!(init.sample_count(), 0);
            assert_eq!(init.name(), Some("init"));
        }

        procs.update(true).unwrap();
        assert_eq!(procs.lock().get_instance("1").unwrap().sample_count(), 1);
    }

    #[test]
    fn test_foreground_update_scans_without_holding_lock() {
        let ctx = PalContext::default();
        let deps = fake();
        let procs = ProcessEnumeration::new(&ctx, deps.clone());
        *deps.watched.lock().unwrap() = Some(procs.collection().clone());

        procs.update(true).unwrap();
        deps.watched.lock().unwrap().take();
        assert!(deps.lock_free_during_scan.load(Ordering::SeqCst));
        assert_eq!(procs.number_of_processes(), 3);
    }

    #[test]
    fn test_signal_unknown_name_is_not_found() {
        let ctx = PalContext::default();
        let procs = ProcessEnumeration::new(&ctx, fake());
        procs.update(false).unwrap();
        assert!(procs
            .send_signal_by_name("nothing", libc::SIGTERM)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_sampling_thread_picks_up_new_processes() {
        let ctx = PalContext::default();
        let deps = fake();
        let procs =
            ProcessEnumeration::new(&ctx, deps.clone()).with_interval(Duration::from_millis(10));
        procs.init().unwrap();
        assert!(procs.is_sampling());

        deps.spawn(500, "late", 0);
        let deadline = Instant::now() + Duration::from_secs(5);
        while procs.find_by_name("late").is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(procs.find_by_name("late"), vec![500]);

        procs.clean_up();
        assert!(!procs.is_sampling());
        assert_eq!(procs.size(), 0);
    }
}
