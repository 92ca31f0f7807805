//! One running process.
//!
//! The instance keeps the latest `/proc` snapshot plus rolling samples of
//! its cumulative CPU and fault counters. CPU figures span the whole sample
//! window, so they read as an average over the last few sampling intervals.

use chrono::{DateTime, Local, TimeZone};
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

use crate::entity::{base_properties, EntityInstance, InstanceBase};
use crate::error::{PalError, Result};
use crate::property::PropertySet;
use crate::sampler::{percentage, DataSampler};

use super::depend::{ProcStat, ProcStatm, ProcessDependencies};

/// Number of counter samples kept per process.
pub const PROCESS_SAMPLE_DEPTH: usize = 6;

type TickSampler = DataSampler<u64, PROCESS_SAMPLE_DEPTH>;

/// Everything read from `/proc/<pid>` in one pass.
#[derive(Debug, Clone, Default)]
pub struct ProcessSnapshot {
    pub stat: ProcStat,
    pub statm: ProcStatm,
    pub cmdline: Vec<String>,
    pub uid: u32,
    pub taken_at: Option<Instant>,
}

/// Reads one snapshot. Fails with `NotFound` when the process is gone.
pub fn read_snapshot(deps: &dyn ProcessDependencies, pid: u32) -> Result<ProcessSnapshot> {
    let stat = deps.read_stat(pid)?;
    let statm = deps.read_statm(pid)?;
    // Kernel threads and zombies may refuse these; the stat row is enough.
    let cmdline = deps.read_cmdline(pid).unwrap_or_default();
    let uid = deps.read_owner(pid)?;
    Ok(ProcessSnapshot {
        stat,
        statm,
        cmdline,
        uid,
        taken_at: Some(Instant::now()),
    })
}

/// Execution state as reported to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ExecutionState {
    Unknown = 0,
    Other = 1,
    Ready = 2,
    Running = 3,
    Blocked = 4,
    SuspendedBlocked = 5,
    SuspendedReady = 6,
    Terminated = 7,
    Stopped = 8,
    Growing = 9,
}

impl ExecutionState {
    pub fn from_proc_state(state: char) -> Self {
        match state {
            'R' => ExecutionState::Running,
            'S' | 'I' => ExecutionState::SuspendedReady,
            'D' => ExecutionState::SuspendedBlocked,
            'Z' | 'X' | 'x' => ExecutionState::Terminated,
            'T' | 't' => ExecutionState::Stopped,
            'W' => ExecutionState::Growing,
            _ => ExecutionState::Unknown,
        }
    }
}

pub struct ProcessInstance {
    base: InstanceBase,
    deps: Arc<dyn ProcessDependencies>,
    pid: u32,
    snapshot: ProcessSnapshot,
    user_name: Option<String>,
    boot_time: Option<i64>,
    total_memory: Option<u64>,
    clock_ticks: u64,
    page_size: u64,

    user_ticks: TickSampler,
    system_ticks: TickSampler,
    hard_faults: TickSampler,

    time_of_death: Option<DateTime<Local>>,
}

impl ProcessInstance {
    pub fn new(deps: Arc<dyn ProcessDependencies>, snapshot: ProcessSnapshot) -> Self {
        let mut instance = Self::unsampled(deps, &snapshot);
        instance.apply_snapshot(snapshot);
        instance
    }

    /// Builds the instance from a snapshot without pushing any samples.
    pub fn discovered(deps: Arc<dyn ProcessDependencies>, snapshot: ProcessSnapshot) -> Self {
        let mut instance = Self::unsampled(deps, &snapshot);
        instance.set_snapshot(snapshot);
        instance
    }

    fn unsampled(deps: Arc<dyn ProcessDependencies>, snapshot: &ProcessSnapshot) -> Self {
        let pid = snapshot.stat.pid;
        Self {
            base: InstanceBase::new(pid.to_string(), false),
            boot_time: deps.boot_time().ok(),
            total_memory: deps.total_memory_bytes().ok(),
            clock_ticks: deps.clock_ticks().max(1),
            page_size: deps.page_size(),
            deps,
            pid,
            snapshot: ProcessSnapshot::default(),
            user_name: None,
            user_ticks: TickSampler::new(),
            system_ticks: TickSampler::new(),
            hard_faults: TickSampler::new(),
            time_of_death: None,
        }
    }

    /// Whether `snapshot` describes this process rather than a later one
    /// that was handed the same pid.
    pub fn is_same_process(&self, snapshot: &ProcessSnapshot) -> bool {
        self.pid == snapshot.stat.pid && self.snapshot.stat.starttime == snapshot.stat.starttime
    }

    /// Replaces the snapshot and pushes its counters to the samplers.
    pub(crate) fn apply_snapshot(&mut self, snapshot: ProcessSnapshot) {
        let at = snapshot.taken_at.unwrap_or_else(Instant::now);
        self.user_ticks.add_sample_at(snapshot.stat.utime, at);
        self.system_ticks.add_sample_at(snapshot.stat.stime, at);
        self.hard_faults.add_sample_at(snapshot.stat.majflt, at);
        self.set_snapshot(snapshot);
    }

    /// Replaces the snapshot without touching the samplers.
    pub(crate) fn set_snapshot(&mut self, snapshot: ProcessSnapshot) {
        if snapshot.uid != self.snapshot.uid || self.user_name.is_none() {
            self.user_name = lookup_user_name(snapshot.uid);
        }
        if ExecutionState::from_proc_state(snapshot.stat.state) == ExecutionState::Terminated
            && self.time_of_death.is_none()
        {
            trace!("Process {} became a zombie", self.pid);
            self.time_of_death = Some(Local::now());
        }
        self.snapshot = snapshot;
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> Option<&str> {
        Some(&self.snapshot.stat.comm)
    }

    pub fn parent_pid(&self) -> Option<i32> {
        Some(self.snapshot.stat.ppid)
    }

    pub fn real_user_id(&self) -> Option<u32> {
        Some(self.snapshot.uid)
    }

    /// Login name of the owner, when the uid resolves.
    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    pub fn process_group_id(&self) -> Option<i64> {
        Some(self.snapshot.stat.pgid)
    }

    pub fn session_id(&self) -> Option<i64> {
        Some(self.snapshot.stat.sid)
    }

    pub fn nice(&self) -> Option<i64> {
        Some(self.snapshot.stat.nice)
    }

    /// Priority on the scale shown by `ps -l`.
    pub fn priority(&self) -> Option<i64> {
        Some(self.snapshot.stat.priority + 60)
    }

    pub fn execution_state(&self) -> Option<ExecutionState> {
        Some(ExecutionState::from_proc_state(self.snapshot.stat.state))
    }

    pub fn creation_date(&self) -> Option<DateTime<Local>> {
        let boot = self.boot_time?;
        let started = boot + (self.snapshot.stat.starttime / self.clock_ticks) as i64;
        Local.timestamp_opt(started, 0).single()
    }

    /// Set once the process has been observed as a zombie.
    pub fn termination_date(&self) -> Option<DateTime<Local>> {
        self.time_of_death
    }

    /// Total user mode time in milliseconds.
    pub fn user_mode_time(&self) -> Option<u64> {
        Some(self.snapshot.stat.utime * 1000 / self.clock_ticks)
    }

    /// Total kernel mode time in milliseconds.
    pub fn kernel_mode_time(&self) -> Option<u64> {
        Some(self.snapshot.stat.stime * 1000 / self.clock_ticks)
    }

    fn window_percent(&self, ticks: Option<u64>) -> Option<u64> {
        let elapsed = self.user_ticks.elapsed(PROCESS_SAMPLE_DEPTH)?.as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let busy = ticks? as f64 / self.clock_ticks as f64;
        Some(percentage(busy, elapsed))
    }

    /// CPU time over wall time across the sample window. May exceed 100
    /// for multi-threaded processes.
    pub fn cpu_percent(&self) -> Option<u64> {
        let user = self.user_ticks.delta(PROCESS_SAMPLE_DEPTH)?;
        let system = self.system_ticks.delta(PROCESS_SAMPLE_DEPTH)?;
        self.window_percent(Some(user + system))
    }

    pub fn percent_user_time(&self) -> Option<u64> {
        self.window_percent(self.user_ticks.delta(PROCESS_SAMPLE_DEPTH))
    }

    pub fn percent_privileged_time(&self) -> Option<u64> {
        self.window_percent(self.system_ticks.delta(PROCESS_SAMPLE_DEPTH))
    }

    /// Resident set size in bytes.
    pub fn used_memory(&self) -> Option<u64> {
        Some(self.snapshot.statm.resident * self.page_size)
    }

    /// Resident set size as a share of physical memory.
    pub fn percent_used_memory(&self) -> Option<u64> {
        let total = self.total_memory.filter(|&t| t > 0)?;
        Some(percentage(self.used_memory()? as f64, total as f64))
    }

    pub fn virtual_memory(&self) -> Option<u64> {
        Some(self.snapshot.stat.vsize)
    }

    /// Hard page faults per second.
    pub fn pages_read_per_second(&self) -> Option<u64> {
        self.hard_faults
            .rate_per_second(PROCESS_SAMPLE_DEPTH)
            .map(|r| r.round() as u64)
    }

    pub fn parameters(&self) -> Option<&[String]> {
        Some(&self.snapshot.cmdline)
    }

    /// Linux keeps no per-process block I/O counts comparable to other
    /// platforms.
    pub fn block_reads_per_second(&self) -> Option<u64> {
        None
    }

    pub fn block_writes_per_second(&self) -> Option<u64> {
        None
    }

    pub fn block_transfers_per_second(&self) -> Option<u64> {
        None
    }

    pub fn sample_count(&self) -> usize {
        self.user_ticks.len()
    }
}

fn lookup_user_name(uid: u32) -> Option<String> {
    nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|u| u.name)
}

impl EntityInstance for ProcessInstance {
    fn base(&self) -> &InstanceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut InstanceBase {
        &mut self.base
    }

    fn update(&mut self) -> Result<()> {
        let snapshot = read_snapshot(self.deps.as_ref(), self.pid)?;
        if !self.is_same_process(&snapshot) {
            return Err(PalError::not_found(format!("process {} (pid reused)", self.pid)));
        }
        self.apply_snapshot(snapshot);
        Ok(())
    }

    fn dump_string(&self) -> String {
        format!(
            "ProcessInstance: PID = {}, Name = {}, PPID = {}, UID = {}, State = {:?}, \
             CPU = {:?}%, RSS = {:?}, Online = {}",
            self.pid,
            self.snapshot.stat.comm,
            self.snapshot.stat.ppid,
            self.snapshot.uid,
            self.execution_state(),
            self.cpu_percent(),
            self.used_memory(),
            self.is_online()
        )
    }

    fn properties(&self) -> PropertySet {
        let mut set = base_properties(&self.base);
        set.add_optional("Name", self.name());
        set.add_optional("ParentProcessID", self.parent_pid().map(i64::from));
        set.add_optional("RealUserID", self.real_user_id().map(u64::from));
        set.add_optional("UserName", self.user_name());
        set.add_optional("ProcessGroupID", self.process_group_id());
        set.add_optional("ProcessSessionID", self.session_id());
        set.add_optional("ProcessNiceValue", self.nice());
        set.add_optional("Priority", self.priority());
        set.add_optional("ExecutionState", self.execution_state().map(|s| s as u16 as u64));
        set.add_optional("CreationDate", self.creation_date());
        set.add_optional("TerminationDate", self.termination_date());
        set.add_optional("UserModeTime", self.user_mode_time());
        set.add_optional("KernelModeTime", self.kernel_mode_time());
        set.add_optional("PercentCPUTime", self.cpu_percent());
        set.add_optional("PercentUserTime", self.percent_user_time());
        set.add_optional("PercentPrivilegedTime", self.percent_privileged_time());
        set.add_optional("UsedMemory", self.used_memory());
        set.add_optional("PercentUsedMemory", self.percent_used_memory());
        set.add_optional("PagesReadPerSec", self.pages_read_per_second());
        set.add_optional("Parameters", self.parameters().map(<[String]>::to_vec));
        set
    }
}
