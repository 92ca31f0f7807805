//! Application state management for the PAL server.
//!
//! This module defines the shared application state handed to HTTP
//! handlers and the set of enumerations built from the effective config.

use herakles_pal::cpu::ProcCpuDependencies;
use herakles_pal::disk::ProcDiskDependencies;
use herakles_pal::memory::ProcMemoryDependencies;
use herakles_pal::network::ProcNetworkDependencies;
use herakles_pal::os::ProcOsDependencies;
use herakles_pal::process::ProcProcessDependencies;
use herakles_pal::{
    CpuEnumeration, EntityInstance, Enumeration, MemoryEnumeration, NetworkInterfaceEnumeration,
    OsEnumeration, PalContext, ProcessEnumeration, StaticLogicalDiskEnumeration, StaticPhysicalDiskEnumeration,
    StatisticalDiskEnumeration, TestItemEnumeration,
};
use prometheus::{Gauge, Registry};
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::cli::Resource;
use crate::metrics::PalMetrics;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests.
pub struct AppState {
    pub ctx: Arc<PalContext>,
    pub enumerations: Enumerations,
    pub registry: Registry,
    pub metrics: PalMetrics,
    pub scrape_duration: Gauge,
    /// Number of HTTP requests served.
    pub http_requests: AtomicU64,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn record_http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }
}

/// Every enumeration the binary can run. Disabled resources stay `None`.
#[derive(Default)]
pub struct Enumerations {
    pub cpu: Option<CpuEnumeration>,
    pub memory: Option<MemoryEnumeration>,
    pub processes: Option<ProcessEnumeration>,
    pub logical_disks: Option<StaticLogicalDiskEnumeration>,
    pub physical_disks: Option<StaticPhysicalDiskEnumeration>,
    pub logical_disk_stats: Option<StatisticalDiskEnumeration>,
    pub physical_disk_stats: Option<StatisticalDiskEnumeration>,
    pub network: Option<NetworkInterfaceEnumeration>,
    pub os: Option<OsEnumeration>,
    pub test_items: Option<TestItemEnumeration>,
}

fn wanted(only: Option<Resource>, resource: Resource, enabled: Option<bool>) -> bool {
    match only {
        Some(selected) => selected == resource,
        None => resource != Resource::Testitem && enabled.unwrap_or(true),
    }
}

impl Enumerations {
    /// Builds the enumerations enabled in `ctx`'s config backed by the
    /// Linux `/proc` and `/sys` readers. With `only`, builds just that
    /// resource regardless of its enable flag.
    pub fn build(
        ctx: &PalContext,
        only: Option<Resource>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let config = ctx.config();
        let mut set = Enumerations::default();

        if wanted(only, Resource::Cpu, config.enable_cpu) {
            set.cpu = Some(CpuEnumeration::new(ctx, Arc::new(ProcCpuDependencies::new())));
        }

        if wanted(only, Resource::Memory, config.enable_memory) {
            set.memory = Some(MemoryEnumeration::new(
                ctx,
                Arc::new(ProcMemoryDependencies::new()),
            ));
        }

        if wanted(only, Resource::Process, config.enable_process) {
            set.processes = Some(ProcessEnumeration::new(
                ctx,
                Arc::new(ProcProcessDependencies::new()),
            ));
        }

        if wanted(only, Resource::Disk, config.enable_disk) {
            // One mount table shared by every disk view.
            let deps = Arc::new(ProcDiskDependencies::from_config(config)?);
            set.logical_disks = Some(StaticLogicalDiskEnumeration::new(ctx, deps.clone()));
            set.physical_disks = Some(StaticPhysicalDiskEnumeration::new(ctx, deps.clone()));
            set.logical_disk_stats = Some(StatisticalDiskEnumeration::new_logical(
                ctx,
                deps.clone(),
            ));
            set.physical_disk_stats = Some(StatisticalDiskEnumeration::new_physical(ctx, deps));
        }

        if wanted(only, Resource::Network, config.enable_network) {
            set.network = Some(NetworkInterfaceEnumeration::new(
                ctx,
                Arc::new(ProcNetworkDependencies::new()),
            ));
        }

        if wanted(only, Resource::Os, config.enable_os) {
            set.os = Some(OsEnumeration::new(ctx, Arc::new(ProcOsDependencies::new())));
        }

        if only == Some(Resource::Testitem) {
            set.test_items = Some(TestItemEnumeration::new(ctx));
        }

        Ok(set)
    }

    /// Runs `init` on every enumeration. Failures are logged and counted;
    /// a failed enumeration stays empty.
    pub fn init_all(&self) -> usize {
        let mut failures = 0;
        let mut run = |name: &str, result: herakles_pal::Result<()>| match result {
            Ok(()) => debug!("{} enumeration ready", name),
            Err(e) => {
                error!("Failed to initialize {} enumeration: {}", name, e);
                failures += 1;
            }
        };

        if let Some(e) = &self.cpu {
            run("CPU", e.init());
        }
        if let Some(e) = &self.memory {
            run("memory", e.init());
        }
        if let Some(e) = &self.processes {
            run("process", e.init());
        }
        if let Some(e) = &self.logical_disks {
            run("logical disk", e.init());
        }
        if let Some(e) = &self.physical_disks {
            run("physical disk", e.init());
        }
        if let Some(e) = &self.logical_disk_stats {
            run("logical disk statistics", e.init());
        }
        if let Some(e) = &self.physical_disk_stats {
            run("physical disk statistics", e.init());
        }
        if let Some(e) = &self.network {
            run("network", e.init());
        }
        if let Some(e) = &self.os {
            run("OS", e.init());
        }
        if let Some(e) = &self.test_items {
            run("test item", e.init());
        }

        info!("Enumerations initialized ({} failed)", failures);
        failures
    }

    /// Refreshes values that no sampling thread keeps current, and picks
    /// up hot-plugged processors.
    pub fn refresh(&self) {
        let mut run = |name: &str, result: herakles_pal::Result<()>| {
            if let Err(e) = result {
                error!("Failed to update {} enumeration: {}", name, e);
            }
        };

        if let Some(e) = &self.cpu {
            run("CPU", e.update(false));
        }
        if let Some(e) = &self.memory {
            run("memory", e.update(true));
        }
        if let Some(e) = &self.logical_disks {
            run("logical disk", e.update(true));
        }
        if let Some(e) = &self.physical_disks {
            run("physical disk", e.update(true));
        }
        if let Some(e) = &self.network {
            run("network", e.update(true));
        }
        if let Some(e) = &self.os {
            run("OS", e.update(true));
        }
        if let Some(e) = &self.test_items {
            run("test item", e.update(true));
        }
    }

    /// Stops every sampling thread and drops all instances.
    pub fn clean_up_all(&self) {
        if let Some(e) = &self.cpu {
            e.clean_up();
        }
        if let Some(e) = &self.memory {
            e.clean_up();
        }
        if let Some(e) = &self.processes {
            e.clean_up();
        }
        if let Some(e) = &self.logical_disks {
            e.clean_up();
        }
        if let Some(e) = &self.physical_disks {
            e.clean_up();
        }
        if let Some(e) = &self.logical_disk_stats {
            e.clean_up();
        }
        if let Some(e) = &self.physical_disk_stats {
            e.clean_up();
        }
        if let Some(e) = &self.network {
            e.clean_up();
        }
        if let Some(e) = &self.os {
            e.clean_up();
        }
        if let Some(e) = &self.test_items {
            e.clean_up();
        }
        info!("Enumerations cleaned up");
    }

    /// Renders every instance, either as dump strings or property sets.
    pub fn render(&self, properties: bool) -> String {
        let mut out = String::new();
        if let Some(e) = &self.cpu {
            render_section(&mut out, "CPUS", e, properties);
        }
        if let Some(e) = &self.memory {
            render_section(&mut out, "MEMORY", e, properties);
        }
        if let Some(e) = &self.processes {
            render_section(&mut out, "PROCESSES", e, properties);
        }
        if let Some(e) = &self.logical_disks {
            render_section(&mut out, "LOGICAL DISKS", e, properties);
        }
        if let Some(e) = &self.physical_disks {
            render_section(&mut out, "PHYSICAL DISKS", e, properties);
        }
        if let Some(e) = &self.logical_disk_stats {
            render_section(&mut out, "LOGICAL DISK STATISTICS", e, properties);
        }
        if let Some(e) = &self.physical_disk_stats {
            render_section(&mut out, "PHYSICAL DISK STATISTICS", e, properties);
        }
        if let Some(e) = &self.network {
            render_section(&mut out, "NETWORK INTERFACES", e, properties);
        }
        if let Some(e) = &self.os {
            render_section(&mut out, "OPERATING SYSTEM", e, properties);
        }
        if let Some(e) = &self.test_items {
            render_section(&mut out, "TEST ITEMS", e, properties);
        }
        out
    }
}

fn render_section<E: Enumeration>(out: &mut String, title: &str, enumeration: &E, properties: bool) {
    writeln!(out, "{}", title).ok();
    writeln!(out, "{}", "=".repeat(title.len())).ok();
    if properties {
        let guard = enumeration.lock();
        for instance in guard.iter().chain(guard.total_instance()) {
            writeln!(out, "{}", instance.properties()).ok();
        }
    } else {
        writeln!(out, "{}", enumeration.dump_string()).ok();
    }
    writeln!(out).ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use herakles_pal::Config;

    #[test]
    fn test_disabled_resources_are_not_built() {
        let ctx = PalContext::new(Config {
            enable_cpu: Some(false),
            enable_process: Some(false),
            enable_disk: Some(false),
            enable_network: Some(false),
            ..Config::default()
        });
        let set = Enumerations::build(&ctx, None).unwrap();
        assert!(set.cpu.is_none());
        assert!(set.memory.is_some());
        assert!(set.os.is_some());
        assert!(set.processes.is_none());
        assert!(set.logical_disks.is_none());
        assert!(set.network.is_none());
        assert!(set.test_items.is_none());
    }

    #[test]
    fn test_only_builds_selected_resource() {
        let ctx = PalContext::new(Config::default());
        let set = Enumerations::build(&ctx, Some(Resource::Testitem)).unwrap();
        assert!(set.cpu.is_none());
        assert!(set.memory.is_none());
        assert!(set.os.is_none());

        assert_eq!(set.init_all(), 0);
        set.refresh();
        let text = set.render(false);
        assert!(text.starts_with("TEST ITEMS"));
        assert!(text.contains("Name = _Total"));
        assert!(text.contains("A = 1"));

        let props = set.render(true);
        assert!(props.contains("ValueA"));
        set.clean_up_all();
    }
}
