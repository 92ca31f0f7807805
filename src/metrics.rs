//! Prometheus metrics definitions for herakles-pal.
//!
//! Gauges are refilled from the enumerations on every scrape. Label sets
//! that disappear between scrapes (exited processes, unplugged disks) are
//! dropped by resetting each vector before filling it.

use herakles_pal::{EntityInstance, Enumeration, LockInfo};
use prometheus::{Gauge, GaugeVec, Opts, Registry};

use crate::state::Enumerations;

/// Collection of Prometheus gauges fed by the enumerations.
#[derive(Clone)]
pub struct PalMetrics {
    // ========== CPU ==========
    pub cpu_busy_percent: GaugeVec,   // labels: cpu
    pub cpu_user_percent: GaugeVec,   // labels: cpu
    pub cpu_system_percent: GaugeVec, // labels: cpu
    pub cpu_iowait_percent: GaugeVec, // labels: cpu

    // ========== Memory ==========
    pub memory_total_bytes: Gauge,
    pub memory_available_bytes: Gauge,
    pub memory_used_bytes: Gauge,
    pub swap_total_bytes: Gauge,
    pub swap_used_bytes: Gauge,
    pub page_reads_per_second: Gauge,
    pub page_writes_per_second: Gauge,

    // ========== Processes ==========
    pub processes: Gauge,
    pub process_cpu_percent: GaugeVec,     // labels: pid, name
    pub process_resident_bytes: GaugeVec,  // labels: pid, name
    pub process_virtual_bytes: GaugeVec,   // labels: pid, name

    // ========== Disks ==========
    pub filesystem_size_bytes: GaugeVec,  // labels: device, mountpoint, fstype
    pub filesystem_avail_bytes: GaugeVec, // labels: device, mountpoint, fstype
    pub physical_disk_size_bytes: GaugeVec, // labels: disk
    pub disk_reads_per_second: GaugeVec,  // labels: kind, name
    pub disk_writes_per_second: GaugeVec, // labels: kind, name
    pub disk_read_bytes_per_second: GaugeVec,  // labels: kind, name
    pub disk_write_bytes_per_second: GaugeVec, // labels: kind, name
    pub disk_used_percent: GaugeVec,      // labels: kind, name

    // ========== Network ==========
    pub net_rx_bytes: GaugeVec,            // labels: iface
    pub net_tx_bytes: GaugeVec,            // labels: iface
    pub net_rx_errors: GaugeVec,           // labels: iface
    pub net_tx_errors: GaugeVec,           // labels: iface
    pub net_rx_bytes_per_second: GaugeVec, // labels: iface
    pub net_tx_bytes_per_second: GaugeVec, // labels: iface
    pub net_up: GaugeVec,                  // labels: iface

    // ========== Operating system ==========
    pub os_uptime_seconds: Gauge,
    pub os_processes: Gauge,
    pub os_users: Gauge,
    pub os_info: GaugeVec, // labels: sysname, release, machine, distribution

    // ========== Locks ==========
    pub lock_acquisitions: GaugeVec, // labels: lock
    pub lock_contended: GaugeVec,    // labels: lock
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<Gauge, prometheus::Error> {
    let g = Gauge::new(name, help)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<GaugeVec, prometheus::Error> {
    let g = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn set_opt(g: &Gauge, value: Option<u64>) {
    if let Some(v) = value {
        g.set(v as f64);
    }
}

impl PalMetrics {
    /// Creates and registers all gauges with the registry.
    pub fn new(registry: &Registry) -> Result<Self, Box<dyn std::error::Error>> {
        let iface = &["iface"];
        let disk = &["kind", "name"];
        let fs = &["device", "mountpoint", "fstype"];
        let proc = &["pid", "name"];
        let cpu = &["cpu"];

        Ok(Self {
            cpu_busy_percent: gauge_vec(
                registry,
                "herakles_pal_cpu_busy_percent",
                "Non-idle share of CPU time over the sample window",
                cpu,
            )?,
            cpu_user_percent: gauge_vec(
                registry,
                "herakles_pal_cpu_user_percent",
                "User mode share of CPU time over the sample window",
                cpu,
            )?,
            cpu_system_percent: gauge_vec(
                registry,
                "herakles_pal_cpu_system_percent",
                "Kernel mode share of CPU time over the sample window",
                cpu,
            )?,
            cpu_iowait_percent: gauge_vec(
                registry,
                "herakles_pal_cpu_iowait_percent",
                "I/O wait share of CPU time over the sample window",
                cpu,
            )?,
            memory_total_bytes: gauge(
                registry,
                "herakles_pal_memory_total_bytes",
                "Total physical memory in bytes",
            )?,
            memory_available_bytes: gauge(
                registry,
                "herakles_pal_memory_available_bytes",
                "Free memory plus buffers and page cache in bytes",
            )?,
            memory_used_bytes: gauge(
                registry,
                "herakles_pal_memory_used_bytes",
                "Used physical memory in bytes",
            )?,
            swap_total_bytes: gauge(
                registry,
                "herakles_pal_swap_total_bytes",
                "Total swap space in bytes",
            )?,
            swap_used_bytes: gauge(
                registry,
                "herakles_pal_swap_used_bytes",
                "Used swap space in bytes",
            )?,
            page_reads_per_second: gauge(
                registry,
                "herakles_pal_page_reads_per_second",
                "Pages read from disk per second over the sampling window",
            )?,
            page_writes_per_second: gauge(
                registry,
                "herakles_pal_page_writes_per_second",
                "Pages written to disk per second over the sampling window",
            )?,

            processes: gauge(
                registry,
                "herakles_pal_processes",
                "Number of processes in the process enumeration",
            )?,
            process_cpu_percent: gauge_vec(
                registry,
                "herakles_pal_process_cpu_percent",
                "Process CPU usage over the sampling window",
                proc,
            )?,
            process_resident_bytes: gauge_vec(
                registry,
                "herakles_pal_process_resident_bytes",
                "Process resident set size in bytes",
                proc,
            )?,
            process_virtual_bytes: gauge_vec(
                registry,
                "herakles_pal_process_virtual_bytes",
                "Process virtual memory size in bytes",
                proc,
            )?,

            filesystem_size_bytes: gauge_vec(
                registry,
                "herakles_pal_filesystem_size_bytes",
                "Mounted file system size in bytes",
                fs,
            )?,
            filesystem_avail_bytes: gauge_vec(
                registry,
                "herakles_pal_filesystem_avail_bytes",
                "Space available to unprivileged users in bytes",
                fs,
            )?,
            physical_disk_size_bytes: gauge_vec(
                registry,
                "herakles_pal_physical_disk_size_bytes",
                "Block device size in bytes",
                &["disk"],
            )?,
            disk_reads_per_second: gauge_vec(
                registry,
                "herakles_pal_disk_reads_per_second",
                "Completed reads per second",
                disk,
            )?,
            disk_writes_per_second: gauge_vec(
                registry,
                "herakles_pal_disk_writes_per_second",
                "Completed writes per second",
                disk,
            )?,
            disk_read_bytes_per_second: gauge_vec(
                registry,
                "herakles_pal_disk_read_bytes_per_second",
                "Bytes read per second",
                disk,
            )?,
            disk_write_bytes_per_second: gauge_vec(
                registry,
                "herakles_pal_disk_write_bytes_per_second",
                "Bytes written per second",
                disk,
            )?,
            disk_used_percent: gauge_vec(
                registry,
                "herakles_pal_disk_used_percent",
                "Used space in percent of the disk size",
                disk,
            )?,

            net_rx_bytes: gauge_vec(
                registry,
                "herakles_pal_net_rx_bytes",
                "Bytes received since boot",
                iface,
            )?,
            net_tx_bytes: gauge_vec(
                registry,
                "herakles_pal_net_tx_bytes",
                "Bytes sent since boot",
                iface,
            )?,
            net_rx_errors: gauge_vec(
                registry,
                "herakles_pal_net_rx_errors",
                "Receive errors since boot",
                iface,
            )?,
            net_tx_errors: gauge_vec(
                registry,
                "herakles_pal_net_tx_errors",
                "Transmit errors since boot",
                iface,
            )?,
            net_rx_bytes_per_second: gauge_vec(
                registry,
                "herakles_pal_net_rx_bytes_per_second",
                "Bytes received per second between the last two updates",
                iface,
            )?,
            net_tx_bytes_per_second: gauge_vec(
                registry,
                "herakles_pal_net_tx_bytes_per_second",
                "Bytes sent per second between the last two updates",
                iface,
            )?,
            net_up: gauge_vec(
                registry,
                "herakles_pal_net_up",
                "Whether the interface is administratively up (1) or down (0)",
                iface,
            )?,

            os_uptime_seconds: gauge(
                registry,
                "herakles_pal_os_uptime_seconds",
                "Seconds since boot",
            )?,
            os_processes: gauge(
                registry,
                "herakles_pal_os_processes",
                "Number of processes reported by the kernel",
            )?,
            os_users: gauge(
                registry,
                "herakles_pal_os_users",
                "Number of logged in users",
            )?,
            os_info: gauge_vec(
                registry,
                "herakles_pal_os_info",
                "Operating system identity (always 1)",
                &["sysname", "release", "machine", "distribution"],
            )?,

            lock_acquisitions: gauge_vec(
                registry,
                "herakles_pal_lock_acquisitions",
                "Acquisitions of a named enumeration lock",
                &["lock"],
            )?,
            lock_contended: gauge_vec(
                registry,
                "herakles_pal_lock_contended",
                "Acquisitions that had to wait for a named lock",
                &["lock"],
            )?,
        })
    }

    /// Refills every gauge from the current enumeration contents.
    pub fn collect(&self, set: &Enumerations, locks: &[LockInfo]) {
        self.collect_cpu(set);
        self.collect_memory(set);
        self.collect_processes(set);
        self.collect_disks(set);
        self.collect_network(set);
        self.collect_os(set);

        self.lock_acquisitions.reset();
        self.lock_contended.reset();
        for lock in locks {
            self.lock_acquisitions
                .with_label_values(&[lock.name.as_str()])
                .set(lock.acquisitions as f64);
            self.lock_contended
                .with_label_values(&[lock.name.as_str()])
                .set(lock.contended as f64);
        }
    }

    fn collect_cpu(&self, set: &Enumerations) {
        self.cpu_busy_percent.reset();
        self.cpu_user_percent.reset();
        self.cpu_system_percent.reset();
        self.cpu_iowait_percent.reset();

        let Some(cpus) = &set.cpu else {
            return;
        };
        let guard = cpus.lock();
        let online = guard.iter().filter(|c| c.is_online());
        for cpu in online.chain(guard.total_instance()) {
            let label = [cpu.id()];
            let pairs = [
                (&self.cpu_busy_percent, cpu.processor_time()),
                (&self.cpu_user_percent, cpu.user_time()),
                (&self.cpu_system_percent, cpu.privileged_time()),
                (&self.cpu_iowait_percent, cpu.iowait_time()),
            ];
            for (metric, value) in pairs {
                if let Some(v) = value {
                    metric.with_label_values(&label).set(v as f64);
                }
            }
        }
    }

    fn collect_memory(&self, set: &Enumerations) {
        let Some(memory) = &set.memory else {
            return;
        };
        let guard = memory.lock();
        let Some(total) = guard.total_instance() else {
            return;
        };
        set_opt(&self.memory_total_bytes, total.total_physical_memory());
        set_opt(&self.memory_available_bytes, total.available_memory());
        set_opt(&self.memory_used_bytes, total.used_memory());
        set_opt(&self.swap_total_bytes, total.total_swap());
        set_opt(&self.swap_used_bytes, total.used_swap());
        set_opt(&self.page_reads_per_second, total.page_reads());
        set_opt(&self.page_writes_per_second, total.page_writes());
    }

    fn collect_processes(&self, set: &Enumerations) {
        self.process_cpu_percent.reset();
        self.process_resident_bytes.reset();
        self.process_virtual_bytes.reset();

        let Some(processes) = &set.processes else {
            return;
        };
        let guard = processes.lock();
        self.processes.set(guard.size() as f64);

        for process in guard.iter().filter(|p| p.is_online()) {
            let pid = process.pid().to_string();
            let labels = [pid.as_str(), process.name().unwrap_or("")];
            if let Some(cpu) = process.cpu_percent() {
                self.process_cpu_percent
                    .with_label_values(&labels)
                    .set(cpu as f64);
            }
            if let Some(rss) = process.used_memory() {
                self.process_resident_bytes
                    .with_label_values(&labels)
                    .set(rss as f64);
            }
            if let Some(vsize) = process.virtual_memory() {
                self.process_virtual_bytes
                    .with_label_values(&labels)
                    .set(vsize as f64);
            }
        }
    }

    fn collect_disks(&self, set: &Enumerations) {
        self.filesystem_size_bytes.reset();
        self.filesystem_avail_bytes.reset();
        self.physical_disk_size_bytes.reset();
        self.disk_reads_per_second.reset();
        self.disk_writes_per_second.reset();
        self.disk_read_bytes_per_second.reset();
        self.disk_write_bytes_per_second.reset();
        self.disk_used_percent.reset();

        if let Some(logical) = &set.logical_disks {
            let guard = logical.lock();
            for fs in guard.iter().filter(|d| d.is_online()) {
                let labels = [
                    fs.device_name().unwrap_or(""),
                    fs.mount_point().unwrap_or(""),
                    fs.file_system_type().unwrap_or(""),
                ];
                if let Some(size) = fs.size_in_bytes() {
                    self.filesystem_size_bytes
                        .with_label_values(&labels)
                        .set(size as f64);
                }
                if let Some(avail) = fs.available_space_in_bytes() {
                    self.filesystem_avail_bytes
                        .with_label_values(&labels)
                        .set(avail as f64);
                }
            }
        }

        if let Some(physical) = &set.physical_disks {
            let guard = physical.lock();
            for disk in guard.iter().filter(|d| d.is_online()) {
                if let Some(size) = disk.size_in_bytes() {
                    self.physical_disk_size_bytes
                        .with_label_values(&[disk.id()])
                        .set(size as f64);
                }
            }
        }

        for (kind, stats) in [
            ("logical", &set.logical_disk_stats),
            ("physical", &set.physical_disk_stats),
        ] {
            let Some(stats) = stats else {
                continue;
            };
            let guard = stats.lock();
            for disk in guard
                .iter()
                .filter(|d| d.is_online())
                .chain(guard.total_instance())
            {
                let labels = [kind, disk.id()];
                if let Some(v) = disk.reads_per_second() {
                    self.disk_reads_per_second
                        .with_label_values(&labels)
                        .set(v as f64);
                }
                if let Some(v) = disk.writes_per_second() {
                    self.disk_writes_per_second
                        .with_label_values(&labels)
                        .set(v as f64);
                }
                if let Some((read, write)) = disk.bytes_per_second() {
                    self.disk_read_bytes_per_second
                        .with_label_values(&labels)
                        .set(read as f64);
                    self.disk_write_bytes_per_second
                        .with_label_values(&labels)
                        .set(write as f64);
                }
                if let Some(v) = disk.percent_used_space() {
                    self.disk_used_percent
                        .with_label_values(&labels)
                        .set(v as f64);
                }
            }
        }
    }

    fn collect_network(&self, set: &Enumerations) {
        self.net_rx_bytes.reset();
        self.net_tx_bytes.reset();
        self.net_rx_errors.reset();
        self.net_tx_errors.reset();
        self.net_rx_bytes_per_second.reset();
        self.net_tx_bytes_per_second.reset();
        self.net_up.reset();

        let Some(network) = &set.network else {
            return;
        };
        let guard = network.lock();
        for nic in guard.iter().filter(|n| n.is_online()) {
            let labels = [nic.name()];
            let pairs = [
                (&self.net_rx_bytes, nic.bytes_received()),
                (&self.net_tx_bytes, nic.bytes_sent()),
                (&self.net_rx_errors, nic.errors_receiving()),
                (&self.net_tx_errors, nic.errors_sending()),
                (&self.net_rx_bytes_per_second, nic.bytes_received_per_second()),
                (&self.net_tx_bytes_per_second, nic.bytes_sent_per_second()),
            ];
            for (metric, value) in pairs {
                if let Some(v) = value {
                    metric.with_label_values(&labels).set(v as f64);
                }
            }
            if let Some(up) = nic.is_up() {
                self.net_up
                    .with_label_values(&labels)
                    .set(if up { 1.0 } else { 0.0 });
            }
        }
    }

    fn collect_os(&self, set: &Enumerations) {
        self.os_info.reset();

        let Some(os) = &set.os else {
            return;
        };
        let guard = os.lock();
        let Some(total) = guard.total_instance() else {
            return;
        };
        set_opt(&self.os_uptime_seconds, total.system_uptime());
        set_opt(&self.os_processes, total.number_of_processes());
        set_opt(&self.os_users, total.number_of_users());
        self.os_info
            .with_label_values(&[
                total.os_type().unwrap_or(""),
                total.release().unwrap_or(""),
                total.machine().unwrap_or(""),
                total.distribution().unwrap_or(""),
            ])
            .set(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Resource;
    use herakles_pal::{Config, PalContext};
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_metrics_register_once() {
        let registry = Registry::new();
        assert!(PalMetrics::new(&registry).is_ok());
        // Names are unique per registry.
        assert!(PalMetrics::new(&registry).is_err());
    }

    #[test]
    fn test_collect_lock_stats() {
        let registry = Registry::new();
        let metrics = PalMetrics::new(&registry).unwrap();
        let ctx = PalContext::new(Config::default());
        let set = Enumerations::build(&ctx, Some(Resource::Testitem)).unwrap();
        set.init_all();

        metrics.collect(&set, &ctx.lock_stats());
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("herakles_pal_lock_acquisitions{lock=\"herakles_pal.testitem\"}"));
        assert!(!text.contains("herakles_pal_process_cpu_percent{"));
    }
}
