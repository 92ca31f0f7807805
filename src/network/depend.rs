//! Data sources for network interfaces.
//!
//! Counters come from `/proc/net/dev`, state flags from
//! `/sys/class/net/<if>/flags` and IPv4 addresses from `getifaddrs(3)`.

use ahash::AHashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{PalError, Result};
use crate::procfs;

/// Cumulative interface counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetDevStats {
    pub receive_bytes: u64,
    pub receive_packets: u64,
    pub receive_errs: u64,
    pub receive_drop: u64,
    pub transmit_bytes: u64,
    pub transmit_packets: u64,
    pub transmit_errs: u64,
    pub transmit_drop: u64,
    pub collisions: u64,
}

/// One interface as seen by a single discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub stats: NetDevStats,
    /// `None` when the state could not be determined.
    pub up: Option<bool>,
    pub running: Option<bool>,
    pub loopback: bool,
    pub address: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
}

impl InterfaceInfo {
    /// Loopback interfaces and interfaces in unknown state are not reported.
    pub fn is_reportable(&self) -> bool {
        let known_state = self.up.is_some() && self.running.is_some();
        let loopback_address = self.address.is_some_and(|a| a.is_loopback());
        known_state && !self.loopback && !loopback_address
    }
}

pub trait NetworkDependencies: Send + Sync {
    /// Every interface the kernel lists, reportable or not.
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>>;
}

const IFF_UP: u32 = 0x1;
const IFF_LOOPBACK: u32 = 0x8;
const IFF_RUNNING: u32 = 0x40;

/// Parses `/proc/net/dev` content into per-interface counters.
pub fn parse_net_dev(content: &str) -> Vec<(String, NetDevStats)> {
    content
        .lines()
        .skip(2)
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            let values: Vec<u64> = rest
                .split_whitespace()
                .map(|v| v.parse().unwrap_or(0))
                .collect();
            if values.len() < 16 {
                debug!("Skipping malformed /proc/net/dev line: {}", line);
                return None;
            }
            Some((
                name.trim().to_string(),
                NetDevStats {
                    receive_bytes: values[0],
                    receive_packets: values[1],
                    receive_errs: values[2],
                    receive_drop: values[3],
                    transmit_bytes: values[8],
                    transmit_packets: values[9],
                    transmit_errs: values[10],
                    transmit_drop: values[11],
                    collisions: values[13],
                },
            ))
        })
        .collect()
}

/// Parses the hex contents of `/sys/class/net/<if>/flags`.
pub fn parse_flags(content: &str) -> Result<u32> {
    let trimmed = content.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    u32::from_str_radix(digits, 16).map_err(|_| PalError::parse("interface flags", trimmed))
}

pub struct ProcNetworkDependencies {
    proc_root: PathBuf,
    sys_root: PathBuf,
    resolve_addresses: bool,
}

impl ProcNetworkDependencies {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            sys_root: PathBuf::from("/sys"),
            resolve_addresses: true,
        }
    }

    /// Reads from alternate roots. Addresses are not resolved since they
    /// would describe the host rather than the given tree.
    pub fn with_roots(proc_root: impl Into<PathBuf>, sys_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            sys_root: sys_root.into(),
            resolve_addresses: false,
        }
    }

    fn flags(&self, name: &str) -> Option<u32> {
        let path = self.sys_root.join("class/net").join(name).join("flags");
        match procfs::read_string(&path).and_then(|s| parse_flags(&s)) {
            Ok(flags) => Some(flags),
            Err(e) => {
                debug!("No flags for interface {}: {}", name, e);
                None
            }
        }
    }

    fn addresses(&self) -> AHashMap<String, (Ipv4Addr, Option<Ipv4Addr>)> {
        let mut out = AHashMap::new();
        if !self.resolve_addresses {
            return out;
        }
        let addrs = match nix::ifaddrs::getifaddrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!("getifaddrs failed: {}", e);
                return out;
            }
        };
        for ifaddr in addrs {
            let Some(address) = ifaddr
                .address
                .as_ref()
                .and_then(|a| a.as_sockaddr_in())
                .map(|sin| Ipv4Addr::from(sin.ip()))
            else {
                continue;
            };
            let netmask = ifaddr
                .netmask
                .as_ref()
                .and_then(|m| m.as_sockaddr_in())
                .map(|sin| Ipv4Addr::from(sin.ip()));
            out.entry(ifaddr.interface_name).or_insert((address, netmask));
        }
        out
    }
}

impl Default for ProcNetworkDependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkDependencies for ProcNetworkDependencies {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        let content = procfs::read_string(&self.proc_root.join("net/dev"))?;
        let addresses = self.addresses();

        Ok(parse_net_dev(&content)
            .into_iter()
            .map(|(name, stats)| {
                let flags = self.flags(&name);
                let (address, netmask) = match addresses.get(&name) {
                    Some(&(a, m)) => (Some(a), m),
                    None => (None, None),
                };
                InterfaceInfo {
                    up: flags.map(|f| f & IFF_UP != 0),
                    running: flags.map(|f| f & IFF_RUNNING != 0),
                    loopback: flags.is_some_and(|f| f & IFF_LOOPBACK != 0),
                    address,
                    netmask,
                    stats,
                    name,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 1000      10    0    0    0     0          0         0     1000      10    0    0    0     0       0          0
  eth0: 123456   789    1    2    0     0          0         0   654321    987    3    4    0     5       0          0
";

    #[test]
    fn test_parse_net_dev() {
        let parsed = parse_net_dev(NET_DEV);
        assert_eq!(parsed.len(), 2);
        let (name, eth0) = &parsed[1];
        assert_eq!(name, "eth0");
        assert_eq!(eth0.receive_bytes, 123456);
        assert_eq!(eth0.receive_packets, 789);
        assert_eq!(eth0.receive_drop, 2);
        assert_eq!(eth0.transmit_bytes, 654321);
        assert_eq!(eth0.transmit_errs, 3);
        assert_eq!(eth0.collisions, 5);
    }

    #[test]
    fn test_parse_flags() {
        assert_eq!(parse_flags("0x1043\n").unwrap(), 0x1043);
        assert!(parse_flags("zz").is_err());
    }

    #[test]
    fn test_proc_dependencies_flags_from_sysfs() {
        let dir = tempdir().expect("Failed to create temp dir");
        let proc_root = dir.path().join("proc");
        let sys_root = dir.path().join("sys");
        fs::create_dir_all(proc_root.join("net")).unwrap();
        fs::write(proc_root.join("net/dev"), NET_DEV).unwrap();
        for (name, flags) in [("lo", "0x9"), ("eth0", "0x1043")] {
            let d = sys_root.join("class/net").join(name);
            fs::create_dir_all(&d).unwrap();
            fs::write(d.join("flags"), flags).unwrap();
        }

        let deps = ProcNetworkDependencies::with_roots(&proc_root, &sys_root);
        let interfaces = deps.interfaces().unwrap();
        assert_eq!(interfaces.len(), 2);
        assert!(interfaces[0].loopback);
        assert!(!interfaces[0].is_reportable());
        assert_eq!(interfaces[1].up, Some(true));
        assert_eq!(interfaces[1].running, Some(true));
        assert!(interfaces[1].is_reportable());
    }

    #[test]
    fn test_unknown_state_is_not_reportable() {
        let info = InterfaceInfo {
            name: "tun0".into(),
            up: None,
            running: Some(true),
            ..InterfaceInfo::default()
        };
        assert!(!info.is_reportable());
    }
}
