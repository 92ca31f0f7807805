//! One network interface.

use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::entity::{base_properties, EntityInstance, InstanceBase};
use crate::error::{PalError, Result};
use crate::property::PropertySet;
use crate::sampler::DataSampler;

use super::depend::{InterfaceInfo, NetDevStats, NetworkDependencies};

/// Byte counter samples kept per interface.
pub const NETWORK_SAMPLE_DEPTH: usize = 2;

type ByteSampler = DataSampler<u64, NETWORK_SAMPLE_DEPTH>;

pub struct NetworkInterfaceInstance {
    base: InstanceBase,
    deps: Arc<dyn NetworkDependencies>,
    info: InterfaceInfo,
    received: ByteSampler,
    sent: ByteSampler,
}

impl NetworkInterfaceInstance {
    pub fn new(deps: Arc<dyn NetworkDependencies>, info: InterfaceInfo) -> Self {
        let mut instance = Self {
            base: InstanceBase::new(info.name.clone(), false),
            deps,
            info: InterfaceInfo::default(),
            received: ByteSampler::new(),
            sent: ByteSampler::new(),
        };
        instance.apply_info(info);
        instance
    }

    pub(crate) fn apply_info(&mut self, info: InterfaceInfo) {
        self.received.add_sample(info.stats.receive_bytes);
        self.sent.add_sample(info.stats.transmit_bytes);
        self.info = info;
    }

    fn stats(&self) -> &NetDevStats {
        &self.info.stats
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn ip_address(&self) -> Option<Ipv4Addr> {
        self.info.address
    }

    pub fn netmask(&self) -> Option<Ipv4Addr> {
        self.info.netmask
    }

    pub fn bytes_received(&self) -> Option<u64> {
        Some(self.stats().receive_bytes)
    }

    pub fn bytes_sent(&self) -> Option<u64> {
        Some(self.stats().transmit_bytes)
    }

    pub fn packets_received(&self) -> Option<u64> {
        Some(self.stats().receive_packets)
    }

    pub fn packets_sent(&self) -> Option<u64> {
        Some(self.stats().transmit_packets)
    }

    pub fn errors_receiving(&self) -> Option<u64> {
        Some(self.stats().receive_errs)
    }

    pub fn errors_sending(&self) -> Option<u64> {
        Some(self.stats().transmit_errs)
    }

    pub fn drops_receiving(&self) -> Option<u64> {
        Some(self.stats().receive_drop)
    }

    pub fn drops_sending(&self) -> Option<u64> {
        Some(self.stats().transmit_drop)
    }

    pub fn collisions(&self) -> Option<u64> {
        Some(self.stats().collisions)
    }

    pub fn is_up(&self) -> Option<bool> {
        self.info.up
    }

    pub fn is_running(&self) -> Option<bool> {
        self.info.running
    }

    /// Receive rate between the last two discovery passes.
    pub fn bytes_received_per_second(&self) -> Option<u64> {
        self.received
            .rate_per_second(NETWORK_SAMPLE_DEPTH)
            .map(|r| r.round() as u64)
    }

    pub fn bytes_sent_per_second(&self) -> Option<u64> {
        self.sent
            .rate_per_second(NETWORK_SAMPLE_DEPTH)
            .map(|r| r.round() as u64)
    }
}

impl EntityInstance for NetworkInterfaceInstance {
    fn base(&self) -> &InstanceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut InstanceBase {
        &mut self.base
    }

    fn update(&mut self) -> Result<()> {
        let info = self
            .deps
            .interfaces()?
            .into_iter()
            .find(|i| i.name == self.info.name)
            .ok_or_else(|| PalError::not_found(format!("interface {}", self.info.name)))?;
        self.apply_info(info);
        Ok(())
    }

    fn dump_string(&self) -> String {
        format!(
            "NetworkInterfaceInstance: Name = {}, IP = {:?}, Up = {:?}, Running = {:?}, \
             RxBytes = {}, TxBytes = {}, Online = {}",
            self.info.name,
            self.info.address,
            self.info.up,
            self.info.running,
            self.stats().receive_bytes,
            self.stats().transmit_bytes,
            self.is_online()
        )
    }

    fn properties(&self) -> PropertySet {
        let mut set = base_properties(&self.base);
        set.add_optional("IPAddress", self.ip_address().map(|a| a.to_string()));
        set.add_optional("Netmask", self.netmask().map(|a| a.to_string()));
        set.add_optional("BytesReceived", self.bytes_received());
        set.add_optional("BytesSent", self.bytes_sent());
        set.add_optional("PacketsReceived", self.packets_received());
        set.add_optional("PacketsSent", self.packets_sent());
        set.add_optional("ErrorsReceiving", self.errors_receiving());
        set.add_optional("ErrorsSending", self.errors_sending());
        set.add_optional("DropsReceiving", self.drops_receiving());
        set.add_optional("DropsSending", self.drops_sending());
        set.add_optional("Collisions", self.collisions());
        set.add_optional("Up", self.is_up());
        set.add_optional("Running", self.is_running());
        set
    }
}
