//! Network interface enumeration.
//!
//! Interfaces are rediscovered on every update and purged once they
//! disappear. Loopback interfaces and interfaces whose up/running state is
//! unknown are never added.

pub mod depend;
pub mod instance;

use std::sync::Arc;
use tracing::instrument;

use crate::context::PalContext;
use crate::enumeration::{reconcile, EntityCollection, Enumeration, KeyNormalization, PurgePolicy};
use crate::error::Result;
use crate::locks::NamedLock;

pub use depend::{InterfaceInfo, NetDevStats, NetworkDependencies, ProcNetworkDependencies};
pub use instance::{NetworkInterfaceInstance, NETWORK_SAMPLE_DEPTH};

pub struct NetworkInterfaceEnumeration {
    collection: NamedLock<EntityCollection<NetworkInterfaceInstance>>,
    deps: Arc<dyn NetworkDependencies>,
    policy: PurgePolicy,
}

impl NetworkInterfaceEnumeration {
    pub fn new(ctx: &PalContext, deps: Arc<dyn NetworkDependencies>) -> Self {
        Self {
            collection: ctx.create_lock(
                "herakles_pal.network",
                EntityCollection::new(KeyNormalization::Exact),
            ),
            deps,
            policy: ctx.config().network_policy(),
        }
    }

    pub fn with_policy(mut self, policy: PurgePolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Enumeration for NetworkInterfaceEnumeration {
    type Instance = NetworkInterfaceInstance;

    fn collection(&self) -> &NamedLock<EntityCollection<NetworkInterfaceInstance>> {
        &self.collection
    }

    /// Every pass carries fresh counters, so instances are refreshed from
    /// the discovery data rather than queried again.
    #[instrument(skip(self, collection))]
    fn update_no_lock(
        &self,
        collection: &mut EntityCollection<NetworkInterfaceInstance>,
        _update_instances: bool,
    ) -> Result<()> {
        let discovered: Vec<(String, InterfaceInfo)> = self
            .deps
            .interfaces()?
            .into_iter()
            .filter(InterfaceInfo::is_reportable)
            .map(|info| (info.name.clone(), info))
            .collect();

        let deps = self.deps.clone();
        reconcile(
            collection,
            discovered,
            self.policy,
            false,
            |instance, info| instance.apply_info(info),
            |_, info| Some(NetworkInterfaceInstance::new(deps.clone(), info)),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityInstance;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeNetwork {
        interfaces: Mutex<Vec<InterfaceInfo>>,
    }

    impl FakeNetwork {
        fn add(&self, name: &str, up: Option<bool>, address: Option<Ipv4Addr>, rx: u64) {
            let mut list = self.interfaces.lock().unwrap();
            list.retain(|i| i.name != name);
            list.push(InterfaceInfo {
                name: name.into(),
                stats: NetDevStats {
                    receive_bytes: rx,
                    ..NetDevStats::default()
                },
                up,
                running: up,
                loopback: false,
                address,
                netmask: None,
            });
        }

        fn remove(&self, name: &str) {
            self.interfaces.lock().unwrap().retain(|i| i.name != name);
        }
    }

    impl NetworkDependencies for FakeNetwork {
        fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
            Ok(self.interfaces.lock().unwrap().clone())
        }
    }

    #[test]
    fn test_filters_and_purges() {
        let ctx = PalContext::default();
        let deps = Arc::new(FakeNetwork::default());
        deps.add("eth0", Some(true), Some(Ipv4Addr::new(10, 0, 0, 5)), 100);
        deps.add("eth1", Some(false), None, 0);
        deps.add("lo-alias", Some(true), Some(Ipv4Addr::new(127, 0, 0, 2)), 0);
        deps.add("tun0", None, None, 0);

        let net = NetworkInterfaceEnumeration::new(&ctx, deps.clone());
        net.init().unwrap();
        {
            let guard = net.lock();
            assert_eq!(guard.size(), 2);
            let eth0 = guard.get_instance("eth0").unwrap();
            assert_eq!(eth0.ip_address(), Some(Ipv4Addr::new(10, 0, 0, 5)));
            assert_eq!(eth0.is_up(), Some(true));
            assert_eq!(guard.get_instance("eth1").unwrap().is_running(), Some(false));
        }

        std::thread::sleep(std::time::Duration::from_millis(10));
        deps.remove("eth1");
        deps.add("eth0", Some(true), Some(Ipv4Addr::new(10, 0, 0, 5)), 300);
        net.update(true).unwrap();

        let guard = net.lock();
        assert_eq!(guard.size(), 1);
        let eth0 = guard.get_instance("eth0").unwrap();
        assert_eq!(eth0.bytes_received(), Some(300));
        assert!(eth0.bytes_received_per_second().is_some());
    }

    #[test]
    fn test_instance_update_not_found_after_removal() {
        let deps = Arc::new(FakeNetwork::default());
        deps.add("eth0", Some(true), None, 1);
        let info = deps.interfaces().unwrap().remove(0);
        let mut instance = NetworkInterfaceInstance::new(deps.clone(), info);
        instance.update().unwrap();
        deps.remove("eth0");
        assert!(instance.update().unwrap_err().is_not_found());
    }
}
