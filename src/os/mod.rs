//! Operating system enumeration. Holds only the `_Total` instance.

pub mod depend;
pub mod instance;

use std::sync::Arc;
use tracing::{info, instrument};

use crate::context::PalContext;
use crate::enumeration::{apply_update, EntityCollection, Enumeration, KeyNormalization};
use crate::error::Result;
use crate::locks::NamedLock;

pub use depend::{OsDependencies, ProcOsDependencies, UnameInfo};
pub use instance::OsInstance;

pub struct OsEnumeration {
    collection: NamedLock<EntityCollection<OsInstance>>,
    deps: Arc<dyn OsDependencies>,
}

impl OsEnumeration {
    pub fn new(ctx: &PalContext, deps: Arc<dyn OsDependencies>) -> Self {
        Self {
            collection: ctx.create_lock(
                "herakles_pal.os",
                EntityCollection::new(KeyNormalization::Exact),
            ),
            deps,
        }
    }
}

impl Enumeration for OsEnumeration {
    type Instance = OsInstance;

    fn collection(&self) -> &NamedLock<EntityCollection<OsInstance>> {
        &self.collection
    }

    #[instrument(skip(self))]
    fn init(&self) -> Result<()> {
        let mut guard = self.collection.lock();
        guard.set_total_instance(OsInstance::new(self.deps.clone()));
        self.update_no_lock(&mut guard, true)?;
        info!("OS enumeration initialized");
        Ok(())
    }

    fn update_no_lock(
        &self,
        collection: &mut EntityCollection<OsInstance>,
        update_instances: bool,
    ) -> Result<()> {
        if update_instances {
            if let Some(total) = collection.total_instance_mut() {
                apply_update(total);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityInstance;
    use crate::error::PalError;
    use ahash::AHashMap;

    struct FakeOs;

    impl OsDependencies for FakeOs {
        fn uname(&self) -> Result<UnameInfo> {
            Ok(UnameInfo {
                sysname: "Linux".into(),
                nodename: "box".into(),
                release: "6.1.0".into(),
                version: "#1 SMP".into(),
                machine: "x86_64".into(),
            })
        }
        fn uptime_seconds(&self) -> Result<f64> {
            Ok(120.9)
        }
        fn os_release(&self) -> Result<AHashMap<String, String>> {
            Err(PalError::not_found("/etc/os-release"))
        }
        fn process_count(&self) -> Result<u64> {
            Ok(42)
        }
        fn user_count(&self) -> Result<u64> {
            Ok(3)
        }
        fn max_processes(&self) -> Result<u64> {
            Err(PalError::Internal("unavailable".into()))
        }
    }

    #[test]
    fn test_init_fills_total() {
        let ctx = PalContext::default();
        let os = OsEnumeration::new(&ctx, Arc::new(FakeOs));
        os.init().unwrap();
        assert_eq!(os.size(), 0);

        let guard = os.lock();
        let total = guard.total_instance().unwrap();
        assert!(total.is_total());
        assert_eq!(total.system_name(), Some("box"));
        assert_eq!(total.os_type(), Some("Linux"));
        assert_eq!(total.machine(), Some("x86_64"));
        assert_eq!(total.system_uptime(), Some(120));
        assert_eq!(total.number_of_processes(), Some(42));
        assert_eq!(total.number_of_users(), Some(3));
        assert_eq!(total.distribution(), None);
        assert_eq!(total.max_number_of_processes(), None);

        let boot = total.last_boot_up_time().unwrap();
        let now = total.local_date_time().unwrap();
        assert_eq!((now - boot).num_seconds(), 120);
    }
}
