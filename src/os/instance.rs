//! The operating system instance: a single `_Total` row.

use chrono::{DateTime, Duration as ChronoDuration, Local};
use std::sync::Arc;
use tracing::debug;

use crate::entity::{base_properties, EntityInstance, InstanceBase};
use crate::error::Result;
use crate::property::PropertySet;

use super::depend::{OsDependencies, UnameInfo};

pub struct OsInstance {
    base: InstanceBase,
    deps: Arc<dyn OsDependencies>,
    uname: Option<UnameInfo>,
    distribution: Option<String>,
    uptime_seconds: Option<u64>,
    now: Option<DateTime<Local>>,
    processes: Option<u64>,
    users: Option<u64>,
    max_processes: Option<u64>,
}

impl OsInstance {
    pub fn new(deps: Arc<dyn OsDependencies>) -> Self {
        Self {
            base: InstanceBase::total(),
            deps,
            uname: None,
            distribution: None,
            uptime_seconds: None,
            now: None,
            processes: None,
            users: None,
            max_processes: None,
        }
    }

    /// Host name.
    pub fn system_name(&self) -> Option<&str> {
        self.uname.as_ref().map(|u| u.nodename.as_str())
    }

    /// Kernel name, e.g. `Linux`.
    pub fn os_type(&self) -> Option<&str> {
        self.uname.as_ref().map(|u| u.sysname.as_str())
    }

    pub fn release(&self) -> Option<&str> {
        self.uname.as_ref().map(|u| u.release.as_str())
    }

    pub fn version(&self) -> Option<&str> {
        self.uname.as_ref().map(|u| u.version.as_str())
    }

    pub fn machine(&self) -> Option<&str> {
        self.uname.as_ref().map(|u| u.machine.as_str())
    }

    /// Distribution name from `os-release`.
    pub fn distribution(&self) -> Option<&str> {
        self.distribution.as_deref()
    }

    pub fn system_uptime(&self) -> Option<u64> {
        self.uptime_seconds
    }

    pub fn last_boot_up_time(&self) -> Option<DateTime<Local>> {
        let uptime = i64::try_from(self.uptime_seconds?).ok()?;
        Some(self.now? - ChronoDuration::seconds(uptime))
    }

    /// Time of the last update.
    pub fn local_date_time(&self) -> Option<DateTime<Local>> {
        self.now
    }

    /// Offset from UTC in minutes.
    pub fn current_time_zone(&self) -> Option<i32> {
        self.now.map(|n| n.offset().local_minus_utc() / 60)
    }

    pub fn number_of_processes(&self) -> Option<u64> {
        self.processes
    }

    pub fn number_of_users(&self) -> Option<u64> {
        self.users
    }

    pub fn max_number_of_processes(&self) -> Option<u64> {
        self.max_processes
    }

    /// Linux has no license limit; zero means unlimited.
    pub fn number_of_licensed_users(&self) -> Option<u64> {
        Some(0)
    }
}

impl EntityInstance for OsInstance {
    fn base(&self) -> &InstanceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut InstanceBase {
        &mut self.base
    }

    /// uname and uptime are required; the remaining values fall back to
    /// unsupported when their source is unavailable.
    fn update(&mut self) -> Result<()> {
        self.uname = Some(self.deps.uname()?);
        self.uptime_seconds = Some(self.deps.uptime_seconds()? as u64);
        self.now = Some(Local::now());

        self.distribution = match self.deps.os_release() {
            Ok(release) => release
                .get("PRETTY_NAME")
                .or_else(|| release.get("NAME"))
                .cloned(),
            Err(e) => {
                debug!("No os-release: {}", e);
                None
            }
        };
        self.processes = self.deps.process_count().ok();
        self.users = self.deps.user_count().ok();
        self.max_processes = self.deps.max_processes().ok();
        Ok(())
    }

    fn dump_string(&self) -> String {
        format!(
            "OsInstance: Name = {:?}, Type = {:?}, Release = {:?}, Distribution = {:?}, \
             Uptime = {:?}, Processes = {:?}, Users = {:?}",
            self.system_name(),
            self.os_type(),
            self.release(),
            self.distribution(),
            self.uptime_seconds,
            self.processes,
            self.users
        )
    }

    fn properties(&self) -> PropertySet {
        let mut set = base_properties(&self.base);
        set.add_optional("CSName", self.system_name());
        set.add_optional("OSType", self.os_type());
        set.add_optional("Release", self.release());
        set.add_optional("Version", self.version());
        set.add_optional("Machine", self.machine());
        set.add_optional("Distribution", self.distribution());
        set.add_optional("LastBootUpTime", self.last_boot_up_time());
        set.add_optional("LocalDateTime", self.local_date_time());
        set.add_optional("CurrentTimeZone", self.current_time_zone());
        set.add_optional("SystemUpTime", self.system_uptime());
        set.add_optional("NumberOfProcesses", self.number_of_processes());
        set.add_optional("NumberOfUsers", self.number_of_users());
        set.add_optional("MaxNumberOfProcesses", self.max_number_of_processes());
        set.add_optional("NumberOfLicensedUsers", self.number_of_licensed_users());
        set
    }
}
