//! Herakles Platform Abstraction Layer
//!
//! Collects operating system metrics (CPU, memory, disks, processes,
//! network interfaces, OS identity) and exposes them as enumerations of entity
//! instances. Stateful enumerations run a background sampling thread that
//! keeps a short history of cumulative kernel counters, from which rates
//! and percentages are derived.
//!
//! # Features
//!
//! - **Enumerations**: keyed, insertion-ordered collections with an optional
//!   `_Total` row, reconciled against the live OS on every update
//! - **Sampling**: fixed-depth `DataSampler` history per counter
//! - **Dependency injection**: every raw data source sits behind a trait so
//!   tests can substitute fakes
//! - **Named locks**: one lock per collection, created through a registry
//!   that tracks contention
//!
//! # Usage
//!
//! ```rust
//! use herakles_pal::{Enumeration, PalContext, TestItemEnumeration};
//!
//! let ctx = PalContext::default();
//! let items = TestItemEnumeration::new(&ctx);
//! items.init().unwrap();
//! items.update(true).unwrap();
//!
//! let guard = items.lock();
//! for item in guard.iter() {
//!     println!("{} A={:?}", item.item_number(), item.value_a());
//! }
//! ```

pub mod config;
pub mod context;
pub mod cpu;
pub mod disk;
pub mod entity;
pub mod enumeration;
pub mod error;
pub mod locks;
pub mod memory;
pub mod network;
pub mod os;
pub mod process;
pub mod procfs;
pub mod property;
pub mod sampler;
pub mod sampling;
pub mod testitem;

// Re-export main types for convenience
pub use config::{Config, ConfigFormat, SamplingConfig};
pub use context::PalContext;
pub use cpu::CpuEnumeration;
pub use disk::{
    DiskKind, StaticLogicalDiskEnumeration, StaticPhysicalDiskEnumeration,
    StatisticalDiskEnumeration,
};
pub use entity::{EntityInstance, InstanceBase, TOTAL_INSTANCE_NAME};
pub use enumeration::{EntityCollection, Enumeration, KeyNormalization, PurgePolicy};
pub use error::{PalError, Result};
pub use locks::{LockInfo, LockRegistry, NamedLock};
pub use memory::MemoryEnumeration;
pub use network::NetworkInterfaceEnumeration;
pub use os::OsEnumeration;
pub use process::ProcessEnumeration;
pub use property::{Property, PropertySet, PropertyValue};
pub use sampler::DataSampler;
pub use sampling::{CancellationToken, SamplingThread};
pub use testitem::{TestItemEnumeration, TestItemInstance};
