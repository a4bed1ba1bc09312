//! Virtual machine configuration aggregation and lifecycle control.
//!
//! This crate is the control plane above `keel-platform`: it combines a
//! platform configuration with a boot loader and device configurations
//! into one validated [`VmConfiguration`], hands it to a
//! [`VirtualMachine`], and drives that machine through its lifecycle
//! against an opaque [`HypervisorHandle`]. Machine descriptors persist
//! through [`MachinePersistence`] so identity survives restarts.
//!
//! # Example
//!
//! ```rust,ignore
//! use keel_core::{VirtualMachine, VmConfiguration};
//! use keel_platform::{GenericPlatform, HostCapabilities};
//!
//! let host = HostCapabilities::detect();
//! let mut config = VmConfiguration::new(GenericPlatform::new(&host)?);
//! config
//!     .set_cpu_count(2)
//!     .set_memory_size(2 * 1024 * 1024 * 1024)
//!     .set_boot_loader(boot_loader)
//!     .add_storage_device(root_disk);
//!
//! let vm = VirtualMachine::new(config, &host, hypervisor_handle)?;
//! vm.start().await?;
//! vm.stop().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod device;
pub mod error;
pub mod hypervisor;
pub mod persistence;
pub mod vm;

pub use config::{ValidationReport, VmConfiguration};
pub use device::{
    BootLoader, DeviceConfiguration, DiskImageDevice, EntropyDevice, KernelBootLoader,
    SerialPortDevice,
};
pub use error::{CoreError, Result};
pub use hypervisor::{HandleError, HandleState, HypervisorFault, HypervisorHandle};
pub use persistence::{MachinePersistence, PersistedMachine, PersistedState};
pub use vm::{StateChange, VirtualMachine, VmState};
