//! Platform identity and boot configuration for Keel virtual machines.
//!
//! This crate owns the leaf objects a virtual machine's boot platform is
//! assembled from: stable machine identity, hardware capability models,
//! persisted auxiliary (firmware/NVRAM) storage, the platform
//! configuration builder that composes them, and the restore-image
//! resolver used to pick a hardware model before a fresh machine is
//! created.
//!
//! Host capability gating is centralized in [`HostCapabilities`]:
//! detected once at process start, passed by reference to every gated
//! constructor, never re-queried per call.
//!
//! # Example
//!
//! ```rust,no_run
//! use keel_platform::{
//!     AuxiliaryStorage, FirmwarePlatformBuilder, HostCapabilities,
//!     MachineIdentifier, RestoreImage,
//! };
//!
//! fn main() -> Result<(), keel_platform::PlatformError> {
//!     let host = HostCapabilities::detect();
//!
//!     let image = RestoreImage::load("restore/manifest.json")?;
//!     let Some(requirements) = image.most_featureful_supported_configuration(&host) else {
//!         return Ok(()); // nothing this host can run
//!     };
//!
//!     let storage = AuxiliaryStorage::create(
//!         &host,
//!         "machine/nvram.bin",
//!         &requirements.hardware_model,
//!         false,
//!     )?;
//!
//!     let platform = FirmwarePlatformBuilder::new(&host)?
//!         .hardware_model(requirements.hardware_model)
//!         .machine_identifier(MachineIdentifier::new())
//!         .auxiliary_storage(storage)
//!         .build()?;
//!     let _ = platform;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod host;
pub mod identity;
pub mod platform;
pub mod restore;
pub mod storage;

pub use error::PlatformError;
pub use host::{HostCapabilities, HostVersion};
pub use identity::{GuestArchitecture, HardwareModel, MachineIdentifier};
pub use platform::{FirmwarePlatform, FirmwarePlatformBuilder, GenericPlatform, Platform};
pub use restore::{ConfigurationRequirements, RestoreImage};
pub use storage::AuxiliaryStorage;
