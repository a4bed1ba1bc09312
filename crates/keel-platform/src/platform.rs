//! Platform configurations.
//!
//! A platform configuration describes the boot identity of a guest: which
//! hardware model it presents, which machine identifier it carries, and
//! where its firmware state lives. Variants are selected when the
//! configuration is built, not at runtime.

use std::fmt;

use crate::error::{PlatformError, Result};
use crate::host::{
    HostCapabilities, FIRMWARE_PLATFORM_MIN_VERSION, GENERIC_PLATFORM_MIN_VERSION,
};
use crate::identity::{HardwareModel, MachineIdentifier};
use crate::storage::AuxiliaryStorage;

// ============================================================================
// Platform Trait
// ============================================================================

/// Capability trait for platform configurations.
///
/// The VM configuration aggregator consumes platforms through this trait
/// without knowing which variant it holds.
pub trait Platform: Send + Sync + fmt::Debug {
    /// Stable variant name used in logs and validation reports.
    fn kind(&self) -> &'static str;

    /// Machine identifier bound to this platform, if one is.
    fn machine_identifier(&self) -> Option<&MachineIdentifier>;

    /// Checks that the platform's fields are mutually consistent.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    fn validate(&self) -> Result<()>;
}

// ============================================================================
// Generic Platform
// ============================================================================

/// A platform configuration with no firmware identity fields.
///
/// Suitable for guests that boot from a kernel or bootable disk without
/// persisted firmware state. Works on every supported host.
#[derive(Debug, Clone)]
pub struct GenericPlatform {
    machine_identifier: Option<MachineIdentifier>,
}

impl GenericPlatform {
    /// Creates a new generic platform configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::UnsupportedHostVersion`] if the host is
    /// below the base supported version.
    pub fn new(host: &HostCapabilities) -> Result<Self> {
        host.require_version(GENERIC_PLATFORM_MIN_VERSION)?;
        Ok(Self {
            machine_identifier: None,
        })
    }

    /// Binds a machine identifier to the platform.
    #[must_use]
    pub fn with_machine_identifier(mut self, identifier: MachineIdentifier) -> Self {
        self.machine_identifier = Some(identifier);
        self
    }
}

impl Platform for GenericPlatform {
    fn kind(&self) -> &'static str {
        "generic"
    }

    fn machine_identifier(&self) -> Option<&MachineIdentifier> {
        self.machine_identifier.as_ref()
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Firmware Platform
// ============================================================================

/// A platform configuration for guests that boot through persisted
/// firmware state.
///
/// All three identity fields are required and validated together: the
/// hardware model, the machine identifier, and auxiliary storage created
/// for that same model. Instances are immutable; they can only be
/// produced by [`FirmwarePlatformBuilder`].
#[derive(Debug)]
pub struct FirmwarePlatform {
    hardware_model: HardwareModel,
    machine_identifier: MachineIdentifier,
    auxiliary_storage: AuxiliaryStorage,
}

impl FirmwarePlatform {
    /// Returns the hardware model the guest will present.
    #[must_use]
    pub fn hardware_model(&self) -> &HardwareModel {
        &self.hardware_model
    }

    /// Returns the auxiliary storage backing the guest's firmware state.
    #[must_use]
    pub fn auxiliary_storage(&self) -> &AuxiliaryStorage {
        &self.auxiliary_storage
    }
}

impl Platform for FirmwarePlatform {
    fn kind(&self) -> &'static str {
        "firmware"
    }

    fn machine_identifier(&self) -> Option<&MachineIdentifier> {
        Some(&self.machine_identifier)
    }

    fn validate(&self) -> Result<()> {
        check_model_compatibility(&self.hardware_model, &self.auxiliary_storage)
    }
}

/// Builder for [`FirmwarePlatform`].
///
/// The host version gate fires at construction, before any option is
/// applied; a host that is too old never observes a partially built
/// platform. Options accumulate on the draft with last-write-wins
/// semantics, and nothing is validated or published until the terminal
/// [`build`](Self::build) call.
#[derive(Debug)]
pub struct FirmwarePlatformBuilder<'a> {
    host: &'a HostCapabilities,
    hardware_model: Option<HardwareModel>,
    machine_identifier: Option<MachineIdentifier>,
    auxiliary_storage: Option<AuxiliaryStorage>,
}

impl<'a> FirmwarePlatformBuilder<'a> {
    /// Creates a builder against the given host capability set.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::UnsupportedHostVersion`] if the host does
    /// not support firmware-backed platforms at all.
    pub fn new(host: &'a HostCapabilities) -> Result<Self> {
        host.require_version(FIRMWARE_PLATFORM_MIN_VERSION)?;
        Ok(Self {
            host,
            hardware_model: None,
            machine_identifier: None,
            auxiliary_storage: None,
        })
    }

    /// Sets the hardware model. A repeated call replaces the previous
    /// value.
    #[must_use]
    pub fn hardware_model(mut self, model: HardwareModel) -> Self {
        self.hardware_model = Some(model);
        self
    }

    /// Sets the machine identifier. A repeated call replaces the previous
    /// value.
    #[must_use]
    pub fn machine_identifier(mut self, identifier: MachineIdentifier) -> Self {
        self.machine_identifier = Some(identifier);
        self
    }

    /// Sets the auxiliary storage. A repeated call replaces the previous
    /// value.
    #[must_use]
    pub fn auxiliary_storage(mut self, storage: AuxiliaryStorage) -> Self {
        self.auxiliary_storage = Some(storage);
        self
    }

    /// Validates the accumulated fields and commits them to an immutable
    /// [`FirmwarePlatform`].
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::MissingField`] for the first absent
    /// required field, [`PlatformError::UnsupportedModel`] if the host
    /// cannot run the model, or [`PlatformError::IncompatibleModel`] if
    /// the auxiliary storage was created for a different model.
    pub fn build(self) -> Result<FirmwarePlatform> {
        let hardware_model = self
            .hardware_model
            .ok_or(PlatformError::MissingField("hardware_model"))?;
        let machine_identifier = self
            .machine_identifier
            .ok_or(PlatformError::MissingField("machine_identifier"))?;
        let auxiliary_storage = self
            .auxiliary_storage
            .ok_or(PlatformError::MissingField("auxiliary_storage"))?;

        if !self.host.supports_model(&hardware_model) {
            return Err(PlatformError::UnsupportedModel {
                model: hardware_model.to_string(),
            });
        }
        check_model_compatibility(&hardware_model, &auxiliary_storage)?;

        tracing::debug!(
            model = %hardware_model,
            identifier = %machine_identifier,
            "built firmware platform configuration"
        );

        Ok(FirmwarePlatform {
            hardware_model,
            machine_identifier,
            auxiliary_storage,
        })
    }
}

fn check_model_compatibility(
    model: &HardwareModel,
    storage: &AuxiliaryStorage,
) -> Result<()> {
    if storage.hardware_model() == model {
        Ok(())
    } else {
        Err(PlatformError::IncompatibleModel {
            platform: model.to_string(),
            storage: storage.hardware_model().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostVersion;
    use crate::identity::GuestArchitecture;

    fn test_host() -> HostCapabilities {
        HostCapabilities::new(HostVersion::new(13, 0), GuestArchitecture::Arm64, 2)
    }

    // The temp dir is gone once this returns; the storage value keeps only
    // path and model, which is all these tests need.
    fn storage_for(model: &HardwareModel) -> AuxiliaryStorage {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvram.bin");
        AuxiliaryStorage::create(&test_host(), path, model, false).unwrap()
    }

    #[test]
    fn test_build_echoes_inputs() {
        let host = test_host();
        let model = HardwareModel::new(GuestArchitecture::Arm64, 2);
        let identifier = MachineIdentifier::new();
        let storage = storage_for(&model);
        let storage_path = storage.path().to_path_buf();

        let platform = FirmwarePlatformBuilder::new(&host)
            .unwrap()
            .hardware_model(model)
            .machine_identifier(identifier)
            .auxiliary_storage(storage)
            .build()
            .unwrap();

        assert_eq!(platform.hardware_model(), &model);
        assert_eq!(platform.machine_identifier(), Some(&identifier));
        assert_eq!(platform.auxiliary_storage().path(), storage_path);
        assert!(platform.validate().is_ok());
    }

    #[test]
    fn test_builder_gated_before_options() {
        let old_host =
            HostCapabilities::new(HostVersion::new(11, 7), GuestArchitecture::Arm64, 0);
        let err = FirmwarePlatformBuilder::new(&old_host).unwrap_err();
        assert!(matches!(err, PlatformError::UnsupportedHostVersion { .. }));
    }

    #[test]
    fn test_build_reports_missing_fields() {
        let host = test_host();

        let err = FirmwarePlatformBuilder::new(&host).unwrap().build().unwrap_err();
        assert!(matches!(err, PlatformError::MissingField("hardware_model")));

        let err = FirmwarePlatformBuilder::new(&host)
            .unwrap()
            .hardware_model(HardwareModel::new(GuestArchitecture::Arm64, 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, PlatformError::MissingField("machine_identifier")));
    }

    #[test]
    fn test_build_rejects_incompatible_storage() {
        let host = test_host();
        let platform_model = HardwareModel::new(GuestArchitecture::Arm64, 2);
        let storage_model = HardwareModel::new(GuestArchitecture::Arm64, 1);

        let err = FirmwarePlatformBuilder::new(&host)
            .unwrap()
            .hardware_model(platform_model)
            .machine_identifier(MachineIdentifier::new())
            .auxiliary_storage(storage_for(&storage_model))
            .build()
            .unwrap_err();

        assert!(matches!(err, PlatformError::IncompatibleModel { .. }));
    }

    #[test]
    fn test_repeated_option_last_write_wins() {
        let host = test_host();
        let first = MachineIdentifier::new();
        let second = MachineIdentifier::new();
        let model = HardwareModel::new(GuestArchitecture::Arm64, 1);

        let platform = FirmwarePlatformBuilder::new(&host)
            .unwrap()
            .machine_identifier(first)
            .hardware_model(model)
            .auxiliary_storage(storage_for(&model))
            .machine_identifier(second)
            .build()
            .unwrap();

        assert_eq!(platform.machine_identifier(), Some(&second));
    }

    #[test]
    fn test_generic_platform() {
        let host = test_host();
        let platform = GenericPlatform::new(&host).unwrap();
        assert_eq!(platform.kind(), "generic");
        assert!(platform.machine_identifier().is_none());

        let identifier = MachineIdentifier::new();
        let platform = platform.with_machine_identifier(identifier);
        assert_eq!(platform.machine_identifier(), Some(&identifier));
        assert!(platform.validate().is_ok());
    }
}
