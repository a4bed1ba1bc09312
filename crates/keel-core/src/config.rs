//! Virtual machine configuration.
//!
//! The aggregator combines exactly one platform configuration with a boot
//! loader, storage devices, and peripheral devices, then checks the whole
//! object at once. Validation collects every issue rather than stopping
//! at the first, so a caller can fix all of them in one pass; it never
//! mutates state and is safe to call repeatedly.

use std::collections::HashSet;
use std::fmt;

use keel_platform::{HostCapabilities, Platform};

use crate::device::{BootLoader, DeviceConfiguration, DiskImageDevice};

/// Default vCPU count for a new configuration.
const DEFAULT_CPU_COUNT: u32 = 1;

/// Default guest memory for a new configuration: 512 MiB.
const DEFAULT_MEMORY_SIZE: u64 = 512 * 1024 * 1024;

// ============================================================================
// Validation Report
// ============================================================================

/// Complete list of problems found by whole-configuration validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    issues: Vec<String>,
}

impl ValidationReport {
    fn push(&mut self, issue: impl Into<String>) {
        self.issues.push(issue.into());
    }

    /// Returns every issue found, in discovery order.
    #[must_use]
    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    /// Returns true if validation found nothing wrong.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.issues.join("; "))
    }
}

impl std::error::Error for ValidationReport {}

// ============================================================================
// VM Configuration
// ============================================================================

/// Aggregate description of one virtual machine.
///
/// Use the setter methods to assemble the configuration, then
/// [`validate`](Self::validate) it before handing it to
/// [`VirtualMachine::new`](crate::vm::VirtualMachine::new). The machine
/// takes the configuration by value; after that hand-off no further
/// mutation is possible, which is how the configuration freeze is
/// enforced.
#[derive(Debug)]
pub struct VmConfiguration {
    platform: Box<dyn Platform>,
    boot_loader: Option<Box<dyn BootLoader>>,
    storage_devices: Vec<DiskImageDevice>,
    peripheral_devices: Vec<Box<dyn DeviceConfiguration>>,
    cpu_count: u32,
    memory_size: u64,
}

impl VmConfiguration {
    /// Creates a configuration around the given platform, with default
    /// CPU and memory sizing and no devices.
    #[must_use]
    pub fn new(platform: impl Platform + 'static) -> Self {
        Self {
            platform: Box::new(platform),
            boot_loader: None,
            storage_devices: Vec::new(),
            peripheral_devices: Vec::new(),
            cpu_count: DEFAULT_CPU_COUNT,
            memory_size: DEFAULT_MEMORY_SIZE,
        }
    }

    /// Sets the number of vCPUs.
    pub fn set_cpu_count(&mut self, count: u32) -> &mut Self {
        self.cpu_count = count;
        self
    }

    /// Sets the guest memory size in bytes.
    pub fn set_memory_size(&mut self, bytes: u64) -> &mut Self {
        self.memory_size = bytes;
        self
    }

    /// Sets the boot loader.
    pub fn set_boot_loader(&mut self, boot_loader: impl BootLoader + 'static) -> &mut Self {
        self.boot_loader = Some(Box::new(boot_loader));
        self
    }

    /// Adds a storage device.
    pub fn add_storage_device(&mut self, device: DiskImageDevice) -> &mut Self {
        self.storage_devices.push(device);
        self
    }

    /// Adds a peripheral device.
    pub fn add_peripheral_device(
        &mut self,
        device: impl DeviceConfiguration + 'static,
    ) -> &mut Self {
        self.peripheral_devices.push(Box::new(device));
        self
    }

    /// Returns the configured vCPU count.
    #[must_use]
    pub fn cpu_count(&self) -> u32 {
        self.cpu_count
    }

    /// Returns the configured memory size in bytes.
    #[must_use]
    pub fn memory_size(&self) -> u64 {
        self.memory_size
    }

    /// Returns the platform configuration.
    #[must_use]
    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    /// Returns the boot loader, if one is set.
    #[must_use]
    pub fn boot_loader(&self) -> Option<&dyn BootLoader> {
        self.boot_loader.as_deref()
    }

    /// Returns the attached storage devices.
    #[must_use]
    pub fn storage_devices(&self) -> &[DiskImageDevice] {
        &self.storage_devices
    }

    /// Returns the attached peripheral devices.
    #[must_use]
    pub fn peripheral_devices(&self) -> &[Box<dyn DeviceConfiguration>] {
        &self.peripheral_devices
    }

    /// Validates the whole configuration against the host.
    ///
    /// Checks, in order: the platform's own consistency, the presence of
    /// a boot path (a boot loader or at least one bootable storage
    /// device), device identifier uniqueness across all device lists,
    /// each device's own validity, and CPU/memory sizing against host
    /// bounds. All failures are collected into one report.
    ///
    /// Idempotent and side-effect-free: two calls on an unmodified
    /// configuration return identical results.
    ///
    /// # Errors
    ///
    /// Returns the complete [`ValidationReport`] if anything is wrong.
    pub fn validate(&self, host: &HostCapabilities) -> Result<(), ValidationReport> {
        let mut report = ValidationReport::default();

        if let Err(e) = self.platform.validate() {
            report.push(format!("platform ({}): {e}", self.platform.kind()));
        }

        let has_bootable_disk = self.storage_devices.iter().any(DiskImageDevice::is_bootable);
        if self.boot_loader.is_none() && !has_bootable_disk {
            report.push("no boot loader and no bootable storage device");
        }

        let mut seen = HashSet::new();
        for id in self.device_ids() {
            if !seen.insert(id) {
                report.push(format!("duplicate device id: {id}"));
            }
        }

        for device in self.devices() {
            if let Err(reason) = device.validate() {
                report.push(format!("device {}: {reason}", device.device_id()));
            }
        }

        if self.cpu_count < host.min_cpu_count() || self.cpu_count > host.max_cpu_count() {
            report.push(format!(
                "cpu count {} outside host range {}..={}",
                self.cpu_count,
                host.min_cpu_count(),
                host.max_cpu_count()
            ));
        }
        if self.memory_size < host.min_memory_size()
            || self.memory_size > host.max_memory_size()
        {
            report.push(format!(
                "memory size {} outside host range {}..={}",
                self.memory_size,
                host.min_memory_size(),
                host.max_memory_size()
            ));
        }

        if report.is_empty() {
            Ok(())
        } else {
            Err(report)
        }
    }

    fn devices(&self) -> impl Iterator<Item = &dyn DeviceConfiguration> {
        self.storage_devices
            .iter()
            .map(|d| d as &dyn DeviceConfiguration)
            .chain(self.peripheral_devices.iter().map(|d| &**d))
    }

    fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.devices().map(DeviceConfiguration::device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{EntropyDevice, SerialPortDevice};
    use keel_platform::{GenericPlatform, GuestArchitecture, HostVersion};

    fn test_host() -> HostCapabilities {
        HostCapabilities::new(HostVersion::new(13, 0), GuestArchitecture::Arm64, 2)
            .with_cpu_bounds(1, 8)
    }

    fn bootable_disk(id: &str, file: &tempfile::NamedTempFile) -> DiskImageDevice {
        let mut disk = DiskImageDevice::disk_image(id, file.path(), false).unwrap();
        disk.set_bootable(true);
        disk
    }

    fn valid_config(file: &tempfile::NamedTempFile) -> VmConfiguration {
        let host = test_host();
        let mut config = VmConfiguration::new(GenericPlatform::new(&host).unwrap());
        config
            .set_cpu_count(2)
            .set_memory_size(1024 * 1024 * 1024)
            .add_storage_device(bootable_disk("vda", file))
            .add_peripheral_device(EntropyDevice::new("rng0"));
        config
    }

    #[test]
    fn test_valid_configuration_passes() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = valid_config(&file);
        assert!(config.validate(&test_host()).is_ok());
    }

    #[test]
    fn test_validation_is_idempotent() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let host = test_host();
        let mut config = valid_config(&file);
        config.set_cpu_count(99); // out of range
        config.add_peripheral_device(EntropyDevice::new("rng0")); // duplicate id

        let first = config.validate(&host).unwrap_err();
        let second = config.validate(&host).unwrap_err();
        assert_eq!(first.issues(), second.issues());
    }

    #[test]
    fn test_validation_collects_all_issues() {
        let host = test_host();
        let mut config = VmConfiguration::new(GenericPlatform::new(&host).unwrap());
        config
            .set_cpu_count(0)
            .set_memory_size(1)
            .add_peripheral_device(SerialPortDevice::new("dev0"))
            .add_peripheral_device(EntropyDevice::new("dev0"));

        let report = config.validate(&host).unwrap_err();
        let rendered = report.to_string();
        // Missing boot path, duplicate id, cpu range, memory range.
        assert_eq!(report.issues().len(), 4, "report: {rendered}");
        assert!(rendered.contains("no boot loader"));
        assert!(rendered.contains("duplicate device id: dev0"));
        assert!(rendered.contains("cpu count"));
        assert!(rendered.contains("memory size"));
    }

    #[test]
    fn test_boot_loader_satisfies_boot_path() {
        let host = test_host();
        let kernel = tempfile::NamedTempFile::new().unwrap();
        let mut config = VmConfiguration::new(GenericPlatform::new(&host).unwrap());
        config.set_boot_loader(crate::device::KernelBootLoader::new(kernel.path()).unwrap());

        assert!(config.validate(&host).is_ok());
    }

    #[test]
    fn test_invalid_device_reported_with_id() {
        let host = test_host();
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut config = valid_config(&file);
        let mut serial = SerialPortDevice::new("tty0");
        serial.set_dimensions(0, 0);
        config.add_peripheral_device(serial);

        let report = config.validate(&host).unwrap_err();
        assert!(report.to_string().contains("device tty0"));
    }
}
