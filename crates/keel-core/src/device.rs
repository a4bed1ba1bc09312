//! Boot loader and device configurations.
//!
//! The configuration aggregator consumes boot loaders and devices through
//! the capability traits here; it never inspects their internals beyond
//! identity and validity. The concrete types in this module cover the
//! common cases: direct-kernel boot, disk-image storage, and small
//! peripherals.

use std::fmt;
use std::path::{Path, PathBuf};

use keel_error::CommonError;

use crate::error::Result;

// ============================================================================
// Capability Traits
// ============================================================================

/// Opaque boot loader capability.
///
/// The aggregator only needs to know that a boot path exists and how to
/// describe it in logs; everything else is the execution engine's
/// business.
pub trait BootLoader: Send + Sync + fmt::Debug {
    /// Describes what this loader boots, for logs and validation reports.
    fn boot_target(&self) -> String;
}

/// Capability every attachable device configuration exposes.
pub trait DeviceConfiguration: Send + Sync + fmt::Debug {
    /// Identifier, unique across every device attached to one
    /// configuration.
    fn device_id(&self) -> &str;

    /// Checks that the device description is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason on failure; the aggregator folds
    /// it into the validation report.
    fn validate(&self) -> std::result::Result<(), String>;
}

// ============================================================================
// Kernel Boot Loader
// ============================================================================

/// Boots a guest kernel image directly, without firmware.
#[derive(Debug, Clone)]
pub struct KernelBootLoader {
    kernel: PathBuf,
    initrd: Option<PathBuf>,
    cmdline: String,
}

impl KernelBootLoader {
    /// Creates a boot loader for the kernel image at `kernel_path`.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the kernel image does not exist.
    pub fn new(kernel_path: impl AsRef<Path>) -> Result<Self> {
        let kernel = kernel_path.as_ref();
        if !kernel.exists() {
            return Err(CommonError::not_found(kernel.display().to_string()).into());
        }
        Ok(Self {
            kernel: kernel.to_path_buf(),
            initrd: None,
            cmdline: String::new(),
        })
    }

    /// Sets the initial ramdisk image.
    pub fn set_initial_ramdisk(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.initrd = Some(path.into());
        self
    }

    /// Sets the kernel command line.
    pub fn set_command_line(&mut self, cmdline: impl Into<String>) -> &mut Self {
        self.cmdline = cmdline.into();
        self
    }

    /// Returns the kernel image path.
    #[must_use]
    pub fn kernel(&self) -> &Path {
        &self.kernel
    }

    /// Returns the initial ramdisk path, if one was set.
    #[must_use]
    pub fn initial_ramdisk(&self) -> Option<&Path> {
        self.initrd.as_deref()
    }

    /// Returns the kernel command line.
    #[must_use]
    pub fn command_line(&self) -> &str {
        &self.cmdline
    }
}

impl BootLoader for KernelBootLoader {
    fn boot_target(&self) -> String {
        self.kernel.display().to_string()
    }
}

// ============================================================================
// Storage Devices
// ============================================================================

/// A block storage device backed by a disk image file.
#[derive(Debug, Clone)]
pub struct DiskImageDevice {
    id: String,
    path: PathBuf,
    read_only: bool,
    bootable: bool,
}

impl DiskImageDevice {
    /// Creates a storage device from a disk image file.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the image does not exist.
    pub fn disk_image(
        id: impl Into<String>,
        path: impl AsRef<Path>,
        read_only: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CommonError::not_found(path.display().to_string()).into());
        }
        Ok(Self {
            id: id.into(),
            path: path.to_path_buf(),
            read_only,
            bootable: false,
        })
    }

    /// Marks this disk as a boot candidate.
    pub fn set_bootable(&mut self, bootable: bool) -> &mut Self {
        self.bootable = bootable;
        self
    }

    /// Returns the disk image path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the disk is attached read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns true if the guest may boot from this disk.
    #[must_use]
    pub fn is_bootable(&self) -> bool {
        self.bootable
    }
}

impl DeviceConfiguration for DiskImageDevice {
    fn device_id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.id.is_empty() {
            return Err("empty device id".to_string());
        }
        if !self.path.exists() {
            return Err(format!("disk image missing: {}", self.path.display()));
        }
        Ok(())
    }
}

// ============================================================================
// Peripherals
// ============================================================================

/// An entropy source device for the guest.
#[derive(Debug, Clone)]
pub struct EntropyDevice {
    id: String,
}

impl EntropyDevice {
    /// Creates an entropy device with the given identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl DeviceConfiguration for EntropyDevice {
    fn device_id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.id.is_empty() {
            return Err("empty device id".to_string());
        }
        Ok(())
    }
}

/// A guest serial console.
#[derive(Debug, Clone)]
pub struct SerialPortDevice {
    id: String,
    cols: u16,
    rows: u16,
}

impl SerialPortDevice {
    /// Creates a serial port with an 80x25 console.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cols: 80,
            rows: 25,
        }
    }

    /// Sets the console dimensions.
    pub fn set_dimensions(&mut self, cols: u16, rows: u16) -> &mut Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    /// Returns the console dimensions as (columns, rows).
    #[must_use]
    pub fn dimensions(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }
}

impl DeviceConfiguration for SerialPortDevice {
    fn device_id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.id.is_empty() {
            return Err("empty device id".to_string());
        }
        if self.cols == 0 || self.rows == 0 {
            return Err(format!("degenerate console size {}x{}", self.cols, self.rows));
        }
        Ok(())
    }
}
