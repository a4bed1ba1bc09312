//! Host capability gate.
//!
//! Every construction path that depends on host OS feature availability
//! checks its minimum version here before touching any resource. The
//! capability set is detected once at process start and passed by
//! reference; nothing in this crate re-queries the host per call.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PlatformError, Result};
use crate::identity::{GuestArchitecture, HardwareModel};

/// Minimum host version for any platform configuration.
pub const GENERIC_PLATFORM_MIN_VERSION: HostVersion = HostVersion::new(11, 0);

/// Minimum host version for firmware-backed platform configurations.
pub const FIRMWARE_PLATFORM_MIN_VERSION: HostVersion = HostVersion::new(12, 0);

const DEFAULT_MIN_CPU_COUNT: u32 = 1;
const DEFAULT_MAX_CPU_COUNT: u32 = 32;

/// 64 MiB, the smallest guest memory the execution engine accepts.
const DEFAULT_MIN_MEMORY_SIZE: u64 = 64 * 1024 * 1024;

/// 64 GiB default ceiling when the host does not report one.
const DEFAULT_MAX_MEMORY_SIZE: u64 = 64 * 1024 * 1024 * 1024;

// ============================================================================
// Host Version
// ============================================================================

/// An ordered (major, minor) host OS version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostVersion {
    /// Major version component.
    pub major: u32,
    /// Minor version component.
    pub minor: u32,
}

impl HostVersion {
    /// Creates a version from its components.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for HostVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for HostVersion {
    type Err = PlatformError;

    /// Parses `"14"`, `"14.5"`, or `"14.5.1"`; patch components are
    /// ignored.
    fn from_str(s: &str) -> Result<Self> {
        let malformed = |reason: &str| PlatformError::Malformed {
            what: "host version",
            reason: format!("{reason}: {s:?}"),
        };

        let mut parts = s.split('.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| malformed("missing major component"))?;
        let minor = match parts.next() {
            Some(p) => p.parse().map_err(|_| malformed("bad minor component"))?,
            None => 0,
        };
        Ok(Self { major, minor })
    }
}

impl Serialize for HostVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HostVersion {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

// ============================================================================
// Host Capabilities
// ============================================================================

/// The host's virtualization capability set.
///
/// Detected once at process start with [`HostCapabilities::detect`] and
/// handed by reference to every gated constructor. Tests fabricate
/// arbitrary capability sets with [`HostCapabilities::new`].
#[derive(Debug, Clone)]
pub struct HostCapabilities {
    version: HostVersion,
    architecture: GuestArchitecture,
    max_feature_level: u8,
    min_cpu_count: u32,
    max_cpu_count: u32,
    min_memory_size: u64,
    max_memory_size: u64,
}

impl HostCapabilities {
    /// Creates a capability set with the given version, native guest
    /// architecture, and maximum supported hardware feature level.
    ///
    /// CPU and memory bounds start at conservative defaults; adjust them
    /// with [`with_cpu_bounds`](Self::with_cpu_bounds) and
    /// [`with_memory_bounds`](Self::with_memory_bounds).
    #[must_use]
    pub fn new(
        version: HostVersion,
        architecture: GuestArchitecture,
        max_feature_level: u8,
    ) -> Self {
        Self {
            version,
            architecture,
            max_feature_level,
            min_cpu_count: DEFAULT_MIN_CPU_COUNT,
            max_cpu_count: DEFAULT_MAX_CPU_COUNT,
            min_memory_size: DEFAULT_MIN_MEMORY_SIZE,
            max_memory_size: DEFAULT_MAX_MEMORY_SIZE,
        }
    }

    /// Queries the running host once and returns its capability set.
    #[must_use]
    pub fn detect() -> Self {
        let version = host_os_version().unwrap_or(GENERIC_PLATFORM_MIN_VERSION);
        let architecture = if cfg!(target_arch = "aarch64") {
            GuestArchitecture::Arm64
        } else {
            GuestArchitecture::X86_64
        };
        let max_cpu_count = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(DEFAULT_MAX_CPU_COUNT);

        let caps = Self::new(version, architecture, feature_level_for(version))
            .with_cpu_bounds(DEFAULT_MIN_CPU_COUNT, max_cpu_count);

        tracing::debug!(
            version = %caps.version,
            architecture = caps.architecture.as_str(),
            max_feature_level = caps.max_feature_level,
            "detected host capabilities"
        );
        caps
    }

    /// Overrides the allowed vCPU count range.
    #[must_use]
    pub fn with_cpu_bounds(mut self, min: u32, max: u32) -> Self {
        self.min_cpu_count = min;
        self.max_cpu_count = max;
        self
    }

    /// Overrides the allowed guest memory range, in bytes.
    #[must_use]
    pub fn with_memory_bounds(mut self, min: u64, max: u64) -> Self {
        self.min_memory_size = min;
        self.max_memory_size = max;
        self
    }

    /// Returns the host OS version.
    #[must_use]
    pub fn version(&self) -> HostVersion {
        self.version
    }

    /// Returns the guest architecture family this host can execute.
    #[must_use]
    pub fn architecture(&self) -> GuestArchitecture {
        self.architecture
    }

    /// Returns the highest hardware feature level this host can run.
    #[must_use]
    pub fn max_feature_level(&self) -> u8 {
        self.max_feature_level
    }

    /// Returns true if the host is at least `required`.
    #[must_use]
    pub fn supports_version(&self, required: HostVersion) -> bool {
        self.version >= required
    }

    /// Fails with [`PlatformError::UnsupportedHostVersion`] if the host is
    /// older than `required`.
    pub fn require_version(&self, required: HostVersion) -> Result<()> {
        if self.supports_version(required) {
            Ok(())
        } else {
            Err(PlatformError::UnsupportedHostVersion {
                required,
                actual: self.version,
            })
        }
    }

    /// Returns true if this host can run guests of the given hardware
    /// model.
    #[must_use]
    pub fn supports_model(&self, model: &HardwareModel) -> bool {
        model.architecture() == self.architecture
            && model.feature_level() <= self.max_feature_level
    }

    /// Minimum allowed vCPU count for a virtual machine.
    #[must_use]
    pub fn min_cpu_count(&self) -> u32 {
        self.min_cpu_count
    }

    /// Maximum allowed vCPU count for a virtual machine.
    #[must_use]
    pub fn max_cpu_count(&self) -> u32 {
        self.max_cpu_count
    }

    /// Minimum allowed guest memory size in bytes.
    #[must_use]
    pub fn min_memory_size(&self) -> u64 {
        self.min_memory_size
    }

    /// Maximum allowed guest memory size in bytes.
    #[must_use]
    pub fn max_memory_size(&self) -> u64 {
        self.max_memory_size
    }
}

/// Maps a host version to the newest hardware feature level it can run.
fn feature_level_for(version: HostVersion) -> u8 {
    match version.major {
        0..=11 => 0,
        12 => 1,
        13 => 2,
        _ => 3,
    }
}

#[cfg(target_os = "macos")]
fn host_os_version() -> Option<HostVersion> {
    let output = std::process::Command::new("sw_vers")
        .arg("-productVersion")
        .output()
        .ok()?;
    let text = String::from_utf8(output.stdout).ok()?;
    text.trim().parse().ok()
}

#[cfg(not(target_os = "macos"))]
fn host_os_version() -> Option<HostVersion> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        assert!(HostVersion::new(12, 0) > HostVersion::new(11, 7));
        assert!(HostVersion::new(12, 3) > HostVersion::new(12, 0));
        assert_eq!(HostVersion::new(13, 1), HostVersion::new(13, 1));
    }

    #[test]
    fn test_version_parse() {
        assert_eq!("14".parse::<HostVersion>().unwrap(), HostVersion::new(14, 0));
        assert_eq!("14.5".parse::<HostVersion>().unwrap(), HostVersion::new(14, 5));
        assert_eq!(
            "14.5.1".parse::<HostVersion>().unwrap(),
            HostVersion::new(14, 5)
        );
        assert!("".parse::<HostVersion>().is_err());
        assert!("beta".parse::<HostVersion>().is_err());
    }

    #[test]
    fn test_require_version() {
        let caps = HostCapabilities::new(HostVersion::new(12, 4), GuestArchitecture::Arm64, 1);
        assert!(caps.require_version(HostVersion::new(12, 0)).is_ok());

        let err = caps.require_version(HostVersion::new(13, 0)).unwrap_err();
        match err {
            PlatformError::UnsupportedHostVersion { required, actual } => {
                assert_eq!(required, HostVersion::new(13, 0));
                assert_eq!(actual, HostVersion::new(12, 4));
            }
            other => panic!("expected UnsupportedHostVersion, got {other:?}"),
        }
    }

    #[test]
    fn test_supports_model() {
        let caps = HostCapabilities::new(HostVersion::new(13, 0), GuestArchitecture::Arm64, 2);

        assert!(caps.supports_model(&HardwareModel::new(GuestArchitecture::Arm64, 2)));
        assert!(caps.supports_model(&HardwareModel::new(GuestArchitecture::Arm64, 0)));
        // Newer feature level than the host can run.
        assert!(!caps.supports_model(&HardwareModel::new(GuestArchitecture::Arm64, 3)));
        // Wrong architecture family.
        assert!(!caps.supports_model(&HardwareModel::new(GuestArchitecture::X86_64, 1)));
    }

    #[test]
    fn test_detect_reports_sane_bounds() {
        let caps = HostCapabilities::detect();
        assert!(caps.min_cpu_count() >= 1);
        assert!(caps.max_cpu_count() >= caps.min_cpu_count());
        assert!(caps.max_memory_size() > caps.min_memory_size());
    }
}
