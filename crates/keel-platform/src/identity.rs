//! Machine identity objects.
//!
//! A machine's identity is a pair of opaque, versioned blobs: the unique
//! [`MachineIdentifier`] and the [`HardwareModel`] capability descriptor.
//! Both round-trip through byte representations so they can be persisted
//! next to the machine's disk state and restored verbatim on reload.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{PlatformError, Result};
use crate::host::HostCapabilities;

const IDENTIFIER_LEN: usize = 16;

const MODEL_MAGIC: [u8; 4] = *b"KHWM";
const MODEL_LAYOUT_VERSION: u8 = 1;
const MODEL_BLOB_LEN: usize = 8;

// ============================================================================
// Machine Identifier
// ============================================================================

/// Unique, stable identity of one machine instance.
///
/// Generated fresh exactly once per machine and persisted alongside the
/// machine's disk state. When a machine is reloaded, the stored identifier
/// is reused verbatim; regenerating it breaks guest-visible identity
/// (licensing and device pairing inside the guest key off it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MachineIdentifier([u8; IDENTIFIER_LEN]);

impl MachineIdentifier {
    /// Generates a fresh, collision-resistant identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// Reconstructs an identifier from its persisted byte form.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Malformed`] if `bytes` is not exactly 16
    /// bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; IDENTIFIER_LEN] =
            bytes.try_into().map_err(|_| PlatformError::Malformed {
                what: "machine identifier",
                reason: format!("expected {IDENTIFIER_LEN} bytes, got {}", bytes.len()),
            })?;
        Ok(Self(raw))
    }

    /// Returns the identifier's byte representation.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; IDENTIFIER_LEN] {
        &self.0
    }
}

impl Default for MachineIdentifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MachineIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for MachineIdentifier {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| PlatformError::Malformed {
            what: "machine identifier",
            reason: e.to_string(),
        })?;
        Self::from_bytes(&bytes)
    }
}

impl Serialize for MachineIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MachineIdentifier {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

// ============================================================================
// Hardware Model
// ============================================================================

/// Guest architecture family a hardware model targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuestArchitecture {
    /// 64-bit Arm guests.
    Arm64,
    /// 64-bit x86 guests.
    X86_64,
}

impl GuestArchitecture {
    /// Returns the architecture name used in logs and display forms.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arm64 => "arm64",
            Self::X86_64 => "x86_64",
        }
    }

    fn to_tag(self) -> u8 {
        match self {
            Self::Arm64 => 0,
            Self::X86_64 => 1,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Arm64),
            1 => Some(Self::X86_64),
            _ => None,
        }
    }
}

impl fmt::Display for GuestArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Versioned descriptor of the guest hardware a host can expose.
///
/// The model decides which auxiliary storage layouts and guest OS builds
/// are bootable. It is treated as opaque by everything except the
/// compatibility checks here: architecture family, and a feature level
/// that grows with newer hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareModel {
    architecture: GuestArchitecture,
    feature_level: u8,
}

impl HardwareModel {
    /// Creates a model for the given architecture and feature level.
    #[must_use]
    pub fn new(architecture: GuestArchitecture, feature_level: u8) -> Self {
        Self {
            architecture,
            feature_level,
        }
    }

    /// Decodes a model from its persisted byte representation.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Malformed`] on a wrong length, bad magic,
    /// unknown layout version, or unknown architecture tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let malformed = |reason: String| PlatformError::Malformed {
            what: "hardware model",
            reason,
        };

        if bytes.len() != MODEL_BLOB_LEN {
            return Err(malformed(format!(
                "expected {MODEL_BLOB_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0..4] != MODEL_MAGIC {
            return Err(malformed("bad magic".to_string()));
        }
        if bytes[4] != MODEL_LAYOUT_VERSION {
            return Err(malformed(format!("unknown layout version {}", bytes[4])));
        }
        let architecture = GuestArchitecture::from_tag(bytes[5])
            .ok_or_else(|| malformed(format!("unknown architecture tag {}", bytes[5])))?;

        Ok(Self {
            architecture,
            feature_level: bytes[6],
        })
    }

    /// Returns the persistable byte representation of this model.
    #[must_use]
    pub fn data_representation(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(MODEL_BLOB_LEN);
        blob.extend_from_slice(&MODEL_MAGIC);
        blob.push(MODEL_LAYOUT_VERSION);
        blob.push(self.architecture.to_tag());
        blob.push(self.feature_level);
        blob.push(0); // reserved
        blob
    }

    /// Returns true if the given host can run guests of this model.
    #[must_use]
    pub fn is_supported(&self, host: &HostCapabilities) -> bool {
        host.supports_model(self)
    }

    /// Returns the guest architecture family.
    #[must_use]
    pub fn architecture(&self) -> GuestArchitecture {
        self.architecture
    }

    /// Returns the feature level; higher levels expose richer guest
    /// hardware.
    #[must_use]
    pub fn feature_level(&self) -> u8 {
        self.feature_level
    }
}

impl fmt::Display for HardwareModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/fl{}", self.architecture, self.feature_level)
    }
}

impl FromStr for HardwareModel {
    type Err = PlatformError;

    /// Parses the hex form of the model's byte representation.
    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| PlatformError::Malformed {
            what: "hardware model",
            reason: e.to_string(),
        })?;
        Self::from_bytes(&bytes)
    }
}

impl Serialize for HardwareModel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.data_representation()))
    }
}

impl<'de> Deserialize<'de> for HardwareModel {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_uniqueness() {
        let a = MachineIdentifier::new();
        let b = MachineIdentifier::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_identifier_round_trip() {
        let id = MachineIdentifier::new();
        let restored = MachineIdentifier::from_bytes(id.as_bytes()).unwrap();
        assert_eq!(id, restored);

        let hex_form = id.to_string();
        assert_eq!(hex_form.parse::<MachineIdentifier>().unwrap(), id);
    }

    #[test]
    fn test_identifier_malformed() {
        let err = MachineIdentifier::from_bytes(&[0u8; 5]).unwrap_err();
        assert!(matches!(err, PlatformError::Malformed { .. }));

        assert!("zz".parse::<MachineIdentifier>().is_err());
        // Valid hex but wrong length.
        assert!("deadbeef".parse::<MachineIdentifier>().is_err());
    }

    #[test]
    fn test_model_round_trip() {
        let model = HardwareModel::new(GuestArchitecture::Arm64, 2);
        let blob = model.data_representation();
        let restored = HardwareModel::from_bytes(&blob).unwrap();
        assert_eq!(model, restored);
        assert_eq!(restored.architecture(), GuestArchitecture::Arm64);
        assert_eq!(restored.feature_level(), 2);
    }

    #[test]
    fn test_model_rejects_bad_blobs() {
        // Truncated.
        assert!(HardwareModel::from_bytes(&[0u8; 3]).is_err());

        // Bad magic.
        let mut blob = HardwareModel::new(GuestArchitecture::Arm64, 1).data_representation();
        blob[0] = b'X';
        assert!(HardwareModel::from_bytes(&blob).is_err());

        // Unknown architecture tag.
        let mut blob = HardwareModel::new(GuestArchitecture::Arm64, 1).data_representation();
        blob[5] = 9;
        assert!(HardwareModel::from_bytes(&blob).is_err());
    }

    #[test]
    fn test_model_host_support() {
        use crate::host::HostVersion;

        let host = HostCapabilities::new(HostVersion::new(13, 0), GuestArchitecture::Arm64, 2);
        assert!(HardwareModel::new(GuestArchitecture::Arm64, 2).is_supported(&host));
        assert!(!HardwareModel::new(GuestArchitecture::Arm64, 3).is_supported(&host));
        assert!(!HardwareModel::new(GuestArchitecture::X86_64, 1).is_supported(&host));
    }

    #[test]
    fn test_model_display() {
        let model = HardwareModel::new(GuestArchitecture::X86_64, 1);
        assert_eq!(model.to_string(), "x86_64/fl1");
    }
}
