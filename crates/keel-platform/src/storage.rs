//! Auxiliary boot storage.
//!
//! Some guest architectures keep firmware/NVRAM state in a host file that
//! must exist before the guest can boot. Each auxiliary storage file is
//! created for exactly one hardware model and owned by exactly one
//! platform configuration. This module performs the only direct disk I/O
//! in the platform layer; both `create` and `open` are synchronous and may
//! block the calling thread.

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use crate::error::{PlatformError, Result};
use crate::host::{HostCapabilities, FIRMWARE_PLATFORM_MIN_VERSION};
use crate::identity::HardwareModel;

const STORAGE_MAGIC: [u8; 4] = *b"KAUX";
const STORAGE_LAYOUT_VERSION: u8 = 1;

/// Opaque firmware state area appended after the header.
const NVRAM_REGION_SIZE: u64 = 64 * 1024;

/// Persisted firmware/NVRAM state bound to one hardware model.
///
/// Two lifecycles exist: [`create`](AuxiliaryStorage::create) writes a
/// fresh file for a model the host supports, and
/// [`open`](AuxiliaryStorage::open) adopts an existing file bound to
/// whatever model it was created with.
#[derive(Debug, Clone)]
pub struct AuxiliaryStorage {
    path: PathBuf,
    hardware_model: HardwareModel,
}

impl AuxiliaryStorage {
    /// Creates fresh auxiliary storage at `path` for `model`.
    ///
    /// The host version gate fires before anything touches the
    /// filesystem. With `overwrite` false an existing file is left
    /// byte-for-byte untouched and [`PlatformError::PathExists`] is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::UnsupportedHostVersion`] on an old host,
    /// [`PlatformError::UnsupportedModel`] if the host cannot run `model`,
    /// [`PlatformError::PathExists`] if `path` exists and `overwrite` is
    /// false, or an I/O error from writing the file.
    pub fn create(
        host: &HostCapabilities,
        path: impl AsRef<Path>,
        model: &HardwareModel,
        overwrite: bool,
    ) -> Result<Self> {
        host.require_version(FIRMWARE_PLATFORM_MIN_VERSION)?;
        if !model.is_supported(host) {
            return Err(PlatformError::UnsupportedModel {
                model: model.to_string(),
            });
        }

        let path = path.as_ref();
        let mut options = fs::OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            // create_new refuses atomically, without clobbering.
            options.create_new(true);
        }

        let mut file = options.open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                PlatformError::PathExists(path.to_path_buf())
            } else {
                PlatformError::from(e)
            }
        })?;

        let header = encode_header(model);
        file.write_all(&header)?;
        file.set_len(header.len() as u64 + NVRAM_REGION_SIZE)?;

        tracing::info!(path = %path.display(), model = %model, "created auxiliary storage");

        Ok(Self {
            path: path.to_path_buf(),
            hardware_model: *model,
        })
    }

    /// Opens existing auxiliary storage at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NotFound`] if the file does not exist or
    /// [`PlatformError::Corrupt`] if its header does not validate.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                PlatformError::NotFound(path.to_path_buf())
            } else {
                PlatformError::from(e)
            }
        })?;

        let hardware_model = decode_header(&data)?;

        tracing::debug!(path = %path.display(), model = %hardware_model, "opened auxiliary storage");

        Ok(Self {
            path: path.to_path_buf(),
            hardware_model,
        })
    }

    /// Returns the file path backing this storage.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the hardware model this storage was created for.
    #[must_use]
    pub fn hardware_model(&self) -> &HardwareModel {
        &self.hardware_model
    }
}

fn encode_header(model: &HardwareModel) -> Vec<u8> {
    let blob = model.data_representation();
    let mut header = Vec::with_capacity(4 + 1 + 2 + blob.len());
    header.extend_from_slice(&STORAGE_MAGIC);
    header.push(STORAGE_LAYOUT_VERSION);
    header.extend_from_slice(&(blob.len() as u16).to_le_bytes());
    header.extend_from_slice(&blob);
    header
}

fn decode_header(data: &[u8]) -> Result<HardwareModel> {
    let corrupt = |reason: &str| PlatformError::Corrupt(reason.to_string());

    if data.len() < 7 {
        return Err(corrupt("file shorter than header"));
    }
    if data[0..4] != STORAGE_MAGIC {
        return Err(corrupt("bad magic"));
    }
    if data[4] != STORAGE_LAYOUT_VERSION {
        return Err(PlatformError::Corrupt(format!(
            "unknown layout version {}",
            data[4]
        )));
    }

    let blob_len = u16::from_le_bytes([data[5], data[6]]) as usize;
    let blob = data
        .get(7..7 + blob_len)
        .ok_or_else(|| corrupt("truncated hardware model"))?;

    HardwareModel::from_bytes(blob)
        .map_err(|e| PlatformError::Corrupt(format!("bad hardware model: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostVersion;
    use crate::identity::GuestArchitecture;

    fn test_host() -> HostCapabilities {
        HostCapabilities::new(HostVersion::new(13, 0), GuestArchitecture::Arm64, 2)
    }

    fn test_model() -> HardwareModel {
        HardwareModel::new(GuestArchitecture::Arm64, 1)
    }

    #[test]
    fn test_create_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvram.bin");

        let created = AuxiliaryStorage::create(&test_host(), &path, &test_model(), false).unwrap();
        assert_eq!(created.hardware_model(), &test_model());
        assert_eq!(created.path(), path);

        let opened = AuxiliaryStorage::open(&path).unwrap();
        assert_eq!(opened.hardware_model(), &test_model());
    }

    #[test]
    fn test_create_refuses_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvram.bin");
        fs::write(&path, b"precious guest state").unwrap();

        let err =
            AuxiliaryStorage::create(&test_host(), &path, &test_model(), false).unwrap_err();
        assert!(matches!(err, PlatformError::PathExists(_)));

        // The refused create must not have touched the file.
        assert_eq!(fs::read(&path).unwrap(), b"precious guest state");
    }

    #[test]
    fn test_create_overwrite_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvram.bin");
        fs::write(&path, b"old").unwrap();

        AuxiliaryStorage::create(&test_host(), &path, &test_model(), true).unwrap();
        let opened = AuxiliaryStorage::open(&path).unwrap();
        assert_eq!(opened.hardware_model(), &test_model());
    }

    #[test]
    fn test_create_gated_on_host_version() {
        let old_host =
            HostCapabilities::new(HostVersion::new(11, 2), GuestArchitecture::Arm64, 0);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvram.bin");

        let err =
            AuxiliaryStorage::create(&old_host, &path, &test_model(), false).unwrap_err();
        assert!(matches!(err, PlatformError::UnsupportedHostVersion { .. }));
        // The gate fires before any file is created.
        assert!(!path.exists());
    }

    #[test]
    fn test_create_rejects_unsupported_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvram.bin");
        let too_new = HardwareModel::new(GuestArchitecture::Arm64, 3);

        let err = AuxiliaryStorage::create(&test_host(), &path, &too_new, false).unwrap_err();
        assert!(matches!(err, PlatformError::UnsupportedModel { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_open_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = AuxiliaryStorage::open(dir.path().join("absent.bin")).unwrap_err();
        assert!(matches!(err, PlatformError::NotFound(_)));
    }

    #[test]
    fn test_open_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvram.bin");

        fs::write(&path, b"not auxiliary storage at all").unwrap();
        let err = AuxiliaryStorage::open(&path).unwrap_err();
        assert!(matches!(err, PlatformError::Corrupt(_)));

        fs::write(&path, b"KA").unwrap();
        let err = AuxiliaryStorage::open(&path).unwrap_err();
        assert!(matches!(err, PlatformError::Corrupt(_)));
    }
}
