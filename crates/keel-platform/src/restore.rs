//! Restore image inspection.
//!
//! A restore image is an installation medium whose manifest declares which
//! platform configurations it can install and boot. Callers inspect the
//! image before creating a fresh machine so they pick a hardware model the
//! image actually supports.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, Result};
use crate::host::{HostCapabilities, HostVersion};
use crate::identity::HardwareModel;

/// One platform configuration a restore image supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationRequirements {
    /// Hardware model the image can install onto.
    pub hardware_model: HardwareModel,
    /// Minimum host version required to run that model from this image.
    pub min_host_version: HostVersion,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    build: Option<String>,
    configurations: Vec<ConfigurationRequirements>,
}

/// An installation image and the configurations it supports.
#[derive(Debug, Clone)]
pub struct RestoreImage {
    path: PathBuf,
    build: Option<String>,
    configurations: Vec<ConfigurationRequirements>,
}

impl RestoreImage {
    /// Loads a restore image manifest from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::NotFound`] if the path does not exist or
    /// [`PlatformError::Unreadable`] if the manifest fails to parse. A
    /// missing image and an image with no host-compatible configuration
    /// are deliberately distinct outcomes; the latter is not an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                PlatformError::NotFound(path.to_path_buf())
            } else {
                PlatformError::from(e)
            }
        })?;

        let manifest: Manifest = serde_json::from_str(&data)
            .map_err(|e| PlatformError::Unreadable(e.to_string()))?;

        tracing::debug!(
            path = %path.display(),
            build = manifest.build.as_deref().unwrap_or("unknown"),
            configurations = manifest.configurations.len(),
            "loaded restore image"
        );

        Ok(Self {
            path: path.to_path_buf(),
            build: manifest.build,
            configurations: manifest.configurations,
        })
    }

    /// Returns the path the image was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the image's build label, if the manifest carries one.
    #[must_use]
    pub fn build(&self) -> Option<&str> {
        self.build.as_deref()
    }

    /// Returns every configuration the image supports, in manifest order.
    #[must_use]
    pub fn supported_configurations(&self) -> &[ConfigurationRequirements] {
        &self.configurations
    }

    /// Returns the richest configuration the given host can run.
    ///
    /// Among the host-runnable entries the highest hardware feature level
    /// wins; ties break toward the highest minimum host version, since
    /// more features imply a newer baseline. Returns `None` when the
    /// image supports no configuration this host can run.
    #[must_use]
    pub fn most_featureful_supported_configuration(
        &self,
        host: &HostCapabilities,
    ) -> Option<&ConfigurationRequirements> {
        self.configurations
            .iter()
            .filter(|c| {
                host.supports_version(c.min_host_version)
                    && host.supports_model(&c.hardware_model)
            })
            .max_by_key(|c| (c.hardware_model.feature_level(), c.min_host_version))
    }
}
