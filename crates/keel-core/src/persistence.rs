//! Machine descriptor persistence.
//!
//! Stores one TOML descriptor per machine so a machine keeps its identity
//! across process restarts. The identity fields — machine identifier,
//! hardware model, auxiliary storage path — are persisted verbatim and
//! reused verbatim on reload; regenerating them for an existing machine
//! corrupts guest-visible identity. Only absent machines get fresh
//! identity.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use keel_error::CommonError;
use keel_platform::{HardwareModel, MachineIdentifier};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::vm::VmState;

/// Persisted machine descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedMachine {
    /// Machine name; also the descriptor's directory name.
    pub name: String,
    /// Stable identity, reused verbatim on every reload.
    pub machine_identifier: MachineIdentifier,
    /// Hardware model, for firmware-backed machines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_model: Option<HardwareModel>,
    /// Auxiliary storage path, for firmware-backed machines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary_storage: Option<PathBuf>,
    /// Number of vCPUs.
    pub cpus: u32,
    /// Guest memory in MB.
    pub memory_mb: u64,
    /// Last known state.
    pub state: PersistedState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Last known machine state, as persisted.
///
/// A reloaded machine never resumes as running: whatever was recorded,
/// [`PersistedState::reload_state`] collapses to `Stopped` and the caller
/// must start the machine again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PersistedState {
    /// The machine was executing or mid-transition when last saved.
    Running,
    /// The machine was stopped when last saved.
    #[default]
    Stopped,
}

impl PersistedState {
    /// Returns the state a reloaded machine starts from.
    #[must_use]
    pub fn reload_state(self) -> VmState {
        VmState::Stopped
    }
}

impl From<VmState> for PersistedState {
    fn from(state: VmState) -> Self {
        match state {
            VmState::Starting
            | VmState::Running
            | VmState::Pausing
            | VmState::Paused
            | VmState::Resuming => Self::Running,
            VmState::Stopping | VmState::Stopped | VmState::Error => Self::Stopped,
        }
    }
}

/// Machine descriptor store rooted at one directory.
pub struct MachinePersistence {
    base_dir: PathBuf,
}

impl MachinePersistence {
    /// Creates a store rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn machine_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    fn descriptor_path(&self, name: &str) -> PathBuf {
        self.machine_dir(name).join("machine.toml")
    }

    /// Saves a machine descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be serialized or
    /// written.
    pub fn save(&self, machine: &PersistedMachine) -> Result<()> {
        let dir = self.machine_dir(&machine.name);
        fs::create_dir_all(&dir)?;

        let content = toml::to_string_pretty(machine)
            .map_err(|e| CoreError::Persistence(format!("failed to serialize descriptor: {e}")))?;
        fs::write(self.descriptor_path(&machine.name), content)?;

        tracing::debug!(machine = %machine.name, "saved machine descriptor");
        Ok(())
    }

    /// Loads a machine descriptor by name.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an absent machine or a persistence
    /// error for a descriptor that does not parse.
    pub fn load(&self, name: &str) -> Result<PersistedMachine> {
        let path = self.descriptor_path(name);
        let content = fs::read_to_string(&path)
            .map_err(|_| CommonError::not_found(format!("machine {name}")))?;

        toml::from_str(&content)
            .map_err(|e| CoreError::Persistence(format!("failed to parse descriptor: {e}")))
    }

    /// Lists the names of all saved machines.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.base_dir) else {
            return Vec::new();
        };

        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join("machine.toml").exists())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect()
    }

    /// Loads every saved machine, skipping descriptors that fail to
    /// parse.
    #[must_use]
    pub fn load_all(&self) -> Vec<PersistedMachine> {
        self.list()
            .iter()
            .filter_map(|name| self.load(name).ok())
            .collect()
    }

    /// Removes a machine's descriptor directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be removed.
    pub fn remove(&self, name: &str) -> Result<()> {
        let dir = self.machine_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            tracing::debug!(machine = %name, "removed machine descriptor");
        }
        Ok(())
    }

    /// Updates the recorded state of a saved machine.
    ///
    /// # Errors
    ///
    /// Returns an error if the machine does not exist or the descriptor
    /// cannot be rewritten.
    pub fn update_state(&self, name: &str, state: VmState) -> Result<()> {
        let mut machine = self.load(name)?;
        machine.state = state.into();
        self.save(&machine)
    }

    /// Returns the store's base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_platform::GuestArchitecture;
    use tempfile::TempDir;

    fn descriptor(name: &str) -> PersistedMachine {
        PersistedMachine {
            name: name.to_string(),
            machine_identifier: MachineIdentifier::new(),
            hardware_model: Some(HardwareModel::new(GuestArchitecture::Arm64, 1)),
            auxiliary_storage: Some(PathBuf::from("/var/lib/keel/nvram.bin")),
            cpus: 4,
            memory_mb: 4096,
            state: PersistedState::Stopped,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load_preserves_identity() {
        let temp = TempDir::new().unwrap();
        let persistence = MachinePersistence::new(temp.path());
        let machine = descriptor("test-vm");

        persistence.save(&machine).unwrap();
        let loaded = persistence.load("test-vm").unwrap();

        // Identity must round-trip byte-for-byte.
        assert_eq!(
            loaded.machine_identifier.as_bytes(),
            machine.machine_identifier.as_bytes()
        );
        assert_eq!(loaded.hardware_model, machine.hardware_model);
        assert_eq!(loaded.auxiliary_storage, machine.auxiliary_storage);
        assert_eq!(loaded.cpus, 4);
        assert_eq!(loaded.memory_mb, 4096);
    }

    #[test]
    fn test_load_missing_machine() {
        let temp = TempDir::new().unwrap();
        let persistence = MachinePersistence::new(temp.path());

        let err = persistence.load("absent").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_list_and_remove() {
        let temp = TempDir::new().unwrap();
        let persistence = MachinePersistence::new(temp.path());

        for name in ["vm1", "vm2", "vm3"] {
            persistence.save(&descriptor(name)).unwrap();
        }

        let mut names = persistence.list();
        names.sort();
        assert_eq!(names, vec!["vm1", "vm2", "vm3"]);

        persistence.remove("vm2").unwrap();
        assert!(persistence.load("vm2").is_err());
        assert_eq!(persistence.load_all().len(), 2);
    }

    #[test]
    fn test_running_state_collapses_on_reload() {
        let temp = TempDir::new().unwrap();
        let persistence = MachinePersistence::new(temp.path());

        persistence.save(&descriptor("test-vm")).unwrap();
        persistence.update_state("test-vm", VmState::Running).unwrap();

        let loaded = persistence.load("test-vm").unwrap();
        assert_eq!(loaded.state, PersistedState::Running);
        assert_eq!(loaded.state.reload_state(), VmState::Stopped);
    }

    #[test]
    fn test_generic_machine_omits_firmware_fields() {
        let temp = TempDir::new().unwrap();
        let persistence = MachinePersistence::new(temp.path());

        let mut machine = descriptor("generic-vm");
        machine.hardware_model = None;
        machine.auxiliary_storage = None;
        persistence.save(&machine).unwrap();

        let loaded = persistence.load("generic-vm").unwrap();
        assert!(loaded.hardware_model.is_none());
        assert!(loaded.auxiliary_storage.is_none());
    }
}
