//! Virtual machine runtime.
//!
//! A [`VirtualMachine`] is created from exactly one validated
//! configuration, owns its hypervisor handle exclusively, and drives the
//! lifecycle state machine:
//!
//! ```text
//! Stopped -> Starting -> Running -> Pausing -> Paused -> Resuming -> Running
//!                 \                                                  /
//!                  `-> Error <--- unrecoverable fault, any state <--'
//!
//! Stopping -> Stopped   reachable from every non-terminal state
//! ```
//!
//! Exactly one control operation may be in flight at a time; concurrent
//! callers are rejected with `OperationInProgress` rather than queued.
//! The one sanctioned exception is `stop`, which cancels a pending
//! `start` and waits for it to unwind, so the machine always ends up
//! `Stopped` with the handle released exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use keel_platform::{HostCapabilities, MachineIdentifier};

use crate::config::VmConfiguration;
use crate::error::{CoreError, Result};
use crate::hypervisor::{HypervisorFault, HypervisorHandle};

// ============================================================================
// VM State
// ============================================================================

/// The execution state of a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Not executing; the initial state, and the final state after stop.
    Stopped,
    /// A start operation is in flight.
    Starting,
    /// The guest is executing.
    Running,
    /// A pause operation is in flight.
    Pausing,
    /// The guest is suspended.
    Paused,
    /// A resume operation is in flight.
    Resuming,
    /// A stop operation is in flight.
    Stopping,
    /// An unrecoverable fault occurred; only stop is permitted.
    Error,
}

impl VmState {
    /// Returns the state name for logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Resuming => "resuming",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State the machine left.
    pub from: VmState,
    /// State the machine entered.
    pub to: VmState,
}

// ============================================================================
// Virtual Machine
// ============================================================================

struct VmInner {
    identifier: MachineIdentifier,
    config: VmConfiguration,
    handle: Arc<dyn HypervisorHandle>,
    state: StdMutex<VmState>,
    observers: StdMutex<Vec<mpsc::UnboundedSender<StateChange>>>,
    /// Held for the duration of each control operation; `try_lock`
    /// failure is how a second concurrent operation gets rejected.
    in_flight: Mutex<()>,
    /// Token for the currently pending start, replaced on each start.
    cancel: StdMutex<CancellationToken>,
    released: AtomicBool,
    fault_rx: StdMutex<Option<mpsc::UnboundedReceiver<HypervisorFault>>>,
    fault_monitor_started: AtomicBool,
}

impl VmInner {
    fn lock_state(&self) -> MutexGuard<'_, VmState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_state(&self) -> VmState {
        *self.lock_state()
    }

    /// Moves to `to` and notifies every observer, in subscription order,
    /// before returning to the caller.
    fn transition(&self, to: VmState) {
        let from = {
            let mut state = self.lock_state();
            let from = *state;
            *state = to;
            from
        };
        if from == to {
            return;
        }

        tracing::info!(machine = %self.identifier, from = from.as_str(), to = to.as_str(), "vm state transition");

        let mut observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        observers.retain(|tx| tx.send(StateChange { from, to }).is_ok());
    }

    fn force_error(&self) {
        self.transition(VmState::Error);
    }

    /// Releases the hypervisor handle exactly once, no matter how many
    /// times stop completes or whether drop gets there first.
    fn release_handle(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.handle.release();
            tracing::debug!(machine = %self.identifier, "hypervisor handle released");
        }
    }
}

impl Drop for VmInner {
    fn drop(&mut self) {
        // Backstop only; explicit stop is the primary release path.
        self.release_handle();
    }
}

/// A virtual machine instance created from a validated configuration.
///
/// The machine's identity is fixed at creation and immutable for the
/// instance's lifetime. The hypervisor handle is owned exclusively and
/// released exactly once: on the first completed [`stop`](Self::stop),
/// or on drop if the machine is never explicitly stopped.
pub struct VirtualMachine {
    inner: Arc<VmInner>,
}

impl std::fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualMachine")
            .field("identifier", &self.inner.identifier)
            .field("state", &self.inner.current_state())
            .finish()
    }
}

impl VirtualMachine {
    /// Creates a machine from a configuration and a hypervisor handle.
    ///
    /// The configuration is validated here and then taken by value;
    /// mutating it after hand-off is unrepresentable, which is how the
    /// post-validation freeze is enforced. The machine identifier comes
    /// from the platform when it carries one, otherwise a fresh one is
    /// generated.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfiguration`] with the complete
    /// issue list if validation fails; no machine is created.
    pub fn new(
        config: VmConfiguration,
        host: &HostCapabilities,
        handle: Box<dyn HypervisorHandle>,
    ) -> Result<Self> {
        if let Err(report) = config.validate(host) {
            return Err(CoreError::InvalidConfiguration(report));
        }

        let handle: Arc<dyn HypervisorHandle> = Arc::from(handle);
        let fault_rx = handle.take_fault_events();
        let identifier = config
            .platform()
            .machine_identifier()
            .copied()
            .unwrap_or_else(MachineIdentifier::new);

        tracing::info!(machine = %identifier, platform = config.platform().kind(), "created virtual machine");

        Ok(Self {
            inner: Arc::new(VmInner {
                identifier,
                config,
                handle,
                state: StdMutex::new(VmState::Stopped),
                observers: StdMutex::new(Vec::new()),
                in_flight: Mutex::new(()),
                cancel: StdMutex::new(CancellationToken::new()),
                released: AtomicBool::new(false),
                fault_rx: StdMutex::new(fault_rx),
                fault_monitor_started: AtomicBool::new(false),
            }),
        })
    }

    /// Returns the machine's identifier.
    #[must_use]
    pub fn identifier(&self) -> &MachineIdentifier {
        &self.inner.identifier
    }

    /// Returns the frozen configuration this machine runs.
    #[must_use]
    pub fn configuration(&self) -> &VmConfiguration {
        &self.inner.config
    }

    /// Returns the current state of the machine.
    #[must_use]
    pub fn state(&self) -> VmState {
        self.inner.current_state()
    }

    /// Subscribes to state transitions.
    ///
    /// Transitions arrive in FIFO order, and each one is sent before the
    /// control operation that caused it returns.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StateChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Returns whether the machine can be started.
    #[must_use]
    pub fn can_start(&self) -> bool {
        self.state() == VmState::Stopped && !self.inner.released.load(Ordering::SeqCst)
    }

    /// Returns whether the machine can be paused.
    #[must_use]
    pub fn can_pause(&self) -> bool {
        self.state() == VmState::Running
    }

    /// Returns whether the machine can be resumed.
    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.state() == VmState::Paused
    }

    /// Returns whether a stop would do anything.
    #[must_use]
    pub fn can_stop(&self) -> bool {
        self.state() != VmState::Stopped
    }

    /// Returns whether a graceful stop can be requested of the guest.
    #[must_use]
    pub fn can_request_stop(&self) -> bool {
        self.state() == VmState::Running
    }

    /// Starts the virtual machine.
    ///
    /// Only valid from `Stopped`. On success the machine is `Running`;
    /// on an engine failure it is `Error`. A concurrent [`stop`](Self::stop)
    /// cancels a pending start, in which case this returns
    /// [`CoreError::Cancelled`] and the stop path owns the remaining
    /// transitions.
    ///
    /// # Errors
    ///
    /// `OperationInProgress` if another control operation is pending,
    /// `HandleReleased` after the handle has been released,
    /// `InvalidState` from any state but `Stopped`, `Hypervisor` on an
    /// engine failure, `Cancelled` if a stop won the race.
    pub async fn start(&self) -> Result<()> {
        let _guard = self
            .inner
            .in_flight
            .try_lock()
            .map_err(|_| CoreError::OperationInProgress)?;

        if self.inner.released.load(Ordering::SeqCst) {
            return Err(CoreError::HandleReleased);
        }
        let state = self.state();
        if state != VmState::Stopped {
            return Err(CoreError::InvalidState {
                expected: "stopped",
                actual: state,
            });
        }

        self.spawn_fault_monitor();

        let token = CancellationToken::new();
        *self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token.clone();

        self.inner.transition(VmState::Starting);

        tokio::select! {
            res = self.inner.handle.start(&self.inner.config) => match res {
                Ok(()) => {
                    self.inner.transition(VmState::Running);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(machine = %self.inner.identifier, error = %e, "vm start failed");
                    self.inner.transition(VmState::Error);
                    Err(CoreError::Hypervisor(e.to_string()))
                }
            },
            () = token.cancelled() => {
                // The concurrent stop owns the transition to Stopped.
                tracing::debug!(machine = %self.inner.identifier, "pending start cancelled by stop");
                Err(CoreError::Cancelled)
            }
        }
    }

    /// Pauses the virtual machine. Only valid from `Running`.
    ///
    /// # Errors
    ///
    /// `OperationInProgress` if another control operation is pending,
    /// `InvalidState` from any state but `Running`, `Hypervisor` on an
    /// engine failure (the machine is then in `Error`).
    pub async fn pause(&self) -> Result<()> {
        let _guard = self
            .inner
            .in_flight
            .try_lock()
            .map_err(|_| CoreError::OperationInProgress)?;

        let state = self.state();
        if state != VmState::Running {
            return Err(CoreError::InvalidState {
                expected: "running",
                actual: state,
            });
        }

        self.inner.transition(VmState::Pausing);
        match self.inner.handle.pause().await {
            Ok(()) => {
                self.inner.transition(VmState::Paused);
                Ok(())
            }
            Err(e) => {
                tracing::error!(machine = %self.inner.identifier, error = %e, "vm pause failed");
                self.inner.transition(VmState::Error);
                Err(CoreError::Hypervisor(e.to_string()))
            }
        }
    }

    /// Resumes a paused virtual machine. Only valid from `Paused`.
    ///
    /// # Errors
    ///
    /// `OperationInProgress` if another control operation is pending,
    /// `InvalidState` from any state but `Paused`, `Hypervisor` on an
    /// engine failure (the machine is then in `Error`).
    pub async fn resume(&self) -> Result<()> {
        let _guard = self
            .inner
            .in_flight
            .try_lock()
            .map_err(|_| CoreError::OperationInProgress)?;

        let state = self.state();
        if state != VmState::Paused {
            return Err(CoreError::InvalidState {
                expected: "paused",
                actual: state,
            });
        }

        self.inner.transition(VmState::Resuming);
        match self.inner.handle.resume().await {
            Ok(()) => {
                self.inner.transition(VmState::Running);
                Ok(())
            }
            Err(e) => {
                tracing::error!(machine = %self.inner.identifier, error = %e, "vm resume failed");
                self.inner.transition(VmState::Error);
                Err(CoreError::Hypervisor(e.to_string()))
            }
        }
    }

    /// Stops the virtual machine.
    ///
    /// Valid from every state and idempotent: a machine that is already
    /// `Stopped` stays there. If a start is pending, stop cancels it,
    /// waits for it to unwind, and takes over. Whatever happens on the
    /// engine side, the machine ends `Stopped` and the handle is
    /// released; repeated stops never release twice. A stopped machine
    /// whose handle has been released cannot be started again — create a
    /// new instance instead.
    pub async fn stop(&self) -> Result<()> {
        // Cancel a pending start, if any; we then queue behind it. Stop
        // is the only operation allowed to wait here.
        self.inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();

        let _guard = self.inner.in_flight.lock().await;

        if self.state() == VmState::Stopped {
            self.inner.release_handle();
            return Ok(());
        }

        self.inner.transition(VmState::Stopping);
        if let Err(e) = self.inner.handle.stop().await {
            // The machine still ends up stopped; the engine error is
            // surfaced in the log, not to the state machine.
            tracing::warn!(machine = %self.inner.identifier, error = %e, "hypervisor stop reported an error");
        }
        self.inner.transition(VmState::Stopped);
        self.inner.release_handle();
        Ok(())
    }

    /// Asks the guest to shut down cooperatively.
    ///
    /// Only valid while `Running`. The guest may ignore the request;
    /// no state transition happens here.
    ///
    /// # Errors
    ///
    /// `InvalidState` from any state but `Running`, `Hypervisor` if the
    /// engine rejects the request.
    pub fn request_stop(&self) -> Result<()> {
        let state = self.state();
        if state != VmState::Running {
            return Err(CoreError::InvalidState {
                expected: "running",
                actual: state,
            });
        }
        self.inner
            .handle
            .request_stop()
            .map_err(|e| CoreError::Hypervisor(e.to_string()))
    }

    /// Starts the fault monitor the first time a start is attempted.
    ///
    /// Any unrecoverable fault reported by the engine moves the machine
    /// to `Error` regardless of its current state.
    fn spawn_fault_monitor(&self) {
        if self.inner.fault_monitor_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(mut rx) = self
            .inner
            .fault_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(fault) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                tracing::error!(machine = %inner.identifier, reason = %fault.reason, "unrecoverable hypervisor fault");
                inner.force_error();
            }
        });
    }
}
