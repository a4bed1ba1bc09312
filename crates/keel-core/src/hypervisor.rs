//! Hypervisor handle abstraction.
//!
//! The lifecycle controller drives guest execution through the trait
//! here; it never reimplements the hypervisor. Each backend wraps its
//! native capability (a framework VM object, an ioctl fd) behind
//! [`HypervisorHandle`] and reports unrecoverable faults on the event
//! stream handed over at machine creation.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::VmConfiguration;

/// Execution state as reported by the underlying engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// The guest is not executing.
    Stopped,
    /// The guest is executing.
    Running,
    /// The guest is suspended.
    Paused,
    /// The engine hit an unrecoverable fault.
    Error,
}

/// An unrecoverable fault reported by the execution engine.
#[derive(Debug, Clone)]
pub struct HypervisorFault {
    /// Engine-provided description of what went wrong.
    pub reason: String,
}

/// Errors a hypervisor handle operation can report.
#[derive(Debug, Error)]
pub enum HandleError {
    /// The engine refused the operation in its current condition.
    #[error("hypervisor rejected the operation: {0}")]
    Rejected(String),

    /// The operation failed with an engine fault.
    #[error("hypervisor fault: {0}")]
    Fault(String),
}

/// The native capability representing a runnable virtual machine.
///
/// Exactly one [`VirtualMachine`](crate::vm::VirtualMachine) owns a
/// handle; nothing else touches it. Control operations are asynchronous
/// with respect to guest execution: they initiate a transition and
/// resolve on completion or failure. [`release`](Self::release) tears
/// down the native resources; the owning machine guarantees it is called
/// exactly once.
#[async_trait]
pub trait HypervisorHandle: Send + Sync {
    /// Begins guest execution for the given configuration.
    async fn start(&self, config: &VmConfiguration) -> Result<(), HandleError>;

    /// Suspends guest execution.
    async fn pause(&self) -> Result<(), HandleError>;

    /// Resumes suspended guest execution.
    async fn resume(&self) -> Result<(), HandleError>;

    /// Ends guest execution without guest cooperation.
    async fn stop(&self) -> Result<(), HandleError>;

    /// Asks the guest to shut down cooperatively. The guest may ignore
    /// the request.
    fn request_stop(&self) -> Result<(), HandleError>;

    /// Returns the engine's view of the execution state.
    fn current_state(&self) -> HandleState;

    /// Hands over the unrecoverable-fault event stream.
    ///
    /// Called at most once per handle; later calls return `None`.
    fn take_fault_events(&self) -> Option<mpsc::UnboundedReceiver<HypervisorFault>>;

    /// Releases the native resources behind this handle.
    fn release(&self);
}
