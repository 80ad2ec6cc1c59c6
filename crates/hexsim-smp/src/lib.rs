//! SMP control plane of a multi-threaded VLIW processor.
//!
//! All shared state lives in one [`MachineState`] behind the machine's mutex (the "big
//! lock"). Every control-plane operation (lock arbitration, interrupt acceptance, thread
//! start/stop/wait, TLB maintenance, extension context exchange) is a method on
//! `MachineState`, so it can only run while the lock is held. [`ThreadContext`] wraps each
//! operation for one hardware thread and takes the lock for the duration of the call.
//!
//! Threads that cannot make progress carry a [`HaltReason`]. Operations that may unblock
//! a thread record a wake request; the [`StateGuard`] broadcasts it on the machine's
//! condition variable after the lock has been released.
//!
//! Two drivers run an execution core (a [`Guest`]) on top of the machine:
//! [`DeterministicScheduler`] interleaves all hardware threads on the calling thread, and
//! [`run_threaded`] gives each hardware thread its own host thread.

mod config;
mod error;
mod hvx;
mod interrupts;
mod lifecycle;
mod locks;
mod machine;
mod mmu;
mod runner;
mod scheduler;
pub mod script;
mod snapshot;
mod thread;

pub use config::{HvxConfig, MachineConfig, SelectorMap, XA_SELECTORS};
pub use error::{ConfigError, ScriptError, SnapshotError};
pub use interrupts::Dispatch;
pub use lifecycle::StopOutcome;
pub use locks::{LockOutcome, UnlockOutcome};
pub use machine::{Machine, MachineState, Parked, StateGuard, ThreadContext};
pub use mmu::TranslateFault;
pub use runner::run_threaded;
pub use scheduler::{DeterministicScheduler, Guest};
pub use snapshot::{MachineSnapshot, ThreadSnapshot};
pub use thread::{ExecMode, HaltReason, HardwareThread, LockKind, LockState};
