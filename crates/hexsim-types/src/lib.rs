//! Architectural register state shared by the SMP control-plane crates.
//!
//! The register file is split the same way the hardware splits it:
//! - general registers and PC, private to one hardware thread ([`ThreadRegs`])
//! - per-thread system registers (SSR, ELR, IMASK, ...), also in [`ThreadRegs`]
//! - machine-wide system registers (EVB, MODECTL, SYSCFG, IPEND/IAD, ...) in [`GlobalRegs`]
//! - the vector/predicate register file of one extension context ([`VectorContext`])
//!
//! Bit fields inside system registers are described by [`sysreg::Field`] constants. The
//! register a field belongs to is part of its type, so `ssr::XA` cannot be applied to SYSCFG.

pub mod cause;
mod hvx;
mod regs;
pub mod sysreg;

pub use hvx::{VectorContext, PRED_BYTES, PRED_REGS, VECTOR_BYTES, VECTOR_REGS};
pub use regs::{GlobalRegs, ThreadRegs};

/// General registers per hardware thread.
pub const GPR_COUNT: usize = 32;

/// Size of one instruction word.
pub const INSN_BYTES: u32 = 4;

/// Number of interrupt lines tracked by IPEND/IAD/IMASK.
pub const INTERRUPT_LINES: usize = 32;

/// Upper bound on hardware threads (MODECTL.E is 16 bits wide).
pub const MAX_THREADS: usize = 16;

/// General register that holds the process exit code when the last thread stops.
pub const EXIT_CODE_GPR: usize = 2;
