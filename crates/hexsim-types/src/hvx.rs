use core::fmt;

use serde::{Deserialize, Serialize};

/// Bytes per vector register.
pub const VECTOR_BYTES: usize = 128;
/// Vector registers per context.
pub const VECTOR_REGS: usize = 32;
/// Bytes per predicate register (one bit per vector byte).
pub const PRED_BYTES: usize = VECTOR_BYTES / 8;
/// Predicate registers per context.
pub const PRED_REGS: usize = 4;

/// Vector and predicate register contents of one extension context.
///
/// Stored as flat byte buffers; a full context is a little over 4 KiB.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorContext {
    vregs: Vec<u8>,
    qregs: Vec<u8>,
}

impl Default for VectorContext {
    fn default() -> Self {
        Self {
            vregs: vec![0; VECTOR_REGS * VECTOR_BYTES],
            qregs: vec![0; PRED_REGS * PRED_BYTES],
        }
    }
}

impl fmt::Debug for VectorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let live = self
            .vregs
            .chunks(VECTOR_BYTES)
            .filter(|v| v.iter().any(|&b| b != 0))
            .count();
        f.debug_struct("VectorContext")
            .field("nonzero_vregs", &live)
            .finish_non_exhaustive()
    }
}

impl VectorContext {
    pub fn vreg(&self, index: usize) -> &[u8] {
        &self.vregs[index * VECTOR_BYTES..(index + 1) * VECTOR_BYTES]
    }

    pub fn vreg_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.vregs[index * VECTOR_BYTES..(index + 1) * VECTOR_BYTES]
    }

    pub fn qreg(&self, index: usize) -> &[u8] {
        &self.qregs[index * PRED_BYTES..(index + 1) * PRED_BYTES]
    }

    pub fn qreg_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.qregs[index * PRED_BYTES..(index + 1) * PRED_BYTES]
    }

    /// Checks buffer sizes after deserialization.
    pub fn is_well_formed(&self) -> bool {
        self.vregs.len() == VECTOR_REGS * VECTOR_BYTES && self.qregs.len() == PRED_REGS * PRED_BYTES
    }
}
