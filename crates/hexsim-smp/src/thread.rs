use serde::{Deserialize, Serialize};

use hexsim_mmu::TranslationCache;
use hexsim_types::sysreg::{syscfg, Field, Syscfg};
use hexsim_types::{ThreadRegs, VectorContext};

/// The two hardware-arbitrated mutual exclusion resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    /// Guards software TLB maintenance (TLBLOCK/TLBUNLOCK).
    Tlb,
    /// Guards the kernel's k0 scratch state (K0LOCK/K0UNLOCK).
    K0,
}

impl LockKind {
    pub const ALL: [LockKind; 2] = [LockKind::Tlb, LockKind::K0];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            LockKind::Tlb => 0,
            LockKind::K0 => 1,
        }
    }

    /// SYSCFG bit that reports the lock as taken.
    pub const fn syscfg_field(self) -> Field<Syscfg> {
        match self {
            LockKind::Tlb => syscfg::TL,
            LockKind::K0 => syscfg::KL,
        }
    }
}

/// One thread's relationship to one lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockState {
    #[default]
    Unlocked,
    /// Parked until the owner releases.
    Waiting,
    /// Picked as the next owner; completes acquisition when it re-executes the lock.
    Queued,
    Owner,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    #[default]
    Off,
    Run,
    Wait,
    Debug,
}

/// Why a thread is not executing. A thread has at most one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HaltReason {
    LockWait(LockKind),
    /// Parked by the WAIT instruction.
    Wait,
    Off,
    Debug,
    /// Re-acquired a lock it already owned; only a restart clears this.
    Hung(LockKind),
}

/// Per hardware thread state held under the machine lock.
#[derive(Debug, Clone)]
pub struct HardwareThread {
    id: usize,
    pub regs: ThreadRegs,
    pub(crate) mode: ExecMode,
    pub(crate) halt: Option<HaltReason>,
    pub(crate) locks: [LockState; 2],
    pub(crate) interrupt_requested: bool,
    pub(crate) wait_resume_pc: u32,
    /// Live vector/predicate register file.
    pub vector: VectorContext,
    pub(crate) cache: TranslationCache,
}

impl HardwareThread {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            regs: ThreadRegs::new(id as u32),
            mode: ExecMode::Off,
            halt: Some(HaltReason::Off),
            locks: [LockState::Unlocked; 2],
            interrupt_requested: false,
            wait_resume_pc: 0,
            vector: VectorContext::default(),
            cache: TranslationCache::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    #[inline]
    pub fn halt(&self) -> Option<HaltReason> {
        self.halt
    }

    #[inline]
    pub fn lock_state(&self, kind: LockKind) -> LockState {
        self.locks[kind.index()]
    }

    #[inline]
    pub fn interrupt_requested(&self) -> bool {
        self.interrupt_requested
    }

    #[inline]
    pub fn wait_resume_pc(&self) -> u32 {
        self.wait_resume_pc
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != ExecMode::Off
    }

    pub fn is_hung(&self) -> bool {
        matches!(self.halt, Some(HaltReason::Hung(_)))
    }

    /// Whether the host execution context driving this thread may make progress.
    ///
    /// A pending interrupt request overrides WAIT and lock waits, never the other reasons.
    pub fn is_runnable(&self) -> bool {
        match self.halt {
            None => true,
            Some(HaltReason::Wait | HaltReason::LockWait(_)) => self.interrupt_requested,
            Some(_) => false,
        }
    }

    pub fn translation_cache(&self) -> &TranslationCache {
        &self.cache
    }
}
