//! Capture and restore of all control-plane state.
//!
//! How the capture is stored or transported is up to the caller; the types only derive
//! serde traits.

use serde::{Deserialize, Serialize};

use hexsim_mmu::TlbEntry;
use hexsim_types::{GlobalRegs, ThreadRegs, VectorContext};

use crate::error::SnapshotError;
use crate::machine::MachineState;
use crate::thread::{ExecMode, HaltReason, LockKind, LockState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub regs: ThreadRegs,
    pub mode: ExecMode,
    pub halt: Option<HaltReason>,
    pub locks: [LockState; 2],
    pub interrupt_requested: bool,
    pub wait_resume_pc: u32,
    pub vector: VectorContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub threads: Vec<ThreadSnapshot>,
    pub globals: GlobalRegs,
    /// Raw TLBR values, one per entry.
    pub tlb: Vec<u64>,
    pub contexts: Vec<VectorContext>,
    pub exit_code: Option<i32>,
}

impl MachineState {
    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            threads: self
                .threads
                .iter()
                .map(|t| ThreadSnapshot {
                    regs: t.regs.clone(),
                    mode: t.mode,
                    halt: t.halt,
                    locks: t.locks,
                    interrupt_requested: t.interrupt_requested,
                    wait_resume_pc: t.wait_resume_pc,
                    vector: t.vector.clone(),
                })
                .collect(),
            globals: self.globals.clone(),
            tlb: self.tlb.entries().iter().map(TlbEntry::to_raw).collect(),
            contexts: self.contexts.clone(),
            exit_code: self.exit_code,
        }
    }

    /// Replaces the machine's state with `snapshot`. Host translation caches start empty.
    ///
    /// Nothing is modified if the snapshot does not fit this machine.
    pub fn restore(&mut self, snapshot: &MachineSnapshot) -> Result<(), SnapshotError> {
        self.validate_snapshot(snapshot)?;

        for (thread, saved) in self.threads.iter_mut().zip(&snapshot.threads) {
            thread.regs = saved.regs.clone();
            thread.mode = saved.mode;
            thread.halt = saved.halt;
            thread.locks = saved.locks;
            thread.interrupt_requested = saved.interrupt_requested;
            thread.wait_resume_pc = saved.wait_resume_pc;
            thread.vector = saved.vector.clone();
            thread.cache.flush_all();
        }
        self.globals = snapshot.globals.clone();
        for (index, &raw) in snapshot.tlb.iter().enumerate() {
            self.tlb.write(index, TlbEntry::from_raw(raw));
        }
        self.contexts = snapshot.contexts.clone();
        self.exit_code = snapshot.exit_code;
        self.sync_lock_bits();
        self.request_wake();
        tracing::debug!(threads = self.threads.len(), "machine state restored");
        Ok(())
    }

    fn validate_snapshot(&self, snapshot: &MachineSnapshot) -> Result<(), SnapshotError> {
        if snapshot.threads.len() != self.threads.len() {
            return Err(SnapshotError::ThreadCount {
                expected: self.threads.len(),
                found: snapshot.threads.len(),
            });
        }
        if snapshot.tlb.len() != self.tlb.len() {
            return Err(SnapshotError::TlbEntries {
                expected: self.tlb.len(),
                found: snapshot.tlb.len(),
            });
        }
        if snapshot.contexts.len() != self.contexts.len() {
            return Err(SnapshotError::ContextCount {
                expected: self.contexts.len(),
                found: snapshot.contexts.len(),
            });
        }
        let well_formed = snapshot
            .threads
            .iter()
            .map(|t| &t.vector)
            .chain(&snapshot.contexts)
            .all(VectorContext::is_well_formed);
        if !well_formed {
            return Err(SnapshotError::MalformedVector);
        }
        for kind in LockKind::ALL {
            let holders = snapshot
                .threads
                .iter()
                .filter(|t| {
                    matches!(
                        t.locks[kind.index()],
                        LockState::Owner | LockState::Queued
                    )
                })
                .count();
            if holders > 1 {
                return Err(SnapshotError::LockHolders(kind));
            }
        }
        // A stopped thread holds no lock claim.
        for (thread, saved) in snapshot.threads.iter().enumerate() {
            if saved.mode != ExecMode::Off {
                continue;
            }
            if let Some(kind) = LockKind::ALL
                .into_iter()
                .find(|kind| saved.locks[kind.index()] != LockState::Unlocked)
            {
                return Err(SnapshotError::StoppedThreadLock { thread, kind });
            }
        }
        Ok(())
    }
}
