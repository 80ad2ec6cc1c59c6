//! TLB-lock and k0-lock arbitration.
//!
//! Each lock is tracked as one [`LockState`] per thread. Releasing a lock hands it to the
//! next WAITING thread in round-robin order after the releaser, which becomes QUEUED: the
//! lock is reserved for it, and it completes the acquisition when it re-executes the lock
//! instruction after waking.

use crate::machine::MachineState;
use crate::thread::{HaltReason, LockKind, LockState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The thread owns the lock and its PC moved past the lock instruction.
    Acquired,
    /// The thread is parked until the lock is handed to it.
    Waiting,
    /// The thread already owned the lock and is now hung.
    Hung,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// Released; `next` is the waiter the lock was handed to, if any.
    Released { next: Option<usize> },
    /// The thread did not own the lock. No lock state changed, but the PC still moved past
    /// the unlock instruction.
    NotOwner,
}

impl MachineState {
    pub fn lock(&mut self, tid: usize, kind: LockKind) -> LockOutcome {
        let outcome = match self.threads[tid].lock_state(kind) {
            LockState::Owner => {
                tracing::warn!(target: "guest_error", tid, ?kind, "lock re-acquired by its owner; thread hangs");
                self.threads[tid].halt = Some(HaltReason::Hung(kind));
                LockOutcome::Hung
            }
            LockState::Queued => {
                self.set_lock_state(tid, kind, LockState::Owner);
                self.advance_pc(tid);
                LockOutcome::Acquired
            }
            LockState::Waiting => {
                self.threads[tid].halt = Some(HaltReason::LockWait(kind));
                LockOutcome::Waiting
            }
            LockState::Unlocked => match self.lock_holder(kind) {
                None => {
                    self.set_lock_state(tid, kind, LockState::Owner);
                    self.advance_pc(tid);
                    LockOutcome::Acquired
                }
                Some(holder) => {
                    tracing::trace!(tid, holder, ?kind, "lock busy");
                    self.set_lock_state(tid, kind, LockState::Waiting);
                    self.threads[tid].halt = Some(HaltReason::LockWait(kind));
                    LockOutcome::Waiting
                }
            },
        };
        tracing::debug!(tid, ?kind, ?outcome, "lock");
        outcome
    }

    pub fn unlock(&mut self, tid: usize, kind: LockKind) -> UnlockOutcome {
        self.advance_pc(tid);
        if self.threads[tid].lock_state(kind) != LockState::Owner {
            tracing::warn!(
                target: "guest_error",
                tid,
                ?kind,
                state = ?self.threads[tid].lock_state(kind),
                "unlock by a thread that does not own the lock"
            );
            return UnlockOutcome::NotOwner;
        }
        self.set_lock_state(tid, kind, LockState::Unlocked);
        let next = self.grant_next(kind, tid);
        tracing::debug!(tid, ?kind, ?next, "unlock");
        UnlockOutcome::Released { next }
    }

    /// Thread that owns or has been handed `kind`.
    pub fn lock_holder(&self, kind: LockKind) -> Option<usize> {
        self.threads
            .iter()
            .position(|t| matches!(t.lock_state(kind), LockState::Owner | LockState::Queued))
    }

    /// Drops every claim `tid` has on either lock, passing held locks to the next waiter.
    pub(crate) fn release_locks(&mut self, tid: usize) {
        for kind in LockKind::ALL {
            match self.threads[tid].lock_state(kind) {
                LockState::Owner | LockState::Queued => {
                    self.set_lock_state(tid, kind, LockState::Unlocked);
                    self.grant_next(kind, tid);
                }
                LockState::Waiting => self.set_lock_state(tid, kind, LockState::Unlocked),
                LockState::Unlocked => {}
            }
        }
    }

    /// An accepted interrupt abandons any lock the thread was waiting for.
    pub(crate) fn cancel_lock_wait(&mut self, tid: usize) {
        for kind in LockKind::ALL {
            if self.threads[tid].lock_state(kind) == LockState::Waiting {
                self.set_lock_state(tid, kind, LockState::Unlocked);
            }
        }
    }

    /// Scans threads after `after`, wrapping, and reserves the lock for the first waiter.
    fn grant_next(&mut self, kind: LockKind, after: usize) -> Option<usize> {
        let n = self.threads.len();
        let next = (1..n)
            .map(|k| (after + k) % n)
            .find(|&tid| self.threads[tid].lock_state(kind) == LockState::Waiting)?;

        self.set_lock_state(next, kind, LockState::Queued);
        let thread = &mut self.threads[next];
        if thread.halt == Some(HaltReason::LockWait(kind)) {
            thread.halt = None;
        }
        self.request_wake();
        Some(next)
    }

    fn set_lock_state(&mut self, tid: usize, kind: LockKind, state: LockState) {
        self.threads[tid].locks[kind.index()] = state;
        self.assert_single_holder(kind);
        self.sync_lock_bits();
    }

    fn assert_single_holder(&self, kind: LockKind) {
        let holders = self
            .threads
            .iter()
            .filter(|t| matches!(t.lock_state(kind), LockState::Owner | LockState::Queued))
            .count();
        assert!(holders <= 1, "{kind:?} lock has {holders} holders");
    }

    /// Mirrors lock occupancy into SYSCFG.TL / SYSCFG.KL.
    pub(crate) fn sync_lock_bits(&mut self) {
        for kind in LockKind::ALL {
            let held = self.lock_holder(kind).is_some();
            self.globals.set(kind.syscfg_field(), held as u32);
        }
    }
}
