use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use hexsim_mmu::{Access, Overlap, TlbEntry, TlbStore};
use hexsim_types::sysreg::{modectl, GlobalSreg, ThreadSreg};
use hexsim_types::{GlobalRegs, VectorContext, EXIT_CODE_GPR, INSN_BYTES};

use crate::config::MachineConfig;
use crate::error::ConfigError;
use crate::interrupts::Dispatch;
use crate::lifecycle::StopOutcome;
use crate::locks::{LockOutcome, UnlockOutcome};
use crate::mmu::TranslateFault;
use crate::thread::{ExecMode, HardwareThread, LockKind};

/// Everything shared between hardware threads. Only reachable through [`StateGuard`].
#[derive(Debug)]
pub struct MachineState {
    pub(crate) config: MachineConfig,
    pub(crate) threads: Vec<HardwareThread>,
    pub(crate) globals: GlobalRegs,
    pub(crate) tlb: TlbStore,
    /// Saved register files, one per physical extension context.
    pub(crate) contexts: Vec<VectorContext>,
    pub(crate) exit_code: Option<i32>,
    wake_pending: bool,
}

impl MachineState {
    fn new(config: MachineConfig) -> Self {
        let mut threads: Vec<HardwareThread> = (0..config.threads).map(HardwareThread::new).collect();
        let mut globals = GlobalRegs::new(config.evb);

        // Thread 0 comes out of reset running at the reset vector.
        let boot = &mut threads[0];
        boot.regs.pc = config.evb;
        boot.mode = ExecMode::Run;
        boot.halt = None;
        globals.set(modectl::E, 1);

        Self {
            tlb: TlbStore::new(config.tlb_entries),
            contexts: vec![VectorContext::default(); config.hvx.contexts],
            threads,
            globals,
            config,
            exit_code: None,
            wake_pending: false,
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    #[inline]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn threads(&self) -> &[HardwareThread] {
        &self.threads
    }

    #[inline]
    pub fn thread(&self, tid: usize) -> &HardwareThread {
        &self.threads[tid]
    }

    /// Mutable access to a thread's registers and live vector file.
    ///
    /// System register writes made this way bypass the side effects of
    /// [`MachineState::write_sreg`].
    #[inline]
    pub fn thread_mut(&mut self, tid: usize) -> &mut HardwareThread {
        &mut self.threads[tid]
    }

    pub fn globals(&self) -> &GlobalRegs {
        &self.globals
    }

    pub fn tlb(&self) -> &TlbStore {
        &self.tlb
    }

    pub fn contexts(&self) -> &[VectorContext] {
        &self.contexts
    }

    /// Set once the last enabled thread stops.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Bitmask of threads not in OFF mode.
    pub fn enabled_mask(&self) -> u32 {
        self.threads
            .iter()
            .filter(|t| t.is_enabled())
            .fold(0, |mask, t| mask | (1 << t.id()))
    }

    pub(crate) fn exit_code_from_boot_thread(&self) -> i32 {
        self.threads[0].regs.gpr[EXIT_CODE_GPR] as i32
    }

    #[inline]
    pub(crate) fn advance_pc(&mut self, tid: usize) {
        let regs = &mut self.threads[tid].regs;
        regs.pc = regs.pc.wrapping_add(INSN_BYTES);
    }

    /// Records that parked threads must re-check their state once the lock is released.
    #[inline]
    pub(crate) fn request_wake(&mut self) {
        self.wake_pending = true;
    }

    fn take_wake(&mut self) -> bool {
        core::mem::take(&mut self.wake_pending)
    }

    pub fn read_sreg(&self, tid: usize, reg: ThreadSreg) -> u32 {
        self.threads[tid].regs.sreg(reg)
    }

    /// Guest write to a per-thread system register, with its architectural side effects.
    pub fn write_sreg(&mut self, tid: usize, reg: ThreadSreg, value: u32) {
        match reg {
            ThreadSreg::Ssr => self.write_ssr(tid, value),
            ThreadSreg::Imask => self.set_imask(tid, value),
            ThreadSreg::Htid => {
                tracing::warn!(target: "guest_error", tid, value, "write to read-only HTID ignored");
            }
            ThreadSreg::Stid => {
                self.threads[tid].regs.set_sreg(reg, value);
                self.refresh_interrupts();
            }
            _ => self.threads[tid].regs.set_sreg(reg, value),
        }
    }

    pub fn read_global(&self, reg: GlobalSreg) -> u32 {
        self.globals.sreg(reg)
    }

    /// Guest write to a global system register.
    pub fn write_global(&mut self, reg: GlobalSreg, value: u32) {
        match reg {
            GlobalSreg::Syscfg => self.write_syscfg(value),
            GlobalSreg::Modectl => {
                tracing::warn!(target: "guest_error", value, "write to read-only MODECTL ignored");
            }
            GlobalSreg::Ipend | GlobalSreg::Iad => {
                self.globals.set_sreg(reg, value);
                self.refresh_interrupts();
            }
            GlobalSreg::Evb => self.globals.set_sreg(reg, value & !0xff),
            GlobalSreg::Vid => self.globals.set_sreg(reg, value),
        }
    }
}

/// Big-lock guard. Wakes requested while it was held are broadcast after it is released.
pub struct StateGuard<'a> {
    guard: Option<MutexGuard<'a, MachineState>>,
    wake: &'a Condvar,
}

impl Deref for StateGuard<'_> {
    type Target = MachineState;

    fn deref(&self) -> &MachineState {
        self.guard.as_deref().unwrap_or_else(|| unreachable!("state guard used after release"))
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut MachineState {
        self.guard
            .as_deref_mut()
            .unwrap_or_else(|| unreachable!("state guard used after release"))
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        let Some(mut guard) = self.guard.take() else {
            return;
        };
        let wake = guard.take_wake();
        drop(guard);
        if wake {
            self.wake.notify_all();
        }
    }
}

/// Result of blocking a host thread until its hardware thread can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parked {
    Runnable,
    Terminated(i32),
}

/// The simulated machine: shared state behind one mutex plus the wake condition variable.
#[derive(Debug)]
pub struct Machine {
    state: Mutex<MachineState>,
    wake: Condvar,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        tracing::debug!(
            threads = config.threads,
            tlb_entries = config.tlb_entries,
            contexts = config.hvx.contexts,
            "machine created"
        );
        Ok(Arc::new(Self {
            state: Mutex::new(MachineState::new(config)),
            wake: Condvar::new(),
        }))
    }

    /// Acquires the big lock.
    pub fn state(&self) -> StateGuard<'_> {
        StateGuard {
            guard: Some(self.state.lock().unwrap_or_else(PoisonError::into_inner)),
            wake: &self.wake,
        }
    }

    pub fn thread_count(&self) -> usize {
        self.state().thread_count()
    }

    /// Handle for hardware thread `tid`.
    ///
    /// # Panics
    ///
    /// Panics if `tid` is not a thread of this machine.
    pub fn thread(self: &Arc<Self>, tid: usize) -> ThreadContext {
        let count = self.thread_count();
        assert!(tid < count, "thread id {tid} out of range (machine has {count})");
        ThreadContext {
            machine: Arc::clone(self),
            tid,
        }
    }

    pub fn raise(&self, mask: u32) {
        self.state().raise(mask);
    }

    pub fn clear(&self, mask: u32) {
        self.state().clear(mask);
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.state().exit_code()
    }

    /// Blocks until hardware thread `tid` is runnable or the machine has terminated.
    pub fn wait_until_runnable(&self, tid: usize) -> Parked {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(code) = state.exit_code {
                return Parked::Terminated(code);
            }
            if state.threads[tid].is_runnable() {
                return Parked::Runnable;
            }
            state = self.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// One hardware thread's view of the machine, as used by an execution core.
///
/// Every method takes the big lock for its own duration.
#[derive(Debug, Clone)]
pub struct ThreadContext {
    machine: Arc<Machine>,
    tid: usize,
}

impl ThreadContext {
    #[inline]
    pub fn id(&self) -> usize {
        self.tid
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    pub fn state(&self) -> StateGuard<'_> {
        self.machine.state()
    }

    pub fn pc(&self) -> u32 {
        self.state().thread(self.tid).regs.pc
    }

    pub fn set_pc(&self, pc: u32) {
        self.state().thread_mut(self.tid).regs.pc = pc;
    }

    pub fn gpr(&self, reg: usize) -> u32 {
        self.state().thread(self.tid).regs.gpr[reg]
    }

    pub fn set_gpr(&self, reg: usize, value: u32) {
        self.state().thread_mut(self.tid).regs.gpr[reg] = value;
    }

    pub fn mode(&self) -> ExecMode {
        self.state().thread(self.tid).mode()
    }

    /// True when the host context driving this thread should stop executing and park.
    pub fn should_halt(&self) -> bool {
        let state = self.state();
        state.exit_code.is_some() || !state.thread(self.tid).is_runnable()
    }

    /// Dispatch boundary: delivers a pending interrupt if one is acceptable.
    pub fn dispatch(&self) -> Dispatch {
        self.state().dispatch(self.tid)
    }

    pub fn lock(&self, kind: LockKind) -> LockOutcome {
        self.state().lock(self.tid, kind)
    }

    pub fn unlock(&self, kind: LockKind) -> UnlockOutcome {
        self.state().unlock(self.tid, kind)
    }

    pub fn wait(&self, resume_pc: u32) {
        self.state().wait(self.tid, resume_pc);
    }

    pub fn resume(&self, mask: u32) -> u32 {
        self.state().resume_threads(mask)
    }

    pub fn start(&self, mask: u32) -> u32 {
        self.state().start_threads(Some(self.tid), mask)
    }

    pub fn stop(&self) -> StopOutcome {
        self.state().stop_thread(self.tid)
    }

    pub fn swi(&self, mask: u32) {
        self.state().raise(mask);
    }

    pub fn cswi(&self, mask: u32) {
        self.state().clear(mask);
    }

    pub fn ciad(&self, mask: u32) {
        self.state().ciad(mask);
    }

    pub fn rte(&self) {
        self.state().rte(self.tid);
    }

    pub fn read_sreg(&self, reg: ThreadSreg) -> u32 {
        self.state().read_sreg(self.tid, reg)
    }

    pub fn write_sreg(&self, reg: ThreadSreg, value: u32) {
        self.state().write_sreg(self.tid, reg, value);
    }

    pub fn read_global(&self, reg: GlobalSreg) -> u32 {
        self.state().read_global(reg)
    }

    pub fn write_global(&self, reg: GlobalSreg, value: u32) {
        self.state().write_global(reg, value);
    }

    pub fn tlb_write(&self, index: usize, entry: TlbEntry) -> Option<TlbEntry> {
        self.state().tlb_write(index, entry)
    }

    pub fn tlb_read(&self, index: usize) -> Option<u64> {
        self.state().tlb_read_raw(index)
    }

    pub fn tlb_probe(&self, vaddr: u32) -> Option<usize> {
        self.state().tlb_probe(self.tid, vaddr)
    }

    pub fn tlb_check_overlap(&self, candidate: &TlbEntry, exclude: Option<usize>) -> Overlap {
        self.state().tlb_check_overlap(candidate, exclude)
    }

    pub fn translate(&self, vaddr: u32, access: Access) -> Result<u64, TranslateFault> {
        self.state().translate(self.tid, vaddr, access)
    }

    /// Runs `f` with exclusive access to the vector file this thread currently owns.
    pub fn with_vector<T>(&self, f: impl FnOnce(&mut VectorContext) -> T) -> T {
        f(&mut self.state().thread_mut(self.tid).vector)
    }
}
