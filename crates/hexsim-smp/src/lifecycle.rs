use hexsim_types::sysreg::{modectl, GlobalSreg};

use crate::machine::MachineState;
use crate::thread::{ExecMode, HaltReason, LockKind, LockState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    AlreadyStopped,
    Stopped,
    /// That was the last enabled thread; the machine has terminated.
    MachineHalted { exit_code: i32 },
}

impl MachineState {
    /// START: brings up every OFF thread in `mask` other than `caller`.
    ///
    /// Returns the mask of threads actually started.
    pub fn start_threads(&mut self, caller: Option<usize>, mask: u32) -> u32 {
        if self.exit_code.is_some() {
            return 0;
        }
        let evb = self.globals.sreg(GlobalSreg::Evb);
        let mut started = 0;
        for tid in 0..self.threads.len() {
            if mask & (1 << tid) == 0 || Some(tid) == caller || self.threads[tid].is_enabled() {
                continue;
            }
            let thread = &mut self.threads[tid];
            debug_assert!(thread.locks.iter().all(|&l| l == LockState::Unlocked));
            thread.regs.soft_reset(evb);
            thread.locks = [LockState::Unlocked; 2];
            thread.wait_resume_pc = 0;
            thread.interrupt_requested = false;
            thread.cache.flush_all();
            thread.mode = ExecMode::Run;
            thread.halt = None;
            self.globals.set_bit(GlobalSreg::Modectl, tid, true);
            started |= 1 << tid;
        }
        if started != 0 {
            tracing::debug!(started, "threads started");
            self.request_wake();
            self.refresh_interrupts();
        }
        started
    }

    /// STOP: takes `tid` offline. Stopping the last enabled thread terminates the machine.
    pub fn stop_thread(&mut self, tid: usize) -> StopOutcome {
        if !self.threads[tid].is_enabled() {
            return StopOutcome::AlreadyStopped;
        }
        self.release_locks(tid);
        let thread = &mut self.threads[tid];
        thread.mode = ExecMode::Off;
        thread.halt = Some(HaltReason::Off);
        thread.interrupt_requested = false;
        self.globals.set_bit(GlobalSreg::Modectl, tid, false);
        self.globals.set_bit(GlobalSreg::Modectl, 16 + tid, false);
        tracing::debug!(tid, "thread stopped");

        if self.globals.get(modectl::E) != 0 {
            // A stopped thread may have been the priority winner for some line.
            self.refresh_interrupts();
            return StopOutcome::Stopped;
        }
        let exit_code = self.exit_code_from_boot_thread();
        self.exit_code = Some(exit_code);
        self.request_wake();
        tracing::debug!(exit_code, "all threads stopped");
        StopOutcome::MachineHalted { exit_code }
    }

    /// Host-initiated shutdown: every parked host thread returns `exit_code`.
    pub fn terminate(&mut self, exit_code: i32) {
        if self.exit_code.is_none() {
            tracing::debug!(exit_code, "machine terminated by host");
            self.exit_code = Some(exit_code);
        }
        self.request_wake();
    }

    /// WAIT: parks `tid` until an interrupt or RESUME. `resume_pc` is where it continues.
    pub fn wait(&mut self, tid: usize, resume_pc: u32) {
        let thread = &mut self.threads[tid];
        if thread.mode != ExecMode::Run || thread.halt.is_some() {
            tracing::warn!(target: "guest_error", tid, mode = ?thread.mode, "wait from a thread that is not running");
            return;
        }
        thread.mode = ExecMode::Wait;
        thread.halt = Some(HaltReason::Wait);
        thread.wait_resume_pc = resume_pc;
        self.globals.set_bit(GlobalSreg::Modectl, 16 + tid, true);
        // A line that is already deliverable must not be slept through.
        self.threads[tid].interrupt_requested = self.deliverable_line(tid).is_some();
        tracing::trace!(tid, resume_pc, "wait");
    }

    /// RESUME: wakes each thread in `mask` parked in WAIT. Returns the mask resumed.
    pub fn resume_threads(&mut self, mask: u32) -> u32 {
        let mut resumed = 0;
        for tid in 0..self.threads.len() {
            if mask & (1 << tid) == 0 || self.threads[tid].mode != ExecMode::Wait {
                continue;
            }
            let thread = &mut self.threads[tid];
            thread.mode = ExecMode::Run;
            thread.halt = None;
            thread.regs.pc = thread.wait_resume_pc;
            self.globals.set_bit(GlobalSreg::Modectl, 16 + tid, false);
            resumed |= 1 << tid;
        }
        if resumed != 0 {
            tracing::trace!(resumed, "resume");
            self.request_wake();
        }
        resumed
    }

    /// Halts `tid` for an external debugger. Returns false if it is off or hung.
    pub fn enter_debug(&mut self, tid: usize) -> bool {
        let thread = &mut self.threads[tid];
        if !thread.is_enabled() || thread.is_hung() {
            return false;
        }
        if thread.mode == ExecMode::Wait {
            // The debugger sees the thread as having completed its WAIT.
            thread.regs.pc = thread.wait_resume_pc;
            self.globals.set_bit(GlobalSreg::Modectl, 16 + tid, false);
        }
        let thread = &mut self.threads[tid];
        thread.mode = ExecMode::Debug;
        thread.halt = Some(HaltReason::Debug);
        tracing::debug!(tid, "entered debug mode");
        true
    }

    /// Returns a DEBUG thread to RUN. A pending lock wait is re-established.
    pub fn leave_debug(&mut self, tid: usize) -> bool {
        let thread = &mut self.threads[tid];
        if thread.mode != ExecMode::Debug {
            return false;
        }
        thread.mode = ExecMode::Run;
        thread.halt = LockKind::ALL
            .into_iter()
            .find(|&kind| thread.lock_state(kind) == LockState::Waiting)
            .map(HaltReason::LockWait);
        tracing::debug!(tid, "left debug mode");
        self.request_wake();
        self.refresh_interrupts();
        true
    }
}

#[cfg(test)]
mod tests {
    use hexsim_types::sysreg::{modectl, ssr, syscfg, GlobalSreg, ThreadSreg};

    use super::StopOutcome;
    use crate::config::MachineConfig;
    use crate::interrupts::Dispatch;
    use crate::machine::Machine;
    use crate::thread::{ExecMode, HaltReason, LockKind};

    #[test]
    fn boot_state() {
        let m = Machine::new(MachineConfig {
            evb: 0x100,
            ..MachineConfig::with_threads(3)
        })
        .unwrap();
        let s = m.state();
        assert_eq!(s.thread(0).mode(), ExecMode::Run);
        assert_eq!(s.thread(0).regs.pc, 0x100);
        assert_eq!(s.thread(1).mode(), ExecMode::Off);
        assert_eq!(s.globals().get(modectl::E), 0b001);
    }

    #[test]
    fn start_skips_caller_and_running_threads() {
        let m = Machine::new(MachineConfig::with_threads(4)).unwrap();
        let mut s = m.state();
        assert_eq!(s.start_threads(Some(0), 0b0111), 0b0110);
        assert_eq!(s.start_threads(Some(0), 0b1111), 0b1000);
        assert_eq!(s.globals().get(modectl::E), 0b1111);
        assert_eq!(s.thread(3).regs.sreg(ThreadSreg::Htid), 3);
    }

    #[test]
    fn stop_twice_does_not_double_count() {
        let m = Machine::new(MachineConfig::with_threads(3)).unwrap();
        let mut s = m.state();
        s.start_threads(Some(0), 0b110);
        s.thread_mut(0).regs.gpr[2] = 7;
        assert_eq!(s.stop_thread(1), StopOutcome::Stopped);
        assert_eq!(s.stop_thread(1), StopOutcome::AlreadyStopped);
        assert_eq!(s.globals().get(modectl::E), 0b101);
        assert_eq!(s.stop_thread(0), StopOutcome::Stopped);
        assert_eq!(s.exit_code(), None);
        assert_eq!(s.stop_thread(2), StopOutcome::MachineHalted { exit_code: 7 });
        assert_eq!(s.stop_thread(2), StopOutcome::AlreadyStopped);
        assert_eq!(s.exit_code(), Some(7));
        assert_eq!(s.start_threads(None, 0b111), 0, "no restarts after termination");
    }

    #[test]
    fn wait_then_resume_continues_at_resume_pc() {
        let m = Machine::new(MachineConfig::with_threads(1)).unwrap();
        let mut s = m.state();
        s.wait(0, 0x1000);
        assert_eq!(s.thread(0).mode(), ExecMode::Wait);
        assert_eq!(s.globals().get(modectl::W), 1);
        assert!(!s.thread(0).is_runnable());
        assert_eq!(s.resume_threads(0b1), 0b1);
        assert_eq!(s.thread(0).regs.pc, 0x1000);
        assert_eq!(s.globals().get(modectl::W), 0);
        assert_eq!(s.resume_threads(0b1), 0);
    }

    #[test]
    fn interrupt_during_wait_uses_resume_pc_as_elr() {
        let m = Machine::new(MachineConfig::with_threads(1)).unwrap();
        let mut s = m.state();
        s.write_global(GlobalSreg::Syscfg, syscfg::GIE.insert(0, 1));
        s.write_sreg(0, ThreadSreg::Ssr, ssr::IE.insert(0, 1));
        s.thread_mut(0).regs.pc = 0x0ffc;
        s.wait(0, 0x1000);
        s.raise(1 << 2);
        assert_eq!(s.dispatch(0), Dispatch::Interrupt(2));
        let t = s.thread(0);
        assert_eq!(t.regs.pc, (16 + 2) << 2);
        assert_eq!(t.regs.sreg(ThreadSreg::Elr), 0x1000);
        assert_eq!(t.mode(), ExecMode::Run);
        assert_eq!(s.globals().get(modectl::W), 0);
    }

    #[test]
    fn wait_with_deliverable_line_is_runnable_immediately() {
        let m = Machine::new(MachineConfig::with_threads(1)).unwrap();
        let mut s = m.state();
        s.write_global(GlobalSreg::Syscfg, syscfg::GIE.insert(0, 1));
        s.write_sreg(0, ThreadSreg::Ssr, ssr::IE.insert(0, 1));
        s.raise(1);
        s.wait(0, 0x20);
        assert!(s.thread(0).is_runnable());
    }

    #[test]
    fn restart_clears_hang() {
        let m = Machine::new(MachineConfig::with_threads(2)).unwrap();
        let mut s = m.state();
        s.start_threads(None, 0b10);
        s.lock(1, LockKind::Tlb);
        s.lock(1, LockKind::Tlb);
        assert_eq!(s.thread(1).halt(), Some(HaltReason::Hung(LockKind::Tlb)));
        assert_eq!(s.start_threads(None, 0b10), 0);
        s.stop_thread(1);
        assert_eq!(s.lock_holder(LockKind::Tlb), None);
        assert_eq!(s.start_threads(None, 0b10), 0b10);
        assert!(s.thread(1).is_runnable());
    }

    #[test]
    fn debug_mode_round_trip() {
        let m = Machine::new(MachineConfig::with_threads(2)).unwrap();
        let mut s = m.state();
        s.start_threads(None, 0b10);
        s.lock(0, LockKind::K0);
        s.lock(1, LockKind::K0);
        assert!(s.enter_debug(1));
        assert_eq!(s.thread(1).halt(), Some(HaltReason::Debug));
        assert!(s.leave_debug(1));
        assert_eq!(s.thread(1).halt(), Some(HaltReason::LockWait(LockKind::K0)));
        assert!(!s.leave_debug(1));

        s.stop_thread(1);
        assert!(!s.enter_debug(1));
    }
}
