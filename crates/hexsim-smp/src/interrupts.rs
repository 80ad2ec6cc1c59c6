//! Interrupt arbitration across hardware threads.
//!
//! IPEND and IAD are machine-wide; IMASK, SSR.IE and SSR.EX are per thread. A thread
//! accepts the lowest pending line that is not already accepted and that it is qualified
//! for. Under strict priority (SYSCFG.PRIO) only the qualified thread with the lowest
//! STID.PRIO may take a line, ties going to the lower thread id.

use hexsim_types::cause;
use hexsim_types::sysreg::{imask, ssr, stid, syscfg, GlobalSreg, ThreadSreg};
use hexsim_types::INTERRUPT_LINES;

use crate::machine::MachineState;
use crate::thread::{ExecMode, HaltReason};

/// What the execution core should do at a dispatch boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The thread is halted and must not execute.
    Halted,
    /// Execute at the current PC.
    Run,
    /// An interrupt on this line was accepted; PC is at its vector.
    Interrupt(u8),
    Terminated(i32),
}

impl MachineState {
    /// Sets IPEND bits (SWI, or a device asserting lines).
    pub fn raise(&mut self, mask: u32) {
        let pending = self.globals.sreg(GlobalSreg::Ipend) | mask;
        self.globals.set_sreg(GlobalSreg::Ipend, pending);
        tracing::trace!(mask, pending, "raise");
        self.refresh_interrupts();
    }

    /// Clears IPEND bits (CSWI, or a device deasserting lines).
    pub fn clear(&mut self, mask: u32) {
        let pending = self.globals.sreg(GlobalSreg::Ipend) & !mask;
        self.globals.set_sreg(GlobalSreg::Ipend, pending);
        tracing::trace!(mask, pending, "clear");
        self.refresh_interrupts();
    }

    /// Clears IAD bits so the lines can be accepted again.
    pub fn ciad(&mut self, mask: u32) {
        let iad = self.globals.sreg(GlobalSreg::Iad) & !mask;
        self.globals.set_sreg(GlobalSreg::Iad, iad);
        self.refresh_interrupts();
    }

    pub fn set_imask(&mut self, tid: usize, value: u32) {
        self.threads[tid].regs.set(imask::MASK, value);
        self.refresh_interrupts();
    }

    /// IASSIGNW: for `line`, masks it on every thread whose bit in `thread_mask` is set
    /// and unmasks it on the others.
    pub fn iassignw(&mut self, line: u8, thread_mask: u32) {
        let bit = 1u32 << (line as usize % INTERRUPT_LINES);
        for thread in &mut self.threads {
            let masked = thread_mask & (1 << thread.id()) != 0;
            let value = thread.regs.get(imask::MASK);
            let value = if masked { value | bit } else { value & !bit };
            thread.regs.set(imask::MASK, value);
        }
        self.refresh_interrupts();
    }

    /// IASSIGNR: one bit per thread, set where `line` is masked.
    pub fn iassignr(&self, line: u8) -> u32 {
        let bit = 1u32 << (line as usize % INTERRUPT_LINES);
        self.threads
            .iter()
            .filter(|t| t.regs.get(imask::MASK) & bit != 0)
            .fold(0, |mask, t| mask | (1 << t.id()))
    }

    /// Return from exception: resumes at ELR with SSR.EX cleared.
    pub fn rte(&mut self, tid: usize) {
        let regs = &mut self.threads[tid].regs;
        regs.pc = regs.sreg(ThreadSreg::Elr);
        regs.set(ssr::EX, 0);
        self.refresh_interrupts();
    }

    /// Whether `tid` may take interrupts at all right now, ignoring line state.
    fn accepts_interrupts(&self, tid: usize) -> bool {
        let thread = &self.threads[tid];
        self.globals.flag(syscfg::GIE)
            && thread.regs.flag(ssr::IE)
            && !thread.regs.flag(ssr::EX)
            && matches!(thread.mode(), ExecMode::Run | ExecMode::Wait)
            && !thread.is_hung()
    }

    fn is_qualified(&self, tid: usize, line: usize) -> bool {
        self.accepts_interrupts(tid) && self.threads[tid].regs.get(imask::MASK) & (1 << line) == 0
    }

    /// Thread that wins `line` under strict priority.
    fn priority_winner(&self, line: usize) -> Option<usize> {
        self.threads
            .iter()
            .filter(|t| self.is_qualified(t.id(), line))
            .min_by_key(|t| (t.regs.get(stid::PRIO), t.id()))
            .map(|t| t.id())
    }

    /// Lowest line `tid` would accept now.
    pub fn deliverable_line(&self, tid: usize) -> Option<u8> {
        let candidates =
            self.globals.sreg(GlobalSreg::Ipend) & !self.globals.sreg(GlobalSreg::Iad);
        if candidates == 0 || !self.accepts_interrupts(tid) {
            return None;
        }
        let strict = self.globals.flag(syscfg::PRIO);
        (0..INTERRUPT_LINES)
            .filter(|&line| candidates & (1 << line) != 0)
            .find(|&line| {
                self.is_qualified(tid, line) && (!strict || self.priority_winner(line) == Some(tid))
            })
            .map(|line| line as u8)
    }

    /// Accepts the first deliverable interrupt for `tid`, if any.
    ///
    /// Clears the thread's interrupt request either way; a parked thread with nothing to
    /// take stays parked.
    pub fn deliver(&mut self, tid: usize) -> Option<u8> {
        let line = self.deliverable_line(tid);
        self.threads[tid].interrupt_requested = false;
        let line = line?;
        self.accept(tid, line);
        Some(line)
    }

    pub fn check_and_deliver(&mut self, tid: usize) -> bool {
        self.deliver(tid).is_some()
    }

    fn accept(&mut self, tid: usize, line: u8) {
        let bit = line as usize;
        self.globals.set_bit(GlobalSreg::Ipend, bit, false);
        self.globals.set_bit(GlobalSreg::Iad, bit, true);
        self.globals.set_sreg(GlobalSreg::Vid, line as u32);
        let evb = self.globals.sreg(GlobalSreg::Evb);

        self.cancel_lock_wait(tid);

        let thread = &mut self.threads[tid];
        let resume_pc = if thread.mode == ExecMode::Wait {
            thread.wait_resume_pc
        } else {
            thread.regs.pc
        };
        let was_waiting = thread.mode == ExecMode::Wait;
        thread.regs.set(ssr::CAUSE, cause::interrupt_cause(line) as u32);
        thread.regs.set(ssr::EX, 1);
        thread.regs.set_sreg(ThreadSreg::Elr, resume_pc);
        thread.mode = ExecMode::Run;
        thread.halt = None;
        thread.regs.pc = cause::interrupt_vector(evb, line);

        if was_waiting {
            self.globals.set_bit(GlobalSreg::Modectl, 16 + tid, false);
        }
        tracing::debug!(tid, line, elr = resume_pc, "interrupt accepted");

        // With this thread in EX, another one may now win a line still pending.
        self.refresh_interrupts();
    }

    /// Recomputes every thread's interrupt request and wakes parked threads that have one.
    ///
    /// A request is withdrawn once nothing is deliverable to the thread any more (the line
    /// was cleared, masked or taken elsewhere), so a parked thread stays parked.
    pub(crate) fn refresh_interrupts(&mut self) {
        for tid in 0..self.threads.len() {
            let requested = self.deliverable_line(tid).is_some();
            let thread = &mut self.threads[tid];
            thread.interrupt_requested = requested;
            if requested && matches!(thread.halt, Some(HaltReason::Wait | HaltReason::LockWait(_))) {
                self.request_wake();
            }
        }
    }

    /// One dispatch boundary for `tid`.
    pub fn dispatch(&mut self, tid: usize) -> Dispatch {
        if let Some(code) = self.exit_code {
            return Dispatch::Terminated(code);
        }
        if !self.threads[tid].is_runnable() {
            return Dispatch::Halted;
        }
        match self.deliver(tid) {
            Some(line) => Dispatch::Interrupt(line),
            None if self.threads[tid].halt.is_none() => Dispatch::Run,
            None => Dispatch::Halted,
        }
    }
}

#[cfg(test)]
mod tests {
    use hexsim_types::sysreg::{ssr, stid, syscfg, GlobalSreg, ThreadSreg};

    use super::Dispatch;
    use crate::config::MachineConfig;
    use crate::machine::{Machine, MachineState};
    use crate::thread::{ExecMode, LockKind, LockState};

    fn enable(s: &mut MachineState, threads: usize) {
        s.start_threads(None, (1 << threads) - 1);
        let cfg = s.read_global(GlobalSreg::Syscfg);
        s.write_global(GlobalSreg::Syscfg, syscfg::GIE.insert(cfg, 1));
        for tid in 0..threads {
            s.write_sreg(tid, ThreadSreg::Ssr, ssr::IE.insert(0, 1));
        }
    }

    #[test]
    fn accept_updates_registers() {
        let m = Machine::new(MachineConfig {
            evb: 0x2000,
            ..MachineConfig::with_threads(1)
        })
        .unwrap();
        let mut s = m.state();
        enable(&mut s, 1);
        s.thread_mut(0).regs.pc = 0x2340;
        s.raise(1 << 5);

        assert!(s.check_and_deliver(0));
        let t = s.thread(0);
        assert_eq!(t.regs.get(ssr::CAUSE), 0xc5);
        assert!(t.regs.flag(ssr::EX));
        assert_eq!(t.regs.sreg(ThreadSreg::Elr), 0x2340);
        assert_eq!(t.regs.pc, 0x2000 | ((16 + 5) << 2));
        assert_eq!(s.read_global(GlobalSreg::Ipend), 0);
        assert_eq!(s.read_global(GlobalSreg::Iad), 1 << 5);
        assert_eq!(s.read_global(GlobalSreg::Vid), 5);

        // EX now blocks further delivery until RTE.
        s.raise(1 << 1);
        assert!(!s.check_and_deliver(0));
        s.rte(0);
        assert_eq!(s.thread(0).regs.pc, 0x2340);
        assert!(s.check_and_deliver(0));
        assert_eq!(s.thread(0).regs.get(ssr::CAUSE), 0xc1);
    }

    #[test]
    fn accepted_line_is_blocked_until_ciad() {
        let m = Machine::new(MachineConfig::with_threads(1)).unwrap();
        let mut s = m.state();
        enable(&mut s, 1);
        s.raise(1);
        assert!(s.check_and_deliver(0));
        s.rte(0);
        s.raise(1);
        assert!(!s.check_and_deliver(0));
        assert_eq!(s.read_global(GlobalSreg::Ipend), 1, "IPEND untouched when nothing delivers");
        s.ciad(1);
        assert!(s.check_and_deliver(0));
    }

    #[test]
    fn empty_ipend_clears_request_and_leaves_halt() {
        let m = Machine::new(MachineConfig::with_threads(1)).unwrap();
        let mut s = m.state();
        enable(&mut s, 1);
        s.wait(0, 0x40);
        s.thread_mut(0).interrupt_requested = true;
        assert!(!s.check_and_deliver(0));
        assert!(!s.thread(0).interrupt_requested());
        assert_eq!(s.thread(0).mode(), ExecMode::Wait);
    }

    #[test]
    fn strict_priority_prefers_lower_prio_value() {
        let m = Machine::new(MachineConfig::with_threads(2)).unwrap();
        let mut s = m.state();
        enable(&mut s, 2);
        let cfg = s.read_global(GlobalSreg::Syscfg);
        s.write_global(GlobalSreg::Syscfg, syscfg::PRIO.insert(cfg, 1));
        s.write_sreg(0, ThreadSreg::Stid, stid::PRIO.insert(0, 5));
        s.write_sreg(1, ThreadSreg::Stid, stid::PRIO.insert(0, 3));
        s.raise(1 << 2);

        assert!(!s.check_and_deliver(0));
        assert!(s.check_and_deliver(1));
    }

    #[test]
    fn priority_tie_goes_to_lower_thread_id() {
        let m = Machine::new(MachineConfig::with_threads(3)).unwrap();
        let mut s = m.state();
        enable(&mut s, 3);
        let cfg = s.read_global(GlobalSreg::Syscfg);
        s.write_global(GlobalSreg::Syscfg, syscfg::PRIO.insert(cfg, 1));
        for tid in 0..3 {
            s.write_sreg(tid, ThreadSreg::Stid, stid::PRIO.insert(0, 4));
        }
        // Thread 0 masks the line, so thread 1 is the best qualified thread.
        s.iassignw(0, 0b001);
        assert_eq!(s.iassignr(0), 0b001);
        s.raise(1);
        assert!(!s.check_and_deliver(2));
        assert!(!s.check_and_deliver(0));
        assert!(s.check_and_deliver(1));
    }

    #[test]
    fn without_strict_priority_any_qualified_thread_accepts() {
        let m = Machine::new(MachineConfig::with_threads(2)).unwrap();
        let mut s = m.state();
        enable(&mut s, 2);
        s.write_sreg(0, ThreadSreg::Stid, stid::PRIO.insert(0, 1));
        s.write_sreg(1, ThreadSreg::Stid, stid::PRIO.insert(0, 9));
        s.raise(1 << 3);
        assert!(s.check_and_deliver(1));
        assert!(!s.check_and_deliver(0));
    }

    #[test]
    fn interrupt_cancels_lock_wait() {
        let m = Machine::new(MachineConfig::with_threads(2)).unwrap();
        let mut s = m.state();
        enable(&mut s, 2);
        s.lock(0, LockKind::Tlb);
        s.lock(1, LockKind::Tlb);
        assert!(!s.thread(1).is_runnable());

        s.iassignw(4, 0b01);
        s.raise(1 << 4);
        assert!(s.thread(1).interrupt_requested());
        assert!(s.thread(1).is_runnable());
        assert_eq!(s.dispatch(1), Dispatch::Interrupt(4));
        assert_eq!(s.thread(1).lock_state(LockKind::Tlb), LockState::Unlocked);
        assert_eq!(s.thread(1).halt(), None);
    }

    #[test]
    fn hung_and_gie_clear_threads_are_not_qualified() {
        let m = Machine::new(MachineConfig::with_threads(1)).unwrap();
        let mut s = m.state();
        enable(&mut s, 1);
        s.lock(0, LockKind::K0);
        s.lock(0, LockKind::K0);
        s.raise(1);
        assert_eq!(s.dispatch(0), Dispatch::Halted);
        assert_eq!(s.deliverable_line(0), None);

        let m = Machine::new(MachineConfig::with_threads(1)).unwrap();
        let mut s = m.state();
        s.write_sreg(0, ThreadSreg::Ssr, ssr::IE.insert(0, 1));
        s.raise(1);
        assert_eq!(s.dispatch(0), Dispatch::Run);
    }

    #[test]
    fn acceptance_passes_remaining_line_to_parked_runner_up() {
        let m = Machine::new(MachineConfig::with_threads(2)).unwrap();
        let mut s = m.state();
        enable(&mut s, 2);
        let cfg = s.read_global(GlobalSreg::Syscfg);
        s.write_global(GlobalSreg::Syscfg, syscfg::PRIO.insert(cfg, 1));
        s.write_sreg(0, ThreadSreg::Stid, stid::PRIO.insert(0, 1));
        s.write_sreg(1, ThreadSreg::Stid, stid::PRIO.insert(0, 5));
        s.wait(1, 0x1000);

        s.raise(0b11);
        assert!(!s.thread(1).is_runnable(), "thread 0 wins both lines while it can accept");
        assert_eq!(s.dispatch(0), Dispatch::Interrupt(0));

        // Thread 0 is now in EX, so line 1 belongs to thread 1.
        assert_eq!(s.deliverable_line(1), Some(1));
        assert!(s.thread(1).is_runnable());
        assert_eq!(s.dispatch(1), Dispatch::Interrupt(1));
        assert_eq!(s.thread(1).regs.sreg(ThreadSreg::Elr), 0x1000);
        assert_eq!(s.read_global(GlobalSreg::Iad), 0b11);
    }

    #[test]
    fn cleared_line_no_longer_wakes_parked_thread() {
        let m = Machine::new(MachineConfig::with_threads(1)).unwrap();
        let mut s = m.state();
        enable(&mut s, 1);
        s.wait(0, 0x80);
        s.raise(1 << 6);
        assert!(s.thread(0).is_runnable());

        s.clear(1 << 6);
        assert_eq!(s.read_global(GlobalSreg::Ipend), 0);
        assert!(!s.thread(0).interrupt_requested());
        assert!(!s.thread(0).is_runnable());
        assert_eq!(s.dispatch(0), Dispatch::Halted);
        assert_eq!(s.thread(0).mode(), ExecMode::Wait);
    }

    #[test]
    fn cswi_clears_pending_but_keeps_accepted() {
        let m = Machine::new(MachineConfig::with_threads(2)).unwrap();
        {
            let mut s = m.state();
            enable(&mut s, 2);
            s.wait(1, 0x200);
            s.iassignw(0, 0b10);
            s.iassignw(3, 0b01);
        }
        let cpu = m.thread(0);
        cpu.swi(0b1001);
        assert_eq!(cpu.dispatch(), Dispatch::Interrupt(0));
        assert!(m.state().thread(1).is_runnable(), "line 3 is waiting for thread 1");

        cpu.cswi(0b1001);
        let s = m.state();
        assert_eq!(s.read_global(GlobalSreg::Ipend), 0);
        assert_eq!(s.read_global(GlobalSreg::Iad), 0b0001, "accepted line stays in IAD");
        assert!(!s.thread(1).is_runnable());
    }

    #[test]
    fn delivery_is_deterministic() {
        let run = || {
            let m = Machine::new(MachineConfig::with_threads(4)).unwrap();
            let mut s = m.state();
            enable(&mut s, 4);
            s.raise(0b1011_0110);
            let mut log = Vec::new();
            for _ in 0..3 {
                for tid in 0..4 {
                    if let Dispatch::Interrupt(line) = s.dispatch(tid) {
                        log.push((tid, line));
                    }
                }
            }
            log
        };
        let first = run();
        assert_eq!(first, vec![(0, 1), (1, 2), (2, 4), (3, 5)]);
        assert_eq!(first, run());
    }
}
