//! Deterministic time-sliced scheduling of hardware threads.
//!
//! All hardware threads run on the calling host thread in fixed round-robin order, one
//! dispatch boundary per tick, so the interleaving of lock, interrupt and lifecycle
//! operations is reproducible run to run.

use std::sync::Arc;

use crate::interrupts::Dispatch;
use crate::machine::{Machine, ThreadContext};

/// The execution core driven by the schedulers: one instance per hardware thread.
pub trait Guest {
    /// Executes one step of the thread at its current PC.
    fn on_tick(&mut self, cpu: &ThreadContext);

    /// Called after an interrupt on `line` was accepted, before the next tick.
    fn on_interrupt(&mut self, cpu: &ThreadContext, line: u8) {
        let _ = (cpu, line);
    }
}

/// A simple deterministic round-robin scheduler.
#[derive(Debug, Clone, Default)]
pub struct DeterministicScheduler {
    next_cpu: usize,
    ticks: u64,
}

impl DeterministicScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticks executed so far, including ticks of halted threads.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Runs for at most `ticks` scheduler ticks. `guests[i]` drives hardware thread `i`.
    ///
    /// Returns the exit code once the machine has terminated.
    pub fn run_for_ticks<G: Guest>(
        &mut self,
        machine: &Arc<Machine>,
        guests: &mut [G],
        ticks: u64,
    ) -> Option<i32> {
        let cpu_count = machine.thread_count();
        assert_eq!(guests.len(), cpu_count, "one guest per hardware thread");
        let cpus: Vec<ThreadContext> = (0..cpu_count).map(|tid| machine.thread(tid)).collect();

        for _ in 0..ticks {
            let tid = self.next_cpu;
            self.next_cpu = (self.next_cpu + 1) % cpu_count;
            self.ticks += 1;

            let cpu = &cpus[tid];
            let guest = &mut guests[tid];
            match cpu.dispatch() {
                Dispatch::Terminated(code) => return Some(code),
                Dispatch::Halted => {}
                Dispatch::Interrupt(line) => {
                    guest.on_interrupt(cpu, line);
                    guest.on_tick(cpu);
                }
                Dispatch::Run => guest.on_tick(cpu),
            }
        }
        machine.exit_code()
    }
}
