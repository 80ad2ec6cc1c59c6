//! One host thread per hardware thread.

use std::io;
use std::sync::Arc;
use std::thread;

use crate::interrupts::Dispatch;
use crate::machine::{Machine, Parked, ThreadContext};
use crate::scheduler::Guest;

/// Exit code reported when the host could not bring up every hardware thread.
const SPAWN_FAILED_EXIT: i32 = -1;

/// Runs every hardware thread on its own scoped host thread until the machine terminates.
/// `guests[i]` drives hardware thread `i`.
///
/// Halted threads block on the machine's condition variable. Returns the machine's exit
/// code.
pub fn run_threaded<G: Guest + Send>(machine: &Arc<Machine>, guests: &mut [G]) -> io::Result<i32> {
    let count = machine.thread_count();
    assert_eq!(guests.len(), count, "one guest per hardware thread");

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(count);
        for (tid, guest) in guests.iter_mut().enumerate() {
            let cpu = machine.thread(tid);
            let spawned = thread::Builder::new()
                .name(format!("hexsim-hw{tid}"))
                .spawn_scoped(scope, move || drive(&cpu, guest));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // Threads already running would otherwise park forever.
                    machine.state().terminate(SPAWN_FAILED_EXIT);
                    return Err(err);
                }
            }
        }

        let mut exit_code = None;
        for handle in handles {
            match handle.join() {
                Ok(code) => exit_code = Some(code),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        Ok(exit_code.or_else(|| machine.exit_code()).unwrap_or(SPAWN_FAILED_EXIT))
    })
}

fn drive<G: Guest>(cpu: &ThreadContext, guest: &mut G) -> i32 {
    tracing::trace!(tid = cpu.id(), "host thread running");
    loop {
        match cpu.dispatch() {
            Dispatch::Terminated(code) => return code,
            Dispatch::Halted => {
                if let Parked::Terminated(code) = cpu.machine().wait_until_runnable(cpu.id()) {
                    return code;
                }
            }
            Dispatch::Interrupt(line) => {
                guest.on_interrupt(cpu, line);
                guest.on_tick(cpu);
            }
            Dispatch::Run => guest.on_tick(cpu),
        }
    }
}
