//! Scripted guests: JSON-described control-plane programs.
//!
//! A scenario gives each hardware thread a list of [`Op`]s. The program for a thread is
//! laid out at `EVB + CODE_OFFSET`, one op per instruction word, so lock retries,
//! WAIT resume addresses and interrupt return addresses all work on real PCs. The reset
//! vector jumps into the program and every interrupt vector runs a handler that clears the
//! line's IAD bit and returns.

use std::path::Path;

use serde::{Deserialize, Serialize};

use hexsim_types::sysreg::{ssr, stid, syscfg, GlobalSreg, ThreadSreg};
use hexsim_types::{cause, GPR_COUNT, INSN_BYTES, VECTOR_REGS};

use crate::config::MachineConfig;
use crate::error::ScriptError;
use crate::machine::ThreadContext;
use crate::scheduler::Guest;
use crate::thread::LockKind;

/// Offset of the program from the exception vector base.
pub const CODE_OFFSET: u32 = 0x1000;

/// One scripted instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Lock { lock: LockKind },
    Unlock { lock: LockKind },
    /// WAIT, resuming at the next op.
    Wait,
    Resume { mask: u32 },
    Start { mask: u32 },
    Stop,
    /// SWI.
    Raise { mask: u32 },
    /// CSWI.
    Clear { mask: u32 },
    Ciad { mask: u32 },
    /// Sets SYSCFG.GIE and this thread's SSR.IE.
    EnableInterrupts,
    SetPriority { prio: u32 },
    SetImask { mask: u32 },
    SetXa { xa: u32 },
    SetGpr { reg: usize, value: u32 },
    /// Fills vector register `reg` with `byte`.
    FillVector { reg: usize, byte: u8 },
    /// Copies byte 0 of vector register `reg` into a general register.
    ReadVector { reg: usize, gpr: usize },
    TlbWrite { index: usize, raw: u64 },
    Syscfg { value: u32 },
    Nop,
}

impl Op {
    /// First register index this op names that does not exist, with the register file size.
    fn bad_register(&self) -> Option<(usize, usize)> {
        let (first, second) = match *self {
            Op::SetGpr { reg, .. } => ((reg, GPR_COUNT), None),
            Op::FillVector { reg, .. } => ((reg, VECTOR_REGS), None),
            Op::ReadVector { reg, gpr } => ((reg, VECTOR_REGS), Some((gpr, GPR_COUNT))),
            _ => return None,
        };
        std::iter::once(first)
            .chain(second)
            .find(|&(index, limit)| index >= limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub config: Option<MachineConfig>,
    /// Program per hardware thread. Threads without one stop as soon as they run.
    pub threads: Vec<Vec<Op>>,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        let scenario: Self = serde_json::from_str(json)?;
        if let Some(config) = &scenario.config {
            config.validate()?;
        }
        scenario.validate_programs()?;
        Ok(scenario)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn validate_programs(&self) -> Result<(), ScriptError> {
        for (thread, program) in self.threads.iter().enumerate() {
            for (index, op) in program.iter().enumerate() {
                if let Some((register, limit)) = op.bad_register() {
                    return Err(ScriptError::RegisterIndex {
                        thread,
                        index,
                        register,
                        limit,
                    });
                }
            }
        }
        Ok(())
    }

    /// One guest per hardware thread of `config`.
    pub fn guests(&self, config: &MachineConfig) -> Result<Vec<ScriptGuest>, ScriptError> {
        self.validate_programs()?;
        if self.threads.len() > config.threads {
            return Err(ScriptError::ProgramCount {
                expected: config.threads,
                found: self.threads.len(),
            });
        }
        Ok((0..config.threads)
            .map(|tid| ScriptGuest::new(self.threads.get(tid).cloned().unwrap_or_default()))
            .collect())
    }
}

/// Executes one [`Op`] per tick.
#[derive(Debug, Clone, Default)]
pub struct ScriptGuest {
    program: Vec<Op>,
    handled: Vec<u8>,
}

impl ScriptGuest {
    pub fn new(program: Vec<Op>) -> Self {
        Self {
            program,
            handled: Vec::new(),
        }
    }

    /// Interrupt lines this thread accepted, in order.
    pub fn handled(&self) -> &[u8] {
        &self.handled
    }

    fn run_vector(&mut self, cpu: &ThreadContext, offset: u32) {
        let event = offset / INSN_BYTES;
        if event == cause::EVENT_RESET {
            let evb = cpu.read_global(GlobalSreg::Evb);
            cpu.set_pc(evb + CODE_OFFSET);
            return;
        }
        match event.checked_sub(cause::EVENT_INT0) {
            Some(line) if line < 32 => {
                cpu.ciad(1 << line);
                cpu.rte();
            }
            _ => {
                tracing::warn!(tid = cpu.id(), event, "unexpected exception event; stopping thread");
                cpu.stop();
            }
        }
    }

    fn execute(&mut self, cpu: &ThreadContext, pc: u32, op: Op) {
        let next = pc.wrapping_add(INSN_BYTES);
        if let Some((register, limit)) = op.bad_register() {
            tracing::warn!(target: "guest_error", tid = cpu.id(), ?op, register, limit, "register index out of range; op skipped");
            cpu.set_pc(next);
            return;
        }
        match op {
            // Lock and unlock move PC themselves; a blocked lock re-executes.
            Op::Lock { lock } => {
                cpu.lock(lock);
                return;
            }
            Op::Unlock { lock } => {
                cpu.unlock(lock);
                return;
            }
            Op::Wait => {
                cpu.wait(next);
                return;
            }
            Op::Stop => {
                cpu.stop();
                return;
            }
            Op::Resume { mask } => {
                cpu.resume(mask);
            }
            Op::Start { mask } => {
                cpu.start(mask);
            }
            Op::Raise { mask } => cpu.swi(mask),
            Op::Clear { mask } => cpu.cswi(mask),
            Op::Ciad { mask } => cpu.ciad(mask),
            Op::EnableInterrupts => {
                let tid = cpu.id();
                let mut state = cpu.state();
                let cfg = state.read_global(GlobalSreg::Syscfg);
                state.write_global(GlobalSreg::Syscfg, syscfg::GIE.insert(cfg, 1));
                let value = state.read_sreg(tid, ThreadSreg::Ssr);
                state.write_ssr(tid, ssr::IE.insert(value, 1));
            }
            Op::SetPriority { prio } => {
                let value = cpu.read_sreg(ThreadSreg::Stid);
                cpu.write_sreg(ThreadSreg::Stid, stid::PRIO.insert(value, prio));
            }
            Op::SetImask { mask } => cpu.write_sreg(ThreadSreg::Imask, mask),
            Op::SetXa { xa } => {
                let value = cpu.read_sreg(ThreadSreg::Ssr);
                cpu.write_sreg(ThreadSreg::Ssr, ssr::XA.insert(value, xa));
            }
            Op::SetGpr { reg, value } => cpu.set_gpr(reg, value),
            Op::FillVector { reg, byte } => cpu.with_vector(|v| v.vreg_mut(reg).fill(byte)),
            Op::ReadVector { reg, gpr } => {
                let byte = cpu.with_vector(|v| v.vreg(reg)[0]);
                cpu.set_gpr(gpr, byte as u32);
            }
            Op::TlbWrite { index, raw } => {
                cpu.state().tlb_write_raw(index, raw);
            }
            Op::Syscfg { value } => cpu.write_global(GlobalSreg::Syscfg, value),
            Op::Nop => {}
        }
        cpu.set_pc(next);
    }
}

impl Guest for ScriptGuest {
    fn on_tick(&mut self, cpu: &ThreadContext) {
        let pc = cpu.pc();
        let offset = pc.wrapping_sub(cpu.read_global(GlobalSreg::Evb));
        if offset < CODE_OFFSET {
            self.run_vector(cpu, offset);
            return;
        }
        let index = ((offset - CODE_OFFSET) / INSN_BYTES) as usize;
        match self.program.get(index).cloned() {
            Some(op) => self.execute(cpu, pc, op),
            None => {
                cpu.stop();
            }
        }
    }

    fn on_interrupt(&mut self, cpu: &ThreadContext, line: u8) {
        tracing::trace!(tid = cpu.id(), line, "scripted interrupt handler");
        self.handled.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ops_by_tag() {
        let scenario = Scenario::from_json(
            r#"{
                "threads": [
                    [
                        { "op": "lock", "lock": "tlb" },
                        { "op": "set_gpr", "reg": 2, "value": 9 },
                        { "op": "unlock", "lock": "tlb" },
                        { "op": "stop" }
                    ]
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(scenario.threads[0][0], Op::Lock { lock: LockKind::Tlb });
        assert_eq!(scenario.threads[0][3], Op::Stop);
        assert!(scenario.config.is_none());
    }

    #[test]
    fn rejects_too_many_programs() {
        let scenario = Scenario {
            config: None,
            threads: vec![vec![], vec![], vec![]],
        };
        let err = scenario.guests(&MachineConfig::with_threads(2)).unwrap_err();
        assert!(matches!(err, ScriptError::ProgramCount { expected: 2, found: 3 }));
        assert_eq!(scenario.guests(&MachineConfig::with_threads(4)).unwrap().len(), 4);
    }

    #[test]
    fn rejects_out_of_range_registers() {
        let err = Scenario::from_json(
            r#"{ "threads": [[{ "op": "nop" }], [{ "op": "set_gpr", "reg": 40, "value": 1 }]] }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ScriptError::RegisterIndex { thread: 1, index: 0, register: 40, limit: 32 }
        ));

        let scenario = Scenario {
            config: None,
            threads: vec![vec![Op::Nop, Op::ReadVector { reg: 3, gpr: 32 }]],
        };
        let err = scenario.guests(&MachineConfig::with_threads(1)).unwrap_err();
        assert!(matches!(err, ScriptError::RegisterIndex { index: 1, register: 32, .. }));
    }

    #[test]
    fn out_of_range_register_op_is_skipped() {
        use crate::machine::Machine;

        let m = Machine::new(MachineConfig::with_threads(1)).unwrap();
        let cpu = m.thread(0);
        let code = cpu.read_global(GlobalSreg::Evb) + CODE_OFFSET;
        cpu.set_pc(code);
        let mut guest = ScriptGuest::new(vec![
            Op::SetGpr { reg: 40, value: 1 },
            Op::FillVector { reg: 32, byte: 9 },
            Op::SetGpr { reg: 2, value: 5 },
        ]);
        for _ in 0..3 {
            guest.on_tick(&cpu);
        }
        assert_eq!(cpu.gpr(2), 5);
        assert_eq!(cpu.pc(), code + 3 * INSN_BYTES);
        assert!(cpu.with_vector(|v| (0..VECTOR_REGS).all(|r| v.vreg(r).iter().all(|&b| b == 0))));
    }

    #[test]
    fn embedded_config_is_validated() {
        let err = Scenario::from_json(r#"{ "config": { "threads": 99 }, "threads": [] }"#).unwrap_err();
        assert!(matches!(err, ScriptError::Config(_)));
    }
}
