use serde::{Deserialize, Serialize};

use crate::sysreg::{Field, GlobalRegister, GlobalSreg, ThreadRegister, ThreadSreg};
use crate::GPR_COUNT;

/// Registers private to one hardware thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRegs {
    pub gpr: [u32; GPR_COUNT],
    pub pc: u32,
    sregs: [u32; ThreadSreg::COUNT],
}

impl ThreadRegs {
    pub fn new(htid: u32) -> Self {
        let mut regs = Self {
            gpr: [0; GPR_COUNT],
            pc: 0,
            sregs: [0; ThreadSreg::COUNT],
        };
        regs.sregs[ThreadSreg::Htid.index()] = htid;
        regs
    }

    /// Soft reset: clears everything except the hardware thread number and
    /// points PC at `reset_pc`.
    pub fn soft_reset(&mut self, reset_pc: u32) {
        let htid = self.sreg(ThreadSreg::Htid);
        *self = Self::new(htid);
        self.pc = reset_pc;
    }

    #[inline]
    pub fn sreg(&self, reg: ThreadSreg) -> u32 {
        self.sregs[reg.index()]
    }

    #[inline]
    pub fn set_sreg(&mut self, reg: ThreadSreg, value: u32) {
        self.sregs[reg.index()] = value;
    }

    #[inline]
    pub fn get<R: ThreadRegister>(&self, field: Field<R>) -> u32 {
        field.extract(self.sregs[R::REG.index()])
    }

    #[inline]
    pub fn set<R: ThreadRegister>(&mut self, field: Field<R>, value: u32) {
        let slot = &mut self.sregs[R::REG.index()];
        *slot = field.insert(*slot, value);
    }

    #[inline]
    pub fn flag<R: ThreadRegister>(&self, field: Field<R>) -> bool {
        self.get(field) != 0
    }
}

/// Registers shared by all hardware threads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRegs {
    sregs: [u32; GlobalSreg::COUNT],
}

impl GlobalRegs {
    pub fn new(evb: u32) -> Self {
        let mut regs = Self::default();
        regs.sregs[GlobalSreg::Evb.index()] = evb;
        regs
    }

    #[inline]
    pub fn sreg(&self, reg: GlobalSreg) -> u32 {
        self.sregs[reg.index()]
    }

    #[inline]
    pub fn set_sreg(&mut self, reg: GlobalSreg, value: u32) {
        self.sregs[reg.index()] = value;
    }

    #[inline]
    pub fn get<R: GlobalRegister>(&self, field: Field<R>) -> u32 {
        field.extract(self.sregs[R::REG.index()])
    }

    #[inline]
    pub fn set<R: GlobalRegister>(&mut self, field: Field<R>, value: u32) {
        let slot = &mut self.sregs[R::REG.index()];
        *slot = field.insert(*slot, value);
    }

    #[inline]
    pub fn flag<R: GlobalRegister>(&self, field: Field<R>) -> bool {
        self.get(field) != 0
    }

    /// Sets or clears bit `bit` of a bitset-style register (IPEND, IAD, MODECTL halves).
    #[inline]
    pub fn set_bit(&mut self, reg: GlobalSreg, bit: usize, value: bool) {
        let slot = &mut self.sregs[reg.index()];
        if value {
            *slot |= 1 << bit;
        } else {
            *slot &= !(1 << bit);
        }
    }
}
