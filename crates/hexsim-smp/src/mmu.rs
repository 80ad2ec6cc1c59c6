use core::fmt;

use hexsim_mmu::{Access, Overlap, TlbEntry, TlbMatch};
use hexsim_types::sysreg::{ssr, syscfg, GlobalSreg, ThreadSreg};

use crate::machine::MachineState;
use crate::thread::LockKind;

/// A translation that raised a guest exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslateFault {
    /// SSR.CAUSE value for the exception.
    pub cause: u8,
    pub vaddr: u32,
}

impl fmt::Display for TranslateFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "translation fault {:#04x} at {:#010x}", self.cause, self.vaddr)
    }
}

impl MachineState {
    /// TLBW. Overwriting a valid entry while the MMU is on invalidates every thread's
    /// cached translations for the old page window.
    pub fn tlb_write(&mut self, index: usize, entry: TlbEntry) -> Option<TlbEntry> {
        let old = self.tlb.write(index, entry)?;
        if old.valid && self.globals.flag(syscfg::MMUEN) {
            let (vbase, len) = (old.vbase(), old.size.bytes());
            for thread in &mut self.threads {
                thread.cache.flush_range(vbase, len);
            }
        }
        tracing::trace!(index, raw = entry.to_raw(), "tlb write");
        Some(old)
    }

    pub fn tlb_write_raw(&mut self, index: usize, raw: u64) -> Option<TlbEntry> {
        self.tlb_write(index, TlbEntry::from_raw(raw))
    }

    /// TLBR.
    pub fn tlb_read_raw(&self, index: usize) -> Option<u64> {
        self.tlb.read_raw(index)
    }

    /// TLBP, using the thread's current ASID.
    pub fn tlb_probe(&self, tid: usize, vaddr: u32) -> Option<usize> {
        let asid = self.threads[tid].regs.get(ssr::ASID) as u8;
        self.tlb.probe(asid, vaddr)
    }

    pub fn tlb_check_overlap(&self, candidate: &TlbEntry, exclude: Option<usize>) -> Overlap {
        self.tlb.check_overlap(candidate, exclude)
    }

    pub fn tlb_find_match(&self, asid: u8, vaddr: u32, access: Access) -> Option<TlbMatch> {
        self.tlb.find_match(asid, vaddr, access)
    }

    /// TLBINVASID. Returns the number of entries cleared.
    pub fn tlb_invalidate_asid(&mut self, asid: u8) -> usize {
        let cleared = self.tlb.invalidate_asid(asid);
        if cleared != 0 {
            for thread in &mut self.threads {
                thread.cache.flush_all();
            }
        }
        cleared
    }

    /// Translates `vaddr` for `tid` using its SSR.ASID and SSR.UM.
    pub fn translate(&mut self, tid: usize, vaddr: u32, access: Access) -> Result<u64, TranslateFault> {
        if !self.globals.flag(syscfg::MMUEN) {
            return Ok(vaddr as u64);
        }
        let regs = &self.threads[tid].regs;
        let asid = regs.get(ssr::ASID) as u8;
        let access = Access {
            user: regs.flag(ssr::UM),
            ..access
        };

        if let Some(page) = self.threads[tid].cache.lookup(asid, vaddr) {
            return match page.perms.check(access) {
                Some(cause) => Err(TranslateFault { cause, vaddr }),
                None => Ok(page.translate(vaddr)),
            };
        }

        let Some(hit) = self.tlb.find_match(asid, vaddr, access) else {
            return Err(TranslateFault {
                cause: access.miss_cause(),
                vaddr,
            });
        };
        self.threads[tid].cache.insert(asid, vaddr, &hit);
        match hit.fault {
            Some(cause) => Err(TranslateFault { cause, vaddr }),
            None => Ok(hit.paddr),
        }
    }

    /// SYSCFG write. TL/KL reflect lock state and are not guest-writable.
    pub(crate) fn write_syscfg(&mut self, value: u32) {
        let old = self.globals.sreg(GlobalSreg::Syscfg);
        let lock_bits = LockKind::ALL
            .iter()
            .fold(0, |mask, kind| mask | kind.syscfg_field().mask());
        let value = (value & !lock_bits) | (old & lock_bits);
        self.globals.set_sreg(GlobalSreg::Syscfg, value);

        if syscfg::MMUEN.extract(old) != syscfg::MMUEN.extract(value) {
            for thread in &mut self.threads {
                thread.cache.flush_all();
            }
        }
        self.refresh_interrupts();
    }

    /// Records a faulting address in BADVA the way the exception path expects.
    pub fn record_fault(&mut self, tid: usize, fault: TranslateFault) {
        let regs = &mut self.threads[tid].regs;
        regs.set(ssr::CAUSE, fault.cause as u32);
        regs.set_sreg(ThreadSreg::Badva, fault.vaddr);
    }
}
