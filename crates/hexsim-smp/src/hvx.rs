//! Extension context exchange.
//!
//! Each thread holds a live vector/predicate register file. SSR.XA selects which physical
//! context that file belongs to; changing XA saves the live file into the old context's
//! slot and loads the new one.

use hexsim_types::sysreg::{ssr, ThreadSreg};

use crate::machine::MachineState;

impl MachineState {
    /// Single entry point for guest SSR writes.
    pub fn write_ssr(&mut self, tid: usize, value: u32) {
        let old = self.threads[tid].regs.sreg(ThreadSreg::Ssr);
        self.threads[tid].regs.set_sreg(ThreadSreg::Ssr, value);

        let (old_xa, new_xa) = (ssr::XA.extract(old), ssr::XA.extract(value));
        if old_xa != new_xa {
            self.on_context_field_change(tid, old_xa as u8, new_xa as u8);
        }
        if ssr::ASID.extract(old) != ssr::ASID.extract(value) {
            self.threads[tid].cache.flush_all();
        }
        self.refresh_interrupts();
    }

    /// Physical context slot selected by `tid`'s current SSR.XA.
    pub fn context_slot(&self, tid: usize) -> usize {
        let xa = self.threads[tid].regs.get(ssr::XA) as u8;
        self.config.hvx.slot(xa)
    }

    /// Moves `tid`'s live register file from the context selected by `old_xa` to the one
    /// selected by `new_xa`.
    pub fn on_context_field_change(&mut self, tid: usize, old_xa: u8, new_xa: u8) {
        let old_slot = self.config.hvx.slot(old_xa);
        let new_slot = self.config.hvx.slot(new_xa);
        if old_slot != new_slot {
            let Self { threads, contexts, .. } = self;
            let live = &mut threads[tid].vector;
            contexts[old_slot].clone_from(live);
            live.clone_from(&contexts[new_slot]);
            tracing::trace!(tid, old_slot, new_slot, "extension context exchanged");
        }

        let alias = self.threads.iter().find(|t| {
            t.id() != tid
                && t.is_enabled()
                && self.config.hvx.slot(t.regs.get(ssr::XA) as u8) == new_slot
        });
        if let Some(other) = alias {
            tracing::warn!(
                target: "guest_error",
                tid,
                other = other.id(),
                slot = new_slot,
                "extension context already bound by another thread"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use hexsim_types::sysreg::{ssr, ThreadSreg};

    use crate::config::{HvxConfig, MachineConfig, SelectorMap};
    use crate::machine::Machine;

    fn xa(value: u32) -> u32 {
        ssr::XA.insert(0, value)
    }

    #[test]
    fn xa_change_saves_and_loads() {
        let m = Machine::new(MachineConfig::with_threads(1)).unwrap();
        let mut s = m.state();
        s.thread_mut(0).vector.vreg_mut(3)[0] = 0xaa;

        s.write_sreg(0, ThreadSreg::Ssr, xa(1));
        assert_eq!(s.thread(0).vector.vreg(3)[0], 0);
        assert_eq!(s.contexts()[0].vreg(3)[0], 0xaa);
        assert_eq!(s.context_slot(0), 1);

        s.thread_mut(0).vector.qreg_mut(1)[0] = 0x55;
        s.write_sreg(0, ThreadSreg::Ssr, xa(0));
        assert_eq!(s.thread(0).vector.vreg(3)[0], 0xaa);
        assert_eq!(s.contexts()[1].qreg(1)[0], 0x55);
    }

    #[test]
    fn selectors_sharing_a_slot_do_not_exchange() {
        let m = Machine::new(MachineConfig {
            hvx: HvxConfig {
                contexts: 2,
                selector_map: SelectorMap::Modulo,
            },
            ..MachineConfig::with_threads(1)
        })
        .unwrap();
        let mut s = m.state();
        s.thread_mut(0).vector.vreg_mut(0)[0] = 1;
        s.write_sreg(0, ThreadSreg::Ssr, xa(2));
        assert_eq!(s.context_slot(0), 0);
        assert_eq!(s.thread(0).vector.vreg(0)[0], 1);
    }

    #[test]
    fn table_map_is_honoured() {
        let m = Machine::new(MachineConfig {
            hvx: HvxConfig {
                contexts: 2,
                selector_map: SelectorMap::Table(vec![1, 0, 0, 0, 0, 0, 0, 1]),
            },
            ..MachineConfig::with_threads(1)
        })
        .unwrap();
        let mut s = m.state();
        s.thread_mut(0).vector.vreg_mut(0)[0] = 9;
        s.write_sreg(0, ThreadSreg::Ssr, xa(7));
        assert_eq!(s.thread(0).vector.vreg(0)[0], 9, "selectors 0 and 7 share slot 1");
        s.write_sreg(0, ThreadSreg::Ssr, xa(1));
        assert_eq!(s.thread(0).vector.vreg(0)[0], 0);
        assert_eq!(s.contexts()[1].vreg(0)[0], 9);
    }
}
