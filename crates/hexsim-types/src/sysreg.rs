//! System register indices and typed bit fields.

use core::fmt;
use core::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// Per-thread system registers, in architectural order (S0..S10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ThreadSreg {
    Sgp0 = 0,
    Sgp1 = 1,
    Stid = 2,
    Elr = 3,
    Badva0 = 4,
    Badva1 = 5,
    Ssr = 6,
    Ccr = 7,
    Htid = 8,
    Badva = 9,
    Imask = 10,
}

impl ThreadSreg {
    pub const COUNT: usize = 11;

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// System registers shared by every hardware thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum GlobalSreg {
    Evb = 0,
    Modectl = 1,
    Syscfg = 2,
    Ipend = 3,
    Iad = 4,
    Vid = 5,
}

impl GlobalSreg {
    pub const COUNT: usize = 6;

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Marker for a register that lives in the per-thread file.
pub trait ThreadRegister {
    const REG: ThreadSreg;
}

/// Marker for a register that lives in the global file.
pub trait GlobalRegister {
    const REG: GlobalSreg;
}

macro_rules! register_markers {
    ($trait:ident, $enum:ident: $($name:ident),+ $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $name;

            impl $trait for $name {
                const REG: $enum = $enum::$name;
            }
        )+
    };
}

register_markers!(ThreadRegister, ThreadSreg: Stid, Ssr, Imask);
register_markers!(GlobalRegister, GlobalSreg: Modectl, Syscfg);

/// A `width`-bit field at bit offset `shift` of register `R`.
pub struct Field<R> {
    shift: u8,
    width: u8,
    _reg: PhantomData<fn() -> R>,
}

impl<R> Clone for Field<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Field<R> {}

impl<R> fmt::Debug for Field<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field[{}:{}]", self.shift + self.width - 1, self.shift)
    }
}

impl<R> Field<R> {
    pub const fn new(shift: u8, width: u8) -> Self {
        assert!(width > 0 && shift as u32 + width as u32 <= 32);
        Self {
            shift,
            width,
            _reg: PhantomData,
        }
    }

    #[inline]
    pub const fn shift(self) -> u32 {
        self.shift as u32
    }

    /// Mask of the field's value bits, not shifted into place.
    #[inline]
    pub const fn value_mask(self) -> u32 {
        if self.width == 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        }
    }

    /// Mask of the field's bits within the register.
    #[inline]
    pub const fn mask(self) -> u32 {
        self.value_mask() << self.shift
    }

    #[inline]
    pub const fn extract(self, raw: u32) -> u32 {
        (raw >> self.shift) & self.value_mask()
    }

    /// Returns `raw` with the field replaced by `value` (truncated to the field width).
    #[inline]
    pub const fn insert(self, raw: u32, value: u32) -> u32 {
        (raw & !self.mask()) | ((value & self.value_mask()) << self.shift)
    }
}

pub mod ssr {
    use super::{Field, Ssr};

    pub const CAUSE: Field<Ssr> = Field::new(0, 8);
    pub const ASID: Field<Ssr> = Field::new(8, 7);
    /// User mode.
    pub const UM: Field<Ssr> = Field::new(16, 1);
    /// Exception active.
    pub const EX: Field<Ssr> = Field::new(17, 1);
    /// Per-thread interrupt enable.
    pub const IE: Field<Ssr> = Field::new(18, 1);
    /// Guest mode.
    pub const GM: Field<Ssr> = Field::new(19, 1);
    /// Extension context selector.
    pub const XA: Field<Ssr> = Field::new(27, 3);
}

pub mod stid {
    use super::{Field, Stid};

    pub const STDID: Field<Stid> = Field::new(0, 8);
    pub const PRIO: Field<Stid> = Field::new(16, 8);
}

pub mod imask {
    use super::{Field, Imask};

    pub const MASK: Field<Imask> = Field::new(0, 32);
}

pub mod modectl {
    use super::{Field, Modectl};

    /// One bit per enabled thread.
    pub const E: Field<Modectl> = Field::new(0, 16);
    /// One bit per thread parked in WAIT.
    pub const W: Field<Modectl> = Field::new(16, 16);
}

pub mod syscfg {
    use super::{Field, Syscfg};

    pub const MMUEN: Field<Syscfg> = Field::new(0, 1);
    /// Global interrupt enable.
    pub const GIE: Field<Syscfg> = Field::new(4, 1);
    /// TLB lock held.
    pub const TL: Field<Syscfg> = Field::new(11, 1);
    /// k0 lock held.
    pub const KL: Field<Syscfg> = Field::new(12, 1);
    /// Strict priority interrupt scheduling.
    pub const PRIO: Field<Syscfg> = Field::new(13, 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_insert_truncates_to_width() {
        let raw = ssr::XA.insert(0xffff_ffff, 0b1010);
        assert_eq!(ssr::XA.extract(raw), 0b010);
        assert_eq!(raw & !ssr::XA.mask(), 0xffff_ffff & !ssr::XA.mask());
    }

    #[test]
    fn full_width_field() {
        assert_eq!(imask::MASK.mask(), u32::MAX);
        assert_eq!(imask::MASK.insert(0, 0x8000_0001), 0x8000_0001);
    }

    #[test]
    fn modectl_halves_do_not_overlap() {
        assert_eq!(modectl::E.mask() & modectl::W.mask(), 0);
        assert_eq!(modectl::E.mask() | modectl::W.mask(), u32::MAX);
    }
}
