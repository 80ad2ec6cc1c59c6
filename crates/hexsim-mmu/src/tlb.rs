use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{Access, AccessKind};
use hexsim_types::cause;

bitflags! {
    /// Page permission bits of a TLB entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TlbPerms: u8 {
        const U = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
    }
}

impl TlbPerms {
    /// Returns the exception cause for `access`, or `None` if it is permitted.
    pub fn check(self, access: Access) -> Option<u8> {
        let user_denied = access.user && !self.contains(TlbPerms::U);
        match access.kind {
            AccessKind::Fetch if !self.contains(TlbPerms::X) => Some(cause::FETCH_NO_XPAGE),
            AccessKind::Fetch if user_denied => Some(cause::FETCH_NO_UPAGE),
            AccessKind::Read if !self.contains(TlbPerms::R) => Some(cause::PRIV_NO_READ),
            AccessKind::Read if user_denied => Some(cause::PRIV_NO_UREAD),
            AccessKind::Write if !self.contains(TlbPerms::W) => Some(cause::PRIV_NO_WRITE),
            AccessKind::Write if user_denied => Some(cause::PRIV_NO_UWRITE),
            _ => None,
        }
    }
}

/// Page size encoded as `4 KiB * 4^code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageSize(u8);

impl PageSize {
    pub const MAX_CODE: u8 = 9;
    pub const SIZE_4K: PageSize = PageSize(0);
    pub const SIZE_1G: PageSize = PageSize(Self::MAX_CODE);

    /// Returns `None` for codes above 1 GiB.
    pub const fn from_code(code: u8) -> Option<Self> {
        if code <= Self::MAX_CODE {
            Some(Self(code))
        } else {
            None
        }
    }

    #[inline]
    pub const fn code(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn bytes(self) -> u64 {
        4096 << (2 * self.0 as u32)
    }

    /// Size in 4 KiB pages.
    #[inline]
    pub const fn pages(self) -> u32 {
        1 << (2 * self.0 as u32)
    }
}

const PTE_PPD_MASK: u64 = 0x00ff_ffff;
const PTE_C_SHIFT: u32 = 24;
const PTE_U: u64 = 1 << 28;
const PTE_R: u64 = 1 << 29;
const PTE_W: u64 = 1 << 30;
const PTE_X: u64 = 1 << 31;
const PTE_VPN_SHIFT: u32 = 32;
const PTE_VPN_MASK: u64 = 0xf_ffff;
const PTE_ASID_SHIFT: u32 = 52;
const PTE_ASID_MASK: u64 = 0x7f;
const PTE_ATR_SHIFT: u32 = 59;
const PTE_PA35: u64 = 1 << 61;
const PTE_G: u64 = 1 << 62;
const PTE_V: u64 = 1 << 63;

/// Physical page numbers are 24 bits of 4 KiB pages (36-bit physical space).
const PPN_BITS: u32 = 24;

/// One translation entry of the shared TLB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlbEntry {
    pub valid: bool,
    pub global: bool,
    pub asid: u8,
    /// Virtual page number in 4 KiB units.
    pub vpn: u32,
    /// Physical page number in 4 KiB units.
    pub ppn: u32,
    pub perms: TlbPerms,
    /// Cacheability attribute, carried but not interpreted.
    pub cacheability: u8,
    /// ATR0/ATR1 attribute bits, carried but not interpreted.
    pub attr: u8,
    pub size: PageSize,
}

impl Default for TlbEntry {
    fn default() -> Self {
        Self {
            valid: false,
            global: false,
            asid: 0,
            vpn: 0,
            ppn: 0,
            perms: TlbPerms::empty(),
            cacheability: 0,
            attr: 0,
            size: PageSize::SIZE_4K,
        }
    }
}

impl TlbEntry {
    /// Decodes the architectural 64-bit entry format used by TLBW/TLBR.
    pub fn from_raw(raw: u64) -> Self {
        let ppd = raw & PTE_PPD_MASK;
        // The lowest set bit of PPD encodes the page size; an all-zero PPD decodes as the
        // largest size. PPD[23:1] holds the physical page number, with the bits below the
        // page size ignored.
        let size = PageSize((ppd.trailing_zeros() as u8).min(PageSize::MAX_CODE));
        let mut ppn = ((ppd >> 1) as u32) & !(size.pages() - 1);
        if raw & PTE_PA35 != 0 {
            ppn |= 1 << (PPN_BITS - 1);
        }
        let mut perms = TlbPerms::empty();
        perms.set(TlbPerms::U, raw & PTE_U != 0);
        perms.set(TlbPerms::R, raw & PTE_R != 0);
        perms.set(TlbPerms::W, raw & PTE_W != 0);
        perms.set(TlbPerms::X, raw & PTE_X != 0);
        Self {
            valid: raw & PTE_V != 0,
            global: raw & PTE_G != 0,
            asid: ((raw >> PTE_ASID_SHIFT) & PTE_ASID_MASK) as u8,
            vpn: ((raw >> PTE_VPN_SHIFT) & PTE_VPN_MASK) as u32,
            ppn,
            perms,
            cacheability: ((raw >> PTE_C_SHIFT) & 0xf) as u8,
            attr: ((raw >> PTE_ATR_SHIFT) & 0x3) as u8,
            size,
        }
    }

    pub fn to_raw(&self) -> u64 {
        let low_ppn = self.ppn & ((1 << (PPN_BITS - 1)) - 1) & !(self.size.pages() - 1);
        let ppd = (((low_ppn as u64) << 1) | (1 << self.size.code())) & PTE_PPD_MASK;
        let mut raw = ppd;
        raw |= ((self.cacheability as u64) & 0xf) << PTE_C_SHIFT;
        if self.perms.contains(TlbPerms::U) {
            raw |= PTE_U;
        }
        if self.perms.contains(TlbPerms::R) {
            raw |= PTE_R;
        }
        if self.perms.contains(TlbPerms::W) {
            raw |= PTE_W;
        }
        if self.perms.contains(TlbPerms::X) {
            raw |= PTE_X;
        }
        raw |= ((self.vpn as u64) & PTE_VPN_MASK) << PTE_VPN_SHIFT;
        raw |= ((self.asid as u64) & PTE_ASID_MASK) << PTE_ASID_SHIFT;
        raw |= ((self.attr as u64) & 0x3) << PTE_ATR_SHIFT;
        if self.ppn & (1 << (PPN_BITS - 1)) != 0 {
            raw |= PTE_PA35;
        }
        if self.global {
            raw |= PTE_G;
        }
        if self.valid {
            raw |= PTE_V;
        }
        raw
    }

    /// First virtual address covered by this entry (VPN aligned down to the page size).
    #[inline]
    pub fn vbase(&self) -> u64 {
        ((self.vpn as u64) << 12) & !(self.size.bytes() - 1)
    }

    /// First physical address covered by this entry.
    #[inline]
    pub fn pbase(&self) -> u64 {
        ((self.ppn as u64) << 12) & !(self.size.bytes() - 1)
    }

    #[inline]
    pub fn covers(&self, vaddr: u32) -> bool {
        let vaddr = vaddr as u64;
        let vbase = self.vbase();
        vaddr >= vbase && vaddr < vbase + self.size.bytes()
    }

    #[inline]
    pub fn matches_asid(&self, asid: u8) -> bool {
        self.global || self.asid == asid
    }

    #[inline]
    pub fn translate(&self, vaddr: u32) -> u64 {
        debug_assert!(self.covers(vaddr));
        self.pbase() | (vaddr as u64 & (self.size.bytes() - 1))
    }

    /// Two entries overlap when their page windows intersect and they can be live in the
    /// same address space.
    pub fn overlaps(&self, other: &TlbEntry) -> bool {
        let (a0, b0) = (self.vbase(), other.vbase());
        let (a1, b1) = (a0 + self.size.bytes(), b0 + other.size.bytes());
        let intersect = a0 < b1 && b0 < a1;
        intersect && (self.asid == other.asid || self.global || other.global)
    }
}

/// Result of a successful [`TlbStore::find_match`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbMatch {
    pub index: usize,
    pub paddr: u64,
    pub perms: TlbPerms,
    pub size: PageSize,
    /// Permission fault cause for the requested access, if any.
    pub fault: Option<u8>,
}

/// Result of [`TlbStore::check_overlap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    None,
    Unique(usize),
    Ambiguous,
}

/// Shared, fixed-capacity translation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlbStore {
    entries: Vec<TlbEntry>,
}

impl TlbStore {
    pub fn new(len: usize) -> Self {
        Self {
            entries: vec![TlbEntry::default(); len],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TlbEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[TlbEntry] {
        &self.entries
    }

    /// Stores `entry` at `index` and returns the entry it replaced.
    ///
    /// Out-of-range indices are a guest error: logged and ignored.
    pub fn write(&mut self, index: usize, entry: TlbEntry) -> Option<TlbEntry> {
        let Some(slot) = self.entries.get_mut(index) else {
            tracing::warn!(target: "guest_error", index, len = self.entries.len(), "TLB write index out of range");
            return None;
        };
        Some(core::mem::replace(slot, entry))
    }

    /// Raw TLBR value of `index`, or `None` when out of range.
    pub fn read_raw(&self, index: usize) -> Option<u64> {
        self.entries.get(index).map(TlbEntry::to_raw)
    }

    pub fn find_match(&self, asid: u8, vaddr: u32, access: Access) -> Option<TlbMatch> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.valid && e.matches_asid(asid) && e.covers(vaddr))
            .map(|(index, e)| TlbMatch {
                index,
                paddr: e.translate(vaddr),
                perms: e.perms,
                size: e.size,
                fault: e.perms.check(access),
            })
    }

    /// TLBP: index of the entry translating `vaddr` in `asid`.
    pub fn probe(&self, asid: u8, vaddr: u32) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.valid && e.matches_asid(asid) && e.covers(vaddr))
    }

    /// Looks for valid entries other than `exclude` that would alias `candidate`.
    pub fn check_overlap(&self, candidate: &TlbEntry, exclude: Option<usize>) -> Overlap {
        let mut found = Overlap::None;
        for (index, entry) in self.entries.iter().enumerate() {
            if Some(index) == exclude || !entry.valid || !entry.overlaps(candidate) {
                continue;
            }
            match found {
                Overlap::None => found = Overlap::Unique(index),
                _ => {
                    tracing::warn!(
                        target: "guest_error",
                        vpn = candidate.vpn,
                        asid = candidate.asid,
                        "TLB entry overlaps more than one existing entry"
                    );
                    return Overlap::Ambiguous;
                }
            }
        }
        found
    }

    /// TLBINVASID: clears every non-global entry tagged with `asid`.
    ///
    /// Returns the number of entries invalidated.
    pub fn invalidate_asid(&mut self, asid: u8) -> usize {
        let mut count = 0;
        for entry in self.entries.iter_mut() {
            if entry.valid && !entry.global && entry.asid == asid {
                entry.valid = false;
                count += 1;
            }
        }
        count
    }
}
