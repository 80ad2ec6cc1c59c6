use crate::tlb::{TlbMatch, TlbPerms};

const WAYS: usize = 4;
const SETS: usize = 64; // 256 cached 4 KiB pages per thread.

/// A 4 KiB page translation derived from a shared TLB entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedPage {
    /// Physical page number (4 KiB units).
    pub ppage: u64,
    pub perms: TlbPerms,
    /// TLB slot the translation came from.
    pub tlb_index: usize,
}

impl CachedPage {
    #[inline]
    pub fn translate(&self, vaddr: u32) -> u64 {
        (self.ppage << 12) | (vaddr as u64 & 0xfff)
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    valid: bool,
    asid: u8,
    vpage: u32,
    page: CachedPage,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            valid: false,
            asid: 0,
            vpage: 0,
            page: CachedPage {
                ppage: 0,
                perms: TlbPerms::empty(),
                tlb_index: 0,
            },
        }
    }
}

#[inline]
fn set_index(vpage: u32) -> usize {
    let x = vpage ^ (vpage >> 11);
    (x as usize) & (SETS - 1)
}

/// Per-thread, set-associative cache of translations at 4 KiB granularity.
///
/// Large TLB pages are cached one 4 KiB page at a time, so invalidating a large entry
/// means dropping every cached page that falls in its window.
#[derive(Debug, Clone)]
pub struct TranslationCache {
    sets: Vec<[Slot; WAYS]>,
    next_way: [u8; SETS],
    flushes: u64,
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationCache {
    pub fn new() -> Self {
        Self {
            sets: vec![[Slot::default(); WAYS]; SETS],
            next_way: [0; SETS],
            flushes: 0,
        }
    }

    #[inline]
    pub fn lookup(&self, asid: u8, vaddr: u32) -> Option<CachedPage> {
        let vpage = vaddr >> 12;
        self.sets[set_index(vpage)]
            .iter()
            .find(|slot| slot.valid && slot.vpage == vpage && slot.asid == asid)
            .map(|slot| slot.page)
    }

    pub fn insert(&mut self, asid: u8, vaddr: u32, hit: &TlbMatch) {
        let vpage = vaddr >> 12;
        let set = set_index(vpage);
        let page = CachedPage {
            ppage: hit.paddr >> 12,
            perms: hit.perms,
            tlb_index: hit.index,
        };

        // Replace existing entry if present.
        for slot in self.sets[set].iter_mut() {
            if slot.valid && slot.vpage == vpage && slot.asid == asid {
                slot.page = page;
                return;
            }
        }

        let way = self.next_way[set] as usize % WAYS;
        self.next_way[set] = self.next_way[set].wrapping_add(1);
        self.sets[set][way] = Slot {
            valid: true,
            asid,
            vpage,
            page,
        };
    }

    /// Drops every cached page that intersects `[vbase, vbase + len)`.
    pub fn flush_range(&mut self, vbase: u64, len: u64) {
        self.flushes += 1;
        let end = vbase.saturating_add(len);
        for slot in self.sets.iter_mut().flatten() {
            let page = (slot.vpage as u64) << 12;
            if slot.valid && page < end && page + 0x1000 > vbase {
                slot.valid = false;
            }
        }
    }

    pub fn flush_all(&mut self) {
        self.flushes += 1;
        for slot in self.sets.iter_mut().flatten() {
            slot.valid = false;
        }
    }

    /// Number of flushes performed so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    /// Number of valid cached pages.
    pub fn len(&self) -> usize {
        self.sets.iter().flatten().filter(|slot| slot.valid).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
