//! Shared TLB and per-thread host translation cache.
//!
//! [`TlbStore`] is the architectural, software-managed TLB: one table for the whole machine,
//! written by TLBW and searched on every translation. Entries are matched by ASID (or the
//! global bit) and by a page window whose size is `4 KiB * 4^code`, from 4 KiB to 1 GiB.
//!
//! [`TranslationCache`] is the host-side cache derived from it. Each hardware thread owns
//! one; it must be invalidated whenever a TLB entry it may have cached is overwritten.

mod cache;
mod tlb;

pub use cache::{CachedPage, TranslationCache};
pub use tlb::{Overlap, PageSize, TlbEntry, TlbMatch, TlbPerms, TlbStore};

use hexsim_types::cause;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Fetch,
    Read,
    Write,
}

/// A memory access to be checked against page permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Access {
    pub kind: AccessKind,
    /// Access made in user mode (SSR.UM).
    pub user: bool,
}

impl Access {
    pub const fn new(kind: AccessKind, user: bool) -> Self {
        Self { kind, user }
    }

    pub const fn fetch(user: bool) -> Self {
        Self::new(AccessKind::Fetch, user)
    }

    pub const fn read(user: bool) -> Self {
        Self::new(AccessKind::Read, user)
    }

    pub const fn write(user: bool) -> Self {
        Self::new(AccessKind::Write, user)
    }

    /// Cause code raised when no TLB entry matches.
    pub const fn miss_cause(self) -> u8 {
        match self.kind {
            AccessKind::Fetch => cause::TLB_MISS_X,
            AccessKind::Read => cause::TLB_MISS_R,
            AccessKind::Write => cause::TLB_MISS_W,
        }
    }
}
