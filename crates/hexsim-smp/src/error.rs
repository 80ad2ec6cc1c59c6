use std::io;

use thiserror::Error;

use crate::LockKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid machine config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("thread count {0} out of range (1..={max})", max = hexsim_types::MAX_THREADS)]
    ThreadCount(usize),

    #[error("TLB size {0} out of range (1..=1024)")]
    TlbEntries(usize),

    #[error("extension context count {0} out of range (1..=8)")]
    ContextCount(usize),

    #[error("selector table has {0} entries, expected 8")]
    SelectorTableLen(usize),

    #[error("selector {selector} maps to slot {slot}, but only {contexts} contexts exist")]
    SelectorOutOfRange {
        selector: usize,
        slot: u8,
        contexts: usize,
    },

    #[error("exception vector base {0:#x} is not 256-byte aligned")]
    EvbAlignment(u32),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot has {found} threads, machine has {expected}")]
    ThreadCount { expected: usize, found: usize },

    #[error("snapshot has {found} TLB entries, machine has {expected}")]
    TlbEntries { expected: usize, found: usize },

    #[error("snapshot has {found} extension contexts, machine has {expected}")]
    ContextCount { expected: usize, found: usize },

    #[error("malformed vector register file in snapshot")]
    MalformedVector,

    #[error("snapshot has more than one holder of the {0:?} lock")]
    LockHolders(LockKind),

    #[error("snapshot thread {thread} is off but still has a claim on the {kind:?} lock")]
    StoppedThreadLock { thread: usize, kind: LockKind },
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid scenario json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid machine config: {0}")]
    Config(#[from] ConfigError),

    #[error("scenario lists {found} thread programs, machine has {expected} threads")]
    ProgramCount { expected: usize, found: usize },

    #[error("thread {thread} op {index}: register {register} out of range (0..{limit})")]
    RegisterIndex {
        thread: usize,
        index: usize,
        register: usize,
        limit: usize,
    },
}
