use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use hexsim_types::MAX_THREADS;

/// Number of SSR.XA encodings.
pub const XA_SELECTORS: usize = 8;

/// Static description of the simulated machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MachineConfig {
    /// Hardware threads.
    pub threads: usize,
    /// Capacity of the shared TLB.
    pub tlb_entries: usize,
    /// Initial exception vector base; also the reset PC.
    pub evb: u32,
    pub hvx: HvxConfig,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            tlb_entries: 128,
            evb: 0,
            hvx: HvxConfig::default(),
        }
    }
}

impl MachineConfig {
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 || self.threads > MAX_THREADS {
            return Err(ConfigError::ThreadCount(self.threads));
        }
        if self.tlb_entries == 0 || self.tlb_entries > 1024 {
            return Err(ConfigError::TlbEntries(self.tlb_entries));
        }
        if self.evb & 0xff != 0 {
            return Err(ConfigError::EvbAlignment(self.evb));
        }
        self.hvx.validate()
    }
}

/// Extension (vector) context configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HvxConfig {
    /// Physical vector register files.
    pub contexts: usize,
    pub selector_map: SelectorMap,
}

impl Default for HvxConfig {
    fn default() -> Self {
        Self {
            contexts: 4,
            selector_map: SelectorMap::Modulo,
        }
    }
}

/// How SSR.XA selectors map onto physical context slots.
///
/// With fewer physical contexts than selectors the mapping is not injective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorMap {
    /// `slot = xa % contexts`.
    Modulo,
    /// Explicit slot for each of the 8 selectors.
    Table(Vec<u8>),
}

impl HvxConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.contexts == 0 || self.contexts > XA_SELECTORS {
            return Err(ConfigError::ContextCount(self.contexts));
        }
        if let SelectorMap::Table(table) = &self.selector_map {
            if table.len() != XA_SELECTORS {
                return Err(ConfigError::SelectorTableLen(table.len()));
            }
            if let Some((selector, &slot)) = table
                .iter()
                .enumerate()
                .find(|(_, &slot)| slot as usize >= self.contexts)
            {
                return Err(ConfigError::SelectorOutOfRange {
                    selector,
                    slot,
                    contexts: self.contexts,
                });
            }
        }
        Ok(())
    }

    /// Physical slot bound to selector `xa`.
    pub fn slot(&self, xa: u8) -> usize {
        let xa = xa as usize % XA_SELECTORS;
        match &self.selector_map {
            SelectorMap::Modulo => xa % self.contexts,
            SelectorMap::Table(table) => table[xa] as usize,
        }
    }
}
