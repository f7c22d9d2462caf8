//! Mock transport used in testing the interface

use super::{
    Transport,
    TransportResult,
};
use std::collections::{
    HashMap,
    HashSet,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Address {0:#010x} is outside every mapped region")]
    Unmapped(u32),
    #[error("Address {0:#010x} is not word aligned")]
    Misaligned(u32),
    #[error("Injected bus fault at {0:#010x}")]
    Fault(u32),
}

/// A platform that mocks word reads and writes, useful for testing.
///
/// Memory is sparse and reads of never-written words return zero. With no regions every aligned
/// address is mapped. Every access through [`Transport`] is counted, while [`Mock::peek`] and
/// [`Mock::poke`] go around the counters to stage and inspect device state.
#[derive(Debug, Default)]
pub struct Mock {
    memory: HashMap<u32, u32>,
    /// Mapped `(base, length in bytes)` ranges
    regions: Vec<(u32, u32)>,
    faults: HashSet<u32>,
    reads: usize,
    writes: usize,
}

impl Mock {
    /// Construct a new mock platform where only `regions` are mapped
    #[must_use]
    pub fn new(regions: &[(u32, u32)]) -> Self {
        Self {
            regions: regions.to_vec(),
            ..Default::default()
        }
    }

    /// Inspect a word without counting an access
    #[must_use]
    pub fn peek(&self, addr: u32) -> u32 {
        self.memory.get(&addr).copied().unwrap_or_default()
    }

    /// Stage a word without counting an access, as the gateware would
    pub fn poke(&mut self, addr: u32, word: u32) {
        self.memory.insert(addr, word);
    }

    /// Make every subsequent access to `addr` fail
    pub fn fail_at(&mut self, addr: u32) {
        self.faults.insert(addr);
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    /// Number of reads served so far
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Number of writes served so far
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes
    }

    fn check(&self, addr: u32) -> Result<(), Error> {
        if addr % 4 != 0 {
            return Err(Error::Misaligned(addr));
        }
        let mapped = self.regions.is_empty()
            || self
                .regions
                .iter()
                .any(|&(base, len)| addr >= base && u64::from(addr) < u64::from(base) + u64::from(len));
        if !mapped {
            return Err(Error::Unmapped(addr));
        }
        if self.faults.contains(&addr) {
            return Err(Error::Fault(addr));
        }
        Ok(())
    }
}

impl Transport for Mock {
    fn read_word(&mut self, addr: u32) -> TransportResult<u32> {
        self.check(addr)?;
        self.reads += 1;
        Ok(self.peek(addr))
    }

    fn write_word(&mut self, addr: u32, word: u32) -> TransportResult<()> {
        self.check(addr)?;
        self.writes += 1;
        self.memory.insert(addr, word);
        Ok(())
    }
}
