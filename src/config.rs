//! Where each module instance lives on the bus

use kstring::KString;
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Module name `{0}` is used twice")]
    Duplicate(KString),
    #[error("Module `{name}` has base address {base:#010x}, which is not word aligned")]
    Misaligned { name: KString, base: u32 },
}

/// One module instance: its name and base address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub name: KString,
    pub base: u32,
}

impl Placement {
    #[must_use]
    pub fn new(name: &'static str, base: u32) -> Self {
        Self {
            name: KString::from_static(name),
            base,
        }
    }
}

/// The module instances of an instrument, one list per pooled kind. Units are pooled in list
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub fads: Vec<Placement>,
    pub iq: Vec<Placement>,
}

impl Default for Layout {
    /// The stock Red Pitaya bitstream
    fn default() -> Self {
        Self {
            fads: vec![Placement::new("fads", 0x4060_0000)],
            iq: vec![
                Placement::new("iq0", 0x4050_0000),
                Placement::new("iq1", 0x4070_0000),
                Placement::new("iq2", 0x4080_0000),
            ],
        }
    }
}

impl Layout {
    fn placements(&self) -> impl Iterator<Item = &Placement> {
        self.fads.iter().chain(&self.iq)
    }

    /// Check that names are unique and bases word aligned
    /// # Errors
    /// Returns the first offending placement
    pub fn validate(&self) -> Result<(), Error> {
        let mut seen = HashSet::new();
        for placement in self.placements() {
            if placement.base % 4 != 0 {
                return Err(Error::Misaligned {
                    name: placement.name.clone(),
                    base: placement.base,
                });
            }
            if !seen.insert(placement.name.as_str()) {
                return Err(Error::Duplicate(placement.name.clone()));
            }
        }
        Ok(())
    }
}
