//! Concrete module kinds of the Red Pitaya gateware

pub mod fads;
pub mod iq;

use crate::{
    module::{
        Module,
        Schema,
    },
    register::{
        self,
        RegisterSpec,
    },
};

/// A kind of hardware module: its register map, its saved configuration and how to wrap a
/// [`Module`] placed at some base address
pub trait Block<T>: Sized {
    /// The module kind, as shown to clients
    const KIND: &'static str;

    const REGISTERS: &'static [RegisterSpec];

    /// Parameters making up a saved configuration, in application order
    const SETUP: &'static [&'static str];

    /// Validate this kind's register map
    /// # Errors
    /// Returns the first invalid declaration in the map
    fn schema() -> Result<Schema, register::Error> {
        Schema::new(Self::KIND, Self::REGISTERS, Self::SETUP)
    }

    fn from_module(module: Module<T>) -> Self;

    fn module(&self) -> &Module<T>;
}
