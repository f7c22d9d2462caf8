//! Typed access to the memory-mapped registers of a Red Pitaya running the FADS droplet sorter
//! bitstream, and ownership arbitration for its pooled modules.
//!
//! Registers are declared per module kind with [`register_map!`] and validated once into a
//! [`module::Schema`]. A [`module::Module`] binds a schema to a base address and reaches the
//! hardware through a shared [`transport::Transport`]. Pooled modules are leased to named owners
//! with [`pool::Pool::acquire`] and reset to a safe state when the lease goes away.
//!
//! ```
//! use rpfpga::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let rp = RedPitaya::new(Mock::default(), &Layout::default())?;
//! let sorter = rp.fads.acquire("notebook")?;
//! sorter.set_intensity_window(0.1, 0.5)?;
//! sorter.start()?;
//! assert!(sorter.is_running()?);
//! drop(sorter);
//! assert!(!rp.fads.acquire("gui")?.is_running()?);
//! # Ok(())
//! # }
//! ```

pub mod blocks;
pub mod config;
pub mod core;
pub mod module;
pub mod pool;
pub mod prelude;
pub mod register;
pub mod transport;
