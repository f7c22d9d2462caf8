//! The core type of the crate. This owns the transport and leases out every pooled module.
use crate::{
    blocks::{
        fads::Fads,
        iq::Iq,
        Block,
    },
    config::{
        self,
        Layout,
        Placement,
    },
    module::Module,
    pool::Pool,
    register,
    transport::Transport,
};
use std::sync::{
    Arc,
    Mutex,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid register map for `{kind}`")]
    Schema {
        kind: &'static str,
        source: register::Error,
    },
    #[error(transparent)]
    Layout(#[from] config::Error),
}

/// A Red Pitaya running the FADS bitstream
#[derive(Debug)]
pub struct RedPitaya<T> {
    transport: Arc<Mutex<T>>,
    pub fads: Pool<Fads<T>>,
    pub iq: Pool<Iq<T>>,
}

/// Validate a kind's schema once and place one unit per placement, all sharing it
fn build_pool<T, B>(transport: &Arc<Mutex<T>>, placements: &[Placement]) -> Result<Pool<B>, Error>
where
    B: Block<T>,
{
    let schema = Arc::new(B::schema().map_err(|source| Error::Schema {
        kind: B::KIND,
        source,
    })?);
    let units = placements
        .iter()
        .map(|p| {
            B::from_module(Module::new(
                Arc::downgrade(transport),
                Arc::clone(&schema),
                &p.name,
                p.base,
            ))
        })
        .collect();
    debug!(kind = B::KIND, units = placements.len(), "pool built");
    Ok(Pool::new(B::KIND, units))
}

impl<T> RedPitaya<T>
where
    T: Transport,
{
    /// Build every module of `layout` on top of `transport`
    /// # Errors
    /// Returns an error if the layout or any register map is invalid
    pub fn new(transport: T, layout: &Layout) -> Result<Self, Error> {
        layout.validate()?;
        let transport = Arc::new(Mutex::new(transport));
        Ok(Self {
            fads: build_pool(&transport, &layout.fads)?,
            iq: build_pool(&transport, &layout.iq)?,
            transport,
        })
    }

    /// The shared transport, for raw access around the modules
    #[must_use]
    pub fn transport(&self) -> &Arc<Mutex<T>> {
        &self.transport
    }
}
