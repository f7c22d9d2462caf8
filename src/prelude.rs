//! Prelude (helpful reexports) for this package

pub use crate::{
    blocks::{
        fads::{
            Droplet,
            Fads,
        },
        iq::Iq,
        Block,
    },
    config::Layout,
    core::RedPitaya,
    module::{
        Setup,
        Value,
    },
    pool::{
        Lease,
        Pool,
        Reset,
    },
    transport::{
        mock::Mock,
        Transport,
    },
};
