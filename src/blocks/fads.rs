//! The fluorescence-activated droplet sorter.
//!
//! The gateware compares each droplet's fluorescence peak against an intensity window and its
//! duration against a width window, then fires the sorting electrode after `sort_delay` ticks for
//! `sort_duration` ticks. The most recent droplet is published as a five-word status record.

use super::Block;
use crate::{
    module::{
        self,
        Module,
    },
    pool::Reset,
    register::RegisterSpec,
    register_map,
    transport::{
        Deserialize,
        Transport,
        TransportResult,
    },
};
use packed_struct::prelude::*;
use serde::Serialize;
use std::ops::Deref;
use tracing::debug;

/// Base address of the sorter in the stock layout
pub const BASE: u32 = 0x4060_0000;

/// Volts per count of the reported droplet intensity
pub const INTENSITY_LSB: f64 = 0.002_441_406;

/// Clock ticks per millisecond of the reported droplet width
pub const TICKS_PER_MS: f64 = 125_000.0;

const RECORD_OFFSET: u32 = 0x200;

register_map! {
    REGISTERS {
        low_intensity => RegisterSpec::float(0x000, 14, true, 8192.0, "Lower intensity threshold (V)"),
        high_intensity => RegisterSpec::float(0x004, 14, true, 8192.0, "Upper intensity threshold (V)"),
        min_width => RegisterSpec::integer(0x010, 32, false, "Minimum droplet width (ticks)"),
        max_width => RegisterSpec::integer(0x014, 32, false, "Maximum droplet width (ticks)"),
        min_peaks => RegisterSpec::integer(0x018, 32, false, "Minimum number of fluorescence peaks"),
        running => RegisterSpec::boolean(0x020, 0, "Sorting enabled"),
        sort_delay => RegisterSpec::integer(0x024, 32, false, "Delay before sorting (ticks)"),
        sort_duration => RegisterSpec::integer(0x028, 32, false, "Sorting pulse length (ticks)"),
        droplet_id => RegisterSpec::integer(0x200, 32, false, "Id of the last droplet").read_only(),
        droplet_intensity => RegisterSpec::float(0x204, 32, true, 1.0 / INTENSITY_LSB, "Peak intensity of the last droplet (V)").read_only(),
        droplet_width => RegisterSpec::integer(0x208, 32, false, "Width of the last droplet (ticks)").read_only(),
        droplet_class => RegisterSpec::integer(0x20C, 32, false, "Classification of the last droplet").read_only(),
        droplet_time => RegisterSpec::integer(0x210, 32, false, "Timestamp of the last droplet (ticks)").read_only(),
    }
}

/// The raw last-droplet status record, as laid out in gateware
#[derive(PackedStruct, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(endian = "msb")]
pub struct DropletRecord {
    pub id: u32,
    pub intensity: i32,
    pub width: u32,
    pub classification: u32,
    pub time: u32,
}

impl Deserialize for DropletRecord {
    type Chunk = <Self as PackedStruct>::ByteArray;

    fn deserialize(chunk: Self::Chunk) -> TransportResult<Self> {
        Ok(Self::unpack(&chunk)?)
    }
}

/// One sorted droplet in engineering units
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct Droplet {
    pub id: u32,
    /// Peak intensity (V)
    pub intensity: f64,
    /// Width (ms)
    pub width_ms: f64,
    pub classification: u32,
    /// Timestamp (ticks)
    pub time: u32,
}

impl From<DropletRecord> for Droplet {
    fn from(record: DropletRecord) -> Self {
        Self {
            id: record.id,
            intensity: f64::from(record.intensity) * INTENSITY_LSB,
            width_ms: f64::from(record.width) / TICKS_PER_MS,
            classification: record.classification,
            time: record.time,
        }
    }
}

/// The droplet sorter module
#[derive(Debug)]
pub struct Fads<T> {
    module: Module<T>,
}

impl<T> Block<T> for Fads<T> {
    const KIND: &'static str = "fads";
    const REGISTERS: &'static [RegisterSpec] = REGISTERS;
    const SETUP: &'static [&'static str] = &[
        "low_intensity",
        "high_intensity",
        "min_width",
        "max_width",
        "min_peaks",
        "sort_delay",
        "sort_duration",
    ];

    fn from_module(module: Module<T>) -> Self {
        Self { module }
    }

    fn module(&self) -> &Module<T> {
        &self.module
    }
}

impl<T> Deref for Fads<T> {
    type Target = Module<T>;

    fn deref(&self) -> &Module<T> {
        &self.module
    }
}

impl<T> Fads<T>
where
    T: Transport,
{
    /// Set the intensity window in volts
    /// # Errors
    /// Returns an error on bad transport
    pub fn set_intensity_window(&self, low: f64, high: f64) -> Result<(), module::Error> {
        self.set_float("low_intensity", low)?;
        self.set_float("high_intensity", high)
    }

    /// Set the width window in clock ticks
    /// # Errors
    /// Returns an error on bad transport
    pub fn set_width_window(&self, min: u32, max: u32) -> Result<(), module::Error> {
        self.set_int("min_width", min.into())?;
        self.set_int("max_width", max.into())
    }

    /// # Errors
    /// Returns an error on bad transport
    pub fn start(&self) -> Result<(), module::Error> {
        debug!(module = self.name(), "sorting started");
        self.set_bool("running", true)
    }

    /// # Errors
    /// Returns an error on bad transport
    pub fn stop(&self) -> Result<(), module::Error> {
        debug!(module = self.name(), "sorting stopped");
        self.set_bool("running", false)
    }

    /// # Errors
    /// Returns an error on bad transport
    pub fn is_running(&self) -> Result<bool, module::Error> {
        self.get_bool("running")
    }

    /// Read the whole last-droplet record in one critical section, so its fields agree
    /// # Errors
    /// Returns an error on bad transport
    pub fn last_droplet(&self) -> Result<Droplet, module::Error> {
        Ok(self
            .module
            .read_record::<DropletRecord, 20>(RECORD_OFFSET)?
            .into())
    }

    /// Start watching for new droplets
    #[must_use]
    pub fn monitor(&self) -> DropletMonitor<'_, T> {
        DropletMonitor {
            fads: self,
            last_id: 0,
        }
    }
}

impl<T> Reset for Fads<T>
where
    T: Transport,
{
    fn reset(&self) -> Result<(), module::Error> {
        self.stop()
    }
}

/// Polls the sorter and reports each droplet once
#[derive(Debug)]
pub struct DropletMonitor<'a, T> {
    fads: &'a Fads<T>,
    last_id: u32,
}

impl<T> DropletMonitor<'_, T>
where
    T: Transport,
{
    /// The last droplet, if its id differs from the one seen by the previous poll.
    /// Id 0 means no droplet has been seen yet.
    /// # Errors
    /// Returns an error on bad transport
    pub fn poll(&mut self) -> Result<Option<Droplet>, module::Error> {
        let droplet = self.fads.last_droplet()?;
        if droplet.id == self.last_id {
            return Ok(None);
        }
        self.last_id = droplet.id;
        Ok(Some(droplet))
    }
}
