//! The IQ demodulator/modulator. Several identical units are instantiated in gateware and
//! leased out to clients through a pool.

use super::Block;
use crate::{
    module::{
        self,
        Module,
    },
    pool::Reset,
    register::RegisterSpec,
    register_map,
    transport::Transport,
};
use std::ops::Deref;

/// FPGA clock rate (Hz)
pub const CLOCK_HZ: f64 = 125e6;

const INPUTS: &[(&str, u32)] = &[("in1", 0), ("in2", 1), ("out1", 2), ("out2", 3)];
const OUTPUTS: &[(&str, u32)] = &[("off", 0), ("out1", 1), ("out2", 2), ("both", 3)];

register_map! {
    REGISTERS {
        on => RegisterSpec::boolean(0x100, 0, "Demodulator enabled"),
        input => RegisterSpec::select(0x104, 2, INPUTS, "Signal to demodulate"),
        output_direct => RegisterSpec::select(0x108, 2, OUTPUTS, "Analog output driven by the modulator"),
        frequency => RegisterSpec::float(0x200, 32, false, 4_294_967_296.0 / CLOCK_HZ, "Demodulation frequency (Hz)").bounded(0.0, CLOCK_HZ / 2.0),
        phase => RegisterSpec::float(0x204, 14, false, 16_384.0 / 360.0, "Demodulation phase (deg)").bounded(0.0, 360.0),
        amplitude => RegisterSpec::float(0x208, 14, false, 8192.0, "Modulation amplitude (V)"),
        gain => RegisterSpec::float(0x20C, 14, true, 8192.0, "Demodulated signal gain"),
        averages => RegisterSpec::integer(0x300, 32, false, "Number of cycles averaged"),
    }
}

/// One IQ unit
#[derive(Debug)]
pub struct Iq<T> {
    module: Module<T>,
}

impl<T> Block<T> for Iq<T> {
    const KIND: &'static str = "iq";
    const REGISTERS: &'static [RegisterSpec] = REGISTERS;
    const SETUP: &'static [&'static str] = &[
        "input",
        "frequency",
        "phase",
        "amplitude",
        "gain",
        "averages",
        "output_direct",
        "on",
    ];

    fn from_module(module: Module<T>) -> Self {
        Self { module }
    }

    fn module(&self) -> &Module<T> {
        &self.module
    }
}

impl<T> Deref for Iq<T> {
    type Target = Module<T>;

    fn deref(&self) -> &Module<T> {
        &self.module
    }
}

impl<T> Iq<T>
where
    T: Transport,
{
    /// Frequency resolution of the phase accumulator (Hz)
    #[must_use]
    pub fn frequency_step() -> f64 {
        CLOCK_HZ / 4_294_967_296.0
    }

    /// Configure the demodulation point
    /// # Errors
    /// Returns an error on bad transport or an unknown input
    pub fn demodulate(&self, input: &str, frequency: f64, phase: f64) -> Result<(), module::Error> {
        self.set_option("input", input)?;
        self.set_float("frequency", frequency)?;
        self.set_float("phase", phase)
    }
}

impl<T> Reset for Iq<T>
where
    T: Transport,
{
    fn reset(&self) -> Result<(), module::Error> {
        self.set_bool("on", false)?;
        self.set_option("output_direct", "off")?;
        self.set_float("amplitude", 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        module::Value,
        transport::mock::Mock,
    };
    use paste::paste;
    use std::sync::{
        Arc,
        Mutex,
    };

    const BASE: u32 = 0x4050_0000;

    fn iq() -> (Arc<Mutex<Mock>>, Iq<Mock>) {
        let transport = Arc::new(Mutex::new(Mock::default()));
        let schema = Arc::new(Iq::<Mock>::schema().unwrap());
        let module = Module::new(Arc::downgrade(&transport), schema, "iq0", BASE);
        (transport, Iq::from_module(module))
    }

    macro_rules! test_encoding {
        ($name:ident, $param:literal, $value:expr, $offset:literal, $word:literal) => {
            paste! {
                #[test]
                fn [<test_encodes_$name>]() {
                    let (transport, iq) = iq();
                    iq.set_float($param, $value).unwrap();
                    assert_eq!(transport.lock().unwrap().peek(BASE + $offset), $word);
                }
            }
        };
    }

    test_encoding!(frequency, "frequency", 1e6, 0x200, 34_359_738);
    test_encoding!(phase, "phase", 90.0, 0x204, 4096);
    test_encoding!(full_phase_saturates, "phase", 360.0, 0x204, 0x3FFF);
    test_encoding!(amplitude, "amplitude", 0.5, 0x208, 4096);
    test_encoding!(negative_gain, "gain", -1.0, 0x20C, 0x2000);
    test_encoding!(nyquist_bound, "frequency", 100e6, 0x200, 0x8000_0000);

    #[test]
    fn test_frequency_resolution() {
        let (_transport, iq) = iq();
        iq.set_float("frequency", 12_345.678).unwrap();
        let read = iq.get_float("frequency").unwrap();
        assert!((read - 12_345.678).abs() <= Iq::<Mock>::frequency_step() / 2.0);
    }

    #[test]
    fn test_demodulate() {
        let (transport, iq) = iq();
        iq.demodulate("out2", 1e3, 45.0).unwrap();
        assert_eq!(iq.get_option("input").unwrap().as_str(), "out2");
        assert_eq!(transport.lock().unwrap().peek(BASE + 0x104), 3);
        assert!(matches!(
            iq.demodulate("in3", 1e3, 0.0),
            Err(module::Error::UnknownOption { .. })
        ));
    }

    #[test]
    fn test_reset_silences_output() {
        let (transport, iq) = iq();
        iq.set_bool("on", true).unwrap();
        iq.set_option("output_direct", "both").unwrap();
        iq.set_float("amplitude", 0.8).unwrap();
        iq.set_float("frequency", 1e6).unwrap();
        iq.reset().unwrap();
        assert!(!iq.get_bool("on").unwrap());
        assert_eq!(iq.get_option("output_direct").unwrap().as_str(), "off");
        assert_eq!(iq.get_float("amplitude").unwrap(), 0.0);
        // Demodulation settings survive
        assert_eq!(transport.lock().unwrap().peek(BASE + 0x200), 34_359_738);
    }

    #[test]
    fn test_setup_round_trip() {
        let (_source_transport, source) = iq();
        source.demodulate("in2", 50e3, 30.0).unwrap();
        source.set_int("averages", 64).unwrap();
        let setup = source.setup().unwrap();
        assert_eq!(setup.len(), Iq::<Mock>::SETUP.len());
        assert_eq!(setup["input"], Value::from("in2"));
        assert_eq!(setup["averages"], Value::Int(64));

        let (_target_transport, target) = iq();
        target.apply_setup(&setup).unwrap();
        assert_eq!(target.setup().unwrap(), setup);
    }
}
