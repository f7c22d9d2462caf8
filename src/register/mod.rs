//! Register descriptors: named, typed views of a bit-field at a fixed offset within a module.
//!
//! Register maps are written as `const` tables of [`RegisterSpec`] with [`register_map!`](crate::register_map)
//! and validated into [`Register`]s once, when a [`Schema`](crate::module::Schema) is built.

pub mod field;

use self::field::Field;
use crate::{
    module::{
        self,
        Value,
    },
    transport::Transport,
};
use kstring::KString;
use serde::Serialize;
use thiserror::Error;
use tracing::trace;

/// Configuration errors in a register map. These are fatal and caught before any bus traffic.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("Register `{name}`: {source}")]
    Field {
        name: &'static str,
        source: field::Error,
    },
    #[error("Register `{name}` sits at offset {offset:#x}, which is not word aligned")]
    Misaligned { name: &'static str, offset: u32 },
    #[error("Register `{0}` is declared twice")]
    Duplicate(&'static str),
    #[error("Register `{0}` is not a scaled value but has a scale factor")]
    Scaled(&'static str),
    #[error("Boolean register `{0}` must be exactly one bit wide")]
    WideBool(&'static str),
    #[error("Select register `{0}` has no options")]
    NoOptions(&'static str),
    #[error("Option `{option}` of register `{name}` has code {code}, which doesn't fit the field")]
    OptionOverflow {
        name: &'static str,
        option: &'static str,
        code: u32,
    },
    #[error("Setup parameter `{0}` is not a register of this module")]
    UnknownSetup(&'static str),
    #[error("Setup parameter `{0}` is read-only")]
    ReadOnlySetup(&'static str),
}

/// The IO direction of a register
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Client applications can read and write registers of this kind
    ReadWrite,
    /// Written by the gateware only, such as status and capture registers
    ReadOnly,
}

/// The semantic type held by a register
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// A single bit, optionally active low
    Bool { invert: bool },
    /// An unscaled integer
    Int,
    /// A value in engineering units, `raw / norm`
    Float,
    /// One of a fixed set of named codes
    Select(&'static [(&'static str, u32)]),
}

impl Kind {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Kind::Bool { .. } => "boolean",
            Kind::Int => "integer",
            Kind::Float => "floating point",
            Kind::Select(_) => "option",
        }
    }
}

/// The unvalidated declaration of a register, as written in a module's register map
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RegisterSpec {
    pub name: &'static str,
    /// Byte offset from the module's base address
    pub offset: u32,
    pub width: u8,
    pub shift: u8,
    pub signed: bool,
    pub norm: f64,
    pub bounds: Option<(f64, f64)>,
    pub kind: Kind,
    pub access: Access,
    pub doc: &'static str,
}

impl RegisterSpec {
    const fn base(offset: u32, width: u8, signed: bool, norm: f64, kind: Kind, doc: &'static str) -> Self {
        Self {
            name: "",
            offset,
            width,
            shift: 0,
            signed,
            norm,
            bounds: None,
            kind,
            access: Access::ReadWrite,
            doc,
        }
    }

    /// A flag at `bit` of the word at `offset`
    #[must_use]
    pub const fn boolean(offset: u32, bit: u8, doc: &'static str) -> Self {
        Self::base(offset, 1, false, 1.0, Kind::Bool { invert: false }, doc).shift(bit)
    }

    /// An unscaled integer in the low `width` bits of the word at `offset`
    #[must_use]
    pub const fn integer(offset: u32, width: u8, signed: bool, doc: &'static str) -> Self {
        Self::base(offset, width, signed, 1.0, Kind::Int, doc)
    }

    /// A fixed-point value in the low `width` bits of the word at `offset`, read as `raw / norm`
    #[must_use]
    pub const fn float(offset: u32, width: u8, signed: bool, norm: f64, doc: &'static str) -> Self {
        Self::base(offset, width, signed, norm, Kind::Float, doc)
    }

    /// A choice between named codes in the low `width` bits of the word at `offset`
    #[must_use]
    pub const fn select(
        offset: u32,
        width: u8,
        options: &'static [(&'static str, u32)],
        doc: &'static str,
    ) -> Self {
        Self::base(offset, width, false, 1.0, Kind::Select(options), doc)
    }

    #[must_use]
    pub const fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Move the field up to start at bit `shift`
    #[must_use]
    pub const fn shift(mut self, shift: u8) -> Self {
        self.shift = shift;
        self
    }

    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.access = Access::ReadOnly;
        self
    }

    /// Make a boolean register active low
    #[must_use]
    pub const fn inverted(mut self) -> Self {
        self.kind = Kind::Bool { invert: true };
        self
    }

    /// Clamp the semantic value to `[min, max]` before encoding
    #[must_use]
    pub const fn bounded(mut self, min: f64, max: f64) -> Self {
        self.bounds = Some((min, max));
        self
    }
}

/// Declares a register map as a `const` table of [`RegisterSpec`]s, naming each register after
/// its identifier.
/// # Example
/// ```
/// use rpfpga::{register::RegisterSpec, register_map};
///
/// register_map! {
///     /// A toy map
///     pub REGISTERS {
///         running => RegisterSpec::boolean(0x00, 0, "Acquisition running"),
///         gain => RegisterSpec::float(0x04, 14, true, 8192.0, "Loop gain"),
///     }
/// }
///
/// assert_eq!(REGISTERS[1].name, "gain");
/// ```
#[macro_export]
macro_rules! register_map {
    ($(#[$meta:meta])* $vis:vis $table:ident { $($name:ident => $spec:expr),* $(,)? }) => {
        $(#[$meta])*
        $vis const $table: &[$crate::register::RegisterSpec] = &[
            $($spec.named(stringify!($name))),*
        ];
    };
}

/// A validated register: a semantic parameter bound to a bit-field of one word in a module
#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    name: &'static str,
    offset: u32,
    field: Field,
    kind: Kind,
    access: Access,
    doc: &'static str,
}

impl Register {
    /// Validate a declaration
    /// # Errors
    /// Returns an error if the field overruns its word, the offset is misaligned or the kind and
    /// field geometry disagree
    pub fn from_spec(spec: &RegisterSpec) -> Result<Self, Error> {
        let name = spec.name;
        if spec.offset % 4 != 0 {
            return Err(Error::Misaligned {
                name,
                offset: spec.offset,
            });
        }
        let wrap = |source| Error::Field { name, source };
        let mut field = Field::new(spec.width, spec.shift, spec.signed, spec.norm).map_err(wrap)?;
        if let Some((min, max)) = spec.bounds {
            field = field.with_bounds(min, max).map_err(wrap)?;
        }
        match spec.kind {
            Kind::Float => {}
            _ if spec.norm != 1.0 => return Err(Error::Scaled(name)),
            Kind::Bool { .. } if spec.width != 1 => return Err(Error::WideBool(name)),
            Kind::Select(&[]) => return Err(Error::NoOptions(name)),
            Kind::Select(options) => {
                if let Some(&(option, code)) = options
                    .iter()
                    .find(|&&(_, code)| i64::from(code) > field.max_raw())
                {
                    return Err(Error::OptionOverflow { name, option, code });
                }
            }
            _ => {}
        }
        Ok(Self {
            name,
            offset: spec.offset,
            field,
            kind: spec.kind,
            access: spec.access,
            doc: spec.doc,
        })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    #[must_use]
    pub fn field(&self) -> &Field {
        &self.field
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn access(&self) -> Access {
        self.access
    }

    #[must_use]
    pub fn doc(&self) -> &'static str {
        self.doc
    }

    /// Absolute byte address of this register in a module based at `base`
    #[must_use]
    pub fn address(&self, base: u32) -> u32 {
        base.wrapping_add(self.offset)
    }

    /// Convert `value` into this register's field bits, already shifted into place
    /// # Errors
    /// Returns an error if the value has the wrong type or names an unknown option
    #[allow(clippy::cast_precision_loss)]
    pub fn encode(&self, value: &Value) -> Result<u32, module::Error> {
        match (self.kind, value) {
            (Kind::Bool { invert }, Value::Bool(b)) => Ok(self.field.encode_raw(i64::from(*b != invert))),
            (Kind::Int, Value::Int(i)) => Ok(self.field.encode_raw(*i)),
            (Kind::Float, Value::Float(f)) => Ok(self.field.encode(*f)),
            (Kind::Float, Value::Int(i)) => Ok(self.field.encode(*i as f64)),
            (Kind::Select(options), Value::Select(option)) => options
                .iter()
                .find(|(name, _)| *name == option.as_str())
                .map(|&(_, code)| self.field.encode_raw(i64::from(code)))
                .ok_or_else(|| module::Error::UnknownOption {
                    register: self.name,
                    option: option.clone(),
                }),
            _ => Err(module::Error::WrongType {
                register: self.name,
                expected: self.kind.type_name(),
            }),
        }
    }

    /// Interpret this register's field within the raw `word`
    /// # Errors
    /// Returns an error if a select register holds a code that names no option
    pub fn decode(&self, word: u32) -> Result<Value, module::Error> {
        Ok(match self.kind {
            Kind::Bool { invert } => Value::Bool((self.field.decode_raw(word) != 0) != invert),
            Kind::Int => Value::Int(self.field.decode_raw(word)),
            Kind::Float => Value::Float(self.field.decode(word)),
            Kind::Select(options) => {
                let code = self.field.decode_raw(word);
                let &(option, _) = options
                    .iter()
                    .find(|&&(_, c)| i64::from(c) == code)
                    .ok_or(module::Error::UnknownCode {
                        register: self.name,
                        code,
                    })?;
                Value::Select(KString::from_static(option))
            }
        })
    }

    /// Read this register from a module based at `base`. Issues exactly one read.
    /// # Errors
    /// Returns an error on bad transport or an unknown select code
    pub fn get<T>(&self, transport: &mut T, base: u32) -> Result<Value, module::Error>
    where
        T: Transport,
    {
        let word = transport.read_word(self.address(base))?;
        self.decode(word)
    }

    /// Update this register in a module based at `base`, preserving every other bit of the word.
    /// Issues exactly one read and one write; the caller must hold the transport for both so the
    /// read-modify-write is not interleaved with other updates of the same word.
    /// # Errors
    /// Returns an error on bad transport, a read-only register or a value of the wrong type
    pub fn set<T>(&self, transport: &mut T, base: u32, value: &Value) -> Result<(), module::Error>
    where
        T: Transport,
    {
        if self.access == Access::ReadOnly {
            return Err(module::Error::ReadOnly(self.name));
        }
        let bits = self.encode(value)?;
        let addr = self.address(base);
        let word = transport.read_word(addr)?;
        let updated = self.field.insert(word, bits);
        trace!(register = self.name, addr, word, updated, "read-modify-write");
        transport.write_word(addr, updated)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::Mock;

    const BASE: u32 = 0x4060_0000;
    const INPUTS: &[(&str, u32)] = &[("in1", 0), ("in2", 1), ("dac1", 2)];

    register_map! {
        TEST_MAP {
            threshold => RegisterSpec::float(0x00, 14, true, 8192.0, "Threshold (V)"),
            count => RegisterSpec::integer(0x10, 32, false, "Count"),
            running => RegisterSpec::boolean(0x20, 0, "Running"),
            armed => RegisterSpec::boolean(0x20, 1, "Armed").inverted(),
            input => RegisterSpec::select(0x20, 2, INPUTS, "Input").shift(4),
            status => RegisterSpec::integer(0x24, 32, false, "Status").read_only(),
        }
    }

    fn reg(name: &str) -> Register {
        let spec = TEST_MAP.iter().find(|s| s.name == name).unwrap();
        Register::from_spec(spec).unwrap()
    }

    #[test]
    fn test_names_from_macro() {
        let names: Vec<_> = TEST_MAP.iter().map(|s| s.name).collect();
        assert_eq!(names, ["threshold", "count", "running", "armed", "input", "status"]);
    }

    #[test]
    fn test_get_one_read() {
        let mut transport = Mock::default();
        transport.poke(BASE + 0x10, 42);
        assert_eq!(reg("count").get(&mut transport, BASE).unwrap(), Value::Int(42));
        assert_eq!((transport.reads(), transport.writes()), (1, 0));
    }

    #[test]
    fn test_set_one_read_one_write() {
        let mut transport = Mock::default();
        reg("count").set(&mut transport, BASE, &Value::Int(42)).unwrap();
        assert_eq!(transport.peek(BASE + 0x10), 42);
        assert_eq!((transport.reads(), transport.writes()), (1, 1));
    }

    #[test]
    fn test_set_bool_keeps_neighbours() {
        let mut transport = Mock::default();
        transport.poke(BASE + 0x20, 0xFFFF_FFFE);
        reg("running").set(&mut transport, BASE, &Value::Bool(true)).unwrap();
        assert_eq!(transport.peek(BASE + 0x20), 0xFFFF_FFFF);
        reg("running").set(&mut transport, BASE, &Value::Bool(false)).unwrap();
        assert_eq!(transport.peek(BASE + 0x20), 0xFFFF_FFFE);
    }

    #[test]
    fn test_set_field_keeps_neighbours() {
        let mut transport = Mock::default();
        let input = reg("input");
        for seed in [0u32, 0xFFFF_FFFF, 0xA5A5_A5A5, 0x5A5A_5A5A] {
            transport.poke(BASE + 0x20, seed);
            input
                .set(&mut transport, BASE, &Value::from("dac1"))
                .unwrap();
            let word = transport.peek(BASE + 0x20);
            assert_eq!(word & !input.field().mask(), seed & !input.field().mask());
            assert_eq!((word >> 4) & 0b11, 2);
        }
    }

    #[test]
    fn test_float_round_trip() {
        let mut transport = Mock::default();
        let threshold = reg("threshold");
        threshold
            .set(&mut transport, BASE, &Value::Float(-0.125))
            .unwrap();
        assert_eq!(
            threshold.get(&mut transport, BASE).unwrap(),
            Value::Float(-0.125)
        );
        // Integers are accepted for scaled values
        threshold.set(&mut transport, BASE, &Value::Int(0)).unwrap();
        assert_eq!(transport.peek(BASE) & 0x3FFF, 0);
    }

    #[test]
    fn test_float_clamps() {
        let mut transport = Mock::default();
        let threshold = reg("threshold");
        threshold
            .set(&mut transport, BASE, &Value::Float(3.0))
            .unwrap();
        assert_eq!(transport.peek(BASE), 0x1FFF);
        threshold
            .set(&mut transport, BASE, &Value::Float(-3.0))
            .unwrap();
        assert_eq!(transport.peek(BASE), 0x2000);
    }

    #[test]
    fn test_inverted_bool() {
        let mut transport = Mock::default();
        let armed = reg("armed");
        assert_eq!(armed.get(&mut transport, BASE).unwrap(), Value::Bool(true));
        armed.set(&mut transport, BASE, &Value::Bool(false)).unwrap();
        assert_eq!(transport.peek(BASE + 0x20), 0b10);
    }

    #[test]
    fn test_select_decode() {
        let input = reg("input");
        assert_eq!(input.decode(0x10).unwrap(), Value::from("in2"));
        assert!(matches!(
            input.decode(0x30),
            Err(module::Error::UnknownCode { code: 3, .. })
        ));
        assert!(matches!(
            input.encode(&Value::from("out9")),
            Err(module::Error::UnknownOption { .. })
        ));
    }

    #[test]
    fn test_wrong_type_before_traffic() {
        let mut transport = Mock::default();
        let err = reg("count")
            .set(&mut transport, BASE, &Value::Float(1.5))
            .unwrap_err();
        assert!(matches!(err, module::Error::WrongType { expected: "integer", .. }));
        assert_eq!((transport.reads(), transport.writes()), (0, 0));
    }

    #[test]
    fn test_read_only() {
        let mut transport = Mock::default();
        let err = reg("status")
            .set(&mut transport, BASE, &Value::Int(1))
            .unwrap_err();
        assert!(matches!(err, module::Error::ReadOnly("status")));
        assert_eq!(transport.writes(), 0);
    }

    #[test]
    fn test_transport_fault_propagates() {
        let mut transport = Mock::default();
        transport.fail_at(BASE + 0x10);
        let err = reg("count")
            .set(&mut transport, BASE, &Value::Int(1))
            .unwrap_err();
        assert!(matches!(err, module::Error::Transport(_)));
        assert_eq!(transport.writes(), 0);
    }

    #[test]
    fn test_invalid_specs() {
        let overrun = RegisterSpec::float(0x00, 14, true, 8192.0, "").shift(20).named("x");
        assert_eq!(
            Register::from_spec(&overrun),
            Err(Error::Field {
                name: "x",
                source: field::Error::FieldOverrun {
                    width: 14,
                    shift: 20
                }
            })
        );
        let misaligned = RegisterSpec::integer(0x06, 8, false, "").named("y");
        assert_eq!(
            Register::from_spec(&misaligned),
            Err(Error::Misaligned {
                name: "y",
                offset: 6
            })
        );
        let zero = RegisterSpec::float(0x00, 14, true, 0.0, "").named("z");
        assert!(matches!(
            Register::from_spec(&zero),
            Err(Error::Field {
                source: field::Error::BadNorm(_),
                ..
            })
        ));
        let mut wide = RegisterSpec::boolean(0x00, 0, "").named("w");
        wide.width = 2;
        assert_eq!(Register::from_spec(&wide), Err(Error::WideBool("w")));
        let crowded = RegisterSpec::select(0x00, 1, INPUTS, "").named("s");
        assert_eq!(
            Register::from_spec(&crowded),
            Err(Error::OptionOverflow {
                name: "s",
                option: "dac1",
                code: 2
            })
        );
        let empty = RegisterSpec::select(0x00, 2, &[], "").named("e");
        assert_eq!(Register::from_spec(&empty), Err(Error::NoOptions("e")));
        let mut scaled = RegisterSpec::integer(0x00, 8, false, "").named("i");
        scaled.norm = 2.0;
        assert_eq!(Register::from_spec(&scaled), Err(Error::Scaled("i")));
    }
}
