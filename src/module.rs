//! Modules: named blocks of registers sharing one base address.
//!
//! A [`Schema`] is the validated register map of one module kind. It is built once and shared by
//! every unit of that kind, while a [`Module`] binds the schema to a base address and the shared
//! transport. The schema is also the whole surface that presentation and persistence layers get
//! to see: [`Schema::parameters`] lists every register and [`Schema::setup_names`] the subset that
//! makes up a module's saved configuration.

use crate::{
    register::{
        self,
        Access,
        Kind,
        Register,
        RegisterSpec,
    },
    transport::{
        self,
        Deserialize,
        Transport,
    },
};
use kstring::KString;
use serde::Serialize;
use std::{
    collections::{
        BTreeMap,
        HashSet,
    },
    sync::{
        Arc,
        Mutex,
        PoisonError,
        Weak,
    },
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] transport::Error),
    #[error("Module `{module}` has no parameter `{parameter}`")]
    UnknownParameter { module: KString, parameter: KString },
    #[error("Register `{0}` is read-only")]
    ReadOnly(&'static str),
    #[error("Register `{register}` holds {expected} values")]
    WrongType {
        register: &'static str,
        expected: &'static str,
    },
    #[error("Register `{register}` has no option `{option}`")]
    UnknownOption {
        register: &'static str,
        option: KString,
    },
    #[error("Register `{register}` holds code {code}, which names no option")]
    UnknownCode { register: &'static str, code: i64 },
    #[error("The transport behind module `{0}` has been dropped")]
    Detached(KString),
}

/// A parameter value in engineering units
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Select(KString),
}

impl Value {
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_option(&self) -> Option<&str> {
        match self {
            Value::Select(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i.into())
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Select(KString::from_ref(s))
    }
}

/// The saved configuration of one module, keyed by parameter name
pub type Setup = BTreeMap<KString, Value>;

/// What presentation and persistence layers may know about one parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterInfo {
    pub name: &'static str,
    pub offset: u32,
    pub width: u8,
    pub shift: u8,
    pub signed: bool,
    pub norm: f64,
    pub kind: Kind,
    pub access: Access,
    pub doc: &'static str,
    /// Part of the module's saved configuration
    pub setup: bool,
}

/// The validated register map of one module kind
#[derive(Debug)]
pub struct Schema {
    kind: &'static str,
    registers: Vec<Register>,
    setup: &'static [&'static str],
}

impl Schema {
    /// Validate a register map.
    /// # Errors
    /// Returns the first configuration error found: a bad register, a name declared twice, or a
    /// setup parameter that is missing or read-only
    pub fn new(
        kind: &'static str,
        specs: &[RegisterSpec],
        setup: &'static [&'static str],
    ) -> Result<Self, register::Error> {
        let mut seen = HashSet::new();
        let registers = specs
            .iter()
            .map(|spec| {
                if !seen.insert(spec.name) {
                    return Err(register::Error::Duplicate(spec.name));
                }
                Register::from_spec(spec)
            })
            .collect::<Result<Vec<_>, _>>()?;
        for &name in setup {
            let reg = registers
                .iter()
                .find(|r| r.name() == name)
                .ok_or(register::Error::UnknownSetup(name))?;
            if reg.access() == Access::ReadOnly {
                return Err(register::Error::ReadOnlySetup(name));
            }
        }
        Ok(Self {
            kind,
            registers,
            setup,
        })
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Registers in declaration order
    #[must_use]
    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    #[must_use]
    pub fn register(&self, name: &str) -> Option<&Register> {
        self.registers.iter().find(|r| r.name() == name)
    }

    /// Names of the parameters that make up a saved configuration, in application order
    #[must_use]
    pub fn setup_names(&self) -> &'static [&'static str] {
        self.setup
    }

    /// Describe every parameter, in declaration order
    #[must_use]
    pub fn parameters(&self) -> Vec<ParameterInfo> {
        self.registers
            .iter()
            .map(|r| ParameterInfo {
                name: r.name(),
                offset: r.offset(),
                width: r.field().width(),
                shift: r.field().shift(),
                signed: r.field().signed(),
                norm: r.field().norm(),
                kind: r.kind(),
                access: r.access(),
                doc: r.doc(),
                setup: self.setup.contains(&r.name()),
            })
            .collect()
    }
}

/// One hardware module: a schema at a base address, reached through a shared transport
#[derive(Debug)]
pub struct Module<T> {
    /// Upwards pointer to the instrument's transport
    transport: Weak<Mutex<T>>,
    schema: Arc<Schema>,
    name: KString,
    base: u32,
}

impl<T> Module<T> {
    #[must_use]
    pub fn new(transport: Weak<Mutex<T>>, schema: Arc<Schema>, name: &str, base: u32) -> Self {
        Self {
            transport,
            schema,
            name: KString::from_ref(name),
            base,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn base(&self) -> u32 {
        self.base
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn register(&self, parameter: &str) -> Result<&Register, Error> {
        self.schema
            .register(parameter)
            .ok_or_else(|| Error::UnknownParameter {
                module: self.name.clone(),
                parameter: KString::from_ref(parameter),
            })
    }

    /// Absolute byte address of `parameter`
    /// # Errors
    /// Returns an error if the module has no such parameter
    pub fn address(&self, parameter: &str) -> Result<u32, Error> {
        Ok(self.register(parameter)?.address(self.base))
    }
}

impl<T> Module<T>
where
    T: Transport,
{
    /// Run `f` while holding the transport, so everything it does is one critical section
    fn with_transport<R>(&self, f: impl FnOnce(&mut T) -> Result<R, Error>) -> Result<R, Error> {
        let tarc = self
            .transport
            .upgrade()
            .ok_or_else(|| Error::Detached(self.name.clone()))?;
        // A panic elsewhere can't leave a half-written word behind, the hardware holds the state
        let mut transport = tarc.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *transport)
    }

    /// Read `parameter`
    /// # Errors
    /// Returns an error on bad transport or an unknown parameter
    pub fn get(&self, parameter: &str) -> Result<Value, Error> {
        let reg = self.register(parameter)?;
        self.with_transport(|transport| reg.get(transport, self.base))
    }

    /// Write `parameter`, leaving the rest of its word untouched
    /// # Errors
    /// Returns an error on bad transport, an unknown or read-only parameter, or a value of the
    /// wrong type
    pub fn set(&self, parameter: &str, value: impl Into<Value>) -> Result<(), Error> {
        let reg = self.register(parameter)?;
        let value = value.into();
        self.with_transport(|transport| reg.set(transport, self.base, &value))
    }

    fn expect<V>(&self, parameter: &str, value: Value, f: impl FnOnce(&Value) -> Option<V>) -> Result<V, Error> {
        f(&value).ok_or_else(|| {
            let reg = self.schema.register(parameter);
            Error::WrongType {
                register: reg.map_or("", Register::name),
                expected: reg.map_or("", |r| r.kind().type_name()),
            }
        })
    }

    /// # Errors
    /// Returns an error on bad transport or if `parameter` isn't boolean
    pub fn get_bool(&self, parameter: &str) -> Result<bool, Error> {
        let v = self.get(parameter)?;
        self.expect(parameter, v, Value::as_bool)
    }

    /// # Errors
    /// Returns an error on bad transport or if `parameter` isn't an integer
    pub fn get_int(&self, parameter: &str) -> Result<i64, Error> {
        let v = self.get(parameter)?;
        self.expect(parameter, v, Value::as_int)
    }

    /// # Errors
    /// Returns an error on bad transport or if `parameter` isn't numeric
    pub fn get_float(&self, parameter: &str) -> Result<f64, Error> {
        let v = self.get(parameter)?;
        self.expect(parameter, v, Value::as_float)
    }

    /// # Errors
    /// Returns an error on bad transport or if `parameter` isn't a select register
    pub fn get_option(&self, parameter: &str) -> Result<KString, Error> {
        match self.get(parameter)? {
            Value::Select(option) => Ok(option),
            v => self.expect(parameter, v, |_| None),
        }
    }

    /// # Errors
    /// Returns an error on bad transport or if `parameter` isn't a writable boolean
    pub fn set_bool(&self, parameter: &str, value: bool) -> Result<(), Error> {
        self.set(parameter, value)
    }

    /// # Errors
    /// Returns an error on bad transport or if `parameter` isn't a writable number
    pub fn set_int(&self, parameter: &str, value: i64) -> Result<(), Error> {
        self.set(parameter, value)
    }

    /// # Errors
    /// Returns an error on bad transport or if `parameter` isn't a writable scaled value
    pub fn set_float(&self, parameter: &str, value: f64) -> Result<(), Error> {
        self.set(parameter, value)
    }

    /// # Errors
    /// Returns an error on bad transport, an unknown option or if `parameter` isn't a writable
    /// select register
    pub fn set_option(&self, parameter: &str, option: &str) -> Result<(), Error> {
        self.set(parameter, option)
    }

    /// Read every setup parameter in one critical section
    /// # Errors
    /// Returns an error on bad transport
    pub fn setup(&self) -> Result<Setup, Error> {
        self.with_transport(|transport| {
            self.schema
                .setup_names()
                .iter()
                .map(|&name| -> Result<(KString, Value), Error> {
                    let reg = self.register(name)?;
                    Ok((KString::from_static(name), reg.get(transport, self.base)?))
                })
                .collect()
        })
    }

    /// Write a saved configuration. Every entry is checked before the first write, then entries
    /// are applied in schema order in one critical section.
    /// # Errors
    /// Returns an error on bad transport, or without touching the hardware if an entry is not a
    /// setup parameter or has the wrong type
    pub fn apply_setup(&self, setup: &Setup) -> Result<(), Error> {
        for (name, value) in setup {
            let reg = self
                .schema
                .setup_names()
                .contains(&name.as_str())
                .then(|| self.schema.register(name))
                .flatten()
                .ok_or_else(|| Error::UnknownParameter {
                    module: self.name.clone(),
                    parameter: name.clone(),
                })?;
            reg.encode(value)?;
        }
        self.with_transport(|transport| {
            for &name in self.schema.setup_names() {
                if let Some(value) = setup.get(name) {
                    self.register(name)?.set(transport, self.base, value)?;
                }
            }
            Ok(())
        })
    }

    /// Read a packed record of consecutive words starting at `offset`, in one critical section
    /// # Errors
    /// Returns an error on bad transport or if the record fails to unpack
    pub fn read_record<D, const N: usize>(&self, offset: u32) -> Result<D, Error>
    where
        D: Deserialize<Chunk = [u8; N]>,
    {
        let addr = self.base.wrapping_add(offset);
        self.with_transport(|transport| Ok(transport.read(addr)?))
    }
}
