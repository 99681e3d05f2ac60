use crate::error::{OracleError, Result};
use crate::models::{Digest32, Pubkey};

/// A decoded wire value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I64(i64),
    String(String),
    /// `bytes` and `[u8; N]` fields.
    Bytes(Vec<u8>),
    Pubkey(Pubkey),
    List(Vec<Value>),
    Option(Option<Box<Value>>),
    Record(Record),
    /// Variant name of a unit enum.
    Enum(String),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U8(v) => Some(u64::from(*v)),
            Self::U16(v) => Some(u64::from(*v)),
            Self::U32(v) => Some(u64::from(*v)),
            Self::U64(v) => Some(*v),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::U32(_) => "u32",
            Self::U64(_) => "u64",
            Self::I64(_) => "i64",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Pubkey(_) => "pubkey",
            Self::List(_) => "list",
            Self::Option(_) => "option",
            Self::Record(_) => "record",
            Self::Enum(_) => "enum",
        }
    }
}

/// Ordered field values of one decoded struct.
///
/// Lookups ignore case and underscores so `request_id` and `requestId`
/// resolve to the same field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

fn same_name(a: &str, b: &str) -> bool {
    let normalize = |s: &str| {
        s.chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect::<Vec<_>>()
    };
    normalize(a) == normalize(b)
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| same_name(field, name))
            .map(|(_, value)| value)
    }

    pub fn require(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .ok_or_else(|| OracleError::Decode(format!("field `{name}` missing")))
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        match self.require(name)? {
            Value::String(value) => Ok(value),
            other => Err(mismatch(name, "string", other)),
        }
    }

    pub fn pubkey(&self, name: &str) -> Result<Pubkey> {
        match self.require(name)? {
            Value::Pubkey(value) => Ok(*value),
            other => Err(mismatch(name, "pubkey", other)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        match self.require(name)? {
            Value::Bool(value) => Ok(*value),
            other => Err(mismatch(name, "bool", other)),
        }
    }

    /// Any unsigned integer field, widened.
    pub fn uint(&self, name: &str) -> Result<u64> {
        let value = self.require(name)?;
        value
            .as_u64()
            .ok_or_else(|| mismatch(name, "unsigned integer", value))
    }

    pub fn u8(&self, name: &str) -> Result<u8> {
        let wide = self.uint(name)?;
        u8::try_from(wide)
            .map_err(|_| OracleError::Decode(format!("field `{name}` out of range for u8: {wide}")))
    }

    /// A 32-byte digest, accepting a bare array or a populated option.
    pub fn digest(&self, name: &str) -> Result<Digest32> {
        match self.require(name)? {
            Value::Bytes(bytes) => bytes_to_digest(name, bytes),
            Value::Option(Some(inner)) => match inner.as_ref() {
                Value::Bytes(bytes) => bytes_to_digest(name, bytes),
                other => Err(mismatch(name, "[u8; 32]", other)),
            },
            other => Err(mismatch(name, "[u8; 32]", other)),
        }
    }

    /// Like [`Record::digest`] but maps an empty option to `None`.
    pub fn optional_digest(&self, name: &str) -> Result<Option<Digest32>> {
        match self.get(name) {
            None | Some(Value::Option(None)) => Ok(None),
            Some(_) => self.digest(name).map(Some),
        }
    }

    pub fn enum_variant(&self, name: &str) -> Result<&str> {
        match self.require(name)? {
            Value::Enum(variant) => Ok(variant),
            other => Err(mismatch(name, "enum", other)),
        }
    }

    pub fn list(&self, name: &str) -> Result<&[Value]> {
        match self.require(name)? {
            Value::List(items) => Ok(items),
            other => Err(mismatch(name, "list", other)),
        }
    }

    pub fn records(&self, name: &str) -> Result<Vec<&Record>> {
        self.list(name)?
            .iter()
            .map(|item| match item {
                Value::Record(record) => Ok(record),
                other => Err(mismatch(name, "record", other)),
            })
            .collect()
    }
}

fn bytes_to_digest(name: &str, bytes: &[u8]) -> Result<Digest32> {
    bytes.try_into().map_err(|_| {
        OracleError::Decode(format!(
            "field `{name}` has {} bytes, expected 32",
            bytes.len()
        ))
    })
}

fn mismatch(name: &str, expected: &str, found: &Value) -> OracleError {
    OracleError::Decode(format!(
        "field `{name}` is {}, expected {expected}",
        found.kind()
    ))
}
