use std::fmt;

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Wire type of a field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawFieldType")]
pub enum FieldType {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I64,
    String,
    Bytes,
    Pubkey,
    Array(Box<FieldType>, usize),
    Vec(Box<FieldType>),
    Option(Box<FieldType>),
    Defined(String),
}

impl FieldType {
    pub fn vec(inner: FieldType) -> Self {
        Self::Vec(Box::new(inner))
    }

    pub fn option(inner: FieldType) -> Self {
        Self::Option(Box::new(inner))
    }

    pub fn array(inner: FieldType, len: usize) -> Self {
        Self::Array(Box::new(inner), len)
    }

    pub fn defined(name: impl Into<String>) -> Self {
        Self::Defined(name.into())
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::U8 => f.write_str("u8"),
            Self::U16 => f.write_str("u16"),
            Self::U32 => f.write_str("u32"),
            Self::U64 => f.write_str("u64"),
            Self::I64 => f.write_str("i64"),
            Self::String => f.write_str("string"),
            Self::Bytes => f.write_str("bytes"),
            Self::Pubkey => f.write_str("pubkey"),
            Self::Array(inner, len) => write!(f, "[{inner}; {len}]"),
            Self::Vec(inner) => write!(f, "vec<{inner}>"),
            Self::Option(inner) => write!(f, "option<{inner}>"),
            Self::Defined(name) => f.write_str(name),
        }
    }
}

// Both schema generations are accepted: `{"defined": "Name"}` and
// `{"defined": {"name": "Name"}}`, `pubkey` and `publicKey`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawFieldType {
    Primitive(String),
    Composite(CompositeType),
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum CompositeType {
    Vec(Box<RawFieldType>),
    Option(Box<RawFieldType>),
    Array(Box<RawFieldType>, usize),
    Defined(DefinedRef),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DefinedRef {
    Bare(String),
    Named { name: String },
}

impl TryFrom<RawFieldType> for FieldType {
    type Error = String;

    fn try_from(raw: RawFieldType) -> Result<Self, Self::Error> {
        match raw {
            RawFieldType::Primitive(name) => match name.as_str() {
                "bool" => Ok(Self::Bool),
                "u8" => Ok(Self::U8),
                "u16" => Ok(Self::U16),
                "u32" => Ok(Self::U32),
                "u64" => Ok(Self::U64),
                "i64" => Ok(Self::I64),
                "string" => Ok(Self::String),
                "bytes" => Ok(Self::Bytes),
                "pubkey" | "publicKey" => Ok(Self::Pubkey),
                other => Err(format!("unsupported field type `{other}`")),
            },
            RawFieldType::Composite(CompositeType::Vec(inner)) => {
                Ok(Self::Vec(Box::new(Self::try_from(*inner)?)))
            }
            RawFieldType::Composite(CompositeType::Option(inner)) => {
                Ok(Self::Option(Box::new(Self::try_from(*inner)?)))
            }
            RawFieldType::Composite(CompositeType::Array(inner, len)) => {
                Ok(Self::Array(Box::new(Self::try_from(*inner)?), len))
            }
            RawFieldType::Composite(CompositeType::Defined(DefinedRef::Bare(name)))
            | RawFieldType::Composite(CompositeType::Defined(DefinedRef::Named { name })) => {
                Ok(Self::Defined(name))
            }
        }
    }
}
