//! Inverse of [`Decoder`](super::Decoder), used for instruction arguments

use crate::error::{OracleError, Result};
use crate::models::Pubkey;
use crate::schema::{Field, FieldType, TypeDef, TypeRegistry};

use super::{Record, Value};

#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_raw(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_raw(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_raw(&value.to_le_bytes());
    }

    pub fn write_pubkey(&mut self, value: &Pubkey) {
        self.write_raw(value.as_bytes());
    }

    /// u32 length prefix followed by the bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_u32(length_prefix(bytes.len(), "byte string")?);
        self.write_raw(bytes);
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    pub fn write_record(&mut self, fields: &[Field], record: &Record, types: &TypeRegistry) -> Result<()> {
        for field in fields {
            let value = record.require(&field.name)?;
            self.write_value(&field.ty, value, types)?;
        }
        Ok(())
    }

    pub fn write_value(&mut self, ty: &FieldType, value: &Value, types: &TypeRegistry) -> Result<()> {
        match (ty, value) {
            (FieldType::Bool, Value::Bool(v)) => self.write_u8(u8::from(*v)),
            (FieldType::U8, Value::U8(v)) => self.write_u8(*v),
            (FieldType::U16, Value::U16(v)) => self.write_u16(*v),
            (FieldType::U32, Value::U32(v)) => self.write_u32(*v),
            (FieldType::U64, Value::U64(v)) => self.write_u64(*v),
            (FieldType::I64, Value::I64(v)) => self.write_raw(&v.to_le_bytes()),
            (FieldType::String, Value::String(v)) => self.write_string(v)?,
            (FieldType::Bytes, Value::Bytes(v)) => self.write_bytes(v)?,
            (FieldType::Pubkey, Value::Pubkey(v)) => self.write_pubkey(v),
            (FieldType::Array(inner, len), Value::Bytes(bytes)) if **inner == FieldType::U8 => {
                if bytes.len() != *len {
                    return Err(OracleError::Decode(format!(
                        "expected {len} bytes, got {}",
                        bytes.len()
                    )));
                }
                self.write_raw(bytes);
            }
            (FieldType::Array(inner, len), Value::List(items)) => {
                if items.len() != *len {
                    return Err(OracleError::Decode(format!(
                        "expected {len} items, got {}",
                        items.len()
                    )));
                }
                for item in items {
                    self.write_value(inner, item, types)?;
                }
            }
            (FieldType::Vec(inner), Value::List(items)) => {
                self.write_u32(length_prefix(items.len(), "list")?);
                for item in items {
                    self.write_value(inner, item, types)?;
                }
            }
            (FieldType::Option(_), Value::Option(None)) => self.write_u8(0),
            (FieldType::Option(inner), Value::Option(Some(item))) => {
                self.write_u8(1);
                self.write_value(inner, item, types)?;
            }
            (FieldType::Defined(name), value) => match (types.get(name), value) {
                (Some(TypeDef::Struct(fields)), Value::Record(record)) => {
                    self.write_record(fields, record, types)?;
                }
                (Some(TypeDef::Enum(variants)), Value::Enum(variant)) => {
                    let tag = variants
                        .iter()
                        .position(|candidate| candidate == variant)
                        .and_then(|index| u8::try_from(index).ok())
                        .ok_or_else(|| {
                            OracleError::Decode(format!("`{variant}` is not a variant of `{name}`"))
                        })?;
                    self.write_u8(tag);
                }
                (None, _) => return Err(OracleError::SchemaMissing(name.clone())),
                (Some(_), other) => {
                    return Err(OracleError::Decode(format!("cannot encode {other:?} as `{name}`")))
                }
            },
            (ty, value) => {
                return Err(OracleError::Decode(format!("cannot encode {value:?} as {ty}")));
            }
        }
        Ok(())
    }
}

fn length_prefix(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| OracleError::Decode(format!("{what} of {len} bytes exceeds the u32 length prefix")))
}
