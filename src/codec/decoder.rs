//! Forward-only, schema-driven reader

use crate::error::{OracleError, Result};
use crate::models::Pubkey;
use crate::schema::{Field, FieldType, TypeDef, TypeRegistry};

use super::{Record, Value};

const MAX_DEPTH: usize = 32;

/// Cursor over a byte buffer. The position only ever moves forward.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, wanted: usize) -> Result<&'a [u8]> {
        if wanted > self.remaining() {
            return Err(OracleError::OutOfBounds {
                offset: self.pos,
                wanted,
                len: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + wanted];
        self.pos += wanted;
        Ok(slice)
    }

    pub fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        let offset = self.pos;
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(OracleError::Decode(format!(
                "invalid bool byte {other} at offset {offset}"
            ))),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_fixed()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_fixed()?))
    }

    /// Little-endian u64 assembled from its low and high 32-bit halves.
    pub fn read_u64(&mut self) -> Result<u64> {
        if self.remaining() < 8 {
            return Err(OracleError::OutOfBounds {
                offset: self.pos,
                wanted: 8,
                len: self.buf.len(),
            });
        }
        let low = u64::from(self.read_u32()?);
        let high = u64::from(self.read_u32()?);
        Ok(low | (high << 32))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_pubkey(&mut self) -> Result<Pubkey> {
        Ok(Pubkey::new(self.read_fixed()?))
    }

    fn read_len(&mut self) -> Result<usize> {
        let len = self.read_u32()?;
        usize::try_from(len).map_err(|_| OracleError::Decode(format!("length {len} overflows")))
    }

    /// Element count of a vector. A count larger than the bytes left is
    /// rejected up front, which also bounds vectors of zero-width elements.
    fn read_count(&mut self) -> Result<usize> {
        let offset = self.pos;
        let count = self.read_len()?;
        if count > self.remaining() {
            return Err(OracleError::OutOfBounds {
                offset,
                wanted: count.saturating_add(self.pos - offset),
                len: self.buf.len(),
            });
        }
        Ok(count)
    }

    /// u32 length prefix followed by raw bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_len()?;
        Ok(self.take(len)?.to_vec())
    }

    /// u32 length prefix followed by UTF-8. Zero-length strings never touch
    /// the body.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_len()?;
        if len == 0 {
            return Ok(String::new());
        }
        let offset = self.pos;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|err| OracleError::Decode(format!("invalid utf-8 at offset {offset}: {err}")))
    }

    pub fn read_record(&mut self, fields: &[Field], types: &TypeRegistry) -> Result<Record> {
        self.record_at(fields, types, 0)
    }

    /// u32 count followed by that many records.
    pub fn read_record_vec(&mut self, fields: &[Field], types: &TypeRegistry) -> Result<Vec<Record>> {
        let count = self.read_count()?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.record_at(fields, types, 0)?);
        }
        Ok(out)
    }

    pub fn read_value(&mut self, ty: &FieldType, types: &TypeRegistry) -> Result<Value> {
        self.value_at(ty, types, 0)
    }

    fn record_at(&mut self, fields: &[Field], types: &TypeRegistry, depth: usize) -> Result<Record> {
        let mut record = Record::new();
        for field in fields {
            let value = self.value_at(&field.ty, types, depth)?;
            record.push(field.name.clone(), value);
        }
        Ok(record)
    }

    fn value_at(&mut self, ty: &FieldType, types: &TypeRegistry, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(OracleError::Decode(format!("type nesting exceeds {MAX_DEPTH}")));
        }

        let value = match ty {
            FieldType::Bool => Value::Bool(self.read_bool()?),
            FieldType::U8 => Value::U8(self.read_u8()?),
            FieldType::U16 => Value::U16(self.read_u16()?),
            FieldType::U32 => Value::U32(self.read_u32()?),
            FieldType::U64 => Value::U64(self.read_u64()?),
            FieldType::I64 => Value::I64(self.read_i64()?),
            FieldType::String => Value::String(self.read_string()?),
            FieldType::Bytes => Value::Bytes(self.read_bytes()?),
            FieldType::Pubkey => Value::Pubkey(self.read_pubkey()?),
            FieldType::Array(inner, len) if **inner == FieldType::U8 => {
                Value::Bytes(self.take(*len)?.to_vec())
            }
            FieldType::Array(inner, len) => {
                let mut items = Vec::with_capacity((*len).min(self.remaining()));
                for _ in 0..*len {
                    items.push(self.value_at(inner, types, depth + 1)?);
                }
                Value::List(items)
            }
            FieldType::Vec(inner) => {
                let count = self.read_count()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.value_at(inner, types, depth + 1)?);
                }
                Value::List(items)
            }
            FieldType::Option(inner) => {
                let offset = self.pos;
                match self.read_u8()? {
                    0 => Value::Option(None),
                    1 => Value::Option(Some(Box::new(self.value_at(inner, types, depth + 1)?))),
                    other => {
                        return Err(OracleError::Decode(format!(
                            "invalid option tag {other} at offset {offset}"
                        )))
                    }
                }
            }
            FieldType::Defined(name) => match types.get(name) {
                Some(TypeDef::Struct(fields)) => {
                    Value::Record(self.record_at(fields, types, depth + 1)?)
                }
                Some(TypeDef::Enum(variants)) => {
                    let offset = self.pos;
                    let tag = usize::from(self.read_u8()?);
                    let variant = variants.get(tag).ok_or_else(|| {
                        OracleError::Decode(format!(
                            "enum `{name}` has no variant {tag} (offset {offset})"
                        ))
                    })?;
                    Value::Enum(variant.clone())
                }
                None => return Err(OracleError::SchemaMissing(name.clone())),
            },
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encoder;

    fn message_types() -> TypeRegistry {
        let mut types = TypeRegistry::default();
        types.insert(
            "Message",
            TypeDef::Struct(vec![
                Field::new("role", FieldType::String),
                Field::new("content", FieldType::String),
            ]),
        );
        types.insert(
            "RequestStatus",
            TypeDef::Enum(vec!["Pending".into(), "VotingCompleted".into(), "Fulfilled".into()]),
        );
        types
    }

    fn every_type() -> Vec<Field> {
        vec![
            Field::new("request_id", FieldType::String),
            Field::new("caller_program", FieldType::Pubkey),
            Field::new("min_votes", FieldType::U8),
            Field::new("winning_hash", FieldType::array(FieldType::U8, 32)),
            Field::new("port", FieldType::U16),
            Field::new("vote_count", FieldType::U32),
            Field::new("response_length", FieldType::U64),
            Field::new("created_at", FieldType::I64),
            Field::new("accepted", FieldType::Bool),
            Field::new("response", FieldType::Bytes),
            Field::new("fulfilled_by", FieldType::option(FieldType::Pubkey)),
            Field::new("status", FieldType::defined("RequestStatus")),
            Field::new("messages", FieldType::vec(FieldType::defined("Message"))),
        ]
    }

    fn sample() -> Record {
        let message = |role: &str, content: &str| {
            Value::Record(
                Record::new()
                    .with("role", Value::String(role.into()))
                    .with("content", Value::String(content.into())),
            )
        };
        Record::new()
            .with("request_id", Value::String("r1".into()))
            .with("caller_program", Value::Pubkey(Pubkey::new([4; 32])))
            .with("min_votes", Value::U8(3))
            .with("winning_hash", Value::Bytes(vec![0xab; 32]))
            .with("port", Value::U16(8899))
            .with("vote_count", Value::U32(70_000))
            .with("response_length", Value::U64(u64::MAX - 1))
            .with("created_at", Value::I64(-1_700_000_000))
            .with("accepted", Value::Bool(true))
            .with("response", Value::Bytes(b"4".to_vec()))
            .with("fulfilled_by", Value::Option(Some(Box::new(Value::Pubkey(Pubkey::new([5; 32]))))))
            .with("status", Value::Enum("VotingCompleted".into()))
            .with(
                "messages",
                Value::List(vec![message("system", ""), message("user", "what is 2+2?")]),
            )
    }

    #[test]
    fn round_trips_every_supported_field_type() {
        let types = message_types();
        let fields = every_type();
        let original = sample();

        let mut encoder = Encoder::new();
        encoder.write_record(&fields, &original, &types).unwrap();
        let bytes = encoder.into_inner();

        let mut decoder = Decoder::new(&bytes);
        let decoded = decoder.read_record(&fields, &types).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoder.remaining(), 0);
    }

    #[test]
    fn truncated_buffers_fail_out_of_bounds_for_each_field_type() {
        let types = message_types();
        let fields = every_type();
        let mut encoder = Encoder::new();
        encoder.write_record(&fields, &sample(), &types).unwrap();
        let bytes = encoder.into_inner();

        for cut in 0..bytes.len() {
            let mut decoder = Decoder::new(&bytes[..cut]);
            match decoder.read_record(&fields, &types) {
                Err(OracleError::OutOfBounds { offset, wanted, len }) => {
                    assert_eq!(len, cut);
                    assert!(offset + wanted > len, "cut {cut}");
                    assert!(decoder.position() <= cut);
                }
                other => panic!("cut {cut}: expected OutOfBounds, got {other:?}"),
            }
        }
    }

    #[test]
    fn primitive_reads_reject_short_buffers() {
        assert!(matches!(Decoder::new(&[]).read_u8(), Err(OracleError::OutOfBounds { .. })));
        assert!(matches!(Decoder::new(&[1, 2, 3]).read_u32(), Err(OracleError::OutOfBounds { .. })));
        assert!(matches!(
            Decoder::new(&[0; 7]).read_u64(),
            Err(OracleError::OutOfBounds { offset: 0, wanted: 8, len: 7 })
        ));
        assert!(matches!(Decoder::new(&[0; 31]).read_pubkey(), Err(OracleError::OutOfBounds { .. })));
        // Declared length larger than what follows.
        assert!(matches!(
            Decoder::new(&[5, 0, 0, 0, b'a']).read_string(),
            Err(OracleError::OutOfBounds { offset: 4, wanted: 5, len: 5 })
        ));
    }

    #[test]
    fn u64_halves_are_combined_little_endian() {
        let raw = 0x0102_0304_0506_0708u64.to_le_bytes();
        assert_eq!(Decoder::new(&raw).read_u64().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(Decoder::new(&u64::MAX.to_le_bytes()).read_u64().unwrap(), u64::MAX);
    }

    #[test]
    fn empty_string_consumes_only_prefix() {
        let mut decoder = Decoder::new(&[0, 0, 0, 0]);
        assert_eq!(decoder.read_string().unwrap(), "");
        assert_eq!(decoder.position(), 4);
    }

    #[test]
    fn record_vec_reads_count_then_records() {
        let types = message_types();
        let fields = [
            Field::new("role", FieldType::String),
            Field::new("content", FieldType::String),
        ];
        let mut encoder = Encoder::new();
        encoder.write_u32(2);
        for (role, content) in [("user", "hi"), ("assistant", "hello")] {
            encoder.write_string(role).unwrap();
            encoder.write_string(content).unwrap();
        }
        let bytes = encoder.into_inner();

        let records = Decoder::new(&bytes).read_record_vec(&fields, &types).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].str("content").unwrap(), "hello");
    }

    #[test]
    fn huge_vec_count_fails_without_allocating() {
        let types = message_types();
        let bytes = u32::MAX.to_le_bytes();
        let err = Decoder::new(&bytes)
            .read_value(&FieldType::vec(FieldType::U64), &types)
            .unwrap_err();
        assert!(matches!(err, OracleError::OutOfBounds { .. }));
    }

    #[test]
    fn zero_width_elements_cannot_inflate_a_vec() {
        let mut types = message_types();
        types.insert("Marker", TypeDef::Struct(Vec::new()));
        let bytes = u32::MAX.to_le_bytes();

        for element in [FieldType::defined("Marker"), FieldType::array(FieldType::U64, 0)] {
            let err = Decoder::new(&bytes)
                .read_value(&FieldType::vec(element), &types)
                .unwrap_err();
            assert!(matches!(err, OracleError::OutOfBounds { .. }));
        }

        let mut bytes = 2u32.to_le_bytes().to_vec();
        bytes.extend([0, 0]);
        let decoded = Decoder::new(&bytes)
            .read_value(&FieldType::vec(FieldType::defined("Marker")), &types)
            .unwrap();
        assert_eq!(decoded, Value::List(vec![Value::Record(Record::new()); 2]));
    }

    #[test]
    fn enums_and_unknown_types() {
        let types = message_types();
        let status = FieldType::defined("RequestStatus");
        assert_eq!(
            Decoder::new(&[2]).read_value(&status, &types).unwrap(),
            Value::Enum("Fulfilled".into())
        );
        assert!(matches!(
            Decoder::new(&[9]).read_value(&status, &types),
            Err(OracleError::Decode(_))
        ));
        assert!(matches!(
            Decoder::new(&[0]).read_value(&FieldType::defined("Nope"), &types),
            Err(OracleError::SchemaMissing(name)) if name == "Nope"
        ));
    }

    #[test]
    fn bools_and_options_reject_bad_tags() {
        let types = TypeRegistry::default();
        assert!(matches!(Decoder::new(&[2]).read_bool(), Err(OracleError::Decode(_))));
        assert!(matches!(
            Decoder::new(&[7]).read_value(&FieldType::option(FieldType::U8), &types),
            Err(OracleError::Decode(_))
        ));
    }
}
