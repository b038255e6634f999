//! Declarative binary layouts for account state and instruction payloads.
//!
//! A [`Schema`] is an ordered table of `(field name, field type)` pairs.
//! Fields are written in declared order, numbers little-endian, with no
//! padding. Only the explicitly variable-length types (`Bytes`, `Str`) carry
//! a length prefix, and the schema declares its width.
//!
//! ```text
//! Counter { counter: u8 }              -> [counter]
//! Transfer { tag: u8, amount: u64 }    -> [tag][amount LE x8]
//! Seeded { seed: str(u64 prefix) }     -> [len LE x8][utf-8 bytes]
//! ```
//!
//! A [`TaggedSchema`] is a union of schemas selected by a leading
//! discriminant, which is how instruction sets are laid out.

use crate::address::Address;
use crate::error::SolError;

/// Width of the length prefix in front of a variable-length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthPrefix {
    U32,
    U64,
}

impl LengthPrefix {
    const fn width(self) -> usize {
        match self {
            LengthPrefix::U32 => 4,
            LengthPrefix::U64 => 8,
        }
    }
}

/// The type of a single schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U8,
    U16,
    U32,
    U64,
    U128,
    I8,
    I16,
    I32,
    I64,
    Bool,
    Address,
    FixedBytes(usize),
    Bytes(LengthPrefix),
    Str(LengthPrefix),
}

impl FieldType {
    /// Encoded width, or `None` for variable-length types.
    pub const fn width(self) -> Option<usize> {
        match self {
            FieldType::U8 | FieldType::I8 | FieldType::Bool => Some(1),
            FieldType::U16 | FieldType::I16 => Some(2),
            FieldType::U32 | FieldType::I32 => Some(4),
            FieldType::U64 | FieldType::I64 => Some(8),
            FieldType::U128 => Some(16),
            FieldType::Address => Some(32),
            FieldType::FixedBytes(n) => Some(n),
            FieldType::Bytes(_) | FieldType::Str(_) => None,
        }
    }

    /// Smallest number of bytes a value of this type can occupy.
    pub const fn min_width(self) -> usize {
        match self {
            FieldType::Bytes(prefix) | FieldType::Str(prefix) => prefix.width(),
            other => match other.width() {
                Some(w) => w,
                None => 0,
            },
        }
    }
}

/// A decoded or to-be-encoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    U128(u128),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Bool(bool),
    Address(Address),
    Bytes(Vec<u8>),
    Str(String),
}

impl FieldValue {
    fn type_name(&self) -> &'static str {
        match self {
            FieldValue::U8(_) => "u8",
            FieldValue::U16(_) => "u16",
            FieldValue::U32(_) => "u32",
            FieldValue::U64(_) => "u64",
            FieldValue::U128(_) => "u128",
            FieldValue::I8(_) => "i8",
            FieldValue::I16(_) => "i16",
            FieldValue::I32(_) => "i32",
            FieldValue::I64(_) => "i64",
            FieldValue::Bool(_) => "bool",
            FieldValue::Address(_) => "address",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::Str(_) => "string",
        }
    }
}

/// One named, typed entry in a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
}

impl Field {
    pub const fn new(name: &'static str, ty: FieldType) -> Self {
        Self { name, ty }
    }
}

/// A named structure: an ordered list of fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [Field],
}

impl Schema {
    pub const fn new(name: &'static str, fields: &'static [Field]) -> Self {
        Self { name, fields }
    }

    /// Total encoded width when every field is fixed-width.
    pub fn fixed_len(&self) -> Option<usize> {
        self.fields
            .iter()
            .try_fold(0usize, |acc, f| f.ty.width().map(|w| acc + w))
    }

    /// Minimum buffer length any encoding of this schema needs.
    pub fn min_len(&self) -> usize {
        self.fields.iter().map(|f| f.ty.min_width()).sum()
    }

    /// Encode `record` in declared field order.
    ///
    /// Every schema field must be present in the record with a matching type;
    /// record entries the schema does not name are an error too.
    pub fn encode(&self, record: &Record) -> Result<Vec<u8>, SolError> {
        if let Some((name, _)) = record
            .entries
            .iter()
            .find(|(name, _)| !self.fields.iter().any(|f| f.name == *name))
        {
            return Err(SolError::SchemaMismatch(format!(
                "{}: unknown field `{name}`",
                self.name
            )));
        }

        let mut buf = Vec::with_capacity(self.min_len());
        for field in self.fields {
            let value = record.get(field.name).ok_or_else(|| {
                SolError::SchemaMismatch(format!("{}: missing field `{}`", self.name, field.name))
            })?;
            write_field(&mut buf, self.name, field, value)?;
        }
        Ok(buf)
    }

    /// Decode a record from the front of `data`.
    ///
    /// Trailing bytes are ignored so state can be read out of accounts that
    /// were allocated larger than the schema. A short buffer always fails
    /// without producing a partial record.
    pub fn decode(&self, data: &[u8]) -> Result<Record, SolError> {
        self.decode_prefix(data).map(|(record, _)| record)
    }

    /// Like [`Schema::decode`] but rejects trailing bytes.
    pub fn decode_exact(&self, data: &[u8]) -> Result<Record, SolError> {
        let (record, consumed) = self.decode_prefix(data)?;
        if consumed != data.len() {
            return Err(SolError::SchemaMismatch(format!(
                "{}: {} trailing bytes after {consumed}",
                self.name,
                data.len() - consumed
            )));
        }
        Ok(record)
    }

    fn decode_prefix(&self, data: &[u8]) -> Result<(Record, usize), SolError> {
        if data.len() < self.min_len() {
            return Err(SolError::SchemaMismatch(format!(
                "{}: buffer is {} bytes, layout needs at least {}",
                self.name,
                data.len(),
                self.min_len()
            )));
        }

        let mut reader = Reader {
            data,
            pos: 0,
            schema: self.name,
        };
        let mut entries = Vec::with_capacity(self.fields.len());
        for field in self.fields {
            entries.push((field.name, reader.read(field)?));
        }
        Ok((Record { entries }, reader.pos))
    }
}

/// Width of the discriminant in front of a tagged payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagWidth {
    U8,
    U32,
}

/// One arm of a tagged union.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variant {
    pub tag: u32,
    pub schema: Schema,
}

impl Variant {
    pub const fn new(tag: u32, schema: Schema) -> Self {
        Self { tag, schema }
    }
}

/// A union of schemas selected by a leading discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedSchema {
    pub name: &'static str,
    pub tag: TagWidth,
    pub variants: &'static [Variant],
}

impl TaggedSchema {
    pub const fn new(name: &'static str, tag: TagWidth, variants: &'static [Variant]) -> Self {
        Self {
            name,
            tag,
            variants,
        }
    }

    pub fn variant(&self, name: &str) -> Result<&Variant, SolError> {
        self.variants
            .iter()
            .find(|v| v.schema.name == name)
            .ok_or_else(|| {
                SolError::SchemaMismatch(format!("{}: no variant named `{name}`", self.name))
            })
    }

    /// Encode the tag of the named variant followed by its payload.
    pub fn encode(&self, variant: &str, record: &Record) -> Result<Vec<u8>, SolError> {
        let variant = self.variant(variant)?;
        let mut buf = match self.tag {
            TagWidth::U8 => {
                let tag = u8::try_from(variant.tag).map_err(|_| {
                    SolError::SchemaMismatch(format!(
                        "{}: tag {} does not fit in u8",
                        self.name, variant.tag
                    ))
                })?;
                vec![tag]
            }
            TagWidth::U32 => variant.tag.to_le_bytes().to_vec(),
        };
        buf.extend_from_slice(&variant.schema.encode(record)?);
        Ok(buf)
    }

    /// Decode the discriminant, then the matching variant's payload.
    pub fn decode(&self, data: &[u8]) -> Result<(&'static Variant, Record), SolError> {
        let (tag, rest) = match self.tag {
            TagWidth::U8 => match data.split_first() {
                Some((tag, rest)) => (*tag as u32, rest),
                None => {
                    return Err(SolError::SchemaMismatch(format!(
                        "{}: empty buffer, expected tag",
                        self.name
                    )))
                }
            },
            TagWidth::U32 => {
                if data.len() < 4 {
                    return Err(SolError::SchemaMismatch(format!(
                        "{}: buffer is {} bytes, expected 4-byte tag",
                        self.name,
                        data.len()
                    )));
                }
                let (tag, rest) = data.split_at(4);
                (u32::from_le_bytes([tag[0], tag[1], tag[2], tag[3]]), rest)
            }
        };

        let variant = self
            .variants
            .iter()
            .find(|v| v.tag == tag)
            .ok_or_else(|| SolError::SchemaMismatch(format!("{}: unknown tag {tag}", self.name)))?;
        let record = variant.schema.decode(rest)?;
        Ok((variant, record))
    }
}

/// A set of named field values.
///
/// Entries keep insertion order for iteration, but equality compares by
/// name, so a record built in any order equals its decoded counterpart.
#[derive(Debug, Clone, Default)]
pub struct Record {
    entries: Vec<(&'static str, FieldValue)>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        // Names are unique within a record; `set` replaces duplicates.
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|(name, value)| other.get(name) == Some(value))
    }
}

impl Eq for Record {}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; replaces an existing entry with the same name.
    pub fn with(mut self, name: &'static str, value: FieldValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &'static str, value: FieldValue) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.entries.iter().map(|(n, v)| (*n, v))
    }

    fn require(&self, name: &str) -> Result<&FieldValue, SolError> {
        self.get(name)
            .ok_or_else(|| SolError::SchemaMismatch(format!("record has no field `{name}`")))
    }

    fn wrong_type(name: &str, expected: &str, found: &FieldValue) -> SolError {
        SolError::SchemaMismatch(format!(
            "field `{name}` is {}, expected {expected}",
            found.type_name()
        ))
    }

    pub fn u8(&self, name: &str) -> Result<u8, SolError> {
        match self.require(name)? {
            FieldValue::U8(v) => Ok(*v),
            other => Err(Self::wrong_type(name, "u8", other)),
        }
    }

    pub fn u32(&self, name: &str) -> Result<u32, SolError> {
        match self.require(name)? {
            FieldValue::U32(v) => Ok(*v),
            other => Err(Self::wrong_type(name, "u32", other)),
        }
    }

    pub fn u64(&self, name: &str) -> Result<u64, SolError> {
        match self.require(name)? {
            FieldValue::U64(v) => Ok(*v),
            other => Err(Self::wrong_type(name, "u64", other)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool, SolError> {
        match self.require(name)? {
            FieldValue::Bool(v) => Ok(*v),
            other => Err(Self::wrong_type(name, "bool", other)),
        }
    }

    pub fn address(&self, name: &str) -> Result<Address, SolError> {
        match self.require(name)? {
            FieldValue::Address(v) => Ok(*v),
            other => Err(Self::wrong_type(name, "address", other)),
        }
    }

    pub fn str(&self, name: &str) -> Result<&str, SolError> {
        match self.require(name)? {
            FieldValue::Str(v) => Ok(v),
            other => Err(Self::wrong_type(name, "string", other)),
        }
    }

    pub fn bytes(&self, name: &str) -> Result<&[u8], SolError> {
        match self.require(name)? {
            FieldValue::Bytes(v) => Ok(v),
            other => Err(Self::wrong_type(name, "bytes", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn write_prefix(
    buf: &mut Vec<u8>,
    schema: &str,
    field: &Field,
    prefix: LengthPrefix,
    len: usize,
) -> Result<(), SolError> {
    match prefix {
        LengthPrefix::U32 => {
            let len = u32::try_from(len).map_err(|_| {
                SolError::SchemaMismatch(format!(
                    "{schema}.{}: length {len} exceeds u32 prefix",
                    field.name
                ))
            })?;
            buf.extend_from_slice(&len.to_le_bytes());
        }
        LengthPrefix::U64 => buf.extend_from_slice(&(len as u64).to_le_bytes()),
    }
    Ok(())
}

fn write_field(
    buf: &mut Vec<u8>,
    schema: &str,
    field: &Field,
    value: &FieldValue,
) -> Result<(), SolError> {
    match (field.ty, value) {
        (FieldType::U8, FieldValue::U8(v)) => buf.push(*v),
        (FieldType::U16, FieldValue::U16(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (FieldType::U32, FieldValue::U32(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (FieldType::U64, FieldValue::U64(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (FieldType::U128, FieldValue::U128(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (FieldType::I8, FieldValue::I8(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (FieldType::I16, FieldValue::I16(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (FieldType::I32, FieldValue::I32(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (FieldType::I64, FieldValue::I64(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (FieldType::Bool, FieldValue::Bool(v)) => buf.push(u8::from(*v)),
        (FieldType::Address, FieldValue::Address(v)) => buf.extend_from_slice(v.as_bytes()),
        (FieldType::FixedBytes(n), FieldValue::Bytes(v)) => {
            if v.len() != n {
                return Err(SolError::SchemaMismatch(format!(
                    "{schema}.{}: expected {n} bytes, got {}",
                    field.name,
                    v.len()
                )));
            }
            buf.extend_from_slice(v);
        }
        (FieldType::Bytes(prefix), FieldValue::Bytes(v)) => {
            write_prefix(buf, schema, field, prefix, v.len())?;
            buf.extend_from_slice(v);
        }
        (FieldType::Str(prefix), FieldValue::Str(v)) => {
            write_prefix(buf, schema, field, prefix, v.len())?;
            buf.extend_from_slice(v.as_bytes());
        }
        (ty, value) => {
            return Err(SolError::SchemaMismatch(format!(
                "{schema}.{}: declared {ty:?}, got {}",
                field.name,
                value.type_name()
            )))
        }
    }
    Ok(())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    schema: &'static str,
}

impl<'a> Reader<'a> {
    fn take(&mut self, field: &Field, n: usize) -> Result<&'a [u8], SolError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(SolError::SchemaMismatch(format!(
                "{}.{}: needs {n} bytes at offset {}, buffer is {}",
                self.schema,
                field.name,
                self.pos,
                self.data.len()
            ))),
        }
    }

    fn array<const N: usize>(&mut self, field: &Field) -> Result<[u8; N], SolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(field, N)?);
        Ok(out)
    }

    fn prefixed(&mut self, field: &Field, prefix: LengthPrefix) -> Result<&'a [u8], SolError> {
        let len = match prefix {
            LengthPrefix::U32 => u32::from_le_bytes(self.array(field)?) as usize,
            LengthPrefix::U64 => {
                let len = u64::from_le_bytes(self.array(field)?);
                usize::try_from(len).map_err(|_| {
                    SolError::SchemaMismatch(format!(
                        "{}.{}: length {len} does not fit in memory",
                        self.schema, field.name
                    ))
                })?
            }
        };
        self.take(field, len)
    }

    fn read(&mut self, field: &Field) -> Result<FieldValue, SolError> {
        Ok(match field.ty {
            FieldType::U8 => FieldValue::U8(self.array::<1>(field)?[0]),
            FieldType::U16 => FieldValue::U16(u16::from_le_bytes(self.array(field)?)),
            FieldType::U32 => FieldValue::U32(u32::from_le_bytes(self.array(field)?)),
            FieldType::U64 => FieldValue::U64(u64::from_le_bytes(self.array(field)?)),
            FieldType::U128 => FieldValue::U128(u128::from_le_bytes(self.array(field)?)),
            FieldType::I8 => FieldValue::I8(i8::from_le_bytes(self.array(field)?)),
            FieldType::I16 => FieldValue::I16(i16::from_le_bytes(self.array(field)?)),
            FieldType::I32 => FieldValue::I32(i32::from_le_bytes(self.array(field)?)),
            FieldType::I64 => FieldValue::I64(i64::from_le_bytes(self.array(field)?)),
            FieldType::Bool => match self.array::<1>(field)?[0] {
                0 => FieldValue::Bool(false),
                1 => FieldValue::Bool(true),
                other => {
                    return Err(SolError::SchemaMismatch(format!(
                        "{}.{}: invalid bool byte {other}",
                        self.schema, field.name
                    )))
                }
            },
            FieldType::Address => FieldValue::Address(Address::new(self.array(field)?)),
            FieldType::FixedBytes(n) => FieldValue::Bytes(self.take(field, n)?.to_vec()),
            FieldType::Bytes(prefix) => FieldValue::Bytes(self.prefixed(field, prefix)?.to_vec()),
            FieldType::Str(prefix) => {
                let bytes = self.prefixed(field, prefix)?;
                let s = std::str::from_utf8(bytes).map_err(|e| {
                    SolError::SchemaMismatch(format!(
                        "{}.{}: invalid utf-8: {e}",
                        self.schema, field.name
                    ))
                })?;
                FieldValue::Str(s.to_owned())
            }
        })
    }
}
