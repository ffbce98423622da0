//! Self-describing event encoding
//!
//! An event travels as two buffers. The metadata buffer names the event and
//! describes every field; the payload buffer holds the values back to back.
//! A consumer needs nothing else to decode it.
//!
//! ```text
//! metadata: event_name \0 { field_name \0 in_byte [out_byte] }*
//! payload:  { value }*
//! ```
//!
//! `in_byte` is the low byte of the field descriptor. When its bit 7 is set
//! the high byte (the output hint) follows. All integers are little-endian.

use serde::{Deserialize, Serialize};
use strace_common::{Error, FieldType, FieldValue, InType, ProviderId, Result, TraceEvent};
use uuid::Uuid;

/// An event ready for the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedEvent {
    pub provider_name: String,
    pub provider_id: ProviderId,
    pub level: u8,
    pub channel: u8,
    pub keyword: u64,
    pub metadata: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Schema recovered from a metadata buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    pub event_name: String,
    pub fields: Vec<(String, FieldType)>,
}

pub fn encode(event: &TraceEvent) -> Result<EncodedEvent> {
    let mut metadata = Vec::with_capacity(event.event_name.len() + 1 + event.fields.len() * 8);
    push_cstr(&mut metadata, &event.event_name)?;

    let mut payload = Vec::new();
    for field in &event.fields {
        let input = field.field_type.input();
        if !field.value.fits(input) {
            return Err(Error::FieldTypeMismatch {
                field: field.name.clone(),
                expected: input,
            });
        }

        push_cstr(&mut metadata, &field.name)?;
        let descriptor = field.field_type.encode().to_le_bytes();
        metadata.extend_from_slice(&descriptor[..field.field_type.encoded_len()]);

        encode_value(&mut payload, input, &field.value)
            .map_err(|e| Error::Encoding(format!("field '{}': {}", field.name, e)))?;
    }

    Ok(EncodedEvent {
        provider_name: event.provider_name.clone(),
        provider_id: event.provider_id,
        level: event.level,
        channel: event.channel,
        keyword: event.keyword,
        metadata,
        payload,
    })
}

fn push_cstr(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(Error::Encoding(format!("embedded NUL in {:?}", s)));
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(())
}

fn counted_len(len: usize) -> std::result::Result<[u8; 2], String> {
    u16::try_from(len)
        .map(u16::to_le_bytes)
        .map_err(|_| format!("{} bytes exceeds the counted length limit", len))
}

fn sid_len(bytes: &[u8]) -> Option<usize> {
    let sub_authorities = *bytes.get(1)? as usize;
    Some(8 + 4 * sub_authorities)
}

fn encode_value(
    out: &mut Vec<u8>,
    input: InType,
    value: &FieldValue,
) -> std::result::Result<(), String> {
    match (input, value) {
        (InType::Null, _) => {}
        (InType::UnicodeString, FieldValue::Str(s)) => {
            if s.contains('\0') {
                return Err("embedded NUL".to_string());
            }
            for unit in s.encode_utf16().chain(std::iter::once(0)) {
                out.extend_from_slice(&unit.to_le_bytes());
            }
        }
        (InType::AnsiString, FieldValue::Str(s)) => {
            if s.contains('\0') {
                return Err("embedded NUL".to_string());
            }
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        (InType::CountedString, FieldValue::Str(s)) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            out.extend_from_slice(&counted_len(units.len() * 2)?);
            for unit in units {
                out.extend_from_slice(&unit.to_le_bytes());
            }
        }
        (InType::CountedAnsiString, FieldValue::Str(s)) => {
            out.extend_from_slice(&counted_len(s.len())?);
            out.extend_from_slice(s.as_bytes());
        }
        (InType::Int8, FieldValue::I8(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (InType::UInt8, FieldValue::U8(v)) => out.push(*v),
        (InType::UInt8, FieldValue::Bool(v)) => out.push(*v as u8),
        (InType::Int16, FieldValue::I16(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (InType::UInt16, FieldValue::U16(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (InType::Int32, FieldValue::I32(v)) | (InType::HexInt32, FieldValue::I32(v)) => {
            out.extend_from_slice(&v.to_le_bytes())
        }
        (InType::UInt32, FieldValue::U32(v)) | (InType::HexInt32, FieldValue::U32(v)) => {
            out.extend_from_slice(&v.to_le_bytes())
        }
        (InType::Int64, FieldValue::I64(v))
        | (InType::HexInt64 | InType::Pointer | InType::Filetime, FieldValue::I64(v)) => {
            out.extend_from_slice(&v.to_le_bytes())
        }
        (InType::UInt64, FieldValue::U64(v))
        | (InType::HexInt64 | InType::Pointer | InType::Filetime, FieldValue::U64(v)) => {
            out.extend_from_slice(&v.to_le_bytes())
        }
        (InType::Float, FieldValue::F32(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (InType::Double, FieldValue::F64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (InType::Bool32, FieldValue::Bool(v)) => out.extend_from_slice(&(*v as u32).to_le_bytes()),
        (InType::Binary, FieldValue::Bytes(bytes)) => {
            out.extend_from_slice(&counted_len(bytes.len())?);
            out.extend_from_slice(bytes);
        }
        (InType::Sid, FieldValue::Bytes(bytes)) => {
            if sid_len(bytes) != Some(bytes.len()) {
                return Err(format!("malformed SID of {} bytes", bytes.len()));
            }
            out.extend_from_slice(bytes);
        }
        (InType::Guid, FieldValue::Guid(guid)) => out.extend_from_slice(&guid.to_bytes_le()),
        (InType::SystemTime, FieldValue::SystemTime(words)) => {
            for word in words {
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
        (input, value) => return Err(format!("{:?} cannot carry {:?}", input, value)),
    }
    Ok(())
}

/// Byte cursor used while decoding
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| Error::Encoding(format!("truncated at offset {}", self.pos)))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        self.array().map(u16::from_le_bytes)
    }

    fn cstr(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::Encoding("unterminated string".to_string()))?;
        let s = String::from_utf8(rest[..len].to_vec())
            .map_err(|e| Error::Encoding(e.to_string()))?;
        self.pos += len + 1;
        Ok(s)
    }

    fn wide_cstr(&mut self) -> Result<String> {
        let mut units = Vec::new();
        loop {
            let unit = self.u16()?;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        String::from_utf16(&units).map_err(|e| Error::Encoding(e.to_string()))
    }
}

pub fn decode_metadata(metadata: &[u8]) -> Result<EventMetadata> {
    let mut reader = Reader::new(metadata);
    let event_name = reader.cstr()?;

    let mut fields = Vec::new();
    while !reader.is_empty() {
        let name = reader.cstr()?;
        let low = reader.u8()? as u16;
        let raw = if low & 0x80 != 0 {
            low | (reader.u8()? as u16) << 8
        } else {
            low
        };
        fields.push((name, FieldType::decode(raw)?));
    }

    Ok(EventMetadata { event_name, fields })
}

pub fn decode_payload(metadata: &EventMetadata, payload: &[u8]) -> Result<Vec<FieldValue>> {
    let mut reader = Reader::new(payload);
    let mut values = Vec::with_capacity(metadata.fields.len());

    for (_, field_type) in &metadata.fields {
        values.push(decode_value(&mut reader, field_type.input())?);
    }

    if !reader.is_empty() {
        return Err(Error::Encoding(format!(
            "{} trailing payload bytes",
            payload.len() - reader.pos
        )));
    }
    Ok(values)
}

fn decode_value(reader: &mut Reader<'_>, input: InType) -> Result<FieldValue> {
    let value = match input {
        InType::Null => FieldValue::Null,
        InType::UnicodeString => FieldValue::Str(reader.wide_cstr()?),
        InType::AnsiString => FieldValue::Str(reader.cstr()?),
        InType::CountedString => {
            let len = reader.u16()? as usize;
            let units: Vec<u16> = reader
                .take(len)?
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            FieldValue::Str(String::from_utf16(&units).map_err(|e| Error::Encoding(e.to_string()))?)
        }
        InType::CountedAnsiString => {
            let len = reader.u16()? as usize;
            let bytes = reader.take(len)?.to_vec();
            FieldValue::Str(String::from_utf8(bytes).map_err(|e| Error::Encoding(e.to_string()))?)
        }
        InType::Int8 => FieldValue::I8(reader.u8()? as i8),
        InType::UInt8 => FieldValue::U8(reader.u8()?),
        InType::Int16 => FieldValue::I16(i16::from_le_bytes(reader.array()?)),
        InType::UInt16 => FieldValue::U16(reader.u16()?),
        InType::Int32 => FieldValue::I32(i32::from_le_bytes(reader.array()?)),
        InType::UInt32 | InType::HexInt32 => FieldValue::U32(u32::from_le_bytes(reader.array()?)),
        InType::Int64 => FieldValue::I64(i64::from_le_bytes(reader.array()?)),
        InType::UInt64 | InType::HexInt64 | InType::Pointer | InType::Filetime => {
            FieldValue::U64(u64::from_le_bytes(reader.array()?))
        }
        InType::Float => FieldValue::F32(f32::from_le_bytes(reader.array()?)),
        InType::Double => FieldValue::F64(f64::from_le_bytes(reader.array()?)),
        InType::Bool32 => FieldValue::Bool(u32::from_le_bytes(reader.array()?) != 0),
        InType::Binary => {
            let len = reader.u16()? as usize;
            FieldValue::Bytes(reader.take(len)?.to_vec())
        }
        InType::Sid => {
            let header = reader.array::<8>()?;
            let extra = 4 * header[1] as usize;
            let mut bytes = header.to_vec();
            bytes.extend_from_slice(reader.take(extra)?);
            FieldValue::Bytes(bytes)
        }
        InType::Guid => FieldValue::Guid(Uuid::from_bytes_le(reader.array()?)),
        InType::SystemTime => {
            let mut words = [0u16; 8];
            for word in words.iter_mut() {
                *word = reader.u16()?;
            }
            FieldValue::SystemTime(words)
        }
    };
    Ok(value)
}
