//! Structured event types
//!
//! Values a plugin attaches to a trace event, the event itself, and the raw
//! header the host delivers to provider-level callbacks.

use super::field::{FieldType, InType};
use super::provider::ProviderId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity passed to the host's log print capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum LogLevel {
    Debug = 0x10,
    Info = 0x20,
    Warn = 0x40,
    Error = 0x80,
}

impl LogLevel {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x10 => Some(LogLevel::Debug),
            0x20 => Some(LogLevel::Info),
            0x40 => Some(LogLevel::Warn),
            0x80 => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Standard trace event levels
pub mod level {
    pub const ALWAYS: u8 = 0;
    pub const CRITICAL: u8 = 1;
    pub const ERROR: u8 = 2;
    pub const WARNING: u8 = 3;
    pub const INFO: u8 = 4;
    pub const VERBOSE: u8 = 5;
}

/// A single field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    /// Text; the descriptor decides narrow, wide or counted encoding
    Str(String),
    /// Raw bytes for `Binary` and `Sid` fields
    Bytes(Vec<u8>),
    Guid(Uuid),
    /// SYSTEMTIME words: year, month, day-of-week, day, hour, minute, second, ms
    SystemTime([u16; 8]),
}

impl FieldValue {
    /// Whether this value can be carried by a field of the given input type
    pub fn fits(&self, input: InType) -> bool {
        match input {
            InType::Null => matches!(self, FieldValue::Null),
            InType::UnicodeString
            | InType::AnsiString
            | InType::CountedString
            | InType::CountedAnsiString => matches!(self, FieldValue::Str(_)),
            InType::Int8 => matches!(self, FieldValue::I8(_)),
            InType::UInt8 => matches!(self, FieldValue::U8(_) | FieldValue::Bool(_)),
            InType::Int16 => matches!(self, FieldValue::I16(_)),
            InType::UInt16 => matches!(self, FieldValue::U16(_)),
            InType::Int32 => matches!(self, FieldValue::I32(_)),
            InType::UInt32 => matches!(self, FieldValue::U32(_)),
            InType::HexInt32 => matches!(self, FieldValue::U32(_) | FieldValue::I32(_)),
            InType::Int64 => matches!(self, FieldValue::I64(_)),
            InType::UInt64 => matches!(self, FieldValue::U64(_)),
            InType::HexInt64 | InType::Pointer | InType::Filetime => {
                matches!(self, FieldValue::U64(_) | FieldValue::I64(_))
            }
            InType::Float => matches!(self, FieldValue::F32(_)),
            InType::Double => matches!(self, FieldValue::F64(_)),
            InType::Bool32 => matches!(self, FieldValue::Bool(_)),
            InType::Binary | InType::Sid => matches!(self, FieldValue::Bytes(_)),
            InType::Guid => matches!(self, FieldValue::Guid(_)),
            InType::SystemTime => matches!(self, FieldValue::SystemTime(_)),
        }
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::U8(v)
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::U16(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::U32(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::U64(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::I32(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::I64(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<Uuid> for FieldValue {
    fn from(v: Uuid) -> Self {
        FieldValue::Guid(v)
    }
}

/// One named, typed field of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventField {
    pub name: String,
    pub field_type: FieldType,
    pub value: FieldValue,
}

impl EventField {
    pub fn new(name: impl Into<String>, field_type: FieldType, value: impl Into<FieldValue>) -> Self {
        Self {
            name: name.into(),
            field_type,
            value: value.into(),
        }
    }
}

/// A structured event a plugin asks the host to emit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub provider_name: String,
    pub provider_id: ProviderId,
    pub event_name: String,
    pub level: u8,
    pub channel: u8,
    pub keyword: u64,
    pub fields: Vec<EventField>,
}

impl TraceEvent {
    pub fn new(
        provider_name: impl Into<String>,
        provider_id: ProviderId,
        event_name: impl Into<String>,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            provider_id,
            event_name: event_name.into(),
            level: level::INFO,
            channel: 0,
            keyword: 0,
            fields: Vec::new(),
        }
    }

    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_keyword(mut self, keyword: u64) -> Self {
        self.keyword = keyword;
        self
    }

    pub fn field(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        value: impl Into<FieldValue>,
    ) -> Self {
        self.fields.push(EventField::new(name, field_type, value));
        self
    }
}

/// Identity of a delivered provider event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub id: u16,
    pub version: u8,
    pub channel: u8,
    pub level: u8,
    pub opcode: u8,
    pub task: u16,
    pub keyword: u64,
}

/// Header of a provider event as delivered by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    pub size: u16,
    pub flags: u16,
    pub thread_id: u32,
    pub process_id: u32,
    pub timestamp: i64,
    pub provider_id: ProviderId,
    pub descriptor: EventDescriptor,
}

impl EventHeader {
    pub fn new(provider_id: ProviderId, descriptor: EventDescriptor) -> Self {
        Self {
            size: std::mem::size_of::<EventHeader>() as u16,
            flags: 0,
            thread_id: 0,
            process_id: 0,
            timestamp: 0,
            provider_id,
            descriptor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_values() {
        assert_eq!(LogLevel::Debug as u32, 0x10);
        assert_eq!(LogLevel::Info as u32, 0x20);
        assert_eq!(LogLevel::Warn as u32, 0x40);
        assert_eq!(LogLevel::Error as u32, 0x80);
        assert_eq!(LogLevel::from_u32(0x40), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_u32(0x30), None);
    }

    #[test]
    fn test_fits_integers() {
        assert!(FieldValue::U32(4).fits(InType::UInt32));
        assert!(FieldValue::U32(4).fits(InType::HexInt32));
        assert!(!FieldValue::U32(4).fits(InType::UInt64));
        assert!(FieldValue::U64(0x1000).fits(InType::Pointer));
        assert!(!FieldValue::I8(-1).fits(InType::UInt8));
    }

    #[test]
    fn test_fits_strings_and_bytes() {
        let s = FieldValue::from("C:\\Windows");
        assert!(s.fits(InType::AnsiString));
        assert!(s.fits(InType::UnicodeString));
        assert!(s.fits(InType::CountedString));
        assert!(!s.fits(InType::Binary));

        let b = FieldValue::Bytes(vec![1, 2, 3]);
        assert!(b.fits(InType::Binary));
        assert!(b.fits(InType::Sid));
        assert!(!b.fits(InType::AnsiString));
    }

    #[test]
    fn test_boolean_field_accepts_bool() {
        assert!(FieldValue::Bool(true).fits(FieldType::BOOLEAN.input()));
        assert!(FieldValue::Bool(true).fits(FieldType::BOOL.input()));
    }

    #[test]
    fn test_trace_event_builder() {
        let provider = ProviderId::from_fields(1, 2, 3, [4; 8]);
        let event = TraceEvent::new("STrace", provider, "FileOpen")
            .with_level(level::VERBOSE)
            .with_keyword(0x10)
            .field("pid", FieldType::PID, 1234u32)
            .field("path", FieldType::WIDE_STRING, "C:\\a.txt");

        assert_eq!(event.level, level::VERBOSE);
        assert_eq!(event.keyword, 0x10);
        assert_eq!(event.fields.len(), 2);
        assert_eq!(event.fields[0].value, FieldValue::U32(1234));
    }

    #[test]
    fn test_event_serialization() {
        let provider = ProviderId::from_fields(1, 2, 3, [4; 8]);
        let event = TraceEvent::new("STrace", provider, "Test").field("x", FieldType::UINT64, 7u64);
        let json = serde_json::to_string(&event).unwrap();
        let parsed: TraceEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
