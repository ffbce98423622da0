//! Event field type descriptors
//!
//! A descriptor tells a trace consumer how to read one field of an event
//! payload (the input type) and how to render it (the output hint). The
//! encoded form is positional and must stay bit-exact:
//!
//! ```text
//!  15            8   7   6           0
//! +---------------+---+---------------+
//! |  output hint  | 1 |  input type   |
//! +---------------+---+---------------+
//! ```
//!
//! Descriptors without an output hint are the bare input byte with bit 7
//! clear, which is how a consumer knows no second byte follows.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Marker bit that flags a trailing output-hint byte
pub const OUT_TYPE_MARKER: u16 = 0x80;

/// Mask for the input type inside the low byte
const IN_TYPE_MASK: u16 = 0x7F;

/// Wire representation of a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum InType {
    Null = 0,
    UnicodeString = 1,
    AnsiString = 2,
    Int8 = 3,
    UInt8 = 4,
    Int16 = 5,
    UInt16 = 6,
    Int32 = 7,
    UInt32 = 8,
    Int64 = 9,
    UInt64 = 10,
    Float = 11,
    Double = 12,
    Bool32 = 13,
    Binary = 14,
    Guid = 15,
    Pointer = 16,
    Filetime = 17,
    SystemTime = 18,
    Sid = 19,
    HexInt32 = 20,
    HexInt64 = 21,
    CountedString = 22,
    CountedAnsiString = 23,
}

impl InType {
    const ALL: [InType; 24] = [
        InType::Null,
        InType::UnicodeString,
        InType::AnsiString,
        InType::Int8,
        InType::UInt8,
        InType::Int16,
        InType::UInt16,
        InType::Int32,
        InType::UInt32,
        InType::Int64,
        InType::UInt64,
        InType::Float,
        InType::Double,
        InType::Bool32,
        InType::Binary,
        InType::Guid,
        InType::Pointer,
        InType::Filetime,
        InType::SystemTime,
        InType::Sid,
        InType::HexInt32,
        InType::HexInt64,
        InType::CountedString,
        InType::CountedAnsiString,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Size of the value on the wire, `None` for variable-length types
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            InType::Null => Some(0),
            InType::Int8 | InType::UInt8 => Some(1),
            InType::Int16 | InType::UInt16 => Some(2),
            InType::Int32
            | InType::UInt32
            | InType::HexInt32
            | InType::Float
            | InType::Bool32 => Some(4),
            InType::Int64
            | InType::UInt64
            | InType::HexInt64
            | InType::Double
            | InType::Pointer
            | InType::Filetime => Some(8),
            InType::Guid | InType::SystemTime => Some(16),
            InType::UnicodeString
            | InType::AnsiString
            | InType::Binary
            | InType::Sid
            | InType::CountedString
            | InType::CountedAnsiString => None,
        }
    }

    pub fn is_string(self) -> bool {
        matches!(
            self,
            InType::UnicodeString
                | InType::AnsiString
                | InType::CountedString
                | InType::CountedAnsiString
        )
    }
}

/// Display hint for a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OutType {
    Null = 0,
    NoPrint = 1,
    String = 2,
    Boolean = 3,
    Hex = 4,
    Pid = 5,
    Tid = 6,
    Port = 7,
    IpV4 = 8,
    IpV6 = 9,
    SocketAddress = 10,
    Xml = 11,
    Json = 12,
    Win32Error = 13,
    Ntstatus = 14,
    Hresult = 15,
    Filetime = 16,
    Signed = 17,
    Unsigned = 18,
}

impl OutType {
    const ALL: [OutType; 19] = [
        OutType::Null,
        OutType::NoPrint,
        OutType::String,
        OutType::Boolean,
        OutType::Hex,
        OutType::Pid,
        OutType::Tid,
        OutType::Port,
        OutType::IpV4,
        OutType::IpV6,
        OutType::SocketAddress,
        OutType::Xml,
        OutType::Json,
        OutType::Win32Error,
        OutType::Ntstatus,
        OutType::Hresult,
        OutType::Filetime,
        OutType::Signed,
        OutType::Unsigned,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }
}

/// Packs an input type and an output hint into a descriptor
pub const fn compose(input: InType, output: OutType) -> u16 {
    input as u16 | OUT_TYPE_MARKER | (output as u16) << 8
}

/// Type of a single event field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Input type only, rendered with the consumer's default
    Plain(InType),
    /// Input type with an explicit display hint
    Formatted { input: InType, output: OutType },
}

impl FieldType {
    pub const INT8: FieldType = FieldType::Plain(InType::Int8);
    pub const UINT8: FieldType = FieldType::Plain(InType::UInt8);
    pub const INT16: FieldType = FieldType::Plain(InType::Int16);
    pub const UINT16: FieldType = FieldType::Plain(InType::UInt16);
    pub const INT32: FieldType = FieldType::Plain(InType::Int32);
    pub const UINT32: FieldType = FieldType::Plain(InType::UInt32);
    pub const INT64: FieldType = FieldType::Plain(InType::Int64);
    pub const UINT64: FieldType = FieldType::Plain(InType::UInt64);
    pub const FLOAT32: FieldType = FieldType::Plain(InType::Float);
    pub const FLOAT64: FieldType = FieldType::Plain(InType::Double);
    pub const BOOL: FieldType = FieldType::Plain(InType::Bool32);
    pub const GUID: FieldType = FieldType::Plain(InType::Guid);
    pub const POINTER: FieldType = FieldType::Plain(InType::Pointer);
    pub const FILETIME: FieldType = FieldType::Plain(InType::Filetime);
    pub const SYSTEM_TIME: FieldType = FieldType::Plain(InType::SystemTime);
    pub const HEX_INT8: FieldType = FieldType::formatted(InType::UInt8, OutType::Hex);
    pub const HEX_UINT8: FieldType = FieldType::formatted(InType::UInt8, OutType::Hex);
    pub const HEX_INT32: FieldType = FieldType::Plain(InType::HexInt32);
    pub const HEX_UINT32: FieldType = FieldType::Plain(InType::HexInt32);
    pub const HEX_INT64: FieldType = FieldType::Plain(InType::HexInt64);
    pub const HEX_UINT64: FieldType = FieldType::Plain(InType::HexInt64);
    pub const WCHAR: FieldType = FieldType::formatted(InType::UInt16, OutType::String);
    pub const CHAR: FieldType = FieldType::formatted(InType::UInt8, OutType::String);
    pub const BOOLEAN: FieldType = FieldType::formatted(InType::UInt8, OutType::Boolean);
    pub const HEX_INT16: FieldType = FieldType::formatted(InType::UInt16, OutType::Hex);
    pub const HEX_UINT16: FieldType = FieldType::formatted(InType::UInt16, OutType::Hex);
    pub const PID: FieldType = FieldType::formatted(InType::UInt32, OutType::Pid);
    pub const TID: FieldType = FieldType::formatted(InType::UInt32, OutType::Tid);
    pub const PORT: FieldType = FieldType::formatted(InType::UInt16, OutType::Port);
    pub const WIN_ERROR: FieldType = FieldType::formatted(InType::UInt32, OutType::Win32Error);
    pub const NTSTATUS: FieldType = FieldType::formatted(InType::UInt32, OutType::Ntstatus);
    pub const HRESULT: FieldType = FieldType::formatted(InType::Int32, OutType::Hresult);
    pub const STRING: FieldType = FieldType::Plain(InType::AnsiString);
    pub const WIDE_STRING: FieldType = FieldType::Plain(InType::UnicodeString);
    pub const COUNTED_STRING: FieldType = FieldType::Plain(InType::CountedAnsiString);
    // Deliberately the same value as COUNTED_STRING; consumers key on it.
    pub const COUNTED_WIDE_STRING: FieldType = FieldType::COUNTED_STRING;
    pub const ANSI_STRING: FieldType = FieldType::Plain(InType::CountedAnsiString);
    pub const UNICODE_STRING: FieldType = FieldType::Plain(InType::CountedString);
    pub const BINARY: FieldType = FieldType::Plain(InType::Binary);
    pub const SOCKET_ADDRESS: FieldType =
        FieldType::formatted(InType::Binary, OutType::SocketAddress);
    pub const SID: FieldType = FieldType::Plain(InType::Sid);

    pub const fn formatted(input: InType, output: OutType) -> Self {
        FieldType::Formatted { input, output }
    }

    pub const fn input(self) -> InType {
        match self {
            FieldType::Plain(input) => input,
            FieldType::Formatted { input, .. } => input,
        }
    }

    /// Output hint, `OutType::Null` when none was given
    pub const fn output(self) -> OutType {
        match self {
            FieldType::Plain(_) => OutType::Null,
            FieldType::Formatted { output, .. } => output,
        }
    }

    pub const fn encode(self) -> u16 {
        match self {
            FieldType::Plain(input) => input as u16,
            FieldType::Formatted { input, output } => compose(input, output),
        }
    }

    /// Number of descriptor bytes a consumer reads for this field
    pub const fn encoded_len(self) -> usize {
        match self {
            FieldType::Plain(_) => 1,
            FieldType::Formatted { .. } => 2,
        }
    }

    pub fn decode(raw: u16) -> Result<Self> {
        let input = InType::from_u8((raw & IN_TYPE_MASK) as u8)
            .ok_or(Error::InvalidFieldType(raw))?;

        if raw & OUT_TYPE_MARKER == 0 {
            if raw >> 8 != 0 {
                return Err(Error::InvalidFieldType(raw));
            }
            return Ok(FieldType::Plain(input));
        }

        let output = OutType::from_u8((raw >> 8) as u8).ok_or(Error::InvalidFieldType(raw))?;
        Ok(FieldType::Formatted { input, output })
    }
}

impl From<InType> for FieldType {
    fn from(input: InType) -> Self {
        FieldType::Plain(input)
    }
}

impl From<FieldType> for u16 {
    fn from(field: FieldType) -> Self {
        field.encode()
    }
}

impl TryFrom<u16> for FieldType {
    type Error = Error;

    fn try_from(raw: u16) -> Result<Self> {
        FieldType::decode(raw)
    }
}
