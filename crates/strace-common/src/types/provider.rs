//! Trace provider identifiers

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique identifier of an event provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub Uuid);

impl ProviderId {
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Builds an id from the `GUID` struct fields as they appear in C headers
    pub const fn from_fields(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self(Uuid::from_fields(data1, data2, data3, &data4))
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// In-memory `GUID` layout (first three groups little-endian)
    pub fn to_guid_bytes(&self) -> [u8; 16] {
        self.0.to_bytes_le()
    }

    pub fn from_guid_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes_le(bytes))
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}}", self.0.hyphenated())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim_start_matches('{').trim_end_matches('}');
        Uuid::parse_str(trimmed).map(ProviderId)
    }
}

impl From<Uuid> for ProviderId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
