//! NTSTATUS values crossing the plugin/host boundary

use serde::{Deserialize, Serialize};

/// Status code returned by every capability call
///
/// Negative values are failures, everything else (including informational
/// codes) counts as success, matching `NT_SUCCESS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NtStatus(pub i32);

impl NtStatus {
    pub const SUCCESS: NtStatus = NtStatus(0);
    pub const UNSUCCESSFUL: NtStatus = NtStatus(0xC000_0001_u32 as i32);
    pub const ACCESS_VIOLATION: NtStatus = NtStatus(0xC000_0005_u32 as i32);
    pub const INVALID_PARAMETER: NtStatus = NtStatus(0xC000_000D_u32 as i32);
    pub const OBJECT_NAME_NOT_FOUND: NtStatus = NtStatus(0xC000_0034_u32 as i32);
    pub const OBJECT_NAME_COLLISION: NtStatus = NtStatus(0xC000_0035_u32 as i32);
    pub const INSUFFICIENT_RESOURCES: NtStatus = NtStatus(0xC000_009A_u32 as i32);
    pub const NOT_SUPPORTED: NtStatus = NtStatus(0xC000_00BB_u32 as i32);
    pub const NOT_FOUND: NtStatus = NtStatus(0xC000_0225_u32 as i32);

    /// Equivalent of the `NT_SUCCESS` macro
    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }

    /// Raw value as the unsigned form usually printed in dumps
    pub const fn as_u32(self) -> u32 {
        self.0 as u32
    }

    /// Converts a status into a `Result`, keeping the failing code
    pub fn ok(self) -> std::result::Result<(), NtStatus> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl Default for NtStatus {
    fn default() -> Self {
        NtStatus::SUCCESS
    }
}

impl std::fmt::Display for NtStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.as_u32())
    }
}

impl From<u32> for NtStatus {
    fn from(value: u32) -> Self {
        NtStatus(value as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_classification() {
        assert!(NtStatus::SUCCESS.is_success());
        // STATUS_PENDING is informational, still a success
        assert!(NtStatus::from(0x0000_0103).is_success());
        assert!(!NtStatus::UNSUCCESSFUL.is_success());
        assert!(!NtStatus::NOT_FOUND.is_success());
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(NtStatus::ACCESS_VIOLATION.to_string(), "0xc0000005");
        assert_eq!(NtStatus::SUCCESS.to_string(), "0x00000000");
    }

    #[test]
    fn test_ok_conversion() {
        assert!(NtStatus::SUCCESS.ok().is_ok());
        assert_eq!(
            NtStatus::OBJECT_NAME_COLLISION.ok(),
            Err(NtStatus::OBJECT_NAME_COLLISION)
        );
    }
}
