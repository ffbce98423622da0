//! Error types for STrace plugins and hosts
//!
//! Every error maps onto the `NtStatus` that would cross the plugin/host
//! boundary. Plugins must treat that status as opaque.

use crate::types::{InType, NtStatus, ProviderId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown syscall: {0}")]
    UnknownSyscall(String),

    #[error("Syscall already has a callback: {0}")]
    AlreadyRegistered(String),

    #[error("No callback registered for: {0}")]
    NotRegistered(String),

    #[error("No callback registered for provider {0}")]
    UnknownProvider(ProviderId),

    #[error("Provider already has a callback: {0}")]
    ProviderAlreadyRegistered(ProviderId),

    #[error("TLS slot {slot} out of range (plugin owns {count})")]
    TlsSlotOutOfRange { slot: u8, count: u8 },

    #[error("Not enough TLS slots: requested {requested}, {available} available")]
    TlsExhausted { requested: u8, available: u8 },

    #[error("No TLS data for the current thread")]
    TlsUnavailable,

    #[error("Invalid field type descriptor: {0:#06x}")]
    InvalidFieldType(u16),

    #[error("Field '{field}' does not fit input type {expected:?}")]
    FieldTypeMismatch { field: String, expected: InType },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Register array has no redirect slot ({0} slots)")]
    RedirectSlotMissing(usize),

    #[error("Plugin not found: {0}")]
    PluginNotFound(u32),

    #[error("Plugin initialization failed: {0}")]
    Initialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Host returned {0}")]
    Status(NtStatus),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Status code reported across the plugin/host boundary
    pub fn status(&self) -> NtStatus {
        match self {
            Error::UnknownSyscall(_) => NtStatus::OBJECT_NAME_NOT_FOUND,
            Error::AlreadyRegistered(_) | Error::ProviderAlreadyRegistered(_) => {
                NtStatus::OBJECT_NAME_COLLISION
            }
            Error::NotRegistered(_) | Error::UnknownProvider(_) | Error::PluginNotFound(_) => {
                NtStatus::NOT_FOUND
            }
            Error::TlsSlotOutOfRange { .. }
            | Error::InvalidFieldType(_)
            | Error::FieldTypeMismatch { .. }
            | Error::Encoding(_)
            | Error::Config(_)
            | Error::Serialization(_) => NtStatus::INVALID_PARAMETER,
            Error::TlsExhausted { .. } => NtStatus::INSUFFICIENT_RESOURCES,
            Error::RedirectSlotMissing(_) => NtStatus::NOT_SUPPORTED,
            Error::Status(status) => *status,
            Error::TlsUnavailable | Error::Initialization(_) | Error::Internal(_) => {
                NtStatus::UNSUCCESSFUL
            }
        }
    }
}

impl From<NtStatus> for Error {
    fn from(status: NtStatus) -> Self {
        Error::Status(status)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_syscall_display_and_status() {
        let err = Error::UnknownSyscall("OpenFile".to_string());
        assert!(err.to_string().contains("OpenFile"));
        assert_eq!(err.status(), NtStatus::OBJECT_NAME_NOT_FOUND);
    }

    #[test]
    fn test_collision_status() {
        let err = Error::AlreadyRegistered("OpenFile".to_string());
        assert_eq!(err.status(), NtStatus::OBJECT_NAME_COLLISION);
        assert!(!err.status().is_success());
    }

    #[test]
    fn test_invalid_field_type_display() {
        let err = Error::InvalidFieldType(0x1388);
        assert!(err.to_string().contains("0x1388"));
    }

    #[test]
    fn test_tls_errors() {
        let err = Error::TlsSlotOutOfRange { slot: 9, count: 4 };
        let msg = err.to_string();
        assert!(msg.contains('9'));
        assert!(msg.contains('4'));
        assert_eq!(
            Error::TlsExhausted {
                requested: 8,
                available: 2
            }
            .status(),
            NtStatus::INSUFFICIENT_RESOURCES
        );
    }

    #[test]
    fn test_status_round_trip() {
        let err: Error = NtStatus::ACCESS_VIOLATION.into();
        assert_eq!(err.status(), NtStatus::ACCESS_VIOLATION);
        assert!(err.to_string().contains("0xc0000005"));
    }

    #[test]
    fn test_json_error_is_invalid_parameter() {
        let err: Error = serde_json::from_str::<NtStatus>("\"STATUS_SUCCESS\"")
            .unwrap_err()
            .into();
        assert!(err.to_string().starts_with("Serialization error"));
        assert_eq!(err.status(), NtStatus::INVALID_PARAMETER);
    }

    #[test]
    fn test_from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: Error = toml_err.into();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.status(), NtStatus::INVALID_PARAMETER);
    }

    #[test]
    fn test_question_mark_carries_status() {
        fn claim() -> Result<()> {
            let host: std::result::Result<(), NtStatus> = Err(NtStatus::OBJECT_NAME_COLLISION);
            host?;
            Ok(())
        }
        let err = claim().unwrap_err();
        assert!(matches!(err, Error::Status(_)));
        assert_eq!(err.status(), NtStatus::OBJECT_NAME_COLLISION);
        assert_eq!(
            Error::ProviderAlreadyRegistered(ProviderId::from_fields(1, 2, 3, [4; 8])).status(),
            err.status()
        );
    }
}
