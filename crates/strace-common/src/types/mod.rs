//! Common types shared by plugins and hosts
//!
//! - `status` - NTSTATUS codes returned across the plugin/host boundary
//! - `field` - Bit-packed event field type descriptors
//! - `event` - Field values, trace events, provider event headers, log levels
//! - `provider` - Provider identifiers

pub mod event;
pub mod field;
pub mod provider;
pub mod status;

pub use event::*;
pub use field::*;
pub use provider::*;
pub use status::*;
