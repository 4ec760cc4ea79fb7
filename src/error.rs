//! Error types for the guest emulation layer.
//!
//! Only **load-time** failures surface through this enum: boot-image parse
//! errors, lifecycle misuse, and host-side configuration problems. Syscall
//! failures never appear here — they follow the negative-errno convention
//! and reach the guest as `i32` codes (see [`crate::abi`]).

use crate::guest::GuestState;

/// Result type alias for guest layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the guest emulation layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Boot Image Errors
    // =========================================================================
    /// Boot image magic bytes do not match `ANDROID!`.
    #[error("bad boot image magic: expected ANDROID!, found {found:02x?}")]
    BadMagic { found: [u8; 8] },

    /// Buffer is smaller than the minimum header size for its version.
    #[error("boot image too short: {len} bytes, need at least {need}")]
    TooShort { len: usize, need: usize },

    /// Header version is outside the supported 0..=4 range.
    #[error("unsupported boot header version {version} (supported: 0..=4)")]
    UnsupportedVersion { version: u32 },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// Operation attempted in a state that does not permit it.
    #[error("guest is in state '{state}', operation '{operation}' requires '{expected}'")]
    InvalidState {
        state: GuestState,
        operation: &'static str,
        expected: &'static str,
    },

    /// No kernel has been loaded, so the guest cannot start.
    #[error("cannot start guest: no kernel image loaded")]
    NoKernel,

    // =========================================================================
    // Property Store Errors
    // =========================================================================
    /// Property key or value violates the Android property limits.
    #[error("property '{key}' rejected: {reason}")]
    InvalidProperty { key: String, reason: &'static str },

    /// Property table is full.
    #[error("property table full ({capacity} entries)")]
    PropertyTableFull { capacity: usize },

    // =========================================================================
    // Image Buffer Errors
    // =========================================================================
    /// Supplied image exceeds the per-image size bound.
    #[error("{image} image too large: {size} > {limit} bytes")]
    ImageTooLarge {
        image: &'static str,
        size: usize,
        limit: usize,
    },

    // =========================================================================
    // Serialization Errors
    // =========================================================================
    /// Status snapshot serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
