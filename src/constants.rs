//! # Guest Resource Constants
//!
//! Defines the capacities, memory windows, and size limits for the guest
//! emulation layer. These constants are the **single source of truth** for
//! every bound the syscall surface exposes to guest code.
//!
//! ## Modification Guidelines
//!
//! Table capacities are guest-visible: a guest that opens descriptors until
//! `EMFILE` observes [`MAX_DESCRIPTORS`] directly. Changing a capacity here
//! changes guest-observable ABI behavior, so update the dispatch tests
//! alongside any change.
//!
//! ## Cross-References
//!
//! - [`crate::tables`]: table capacities
//! - [`crate::arena`]: heap window and page size
//! - [`crate::bootimg`]: header page sizes and default load addresses
//! - [`crate::props`]: property table bounds

// =============================================================================
// Resource Table Capacities
// =============================================================================
//
// All tables are fixed-capacity arrays with linear first-free allocation.
// Capacities are small enough that the scan cost is negligible and large
// enough for the workloads the emulated runtime hosts.
// =============================================================================

/// Maximum open descriptors per guest, including the three standard streams.
///
/// A guest exhausting this table receives `EMFILE` from `open`/`dup`/`pipe2`,
/// matching the behavior of a real per-process fd limit.
pub const MAX_DESCRIPTORS: usize = 64;

/// Number of descriptor slots reserved for stdin/stdout/stderr.
///
/// Slots `0..RESERVED_DESCRIPTORS` are populated at table construction and
/// can never be allocated or released.
pub const RESERVED_DESCRIPTORS: usize = 3;

/// Maximum bookkeeping thread entries per guest.
///
/// `fork`/`clone` fail with `EAGAIN` once this is reached. Entries are
/// bookkeeping only; no host threads back them.
pub const MAX_THREADS: usize = 128;

/// Maximum tracked futex words per guest.
pub const MAX_FUTEXES: usize = 64;

/// Maximum sockets per guest.
pub const MAX_SOCKETS: usize = 32;

/// Maximum epoll sets per guest.
pub const MAX_EPOLL_SETS: usize = 16;

/// Maximum watched descriptors per epoll set.
pub const MAX_EPOLL_WATCHES: usize = 32;

// =============================================================================
// Heap Window
// =============================================================================
//
// The guest heap is a bump-pointer window inside the engine's flat memory.
// brk and zero-hint mmap both draw from it; the ceiling is the hard bound
// that turns allocation failures into ENOMEM.
// =============================================================================

/// Base of the guest heap window.
pub const HEAP_BASE: u32 = 0x0800_0000;

/// Exclusive ceiling of the guest heap window (64 MiB above the base).
pub const HEAP_CEILING: u32 = 0x0C00_0000;

/// Page size used for heap alignment and mmap rounding.
pub const PAGE_SIZE: u32 = 4096;

/// Maximum simultaneously registered mmap regions.
///
/// Bounds the mapping registry so a guest looping on `mmap` cannot grow
/// host-side bookkeeping without bound.
pub const MAX_MAPPINGS: usize = 256;

// =============================================================================
// Console
// =============================================================================

/// Capacity of the console capture buffer.
///
/// Writes past this are truncated, not failed: the guest still sees its
/// full requested byte count so console-heavy code keeps making progress.
pub const CONSOLE_CAPACITY: usize = 64 * 1024;

// =============================================================================
// Boot Images
// =============================================================================

/// Magic bytes at offset 0 of every boot image header.
pub const BOOT_MAGIC: &[u8; 8] = b"ANDROID!";

/// Page size fixed by the v3/v4 (GKI) header layout.
pub const GKI_PAGE_SIZE: u32 = 4096;

/// Default page size for legacy headers that declare 0.
pub const LEGACY_DEFAULT_PAGE_SIZE: u32 = 2048;

/// Default kernel load address for GKI images.
///
/// GKI headers carry no load addresses; this default matches the flat
/// memory window the engine exposes. Override via
/// [`ParseOptions`](crate::bootimg::ParseOptions) when the engine maps
/// memory differently.
pub const GKI_KERNEL_LOAD_ADDR: u32 = 0x0008_0000;

/// Default ramdisk load address for GKI images (see [`GKI_KERNEL_LOAD_ADDR`]).
pub const GKI_RAMDISK_LOAD_ADDR: u32 = 0x0100_0000;

/// Maximum accepted size for any loaded image buffer (kernel, ramdisk,
/// system, data): 512 MiB.
pub const MAX_IMAGE_SIZE: usize = 512 * 1024 * 1024;

/// Maximum bytes of command line preserved from a parsed header.
pub const MAX_CMDLINE_LEN: usize = 511;

// =============================================================================
// Property Store
// =============================================================================
//
// Bounds mirror the classic Android property service: PROP_NAME_MAX = 92,
// PROP_VALUE_MAX = 92 (value limit rounded up to 96 here to cover the
// historical padding).
// =============================================================================

/// Maximum entries in the property table.
pub const MAX_PROPERTIES: usize = 128;

/// Maximum property key length in bytes.
pub const MAX_PROPERTY_KEY_LEN: usize = 92;

/// Maximum property value length in bytes.
pub const MAX_PROPERTY_VALUE_LEN: usize = 96;

/// Valid characters for property keys.
///
/// Allowlist-based: lowercase/uppercase letters, digits, and `._-`.
pub const PROPERTY_KEY_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789._-";

// =============================================================================
// Property Key Validation Helper
// =============================================================================

/// Validates a property key for safety.
///
/// Ensures keys are non-empty, within [`MAX_PROPERTY_KEY_LEN`], and drawn
/// from [`PROPERTY_KEY_VALID_CHARS`].
///
/// # Returns
///
/// `Ok(())` if valid, `Err(reason)` with a description of the failure.
#[inline]
#[must_use = "validation result must be checked before storing the key"]
pub fn validate_property_key(key: &str) -> std::result::Result<(), &'static str> {
    if key.is_empty() {
        return Err("property key cannot be empty");
    }
    if key.len() > MAX_PROPERTY_KEY_LEN {
        return Err("property key exceeds maximum length");
    }
    if !key.chars().all(|c| PROPERTY_KEY_VALID_CHARS.contains(c)) {
        return Err("property key contains invalid characters");
    }
    Ok(())
}
