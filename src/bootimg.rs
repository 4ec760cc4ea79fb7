//! # Boot Image Parser
//!
//! Decodes Android-style boot images against the five known header layouts
//! (versions 0 through 4) and produces the offsets, sizes, load addresses,
//! and command line the loader needs.
//!
//! ## Layout Families
//!
//! | Versions | Family | Page size | Load addresses |
//! |----------|--------|-----------|----------------|
//! | 0, 1, 2  | Legacy | From header (0 → 2048) | Explicit header fields |
//! | 3, 4     | GKI    | Fixed 4096 | Caller defaults ([`ParseOptions`]) |
//!
//! The two families share only the magic and the `header_version` word at
//! byte offset 40, so the parser reads the version first and then decodes
//! against exactly one layout — the variants are a tagged enum, never an
//! overlapping reinterpretation of the same bytes.
//!
//! ## Offset Invariants
//!
//! For every parsed image:
//!
//! ```text
//! ramdisk_offset = kernel_offset + ceil(kernel_size / page_size) * page_size
//! ```
//!
//! Legacy images place the kernel after exactly one header page
//! (`kernel_offset = page_size`); GKI images place it after
//! `ceil(header_size / 4096)` pages.
//!
//! Parsing is pure: no table, arena, or console state is touched.

use crate::constants::{
    BOOT_MAGIC, GKI_KERNEL_LOAD_ADDR, GKI_PAGE_SIZE, GKI_RAMDISK_LOAD_ADDR,
    LEGACY_DEFAULT_PAGE_SIZE, MAX_CMDLINE_LEN,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Wire Sizes
// =============================================================================

/// Size of the v0 header: fixed fields + name(16) + cmdline(512) + id(32)
/// + extra_cmdline(1024).
const V0_HEADER_SIZE: usize = 1632;

/// v1 appends recovery-dtbo size/offset and header_size.
const V1_HEADER_SIZE: usize = 1648;

/// v2 appends dtb size/address.
const V2_HEADER_SIZE: usize = 1660;

/// v3 header: fixed fields + combined 1536-byte cmdline.
const V3_HEADER_SIZE: usize = 1580;

/// v4 appends the signature-block size.
const V4_HEADER_SIZE: usize = 1584;

/// Minimum bytes needed to read the magic and the version word.
const VERSION_PROBE_SIZE: usize = 44;

/// Byte sizes of the legacy cmdline fields.
const LEGACY_CMDLINE_SIZE: usize = 512;
const LEGACY_EXTRA_CMDLINE_SIZE: usize = 1024;

/// Byte size of the combined GKI cmdline field.
const GKI_CMDLINE_SIZE: usize = 1536;

// =============================================================================
// Parse Options
// =============================================================================

/// Caller-configurable defaults for fields the GKI layout omits.
///
/// GKI headers (v3/v4) carry no load addresses; the values here are used
/// instead. The defaults match the flat memory window the execution engine
/// exposes.
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// Load address assigned to GKI kernels.
    pub kernel_load_addr: u32,
    /// Load address assigned to GKI ramdisks.
    pub ramdisk_load_addr: u32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            kernel_load_addr: GKI_KERNEL_LOAD_ADDR,
            ramdisk_load_addr: GKI_RAMDISK_LOAD_ADDR,
        }
    }
}

// =============================================================================
// OS Version
// =============================================================================

/// Decoded `os_version` word.
///
/// The wire encoding packs release and patch level into one u32:
/// `major(7) | minor(7) | patch(7) | year-2000(7) | month(4)`, most
/// significant bits first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    /// Security patch year (absolute, e.g. 2023).
    pub patch_year: u16,
    /// Security patch month (1-12, or 0 when unset).
    pub patch_month: u8,
}

impl OsVersion {
    /// Decodes the packed wire word.
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self {
            major: ((raw >> 25) & 0x7f) as u8,
            minor: ((raw >> 18) & 0x7f) as u8,
            patch: ((raw >> 11) & 0x7f) as u8,
            patch_year: 2000 + ((raw >> 4) & 0x7f) as u16,
            patch_month: (raw & 0xf) as u8,
        }
    }
}

impl std::fmt::Display for OsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// =============================================================================
// Header Variants
// =============================================================================

/// Legacy (v0/v1/v2) boot header fields.
#[derive(Debug, Clone)]
pub struct LegacyHeader {
    pub version: u32,
    pub kernel_size: u32,
    pub kernel_load_addr: u32,
    pub ramdisk_size: u32,
    pub ramdisk_load_addr: u32,
    pub second_size: u32,
    pub second_load_addr: u32,
    pub tags_addr: u32,
    /// Page size from the header; 0 on the wire decodes to 2048.
    pub page_size: u32,
    pub os_version: OsVersion,
    /// Product name, NUL-trimmed.
    pub board_name: String,
    /// Concatenated cmdline + extra_cmdline, truncated to [`MAX_CMDLINE_LEN`].
    pub command_line: String,
    /// Raw 32-byte image id field (timestamp/checksum/sha1, unparsed).
    pub id: [u8; 32],
    /// Recovery DTBO size, v1+ only.
    pub recovery_dtbo_size: Option<u32>,
    /// DTB size, v2 only.
    pub dtb_size: Option<u32>,
}

/// GKI (v3/v4) boot header fields.
#[derive(Debug, Clone)]
pub struct GkiHeader {
    pub version: u32,
    pub kernel_size: u32,
    pub ramdisk_size: u32,
    pub os_version: OsVersion,
    /// Declared header size; determines the kernel page offset.
    pub header_size: u32,
    /// Combined command line, truncated to [`MAX_CMDLINE_LEN`].
    pub command_line: String,
    /// Load addresses assigned from [`ParseOptions`].
    pub kernel_load_addr: u32,
    pub ramdisk_load_addr: u32,
    /// Signature block size, v4 only. Callers may ignore it.
    pub signature_size: Option<u32>,
}

/// A parsed boot image header, tagged by layout family.
#[derive(Debug, Clone)]
pub enum BootImage {
    Legacy(LegacyHeader),
    Gki(GkiHeader),
}

/// Flattened summary of a parsed image for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSummary {
    pub header_version: u32,
    pub page_size: u32,
    pub kernel_size: u32,
    pub kernel_offset: u64,
    pub kernel_load_addr: u32,
    pub ramdisk_size: u32,
    pub ramdisk_offset: u64,
    pub ramdisk_load_addr: u32,
    pub os_version: OsVersion,
    pub command_line: String,
}

impl BootImage {
    /// Parses a boot image header with default [`ParseOptions`].
    ///
    /// # Errors
    ///
    /// - [`Error::TooShort`] if the buffer cannot hold the header
    /// - [`Error::BadMagic`] if the first 8 bytes are not `ANDROID!`
    /// - [`Error::UnsupportedVersion`] for header versions above 4
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Self::parse_with(bytes, ParseOptions::default())
    }

    /// Parses a boot image header with explicit GKI load-address defaults.
    pub fn parse_with(bytes: &[u8], opts: ParseOptions) -> Result<Self> {
        if bytes.len() < VERSION_PROBE_SIZE {
            return Err(Error::TooShort {
                len: bytes.len(),
                need: VERSION_PROBE_SIZE,
            });
        }
        if &bytes[..8] != BOOT_MAGIC {
            let mut found = [0u8; 8];
            found.copy_from_slice(&bytes[..8]);
            return Err(Error::BadMagic { found });
        }

        // header_version sits at byte 40 in both layout families.
        let version = read_u32(bytes, 40);
        match version {
            0..=2 => parse_legacy(bytes, version),
            3 | 4 => parse_gki(bytes, version, opts),
            _ => Err(Error::UnsupportedVersion { version }),
        }
    }

    /// Header version (0-4).
    #[must_use]
    pub fn version(&self) -> u32 {
        match self {
            Self::Legacy(h) => h.version,
            Self::Gki(h) => h.version,
        }
    }

    /// Effective page size for offset arithmetic.
    #[must_use]
    pub fn page_size(&self) -> u32 {
        match self {
            Self::Legacy(h) => h.page_size,
            Self::Gki(_) => GKI_PAGE_SIZE,
        }
    }

    /// Kernel payload size in bytes.
    #[must_use]
    pub fn kernel_size(&self) -> u32 {
        match self {
            Self::Legacy(h) => h.kernel_size,
            Self::Gki(h) => h.kernel_size,
        }
    }

    /// Ramdisk payload size in bytes.
    #[must_use]
    pub fn ramdisk_size(&self) -> u32 {
        match self {
            Self::Legacy(h) => h.ramdisk_size,
            Self::Gki(h) => h.ramdisk_size,
        }
    }

    /// Byte offset of the kernel payload within the image.
    ///
    /// Legacy layouts devote exactly one page to the header; GKI layouts
    /// round the declared header size up to whole 4096-byte pages.
    #[must_use]
    pub fn kernel_offset(&self) -> u64 {
        match self {
            Self::Legacy(h) => u64::from(h.page_size),
            Self::Gki(h) => pages_ceil(u64::from(h.header_size), u64::from(GKI_PAGE_SIZE)),
        }
    }

    /// Byte offset of the ramdisk payload within the image.
    #[must_use]
    pub fn ramdisk_offset(&self) -> u64 {
        let page = u64::from(self.page_size());
        self.kernel_offset() + pages_ceil(u64::from(self.kernel_size()), page)
    }

    /// Address the kernel expects to be loaded at.
    #[must_use]
    pub fn kernel_load_addr(&self) -> u32 {
        match self {
            Self::Legacy(h) => h.kernel_load_addr,
            Self::Gki(h) => h.kernel_load_addr,
        }
    }

    /// Address the ramdisk expects to be loaded at.
    #[must_use]
    pub fn ramdisk_load_addr(&self) -> u32 {
        match self {
            Self::Legacy(h) => h.ramdisk_load_addr,
            Self::Gki(h) => h.ramdisk_load_addr,
        }
    }

    /// Kernel command line (legacy: cmdline + extra_cmdline concatenated).
    #[must_use]
    pub fn command_line(&self) -> &str {
        match self {
            Self::Legacy(h) => &h.command_line,
            Self::Gki(h) => &h.command_line,
        }
    }

    /// Decoded OS version / security patch level.
    #[must_use]
    pub fn os_version(&self) -> OsVersion {
        match self {
            Self::Legacy(h) => h.os_version,
            Self::Gki(h) => h.os_version,
        }
    }

    /// Produces the flattened summary used in status reports.
    #[must_use]
    pub fn summary(&self) -> ImageSummary {
        ImageSummary {
            header_version: self.version(),
            page_size: self.page_size(),
            kernel_size: self.kernel_size(),
            kernel_offset: self.kernel_offset(),
            kernel_load_addr: self.kernel_load_addr(),
            ramdisk_size: self.ramdisk_size(),
            ramdisk_offset: self.ramdisk_offset(),
            ramdisk_load_addr: self.ramdisk_load_addr(),
            os_version: self.os_version(),
            command_line: self.command_line().to_string(),
        }
    }
}

// =============================================================================
// Layout Decoders
// =============================================================================

fn parse_legacy(bytes: &[u8], version: u32) -> Result<BootImage> {
    let need = match version {
        0 => V0_HEADER_SIZE,
        1 => V1_HEADER_SIZE,
        _ => V2_HEADER_SIZE,
    };
    if bytes.len() < need {
        return Err(Error::TooShort {
            len: bytes.len(),
            need,
        });
    }

    let page_size = match read_u32(bytes, 36) {
        0 => LEGACY_DEFAULT_PAGE_SIZE,
        p => p,
    };

    let mut command_line = read_cstr(&bytes[64..64 + LEGACY_CMDLINE_SIZE]);
    command_line.push_str(&read_cstr(
        &bytes[608..608 + LEGACY_EXTRA_CMDLINE_SIZE],
    ));
    command_line.truncate(MAX_CMDLINE_LEN);

    let mut id = [0u8; 32];
    id.copy_from_slice(&bytes[576..608]);

    Ok(BootImage::Legacy(LegacyHeader {
        version,
        kernel_size: read_u32(bytes, 8),
        kernel_load_addr: read_u32(bytes, 12),
        ramdisk_size: read_u32(bytes, 16),
        ramdisk_load_addr: read_u32(bytes, 20),
        second_size: read_u32(bytes, 24),
        second_load_addr: read_u32(bytes, 28),
        tags_addr: read_u32(bytes, 32),
        page_size,
        os_version: OsVersion::from_raw(read_u32(bytes, 44)),
        board_name: read_cstr(&bytes[48..64]),
        command_line,
        id,
        recovery_dtbo_size: (version >= 1).then(|| read_u32(bytes, V0_HEADER_SIZE)),
        dtb_size: (version >= 2).then(|| read_u32(bytes, V1_HEADER_SIZE)),
    }))
}

fn parse_gki(bytes: &[u8], version: u32, opts: ParseOptions) -> Result<BootImage> {
    let need = if version == 3 {
        V3_HEADER_SIZE
    } else {
        V4_HEADER_SIZE
    };
    if bytes.len() < need {
        return Err(Error::TooShort {
            len: bytes.len(),
            need,
        });
    }

    let mut command_line = read_cstr(&bytes[44..44 + GKI_CMDLINE_SIZE]);
    command_line.truncate(MAX_CMDLINE_LEN);

    Ok(BootImage::Gki(GkiHeader {
        version,
        kernel_size: read_u32(bytes, 8),
        ramdisk_size: read_u32(bytes, 12),
        os_version: OsVersion::from_raw(read_u32(bytes, 16)),
        header_size: read_u32(bytes, 20),
        command_line,
        kernel_load_addr: opts.kernel_load_addr,
        ramdisk_load_addr: opts.ramdisk_load_addr,
        signature_size: (version == 4).then(|| read_u32(bytes, V3_HEADER_SIZE)),
    }))
}

// =============================================================================
// Wire Helpers
// =============================================================================

/// Reads a little-endian u32. Callers bounds-check the whole header first.
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

/// Extracts a NUL-terminated string field, lossy on invalid UTF-8.
fn read_cstr(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Rounds `size` up to whole pages. `page` is a power of two well below
/// 2^32, so the multiply cannot overflow u64.
fn pages_ceil(size: u64, page: u64) -> u64 {
    size.div_ceil(page) * page
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_header(version: u32, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        buf[..8].copy_from_slice(BOOT_MAGIC);
        buf[40..44].copy_from_slice(&version.to_le_bytes());
        buf
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = raw_header(0, V0_HEADER_SIZE);
        buf[0] = b'X';
        assert!(matches!(
            BootImage::parse(&buf),
            Err(Error::BadMagic { .. })
        ));
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(matches!(
            BootImage::parse(&[0u8; 16]),
            Err(Error::TooShort { .. })
        ));
    }

    #[test]
    fn rejects_version_5() {
        let buf = raw_header(5, V0_HEADER_SIZE);
        assert!(matches!(
            BootImage::parse(&buf),
            Err(Error::UnsupportedVersion { version: 5 })
        ));
    }

    #[test]
    fn legacy_zero_page_size_defaults_to_2048() {
        let buf = raw_header(0, V0_HEADER_SIZE);
        let img = BootImage::parse(&buf).unwrap();
        assert_eq!(img.page_size(), 2048);
        assert_eq!(img.kernel_offset(), 2048);
    }

    #[test]
    fn os_version_decoding() {
        // 13.0.0, patch level 2023-06.
        let raw = (13u32 << 25) | (23 << 4) | 6;
        let v = OsVersion::from_raw(raw);
        assert_eq!((v.major, v.minor, v.patch), (13, 0, 0));
        assert_eq!((v.patch_year, v.patch_month), (2023, 6));
    }

    #[test]
    fn legacy_cmdline_concatenation() {
        let mut buf = raw_header(0, V0_HEADER_SIZE);
        buf[64..64 + 8].copy_from_slice(b"console=");
        buf[608..608 + 4].copy_from_slice(b"tty0");
        let img = BootImage::parse(&buf).unwrap();
        assert_eq!(img.command_line(), "console=tty0");
    }
}
