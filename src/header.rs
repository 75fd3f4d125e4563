//! The self-describing, version-tolerant main cache header decoder.
//!
//! Field-for-field byte offsets here are this crate's own internally
//! consistent layout (documented inline); the *decode rules* — the
//! magic-prefix check, the 0x118-byte minimum window, the subcache-shape
//! threshold at `mapping_offset < 0x200`, and the flags bit layout from
//! spec §8 scenario 2 — follow the spec literally. See DESIGN.md for why
//! exact byte offsets could not be cross-checked against a real cache
//! file (none were available in the retrieval pack).

use crate::arch::{Architecture, CacheType, PlatformId};
use crate::cursor::ParseCursor;
use crate::error::{Error, Result};

/// The minimum number of bytes a caller must supply to `CacheHeader::parse`.
pub const MIN_HEADER_WINDOW: usize = 0x118;

/// The `mapping_offset` threshold that selects the subcache-entry wire
/// shape.
pub const SUBCACHE_ENTRY_SHAPE_THRESHOLD: u32 = 0x200;

/// A `(offset, count)` table descriptor, as carried by the header for the
/// mapping/image/subcache/TPRO tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableRef {
    pub offset: u64,
    pub count: u64,
}

impl TableRef {
    /// A table is "absent" when either `offset` or `count` is zero.
    pub fn is_present(&self) -> bool {
        self.offset != 0 && self.count != 0
    }

    /// Validate `offset + count * entry_size <= file_size` with checked
    /// arithmetic.
    pub fn validate(&self, entry_size: u64, file_size: u64) -> Result<()> {
        if !self.is_present() {
            return Ok(());
        }
        let bytes = self
            .count
            .checked_mul(entry_size)
            .ok_or_else(|| Error::InvalidMachO("unreasonable table size (count * entry_size overflowed)"))?;
        let end = self
            .offset
            .checked_add(bytes)
            .ok_or_else(|| Error::InvalidMachO("unreasonable table range (offset + bytes overflowed)"))?;
        if end > file_size {
            return Err(Error::InvalidMachO(
                    "table offset + count * entry_size exceeded the file size",
                ));
        }
        Ok(())
    }
}

/// Decoded feature/format flags from the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheFlags(pub u32);

impl CacheFlags {
    pub fn format_version(&self) -> u8 {
        (self.0 & 0xff) as u8
    }

    pub fn dylibs_expected_on_disk(&self) -> bool {
        self.0 & (1 << 8) != 0
    }

    pub fn simulator(&self) -> bool {
        self.0 & (1 << 9) != 0
    }

    pub fn locally_built_cache(&self) -> bool {
        self.0 & (1 << 10) != 0
    }

    pub fn built_from_chained_fixups(&self) -> bool {
        self.0 & (1 << 11) != 0
    }

    pub fn new_format_tlvs(&self) -> bool {
        self.0 & (1 << 12) != 0
    }
}

/// The fully decoded main cache header.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHeader {
    pub architecture: Architecture,
    pub is_64_bit: bool,
    pub cache_uuid: [u8; 16],
    /// All-zero means "no symbols sidecar".
    pub symbols_file_uuid: [u8; 16],
    pub platform: PlatformId,
    pub cache_type: CacheType,
    pub flags: CacheFlags,
    pub shared_region_start: u64,
    pub shared_region_size: u64,
    pub max_slide: u64,
    pub mapping_table: TableRef,
    pub mapping_with_slide_table: TableRef,
    pub images_table: TableRef,
    pub images_text_table: TableRef,
    pub sub_cache_table: TableRef,
    pub local_symbols_offset: u64,
    pub local_symbols_size: u64,
    /// Best-effort: defaults to an absent table if the header window ends
    /// before these bytes.
    pub tpro_mappings_table: TableRef,
    pub os_version: (u8, u8, u8),
}

impl CacheHeader {
    /// Decode a header from a byte window that starts at the cache file's
    /// first byte. `data` must be at least `MIN_HEADER_WINDOW` bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_HEADER_WINDOW {
            return Err(Error::HeaderTooSmall);
        }
        let mut c = ParseCursor::new(data);

        let magic = c.read_array::<16>()?;
        if &magic[0..6] != b"dyld_v" {
            return Err(Error::InvalidMagic);
        }
        let arch_field = &magic[7..16];
        let nul_pos = arch_field.iter().position(|&b| b == 0).unwrap_or(arch_field.len());
        let arch_str = String::from_utf8_lossy(&arch_field[..nul_pos]);
        let architecture =
            Architecture::from_magic_suffix(&arch_str).ok_or(Error::InvalidMagic)?;
        let is_64_bit = architecture.is_64_bit();

        let mapping_offset = c.read_u32_le()?;
        let mapping_count = c.read_u32_le()?;
        let _images_offset_old = c.read_u32_le()?;
        let _images_count_old = c.read_u32_le()?;
        let _dyld_base_address = c.read_u64_le()?;
        let _code_signature_offset = c.read_u64_le()?;
        let _code_signature_size = c.read_u64_le()?;
        let local_symbols_offset = c.read_u64_le()?;
        let local_symbols_size = c.read_u64_le()?;
        let cache_uuid = c.read_array::<16>()?;
        let cache_type = CacheType::from_raw(c.read_u64_le()?);
        let images_text_offset = c.read_u64_le()?;
        let images_text_count = c.read_u64_le()?;
        let platform = PlatformId::from_raw(c.read_u32_le()?);
        let flags = CacheFlags(c.read_u32_le()?);
        let shared_region_start = c.read_u64_le()?;
        let shared_region_size = c.read_u64_le()?;
        let max_slide = c.read_u64_le()?;
        let mapping_with_slide_offset = c.read_u32_le()?;
        let mapping_with_slide_count = c.read_u32_le()?;
        let sub_cache_array_offset = c.read_u32_le()?;
        let sub_cache_array_count = c.read_u32_le()?;
        let symbols_file_uuid = c.read_array::<16>()?;
        let images_offset = c.read_u32_le()?;
        let images_count = c.read_u32_le()?;
        let os_version_packed = c.read_u32_le()?;
        let os_version = (
            ((os_version_packed >> 16) & 0xff) as u8,
            ((os_version_packed >> 8) & 0xff) as u8,
            (os_version_packed & 0xff) as u8,
        );

        // Reserved padding out to the minimum header window; real caches
        // pack more fields here (objc image info, closures, branch
        // pools...) that this crate has no use for.
        c.seek(MIN_HEADER_WINDOW)?;

        // Late, best-effort fields: default to zero/absent if
        // the caller's window ends early.
        let tpro_mappings_table = read_best_effort_tpro_table(data);

        Ok(CacheHeader {
                architecture,
                is_64_bit,
                cache_uuid,
                symbols_file_uuid,
                platform,
                cache_type,
                flags,
                shared_region_start,
                shared_region_size,
                max_slide,
                mapping_table: TableRef {
                    offset: mapping_offset as u64,
                    count: mapping_count as u64,
                },
                mapping_with_slide_table: TableRef {
                    offset: mapping_with_slide_offset as u64,
                    count: mapping_with_slide_count as u64,
                },
                images_table: TableRef {
                    offset: images_offset as u64,
                    count: images_count as u64,
                },
                images_text_table: TableRef {
                    offset: images_text_offset,
                    count: images_text_count,
                },
                sub_cache_table: TableRef {
                    offset: sub_cache_array_offset as u64,
                    count: sub_cache_array_count as u64,
                },
                local_symbols_offset,
                local_symbols_size,
                tpro_mappings_table,
                os_version,
            })
    }

    /// Whether the symbols sidecar UUID is present (non-zero).
    pub fn has_symbols_subcache(&self) -> bool {
        self.symbols_file_uuid != [0u8; 16]
    }

    /// Whether subcache entries use the 56-byte v2 (suffix-carrying)
    /// shape, vs. the 24-byte v1 shape.
    pub fn subcache_entries_are_v2(&self) -> bool {
        self.mapping_table.offset >= SUBCACHE_ENTRY_SHAPE_THRESHOLD as u64
    }
}

/// The late TPRO-mappings table lives right after the required header
/// window in this crate's layout; best-effort per spec §4.3.
const TPRO_TABLE_OFFSET_IN_HEADER: usize = MIN_HEADER_WINDOW + 0x30;

fn read_best_effort_tpro_table(data: &[u8]) -> TableRef {
    if data.len() < TPRO_TABLE_OFFSET_IN_HEADER + 8 {
        return TableRef::default();
    }
    let mut c = ParseCursor::new(data);
    if c.seek(TPRO_TABLE_OFFSET_IN_HEADER).is_err() {
        return TableRef::default();
    }
    let offset = match c.read_u32_le() {
        Ok(v) => v,
        Err(_) => return TableRef::default(),
    };
    let count = match c.read_u32_le() {
        Ok(v) => v,
        Err(_) => return TableRef::default(),
    };
    TableRef {
        offset: offset as u64,
        count: count as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_header_bytes(magic_suffix: &[u8; 9], mapping_offset: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; MIN_HEADER_WINDOW];
        bytes[0..6].copy_from_slice(b"dyld_v");
        bytes[6] = b'1';
        bytes[7..16].copy_from_slice(magic_suffix);
        bytes[0x10..0x14].copy_from_slice(&mapping_offset.to_le_bytes());
        bytes
    }

    #[test]
    fn arm64e_magic_is_recognized() {
        let bytes = minimal_header_bytes(b" arm64e\0"[..9].try_into().unwrap(), 0);
        let header = CacheHeader::parse(&bytes).unwrap();
        assert_eq!(header.architecture, Architecture::Arm64e);
        assert!(header.is_64_bit);
        assert!(header.architecture.uses_pac());
    }

    #[test]
    fn unrecognized_architecture_suffix_is_invalid_magic() {
        let bytes = minimal_header_bytes(b" foo\0\0"[..9].try_into().unwrap(), 0);
        assert!(matches!(CacheHeader::parse(&bytes), Err(Error::InvalidMagic)));
    }

    #[test]
    fn one_byte_short_of_minimum_header_fails() {
        let bytes = minimal_header_bytes(b" arm64e\0"[..9].try_into().unwrap(), 0);
        assert!(matches!(
                CacheHeader::parse(&bytes[..MIN_HEADER_WINDOW - 1]),
                Err(Error::HeaderTooSmall)
            ));
    }

    #[test]
    fn flags_decode_matches_spec_scenario() {
        let mut bytes = minimal_header_bytes(b" arm64\0"[..9].try_into().unwrap(), 0);
        bytes[0x74..0x78].copy_from_slice(&0x1F7Fu32.to_le_bytes());
        let header = CacheHeader::parse(&bytes).unwrap();
        assert_eq!(header.flags.format_version(), 0x7F);
        assert!(header.flags.dylibs_expected_on_disk());
        assert!(header.flags.simulator());
        assert!(header.flags.locally_built_cache());
        assert!(header.flags.built_from_chained_fixups());
        assert!(header.flags.new_format_tlvs());
    }

    #[test]
    fn tpro_table_defaults_absent_when_window_is_minimal() {
        let bytes = minimal_header_bytes(b" arm64\0"[..9].try_into().unwrap(), 0);
        let header = CacheHeader::parse(&bytes).unwrap();
        assert!(!header.tpro_mappings_table.is_present());
    }

    #[test]
    fn subcache_shape_threshold() {
        let below = minimal_header_bytes(b" arm64\0"[..9].try_into().unwrap(), 0x1ff);
        let at = minimal_header_bytes(b" arm64\0"[..9].try_into().unwrap(), 0x200);
        assert!(!CacheHeader::parse(&below).unwrap().subcache_entries_are_v2());
        assert!(CacheHeader::parse(&at).unwrap().subcache_entries_are_v2());
    }

    #[test]
    fn table_ref_rejects_overflowing_ranges() {
        let table = TableRef {
            offset: u64::MAX - 5,
            count: 100,
        };
        assert!(table.validate(32, u64::MAX).is_err());
    }
}

