//! Fixed-layout decoders for the on-wire records in spec §3.
//!
//! Each record is parsed once from a byte buffer (already fetched from a
//! `ByteSource`) into an owned, `Copy` value type via `ParseCursor`. This is
//! the deliberate point of departure from the teacher crate's zero-copy
//! `Pod`-cast structs (`src/pod.rs`, `src/macho.rs`): our backing store is
//! not guaranteed to be a long-lived `&[u8]`, so there is nothing to
//! borrow from.

use crate::cursor::ParseCursor;
use crate::error::{Error, Result};

/// `dyld_cache_mapping_info` — 32 bytes on wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingInfo {
    pub address: u64,
    pub size: u64,
    pub file_offset: u64,
    pub max_prot: u32,
    pub init_prot: u32,
}

impl MappingInfo {
    pub const WIRE_SIZE: usize = 32;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut c = ParseCursor::new(data);
        Ok(MappingInfo {
                address: c.read_u64_le()?,
                size: c.read_u64_le()?,
                file_offset: c.read_u64_le()?,
                max_prot: c.read_u32_le()?,
                init_prot: c.read_u32_le()?,
            })
    }

    /// Whether `address` falls within `[self.address, self.address + self.size)`,
    /// treating an overflowing end bound as "contains nothing".
    pub fn contains(&self, address: u64) -> bool {
        match self.address.checked_add(self.size) {
            Some(end) => address >= self.address && address < end,
            None => false,
        }
    }
}

bitflags::bitflags! {
    /// Flags on `dyld_cache_mapping_and_slide_info`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MappingFlags: u64 {
        const AUTH = 1 << 0;
        const DIRTY = 1 << 1;
        const CONST = 1 << 2;
        const TEXT_STUBS = 1 << 3;
        const DYNAMIC_CONFIG = 1 << 4;
        const READ_ONLY = 1 << 5;
        const CONST_TPRO = 1 << 6;
    }
}

/// `dyld_cache_mapping_and_slide_info` — 56 bytes on wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingAndSlideInfo {
    pub address: u64,
    pub size: u64,
    pub file_offset: u64,
    pub slide_info_file_offset: u64,
    pub slide_info_file_size: u64,
    pub flags: MappingFlags,
    pub max_prot: u32,
    pub init_prot: u32,
}

impl MappingAndSlideInfo {
    pub const WIRE_SIZE: usize = 56;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut c = ParseCursor::new(data);
        let address = c.read_u64_le()?;
        let size = c.read_u64_le()?;
        let file_offset = c.read_u64_le()?;
        let slide_info_file_offset = c.read_u64_le()?;
        let slide_info_file_size = c.read_u64_le()?;
        let flags = MappingFlags::from_bits_truncate(c.read_u64_le()?);
        let max_prot = c.read_u32_le()?;
        let init_prot = c.read_u32_le()?;
        Ok(MappingAndSlideInfo {
                address,
                size,
                file_offset,
                slide_info_file_offset,
                slide_info_file_size,
                flags,
                max_prot,
                init_prot,
            })
    }

    pub fn has_slide_info(&self) -> bool {
        self.slide_info_file_size > 0
    }

    pub fn contains(&self, address: u64) -> bool {
        match self.address.checked_add(self.size) {
            Some(end) => address >= self.address && address < end,
            None => false,
        }
    }
}

/// `dyld_cache_image_info` — 32 bytes on wire (4-byte pad included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub address: u64,
    pub mod_time: u64,
    pub inode: u64,
    pub path_file_offset: u32,
}

impl ImageInfo {
    pub const WIRE_SIZE: usize = 32;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut c = ParseCursor::new(data);
        let address = c.read_u64_le()?;
        let mod_time = c.read_u64_le()?;
        let inode = c.read_u64_le()?;
        let path_file_offset = c.read_u32_le()?;
        let _pad = c.read_u32_le()?;
        Ok(ImageInfo {
                address,
                mod_time,
                inode,
                path_file_offset,
            })
    }
}

/// `dyld_cache_image_text_info` — 32 bytes on wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTextInfo {
    pub uuid: [u8; 16],
    pub load_address: u64,
    pub text_segment_size: u32,
    pub path_offset: u32,
}

impl ImageTextInfo {
    pub const WIRE_SIZE: usize = 32;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut c = ParseCursor::new(data);
        let uuid = c.read_array::<16>()?;
        let load_address = c.read_u64_le()?;
        let text_segment_size = c.read_u32_le()?;
        let path_offset = c.read_u32_le()?;
        Ok(ImageTextInfo {
                uuid,
                load_address,
                text_segment_size,
                path_offset,
            })
    }
}

/// One entry describing a subcache file, in either of its two on-wire
/// shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubCacheEntry {
    pub uuid: [u8; 16],
    pub cache_vm_offset: u64,
    /// `Some` only for v2 entries, which encode the suffix directly.
    pub file_suffix: Option<String>,
}

impl SubCacheEntry {
    pub const WIRE_SIZE_V1: usize = 24;
    pub const WIRE_SIZE_V2: usize = 56;

    pub fn parse_v1(data: &[u8], index_1_based: usize) -> Result<Self> {
        let mut c = ParseCursor::new(data);
        let uuid = c.read_array::<16>()?;
        let cache_vm_offset = c.read_u64_le()?;
        Ok(SubCacheEntry {
                uuid,
                cache_vm_offset,
                file_suffix: Some(format!(".{index_1_based}")),
            })
    }

    pub fn parse_v2(data: &[u8]) -> Result<Self> {
        let mut c = ParseCursor::new(data);
        let uuid = c.read_array::<16>()?;
        let cache_vm_offset = c.read_u64_le()?;
        let suffix_bytes = c.read_array::<32>()?;
        let len = suffix_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(suffix_bytes.len());
        let suffix = String::from_utf8_lossy(&suffix_bytes[..len]).into_owned();
        Ok(SubCacheEntry {
                uuid,
                cache_vm_offset,
                file_suffix: Some(suffix),
            })
    }
}

/// `dyld_cache_local_symbols_info` — six u32 fields, offsets relative to
/// `localSymbolsOffset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSymbolsInfo {
    pub nlist_offset: u32,
    pub nlist_count: u32,
    pub strings_offset: u32,
    pub strings_size: u32,
    pub entries_offset: u32,
    pub entries_count: u32,
}

impl LocalSymbolsInfo {
    pub const WIRE_SIZE: usize = 24;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut c = ParseCursor::new(data);
        Ok(LocalSymbolsInfo {
                nlist_offset: c.read_u32_le()?,
                nlist_count: c.read_u32_le()?,
                strings_offset: c.read_u32_le()?,
                strings_size: c.read_u32_le()?,
                entries_offset: c.read_u32_le()?,
                entries_count: c.read_u32_le()?,
            })
    }
}

/// `dyld_cache_local_symbols_entry[_64]`. `dylib_offset` is
/// always widened to u64; the on-wire width (12 vs 16 bytes) is a
/// caller-selected option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSymbolsEntry {
    pub dylib_offset: u64,
    pub nlist_start_index: u32,
    pub nlist_count: u32,
}

impl LocalSymbolsEntry {
    pub fn wire_size(use_64_bit_dylib_offset: bool) -> usize {
        if use_64_bit_dylib_offset {
            16
        } else {
            12
        }
    }

    pub fn parse(data: &[u8], use_64_bit_dylib_offset: bool) -> Result<Self> {
        let mut c = ParseCursor::new(data);
        let dylib_offset = if use_64_bit_dylib_offset {
            c.read_u64_le()?
        } else {
            c.read_u32_le()? as u64
        };
        let nlist_start_index = c.read_u32_le()?;
        let nlist_count = c.read_u32_le()?;
        Ok(LocalSymbolsEntry {
                dylib_offset,
                nlist_start_index,
                nlist_count,
            })
    }
}

/// Decomposed `n_type` byte of an `nlist`/`nlist_64` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NListType {
    Undefined,
    Absolute,
    Indirect,
    Prebound,
    Section,
    Other(u8),
}

/// One symbol-table record, widened to 64-bit regardless of source width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NList {
    pub string_index: u32,
    pub n_type_raw: u8,
    pub section: u8,
    pub desc: u16,
    pub value: u64,
}

impl NList {
    pub const WIRE_SIZE_32: usize = 12;
    pub const WIRE_SIZE_64: usize = 16;

    pub fn parse_32(data: &[u8]) -> Result<Self> {
        let mut c = ParseCursor::new(data);
        let string_index = c.read_u32_le()?;
        let n_type_raw = c.read_u8()?;
        let section = c.read_u8()?;
        let desc = c.read_u16_le()?;
        let value = c.read_u32_le()? as u64;
        Ok(NList {
                string_index,
                n_type_raw,
                section,
                desc,
                value,
            })
    }

    pub fn parse_64(data: &[u8]) -> Result<Self> {
        let mut c = ParseCursor::new(data);
        let string_index = c.read_u32_le()?;
        let n_type_raw = c.read_u8()?;
        let section = c.read_u8()?;
        let desc = c.read_u16_le()?;
        let value = c.read_u64_le()?;
        Ok(NList {
                string_index,
                n_type_raw,
                section,
                desc,
                value,
            })
    }

    pub fn is_stab(&self) -> bool {
        self.n_type_raw & 0xe0 != 0
    }

    pub fn is_private_external(&self) -> bool {
        self.n_type_raw & 0x10 != 0
    }

    pub fn is_external(&self) -> bool {
        self.n_type_raw & 0x01 != 0
    }

    pub fn kind(&self) -> NListType {
        match self.n_type_raw & 0x0e {
            0x00 => NListType::Undefined,
            0x02 => NListType::Absolute,
            0x0a => NListType::Indirect,
            0x0c => NListType::Prebound,
            0x0e => NListType::Section,
            other => NListType::Other(other),
        }
    }
}

/// The global cap on a slide-info page-starts array.
pub const MAX_PAGE_STARTS: u64 = 1_000_000;

/// A slide-info header, dispatched on the leading version u32.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlideInfo {
    V1 {
        toc_offset: u32,
        toc_count: u32,
        entries_offset: u32,
        entries_count: u32,
        entries_size: u32,
    },
    V2 { page_size: u32, page_starts_count: u32, page_extras_count: u32 },
    V3 {
        page_size: u32,
        page_starts_count: u32,
        auth_value_add: u64,
        page_starts: Vec<u16>,
    },
    V4 { page_size: u32, page_starts_count: u32, page_extras_count: u32 },
    V5 {
        page_size: u32,
        page_starts_count: u32,
        value_add: u64,
        page_starts: Vec<u16>,
    },
}

impl SlideInfo {
    /// Parse a slide-info header from `data`, which must start at the
    /// slide info's file offset. Only the header (plus, for v3/v5, the
    /// page-starts array) is materialised; see spec §9 Open Questions for
    /// why v2/v4's extras arrays are not walked here.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut c = ParseCursor::new(data);
        let version = c.read_u32_le()?;
        match version {
            1 => {
                let toc_offset = c.read_u32_le()?;
                let toc_count = c.read_u32_le()?;
                let entries_offset = c.read_u32_le()?;
                let entries_count = c.read_u32_le()?;
                let entries_size = c.read_u32_le()?;
                Ok(SlideInfo::V1 {
                        toc_offset,
                        toc_count,
                        entries_offset,
                        entries_count,
                        entries_size,
                    })
            }
            2 => {
                let page_size = c.read_u32_le()?;
                let page_starts_offset = c.read_u32_le()?;
                let page_starts_count = c.read_u32_le()?;
                let page_extras_offset = c.read_u32_le()?;
                let page_extras_count = c.read_u32_le()?;
                let _delta_mask = c.read_u64_le()?;
                let _value_add = c.read_u64_le()?;
                let _ = (page_starts_offset, page_extras_offset);
                Ok(SlideInfo::V2 {
                        page_size,
                        page_starts_count,
                        page_extras_count,
                    })
            }
            3 => {
                let page_size = c.read_u32_le()?;
                let page_starts_count = c.read_u32_le()?;
                if page_starts_count as u64 > MAX_PAGE_STARTS {
                    return Err(Error::SlideInfoParseError(
                            "page_starts_count exceeded the 1,000,000 cap",
                        ));
                }
                let auth_value_add = c.read_u64_le()?;
                let mut page_starts = Vec::with_capacity(page_starts_count as usize);
                for _ in 0..page_starts_count {
                    page_starts.push(c.read_u16_le()?);
                }
                Ok(SlideInfo::V3 {
                        page_size,
                        page_starts_count,
                        auth_value_add,
                        page_starts,
                    })
            }
            4 => {
                let page_size = c.read_u32_le()?;
                let page_starts_offset = c.read_u32_le()?;
                let page_starts_count = c.read_u32_le()?;
                let page_extras_offset = c.read_u32_le()?;
                let page_extras_count = c.read_u32_le()?;
                let _delta_mask = c.read_u32_le()?;
                let _value_add = c.read_u32_le()?;
                let _ = (page_starts_offset, page_extras_offset);
                Ok(SlideInfo::V4 {
                        page_size,
                        page_starts_count,
                        page_extras_count,
                    })
            }
            5 => {
                let page_size = c.read_u32_le()?;
                let page_starts_count = c.read_u32_le()?;
                if page_starts_count as u64 > MAX_PAGE_STARTS {
                    return Err(Error::SlideInfoParseError(
                            "page_starts_count exceeded the 1,000,000 cap",
                        ));
                }
                let value_add = c.read_u64_le()?;
                let mut page_starts = Vec::with_capacity(page_starts_count as usize);
                for _ in 0..page_starts_count {
                    page_starts.push(c.read_u16_le()?);
                }
                Ok(SlideInfo::V5 {
                        page_size,
                        page_starts_count,
                        value_add,
                        page_starts,
                    })
            }
            other => Err(Error::UnknownSlideInfoVersion(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_bytes(values: &[(u8, u64)]) -> Vec<u8> {
        let mut out = Vec::new();
        for &(width, value) in values {
            out.extend_from_slice(&value.to_le_bytes()[..width as usize]);
        }
        out
    }

    #[test]
    fn mapping_info_round_trips() {
        let bytes = le_bytes(&[(8, 0x1000), (8, 0x2000), (8, 0), (4, 7), (4, 3)]);
        let m = MappingInfo::parse(&bytes).unwrap();
        assert_eq!(m.address, 0x1000);
        assert_eq!(m.size, 0x2000);
        assert!(m.contains(0x1500));
        assert!(!m.contains(0x3500));
    }

    #[test]
    fn mapping_overflowing_end_is_never_contained() {
        let m = MappingInfo {
            address: u64::MAX - 10,
            size: 100,
            file_offset: 0,
            max_prot: 0,
            init_prot: 0,
        };
        assert!(!m.contains(u64::MAX));
        assert!(!m.contains(0));
    }

    #[test]
    fn subcache_v1_suffix_is_index_based() {
        let mut bytes = vec![0u8; 16];
        bytes.extend_from_slice(&42u64.to_le_bytes());
        let entry = SubCacheEntry::parse_v1(&bytes, 3).unwrap();
        assert_eq!(entry.file_suffix.as_deref(), Some(".3"));
        assert_eq!(entry.cache_vm_offset, 42);
    }

    #[test]
    fn subcache_v2_suffix_is_nul_terminated() {
        let mut bytes = vec![0u8; 16];
        bytes.extend_from_slice(&0u64.to_le_bytes());
        let mut suffix = [0u8; 32];
        suffix[..7].copy_from_slice(b".dylib1");
        bytes.extend_from_slice(&suffix);
        let entry = SubCacheEntry::parse_v2(&bytes).unwrap();
        assert_eq!(entry.file_suffix.as_deref(), Some(".dylib1"));
    }

    #[test]
    fn slide_v3_materialises_page_starts() {
        let mut bytes = 3u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&4096u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes()); // page_starts_count
        bytes.extend_from_slice(&0u64.to_le_bytes()); // auth_value_add
        bytes.extend_from_slice(&0x1111u16.to_le_bytes());
        bytes.extend_from_slice(&0x2222u16.to_le_bytes());
        match SlideInfo::parse(&bytes).unwrap() {
            SlideInfo::V3 { page_starts, .. } => {
                assert_eq!(page_starts, vec![0x1111, 0x2222]);
            }
            other => panic!("expected V3, got {other:?}"),
        }
    }

    #[test]
    fn slide_v3_rejects_huge_page_starts_count() {
        let mut bytes = 3u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&4096u32.to_le_bytes());
        bytes.extend_from_slice(&2_000_000u32.to_le_bytes());
        assert!(matches!(
                SlideInfo::parse(&bytes),
                Err(Error::SlideInfoParseError(_))
            ));
    }

    #[test]
    fn nlist_type_decomposition() {
        let n = NList {
            string_index: 0,
            n_type_raw: 0x0e | 0x01,
            section: 1,
            desc: 0,
            value: 0x1000,
        };
        assert!(matches!(n.kind(), NListType::Section));
        assert!(n.is_external());
        assert!(!n.is_stab());
    }
}

