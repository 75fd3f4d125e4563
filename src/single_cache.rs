//! Decodes one cache file's header and tables into an immutable view.

use crate::byte_source::ByteSource;
use crate::error::{Error, Result};
use crate::header::CacheHeader;
use crate::records::{
    ImageInfo, ImageTextInfo, LocalSymbolsInfo, MappingAndSlideInfo, MappingInfo, SubCacheEntry,
};
use crate::vm_resolver::{ResolvableMapping, VmAddressResolver};

/// The window read up front to decode the header.
const HEADER_PREFIX_CAP: u64 = 4096;

/// One fully-decoded cache file: header, tables, and the address
/// resolver built over whichever mapping table is present. Immutable
/// once built: any number of threads may query it concurrently.
#[derive(Debug, Clone)]
pub struct SingleCacheView {
    header: CacheHeader,
    mappings: Vec<MappingInfo>,
    mappings_with_slide: Vec<MappingAndSlideInfo>,
    images: Vec<ImageInfo>,
    images_text: Vec<ImageTextInfo>,
    sub_caches: Vec<SubCacheEntry>,
    vm_resolver: VmAddressResolver,
    file_size: u64,
}

fn read_table<T>(
    source: &dyn ByteSource,
    offset: u64,
    count: u64,
    entry_size: u64,
    parse_one: impl Fn(&[u8]) -> Result<T>,
) -> Result<Vec<T>> {
    if offset == 0 || count == 0 {
        return Ok(Vec::new());
    }
    let file_size = source.size();
    let total_bytes = count
        .checked_mul(entry_size)
        .ok_or_else(|| Error::InvalidMachO("unreasonable table size (count * entrySize overflowed)"))?;
    let end = offset
        .checked_add(total_bytes)
        .ok_or_else(|| Error::InvalidMachO("unreasonable table range (offset + bytes overflowed)"))?;
    if end > file_size {
        return Err(Error::InvalidMachO(
                "table offset + count * entrySize exceeded the file size",
            ));
    }
    let bytes = source.read(offset, total_bytes)?;
    if (bytes.len() as u64) < total_bytes {
        return Err(Error::RangeOutOfBounds {
                offset,
                length: total_bytes,
                size: file_size,
            });
    }
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        let start = (i * entry_size) as usize;
        let end = start + entry_size as usize;
        out.push(parse_one(&bytes[start..end])?);
    }
    Ok(out)
}

impl SingleCacheView {
    /// Decode one cache file from a `ByteSource`.
    pub fn parse(source: &dyn ByteSource) -> Result<Self> {
        let file_size = source.size();
        let prefix_len = file_size.min(HEADER_PREFIX_CAP);
        let prefix = source.read(0, prefix_len)?;
        let header = CacheHeader::parse(&prefix)?;

        let mappings = read_table(
            source,
            header.mapping_table.offset,
            header.mapping_table.count,
            MappingInfo::WIRE_SIZE as u64,
            MappingInfo::parse,
        )?;
        let mappings_with_slide = read_table(
            source,
            header.mapping_with_slide_table.offset,
            header.mapping_with_slide_table.count,
            MappingAndSlideInfo::WIRE_SIZE as u64,
            MappingAndSlideInfo::parse,
        )?;
        let images = read_table(
            source,
            header.images_table.offset,
            header.images_table.count,
            ImageInfo::WIRE_SIZE as u64,
            ImageInfo::parse,
        )?;
        let images_text = read_table(
            source,
            header.images_text_table.offset,
            header.images_text_table.count,
            ImageTextInfo::WIRE_SIZE as u64,
            ImageTextInfo::parse,
        )?;

        let sub_cache_entry_size = if header.subcache_entries_are_v2() {
            SubCacheEntry::WIRE_SIZE_V2
        } else {
            SubCacheEntry::WIRE_SIZE_V1
        };
        let sub_caches = if header.sub_cache_table.offset == 0 || header.sub_cache_table.count == 0
        {
            Vec::new()
        } else {
            let total_bytes = header
                .sub_cache_table
                .count
                .checked_mul(sub_cache_entry_size as u64)
                .ok_or_else(|| {
                    Error::InvalidMachO("unreasonable table size (count * entrySize overflowed)")
                })?;
            let end = header
                .sub_cache_table
                .offset
                .checked_add(total_bytes)
                .ok_or_else(|| {
                    Error::InvalidMachO("unreasonable table range (offset + bytes overflowed)")
                })?;
            if end > file_size {
                return Err(Error::InvalidMachO(
                        "table offset + count * entrySize exceeded the file size",
                    ));
            }
            let bytes = source.read(header.sub_cache_table.offset, total_bytes)?;
            if (bytes.len() as u64) < total_bytes {
                return Err(Error::RangeOutOfBounds {
                        offset: header.sub_cache_table.offset,
                        length: total_bytes,
                        size: file_size,
                    });
            }
            let mut out = Vec::with_capacity(header.sub_cache_table.count as usize);
            for i in 0..header.sub_cache_table.count {
                let start = (i as usize) * sub_cache_entry_size;
                let end = start + sub_cache_entry_size;
                let entry_bytes = &bytes[start..end];
                let entry = if header.subcache_entries_are_v2() {
                    SubCacheEntry::parse_v2(entry_bytes)?
                } else {
                    SubCacheEntry::parse_v1(entry_bytes, (i + 1) as usize)?
                };
                out.push(entry);
            }
            out
        };

        let resolvable: Vec<ResolvableMapping> = if !mappings_with_slide.is_empty() {
            mappings_with_slide.iter().copied().map(Into::into).collect()
        } else {
            mappings.iter().copied().map(Into::into).collect()
        };
        let vm_resolver = VmAddressResolver::new(resolvable);

        Ok(SingleCacheView {
                header,
                mappings,
                mappings_with_slide,
                images,
                images_text,
                sub_caches,
                vm_resolver,
                file_size,
            })
    }

    pub fn header(&self) -> &CacheHeader {
        &self.header
    }

    pub fn mappings(&self) -> &[MappingInfo] {
        &self.mappings
    }

    pub fn mappings_with_slide(&self) -> &[MappingAndSlideInfo] {
        &self.mappings_with_slide
    }

    pub fn images(&self) -> &[ImageInfo] {
        &self.images
    }

    pub fn images_text(&self) -> &[ImageTextInfo] {
        &self.images_text
    }

    pub fn sub_caches(&self) -> &[SubCacheEntry] {
        &self.sub_caches
    }

    pub fn vm_resolver(&self) -> &VmAddressResolver {
        &self.vm_resolver
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Read and decode this cache's `LocalSymbolsInfo` record from
    /// `header().local_symbols_offset`, if the header declares one present.
    /// `source` must be the same `ByteSource` this view was parsed from.
    pub fn local_symbols_info(&self, source: &dyn ByteSource) -> Result<Option<LocalSymbolsInfo>> {
        if self.header.local_symbols_offset == 0 || self.header.local_symbols_size == 0 {
            return Ok(None);
        }
        let bytes = source.read(self.header.local_symbols_offset, LocalSymbolsInfo::WIRE_SIZE as u64)?;
        if (bytes.len() as u64) < LocalSymbolsInfo::WIRE_SIZE as u64 {
            return Err(Error::InvalidLocalSymbolsInfo);
        }
        Ok(Some(LocalSymbolsInfo::parse(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_source::MemoryByteSource;
    use crate::header::MIN_HEADER_WINDOW;

    fn minimal_header(mapping_offset: u32, mapping_count: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; MIN_HEADER_WINDOW];
        bytes[0..6].copy_from_slice(b"dyld_v");
        bytes[6] = b'1';
        bytes[7..16].copy_from_slice(b" arm64\0");
        bytes[0x10..0x14].copy_from_slice(&mapping_offset.to_le_bytes());
        bytes[0x14..0x18].copy_from_slice(&mapping_count.to_le_bytes());
        bytes
    }

    #[test]
    fn empty_tables_yield_empty_lists() {
        let bytes = minimal_header(0, 0);
        let source = MemoryByteSource::new(bytes);
        let view = SingleCacheView::parse(&source).unwrap();
        assert!(view.mappings().is_empty());
        assert!(view.sub_caches().is_empty());
    }

    #[test]
    fn mapping_table_decodes_and_feeds_the_resolver() {
        let mapping_offset = MIN_HEADER_WINDOW as u32;
        let mut bytes = minimal_header(mapping_offset, 1);
        bytes.resize(mapping_offset as usize, 0);
        let mut entry = 0x2000u64.to_le_bytes().to_vec();
        entry.extend_from_slice(&0x1000u64.to_le_bytes());
        entry.extend_from_slice(&0u64.to_le_bytes());
        entry.extend_from_slice(&3u32.to_le_bytes());
        entry.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&entry);
        let source = MemoryByteSource::new(bytes);
        let view = SingleCacheView::parse(&source).unwrap();
        assert_eq!(view.mappings().len(), 1);
        assert_eq!(view.vm_resolver().file_offset(0x2500), Some(0x500));
    }

    #[test]
    fn table_extending_past_file_size_is_an_error() {
        let bytes = minimal_header(MIN_HEADER_WINDOW as u32, 1_000_000);
        let source = MemoryByteSource::new(bytes);
        assert!(matches!(
                SingleCacheView::parse(&source),
                Err(Error::InvalidMachO(_))
            ));
    }
}

