//! Local (stripped) symbol resolution via a tempfile-backed string pool.

use crate::byte_source::ByteSource;
use crate::error::{Error, Result};
use crate::records::{LocalSymbolsEntry, LocalSymbolsInfo, NList};

/// Bytes streamed per chunk while materializing the string pool.
const STREAM_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// A memory-mapped copy of the local-symbols string table, backed by a
/// deleted-on-drop temp file.
///
/// Grounded in the teacher's `dyldcachedump` example, which
/// `memmap2::Mmap::map`s a file before reading from it; here the file is
/// one this crate creates and owns for the pool's lifetime, the way
/// `rust-minidump`'s writer streams large buffers through `tempfile`
/// before handing callers a stable view.
pub struct LazyStringPool {
    backing: PoolBacking,
}

enum PoolBacking {
    /// `memmap2::Mmap::map` errors on a zero-length file, so an empty pool
    /// is represented directly rather than mapped.
    Empty,
    Mapped {
        _file: tempfile::NamedTempFile,
        mmap: memmap2::Mmap,
    },
}

impl LazyStringPool {
    /// Stream `total_size` bytes from `source` starting at `base_offset`
    /// into a fresh temp file, then map it read-only.
    pub fn build(source: &dyn ByteSource, base_offset: u64, total_size: u64) -> Result<Self> {
        if total_size == 0 {
            return Ok(LazyStringPool {
                    backing: PoolBacking::Empty,
                });
        }
        let mut file = tempfile::NamedTempFile::new().map_err(Error::FileReadError)?;
        let result = Self::stream_into(&mut file, source, base_offset, total_size);
        if let Err(e) = result {
            // Constructor failures must delete the partial temp file
            // before propagating; `NamedTempFile` does this on
            // drop, so we just let `file` fall out of scope here.
            return Err(e);
        }
        let std_file = file.reopen().map_err(Error::FileReadError)?;
        let mmap = unsafe { memmap2::Mmap::map(&std_file).map_err(Error::FileReadError)? };
        Ok(LazyStringPool {
                backing: PoolBacking::Mapped { _file: file, mmap },
            })
    }

    fn stream_into(
        file: &mut tempfile::NamedTempFile,
        source: &dyn ByteSource,
        base_offset: u64,
        total_size: u64,
    ) -> Result<()> {
        use std::io::Write;
        let mut remaining = total_size;
        let mut pos = base_offset;
        while remaining > 0 {
            let want = remaining.min(STREAM_CHUNK_SIZE);
            let chunk = source.read(pos, want)?;
            if chunk.is_empty() {
                break;
            }
            file.write_all(&chunk).map_err(Error::FileReadError)?;
            pos += chunk.len() as u64;
            remaining -= chunk.len() as u64;
            if (chunk.len() as u64) < want {
                break;
            }
        }
        file.flush().map_err(Error::FileReadError)?;
        Ok(())
    }

    /// Read the NUL-terminated string starting at `pool_offset`;
    /// out-of-bounds yields an empty string.
    pub fn string_at(&self, pool_offset: u64) -> String {
        let data: &[u8] = match &self.backing {
            PoolBacking::Empty => &[],
            PoolBacking::Mapped { mmap, .. } => &mmap[..],
        };
        let start = match usize::try_from(pool_offset) {
            Ok(v) if v <= data.len() => v,
            _ => return String::new(),
        };
        let tail = &data[start..];
        let nul_pos = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        String::from_utf8_lossy(&tail[..nul_pos]).into_owned()
    }
}

/// The shared, reusable context for resolving local symbols across many
/// images from the same cache.
pub struct LocalSymbolsContext {
    info: LocalSymbolsInfo,
    entries_offset: u64,
    nlist_offset: u64,
    use_64_bit_dylib_offset: bool,
    pool: LazyStringPool,
}

/// One resolved local symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSymbol {
    pub name: String,
    pub nlist: NList,
}

impl LocalSymbolsContext {
    /// Build a shared context from the header's `localSymbolsOffset`
    /// window. `use_64_bit_dylib_offset` selects the 16- vs
    /// 12-byte `LocalSymbolsEntry` wire shape.
    pub fn build(
        source: &dyn ByteSource,
        base_offset: u64,
        info: LocalSymbolsInfo,
        use_64_bit_dylib_offset: bool,
    ) -> Result<Self> {
        let source_size = source.size();
        let strings_start = base_offset
            .checked_add(info.strings_offset as u64)
            .ok_or(Error::InvalidLocalSymbolsInfo)?;
        let strings_end = strings_start
            .checked_add(info.strings_size as u64)
            .ok_or(Error::InvalidLocalSymbolsInfo)?;
        if strings_end > source_size {
            return Err(Error::InvalidLocalSymbolsInfo);
        }
        let pool = LazyStringPool::build(source, strings_start, info.strings_size as u64)?;
        let entries_offset = base_offset
            .checked_add(info.entries_offset as u64)
            .ok_or(Error::InvalidLocalSymbolsInfo)?;
        let nlist_offset = base_offset
            .checked_add(info.nlist_offset as u64)
            .ok_or(Error::InvalidLocalSymbolsInfo)?;
        Ok(LocalSymbolsContext {
                info,
                entries_offset,
                nlist_offset,
                use_64_bit_dylib_offset,
                pool,
            })
    }

    /// Resolve every local symbol for the image at `entry_index`.
    pub fn symbols_for_image(
        &self,
        source: &dyn ByteSource,
        entry_index: u64,
    ) -> Result<Vec<LocalSymbol>> {
        if entry_index >= self.info.entries_count as u64 {
            return Err(Error::ImageIndexOutOfBounds {
                    index: entry_index,
                    count: self.info.entries_count as u64,
                });
        }
        let entry_size = LocalSymbolsEntry::wire_size(self.use_64_bit_dylib_offset) as u64;
        let entry_offset = self
            .entries_offset
            .checked_add(entry_index.checked_mul(entry_size).ok_or(Error::InvalidLocalSymbolsInfo)?)
            .ok_or(Error::InvalidLocalSymbolsInfo)?;
        let entry_bytes = source.read(entry_offset, entry_size)?;
        if (entry_bytes.len() as u64) < entry_size {
            return Err(Error::RangeOutOfBounds {
                    offset: entry_offset,
                    length: entry_size,
                    size: source.size(),
                });
        }
        let entry = LocalSymbolsEntry::parse(&entry_bytes, self.use_64_bit_dylib_offset)?;

        let nlist_span = (entry.nlist_start_index as u64)
            .checked_mul(NList::WIRE_SIZE_64 as u64)
            .ok_or(Error::InvalidLocalSymbolsInfo)?;
        let nlist_start = self
            .nlist_offset
            .checked_add(nlist_span)
            .ok_or(Error::InvalidLocalSymbolsInfo)?;
        let total_bytes = (entry.nlist_count as u64)
            .checked_mul(NList::WIRE_SIZE_64 as u64)
            .ok_or(Error::InvalidLocalSymbolsInfo)?;
        let nlist_bytes = source.read(nlist_start, total_bytes)?;
        if (nlist_bytes.len() as u64) < total_bytes {
            return Err(Error::RangeOutOfBounds {
                    offset: nlist_start,
                    length: total_bytes,
                    size: source.size(),
                });
        }

        let mut out = Vec::with_capacity(entry.nlist_count as usize);
        for i in 0..entry.nlist_count as usize {
            let start = i * NList::WIRE_SIZE_64;
            let end = start + NList::WIRE_SIZE_64;
            let nlist = NList::parse_64(&nlist_bytes[start..end])?;
            let name = self.pool.string_at(nlist.string_index as u64);
            if name.is_empty() {
                continue;
            }
            out.push(LocalSymbol { name, nlist });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_source::MemoryByteSource;

    fn build_cache(
        nlist_records: &[(u32, u8, u8, u16, u64)],
        strings: &[u8],
    ) -> (Vec<u8>, LocalSymbolsInfo) {
        let entries_count = 1u32;
        let nlist_count = nlist_records.len() as u32;

        let nlist_offset = 24u32; // right after the LocalSymbolsInfo header-sized prefix
        let nlist_bytes_len = nlist_count as usize * NList::WIRE_SIZE_64;
        let strings_offset = nlist_offset + nlist_bytes_len as u32;
        let entries_offset = strings_offset + strings.len() as u32;

        let info = LocalSymbolsInfo {
            nlist_offset,
            nlist_count,
            strings_offset,
            strings_size: strings.len() as u32,
            entries_offset,
            entries_count,
        };

        let mut data = vec![0u8; nlist_offset as usize];
        for &(string_index, n_type, section, desc, value) in nlist_records {
            data.extend_from_slice(&string_index.to_le_bytes());
            data.push(n_type);
            data.push(section);
            data.extend_from_slice(&desc.to_le_bytes());
            data.extend_from_slice(&value.to_le_bytes());
        }
        data.extend_from_slice(strings);
        // one LocalSymbolsEntry (16-byte shape): dylibOffset, startIndex, count
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&nlist_count.to_le_bytes());
        (data, info)
    }

    #[test]
    fn resolves_names_and_drops_empty_ones() {
        let strings = b"\0_foo\0\0_bar\0";
        let records = [(1u32, 0, 0, 0, 0x1000u64), (7u32, 0, 0, 0, 0x2000u64), (0u32, 0, 0, 0, 0)];
        let (data, info) = build_cache(&records, strings);
        let source = MemoryByteSource::new(data);
        let ctx = LocalSymbolsContext::build(&source, 0, info, true).unwrap();
        let symbols = ctx.symbols_for_image(&source, 0).unwrap();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "_foo");
        assert_eq!(symbols[1].name, "_bar");
    }

    #[test]
    fn out_of_range_entry_index_errors() {
        let (data, info) = build_cache(&[], b"");
        let source = MemoryByteSource::new(data);
        let ctx = LocalSymbolsContext::build(&source, 0, info, true).unwrap();
        assert!(matches!(
                ctx.symbols_for_image(&source, 5),
                Err(Error::ImageIndexOutOfBounds { .. })
            ));
    }

    #[test]
    fn strings_window_past_source_size_is_rejected() {
        let mut info = LocalSymbolsInfo {
            nlist_offset: 0,
            nlist_count: 0,
            strings_offset: 0,
            strings_size: 1000,
            entries_offset: 0,
            entries_count: 0,
        };
        let source = MemoryByteSource::new(vec![0u8; 10]);
        assert!(LocalSymbolsContext::build(&source, 0, info, true).is_err());
        info.strings_size = 5;
        assert!(LocalSymbolsContext::build(&source, 0, info, true).is_ok());
    }
}

