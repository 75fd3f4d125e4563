//! A read-only parser and address resolver for the dyld shared cache
//! format: the multi-gigabyte file macOS and iOS ship containing every
//! system library pre-linked into one shared address space.
//!
//! This crate decodes cache headers and tables, resolves virtual
//! addresses across a main cache and its subcache files, walks Mach-O
//! exports tries, and symbolicates program counters against both
//! exported and local (stripped) symbols. It does not write caches, and
//! it does not execute or load anything — every operation here reads
//! bytes and returns typed values or a typed error.

pub mod arch;
pub mod byte_source;
pub mod cursor;
pub mod error;
pub mod export_trie;
pub mod header;
#[cfg(feature = "mmap")]
pub mod local_symbols;
pub mod macho_locator;
pub mod multi_cache;
pub mod records;
pub mod single_cache;
pub mod vm_resolver;

pub use arch::{Architecture, CacheType, PlatformId};
pub use byte_source::{ByteSource, MemoryByteSource};
pub use error::{Error, Result};
pub use export_trie::{ExportFlags, ExportKind, ExportTerminal, ExportTrie, ExportedSymbol};
pub use header::{CacheFlags, CacheHeader, TableRef};
pub use multi_cache::{ImageIndex, MultiCacheCoordinator, SymbolicatedAddress};
pub use records::{
    ImageInfo, ImageTextInfo, LocalSymbolsEntry, LocalSymbolsInfo, MappingAndSlideInfo, MappingInfo,
    NList, SlideInfo, SubCacheEntry,
};
pub use single_cache::SingleCacheView;
pub use vm_resolver::{ResolvableMapping, VmAddressResolver};

#[cfg(feature = "mmap")]
pub use local_symbols::{LazyStringPool, LocalSymbol, LocalSymbolsContext};

#[cfg(feature = "std")]
pub use byte_source::FileByteSource;
#[cfg(feature = "mmap")]
pub use byte_source::MmapByteSource;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_api_surface_compiles() {
        let _ = std::any::type_name::<Error>();
        let _ = std::any::type_name::<SingleCacheView>();
        let _ = std::any::type_name::<MultiCacheCoordinator>();
    }
}

