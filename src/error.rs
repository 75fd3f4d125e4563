//! The unified error taxonomy for this crate.

use std::result;

/// The error type returned by every fallible operation in this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // -- Header --
    #[error("magic bytes did not start with \"dyld_v\" or were truncated")]
    InvalidMagic,
    #[error("dyld cache magic named an unrecognized architecture")]
    UnsupportedArchitecture,
    #[error("header window was smaller than the minimum parseable size (0x118 bytes)")]
    HeaderTooSmall,
    #[error("unsupported cache header format version {0}")]
    UnsupportedFormatVersion(u8),

    // -- Bounds --
    #[error("offset {offset:#x} is out of bounds for a source of size {size:#x}")]
    OffsetOutOfBounds { offset: u64, size: u64 },
    #[error("range {offset:#x}..+{length:#x} is out of bounds for a source of size {size:#x}")]
    RangeOutOfBounds {
        offset: u64,
        length: u64,
        size: u64,
    },
    #[error("image index {index} is out of bounds (there are {count} images)")]
    ImageIndexOutOfBounds { index: u64, count: u64 },
    #[error("string pool offset {0:#x} is not valid")]
    InvalidStringOffset(u64),
    #[error("virtual address {0:#x} is not covered by any known mapping")]
    VmAddressNotMapped(u64),

    // -- Structure --
    #[error("mapping table offset/count overflowed or exceeded the file size")]
    InvalidMappingInfo,
    #[error("image table offset/count overflowed or exceeded the file size")]
    InvalidImageInfo,
    #[error("local-symbols info table was malformed or out of bounds")]
    InvalidLocalSymbolsInfo,

    // -- Trie --
    #[error("export trie node was malformed: {0}")]
    InvalidExportTrieFormat(&'static str),
    #[error("export trie data ended before a node or payload could be fully read")]
    UnexpectedEndOfTrie,
    #[error("ULEB128 value did not terminate within 10 bytes")]
    InvalidULEB128,

    // -- Mach-O --
    #[error("Mach-O header or load commands were malformed: {0}")]
    InvalidMachO(&'static str),

    // -- Slide info --
    #[error("unknown slide info version {0}")]
    UnknownSlideInfoVersion(u32),
    #[error("slide info could not be parsed: {0}")]
    SlideInfoParseError(&'static str),

    // -- Multi-cache --
    #[error("subcache file {0:?} was required but could not be found")]
    SubCacheNotFound(std::path::PathBuf),
    #[error("symbols sidecar file {0:?} was required but could not be found")]
    SymbolsFileNotFound(std::path::PathBuf),
    #[error("subcache {path:?} UUID mismatch: parent declared {expected:?}, file has {actual:?}")]
    SubCacheUUIDMismatch {
        path: std::path::PathBuf,
        expected: uuid::Uuid,
        actual: uuid::Uuid,
    },

    // -- Symbol --
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),
    #[error("nlist symbol type byte {0:#x} is not a recognized type")]
    InvalidSymbolType(u8),
    #[error("export trie flags {0:#x} combined kind/attribute bits inconsistently")]
    InvalidExportFlags(u64),

    // -- I/O --
    #[error("I/O error reading the underlying byte source: {0}")]
    FileReadError(#[from] std::io::Error),
    #[error("file was too small to contain a valid cache ({size} bytes)")]
    FileTooSmall { size: u64 },
}

/// The result type used throughout this crate.
pub type Result<T> = result::Result<T, Error>;

