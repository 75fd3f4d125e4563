//! Closed enums decoded from the cache header.
//!
//! Each follows the teacher's own habit (`src/read/macho.rs`'s
//! `architecture()` match) of a closed enum with an explicit
//! catch-all/default arm rather than a raw integer.

/// The architecture a cache was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    Arm64,
    Arm64e,
    Arm64_32,
    X86_64,
    X86_64h,
    I386,
}

impl Architecture {
    /// Whether this architecture uses 64-bit pointers.
    pub fn is_64_bit(self) -> bool {
        !matches!(self, Architecture::Arm64_32 | Architecture::I386)
    }

    /// Whether this architecture signs pointers with PAC (arm64e only).
    pub fn uses_pac(self) -> bool {
        matches!(self, Architecture::Arm64e)
    }

    /// Recognize the trimmed architecture suffix of a dyld cache magic
    /// string (the bytes after `"dyld_v1"` and padding spaces, up to the
    /// trailing NUL).
    pub fn from_magic_suffix(suffix: &str) -> Option<Architecture> {
        match suffix.trim() {
            "arm64" => Some(Architecture::Arm64),
            "arm64e" => Some(Architecture::Arm64e),
            "arm64_32" => Some(Architecture::Arm64_32),
            "x86_64" => Some(Architecture::X86_64),
            "x86_64h" => Some(Architecture::X86_64h),
            "i386" => Some(Architecture::I386),
            _ => None,
        }
    }
}

/// The platform a cache targets. Unrecognized values decode to `Unknown`
/// rather than failing the parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PlatformId {
    MacOS,
    IOS,
    TvOS,
    WatchOS,
    BridgeOS,
    MacCatalyst,
    IOSSimulator,
    TvOSSimulator,
    WatchOSSimulator,
    DriverKit,
    Unknown(u32),
}

impl PlatformId {
    pub fn from_raw(value: u32) -> Self {
        match value {
            1 => PlatformId::MacOS,
            2 => PlatformId::IOS,
            3 => PlatformId::TvOS,
            4 => PlatformId::WatchOS,
            5 => PlatformId::BridgeOS,
            6 => PlatformId::MacCatalyst,
            7 => PlatformId::IOSSimulator,
            8 => PlatformId::TvOSSimulator,
            9 => PlatformId::WatchOSSimulator,
            10 => PlatformId::DriverKit,
            other => PlatformId::Unknown(other),
        }
    }
}

/// The kind of cache. Unknown raw values default to
/// `Development`, matching spec §4.3 ("cache type defaults to
/// development on unknown").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheType {
    Development,
    Production,
    Multi,
}

impl CacheType {
    pub fn from_raw(value: u64) -> Self {
        match value {
            0 => CacheType::Development,
            1 => CacheType::Production,
            2 => CacheType::Multi,
            _ => CacheType::Development,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm64e_is_64_bit_and_uses_pac() {
        assert!(Architecture::Arm64e.is_64_bit());
        assert!(Architecture::Arm64e.uses_pac());
        assert!(!Architecture::X86_64.uses_pac());
    }

    #[test]
    fn arm64_32_is_32_bit_despite_the_name() {
        assert!(!Architecture::Arm64_32.is_64_bit());
    }

    #[test]
    fn unknown_platform_does_not_fail() {
        assert_eq!(PlatformId::from_raw(9999), PlatformId::Unknown(9999));
    }

    #[test]
    fn unknown_cache_type_defaults_to_development() {
        assert_eq!(CacheType::from_raw(99), CacheType::Development);
    }
}

