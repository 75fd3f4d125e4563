//! Integration coverage for `MultiCacheCoordinator::open`'s subcache and
//! symbols-sidecar discovery.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dyld_cache::{ByteSource, Error, MemoryByteSource, MultiCacheCoordinator};

const MIN_HEADER_WINDOW: usize = 0x118;

fn header_with_subcache(sub_cache_uuid: [u8; 16], symbols_uuid: [u8; 16]) -> Vec<u8> {
    let mapping_offset = MIN_HEADER_WINDOW as u32;
    let mut bytes = vec![0u8; MIN_HEADER_WINDOW];
    bytes[0..6].copy_from_slice(b"dyld_v");
    bytes[6] = b'1';
    bytes[7..16].copy_from_slice(b" arm64\0");
    bytes[0x10..0x14].copy_from_slice(&mapping_offset.to_le_bytes());
    bytes[0x14..0x18].copy_from_slice(&0u32.to_le_bytes()); // mapping count
    bytes[0xA0..0xB0].copy_from_slice(&symbols_uuid); // symbolsFileUUID
    // subCacheArrayOffset/Count: one v1-shaped entry (offset < 0x200).
    bytes[0x9C..0xA0].copy_from_slice(&1u32.to_le_bytes()); // count
    let sub_cache_offset = bytes.len() as u32;
    bytes[0x98..0x9C].copy_from_slice(&sub_cache_offset.to_le_bytes());
    bytes.extend_from_slice(&sub_cache_uuid);
    bytes.extend_from_slice(&0u64.to_le_bytes()); // cacheVMOffset
    bytes
}

fn minimal_subcache_bytes(uuid: [u8; 16]) -> Vec<u8> {
    let mut bytes = vec![0u8; MIN_HEADER_WINDOW];
    bytes[0..6].copy_from_slice(b"dyld_v");
    bytes[6] = b'1';
    bytes[7..16].copy_from_slice(b" arm64\0");
    bytes[0x48..0x58].copy_from_slice(&uuid);
    bytes
}

struct FakeFs {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl FakeFs {
    fn new(files: HashMap<PathBuf, Vec<u8>>) -> Self {
        FakeFs {
            files: Mutex::new(files),
        }
    }

    fn open(&self, path: &Path) -> std::io::Result<Option<Box<dyn ByteSource>>> {
        let files = self.files.lock().unwrap();
        match files.get(path) {
            Some(bytes) => Ok(Some(Box::new(MemoryByteSource::new(bytes.clone())))),
            None => Ok(None),
        }
    }
}

#[test]
fn missing_required_subcache_is_an_error() {
    let sub_uuid = [0x11u8; 16];
    let main_bytes = header_with_subcache(sub_uuid, [0u8; 16]);
    let mut files = HashMap::new();
    files.insert(PathBuf::from("/cache/main"), main_bytes);
    let fs = FakeFs::new(files);

    let result = MultiCacheCoordinator::open(
        Path::new("/cache/main"),
        &|p| fs.open(p),
        true,
        false,
    );
    assert!(matches!(result, Err(Error::SubCacheNotFound(_))));
}

#[test]
fn missing_optional_subcache_is_skipped() {
    let sub_uuid = [0x11u8; 16];
    let main_bytes = header_with_subcache(sub_uuid, [0u8; 16]);
    let mut files = HashMap::new();
    files.insert(PathBuf::from("/cache/main"), main_bytes);
    let fs = FakeFs::new(files);

    let coordinator = MultiCacheCoordinator::open(
        Path::new("/cache/main"),
        &|p| fs.open(p),
        false,
        false,
    )
        .unwrap();
    assert_eq!(coordinator.sub_caches().count(), 0);
}

#[test]
fn mismatched_subcache_uuid_is_rejected() {
    let declared_uuid = [0x11u8; 16];
    let actual_uuid = [0x22u8; 16];
    let main_bytes = header_with_subcache(declared_uuid, [0u8; 16]);
    let mut files = HashMap::new();
    files.insert(PathBuf::from("/cache/main"), main_bytes);
    files.insert(
        PathBuf::from("/cache/main.1"),
        minimal_subcache_bytes(actual_uuid),
    );
    let fs = FakeFs::new(files);

    let result = MultiCacheCoordinator::open(
        Path::new("/cache/main"),
        &|p| fs.open(p),
        true,
        false,
    );
    assert!(matches!(result, Err(Error::SubCacheUUIDMismatch { .. })));
}

#[test]
fn matching_subcache_is_opened_and_available() {
    let uuid = [0x33u8; 16];
    let main_bytes = header_with_subcache(uuid, [0u8; 16]);
    let mut files = HashMap::new();
    files.insert(PathBuf::from("/cache/main"), main_bytes);
    files.insert(PathBuf::from("/cache/main.1"), minimal_subcache_bytes(uuid));
    let fs = FakeFs::new(files);

    let coordinator = MultiCacheCoordinator::open(
        Path::new("/cache/main"),
        &|p| fs.open(p),
        true,
        false,
    )
        .unwrap();
    assert_eq!(coordinator.sub_caches().count(), 1);
}

