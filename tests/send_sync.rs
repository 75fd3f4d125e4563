//! Pins the `Send + Sync` invariant from the concurrency model: every
//! core entity is shareable across threads whenever its backing
//! `ByteSource` is.

fn assert_send<T: Send>() {}
fn assert_sync<T: Sync>() {}

#[test]
fn core_types_are_send_and_sync_over_a_sync_byte_source() {
    assert_send::<dyld_cache::SingleCacheView>();
    assert_sync::<dyld_cache::SingleCacheView>();
    assert_send::<dyld_cache::MultiCacheCoordinator>();
    assert_sync::<dyld_cache::MultiCacheCoordinator>();
    assert_send::<dyld_cache::VmAddressResolver>();
    assert_sync::<dyld_cache::VmAddressResolver>();
    assert_send::<dyld_cache::ExportTrie>();
    assert_sync::<dyld_cache::ExportTrie>();
}

#[test]
#[cfg(feature = "mmap")]
fn local_symbols_context_is_send_and_sync() {
    assert_send::<dyld_cache::local_symbols::LocalSymbolsContext>();
    assert_sync::<dyld_cache::local_symbols::LocalSymbolsContext>();
}

