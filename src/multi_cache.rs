//! Coordinates a main cache file with its subcaches and optional symbols
//! sidecar into one address space.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::byte_source::ByteSource;
use crate::error::{Error, Result};
use crate::export_trie::{ExportKind, ExportTrie, ExportedSymbol};
#[cfg(feature = "mmap")]
use crate::local_symbols::{LocalSymbol, LocalSymbolsContext};
use crate::macho_locator::locate_exports_trie;
use crate::single_cache::SingleCacheView;

/// Maps a path to a `ByteSource`; `Ok(None)` means "file does not exist".
pub type Opener<'a> = dyn Fn(&Path) -> std::io::Result<Option<Box<dyn ByteSource>>> + 'a;

/// One resolved symbol offset inside an image, used for PC symbolication.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SymbolEntry {
    offset: u64,
    name: String,
}

/// A resolved `(name, pcOffset, matchOffset, addend)` symbolication
/// result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicatedAddress {
    pub name: String,
    pub pc_offset: u64,
    pub match_offset: u64,
    pub addend: u64,
}

/// Coordinates a main cache plus its subcaches and symbols sidecar,
/// presenting one virtual address space. Immutable once
/// built.
pub struct MultiCacheCoordinator {
    main: SingleCacheView,
    main_source: Box<dyn ByteSource>,
    sub_caches: Vec<(SingleCacheView, Box<dyn ByteSource>)>,
    symbols: Option<(SingleCacheView, Box<dyn ByteSource>)>,
}

impl MultiCacheCoordinator {
    /// Open and coordinate a split cache.
    pub fn open(
        main_path: &Path,
        opener: &Opener<'_>,
        require_all_sub_caches: bool,
        require_symbols_file: bool,
    ) -> Result<Self> {
        let main_source = open_required(opener, main_path)?;
        let main = SingleCacheView::parse(main_source.as_ref())?;

        let dir = main_path.parent().unwrap_or_else(|| Path::new(""));
        let main_file_name = main_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut sub_caches = Vec::new();
        for entry in main.sub_caches() {
            let suffix = entry.file_suffix.clone().unwrap_or_default();
            let sub_path = dir.join(format!("{main_file_name}{suffix}"));
            match opener(&sub_path).map_err(Error::FileReadError)? {
                None => {
                    if require_all_sub_caches {
                        return Err(Error::SubCacheNotFound(sub_path));
                    }
                    continue;
                }
                Some(source) => {
                    let view = SingleCacheView::parse(source.as_ref())?;
                    if view.header().cache_uuid != entry.uuid {
                        return Err(Error::SubCacheUUIDMismatch {
                                path: sub_path,
                                expected: uuid::Uuid::from_bytes(entry.uuid),
                                actual: uuid::Uuid::from_bytes(view.header().cache_uuid),
                            });
                    }
                    sub_caches.push((view, source));
                }
            }
        }

        let symbols = if main.header().has_symbols_subcache() {
            let symbols_path = PathBuf::from(format!("{}.symbols", main_path.display()));
            match opener(&symbols_path).map_err(Error::FileReadError)? {
                None => {
                    if require_symbols_file {
                        return Err(Error::SymbolsFileNotFound(symbols_path));
                    }
                    None
                }
                Some(source) => {
                    let view = SingleCacheView::parse(source.as_ref())?;
                    if view.header().cache_uuid != main.header().symbols_file_uuid {
                        return Err(Error::SubCacheUUIDMismatch {
                                path: symbols_path,
                                expected: uuid::Uuid::from_bytes(main.header().symbols_file_uuid),
                                actual: uuid::Uuid::from_bytes(view.header().cache_uuid),
                            });
                    }
                    Some((view, source))
                }
            }
        } else {
            None
        };

        Ok(MultiCacheCoordinator {
                main,
                main_source,
                sub_caches,
                symbols,
            })
    }

    pub fn main(&self) -> &SingleCacheView {
        &self.main
    }

    pub fn sub_caches(&self) -> impl Iterator<Item = &SingleCacheView> {
        self.sub_caches.iter().map(|(v, _)| v)
    }

    /// All files participating in the virtual address space, main first.
    fn files(&self) -> impl Iterator<Item = (&SingleCacheView, &dyn ByteSource)> {
        std::iter::once((&self.main, self.main_source.as_ref())).chain(
            self.sub_caches
                .iter()
                .map(|(v, s)| (v, s.as_ref() as &dyn ByteSource)),
        )
    }

    /// Read `size` bytes starting at `vm_address`, possibly spanning
    /// multiple files.
    pub fn read_bytes(&self, vm_address: u64, size: u64) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(size as usize);
        let mut cursor = vm_address;
        let mut remaining = size;
        while remaining > 0 {
            let (view, source) = self
                .files()
                .find(|(v, _)| v.vm_resolver().mapping_for_vm(cursor).is_some())
                .ok_or(Error::VmAddressNotMapped(cursor))?;
            let mapping = view.vm_resolver().mapping_for_vm(cursor).unwrap();
            let mapping_end = mapping
                .address
                .checked_add(mapping.size)
                .ok_or(Error::VmAddressNotMapped(cursor))?;
            let available = mapping_end - cursor;
            let want = remaining.min(available);
            let file_offset = view
                .vm_resolver()
                .file_offset(cursor)
                .ok_or(Error::VmAddressNotMapped(cursor))?;
            let chunk = source.read(file_offset, want)?;
            if (chunk.len() as u64) < want {
                return Err(Error::RangeOutOfBounds {
                        offset: file_offset,
                        length: want,
                        size: source.size(),
                    });
            }
            out.extend_from_slice(&chunk);
            cursor = cursor
                .checked_add(want)
                .ok_or(Error::VmAddressNotMapped(cursor))?;
            remaining -= want;
        }
        Ok(out)
    }

    /// The file local symbols should be read from: the symbols sidecar when
    /// one was opened, otherwise the main cache file itself (spec §4.8:
    /// caches without a sidecar can still carry local symbols inline).
    #[cfg(feature = "mmap")]
    fn local_symbols_file(&self) -> (&SingleCacheView, &dyn ByteSource) {
        match &self.symbols {
            Some((view, source)) => (view, source.as_ref()),
            None => (&self.main, self.main_source.as_ref()),
        }
    }

    /// Build a shared local-symbols context over whichever file carries
    /// local symbols (the `.symbols` sidecar if opened, else the main
    /// cache), or `None` if neither declares a local-symbols table.
    /// Callers symbolicating many images should build this once and reuse
    /// it (spec §4.8, §9 "shared string pool").
    ///
    /// Requires the `mmap` feature, since [`LocalSymbolsContext`] streams
    /// its string pool through a temp file and memory-maps it.
    #[cfg(feature = "mmap")]
    pub fn local_symbols_context(&self, use_64_bit_dylib_offset: bool) -> Result<Option<LocalSymbolsContext>> {
        let (view, source) = self.local_symbols_file();
        let info = match view.local_symbols_info(source)? {
            Some(info) => info,
            None => return Ok(None),
        };
        let ctx = LocalSymbolsContext::build(
            source,
            view.header().local_symbols_offset,
            info,
            use_64_bit_dylib_offset,
        )?;
        Ok(Some(ctx))
    }

    /// Resolve every local symbol for image `image_index`, using a
    /// previously-built shared context.
    #[cfg(feature = "mmap")]
    pub fn local_symbols_for_image(
        &self,
        ctx: &LocalSymbolsContext,
        image_index: usize,
    ) -> Result<Vec<LocalSymbol>> {
        let (_, source) = self.local_symbols_file();
        ctx.symbols_for_image(source, image_index as u64)
    }

    /// Convenience wrapper around [`Self::local_symbols_for_image`] that
    /// shapes the result as `(address, name)` pairs, ready to hand to
    /// [`Self::symbolicate`]'s `local_symbols` parameter.
    #[cfg(feature = "mmap")]
    pub fn local_symbol_addresses_for_image(
        &self,
        ctx: &LocalSymbolsContext,
        image_index: usize,
    ) -> Result<Vec<(u64, String)>> {
        Ok(self
                .local_symbols_for_image(ctx, image_index)?
                .into_iter()
                .map(|s| (s.nlist.value, s.name))
                .collect())
    }

    /// Look up an image's index by its text UUID.
    pub fn image_index_for_uuid(&self, uuid: [u8; 16]) -> Option<usize> {
        self.main
            .images_text()
            .iter()
            .position(|image| image.uuid == uuid)
    }

    /// Enumerate an image's exported symbols best-effort: read its Mach-O header, locate the
    /// trie, fetch its bytes (possibly crossing files), and walk it.
    pub fn exported_symbols_for_image(&self, image_index: usize) -> Result<Vec<ExportedSymbol>> {
        let image = self
            .main
            .images_text()
            .get(image_index)
            .ok_or(Error::ImageIndexOutOfBounds {
                index: image_index as u64,
                count: self.main.images_text().len() as u64,
            })?;

        // Probe a conservative window first to learn sizeofcmds, then
        // re-read with the full load-command span.
        const PROBE_HEADER_BYTES: u64 = 4096;
        let probe = self.read_bytes(image.load_address, PROBE_HEADER_BYTES)?;
        // Mach-O header layout: magic, cputype, cpusubtype, filetype,
        // ncmds, sizeofcmds, flags[, reserved] — sizeofcmds is the 6th
        // u32, at byte offset 20.
        let sizeofcmds = u32::from_le_bytes(probe[20..24].try_into().unwrap());
        let header_size: u64 = if u32::from_le_bytes(probe[0..4].try_into().unwrap()) == 0xfeedfacf
        {
            32
        } else {
            28
        };
        let total = header_size + sizeofcmds as u64;
        let header_and_commands = if total <= PROBE_HEADER_BYTES {
            probe
        } else {
            self.read_bytes(image.load_address, total)?
        };

        let trie_location = match locate_exports_trie(&header_and_commands)? {
            Some(loc) => loc,
            None => return Ok(Vec::new()),
        };
        let trie_bytes = self.read_bytes(trie_location.unslid_vm_address, trie_location.size)?;
        let trie = ExportTrie::new(trie_bytes);
        Ok(trie.all_symbols_best_effort())
    }

    /// Symbolicate `pc` against image `image_index`. `local_symbols` carries pre-resolved
    /// `(address, name)` pairs for this image if the caller has them and
    /// wants them preferred over export-trie symbols.
    pub fn symbolicate(
        &self,
        image_index: usize,
        pc: u64,
        local_symbols: Option<&[(u64, String)]>,
    ) -> Result<SymbolicatedAddress> {
        let image = self
            .main
            .images_text()
            .get(image_index)
            .ok_or(Error::ImageIndexOutOfBounds {
                index: image_index as u64,
                count: self.main.images_text().len() as u64,
            })?;
        let unslid_base = image.load_address;
        if pc < unslid_base {
            return Err(Error::VmAddressNotMapped(pc));
        }
        let pc_offset = pc - unslid_base;

        let mut entries: Vec<SymbolEntry> = match local_symbols {
            Some(symbols) if !symbols.is_empty() => symbols
                .iter()
                .filter(|(address, _)| *address >= unslid_base)
                .map(|(address, name)| SymbolEntry {
                    offset: address - unslid_base,
                    name: name.clone(),
                })
                .collect(),
            _ => {
                let exported = self.exported_symbols_for_image(image_index)?;
                exported
                    .into_iter()
                    .filter_map(|symbol| {
                        let flags = symbol.terminal.flags();
                        let value = match &symbol.terminal {
                            crate::export_trie::ExportTerminal::Regular { offset, .. } => *offset,
                            crate::export_trie::ExportTerminal::StubAndResolver {
                                stub_offset,
                                ..
                            } => *stub_offset,
                            crate::export_trie::ExportTerminal::ReExport { .. } => return None,
                        };
                        if matches!(flags.kind(), ExportKind::Absolute) {
                            if value < unslid_base {
                                return None;
                            }
                            Some(SymbolEntry {
                                    offset: value - unslid_base,
                                    name: symbol.name,
                                })
                        } else {
                            Some(SymbolEntry {
                                    offset: value,
                                    name: symbol.name,
                                })
                        }
                    })
                    .collect()
            }
        };
        entries.sort_by_key(|e| e.offset);

        let idx = match entries.binary_search_by_key(&pc_offset, |e| e.offset) {
            Ok(i) => i,
            Err(0) => return Err(Error::SymbolNotFound(format!("pc offset {pc_offset:#x}"))),
            Err(i) => i - 1,
        };
        let matched = &entries[idx];
        Ok(SymbolicatedAddress {
                name: matched.name.clone(),
                pc_offset,
                match_offset: matched.offset,
                addend: pc_offset - matched.offset,
            })
    }
}

fn open_required(opener: &Opener<'_>, path: &Path) -> Result<Box<dyn ByteSource>> {
    match opener(path).map_err(Error::FileReadError)? {
        Some(source) => Ok(source),
        None => Err(Error::SubCacheNotFound(path.to_path_buf())),
    }
}

/// A cache of image UUID -> index, useful when symbolicating many
/// addresses against the same coordinator (ambient convenience; not a
/// distinct spec type).
#[derive(Debug, Default)]
pub struct ImageIndex {
    by_uuid: HashMap<[u8; 16], usize>,
}

impl ImageIndex {
    pub fn build(coordinator: &MultiCacheCoordinator) -> Self {
        let by_uuid = coordinator
            .main
            .images_text()
            .iter()
            .enumerate()
            .map(|(i, image)| (image.uuid, i))
            .collect();
        ImageIndex { by_uuid }
    }

    pub fn get(&self, uuid: [u8; 16]) -> Option<usize> {
        self.by_uuid.get(&uuid).copied()
    }
}
