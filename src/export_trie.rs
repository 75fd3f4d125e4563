//! The Mach-O exports trie walker.
//!
//! Grounded directly in the teacher's own `src/read/macho/exports_trie.rs`:
//! that file's `NodeIterator`/`Frame` pair is an explicit-stack DFS
//! pre-order walk over exactly this wire format (ULEB128 terminal size,
//! kind-dependent `ExportData::{Regular,Reexport,StubAndResolver}`
//! payload, ULEB128-edge-labelled children), and `iterate()`/
//! `ExportTrieIter` below follow that same shape: a `Vec`-backed stack of
//! pending nodes plus an accumulated name prefix, instead of recursion.
//! The one substitution is the byte-reading idiom: the teacher's
//! `Bytes`/`ReadError::read_error` pairs a borrowed-slice cursor with a
//! `&'static str`-tagged `Result` extension trait; this crate reads
//! through `ParseCursor` and this taxonomy's own `Error` variants
//! instead, since `ParseCursor` is shared with every other decoder here
//! rather than being trie-specific.

use crate::cursor::ParseCursor;
use crate::error::{Error, Result};

/// The hard cap on a fully-qualified exported symbol name.
pub const MAX_SYMBOL_NAME_LENGTH: usize = 4096;

/// Decoded terminal flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFlags(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Regular,
    ThreadLocal,
    Absolute,
}

impl ExportFlags {
    pub fn kind(&self) -> ExportKind {
        match self.0 & 0x3 {
            0 => ExportKind::Regular,
            1 => ExportKind::ThreadLocal,
            2 => ExportKind::Absolute,
            _ => ExportKind::Regular,
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.0 & 0x3 == 0x2
    }

    pub fn is_weak_definition(&self) -> bool {
        self.0 & 0x4 != 0
    }

    pub fn is_reexport(&self) -> bool {
        self.0 & 0x8 != 0
    }

    pub fn is_stub_and_resolver(&self) -> bool {
        self.0 & 0x10 != 0
    }
}

/// A decoded terminal payload, in one of the three kind-dependent shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTerminal {
    Regular { flags: ExportFlags, offset: u64 },
    ReExport {
        flags: ExportFlags,
        dylib_ordinal: u64,
        imported_name: Option<String>,
    },
    StubAndResolver {
        flags: ExportFlags,
        stub_offset: u64,
        resolver_offset: u64,
    },
}

impl ExportTerminal {
    pub fn flags(&self) -> ExportFlags {
        match self {
            ExportTerminal::Regular { flags, .. } => *flags,
            ExportTerminal::ReExport { flags, .. } => *flags,
            ExportTerminal::StubAndResolver { flags, .. } => *flags,
        }
    }
}

/// One resolved trie entry: a full symbol name plus its terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedSymbol {
    pub name: String,
    pub terminal: ExportTerminal,
}

fn decode_terminal(payload: &[u8]) -> Result<ExportTerminal> {
    let mut c = ParseCursor::new(payload);
    let flags = ExportFlags(c.read_uleb128()?);
    if flags.is_reexport() {
        let dylib_ordinal = c.read_uleb128()?;
        let imported_name = if c.remaining() > 0 {
            let name = c.read_cstr_unbounded()?;
            if name.is_empty() {
                None
            } else {
                Some(name)
            }
        } else {
            None
        };
        Ok(ExportTerminal::ReExport {
                flags,
                dylib_ordinal,
                imported_name,
            })
    } else if flags.is_stub_and_resolver() {
        let stub_offset = c.read_uleb128()?;
        let resolver_offset = c.read_uleb128()?;
        Ok(ExportTerminal::StubAndResolver {
                flags,
                stub_offset,
                resolver_offset,
            })
    } else {
        let offset = c.read_uleb128()?;
        Ok(ExportTerminal::Regular { flags, offset })
    }
}

/// An exports trie, already fetched into memory from a `ByteSource` (the
/// trie's own bytes can span a cross-file read in `MultiCacheReader`, so
/// by the time one of these exists the bytes are already contiguous).
#[derive(Debug, Clone)]
pub struct ExportTrie {
    data: Vec<u8>,
}

impl ExportTrie {
    /// Wrap the raw trie bytes. No parsing happens until a traversal is
    /// actually requested.
    pub fn new(data: Vec<u8>) -> Self {
        ExportTrie { data }
    }

    fn slice_from(&self, offset: usize) -> Result<&[u8]> {
        self.data.get(offset..).ok_or(Error::UnexpectedEndOfTrie)
    }

    /// Descend the tree matching `name` exactly.
    pub fn lookup(&self, name: &str) -> Result<Option<ExportedSymbol>> {
        if name.len() > MAX_SYMBOL_NAME_LENGTH {
            return Err(Error::InvalidExportTrieFormat(
                    "name exceeded maximum length",
                ));
        }
        let mut node_offset = 0usize;
        let mut remaining = name;
        loop {
            let data = self.slice_from(node_offset)?;
            let mut c = ParseCursor::new(data);
            let terminal_size = c.read_uleb128()? as usize;
            let terminal_bytes = if terminal_size > 0 {
                Some(c.take(terminal_size)?)
            } else {
                None
            };
            if remaining.is_empty() {
                return match terminal_bytes {
                    Some(payload) => Ok(Some(ExportedSymbol {
                                name: name.to_string(),
                                terminal: decode_terminal(payload)?,
                            })),
                    None => Ok(None),
                };
            }
            let child_count = c.read_u8()?;
            let mut next_node = None;
            for _ in 0..child_count {
                let label = c.read_cstr_unbounded()?;
                let child_offset = c.read_uleb128()? as usize;
                if next_node.is_none() && remaining.starts_with(label.as_str()) {
                    next_node = Some((child_offset, label.len()));
                }
            }
            match next_node {
                Some((child_offset, label_len)) => {
                    remaining = &remaining[label_len..];
                    node_offset = child_offset;
                }
                None => return Ok(None),
            }
        }
    }

    /// Depth-first traversal collecting every terminal, all-or-nothing.
    pub fn all_symbols(&self) -> Result<Vec<ExportedSymbol>> {
        self.iterate().collect()
    }

    /// Same traversal, but a parse error stops the walk and returns
    /// whatever was gathered first.
    pub fn all_symbols_best_effort(&self) -> Vec<ExportedSymbol> {
        let mut out = Vec::new();
        for item in self.iterate() {
            match item {
                Ok(symbol) => out.push(symbol),
                Err(_) => break,
            }
        }
        out
    }

    /// A lazy, restartable-per-call, explicit-stack traversal. Each call
    /// returns a fresh iterator that owns its own stack.
    pub fn iterate(&self) -> ExportTrieIter<'_> {
        ExportTrieIter {
            trie: self,
            stack: vec![(0, String::new())],
            done: false,
        }
    }
}

enum StepOutcome {
    Done,
    Continue,
    Yield(ExportedSymbol),
}

/// The lazy iterator returned by [`ExportTrie::iterate`].
pub struct ExportTrieIter<'a> {
    trie: &'a ExportTrie,
    stack: Vec<(usize, String)>,
    done: bool,
}

impl<'a> ExportTrieIter<'a> {
    fn step(&mut self) -> Result<StepOutcome> {
        let (node_offset, prefix) = match self.stack.pop() {
            Some(v) => v,
            None => return Ok(StepOutcome::Done),
        };
        let data = self.trie.slice_from(node_offset)?;
        let mut c = ParseCursor::new(data);
        let terminal_size = c.read_uleb128()? as usize;
        let terminal = if terminal_size > 0 {
            let payload = c.take(terminal_size)?;
            Some(decode_terminal(payload)?)
        } else {
            None
        };
        let child_count = c.read_u8()?;
        let mut children = Vec::with_capacity(child_count as usize);
        for _ in 0..child_count {
            let label = c.read_cstr_unbounded()?;
            let child_offset = c.read_uleb128()? as usize;
            let child_prefix = format!("{prefix}{label}");
            if child_prefix.len() > MAX_SYMBOL_NAME_LENGTH {
                return Err(Error::InvalidExportTrieFormat(
                        "name exceeded maximum length",
                    ));
            }
            children.push((child_offset, child_prefix));
        }
        // Push in reverse so popping yields children in on-disk order.
        for child in children.into_iter().rev() {
            self.stack.push(child);
        }
        match terminal {
            Some(terminal) => Ok(StepOutcome::Yield(ExportedSymbol {
                        name: prefix,
                        terminal,
                    })),
            None => Ok(StepOutcome::Continue),
        }
    }
}

impl<'a> Iterator for ExportTrieIter<'a> {
    type Item = Result<ExportedSymbol>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.step() {
                Ok(StepOutcome::Done) => {
                    self.done = true;
                    return None;
                }
                Ok(StepOutcome::Continue) => continue,
                Ok(StepOutcome::Yield(symbol)) => return Some(Ok(symbol)),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Spec §8 scenario 3: single-symbol trie.
    const SINGLE_SYMBOL_TRIE: &[u8] = &[
        0x00, 0x01, 0x5F, 0x6D, 0x61, 0x69, 0x6E, 0x00, 0x09, 0x02, 0x00, 0x10, 0x00,
    ];

    #[test]
    fn single_symbol_lookup() {
        let trie = ExportTrie::new(SINGLE_SYMBOL_TRIE.to_vec());
        let found = trie.lookup("_main").unwrap().unwrap();
        assert_eq!(found.name, "_main");
        match found.terminal {
            ExportTerminal::Regular { offset, .. } => assert_eq!(offset, 0x10),
            other => panic!("expected Regular terminal, got {other:?}"),
        }
    }

    #[test]
    fn lookup_of_absent_name_is_none() {
        let trie = ExportTrie::new(SINGLE_SYMBOL_TRIE.to_vec());
        assert!(trie.lookup("_other").unwrap().is_none());
    }

    #[test]
    fn all_symbols_matches_lookup() {
        let trie = ExportTrie::new(SINGLE_SYMBOL_TRIE.to_vec());
        let all = trie.all_symbols().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "_main");
        let via_lookup = trie.lookup("_main").unwrap().unwrap();
        assert_eq!(all[0], via_lookup);
    }

    #[test]
    fn iterate_and_all_symbols_agree() {
        let trie = ExportTrie::new(SINGLE_SYMBOL_TRIE.to_vec());
        let iterated: Vec<_> = trie.iterate().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(iterated, trie.all_symbols().unwrap());
    }

    // Spec §8 scenario 4: re-export terminal for "_reexp" with payload
    // `08 02 "_imported" 00`, wrapped in a single-child root so lookup can
    // reach it.
    fn reexport_trie() -> Vec<u8> {
        let mut terminal = vec![0x08, 0x02];
        terminal.extend_from_slice(b"_imported\0");
        let mut data = vec![0x00u8, 0x01]; // root: no terminal, 1 child
        data.extend_from_slice(b"_reexp\0");
        let child_offset = data.len() + 1; // +1 for the ULEB128 offset byte itself
        data.push(child_offset as u8);
        data.push(terminal.len() as u8); // terminal size ULEB (fits in one byte here)
        data.extend_from_slice(&terminal);
        data.push(0); // child count at the reexp node
        data
    }

    #[test]
    fn reexport_terminal_decodes() {
        let bytes = reexport_trie();
        let trie = ExportTrie::new(bytes);
        let found = trie.lookup("_reexp").unwrap().unwrap();
        match found.terminal {
            ExportTerminal::ReExport {
                flags,
                dylib_ordinal,
                imported_name,
            } => {
                assert!(flags.is_reexport());
                assert_eq!(dylib_ordinal, 2);
                assert_eq!(imported_name.as_deref(), Some("_imported"));
            }
            other => panic!("expected ReExport terminal, got {other:?}"),
        }
    }

    #[test]
    fn name_over_cap_is_rejected() {
        let trie = ExportTrie::new(SINGLE_SYMBOL_TRIE.to_vec());
        let too_long = "a".repeat(MAX_SYMBOL_NAME_LENGTH + 1);
        assert!(matches!(
                trie.lookup(&too_long),
                Err(Error::InvalidExportTrieFormat(_))
            ));
    }
}

