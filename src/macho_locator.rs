//! Finds the exports trie inside one image's Mach-O header and load
//! commands.

use crate::cursor::ParseCursor;
use crate::error::{Error, Result};

const MH_MAGIC: u32 = 0xfeedface;
const MH_MAGIC_64: u32 = 0xfeedfacf;

const LC_SEGMENT: u32 = 0x1;
const LC_SEGMENT_64: u32 = 0x19;
const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | 0x8000_0000; // LC_REQ_DYLD
const LC_DYLD_INFO: u32 = 0x22;
const LC_DYLD_INFO_ONLY: u32 = 0x22 | 0x8000_0000;

/// The hard cap on `headerSize + sizeofcmds`.
pub const MAX_LOAD_COMMANDS_WINDOW: usize = 16 * 1024 * 1024;

/// The location of a resolved exports trie: an unslid VM address plus a
/// byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieLocation {
    pub unslid_vm_address: u64,
    pub size: u64,
}

/// Walk a Mach-O header + load commands buffer and locate its exports
/// trie, if any.
pub fn locate_exports_trie(data: &[u8]) -> Result<Option<TrieLocation>> {
    let mut c = ParseCursor::new(data);
    let magic = c.read_u32_le()?;
    let is_64 = match magic {
        MH_MAGIC => false,
        MH_MAGIC_64 => true,
        _ => return Err(Error::InvalidMachO("unrecognized Mach-O magic")),
    };

    let _cputype = c.read_u32_le()?;
    let _cpusubtype = c.read_u32_le()?;
    let _filetype = c.read_u32_le()?;
    let ncmds = c.read_u32_le()?;
    let sizeofcmds = c.read_u32_le()?;
    let _flags = c.read_u32_le()?;
    if is_64 {
        let _reserved = c.read_u32_le()?;
    }
    let header_size = c.position();

    let total = (header_size as u64)
        .checked_add(sizeofcmds as u64)
        .ok_or(Error::InvalidMachO("headerSize + sizeofcmds overflowed"))?;
    if total == 0 || total > MAX_LOAD_COMMANDS_WINDOW as u64 {
        return Err(Error::InvalidMachO(
                "headerSize + sizeofcmds exceeded the 16 MiB limit",
            ));
    }

    let mut linkedit_vmaddr: Option<u64> = None;
    let mut linkedit_fileoff: Option<u64> = None;
    let mut trie_dataoff: Option<u32> = None;
    let mut trie_datasize: Option<u32> = None;
    let mut saw_exports_trie_command = false;

    let commands_end = header_size
        .checked_add(sizeofcmds as usize)
        .ok_or(Error::InvalidMachO("headerSize + sizeofcmds overflowed"))?;
    let commands_end = commands_end.min(data.len());

    for _ in 0..ncmds {
        if c.position() + 8 > commands_end {
            break;
        }
        let cmd_start = c.position();
        let cmd = c.read_u32_le()?;
        let cmdsize = c.read_u32_le()?;
        if cmdsize < 8 {
            return Err(Error::InvalidMachO("load command size was smaller than its own header"));
        }
        let cmd_end = cmd_start
            .checked_add(cmdsize as usize)
            .ok_or(Error::InvalidMachO("load command size overflowed"))?;
        if cmd_end > commands_end || cmd_end > data.len() {
            return Err(Error::InvalidMachO("load command extended past sizeofcmds"));
        }

        match cmd {
            LC_SEGMENT | LC_SEGMENT_64 => {
                let segname = c.read_array::<16>()?;
                let nul = segname.iter().position(|&b| b == 0).unwrap_or(16);
                let name = &segname[..nul];
                if name == b"__LINKEDIT" {
                    if cmd == LC_SEGMENT_64 {
                        linkedit_vmaddr = Some(c.read_u64_le()?);
                        let _vmsize = c.read_u64_le()?;
                        linkedit_fileoff = Some(c.read_u64_le()?);
                    } else {
                        linkedit_vmaddr = Some(c.read_u32_le()? as u64);
                        let _vmsize = c.read_u32_le()?;
                        linkedit_fileoff = Some(c.read_u32_le()? as u64);
                    }
                }
            }
            LC_DYLD_EXPORTS_TRIE => {
                let dataoff = c.read_u32_le()?;
                let datasize = c.read_u32_le()?;
                trie_dataoff = Some(dataoff);
                trie_datasize = Some(datasize);
                saw_exports_trie_command = true;
            }
            LC_DYLD_INFO | LC_DYLD_INFO_ONLY => {
                if !saw_exports_trie_command {
                    let _rebase_off = c.read_u32_le()?;
                    let _rebase_size = c.read_u32_le()?;
                    let _bind_off = c.read_u32_le()?;
                    let _bind_size = c.read_u32_le()?;
                    let _weak_bind_off = c.read_u32_le()?;
                    let _weak_bind_size = c.read_u32_le()?;
                    let _lazy_bind_off = c.read_u32_le()?;
                    let _lazy_bind_size = c.read_u32_le()?;
                    let export_off = c.read_u32_le()?;
                    let export_size = c.read_u32_le()?;
                    trie_dataoff = Some(export_off);
                    trie_datasize = Some(export_size);
                }
            }
            _ => {}
        }

        c.seek(cmd_end)?;
    }

    match (linkedit_vmaddr, linkedit_fileoff, trie_dataoff, trie_datasize) {
        (Some(vmaddr), Some(fileoff), Some(dataoff), Some(datasize)) if datasize > 0 => {
            let unslid = vmaddr
                .checked_add(dataoff as u64)
                .and_then(|v| v.checked_sub(fileoff))
                .ok_or(Error::InvalidMachO("linkedit vmaddr/fileoff arithmetic overflowed"))?;
            Ok(Some(TrieLocation {
                        unslid_vm_address: unslid,
                        size: datasize as u64,
                    }))
        }
        _ => Ok(None),
    }
}
