//! Virtual-address ↔ file-offset resolution over a flat mapping list.

use crate::records::{MappingAndSlideInfo, MappingInfo};

/// Either mapping record shape, normalized to the fields the resolver
/// needs. Built once from whichever table `SingleCacheView` decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvableMapping {
    pub address: u64,
    pub size: u64,
    pub file_offset: u64,
}

impl ResolvableMapping {
    fn end_address(&self) -> Option<u64> {
        self.address.checked_add(self.size)
    }

    fn end_file_offset(&self) -> Option<u64> {
        self.file_offset.checked_add(self.size)
    }

    fn contains_vm(&self, address: u64) -> bool {
        match self.end_address() {
            Some(end) => address >= self.address && address < end,
            None => false,
        }
    }

    fn contains_file_offset(&self, offset: u64) -> bool {
        match self.end_file_offset() {
            Some(end) => offset >= self.file_offset && offset < end,
            None => false,
        }
    }
}

impl From<MappingInfo> for ResolvableMapping {
    fn from(m: MappingInfo) -> Self {
        ResolvableMapping {
            address: m.address,
            size: m.size,
            file_offset: m.file_offset,
        }
    }
}

impl From<MappingAndSlideInfo> for ResolvableMapping {
    fn from(m: MappingAndSlideInfo) -> Self {
        ResolvableMapping {
            address: m.address,
            size: m.size,
            file_offset: m.file_offset,
        }
    }
}

/// Resolves virtual addresses to file offsets (and back) over one file's
/// mapping list. Mappings are assumed non-overlapping; the first mapping
/// that contains the address wins a tie.
#[derive(Debug, Clone)]
pub struct VmAddressResolver {
    mappings: Vec<ResolvableMapping>,
}

impl VmAddressResolver {
    /// Build a resolver over an already-decoded mapping list.
    pub fn new(mappings: Vec<ResolvableMapping>) -> Self {
        VmAddressResolver { mappings }
    }

    pub fn mappings(&self) -> &[ResolvableMapping] {
        &self.mappings
    }

    /// The mapping, if any, that contains virtual address `vm_address`.
    pub fn mapping_for_vm(&self, vm_address: u64) -> Option<&ResolvableMapping> {
        self.mappings.iter().find(|m| m.contains_vm(vm_address))
    }

    /// The mapping, if any, that contains file offset `file_offset`.
    pub fn mapping_for_file_offset(&self, file_offset: u64) -> Option<&ResolvableMapping> {
        self.mappings
            .iter()
            .find(|m| m.contains_file_offset(file_offset))
    }

    /// Translate a virtual address to a file offset.
    pub fn file_offset(&self, vm_address: u64) -> Option<u64> {
        let mapping = self.mapping_for_vm(vm_address)?;
        let delta = vm_address - mapping.address;
        mapping.file_offset.checked_add(delta)
    }

    /// Translate a file offset back to a virtual address.
    pub fn vm_address(&self, file_offset: u64) -> Option<u64> {
        let mapping = self.mapping_for_file_offset(file_offset)?;
        let delta = file_offset - mapping.file_offset;
        mapping.address.checked_add(delta)
    }

    pub fn is_valid_vm_address(&self, vm_address: u64) -> bool {
        self.mapping_for_vm(vm_address).is_some()
    }

    pub fn is_valid_file_offset(&self, file_offset: u64) -> bool {
        self.mapping_for_file_offset(file_offset).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_resolver() -> VmAddressResolver {
        VmAddressResolver::new(vec![
                ResolvableMapping {
                    address: 0x1000,
                    size: 0x1000,
                    file_offset: 0,
                },
                ResolvableMapping {
                    address: 0x2000,
                    size: 0x1000,
                    file_offset: 0x1000,
                },
            ])
    }

    #[test]
    fn round_trips_vm_and_file_offset() {
        let resolver = sample_resolver();
        for vm in [0x1000u64, 0x1500, 0x2000, 0x2fff] {
            let offset = resolver.file_offset(vm).unwrap();
            assert_eq!(resolver.vm_address(offset).unwrap(), vm);
        }
    }

    #[test]
    fn address_outside_every_mapping_is_absent() {
        let resolver = sample_resolver();
        assert!(resolver.file_offset(0x5000).is_none());
        assert!(!resolver.is_valid_vm_address(0x5000));
    }

    #[test]
    fn overflowing_mapping_is_skipped_not_faulted() {
        let resolver = VmAddressResolver::new(vec![ResolvableMapping {
                    address: u64::MAX - 10,
                    size: 100,
                    file_offset: 0,
                }]);
        assert!(resolver.file_offset(u64::MAX - 5).is_none());
        assert!(resolver.file_offset(0).is_none());
    }

    #[test]
    fn first_matching_mapping_wins_on_tie() {
        let resolver = VmAddressResolver::new(vec![
                ResolvableMapping {
                    address: 0x1000,
                    size: 0x100,
                    file_offset: 0,
                },
                ResolvableMapping {
                    address: 0x1000,
                    size: 0x100,
                    file_offset: 0x9000,
                },
            ]);
        assert_eq!(resolver.file_offset(0x1000), Some(0));
    }
}

