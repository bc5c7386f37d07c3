// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Encoding and decoding of raw VMSAv8-64 stage-1 descriptor words.
//!
//! This is the only place in the crate that understands the bit layout of a descriptor; every
//! other module goes through [`encode_leaf`], [`encode_table`] and [`DescriptorKind::of`].

use crate::{
    attributes::{Attributes, Executability, MemoryType, Permission, Security},
    levels::{self, MAX_LEVEL},
};

const VALID: u64 = 1 << 0;
const TYPE_TABLE_OR_PAGE: u64 = 1 << 1;
const ATTR_INDX_SHIFT: u64 = 2;
const NON_SECURE: u64 = 1 << 5;
const AP_READ_ONLY: u64 = 1 << 7;
const SH_OUTER: u64 = 0b10 << 8;
const SH_INNER: u64 = 0b11 << 8;
const ACCESS_FLAG: u64 = 1 << 10;
const OUTPUT_ADDRESS_MASK: u64 = 0x0000_ffff_ffff_f000;
const UXN: u64 = 1 << 54;
const PXN: u64 = 1 << 53;

/// MAIR attribute index this crate programs for device memory. The platform must configure
/// `MAIR_ELx` so that this index selects Device-nGnRE.
pub const MAIR_DEVICE_INDEX: u64 = 0;
/// MAIR attribute index for cacheable normal memory.
pub const MAIR_MEMORY_INDEX: u64 = 1;
/// MAIR attribute index for non-cacheable normal memory.
pub const MAIR_NON_CACHEABLE_INDEX: u64 = 2;

/// Combined execute-never mask (`UXN` and `PXN`) applied to a descriptor for a given exception
/// level. [`crate::arch::ArchPort::xn_mask`] may return a subset of this for ELs where only one
/// of the two bits is defined.
pub const XN_MASK_BOTH: u64 = UXN | PXN;

/// The kind of a translation table entry, as distinguished by its low two bits (and, for the
/// `Table`/`Page` ambiguity, by the level it was read from).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// Entry is unmapped.
    Invalid,
    /// Entry terminally maps a block larger than one page.
    Block,
    /// Entry forwards the walk to a sub-table at the next level.
    Table,
    /// Entry terminally maps exactly one page; only possible at [`MAX_LEVEL`].
    Page,
}

impl DescriptorKind {
    /// Classifies `raw`, a descriptor read from a table at `level`.
    pub const fn of(raw: u64, level: usize) -> Self {
        if raw & VALID == 0 {
            return Self::Invalid;
        }
        if raw & TYPE_TABLE_OR_PAGE == 0 {
            Self::Block
        } else if level == MAX_LEVEL {
            Self::Page
        } else {
            Self::Table
        }
    }
}

/// Extracts the output address (physical address of a mapped block/page, or of a sub-table) from
/// a valid descriptor.
pub const fn output_address(raw: u64) -> usize {
    (raw & OUTPUT_ADDRESS_MASK) as usize
}

/// Encodes a terminal (block or page) descriptor for `pa` at `level`, with the given `attr` and
/// execute-never mask for the owning exception level.
///
/// `pa` must be aligned to `levels::block_size(level)`; this is a precondition checked by the
/// region validator and the mapper, not re-checked here.
pub fn encode_leaf(attr: &Attributes, pa: usize, level: usize, xn_mask: u64) -> u64 {
    debug_assert!(levels::is_aligned(pa, level));

    let mut desc = pa as u64 | VALID | ACCESS_FLAG;
    if level == MAX_LEVEL {
        desc |= TYPE_TABLE_OR_PAGE;
    }
    if matches!(attr.security, Security::NonSecure) {
        desc |= NON_SECURE;
    }
    if matches!(attr.permission, Permission::ReadOnly) {
        desc |= AP_READ_ONLY;
    }

    desc |= match attr.memory_type {
        MemoryType::Device => {
            // Device memory is never executable, to forbid speculative fetch from a
            // read-sensitive peripheral, regardless of the region's requested executability.
            desc |= xn_mask;
            (MAIR_DEVICE_INDEX << ATTR_INDX_SHIFT) | SH_OUTER
        }
        MemoryType::Memory => {
            if matches!(attr.permission, Permission::ReadWrite)
                || matches!(attr.executable, Executability::ExecuteNever)
            {
                desc |= xn_mask;
            }
            (MAIR_MEMORY_INDEX << ATTR_INDX_SHIFT) | SH_INNER
        }
        MemoryType::NonCacheable => {
            if matches!(attr.permission, Permission::ReadWrite)
                || matches!(attr.executable, Executability::ExecuteNever)
            {
                desc |= xn_mask;
            }
            (MAIR_NON_CACHEABLE_INDEX << ATTR_INDX_SHIFT) | SH_OUTER
        }
    };

    desc
}

/// Encodes a table descriptor pointing at the sub-table whose physical address is `sub_table_pa`.
pub fn encode_table(sub_table_pa: usize) -> u64 {
    debug_assert!(levels::is_page_aligned(sub_table_pa));
    sub_table_pa as u64 | VALID | TYPE_TABLE_OR_PAGE
}

/// Rewrites the AP/XN bits of an existing leaf descriptor, leaving its output address, memory
/// type and security bits untouched. Used by [`crate::change_attributes`].
pub fn with_permission(raw: u64, permission: Permission, executable: Executability, xn_mask: u64) -> u64 {
    let mut desc = raw & !(AP_READ_ONLY | xn_mask);
    if matches!(permission, Permission::ReadOnly) {
        desc |= AP_READ_ONLY;
    }
    if matches!(permission, Permission::ReadWrite) || matches!(executable, Executability::ExecuteNever) {
        desc |= xn_mask;
    }
    desc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_rw_secure() -> Attributes {
        Attributes::new(
            MemoryType::Device,
            Permission::ReadWrite,
            Security::Secure,
            Executability::ExecuteNever,
        )
    }

    fn memory_ro_execute() -> Attributes {
        Attributes::new(
            MemoryType::Memory,
            Permission::ReadOnly,
            Security::Secure,
            Executability::Execute,
        )
    }

    #[test]
    fn device_is_always_execute_never() {
        let desc = encode_leaf(&device_rw_secure(), 0x0900_0000, MAX_LEVEL, XN_MASK_BOTH);
        assert_eq!(desc & XN_MASK_BOTH, XN_MASK_BOTH);
        assert_eq!(desc & AP_READ_ONLY, 0);
        assert_eq!(desc & NON_SECURE, 0);
        assert_eq!(output_address(desc), 0x0900_0000);
        assert_eq!(DescriptorKind::of(desc, MAX_LEVEL), DescriptorKind::Page);
    }

    #[test]
    fn ro_executable_memory_clears_xn() {
        let desc = encode_leaf(&memory_ro_execute(), 0x0e10_0000, 2, XN_MASK_BOTH);
        assert_eq!(desc & XN_MASK_BOTH, 0);
        assert_eq!(desc & AP_READ_ONLY, AP_READ_ONLY);
        assert_eq!(DescriptorKind::of(desc, 2), DescriptorKind::Block);
    }

    #[test]
    fn rw_memory_forces_xn() {
        let attr = Attributes::new(
            MemoryType::Memory,
            Permission::ReadWrite,
            Security::NonSecure,
            Executability::ExecuteNever,
        );
        let desc = encode_leaf(&attr, 0x4000_0000, 1, XN_MASK_BOTH);
        assert_eq!(desc & XN_MASK_BOTH, XN_MASK_BOTH);
        assert_eq!(desc & NON_SECURE, NON_SECURE);
    }

    #[test]
    fn table_descriptor_has_no_terminal_bits() {
        let desc = encode_table(0x1000);
        assert_eq!(DescriptorKind::of(desc, 1), DescriptorKind::Table);
        assert_eq!(output_address(desc), 0x1000);
    }

    #[test]
    fn change_permission_preserves_output_address() {
        let original = encode_leaf(&memory_ro_execute(), 0x8000_0000, MAX_LEVEL, XN_MASK_BOTH);
        let updated = with_permission(original, Permission::ReadOnly, Executability::ExecuteNever, XN_MASK_BOTH);
        assert_eq!(output_address(updated), 0x8000_0000);
        assert_eq!(updated & AP_READ_ONLY, AP_READ_ONLY);
        assert_eq!(updated & XN_MASK_BOTH, XN_MASK_BOTH);
    }
}
