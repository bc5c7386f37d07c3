// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Abstract memory attributes, independent of the raw descriptor encoding.
//!
//! [`Attributes`] is what a caller hands to [`crate::region::Region`]; [`crate::descriptor`]
//! turns it into the architecture-specific bit pattern.

/// The memory type of a mapping, selecting an index into the Memory Attribute Indirection
/// Register that the platform is expected to have programmed before enabling the MMU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// Device-nGnRE memory: no gathering, no reordering, early write acknowledgement disabled.
    /// Always mapped execute-never, regardless of [`Executability`], to forbid speculative
    /// instruction fetch from a read-sensitive peripheral.
    Device,
    /// Normal memory, inner and outer write-back, read/write allocate, cacheable.
    Memory,
    /// Normal memory, inner and outer non-cacheable.
    NonCacheable,
}

/// Data access permission of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Read-only.
    ReadOnly,
    /// Read-write.
    ReadWrite,
}

/// Security state a mapping is visible in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// Secure physical address space.
    Secure,
    /// Non-secure physical address space.
    NonSecure,
}

/// Whether instruction fetch is permitted from a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Executability {
    /// Instruction fetch permitted. Only legal together with [`Permission::ReadOnly`].
    Execute,
    /// Instruction fetch forbidden (the descriptor's execute-never bit(s) will be set).
    ExecuteNever,
}

/// The full attribute set of one mapping.
///
/// `dynamic` is never set directly by a caller; it is stamped by
/// [`crate::context::Context::add_dynamic_region`] to distinguish regions that may later be
/// removed from the static regions declared before [`crate::context::Context::init_tables`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    /// Memory type, see [`MemoryType`].
    pub memory_type: MemoryType,
    /// Access permission, see [`Permission`].
    pub permission: Permission,
    /// Security state, see [`Security`].
    pub security: Security,
    /// Executability, see [`Executability`].
    pub executable: Executability,
    /// Whether this region was added via the dynamic API, and so may later be removed.
    pub(crate) dynamic: bool,
}

impl Attributes {
    /// Constructs a new attribute set for a region that will be added statically.
    pub const fn new(
        memory_type: MemoryType,
        permission: Permission,
        security: Security,
        executable: Executability,
    ) -> Self {
        Self {
            memory_type,
            permission,
            security,
            executable,
            dynamic: false,
        }
    }

    /// Returns whether this attribute set requests both write access and execute permission,
    /// a combination the engine always rejects.
    pub(crate) const fn is_write_execute(&self) -> bool {
        matches!(self.permission, Permission::ReadWrite)
            && matches!(self.executable, Executability::Execute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_write_and_execute() {
        let attr = Attributes::new(
            MemoryType::Memory,
            Permission::ReadWrite,
            Security::NonSecure,
            Executability::Execute,
        );
        assert!(attr.is_write_execute());

        let ok = Attributes::new(
            MemoryType::Memory,
            Permission::ReadOnly,
            Security::NonSecure,
            Executability::Execute,
        );
        assert!(!ok.is_write_execute());
    }
}
