// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! A process-wide default [`Context`], for callers that only ever need one translation regime
//! and would rather not thread a `Context` through their whole call graph.
//!
//! This is a thin convenience over the context-taking API in [`crate::context`], which remains
//! the primary interface. The singleton is sized by the `DEFAULT_MMAP_NUM`/`DEFAULT_TABLES_NUM`
//! consts; a caller needing a different size should declare their own `Context` instead of using
//! this module.

use crate::{
    arch::ArchPort, attributes::Attributes, context::{Context, Limits}, error::Error, region::Region,
};
use spin::{Once, mutex::SpinMutex};

/// Region list capacity of [`default_context`].
pub const DEFAULT_MMAP_NUM: usize = 16;
/// Sub-table pool size of [`default_context`].
pub const DEFAULT_TABLES_NUM: usize = 32;

static DEFAULT_CONTEXT: Once<SpinMutex<Context<DEFAULT_MMAP_NUM, DEFAULT_TABLES_NUM>>> = Once::new();

/// Returns the process-wide default context, creating it with `limits` on first call.
///
/// Every subsequent call ignores `limits` and returns the same instance; this mirrors the
/// reference runtime's own `Once`-guarded singleton page table.
pub fn default_context(
    limits: Limits,
) -> &'static SpinMutex<Context<DEFAULT_MMAP_NUM, DEFAULT_TABLES_NUM>> {
    DEFAULT_CONTEXT.call_once(|| SpinMutex::new(Context::new(limits)))
}

/// Registers a static region with the default context. See [`Context::add_region`].
pub fn add_region(limits: Limits, region: Region) {
    default_context(limits).lock().add_region(region);
}

/// Builds the default context's translation tree. See [`Context::init_tables`].
pub fn init_tables(limits: Limits, arch: &impl ArchPort) {
    default_context(limits).lock().init_tables(arch);
}

/// Adds a dynamic region to the default context. See [`Context::add_dynamic_region`].
pub fn add_dynamic_region(limits: Limits, region: Region, arch: &impl ArchPort) -> Result<(), Error> {
    default_context(limits).lock().add_dynamic_region(region, arch)
}

/// Removes a dynamic region from the default context. See [`Context::remove_dynamic_region`].
pub fn remove_dynamic_region(
    limits: Limits,
    base_va: usize,
    size: usize,
    arch: &impl ArchPort,
) -> Result<(), Error> {
    default_context(limits)
        .lock()
        .remove_dynamic_region(base_va, size, arch)
}

/// Changes attributes of a mapped range in the default context. See [`Context::change_attributes`].
pub fn change_attributes(
    limits: Limits,
    base_va: usize,
    size: usize,
    new_attr: Attributes,
    arch: &impl ArchPort,
) -> Result<(), Error> {
    default_context(limits)
        .lock()
        .change_attributes(base_va, size, new_attr, arch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arch::fake::FakeArchPort,
        arch::ExceptionLevel,
        attributes::{Executability, MemoryType, Permission, Security},
        levels,
    };

    fn limits() -> Limits {
        Limits {
            va_space_bits: 32,
            pa_space_bits: 32,
        }
    }

    #[test]
    fn singleton_is_shared_across_calls() {
        let arch = FakeArchPort::new(ExceptionLevel::El1, 44);
        add_region(
            limits(),
            Region {
                base_pa: 0x0900_0000,
                base_va: 0x0900_0000,
                size: levels::PAGE_SIZE,
                attr: Attributes::new(
                    MemoryType::Device,
                    Permission::ReadWrite,
                    Security::Secure,
                    Executability::ExecuteNever,
                ),
                granularity: levels::PAGE_SIZE,
            },
        );
        init_tables(limits(), &arch);
        assert!(default_context(limits()).lock().is_initialized());
    }
}
