// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Two-pass mutation of the permission/execute-never bits of already page-mapped leaves.
//!
//! Pass one only reads the tree, so a malformed range is rejected before anything is written:
//! the public contract is "no partial change on failure".

use crate::{
    arch::{ArchPort, ExceptionLevel},
    attributes::{Executability, Permission},
    descriptor::{self, DescriptorKind},
    error::Error,
    levels::{self, MAX_LEVEL},
    table::TablePool,
};

/// Identifies which table a leaf lookup landed in: the base table, or a numbered sub-table.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TableRef {
    Base,
    Sub(usize),
}

fn entry_at<const N: usize>(pool: &TablePool<N>, table_ref: TableRef, index: usize) -> u64 {
    match table_ref {
        TableRef::Base => pool.base().entry(index),
        TableRef::Sub(i) => pool.sub_table(i).entry(index),
    }
}

fn set_entry_at<const N: usize>(pool: &mut TablePool<N>, table_ref: TableRef, index: usize, value: u64) {
    match table_ref {
        TableRef::Base => pool.base_mut().set_entry(index, value),
        TableRef::Sub(i) => pool.sub_table_mut(i).set_entry(index, value),
    }
}

/// Walks from the root to the leaf descriptor mapping `va`, requiring it to be a `PAGE`
/// descriptor (never a `BLOCK`): the engine refuses to split an existing block to change its
/// attributes.
fn leaf_entry<const N: usize>(
    pool: &TablePool<N>,
    start_level: usize,
    va: usize,
) -> Result<(TableRef, usize), Error> {
    let mut level = start_level;
    let mut table_ref = TableRef::Base;
    loop {
        let index = levels::index_of(va, level);
        let raw = entry_at(pool, table_ref, index);
        match DescriptorKind::of(raw, level) {
            DescriptorKind::Invalid | DescriptorKind::Block => return Err(Error::Invalid),
            DescriptorKind::Page => return Ok((table_ref, index)),
            DescriptorKind::Table => {
                let next = pool
                    .index_of(descriptor::output_address(raw))
                    .ok_or(Error::Invalid)?;
                table_ref = TableRef::Sub(next);
                level += 1;
                if level > MAX_LEVEL {
                    return Err(Error::Invalid);
                }
            }
        }
    }
}

/// Changes the permission/execute-never bits of every page in `[base_va, base_va + size)`.
///
/// Every page in the range must already be mapped at page granularity (a `PAGE` descriptor, not
/// a `BLOCK`); otherwise the whole call fails with [`Error::Invalid`] and no descriptor is
/// touched.
pub(crate) fn change_attributes<const N: usize>(
    pool: &mut TablePool<N>,
    start_level: usize,
    base_va: usize,
    size: usize,
    permission: Permission,
    executable: Executability,
    xn_mask: u64,
    arch: &impl ArchPort,
    el: ExceptionLevel,
) -> Result<(), Error> {
    if size == 0 || !levels::is_page_aligned(base_va) || !levels::is_page_aligned(size) {
        return Err(Error::Invalid);
    }
    let page_count = size / levels::PAGE_SIZE;

    // Pass one: validate every page is leaf-mapped. Writes nothing.
    for i in 0..page_count {
        let va = base_va + i * levels::PAGE_SIZE;
        leaf_entry(pool, start_level, va)?;
    }

    // Pass two: mutate, now that every page is known good.
    for i in 0..page_count {
        let va = base_va + i * levels::PAGE_SIZE;
        let (table_ref, index) =
            leaf_entry(pool, start_level, va).expect("pass one already validated this page");
        let raw = entry_at(pool, table_ref, index);
        let updated = descriptor::with_permission(raw, permission, executable, xn_mask);
        set_entry_at(pool, table_ref, index, updated);
        arch.tlbi_va(va, el);
    }
    arch.tlbi_sync();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arch::fake::FakeArchPort,
        attributes::{Attributes, MemoryType, Security},
        descriptor::XN_MASK_BOTH,
        mapper::map_region,
        region::Region,
    };

    fn ro_exec() -> Attributes {
        Attributes::new(
            MemoryType::Memory,
            Permission::ReadOnly,
            Security::NonSecure,
            Executability::Execute,
        )
    }

    #[test]
    fn flips_permission_on_mapped_page() {
        let mut pool: TablePool<4> = TablePool::new();
        let region = Region {
            base_pa: 0x8000_0000,
            base_va: 0x8000_0000,
            size: levels::PAGE_SIZE,
            attr: ro_exec(),
            granularity: levels::PAGE_SIZE,
        };
        let mut progress = 0;
        map_region(&mut pool, &region, 0, XN_MASK_BOTH, &mut progress).unwrap();

        let arch = FakeArchPort::new(ExceptionLevel::El1, 44);
        change_attributes(
            &mut pool,
            0,
            region.base_va,
            region.size,
            Permission::ReadOnly,
            Executability::ExecuteNever,
            XN_MASK_BOTH,
            &arch,
            ExceptionLevel::El1,
        )
        .unwrap();

        let (table_ref, index) = leaf_entry(&pool, 0, region.base_va).unwrap();
        let raw = entry_at(&pool, table_ref, index);
        assert_eq!(raw & XN_MASK_BOTH, XN_MASK_BOTH);
        assert_eq!(arch.invalidations.lock().len(), 1);
    }

    #[test]
    fn reapplying_the_same_attributes_is_idempotent() {
        let mut pool: TablePool<4> = TablePool::new();
        let region = Region {
            base_pa: 0x8000_0000,
            base_va: 0x8000_0000,
            size: levels::PAGE_SIZE,
            attr: ro_exec(),
            granularity: levels::PAGE_SIZE,
        };
        let mut progress = 0;
        map_region(&mut pool, &region, 0, XN_MASK_BOTH, &mut progress).unwrap();

        let arch = FakeArchPort::new(ExceptionLevel::El1, 44);
        for _ in 0..2 {
            change_attributes(
                &mut pool,
                0,
                region.base_va,
                region.size,
                Permission::ReadOnly,
                Executability::ExecuteNever,
                XN_MASK_BOTH,
                &arch,
                ExceptionLevel::El1,
            )
            .unwrap();
        }

        let (table_ref, index) = leaf_entry(&pool, 0, region.base_va).unwrap();
        let first = entry_at(&pool, table_ref, index);

        change_attributes(
            &mut pool,
            0,
            region.base_va,
            region.size,
            Permission::ReadOnly,
            Executability::ExecuteNever,
            XN_MASK_BOTH,
            &arch,
            ExceptionLevel::El1,
        )
        .unwrap();
        let second = entry_at(&pool, table_ref, index);

        assert_eq!(first, second, "reapplying identical attributes must not change the descriptor");
    }

    #[test]
    fn rejects_range_spanning_an_unmapped_page_without_mutating() {
        let mut pool: TablePool<4> = TablePool::new();
        let region = Region {
            base_pa: 0x8000_0000,
            base_va: 0x8000_0000,
            size: levels::PAGE_SIZE,
            attr: ro_exec(),
            granularity: levels::PAGE_SIZE,
        };
        let mut progress = 0;
        map_region(&mut pool, &region, 0, XN_MASK_BOTH, &mut progress).unwrap();

        let arch = FakeArchPort::new(ExceptionLevel::El1, 44);
        let result = change_attributes(
            &mut pool,
            0,
            region.base_va,
            region.size * 2,
            Permission::ReadOnly,
            Executability::ExecuteNever,
            XN_MASK_BOTH,
            &arch,
            ExceptionLevel::El1,
        );
        assert_eq!(result, Err(Error::Invalid));

        let (table_ref, index) = leaf_entry(&pool, 0, region.base_va).unwrap();
        let raw = entry_at(&pool, table_ref, index);
        assert_eq!(raw & XN_MASK_BOTH, 0, "original mapping must be untouched");
        assert!(arch.invalidations.lock().as_slice().is_empty());
    }
}
