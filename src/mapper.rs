// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The recursive descent that writes one region's mapping into the translation tree.

use crate::{
    descriptor::{self, DescriptorKind},
    error::Error,
    levels::{self, ENTRIES_PER_TABLE, MAX_LEVEL, MIN_BLOCK_LEVEL},
    region::Region,
    table::TablePool,
};

/// Identifies which table a recursive step is currently writing into.
#[derive(Debug, Clone, Copy)]
enum TableRef {
    Base,
    Sub(usize),
}

fn read_entry<const N: usize>(pool: &TablePool<N>, table_ref: TableRef, index: usize) -> u64 {
    match table_ref {
        TableRef::Base => pool.base().entry(index),
        TableRef::Sub(i) => pool.sub_table(i).entry(index),
    }
}

fn write_entry<const N: usize>(pool: &mut TablePool<N>, table_ref: TableRef, index: usize, value: u64) {
    match table_ref {
        TableRef::Base => pool.base_mut().set_entry(index, value),
        TableRef::Sub(i) => pool.sub_table_mut(i).set_entry(index, value),
    }
}

/// Returns the index of the first entry of a table starting at `table_base_va` that could be
/// touched while mapping `region`.
fn first_index(table_base_va: usize, level: usize, region: &Region) -> usize {
    if region.base_va <= table_base_va {
        0
    } else {
        (levels::align_down(region.base_va, level) - table_base_va) >> levels::shift(level)
    }
}

/// Maps `region` into the tree rooted at the base table, starting the walk at `start_level`.
///
/// On success, `*progress` is left at `region.end_va()`. On [`Error::NoMemory`] (the sub-table
/// pool is exhausted), `*progress` holds the address of the last byte that *was* successfully
/// mapped, so the caller can unmap exactly the partial range before propagating the error.
pub(crate) fn map_region<const N: usize>(
    pool: &mut TablePool<N>,
    region: &Region,
    start_level: usize,
    xn_mask: u64,
    progress: &mut usize,
) -> Result<(), Error> {
    walk(pool, TableRef::Base, 0, start_level, region, xn_mask, progress)
}

fn walk<const N: usize>(
    pool: &mut TablePool<N>,
    table_ref: TableRef,
    table_base_va: usize,
    level: usize,
    region: &Region,
    xn_mask: u64,
    progress: &mut usize,
) -> Result<(), Error> {
    let first = first_index(table_base_va, level, region);
    for index in first..ENTRIES_PER_TABLE {
        let entry_va_start = table_base_va + index * levels::block_size(level);
        if entry_va_start > region.end_va() {
            break;
        }
        let entry_va_end = entry_va_start + levels::block_size(level) - 1;
        let covers = region.base_va <= entry_va_start && region.end_va() >= entry_va_end;
        let disjoint = region.end_va() < entry_va_start || entry_va_end < region.base_va;
        if disjoint {
            continue;
        }

        let raw = read_entry(pool, table_ref, index);
        let kind = DescriptorKind::of(raw, level);

        match (covers, kind) {
            (true, DescriptorKind::Invalid) => {
                let pa = region.base_pa + (entry_va_start - region.base_va);
                let can_block = level == MAX_LEVEL
                    || (levels::is_aligned(pa, level)
                        && region.granularity >= levels::block_size(level)
                        && level >= MIN_BLOCK_LEVEL);
                if can_block {
                    let desc = descriptor::encode_leaf(&region.attr, pa, level, xn_mask);
                    write_entry(pool, table_ref, index, desc);
                    *progress = entry_va_end.min(region.end_va());
                } else {
                    recurse_into_new_table(pool, table_ref, index, entry_va_start, level, region, xn_mask, progress)?;
                }
            }
            (true, DescriptorKind::Table) => {
                recurse_into_existing_table(pool, table_ref, index, raw, entry_va_start, level, region, xn_mask, progress)?;
            }
            (true, DescriptorKind::Block | DescriptorKind::Page) => {
                // Already mapped by an earlier, more specific region; leave it alone.
            }
            (false, DescriptorKind::Invalid) => {
                debug_assert!(level < MAX_LEVEL, "partial overlap at page level");
                recurse_into_new_table(pool, table_ref, index, entry_va_start, level, region, xn_mask, progress)?;
            }
            (false, DescriptorKind::Table) => {
                recurse_into_existing_table(pool, table_ref, index, raw, entry_va_start, level, region, xn_mask, progress)?;
            }
            (false, DescriptorKind::Block | DescriptorKind::Page) => {
                // A partial overlap against an existing terminal entry indicates the region
                // validator let through something it should not have; nothing safe to do here.
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn recurse_into_new_table<const N: usize>(
    pool: &mut TablePool<N>,
    table_ref: TableRef,
    index: usize,
    entry_va_start: usize,
    level: usize,
    region: &Region,
    xn_mask: u64,
    progress: &mut usize,
) -> Result<(), Error> {
    let sub_index = pool.allocate()?;
    let sub_pa = pool.sub_table(sub_index).physical_address();
    write_entry(pool, table_ref, index, descriptor::encode_table(sub_pa));
    walk(
        pool,
        TableRef::Sub(sub_index),
        entry_va_start,
        level + 1,
        region,
        xn_mask,
        progress,
    )
}

#[allow(clippy::too_many_arguments)]
fn recurse_into_existing_table<const N: usize>(
    pool: &mut TablePool<N>,
    _table_ref: TableRef,
    _index: usize,
    raw: u64,
    entry_va_start: usize,
    level: usize,
    region: &Region,
    xn_mask: u64,
    progress: &mut usize,
) -> Result<(), Error> {
    let sub_index = pool
        .index_of(descriptor::output_address(raw))
        .expect("table descriptor points outside the sub-table pool");
    pool.acquire(sub_index);
    walk(
        pool,
        TableRef::Sub(sub_index),
        entry_va_start,
        level + 1,
        region,
        xn_mask,
        progress,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{Attributes, Executability, MemoryType, Permission, Security};
    use crate::descriptor::XN_MASK_BOTH;

    fn memory_rw() -> Attributes {
        Attributes::new(
            MemoryType::Memory,
            Permission::ReadWrite,
            Security::NonSecure,
            Executability::ExecuteNever,
        )
    }

    #[test]
    fn maps_single_page_through_three_levels() {
        let mut pool: TablePool<4> = TablePool::new();
        let region = Region {
            base_pa: 0x8000_0000,
            base_va: 0x8000_0000,
            size: levels::PAGE_SIZE,
            attr: memory_rw(),
            granularity: levels::PAGE_SIZE,
        };
        let mut progress = 0;
        map_region(&mut pool, &region, 0, XN_MASK_BOTH, &mut progress).unwrap();
        assert_eq!(progress, region.end_va());

        let index0 = levels::index_of(region.base_va, 0);
        let raw0 = pool.base().entry(index0);
        assert_eq!(DescriptorKind::of(raw0, 0), DescriptorKind::Table);
    }

    #[test]
    fn maps_aligned_region_as_a_single_block() {
        let mut pool: TablePool<4> = TablePool::new();
        let region = Region {
            base_pa: 0x4000_0000,
            base_va: 0x4000_0000,
            size: levels::block_size(1),
            attr: memory_rw(),
            granularity: levels::block_size(1),
        };
        let mut progress = 0;
        map_region(&mut pool, &region, 0, XN_MASK_BOTH, &mut progress).unwrap();

        let index0 = levels::index_of(region.base_va, 0);
        let raw0 = pool.base().entry(index0);
        assert_eq!(DescriptorKind::of(raw0, 0), DescriptorKind::Table);
        let sub = pool
            .index_of(descriptor::output_address(raw0))
            .expect("sub-table should exist");
        let index1 = levels::index_of(region.base_va, 1);
        let raw1 = pool.sub_table(sub).entry(index1);
        assert_eq!(DescriptorKind::of(raw1, 1), DescriptorKind::Block);
        assert_eq!(descriptor::output_address(raw1), region.base_pa);
    }

    #[test]
    fn exhausting_the_pool_reports_nomemory_and_partial_progress() {
        let mut pool: TablePool<0> = TablePool::new();
        let region = Region {
            base_pa: 0,
            base_va: 0,
            size: levels::PAGE_SIZE,
            attr: memory_rw(),
            granularity: levels::PAGE_SIZE,
        };
        let mut progress = 0;
        let result = map_region(&mut pool, &region, 0, XN_MASK_BOTH, &mut progress);
        assert_eq!(result, Err(Error::NoMemory));
        assert_eq!(progress, 0);
    }
}
