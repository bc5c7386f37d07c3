// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The recursive descent that erases one region's mapping and recycles sub-tables that become
//! empty as a result.

use crate::{
    arch::{ArchPort, ExceptionLevel},
    descriptor::{self, DescriptorKind},
    levels::{self, ENTRIES_PER_TABLE, MAX_LEVEL},
    table::TablePool,
};

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

fn first_index(table_base_va: usize, level: usize, base_va: usize) -> usize {
    if base_va <= table_base_va {
        0
    } else {
        (levels::align_down(base_va, level) - table_base_va) >> levels::shift(level)
    }
}

/// Erases `[base_va, base_va + size)` from the tree rooted at the base table, invalidating the
/// TLB for every address whose descriptor is actually overwritten, and recycling any sub-table
/// whose occupancy count reaches zero as a result.
///
/// This function is attribute-blind: it only reads `base_va`/`size` to decide which entries to
/// touch, so it is equally usable to unmap a caller's region or, internally, a synthetic range
/// used to roll back a partially completed [`crate::mapper::map_region`].
pub(crate) fn unmap_range<const N: usize>(
    pool: &mut TablePool<N>,
    base_va: usize,
    end_va: usize,
    start_level: usize,
    arch: &impl ArchPort,
    el: ExceptionLevel,
) {
    walk(pool, TableRef::Base, 0, start_level, base_va, end_va, arch, el);
}

#[allow(clippy::too_many_arguments)]
fn walk<const N: usize>(
    pool: &mut TablePool<N>,
    table_ref: TableRef,
    table_base_va: usize,
    level: usize,
    base_va: usize,
    end_va: usize,
    arch: &impl ArchPort,
    el: ExceptionLevel,
) {
    let first = first_index(table_base_va, level, base_va);
    for index in first..ENTRIES_PER_TABLE {
        let entry_va_start = table_base_va + index * levels::block_size(level);
        if entry_va_start > end_va {
            break;
        }
        let entry_va_end = entry_va_start + levels::block_size(level) - 1;
        let disjoint = end_va < entry_va_start || entry_va_end < base_va;
        if disjoint {
            continue;
        }

        let raw = read_entry(pool, table_ref, index);
        match DescriptorKind::of(raw, level) {
            DescriptorKind::Invalid => {}
            DescriptorKind::Block | DescriptorKind::Page => {
                write_entry(pool, table_ref, index, 0);
                arch.tlbi_va(entry_va_start, el);
            }
            DescriptorKind::Table => {
                let sub_index = pool
                    .index_of(descriptor::output_address(raw))
                    .expect("table descriptor points outside the sub-table pool");
                walk(
                    pool,
                    TableRef::Sub(sub_index),
                    entry_va_start,
                    level + 1,
                    base_va,
                    end_va,
                    arch,
                    el,
                );
                if pool.release(sub_index) {
                    write_entry(pool, table_ref, index, 0);
                    arch.tlbi_va(entry_va_start, el);
                }
            }
        }
    }
    debug_assert!(level <= MAX_LEVEL);
}
