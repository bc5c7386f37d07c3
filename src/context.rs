// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The top-level [`Context`] type: owns the region list and table pool, and exposes the public
//! mapping API.

use crate::{
    arch::{ArchPort, ExceptionLevel},
    attributes::Attributes,
    change_attributes,
    descriptor::{self, DescriptorKind},
    error::Error,
    levels,
    mapper::map_region,
    region::{Region, RegionList},
    table::{self, Table, TablePool},
    unmapper::unmap_range,
};
use core::fmt::{self, Debug, Formatter};
use log::{debug, info, trace};

/// Runtime-configured address space limits for a [`Context`].
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Size of the virtual address space, in bits.
    pub va_space_bits: u32,
    /// Size of the physical address space, in bits.
    pub pa_space_bits: u32,
}

impl Limits {
    const fn pa_ceiling(&self) -> usize {
        (1usize << self.pa_space_bits) - 1
    }

    const fn va_ceiling(&self) -> usize {
        (1usize << self.va_space_bits) - 1
    }
}

/// A translation-table engine instance: one region list, one table pool, one base table.
///
/// `MMAP_NUM` is the region list capacity; `TABLES_NUM` is the sub-table pool size. Both are
/// compile-time constants so the whole structure can live in `static` storage with no allocator.
pub struct Context<const MMAP_NUM: usize, const TABLES_NUM: usize> {
    regions: RegionList<MMAP_NUM>,
    pool: TablePool<TABLES_NUM>,
    limits: Limits,
    max_pa: usize,
    max_va: usize,
    el: Option<ExceptionLevel>,
    start_level: usize,
    xn_mask: u64,
    initialized: bool,
}

impl<const MMAP_NUM: usize, const TABLES_NUM: usize> Context<MMAP_NUM, TABLES_NUM> {
    /// Creates an uninitialized context whose current EL will be queried from the architecture
    /// port when [`Self::init_tables`] runs.
    pub const fn new(limits: Limits) -> Self {
        Self {
            regions: RegionList::new(),
            pool: TablePool::new(),
            limits,
            max_pa: 0,
            max_va: 0,
            el: None,
            start_level: 0,
            xn_mask: 0,
            initialized: false,
        }
    }

    /// Creates an uninitialized context pinned to `el`, rather than querying the current EL at
    /// init time. Used when the context describes a translation regime that is not the one
    /// running the code that builds it, e.g. a stage-2 context built by a hypervisor on behalf
    /// of a guest.
    pub const fn with_exception_level(limits: Limits, el: ExceptionLevel) -> Self {
        Self {
            regions: RegionList::new(),
            pool: TablePool::new(),
            limits,
            max_pa: 0,
            max_va: 0,
            el: Some(el),
            start_level: 0,
            xn_mask: 0,
            initialized: false,
        }
    }

    /// Returns whether [`Self::init_tables`] has run.
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Returns the physical address of the base (root) table, for programming into `TTBRn_ELx`.
    pub fn base_table_address(&self) -> usize {
        self.pool.base().physical_address()
    }

    /// Registers a static region. Must be called before [`Self::init_tables`].
    ///
    /// # Panics
    ///
    /// Panics if the context is already initialized, or if `region` is rejected (misaligned,
    /// out of range, or overlapping an existing region under the rules documented on
    /// [`crate::region::Region`]): a static-path error is always a caller bug.
    pub fn add_region(&mut self, region: Region) {
        assert!(!self.initialized, "add_region called after init_tables");
        if let Err(error) = self
            .regions
            .insert(region, self.limits.pa_ceiling(), self.limits.va_ceiling())
        {
            panic!("static region rejected: {error}");
        }
    }

    /// Registers each of `regions` via [`Self::add_region`], in order.
    pub fn add_regions(&mut self, regions: &[Region]) {
        for region in regions {
            self.add_region(*region);
        }
    }

    /// Builds the translation tree from every region registered so far, and marks the context
    /// initialized.
    ///
    /// # Panics
    ///
    /// Panics if called twice, or if any registered region cannot be mapped (the sub-table pool
    /// is too small for the declared regions: a build-time configuration bug).
    pub fn init_tables(&mut self, arch: &impl ArchPort) {
        assert!(!self.initialized, "init_tables called twice");

        let el = *self.el.get_or_insert_with(|| arch.current_el());
        self.xn_mask = arch.xn_mask(el);

        self.start_level = table::select_start_level(self.limits.va_space_bits)
            .expect("configured VA space exceeds what a single base table can cover");

        info!(
            "initializing translation tables: {} regions, start level {}",
            self.regions.as_slice().len(),
            self.start_level
        );

        for region in snapshot_regions(&self.regions) {
            debug!(
                "mapping region pa={:#x} va={:#x} size={:#x}",
                region.base_pa, region.base_va, region.size
            );
            let mut progress = region.base_va;
            if let Err(error) = map_region(
                &mut self.pool,
                &region,
                self.start_level,
                self.xn_mask,
                &mut progress,
            ) {
                panic!("failed to map static region at {:#x}: {error}", region.base_va);
            }
        }

        let (max_pa, max_va) = self.regions.max_pa_va();
        self.max_pa = max_pa;
        self.max_va = max_va;
        assert!(self.limits.pa_space_bits <= arch.max_pa_bits());
        assert!(self.max_va <= self.limits.va_ceiling());
        assert!(self.max_pa <= self.limits.pa_ceiling());

        self.initialized = true;
        trace!("translation tables initialized: {self:?}");
    }

    /// Adds and maps `region` after initialization. The region is marked dynamic, so it may
    /// later be removed with [`Self::remove_dynamic_region`].
    pub fn add_dynamic_region(&mut self, mut region: Region, arch: &impl ArchPort) -> Result<(), Error> {
        if !self.initialized {
            return Err(Error::NotPermitted);
        }
        region.attr.dynamic = true;

        self.regions
            .insert(region, self.limits.pa_ceiling(), self.limits.va_ceiling())?;

        let mut progress = region.base_va;
        let map_result = map_region(
            &mut self.pool,
            &region,
            self.start_level,
            self.xn_mask,
            &mut progress,
        );
        if let Err(error) = map_result {
            // Roll back: unmap whatever partial range was written, then drop the region from
            // the list so a retry is possible.
            if progress > region.base_va {
                unmap_range(
                    &mut self.pool,
                    region.base_va,
                    progress,
                    self.start_level,
                    arch,
                    self.el.unwrap_or(ExceptionLevel::El1),
                );
            }
            let _ = self.regions.remove_dynamic(region.base_va, region.size);
            return Err(error);
        }

        let (max_pa, max_va) = self.regions.max_pa_va();
        self.max_pa = max_pa;
        self.max_va = max_va;

        // Only INVALID descriptors were replaced, and hardware cannot cache those, so a single
        // store barrier is enough to publish the new mappings.
        arch.store_barrier();
        debug!("added dynamic region va={:#x} size={:#x}", region.base_va, region.size);
        Ok(())
    }

    /// Unmaps and removes the dynamic region identified by `(base_va, size)`.
    pub fn remove_dynamic_region(
        &mut self,
        base_va: usize,
        size: usize,
        arch: &impl ArchPort,
    ) -> Result<(), Error> {
        if size == 0 || !levels::is_page_aligned(base_va) || !levels::is_page_aligned(size) {
            return Err(Error::Invalid);
        }
        let end_va = base_va + size - 1;
        let region = self.regions.remove_dynamic(base_va, size)?;

        unmap_range(
            &mut self.pool,
            base_va,
            end_va,
            self.start_level,
            arch,
            self.el.unwrap_or(ExceptionLevel::El1),
        );
        arch.tlbi_sync();

        let (max_pa, max_va) = self.regions.max_pa_va();
        self.max_pa = max_pa;
        self.max_va = max_va;

        debug!("removed dynamic region va={:#x} size={:#x}", region.base_va, region.size);
        Ok(())
    }

    /// Changes the permission/execute-never bits of every page in `[base_va, base_va + size)`.
    /// Every page in the range must already be mapped at page granularity.
    pub fn change_attributes(
        &mut self,
        base_va: usize,
        size: usize,
        new_attr: Attributes,
        arch: &impl ArchPort,
    ) -> Result<(), Error> {
        if !self.initialized {
            return Err(Error::Invalid);
        }
        if new_attr.is_write_execute() {
            return Err(Error::Invalid);
        }
        change_attributes::change_attributes(
            &mut self.pool,
            self.start_level,
            base_va,
            size,
            new_attr.permission,
            new_attr.executable,
            self.xn_mask,
            arch,
            self.el.unwrap_or(ExceptionLevel::El1),
        )
    }
}

impl<const MMAP_NUM: usize, const TABLES_NUM: usize> Debug for Context<MMAP_NUM, TABLES_NUM> {
    /// Renders the region list, then a per-level recursive dump of the table tree with
    /// consecutive-invalid-entry runs compressed to a single line, mirroring what the original
    /// firmware's verbose-dump diagnostic gives an implementer staring at a bad mapping.
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        writeln!(
            f,
            "Context {{ max_pa: {:#x}, max_va: {:#x}, start_level: {}, initialized: {} }}",
            self.max_pa, self.max_va, self.start_level, self.initialized
        )?;
        writeln!(f, "regions:")?;
        for region in self.regions.as_slice() {
            writeln!(
                f,
                "  pa={:#x} va={:#x} size={:#x} dynamic={}",
                region.base_pa, region.base_va, region.size, region.attr.dynamic
            )?;
        }
        if self.initialized {
            writeln!(f, "tables:")?;
            dump_table(f, &self.pool, self.pool.base(), self.start_level, 1)?;
        }
        Ok(())
    }
}

/// Recursively dumps `table` (read at `level`) to `f`, indenting by `depth` levels and
/// compressing consecutive [`DescriptorKind::Invalid`] entries into a single `[a..b): invalid`
/// line instead of printing all 512 of them.
fn dump_table<const TABLES_NUM: usize>(
    f: &mut Formatter,
    pool: &TablePool<TABLES_NUM>,
    table: &Table,
    level: usize,
    depth: usize,
) -> fmt::Result {
    let indent = depth * 2;
    let mut index = 0;
    while index < levels::ENTRIES_PER_TABLE {
        let kind = DescriptorKind::of(table.entry(index), level);
        if kind == DescriptorKind::Invalid {
            let run_start = index;
            while index < levels::ENTRIES_PER_TABLE
                && DescriptorKind::of(table.entry(index), level) == DescriptorKind::Invalid
            {
                index += 1;
            }
            if index - run_start > 1 {
                writeln!(f, "{:indent$}[{run_start}..{index}): invalid", "")?;
            } else {
                writeln!(f, "{:indent$}[{run_start}]: invalid", "")?;
            }
            continue;
        }

        let raw = table.entry(index);
        let pa = descriptor::output_address(raw);
        writeln!(f, "{:indent$}[{index}]: {kind:?} pa={pa:#x}", "")?;
        if kind == DescriptorKind::Table {
            if let Some(sub_index) = pool.index_of(pa) {
                dump_table(f, pool, pool.sub_table(sub_index), level + 1, depth + 1)?;
            }
        }
        index += 1;
    }
    Ok(())
}

/// Copies the region list out before `init_tables`'s mapping loop runs, so the loop can mutate
/// `self.pool` without also holding a live borrow of `self.regions`.
fn snapshot_regions<const N: usize>(list: &RegionList<N>) -> arrayvec::ArrayVec<Region, N> {
    let mut items = arrayvec::ArrayVec::new();
    for region in list.as_slice() {
        items.push(*region);
    }
    items
}
