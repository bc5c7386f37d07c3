// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The narrow interface this crate uses to reach the host CPU: TLB maintenance, barriers, and a
//! couple of state queries. Everything else about the translation-table tree is architecture-pure
//! Rust; this module is the only seam where that purity has to stop.

/// The current exception level a translation regime is associated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionLevel {
    /// EL0, unprivileged.
    El0,
    /// EL1, kernel.
    El1,
    /// EL2, hypervisor.
    El2,
    /// EL3, secure monitor.
    El3,
}

/// Capabilities the translation-table engine needs from its host architecture.
///
/// A real backend for `aarch64` targets is provided behind `#[cfg(target_arch = "aarch64")]`; a
/// software backend for host-side testing is provided behind the `fakes` feature. A caller on
/// another architecture, or one that needs to intercept TLB maintenance (for example a
/// hypervisor trapping it to re-issue at a different stage), supplies its own implementation.
pub trait ArchPort {
    /// Invalidates any TLB entry caching a translation for `va` at `el`.
    fn tlbi_va(&self, va: usize, el: ExceptionLevel);

    /// Waits for prior TLB invalidations to complete and issues the barriers required before the
    /// results of further table reads are guaranteed visible.
    fn tlbi_sync(&self);

    /// Issues the barrier required to make prior writes to translation tables visible before a
    /// descriptor that is not yet architecturally live (e.g. replacing an `INVALID` entry with a
    /// dynamic mapping) is published.
    fn store_barrier(&self);

    /// Returns the combined execute-never mask (crate::descriptor bits) applicable to
    /// descriptors translated at `el`.
    fn xn_mask(&self, el: ExceptionLevel) -> u64;

    /// Returns the exception level the calling core is currently executing at.
    fn current_el(&self) -> ExceptionLevel;

    /// Returns the maximum physical address size, in bits, this CPU supports.
    fn max_pa_bits(&self) -> u32;

    /// Programs `MAIR_ELx`/`TCR_ELx` for `base_table_pa`, `max_pa_bits` and `max_va_bits`, then
    /// sets the MMU-enable bit in `SCTLR_ELx`.
    ///
    /// Building the tree never calls this; it is the platform's job to call it once, after
    /// [`crate::context::Context::init_tables`], at the point the boot sequence decides to turn
    /// the MMU on. The engine only exposes it so that decision can stay expressed in terms of this
    /// trait rather than a second, parallel architecture seam.
    fn enable_mmu(&self, base_table_pa: usize, max_pa_bits: u32, max_va_bits: u32);
}

#[cfg(all(target_arch = "aarch64", not(test)))]
mod aarch64_port {
    use super::{ArchPort, ExceptionLevel};
    use core::arch::asm;

    /// [`ArchPort`] backed by real AArch64 system instructions and registers.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct Aarch64Port;

    impl ArchPort for Aarch64Port {
        fn tlbi_va(&self, va: usize, el: ExceptionLevel) {
            let page = (va >> 12) as u64;
            // SAFETY: `tlbi` by VA only affects cached translations; it never faults and has no
            // memory-safety implications of its own.
            unsafe {
                match el {
                    ExceptionLevel::El0 | ExceptionLevel::El1 => {
                        asm!("tlbi vaae1is, {page}", page = in(reg) page, options(nostack))
                    }
                    ExceptionLevel::El2 => {
                        asm!("tlbi valle2is, {page}", page = in(reg) page, options(nostack))
                    }
                    ExceptionLevel::El3 => {
                        asm!("tlbi valle3is, {page}", page = in(reg) page, options(nostack))
                    }
                }
            }
        }

        fn tlbi_sync(&self) {
            // SAFETY: `dsb ish` and `isb` only order memory and instruction fetch; they cannot
            // fault.
            unsafe {
                asm!("dsb ish", options(nostack));
                asm!("isb", options(nostack));
            }
        }

        fn store_barrier(&self) {
            // SAFETY: `dsb ishst` only orders stores; it cannot fault.
            unsafe {
                asm!("dsb ishst", options(nostack));
            }
        }

        fn xn_mask(&self, el: ExceptionLevel) -> u64 {
            match el {
                // At EL1/EL0, UXN and PXN are independent; this engine sets both so a mapping
                // execute-never at one privilege level is execute-never at the other too.
                ExceptionLevel::El0 | ExceptionLevel::El1 => crate::descriptor::XN_MASK_BOTH,
                // At EL2/EL3 with a single translation regime, bit 54 is simply XN.
                ExceptionLevel::El2 | ExceptionLevel::El3 => 1 << 54,
            }
        }

        fn current_el(&self) -> ExceptionLevel {
            let el: u64;
            // SAFETY: reading `CurrentEL` has no side effects.
            unsafe {
                asm!("mrs {el}, CurrentEL", el = out(reg) el, options(nostack, nomem));
            }
            match (el >> 2) & 0b11 {
                0 => ExceptionLevel::El0,
                1 => ExceptionLevel::El1,
                2 => ExceptionLevel::El2,
                _ => ExceptionLevel::El3,
            }
        }

        fn max_pa_bits(&self) -> u32 {
            let mmfr0: u64;
            // SAFETY: reading `ID_AA64MMFR0_EL1` has no side effects.
            unsafe {
                asm!("mrs {v}, ID_AA64MMFR0_EL1", v = out(reg) mmfr0, options(nostack, nomem));
            }
            match mmfr0 & 0xf {
                0b0000 => 32,
                0b0001 => 36,
                0b0010 => 40,
                0b0011 => 42,
                0b0100 => 44,
                0b0101 => 48,
                0b0110 => 52,
                _ => 48,
            }
        }

        fn enable_mmu(&self, base_table_pa: usize, max_pa_bits: u32, max_va_bits: u32) {
            use crate::descriptor::{MAIR_DEVICE_INDEX, MAIR_MEMORY_INDEX, MAIR_NON_CACHEABLE_INDEX};

            const MAIR_DEVICE_NGNRE: u64 = 0x00;
            const MAIR_NORMAL_WB: u64 = 0xff;
            const MAIR_NORMAL_NC: u64 = 0x44;
            let mair = (MAIR_DEVICE_NGNRE << (MAIR_DEVICE_INDEX * 8))
                | (MAIR_NORMAL_WB << (MAIR_MEMORY_INDEX * 8))
                | (MAIR_NORMAL_NC << (MAIR_NON_CACHEABLE_INDEX * 8));

            let pa_encoding = match max_pa_bits {
                0..=32 => 0b000u64,
                33..=36 => 0b001,
                37..=40 => 0b010,
                41..=42 => 0b011,
                43..=44 => 0b100,
                45..=48 => 0b101,
                _ => 0b110,
            };
            let t0sz = (64 - max_va_bits) as u64;
            // IRGN0/ORGN0 = write-back write-allocate, SH0 = inner-shareable, granule = 4 KiB.
            let tcr = t0sz | (0b01 << 8) | (0b01 << 10) | (0b11 << 12) | (pa_encoding << 16);

            // SAFETY: these writes only take effect once `SCTLR_EL1.M` is set below, and the
            // barriers ensure every prior table write is visible before that happens.
            unsafe {
                asm!("dsb ish", options(nostack));
                asm!("msr MAIR_EL1, {v}", v = in(reg) mair, options(nostack));
                asm!("msr TCR_EL1, {v}", v = in(reg) tcr, options(nostack));
                asm!("msr TTBR0_EL1, {v}", v = in(reg) base_table_pa as u64, options(nostack));
                asm!("isb", options(nostack));

                let mut sctlr: u64;
                asm!("mrs {v}, SCTLR_EL1", v = out(reg) sctlr, options(nostack, nomem));
                sctlr |= 1; // M bit
                asm!("msr SCTLR_EL1, {v}", v = in(reg) sctlr, options(nostack));
                asm!("isb", options(nostack));
            }
        }
    }
}

#[cfg(all(target_arch = "aarch64", not(test)))]
pub use aarch64_port::Aarch64Port;

/// Software [`ArchPort`] for host-side unit tests and callers exercising this crate off-target.
///
/// Every call is recorded rather than acted on, so a test can assert exactly which TLB
/// maintenance the engine performed for a given operation.
#[cfg(any(test, feature = "fakes"))]
pub mod fake {
    use super::{ArchPort, ExceptionLevel};
    use arrayvec::ArrayVec;
    use spin::mutex::SpinMutex;

    /// Capacity of [`FakeArchPort::invalidations`]: test fixtures only ever need to record a
    /// handful of calls per scenario. A test expecting to exceed this should assert on the
    /// dropped tail explicitly rather than rely on growth.
    const MAX_RECORDED_INVALIDATIONS: usize = 64;

    /// Record of one invalidate-by-VA call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Invalidation {
        /// The address passed to [`ArchPort::tlbi_va`].
        pub va: usize,
        /// The exception level passed to [`ArchPort::tlbi_va`].
        pub el: ExceptionLevel,
    }

    /// A fake [`ArchPort`] with a fixed current EL and max-PA, that records every TLB
    /// maintenance and barrier call it receives.
    #[derive(Debug)]
    pub struct FakeArchPort {
        /// Invalidate-by-VA calls observed so far, in order.
        pub invalidations: SpinMutex<ArrayVec<Invalidation, MAX_RECORDED_INVALIDATIONS>>,
        /// Number of [`ArchPort::tlbi_sync`] calls observed so far.
        pub sync_count: core::sync::atomic::AtomicUsize,
        /// Number of [`ArchPort::store_barrier`] calls observed so far.
        pub store_barrier_count: core::sync::atomic::AtomicUsize,
        /// Exception level [`ArchPort::current_el`] reports.
        pub el: ExceptionLevel,
        /// Bit width [`ArchPort::max_pa_bits`] reports.
        pub max_pa_bits: u32,
        /// Arguments of the last [`ArchPort::enable_mmu`] call observed, if any.
        pub enabled_mmu: SpinMutex<Option<(usize, u32, u32)>>,
    }

    impl FakeArchPort {
        /// Creates a fake reporting `el` as current and `max_pa_bits` as the max PA size.
        pub fn new(el: ExceptionLevel, max_pa_bits: u32) -> Self {
            Self {
                invalidations: SpinMutex::new(ArrayVec::new_const()),
                sync_count: core::sync::atomic::AtomicUsize::new(0),
                store_barrier_count: core::sync::atomic::AtomicUsize::new(0),
                el,
                max_pa_bits,
                enabled_mmu: SpinMutex::new(None),
            }
        }
    }

    impl ArchPort for FakeArchPort {
        fn tlbi_va(&self, va: usize, el: ExceptionLevel) {
            let _ = self.invalidations.lock().try_push(Invalidation { va, el });
        }

        fn tlbi_sync(&self) {
            self.sync_count
                .fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        }

        fn store_barrier(&self) {
            self.store_barrier_count
                .fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        }

        fn xn_mask(&self, el: ExceptionLevel) -> u64 {
            match el {
                ExceptionLevel::El0 | ExceptionLevel::El1 => crate::descriptor::XN_MASK_BOTH,
                ExceptionLevel::El2 | ExceptionLevel::El3 => 1 << 54,
            }
        }

        fn current_el(&self) -> ExceptionLevel {
            self.el
        }

        fn max_pa_bits(&self) -> u32 {
            self.max_pa_bits
        }

        fn enable_mmu(&self, base_table_pa: usize, max_pa_bits: u32, max_va_bits: u32) {
            *self.enabled_mmu.lock() = Some((base_table_pa, max_pa_bits, max_va_bits));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fake::FakeArchPort;

    #[test]
    fn fake_records_invalidations() {
        let port = FakeArchPort::new(ExceptionLevel::El1, 44);
        port.tlbi_va(0x1000, ExceptionLevel::El1);
        port.tlbi_va(0x2000, ExceptionLevel::El1);
        port.tlbi_sync();
        port.store_barrier();

        let log = port.invalidations.lock();
        assert_eq!(log.len(), 2);
        assert_eq!(log.as_slice()[0].va, 0x1000);
        assert_eq!(
            port.sync_count.load(core::sync::atomic::Ordering::Relaxed),
            1
        );
        assert_eq!(
            port.store_barrier_count
                .load(core::sync::atomic::Ordering::Relaxed),
            1
        );
        assert_eq!(port.current_el(), ExceptionLevel::El1);
        assert_eq!(port.max_pa_bits(), 44);
    }

    #[test]
    fn fake_records_enable_mmu() {
        let port = FakeArchPort::new(ExceptionLevel::El1, 44);
        assert!(port.enabled_mmu.lock().is_none());
        port.enable_mmu(0x1000_0000, 44, 32);
        assert_eq!(*port.enabled_mmu.lock(), Some((0x1000_0000, 44, 32)));
    }
}
