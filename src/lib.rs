// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Allocator-free builder and maintainer for ARMv8-A VMSAv8-64 stage-1, 4 KiB-granule
//! translation tables.
//!
//! A caller describes a set of memory regions (physical range, virtual range, attributes,
//! granularity) via [`Context::add_region`], then calls [`Context::init_tables`] to build the
//! tree of translation tables realizing those mappings. After initialization, regions may be
//! added or removed dynamically, and the permission/execute-never bits of already page-mapped
//! ranges may be changed in place.
//!
//! ```ignore
//! // Requires the `fakes` feature, which is off by default.
//! use arm_xlat_tables::{
//!     arch::{ExceptionLevel, fake::FakeArchPort},
//!     attributes::{Attributes, Executability, MemoryType, Permission, Security},
//!     context::{Context, Limits},
//!     region::Region,
//! };
//!
//! let mut ctx: Context<8, 16> = Context::new(Limits {
//!     va_space_bits: 32,
//!     pa_space_bits: 32,
//! });
//! ctx.add_region(Region {
//!     base_pa: 0x0900_0000,
//!     base_va: 0x0900_0000,
//!     size: 0x1000,
//!     attr: Attributes::new(
//!         MemoryType::Device,
//!         Permission::ReadWrite,
//!         Security::Secure,
//!         Executability::ExecuteNever,
//!     ),
//!     granularity: 0x1000,
//! });
//! let arch = FakeArchPort::new(ExceptionLevel::El1, 44);
//! ctx.init_tables(&arch);
//! assert!(ctx.is_initialized());
//! ```
//!
//! This crate builds the tree itself; it never calls [`arch::ArchPort::enable_mmu`] on its own.
//! Actually turning the MMU on, with [`Context::base_table_address`] and the configured address
//! space sizes, remains the platform's call to make and at what point in boot to make it.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod attributes;
mod change_attributes;
pub mod context;
pub mod default_context;
pub mod descriptor;
pub mod error;
pub mod levels;
mod mapper;
pub mod region;
pub mod table;
mod unmapper;

/// Re-exported for convenience; see [`attributes::Attributes`].
pub use attributes::Attributes;
/// Re-exported for convenience; see [`context::Context`].
pub use context::Context;
/// Re-exported for convenience; see [`error::Error`].
pub use error::Error;
/// Re-exported for convenience; see [`region::Region`].
pub use region::Region;
