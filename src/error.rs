// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Error type returned by the dynamic-path APIs.
//!
//! The static path (everything before [`crate::context::Context::init_tables`]) never returns
//! one of these to its caller: a malformed static region is a build-time bug, so those paths
//! panic with this type's `Display` message instead.

use thiserror::Error;

/// Failure kinds produced by the translation-table engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The request was malformed: misaligned address/size, zero size, or an illegal attribute
    /// combination (write and execute together).
    #[error("invalid translation table request")]
    Invalid,
    /// The request falls outside the context's configured physical or virtual address space.
    #[error("address range exceeds configured address space")]
    Range,
    /// The region list is full, or the sub-table pool is exhausted.
    #[error("no free translation table memory")]
    NoMemory,
    /// The requested region conflicts with an already-registered region.
    #[error("region overlaps an existing mapping")]
    Overlap,
    /// The operation is not permitted on this region, for example removing a static region.
    #[error("operation not permitted on this region")]
    NotPermitted,
}
