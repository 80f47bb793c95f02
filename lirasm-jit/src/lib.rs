//! Native back-end for the lirasm JIT.
//!
//! Takes a parsed [`lirasm_lir::Fragment`], walks its instruction stream,
//! and produces a contiguous executable region whose entry is the first
//! forward-order instruction. Exit stubs are patchable in place so
//! `.patch` can redirect a tripped guard into another fragment's entry.
//!
//! The emitter contract is small by design: `compile` either succeeds or
//! reports `BranchTooFar`, `StackFull`, or `UnknownBranch` (plus the
//! host-support and memory failures that a portable build adds), and the
//! driver treats them all as fatal for the fragment.

#![deny(trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub mod backend;
pub mod error;
pub mod memory;

pub use crate::backend::{compile, host_supported, CompiledFragment};
pub use crate::error::AsmError;
pub use crate::memory::CodeMemory;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
