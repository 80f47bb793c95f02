//! Lirasm IR library.
//!
//! This crate holds everything between the textual front-end and the native
//! back-end: the bump arena that owns all IR storage, the LIR instruction
//! graph, the streaming writer pipeline with its optimization filters, and
//! the fragment records the back-end compiles.
//!
//! The writer pipeline is the heart of the crate. Clients emit instructions
//! through the [`LirWriter`] trait; each filter in the chain may fold,
//! eliminate, or rewrite an emission before the next filter sees it, and the
//! leaf writer appends whatever survives to a [`LirBuffer`]. Because every
//! node is allocated out of one arena, a node's address is stable for the
//! whole compilation and doubles as its value identity.

#![deny(trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub mod accset;
pub mod arena;
pub mod buffer;
pub mod fragment;
pub mod ir;
pub mod pipeline;
pub mod write;
pub mod writer;

mod cse;
mod fold;
mod softfloat;
mod validate;
mod verbose;

pub use crate::accset::AccSet;
pub use crate::arena::Arena;
pub use crate::buffer::LirBuffer;
pub use crate::fragment::{Fragment, FragmentMap, RetClass, RetMask, NUM_SAVED_REGS};
pub use crate::ir::{
    Abi, CallInfo, GuardRecord, Ins, InsKind, InsPtr, InsRef, Opcode, Shape, SideExit, Ty,
    MAX_CALL_ARGS,
};
pub use crate::pipeline::{build_pipeline, PipelineOpts};
pub use crate::writer::{LirWriter, TypeError};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
