//! Textual LIR reader.
//!
//! Turns the `lirasm` textual form into the in-memory LIR of the
//! `lirasm-lir` crate by pushing each parsed statement through the writer
//! pipeline. The driver owns the top-level `.begin`/`.end`/`.patch`
//! dispatch; this crate supplies the tokenizer, the per-fragment
//! assembler, and the built-in function table.

#![deny(trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

#[macro_use]
mod error;

pub mod builtins;
pub mod lexer;
pub mod parser;

pub use crate::builtins::BuiltinTable;
pub use crate::error::{Location, ParseError, ParseResult};
pub use crate::lexer::{TokKind, Token, Tokenizer};
pub use crate::parser::assemble_fragment;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
