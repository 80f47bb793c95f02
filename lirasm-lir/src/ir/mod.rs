//! The LIR instruction set and instruction graph.

mod callinfo;
mod ins;
mod opcodes;
mod types;

pub use self::callinfo::{Abi, CallInfo, MAX_CALL_ARGS};
pub use self::ins::{GuardRecord, Ins, InsKind, InsPtr, InsRef, SideExit};
pub use self::opcodes::{Opcode, Shape};
pub use self::types::Ty;
