//! Call descriptors.

use smallvec::SmallVec;

use crate::accset::AccSet;
use crate::ir::types::Ty;

/// The most arguments a call may carry.
pub const MAX_CALL_ARGS: usize = 8;

/// Calling conventions the front-end accepts.
///
/// Only 32-bit targets distinguish between these; the 64-bit back-end
/// lowers all of them to the host C convention. They are still parsed and
/// validated so built-in declarations stay meaningful.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Abi {
    Cdecl,
    Fastcall,
    Stdcall,
    Thiscall,
}

impl Abi {
    /// Textual name as written after the callee in a call statement.
    pub fn name(self) -> &'static str {
        match self {
            Abi::Cdecl => "cdecl",
            Abi::Fastcall => "fastcall",
            Abi::Stdcall => "stdcall",
            Abi::Thiscall => "thiscall",
        }
    }

    /// Look an ABI up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cdecl" => Some(Abi::Cdecl),
            "fastcall" => Some(Abi::Fastcall),
            "stdcall" => Some(Abi::Stdcall),
            "thiscall" => Some(Abi::Thiscall),
            _ => None,
        }
    }
}

/// Everything the pipeline and back-end need to know about a call target.
///
/// Built-in descriptors are created once by the front-end's function table;
/// descriptors for calls to other fragments are inferred at the call site
/// (return type from the call opcode, argument types from the operands).
/// Argument types are stored in lexical order even though the call node
/// stores its operands reversed.
#[derive(Clone, Debug)]
pub struct CallInfo {
    /// Name of the target, for diagnostics and the verbose dump.
    pub name: String,
    /// Absolute address of the target.
    pub addr: usize,
    /// Declared calling convention.
    pub abi: Abi,
    /// Argument types in lexical order.
    pub args: SmallVec<[Ty; MAX_CALL_ARGS]>,
    /// Return type.
    pub ret: Ty,
    /// Pure calls may be merged by CSE.
    pub is_pure: bool,
    /// The alias classes this call may store to. Empty for pure calls.
    pub store_acc: AccSet,
}

impl CallInfo {
    /// Number of declared arguments.
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }
}
