//! Instruction nodes.
//!
//! Nodes are bump-allocated and immutable once inserted, with two
//! exceptions behind `Cell`: a branch's target is set exactly once during
//! jump resolution, and a side exit's target may be patched after
//! compilation. Operand references always point at nodes that already
//! exist in the same buffer, so the graph is acyclic by construction.

use core::cell::Cell;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::ptr;

use crate::accset::AccSet;
use crate::ir::callinfo::CallInfo;
use crate::ir::opcodes::Opcode;
use crate::ir::types::Ty;

/// A reference to an instruction node. Stable for the arena's lifetime.
pub type InsRef<'a> = &'a Ins<'a>;

/// A descriptor for one side exit out of a fragment.
///
/// Carries the source line for the "Exited block on line" report and the
/// entry address of the fragment the exit has been patched to, if any.
#[derive(Debug)]
pub struct SideExit {
    /// Source line of the guard that owns this exit.
    pub line: u32,
    /// Entry address of the patch target; zero while unpatched.
    pub target: Cell<usize>,
}

impl SideExit {
    /// A fresh, unpatched exit for a guard on `line`.
    pub fn new(line: u32) -> Self {
        Self {
            line,
            target: Cell::new(0),
        }
    }
}

/// The record a guard instruction owns, linking it to its side exit.
#[derive(Debug)]
pub struct GuardRecord<'a> {
    /// The exit taken when the guard trips.
    pub exit: &'a SideExit,
}

/// The payload of an instruction node.
#[derive(Debug)]
pub enum InsKind<'a> {
    /// `start` and `label` carry no payload.
    Nullary,
    /// `param` pseudo-instruction with its index.
    Param(u32),
    /// Immediates with the literal inline.
    ImmI(i32),
    ImmQ(i64),
    ImmF(f32),
    ImmD(f64),
    /// Fixed-arity operand references.
    Op1(InsRef<'a>),
    Op2(InsRef<'a>, InsRef<'a>),
    Op3(InsRef<'a>, InsRef<'a>, InsRef<'a>),
    /// A load from `base + disp`.
    Load {
        base: InsRef<'a>,
        disp: i32,
        acc: AccSet,
    },
    /// A store of `val` to `base + disp`.
    Store {
        val: InsRef<'a>,
        base: InsRef<'a>,
        disp: i32,
        acc: AccSet,
    },
    /// A call. Arguments are stored in reverse lexical order; the
    /// descriptor's signature is lexical. Both sides preserve this so
    /// positional argument indexing stays compatible downstream.
    Call {
        info: &'a CallInfo,
        args: &'a [InsRef<'a>],
    },
    /// `j`/`jt`/`jf`. The target is null until jump resolution.
    Branch {
        cond: Option<InsRef<'a>>,
        target: Cell<Option<InsRef<'a>>>,
    },
    /// Overflow-branching arithmetic (`addjovi` and kin).
    BranchOv {
        a: InsRef<'a>,
        b: InsRef<'a>,
        target: Cell<Option<InsRef<'a>>>,
    },
    /// `x`/`xt`/`xf`.
    Guard {
        cond: Option<InsRef<'a>>,
        rec: &'a GuardRecord<'a>,
    },
    /// Overflow-exiting arithmetic (`addxovi` and kin).
    GuardOv {
        a: InsRef<'a>,
        b: InsRef<'a>,
        rec: &'a GuardRecord<'a>,
    },
    /// `reti` and kin.
    Ret(InsRef<'a>),
    /// `allocp` with the byte size.
    Alloc(u32),
}

/// One LIR instruction node.
pub struct Ins<'a> {
    op: Opcode,
    id: u32,
    line: u32,
    prev: Cell<Option<InsRef<'a>>>,
    kind: InsKind<'a>,
}

impl<'a> Ins<'a> {
    pub(crate) fn new(op: Opcode, id: u32, line: u32, kind: InsKind<'a>) -> Self {
        Self {
            op,
            id,
            line,
            prev: Cell::new(None),
            kind,
        }
    }

    /// The opcode.
    pub fn opcode(&self) -> Opcode {
        self.op
    }

    /// Buffer-unique id, used for dump names.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Source line this node was emitted from.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// The payload.
    pub fn kind(&self) -> &InsKind<'a> {
        &self.kind
    }

    /// The type of the value this node produces.
    pub fn result_ty(&self) -> Ty {
        self.op.result_ty()
    }

    /// The previous node in the buffer, for backward iteration.
    pub fn prev(&self) -> Option<InsRef<'a>> {
        self.prev.get()
    }

    pub(crate) fn set_prev(&self, prev: Option<InsRef<'a>>) {
        self.prev.set(prev);
    }

    /// Whether this node is an immediate of any width.
    pub fn is_imm(&self) -> bool {
        matches!(
            self.kind,
            InsKind::ImmI(_) | InsKind::ImmQ(_) | InsKind::ImmF(_) | InsKind::ImmD(_)
        )
    }

    /// The value of an `immi` node, if that is what this is.
    pub fn imm_i(&self) -> Option<i32> {
        match self.kind {
            InsKind::ImmI(v) => Some(v),
            _ => None,
        }
    }

    /// The value of an `immq` node.
    pub fn imm_q(&self) -> Option<i64> {
        match self.kind {
            InsKind::ImmQ(v) => Some(v),
            _ => None,
        }
    }

    /// The value of an `immf` node.
    pub fn imm_f(&self) -> Option<f32> {
        match self.kind {
            InsKind::ImmF(v) => Some(v),
            _ => None,
        }
    }

    /// The value of an `immd` node.
    pub fn imm_d(&self) -> Option<f64> {
        match self.kind {
            InsKind::ImmD(v) => Some(v),
            _ => None,
        }
    }

    /// The guard record, if this node is a guard of either flavor.
    pub fn guard_record(&self) -> Option<&'a GuardRecord<'a>> {
        match self.kind {
            InsKind::Guard { rec, .. } | InsKind::GuardOv { rec, .. } => Some(rec),
            _ => None,
        }
    }

    /// The branch target, if this node is a branch of either flavor.
    pub fn branch_target(&self) -> Option<InsRef<'a>> {
        match &self.kind {
            InsKind::Branch { target, .. } | InsKind::BranchOv { target, .. } => target.get(),
            _ => None,
        }
    }

    /// Resolve this branch's target. May be called exactly once, with a
    /// label node from the same fragment.
    pub fn set_branch_target(&self, label: InsRef<'a>) {
        match &self.kind {
            InsKind::Branch { target, .. } | InsKind::BranchOv { target, .. } => {
                debug_assert!(target.get().is_none(), "branch target set twice");
                debug_assert_eq!(label.opcode(), Opcode::Label);
                target.set(Some(label));
            }
            _ => panic!("{} is not a branch", self.op.name()),
        }
    }
}

impl fmt::Debug for Ins<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ins({} #{})", self.op.name(), self.id)
    }
}

/// Address-identity wrapper for using nodes as hash keys.
///
/// Node addresses never dangle (the arena outlives every buffer), so an
/// address is a sound identity for "same value" in the CSE tables.
#[derive(Clone, Copy, Debug)]
pub struct InsPtr<'a>(pub InsRef<'a>);

impl InsPtr<'_> {
    /// The raw address used as the identity.
    pub fn addr(self) -> usize {
        self.0 as *const Ins as usize
    }
}

impl PartialEq for InsPtr<'_> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.0, other.0)
    }
}

impl Eq for InsPtr<'_> {}

impl Hash for InsPtr<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}
