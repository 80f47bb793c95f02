//! The writer interface the pipeline is built from.
//!
//! A `LirWriter` exposes one operation family: "emit an opcode with
//! operands". The parser talks to the head of a chain of writers; each
//! filter owns the next writer down and forwards (possibly after folding,
//! eliminating, or rewriting) until the buffer writer at the bottom
//! materializes a node. Filters may substitute an existing node for a
//! requested one (that is the whole point of CSE), so every method returns
//! the node the caller must use, which is not necessarily a new one.
//!
//! Branches and guards are the only emissions a filter may drop outright
//! (a branch or guard on a constant condition); their methods return an
//! `Option` so the caller knows whether anything still needs resolving.

use crate::accset::AccSet;
use crate::buffer::LirBuffer;
use crate::ir::{CallInfo, GuardRecord, InsKind, InsRef, Opcode};

/// A type or arity violation detected during emission. Always fatal.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TypeError(pub String);

/// Result of an emission that always produces (or substitutes) a node.
pub type EmitResult<'a> = Result<InsRef<'a>, TypeError>;

/// Result of a branch/guard emission, which a filter may drop.
pub type EmitOption<'a> = Result<Option<InsRef<'a>>, TypeError>;

/// The single sink capability the pipeline composes.
pub trait LirWriter<'a> {
    /// Emit the `start` pseudo-instruction.
    fn ins_start(&mut self) -> EmitResult<'a>;
    /// Emit a `param` pseudo-instruction.
    fn ins_param(&mut self, index: u32) -> EmitResult<'a>;
    /// Emit a basic-block label.
    fn ins_label(&mut self) -> EmitResult<'a>;
    /// Emit a unary operation.
    fn ins1(&mut self, op: Opcode, a: InsRef<'a>) -> EmitResult<'a>;
    /// Emit a binary operation.
    fn ins2(&mut self, op: Opcode, a: InsRef<'a>, b: InsRef<'a>) -> EmitResult<'a>;
    /// Emit a ternary operation (conditional move).
    fn ins3(&mut self, op: Opcode, a: InsRef<'a>, b: InsRef<'a>, c: InsRef<'a>)
        -> EmitResult<'a>;
    /// Emit a 32-bit integer immediate.
    fn ins_imm_i(&mut self, v: i32) -> EmitResult<'a>;
    /// Emit a 64-bit integer immediate.
    fn ins_imm_q(&mut self, v: i64) -> EmitResult<'a>;
    /// Emit a float immediate.
    fn ins_imm_f(&mut self, v: f32) -> EmitResult<'a>;
    /// Emit a double immediate.
    fn ins_imm_d(&mut self, v: f64) -> EmitResult<'a>;
    /// Emit a stack allocation of `size` bytes.
    fn ins_alloc(&mut self, size: u32) -> EmitResult<'a>;
    /// Emit a load.
    fn ins_load(&mut self, op: Opcode, base: InsRef<'a>, disp: i32, acc: AccSet)
        -> EmitResult<'a>;
    /// Emit a store.
    fn ins_store(
        &mut self,
        op: Opcode,
        val: InsRef<'a>,
        base: InsRef<'a>,
        disp: i32,
        acc: AccSet,
    ) -> EmitResult<'a>;
    /// Emit a call. `args` are in reverse lexical order, matching how the
    /// node stores them.
    fn ins_call(&mut self, op: Opcode, info: &'a CallInfo, args: &[InsRef<'a>])
        -> EmitResult<'a>;
    /// Emit a branch with an unresolved target.
    fn ins_branch(&mut self, op: Opcode, cond: Option<InsRef<'a>>) -> EmitOption<'a>;
    /// Emit overflow-branching arithmetic with an unresolved target.
    fn ins_branch_ov(&mut self, op: Opcode, a: InsRef<'a>, b: InsRef<'a>) -> EmitResult<'a>;
    /// Emit a guard.
    fn ins_guard(
        &mut self,
        op: Opcode,
        cond: Option<InsRef<'a>>,
        rec: &'a GuardRecord<'a>,
    ) -> EmitOption<'a>;
    /// Emit overflow-exiting arithmetic.
    fn ins_guard_ov(
        &mut self,
        op: Opcode,
        a: InsRef<'a>,
        b: InsRef<'a>,
        rec: &'a GuardRecord<'a>,
    ) -> EmitResult<'a>;
    /// Emit a return.
    fn ins_ret(&mut self, op: Opcode, val: InsRef<'a>) -> EmitResult<'a>;
}

/// The leaf writer: every call appends a node to the buffer, no questions
/// asked.
pub struct BufferWriter<'a> {
    buf: &'a LirBuffer<'a>,
}

impl<'a> BufferWriter<'a> {
    /// A writer appending to `buf`.
    pub fn new(buf: &'a LirBuffer<'a>) -> Self {
        Self { buf }
    }
}

impl<'a> LirWriter<'a> for BufferWriter<'a> {
    fn ins_start(&mut self) -> EmitResult<'a> {
        Ok(self.buf.insert(Opcode::Start, InsKind::Nullary))
    }

    fn ins_param(&mut self, index: u32) -> EmitResult<'a> {
        Ok(self.buf.insert(Opcode::Param, InsKind::Param(index)))
    }

    fn ins_label(&mut self) -> EmitResult<'a> {
        Ok(self.buf.insert(Opcode::Label, InsKind::Nullary))
    }

    fn ins1(&mut self, op: Opcode, a: InsRef<'a>) -> EmitResult<'a> {
        Ok(self.buf.insert(op, InsKind::Op1(a)))
    }

    fn ins2(&mut self, op: Opcode, a: InsRef<'a>, b: InsRef<'a>) -> EmitResult<'a> {
        Ok(self.buf.insert(op, InsKind::Op2(a, b)))
    }

    fn ins3(
        &mut self,
        op: Opcode,
        a: InsRef<'a>,
        b: InsRef<'a>,
        c: InsRef<'a>,
    ) -> EmitResult<'a> {
        Ok(self.buf.insert(op, InsKind::Op3(a, b, c)))
    }

    fn ins_imm_i(&mut self, v: i32) -> EmitResult<'a> {
        Ok(self.buf.insert(Opcode::Immi, InsKind::ImmI(v)))
    }

    fn ins_imm_q(&mut self, v: i64) -> EmitResult<'a> {
        Ok(self.buf.insert(Opcode::Immq, InsKind::ImmQ(v)))
    }

    fn ins_imm_f(&mut self, v: f32) -> EmitResult<'a> {
        Ok(self.buf.insert(Opcode::Immf, InsKind::ImmF(v)))
    }

    fn ins_imm_d(&mut self, v: f64) -> EmitResult<'a> {
        Ok(self.buf.insert(Opcode::Immd, InsKind::ImmD(v)))
    }

    fn ins_alloc(&mut self, size: u32) -> EmitResult<'a> {
        Ok(self.buf.insert(Opcode::Allocp, InsKind::Alloc(size)))
    }

    fn ins_load(
        &mut self,
        op: Opcode,
        base: InsRef<'a>,
        disp: i32,
        acc: AccSet,
    ) -> EmitResult<'a> {
        Ok(self.buf.insert(op, InsKind::Load { base, disp, acc }))
    }

    fn ins_store(
        &mut self,
        op: Opcode,
        val: InsRef<'a>,
        base: InsRef<'a>,
        disp: i32,
        acc: AccSet,
    ) -> EmitResult<'a> {
        Ok(self.buf.insert(
            op,
            InsKind::Store {
                val,
                base,
                disp,
                acc,
            },
        ))
    }

    fn ins_call(
        &mut self,
        op: Opcode,
        info: &'a CallInfo,
        args: &[InsRef<'a>],
    ) -> EmitResult<'a> {
        let args = self.buf.arena().alloc_slice(args);
        Ok(self.buf.insert(op, InsKind::Call { info, args }))
    }

    fn ins_branch(&mut self, op: Opcode, cond: Option<InsRef<'a>>) -> EmitOption<'a> {
        Ok(Some(self.buf.insert(
            op,
            InsKind::Branch {
                cond,
                target: core::cell::Cell::new(None),
            },
        )))
    }

    fn ins_branch_ov(&mut self, op: Opcode, a: InsRef<'a>, b: InsRef<'a>) -> EmitResult<'a> {
        Ok(self.buf.insert(
            op,
            InsKind::BranchOv {
                a,
                b,
                target: core::cell::Cell::new(None),
            },
        ))
    }

    fn ins_guard(
        &mut self,
        op: Opcode,
        cond: Option<InsRef<'a>>,
        rec: &'a GuardRecord<'a>,
    ) -> EmitOption<'a> {
        Ok(Some(self.buf.insert(op, InsKind::Guard { cond, rec })))
    }

    fn ins_guard_ov(
        &mut self,
        op: Opcode,
        a: InsRef<'a>,
        b: InsRef<'a>,
        rec: &'a GuardRecord<'a>,
    ) -> EmitResult<'a> {
        Ok(self.buf.insert(op, InsKind::GuardOv { a, b, rec }))
    }

    fn ins_ret(&mut self, op: Opcode, val: InsRef<'a>) -> EmitResult<'a> {
        Ok(self.buf.insert(op, InsKind::Ret(val)))
    }
}
