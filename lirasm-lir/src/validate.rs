//! The validating writer.
//!
//! Purely observational: checks the type and arity of every emission and
//! fails loudly on a mismatch, then forwards unchanged. One instance sits
//! at the top of the pipeline so the client sees errors in terms of what it
//! asked for; a second sits above the buffer when optimization is on, since
//! the folder may synthesize new nodes.

use crate::accset::AccSet;
use crate::ir::{CallInfo, GuardRecord, InsRef, Opcode, Shape, Ty};
use crate::writer::{EmitOption, EmitResult, LirWriter, TypeError};

pub struct ValidateWriter<'a> {
    out: Box<dyn LirWriter<'a> + 'a>,
}

impl<'a> ValidateWriter<'a> {
    pub fn new(out: Box<dyn LirWriter<'a> + 'a>) -> Self {
        Self { out }
    }

    fn check_operand(op: Opcode, which: &str, got: Ty, want: Ty) -> Result<(), TypeError> {
        if got.compatible(want) {
            Ok(())
        } else {
            Err(TypeError(format!(
                "type mismatch: {} expects {} for {} operand, got {}",
                op.name(),
                want,
                which,
                got
            )))
        }
    }

    fn check_shape(op: Opcode, want: Shape) -> Result<(), TypeError> {
        if op.shape() == want {
            Ok(())
        } else {
            Err(TypeError(format!(
                "operand-count error: {} used with the wrong shape",
                op.name()
            )))
        }
    }

    fn check_base(op: Opcode, base: InsRef<'a>) -> Result<(), TypeError> {
        Self::check_operand(op, "base", base.result_ty(), Ty::Ptr)
    }

    fn check_condition(op: Opcode, cond: Option<InsRef<'a>>) -> Result<(), TypeError> {
        match (op.has_condition(), cond) {
            (true, Some(c)) => Self::check_operand(op, "condition", c.result_ty(), Ty::I32),
            (true, None) => Err(TypeError(format!(
                "operand-count error: {} requires a condition",
                op.name()
            ))),
            (false, Some(_)) => Err(TypeError(format!(
                "operand-count error: {} takes no condition",
                op.name()
            ))),
            (false, None) => Ok(()),
        }
    }
}

impl<'a> LirWriter<'a> for ValidateWriter<'a> {
    fn ins_start(&mut self) -> EmitResult<'a> {
        self.out.ins_start()
    }

    fn ins_param(&mut self, index: u32) -> EmitResult<'a> {
        self.out.ins_param(index)
    }

    fn ins_label(&mut self) -> EmitResult<'a> {
        self.out.ins_label()
    }

    fn ins1(&mut self, op: Opcode, a: InsRef<'a>) -> EmitResult<'a> {
        Self::check_shape(op, Shape::Un)?;
        Self::check_operand(op, "first", a.result_ty(), op.unary_operand_ty())?;
        self.out.ins1(op, a)
    }

    fn ins2(&mut self, op: Opcode, a: InsRef<'a>, b: InsRef<'a>) -> EmitResult<'a> {
        Self::check_shape(op, Shape::Bin)?;
        let (ta, tb) = op.binary_operand_tys();
        Self::check_operand(op, "first", a.result_ty(), ta)?;
        Self::check_operand(op, "second", b.result_ty(), tb)?;
        self.out.ins2(op, a, b)
    }

    fn ins3(
        &mut self,
        op: Opcode,
        a: InsRef<'a>,
        b: InsRef<'a>,
        c: InsRef<'a>,
    ) -> EmitResult<'a> {
        Self::check_shape(op, Shape::Ter)?;
        Self::check_operand(op, "condition", a.result_ty(), Ty::I32)?;
        Self::check_operand(op, "second", b.result_ty(), op.result_ty())?;
        Self::check_operand(op, "third", c.result_ty(), op.result_ty())?;
        self.out.ins3(op, a, b, c)
    }

    fn ins_imm_i(&mut self, v: i32) -> EmitResult<'a> {
        self.out.ins_imm_i(v)
    }

    fn ins_imm_q(&mut self, v: i64) -> EmitResult<'a> {
        self.out.ins_imm_q(v)
    }

    fn ins_imm_f(&mut self, v: f32) -> EmitResult<'a> {
        self.out.ins_imm_f(v)
    }

    fn ins_imm_d(&mut self, v: f64) -> EmitResult<'a> {
        self.out.ins_imm_d(v)
    }

    fn ins_alloc(&mut self, size: u32) -> EmitResult<'a> {
        if size == 0 {
            return Err(TypeError("allocp of zero bytes".to_string()));
        }
        self.out.ins_alloc(size)
    }

    fn ins_load(
        &mut self,
        op: Opcode,
        base: InsRef<'a>,
        disp: i32,
        acc: AccSet,
    ) -> EmitResult<'a> {
        Self::check_shape(op, Shape::Load)?;
        Self::check_base(op, base)?;
        self.out.ins_load(op, base, disp, acc)
    }

    fn ins_store(
        &mut self,
        op: Opcode,
        val: InsRef<'a>,
        base: InsRef<'a>,
        disp: i32,
        acc: AccSet,
    ) -> EmitResult<'a> {
        Self::check_shape(op, Shape::Store)?;
        Self::check_operand(op, "value", val.result_ty(), op.value_ty())?;
        Self::check_base(op, base)?;
        self.out.ins_store(op, val, base, disp, acc)
    }

    fn ins_call(
        &mut self,
        op: Opcode,
        info: &'a CallInfo,
        args: &[InsRef<'a>],
    ) -> EmitResult<'a> {
        Self::check_shape(op, Shape::Call)?;
        if args.len() != info.arg_count() {
            return Err(TypeError(format!(
                "call error: {} takes {} arguments, got {}",
                info.name,
                info.arg_count(),
                args.len()
            )));
        }
        if !op.result_ty().compatible(info.ret) && !(op == Opcode::Callv && info.ret == Ty::Void)
        {
            return Err(TypeError(format!(
                "call error: {} returns {}, called as {}",
                info.name,
                info.ret,
                op.name()
            )));
        }
        // Arguments arrive in reverse lexical order; the signature is
        // lexical.
        for (i, arg) in args.iter().rev().enumerate() {
            Self::check_operand(op, "argument", arg.result_ty(), info.args[i])?;
        }
        self.out.ins_call(op, info, args)
    }

    fn ins_branch(&mut self, op: Opcode, cond: Option<InsRef<'a>>) -> EmitOption<'a> {
        Self::check_shape(op, Shape::Branch)?;
        Self::check_condition(op, cond)?;
        self.out.ins_branch(op, cond)
    }

    fn ins_branch_ov(&mut self, op: Opcode, a: InsRef<'a>, b: InsRef<'a>) -> EmitResult<'a> {
        Self::check_shape(op, Shape::BranchOv)?;
        Self::check_operand(op, "first", a.result_ty(), Ty::I32)?;
        Self::check_operand(op, "second", b.result_ty(), Ty::I32)?;
        self.out.ins_branch_ov(op, a, b)
    }

    fn ins_guard(
        &mut self,
        op: Opcode,
        cond: Option<InsRef<'a>>,
        rec: &'a GuardRecord<'a>,
    ) -> EmitOption<'a> {
        Self::check_shape(op, Shape::Guard)?;
        Self::check_condition(op, cond)?;
        self.out.ins_guard(op, cond, rec)
    }

    fn ins_guard_ov(
        &mut self,
        op: Opcode,
        a: InsRef<'a>,
        b: InsRef<'a>,
        rec: &'a GuardRecord<'a>,
    ) -> EmitResult<'a> {
        Self::check_shape(op, Shape::GuardOv)?;
        Self::check_operand(op, "first", a.result_ty(), Ty::I32)?;
        Self::check_operand(op, "second", b.result_ty(), Ty::I32)?;
        self.out.ins_guard_ov(op, a, b, rec)
    }

    fn ins_ret(&mut self, op: Opcode, val: InsRef<'a>) -> EmitResult<'a> {
        Self::check_shape(op, Shape::Ret)?;
        Self::check_operand(op, "value", val.result_ty(), op.value_ty())?;
        self.out.ins_ret(op, val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::buffer::LirBuffer;
    use crate::writer::BufferWriter;

    fn pipeline<'a>(buf: &'a LirBuffer<'a>) -> ValidateWriter<'a> {
        ValidateWriter::new(Box::new(BufferWriter::new(buf)))
    }

    #[test]
    fn rejects_mixed_int_widths() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = pipeline(&buf);
        let a = w.ins_imm_i(1).unwrap();
        let b = w.ins_imm_q(2).unwrap();
        assert!(w.ins2(Opcode::Addi, a, b).is_err());
        assert!(w.ins2(Opcode::Addq, b, b).is_ok());
    }

    #[test]
    fn rejects_float_base() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = pipeline(&buf);
        let d = w.ins_imm_d(1.0).unwrap();
        assert!(w
            .ins_load(Opcode::Ldi, d, 0, AccSet::ALL)
            .is_err());
        let p = w.ins_alloc(8).unwrap();
        assert!(w.ins_load(Opcode::Ldi, p, 0, AccSet::ALL).is_ok());
    }

    #[test]
    fn rejects_missing_condition() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = pipeline(&buf);
        assert!(w.ins_branch(Opcode::Jt, None).is_err());
        assert!(w.ins_branch(Opcode::J, None).is_ok());
    }

    #[test]
    fn rejects_wrong_ret_ty() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = pipeline(&buf);
        let d = w.ins_imm_d(0.5).unwrap();
        assert!(w.ins_ret(Opcode::Reti, d).is_err());
        assert!(w.ins_ret(Opcode::Retd, d).is_ok());
    }
}
