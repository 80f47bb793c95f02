//! The verbose printing writer.
//!
//! Sits near the top of the pipeline: prints each emission in its textual
//! form and forwards unchanged. Because it prints the node the downstream
//! chain *returned*, a CSE hit shows up as the same `t<id>` name appearing
//! again, which is how a reader can tell one node is serving several
//! textual occurrences.

use crate::accset::AccSet;
use crate::ir::{CallInfo, GuardRecord, InsRef, Opcode};
use crate::write::format_ins;
use crate::writer::{EmitOption, EmitResult, LirWriter};

pub struct VerboseWriter<'a> {
    out: Box<dyn LirWriter<'a> + 'a>,
}

impl<'a> VerboseWriter<'a> {
    pub fn new(out: Box<dyn LirWriter<'a> + 'a>) -> Self {
        Self { out }
    }

    fn show(ins: InsRef<'a>) -> InsRef<'a> {
        println!("{}", format_ins(ins));
        ins
    }

    fn show_opt(ins: Option<InsRef<'a>>) -> Option<InsRef<'a>> {
        ins.map(Self::show)
    }
}

impl<'a> LirWriter<'a> for VerboseWriter<'a> {
    fn ins_start(&mut self) -> EmitResult<'a> {
        self.out.ins_start().map(Self::show)
    }

    fn ins_param(&mut self, index: u32) -> EmitResult<'a> {
        self.out.ins_param(index).map(Self::show)
    }

    fn ins_label(&mut self) -> EmitResult<'a> {
        self.out.ins_label().map(Self::show)
    }

    fn ins1(&mut self, op: Opcode, a: InsRef<'a>) -> EmitResult<'a> {
        self.out.ins1(op, a).map(Self::show)
    }

    fn ins2(&mut self, op: Opcode, a: InsRef<'a>, b: InsRef<'a>) -> EmitResult<'a> {
        self.out.ins2(op, a, b).map(Self::show)
    }

    fn ins3(
        &mut self,
        op: Opcode,
        a: InsRef<'a>,
        b: InsRef<'a>,
        c: InsRef<'a>,
    ) -> EmitResult<'a> {
        self.out.ins3(op, a, b, c).map(Self::show)
    }

    fn ins_imm_i(&mut self, v: i32) -> EmitResult<'a> {
        self.out.ins_imm_i(v).map(Self::show)
    }

    fn ins_imm_q(&mut self, v: i64) -> EmitResult<'a> {
        self.out.ins_imm_q(v).map(Self::show)
    }

    fn ins_imm_f(&mut self, v: f32) -> EmitResult<'a> {
        self.out.ins_imm_f(v).map(Self::show)
    }

    fn ins_imm_d(&mut self, v: f64) -> EmitResult<'a> {
        self.out.ins_imm_d(v).map(Self::show)
    }

    fn ins_alloc(&mut self, size: u32) -> EmitResult<'a> {
        self.out.ins_alloc(size).map(Self::show)
    }

    fn ins_load(
        &mut self,
        op: Opcode,
        base: InsRef<'a>,
        disp: i32,
        acc: AccSet,
    ) -> EmitResult<'a> {
        self.out.ins_load(op, base, disp, acc).map(Self::show)
    }

    fn ins_store(
        &mut self,
        op: Opcode,
        val: InsRef<'a>,
        base: InsRef<'a>,
        disp: i32,
        acc: AccSet,
    ) -> EmitResult<'a> {
        self.out.ins_store(op, val, base, disp, acc).map(Self::show)
    }

    fn ins_call(
        &mut self,
        op: Opcode,
        info: &'a CallInfo,
        args: &[InsRef<'a>],
    ) -> EmitResult<'a> {
        self.out.ins_call(op, info, args).map(Self::show)
    }

    fn ins_branch(&mut self, op: Opcode, cond: Option<InsRef<'a>>) -> EmitOption<'a> {
        self.out.ins_branch(op, cond).map(Self::show_opt)
    }

    fn ins_branch_ov(&mut self, op: Opcode, a: InsRef<'a>, b: InsRef<'a>) -> EmitResult<'a> {
        self.out.ins_branch_ov(op, a, b).map(Self::show)
    }

    fn ins_guard(
        &mut self,
        op: Opcode,
        cond: Option<InsRef<'a>>,
        rec: &'a GuardRecord<'a>,
    ) -> EmitOption<'a> {
        self.out.ins_guard(op, cond, rec).map(Self::show_opt)
    }

    fn ins_guard_ov(
        &mut self,
        op: Opcode,
        a: InsRef<'a>,
        b: InsRef<'a>,
        rec: &'a GuardRecord<'a>,
    ) -> EmitResult<'a> {
        self.out.ins_guard_ov(op, a, b, rec).map(Self::show)
    }

    fn ins_ret(&mut self, op: Opcode, val: InsRef<'a>) -> EmitResult<'a> {
        self.out.ins_ret(op, val).map(Self::show)
    }
}
