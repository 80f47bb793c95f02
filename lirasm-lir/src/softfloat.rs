//! The soft-float filter.
//!
//! On targets without FP hardware, double arithmetic, double comparisons,
//! and the int↔double conversions cannot be emitted directly; this filter
//! rewrites them into calls to helper routines before the folder and the
//! buffer ever see them. Targets with hardware FP simply leave the filter
//! out of the chain. The helper descriptors are pure calls with an empty
//! store set, so CSE treats a rewritten `addd` exactly like the original.

use rustc_hash::FxHashMap;

use crate::accset::AccSet;
use crate::arena::Arena;
use crate::ir::{Abi, CallInfo, GuardRecord, InsRef, Opcode, Ty};
use crate::writer::{EmitOption, EmitResult, LirWriter};

extern "C" fn sf_addd(a: f64, b: f64) -> f64 {
    a + b
}
extern "C" fn sf_subd(a: f64, b: f64) -> f64 {
    a - b
}
extern "C" fn sf_muld(a: f64, b: f64) -> f64 {
    a * b
}
extern "C" fn sf_divd(a: f64, b: f64) -> f64 {
    a / b
}
extern "C" fn sf_negd(a: f64) -> f64 {
    -a
}
extern "C" fn sf_eqd(a: f64, b: f64) -> i32 {
    (a == b) as i32
}
extern "C" fn sf_ltd(a: f64, b: f64) -> i32 {
    (a < b) as i32
}
extern "C" fn sf_gtd(a: f64, b: f64) -> i32 {
    (a > b) as i32
}
extern "C" fn sf_led(a: f64, b: f64) -> i32 {
    (a <= b) as i32
}
extern "C" fn sf_ged(a: f64, b: f64) -> i32 {
    (a >= b) as i32
}
extern "C" fn sf_i2d(v: i32) -> f64 {
    v as f64
}
extern "C" fn sf_ui2d(v: u32) -> f64 {
    v as f64
}
extern "C" fn sf_d2i(v: f64) -> i32 {
    v as i32
}

pub struct SoftFloatFilter<'a> {
    out: Box<dyn LirWriter<'a> + 'a>,
    helpers: FxHashMap<Opcode, &'a CallInfo>,
}

impl<'a> SoftFloatFilter<'a> {
    pub fn new(arena: &'a Arena, out: Box<dyn LirWriter<'a> + 'a>) -> Self {
        let mut helpers = FxHashMap::default();
        let mut add = |op: Opcode, name: &str, addr: usize, args: &[Ty], ret: Ty| {
            let info = arena.alloc(CallInfo {
                name: name.to_string(),
                addr,
                abi: Abi::Cdecl,
                args: args.iter().copied().collect(),
                ret,
                is_pure: true,
                store_acc: AccSet::NONE,
            });
            helpers.insert(op, info);
        };
        let dd_d = [Ty::F64, Ty::F64];
        add(Opcode::Addd, "sf_addd", sf_addd as usize, &dd_d, Ty::F64);
        add(Opcode::Subd, "sf_subd", sf_subd as usize, &dd_d, Ty::F64);
        add(Opcode::Muld, "sf_muld", sf_muld as usize, &dd_d, Ty::F64);
        add(Opcode::Divd, "sf_divd", sf_divd as usize, &dd_d, Ty::F64);
        add(Opcode::Negd, "sf_negd", sf_negd as usize, &[Ty::F64], Ty::F64);
        add(Opcode::Eqd, "sf_eqd", sf_eqd as usize, &dd_d, Ty::I32);
        add(Opcode::Ltd, "sf_ltd", sf_ltd as usize, &dd_d, Ty::I32);
        add(Opcode::Gtd, "sf_gtd", sf_gtd as usize, &dd_d, Ty::I32);
        add(Opcode::Led, "sf_led", sf_led as usize, &dd_d, Ty::I32);
        add(Opcode::Ged, "sf_ged", sf_ged as usize, &dd_d, Ty::I32);
        add(Opcode::I2d, "sf_i2d", sf_i2d as usize, &[Ty::I32], Ty::F64);
        add(Opcode::Ui2d, "sf_ui2d", sf_ui2d as usize, &[Ty::I32], Ty::F64);
        add(Opcode::D2i, "sf_d2i", sf_d2i as usize, &[Ty::F64], Ty::I32);
        Self { out, helpers }
    }

    fn call_op(ret: Ty) -> Opcode {
        match ret {
            Ty::F64 => Opcode::Calld,
            _ => Opcode::Calli,
        }
    }
}

impl<'a> LirWriter<'a> for SoftFloatFilter<'a> {
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
        if let Some(&info) = self.helpers.get(&op) {
            return self.out.ins_call(Self::call_op(info.ret), info, &[a]);
        }
        self.out.ins1(op, a)
    }

    fn ins2(&mut self, op: Opcode, a: InsRef<'a>, b: InsRef<'a>) -> EmitResult<'a> {
        if let Some(&info) = self.helpers.get(&op) {
            // Call operands are stored in reverse lexical order.
            return self.out.ins_call(Self::call_op(info.ret), info, &[b, a]);
        }
        self.out.ins2(op, a, b)
    }

    fn ins3(
        &mut self,
        op: Opcode,
        a: InsRef<'a>,
        b: InsRef<'a>,
        c: InsRef<'a>,
    ) -> EmitResult<'a> {
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
        self.out.ins_alloc(size)
    }

    fn ins_load(
        &mut self,
        op: Opcode,
        base: InsRef<'a>,
        disp: i32,
        acc: AccSet,
    ) -> EmitResult<'a> {
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
        self.out.ins_store(op, val, base, disp, acc)
    }

    fn ins_call(
        &mut self,
        op: Opcode,
        info: &'a CallInfo,
        args: &[InsRef<'a>],
    ) -> EmitResult<'a> {
        self.out.ins_call(op, info, args)
    }

    fn ins_branch(&mut self, op: Opcode, cond: Option<InsRef<'a>>) -> EmitOption<'a> {
        self.out.ins_branch(op, cond)
    }

    fn ins_branch_ov(&mut self, op: Opcode, a: InsRef<'a>, b: InsRef<'a>) -> EmitResult<'a> {
        self.out.ins_branch_ov(op, a, b)
    }

    fn ins_guard(
        &mut self,
        op: Opcode,
        cond: Option<InsRef<'a>>,
        rec: &'a GuardRecord<'a>,
    ) -> EmitOption<'a> {
        self.out.ins_guard(op, cond, rec)
    }

    fn ins_guard_ov(
        &mut self,
        op: Opcode,
        a: InsRef<'a>,
        b: InsRef<'a>,
        rec: &'a GuardRecord<'a>,
    ) -> EmitResult<'a> {
        self.out.ins_guard_ov(op, a, b, rec)
    }

    fn ins_ret(&mut self, op: Opcode, val: InsRef<'a>) -> EmitResult<'a> {
        self.out.ins_ret(op, val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::LirBuffer;
    use crate::ir::InsKind;
    use crate::writer::BufferWriter;

    #[test]
    fn double_arithmetic_becomes_a_call() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = SoftFloatFilter::new(buf.arena(), Box::new(BufferWriter::new(&buf)));
        let a = w.ins_imm_d(1.5).unwrap();
        let b = w.ins_imm_d(2.5).unwrap();
        let r = w.ins2(Opcode::Addd, a, b).unwrap();
        match r.kind() {
            InsKind::Call { info, args } => {
                assert_eq!(info.name, "sf_addd");
                assert!(info.is_pure);
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected call, got {other:?}"),
        }
        // The helper really computes the sum.
        let f: extern "C" fn(f64, f64) -> f64 =
            unsafe { core::mem::transmute(r_info_addr(r)) };
        assert_eq!(f(1.5, 2.5), 4.0);
    }

    fn r_info_addr(r: InsRef) -> usize {
        match r.kind() {
            InsKind::Call { info, .. } => info.addr,
            _ => unreachable!(),
        }
    }

    #[test]
    fn comparisons_return_int() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = SoftFloatFilter::new(buf.arena(), Box::new(BufferWriter::new(&buf)));
        let a = w.ins_imm_d(1.0).unwrap();
        let b = w.ins_imm_d(2.0).unwrap();
        let r = w.ins2(Opcode::Ltd, a, b).unwrap();
        assert_eq!(r.opcode(), Opcode::Calli);
        assert_eq!(r.result_ty(), Ty::I32);
    }

    #[test]
    fn float_ops_pass_through() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = SoftFloatFilter::new(buf.arena(), Box::new(BufferWriter::new(&buf)));
        let a = w.ins_imm_f(1.0).unwrap();
        let b = w.ins_imm_f(2.0).unwrap();
        let r = w.ins2(Opcode::Addf, a, b).unwrap();
        assert_eq!(r.opcode(), Opcode::Addf);
    }
}
