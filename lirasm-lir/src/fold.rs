//! The expression folder.
//!
//! Constant-folds arithmetic, comparisons, and conversions; applies the
//! safe algebraic identities; turns branches and guards on constant
//! conditions into unconditional forms or nothing at all. Side effects are
//! never reordered: the folder only ever substitutes a value for a value.
//!
//! Integer folding uses wrapping arithmetic. Division is left unfolded when
//! the divisor is zero (or for the `i32::MIN / -1` case) so the runtime
//! behavior of the emitted code is preserved.

use crate::accset::AccSet;
use crate::ir::{CallInfo, GuardRecord, InsPtr, InsRef, Opcode};
use crate::writer::{EmitOption, EmitResult, LirWriter};

pub struct ExprFilter<'a> {
    out: Box<dyn LirWriter<'a> + 'a>,
}

impl<'a> ExprFilter<'a> {
    pub fn new(out: Box<dyn LirWriter<'a> + 'a>) -> Self {
        Self { out }
    }

    fn fold_i32(op: Opcode, a: i32, b: i32) -> Option<FoldedVal> {
        use Opcode::*;
        let v = match op {
            Addi => a.wrapping_add(b),
            Subi => a.wrapping_sub(b),
            Muli => a.wrapping_mul(b),
            Divi if b != 0 && !(a == i32::MIN && b == -1) => a / b,
            Modi if b != 0 && !(a == i32::MIN && b == -1) => a % b,
            Andi => a & b,
            Ori => a | b,
            Xori => a ^ b,
            Lshi => a.wrapping_shl(b as u32),
            Rshi => a.wrapping_shr(b as u32),
            Rshui => ((a as u32).wrapping_shr(b as u32)) as i32,
            Eqi => (a == b) as i32,
            Lti => (a < b) as i32,
            Gti => (a > b) as i32,
            Lei => (a <= b) as i32,
            Gei => (a >= b) as i32,
            Ltui => ((a as u32) < (b as u32)) as i32,
            Gtui => ((a as u32) > (b as u32)) as i32,
            Leui => ((a as u32) <= (b as u32)) as i32,
            Geui => ((a as u32) >= (b as u32)) as i32,
            _ => return None,
        };
        Some(FoldedVal::I(v))
    }

    fn fold_i64(op: Opcode, a: i64, b: i64) -> Option<FoldedVal> {
        use Opcode::*;
        let v = match op {
            Addq => a.wrapping_add(b),
            Subq => a.wrapping_sub(b),
            Andq => a & b,
            Orq => a | b,
            Xorq => a ^ b,
            Eqq => return Some(FoldedVal::I((a == b) as i32)),
            Ltq => return Some(FoldedVal::I((a < b) as i32)),
            Gtq => return Some(FoldedVal::I((a > b) as i32)),
            Leq => return Some(FoldedVal::I((a <= b) as i32)),
            Geq => return Some(FoldedVal::I((a >= b) as i32)),
            Ltuq => return Some(FoldedVal::I(((a as u64) < (b as u64)) as i32)),
            Gtuq => return Some(FoldedVal::I(((a as u64) > (b as u64)) as i32)),
            Leuq => return Some(FoldedVal::I(((a as u64) <= (b as u64)) as i32)),
            Geuq => return Some(FoldedVal::I(((a as u64) >= (b as u64)) as i32)),
            _ => return None,
        };
        Some(FoldedVal::Q(v))
    }

    fn fold_f64(op: Opcode, a: f64, b: f64) -> Option<FoldedVal> {
        use Opcode::*;
        let v = match op {
            Addd => a + b,
            Subd => a - b,
            Muld => a * b,
            Divd => a / b,
            Eqd => return Some(FoldedVal::I((a == b) as i32)),
            Ltd => return Some(FoldedVal::I((a < b) as i32)),
            Gtd => return Some(FoldedVal::I((a > b) as i32)),
            Led => return Some(FoldedVal::I((a <= b) as i32)),
            Ged => return Some(FoldedVal::I((a >= b) as i32)),
            _ => return None,
        };
        Some(FoldedVal::D(v))
    }

    fn fold_f32(op: Opcode, a: f32, b: f32) -> Option<FoldedVal> {
        use Opcode::*;
        let v = match op {
            Addf => a + b,
            Subf => a - b,
            Mulf => a * b,
            Divf => a / b,
            Eqf => return Some(FoldedVal::I((a == b) as i32)),
            Ltf => return Some(FoldedVal::I((a < b) as i32)),
            Gtf => return Some(FoldedVal::I((a > b) as i32)),
            Lef => return Some(FoldedVal::I((a <= b) as i32)),
            Gef => return Some(FoldedVal::I((a >= b) as i32)),
            _ => return None,
        };
        Some(FoldedVal::F(v))
    }

    fn emit_folded(&mut self, v: FoldedVal) -> EmitResult<'a> {
        match v {
            FoldedVal::I(v) => self.out.ins_imm_i(v),
            FoldedVal::Q(v) => self.out.ins_imm_q(v),
            FoldedVal::F(v) => self.out.ins_imm_f(v),
            FoldedVal::D(v) => self.out.ins_imm_d(v),
        }
    }

    /// Identities with an integer-zero/one immediate on one side. Float
    /// identities are deliberately absent (`x + 0.0` is not `x` for
    /// negative zero).
    fn identity(op: Opcode, a: InsRef<'a>, b: InsRef<'a>) -> Option<InsRef<'a>> {
        use Opcode::*;
        let ia = a.imm_i();
        let ib = b.imm_i();
        match op {
            Addi | Ori | Xori => {
                if ib == Some(0) {
                    return Some(a);
                }
                if ia == Some(0) {
                    return Some(b);
                }
            }
            Subi if ib == Some(0) => return Some(a),
            Muli => {
                if ib == Some(1) {
                    return Some(a);
                }
                if ia == Some(1) {
                    return Some(b);
                }
            }
            Lshi | Rshi | Rshui if ib == Some(0) => return Some(a),
            Addq | Orq | Xorq if b.imm_q() == Some(0) => return Some(a),
            Addq | Orq | Xorq if a.imm_q() == Some(0) => return Some(b),
            Subq if b.imm_q() == Some(0) => return Some(a),
            Lshq | Rshq | Rshuq if ib == Some(0) => return Some(a),
            _ => {}
        }
        None
    }
}

/// A folded constant, pending re-emission as an immediate.
enum FoldedVal {
    I(i32),
    Q(i64),
    F(f32),
    D(f64),
}

impl<'a> LirWriter<'a> for ExprFilter<'a> {
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
        use Opcode::*;
        if let Some(v) = a.imm_i() {
            let folded = match op {
                Negi => Some(FoldedVal::I(v.wrapping_neg())),
                Noti => Some(FoldedVal::I(!v)),
                I2q => Some(FoldedVal::Q(v as i64)),
                Ui2uq => Some(FoldedVal::Q((v as u32) as i64)),
                I2d => Some(FoldedVal::D(v as f64)),
                Ui2d => Some(FoldedVal::D((v as u32) as f64)),
                I2f => Some(FoldedVal::F(v as f32)),
                Ui2f => Some(FoldedVal::F((v as u32) as f32)),
                _ => None,
            };
            if let Some(f) = folded {
                return self.emit_folded(f);
            }
        }
        if let Some(v) = a.imm_q() {
            let folded = match op {
                Negq => Some(FoldedVal::Q(v.wrapping_neg())),
                Q2i => Some(FoldedVal::I(v as i32)),
                _ => None,
            };
            if let Some(f) = folded {
                return self.emit_folded(f);
            }
        }
        if let Some(v) = a.imm_d() {
            let folded = match op {
                Negd => Some(FoldedVal::D(-v)),
                D2f => Some(FoldedVal::F(v as f32)),
                D2i => Some(FoldedVal::I(v as i32)),
                _ => None,
            };
            if let Some(f) = folded {
                return self.emit_folded(f);
            }
        }
        if let Some(v) = a.imm_f() {
            let folded = match op {
                Negf => Some(FoldedVal::F(-v)),
                F2d => Some(FoldedVal::D(v as f64)),
                F2i => Some(FoldedVal::I(v as i32)),
                _ => None,
            };
            if let Some(f) = folded {
                return self.emit_folded(f);
            }
        }
        self.out.ins1(op, a)
    }

    fn ins2(&mut self, op: Opcode, a: InsRef<'a>, b: InsRef<'a>) -> EmitResult<'a> {
        use Opcode::*;
        let folded = match (a.kind(), b.kind()) {
            _ if a.imm_i().is_some() && b.imm_i().is_some() => {
                Self::fold_i32(op, a.imm_i().unwrap(), b.imm_i().unwrap())
            }
            _ if a.imm_q().is_some() && b.imm_q().is_some() => {
                Self::fold_i64(op, a.imm_q().unwrap(), b.imm_q().unwrap())
            }
            // 64-bit shifts take a 32-bit count.
            _ if a.imm_q().is_some() && b.imm_i().is_some() => {
                let (x, n) = (a.imm_q().unwrap(), b.imm_i().unwrap());
                match op {
                    Lshq => Some(FoldedVal::Q(x.wrapping_shl(n as u32))),
                    Rshq => Some(FoldedVal::Q(x.wrapping_shr(n as u32))),
                    Rshuq => Some(FoldedVal::Q(((x as u64).wrapping_shr(n as u32)) as i64)),
                    _ => None,
                }
            }
            _ if a.imm_d().is_some() && b.imm_d().is_some() => {
                Self::fold_f64(op, a.imm_d().unwrap(), b.imm_d().unwrap())
            }
            _ if a.imm_f().is_some() && b.imm_f().is_some() => {
                Self::fold_f32(op, a.imm_f().unwrap(), b.imm_f().unwrap())
            }
            _ => None,
        };
        if let Some(f) = folded {
            return self.emit_folded(f);
        }

        if let Some(ins) = Self::identity(op, a, b) {
            return Ok(ins);
        }

        // Same-operand identities for integer opcodes.
        if InsPtr(a) == InsPtr(b) {
            match op {
                Andi | Ori | Andq | Orq => return Ok(a),
                Xori | Subi => return self.out.ins_imm_i(0),
                Xorq | Subq => return self.out.ins_imm_q(0),
                Eqi | Lei | Gei | Leui | Geui => return self.out.ins_imm_i(1),
                Lti | Gti | Ltui | Gtui => return self.out.ins_imm_i(0),
                _ => {}
            }
        }

        // Multiplication by an integer zero is safe to fold; the operand is
        // pure by the validator's rules.
        if op == Muli && (a.imm_i() == Some(0) || b.imm_i() == Some(0)) {
            return self.out.ins_imm_i(0);
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
        if let Some(v) = a.imm_i() {
            return Ok(if v != 0 { b } else { c });
        }
        if InsPtr(b) == InsPtr(c) {
            return Ok(b);
        }
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
        use Opcode::*;
        if let Some(c) = cond {
            if let Some(v) = c.imm_i() {
                let taken = match op {
                    Jt => v != 0,
                    Jf => v == 0,
                    _ => return self.out.ins_branch(op, cond),
                };
                return if taken {
                    self.out.ins_branch(J, None)
                } else {
                    Ok(None)
                };
            }
        }
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
        use Opcode::*;
        if let Some(c) = cond {
            if let Some(v) = c.imm_i() {
                let trips = match op {
                    Xt => v != 0,
                    Xf => v == 0,
                    _ => return self.out.ins_guard(op, cond, rec),
                };
                return if trips {
                    self.out.ins_guard(X, None, rec)
                } else {
                    Ok(None)
                };
            }
        }
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
    use crate::arena::Arena;
    use crate::buffer::LirBuffer;
    use crate::ir::{InsKind, SideExit};
    use crate::writer::BufferWriter;

    fn folder<'a>(buf: &'a LirBuffer<'a>) -> ExprFilter<'a> {
        ExprFilter::new(Box::new(BufferWriter::new(buf)))
    }

    #[test]
    fn adds_fold_to_an_immediate() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = folder(&buf);
        let a = w.ins_imm_i(3).unwrap();
        let b = w.ins_imm_i(4).unwrap();
        let r = w.ins2(Opcode::Addi, a, b).unwrap();
        assert_eq!(r.imm_i(), Some(7));
    }

    #[test]
    fn division_by_zero_is_left_alone() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = folder(&buf);
        let a = w.ins_imm_i(3).unwrap();
        let z = w.ins_imm_i(0).unwrap();
        let r = w.ins2(Opcode::Divi, a, z).unwrap();
        assert_eq!(r.opcode(), Opcode::Divi);
    }

    #[test]
    fn float_division_folds_to_infinity() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = folder(&buf);
        let a = w.ins_imm_d(1.0).unwrap();
        let z = w.ins_imm_d(0.0).unwrap();
        let r = w.ins2(Opcode::Divd, a, z).unwrap();
        assert_eq!(r.imm_d(), Some(f64::INFINITY));
    }

    #[test]
    fn identities() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = folder(&buf);
        let z = w.ins_imm_i(0).unwrap();
        let one = w.ins_imm_i(1).unwrap();
        let p = w.ins_alloc(4).unwrap();
        let x = w.ins_load(Opcode::Ldi, p, 0, AccSet::ALL).unwrap();

        assert_eq!(InsPtr(w.ins2(Opcode::Addi, x, z).unwrap()), InsPtr(x));
        assert_eq!(InsPtr(w.ins2(Opcode::Muli, x, one).unwrap()), InsPtr(x));
        assert_eq!(InsPtr(w.ins2(Opcode::Andi, x, x).unwrap()), InsPtr(x));
        assert_eq!(w.ins2(Opcode::Xori, x, x).unwrap().imm_i(), Some(0));
        assert_eq!(w.ins2(Opcode::Muli, x, z).unwrap().imm_i(), Some(0));
    }

    #[test]
    fn cmov_on_constant_condition_selects_an_arm() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = folder(&buf);
        let t = w.ins_imm_i(1).unwrap();
        let a = w.ins_imm_i(10).unwrap();
        let b = w.ins_imm_i(20).unwrap();
        let r = w.ins3(Opcode::Cmovi, t, a, b).unwrap();
        assert_eq!(InsPtr(r), InsPtr(a));
    }

    #[test]
    fn guards_on_constants_simplify() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = folder(&buf);
        let exit = buf.arena().alloc(SideExit::new(1));
        let rec = buf.arena().alloc(GuardRecord { exit });

        let f = w.ins_imm_i(0).unwrap();
        assert!(w.ins_guard(Opcode::Xt, Some(f), rec).unwrap().is_none());
        let t = w.ins_imm_i(1).unwrap();
        let g = w.ins_guard(Opcode::Xt, Some(t), rec).unwrap().unwrap();
        assert_eq!(g.opcode(), Opcode::X);
        assert!(matches!(g.kind(), InsKind::Guard { cond: None, .. }));
    }

    #[test]
    fn casts_fold() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = folder(&buf);
        let a = w.ins_imm_i(-1).unwrap();
        assert_eq!(w.ins1(Opcode::I2q, a).unwrap().imm_q(), Some(-1));
        assert_eq!(
            w.ins1(Opcode::Ui2uq, a).unwrap().imm_q(),
            Some(0xffff_ffff)
        );
        assert_eq!(w.ins1(Opcode::I2d, a).unwrap().imm_d(), Some(-1.0));
        let d = w.ins_imm_d(3.75).unwrap();
        assert_eq!(w.ins1(Opcode::D2i, d).unwrap().imm_i(), Some(3));
    }
}
