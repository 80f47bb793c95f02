//! Common-subexpression elimination as a streaming filter.
//!
//! Keys are `(opcode, operand addresses, immediate)`; a hit returns the
//! cached node instead of emitting. Only pure operations and pure calls are
//! cached. Loads are cached too, partitioned by access set: a store (or a
//! call that stores) invalidates exactly the load entries whose access set
//! intersects the effect. Labels delimit basic blocks and flush the entire
//! cache.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::accset::AccSet;
use crate::ir::{CallInfo, GuardRecord, InsPtr, InsRef, Opcode};
use crate::writer::{EmitOption, EmitResult, LirWriter};

type ArgKey = SmallVec<[usize; 4]>;

pub struct CseFilter<'a> {
    out: Box<dyn LirWriter<'a> + 'a>,
    imm_i: FxHashMap<i32, InsRef<'a>>,
    imm_q: FxHashMap<i64, InsRef<'a>>,
    imm_f: FxHashMap<u32, InsRef<'a>>,
    imm_d: FxHashMap<u64, InsRef<'a>>,
    expr1: FxHashMap<(Opcode, usize), InsRef<'a>>,
    expr2: FxHashMap<(Opcode, usize, usize), InsRef<'a>>,
    expr3: FxHashMap<(Opcode, usize, usize, usize), InsRef<'a>>,
    loads: FxHashMap<(Opcode, usize, i32, AccSet), InsRef<'a>>,
    calls: FxHashMap<(usize, ArgKey), InsRef<'a>>,
}

impl<'a> CseFilter<'a> {
    pub fn new(out: Box<dyn LirWriter<'a> + 'a>) -> Self {
        Self {
            out,
            imm_i: FxHashMap::default(),
            imm_q: FxHashMap::default(),
            imm_f: FxHashMap::default(),
            imm_d: FxHashMap::default(),
            expr1: FxHashMap::default(),
            expr2: FxHashMap::default(),
            expr3: FxHashMap::default(),
            loads: FxHashMap::default(),
            calls: FxHashMap::default(),
        }
    }

    fn clear_all(&mut self) {
        self.imm_i.clear();
        self.imm_q.clear();
        self.imm_f.clear();
        self.imm_d.clear();
        self.expr1.clear();
        self.expr2.clear();
        self.expr3.clear();
        self.loads.clear();
        self.calls.clear();
    }

    /// Drop cached loads whose access set intersects `stored`.
    fn invalidate_loads(&mut self, stored: AccSet) {
        self.loads.retain(|&(_, _, _, acc), _| !stored.aliases(acc));
    }

    fn addr(ins: InsRef<'a>) -> usize {
        InsPtr(ins).addr()
    }
}

impl<'a> LirWriter<'a> for CseFilter<'a> {
    fn ins_start(&mut self) -> EmitResult<'a> {
        self.out.ins_start()
    }

    fn ins_param(&mut self, index: u32) -> EmitResult<'a> {
        self.out.ins_param(index)
    }

    fn ins_label(&mut self) -> EmitResult<'a> {
        // A label starts a new basic block; nothing cached upstream of it
        // is known to dominate what follows.
        self.clear_all();
        self.out.ins_label()
    }

    fn ins1(&mut self, op: Opcode, a: InsRef<'a>) -> EmitResult<'a> {
        if !op.is_pure() {
            return self.out.ins1(op, a);
        }
        let key = (op, Self::addr(a));
        if let Some(&hit) = self.expr1.get(&key) {
            return Ok(hit);
        }
        let ins = self.out.ins1(op, a)?;
        self.expr1.insert(key, ins);
        Ok(ins)
    }

    fn ins2(&mut self, op: Opcode, a: InsRef<'a>, b: InsRef<'a>) -> EmitResult<'a> {
        if !op.is_pure() {
            return self.out.ins2(op, a, b);
        }
        let key = (op, Self::addr(a), Self::addr(b));
        if let Some(&hit) = self.expr2.get(&key) {
            return Ok(hit);
        }
        let ins = self.out.ins2(op, a, b)?;
        self.expr2.insert(key, ins);
        Ok(ins)
    }

    fn ins3(
        &mut self,
        op: Opcode,
        a: InsRef<'a>,
        b: InsRef<'a>,
        c: InsRef<'a>,
    ) -> EmitResult<'a> {
        if !op.is_pure() {
            return self.out.ins3(op, a, b, c);
        }
        let key = (op, Self::addr(a), Self::addr(b), Self::addr(c));
        if let Some(&hit) = self.expr3.get(&key) {
            return Ok(hit);
        }
        let ins = self.out.ins3(op, a, b, c)?;
        self.expr3.insert(key, ins);
        Ok(ins)
    }

    fn ins_imm_i(&mut self, v: i32) -> EmitResult<'a> {
        if let Some(&hit) = self.imm_i.get(&v) {
            return Ok(hit);
        }
        let ins = self.out.ins_imm_i(v)?;
        self.imm_i.insert(v, ins);
        Ok(ins)
    }

    fn ins_imm_q(&mut self, v: i64) -> EmitResult<'a> {
        if let Some(&hit) = self.imm_q.get(&v) {
            return Ok(hit);
        }
        let ins = self.out.ins_imm_q(v)?;
        self.imm_q.insert(v, ins);
        Ok(ins)
    }

    fn ins_imm_f(&mut self, v: f32) -> EmitResult<'a> {
        let bits = v.to_bits();
        if let Some(&hit) = self.imm_f.get(&bits) {
            return Ok(hit);
        }
        let ins = self.out.ins_imm_f(v)?;
        self.imm_f.insert(bits, ins);
        Ok(ins)
    }

    fn ins_imm_d(&mut self, v: f64) -> EmitResult<'a> {
        let bits = v.to_bits();
        if let Some(&hit) = self.imm_d.get(&bits) {
            return Ok(hit);
        }
        let ins = self.out.ins_imm_d(v)?;
        self.imm_d.insert(bits, ins);
        Ok(ins)
    }

    fn ins_alloc(&mut self, size: u32) -> EmitResult<'a> {
        // Each allocation is a distinct address; never merged.
        self.out.ins_alloc(size)
    }

    fn ins_load(
        &mut self,
        op: Opcode,
        base: InsRef<'a>,
        disp: i32,
        acc: AccSet,
    ) -> EmitResult<'a> {
        let key = (op, Self::addr(base), disp, acc);
        if let Some(&hit) = self.loads.get(&key) {
            return Ok(hit);
        }
        let ins = self.out.ins_load(op, base, disp, acc)?;
        self.loads.insert(key, ins);
        Ok(ins)
    }

    fn ins_store(
        &mut self,
        op: Opcode,
        val: InsRef<'a>,
        base: InsRef<'a>,
        disp: i32,
        acc: AccSet,
    ) -> EmitResult<'a> {
        self.invalidate_loads(acc);
        self.out.ins_store(op, val, base, disp, acc)
    }

    fn ins_call(
        &mut self,
        op: Opcode,
        info: &'a CallInfo,
        args: &[InsRef<'a>],
    ) -> EmitResult<'a> {
        if info.is_pure {
            let key = (
                info as *const CallInfo as usize,
                args.iter().map(|&a| Self::addr(a)).collect::<ArgKey>(),
            );
            if let Some(&hit) = self.calls.get(&key) {
                return Ok(hit);
            }
            let ins = self.out.ins_call(op, info, args)?;
            self.calls.insert(key, ins);
            Ok(ins)
        } else {
            self.invalidate_loads(info.store_acc);
            self.out.ins_call(op, info, args)
        }
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
    use crate::arena::Arena;
    use crate::buffer::LirBuffer;
    use crate::ir::InsPtr;
    use crate::writer::BufferWriter;

    fn cse<'a>(buf: &'a LirBuffer<'a>) -> CseFilter<'a> {
        CseFilter::new(Box::new(BufferWriter::new(buf)))
    }

    #[test]
    fn pure_ops_are_merged() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = cse(&buf);
        let a = w.ins_imm_i(2).unwrap();
        let b = w.ins_imm_i(3).unwrap();
        let y = w.ins2(Opcode::Addi, a, b).unwrap();
        let z = w.ins2(Opcode::Addi, a, b).unwrap();
        assert_eq!(InsPtr(y), InsPtr(z));
        // Two immediates plus exactly one add.
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn immediates_are_merged_by_value() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = cse(&buf);
        let a = w.ins_imm_i(7).unwrap();
        let b = w.ins_imm_i(7).unwrap();
        assert_eq!(InsPtr(a), InsPtr(b));
        // Negative zero and zero are different float immediates.
        let z = w.ins_imm_d(0.0).unwrap();
        let nz = w.ins_imm_d(-0.0).unwrap();
        assert_ne!(InsPtr(z), InsPtr(nz));
    }

    #[test]
    fn stores_bust_aliasing_loads_only() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = cse(&buf);
        let p = w.ins_alloc(8).unwrap();
        let v = w.ins_imm_i(1).unwrap();

        let l1 = w.ins_load(Opcode::Ldi, p, 0, AccSet::STACK).unwrap();
        let l2 = w.ins_load(Opcode::Ldi, p, 4, AccSet::OTHER).unwrap();
        // A store to STACK kills the first load but not the second.
        w.ins_store(Opcode::Sti, v, p, 0, AccSet::STACK).unwrap();
        let l1b = w.ins_load(Opcode::Ldi, p, 0, AccSet::STACK).unwrap();
        let l2b = w.ins_load(Opcode::Ldi, p, 4, AccSet::OTHER).unwrap();
        assert_ne!(InsPtr(l1), InsPtr(l1b));
        assert_eq!(InsPtr(l2), InsPtr(l2b));
    }

    #[test]
    fn loads_merge_without_intervening_store() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = cse(&buf);
        let p = w.ins_alloc(8).unwrap();
        let l1 = w.ins_load(Opcode::Ldi, p, 0, AccSet::ALL).unwrap();
        let l2 = w.ins_load(Opcode::Ldi, p, 0, AccSet::ALL).unwrap();
        assert_eq!(InsPtr(l1), InsPtr(l2));
    }

    #[test]
    fn labels_flush_everything() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = cse(&buf);
        let a = w.ins_imm_i(2).unwrap();
        let b = w.ins_imm_i(3).unwrap();
        let y = w.ins2(Opcode::Addi, a, b).unwrap();
        w.ins_label().unwrap();
        let z = w.ins2(Opcode::Addi, a, b).unwrap();
        assert_ne!(InsPtr(y), InsPtr(z));
    }

    #[test]
    fn allocs_are_never_merged() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = cse(&buf);
        let p = w.ins_alloc(16).unwrap();
        let q = w.ins_alloc(16).unwrap();
        assert_ne!(InsPtr(p), InsPtr(q));
    }
}
