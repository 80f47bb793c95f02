//! Native emission for x86-64.
//!
//! The emitter consumes a fragment's instruction stream through the
//! buffer's backward walk (assigning every value a home stack slot as it
//! goes), then emits code forward over the recovered order. Register
//! allocation is deliberately absent: each instruction loads its operands
//! from their slots into a couple of scratch registers, computes, and
//! spills the result. Scratch state never lives across instructions, so
//! calls need no save/restore.
//!
//! Every guard gets a fixed 16-byte exit stub after the body: tear down
//! the frame, load the side-exit descriptor into the return register,
//! return. `.patch` rewrites a stub in place into frame-teardown plus a
//! tail jump to the target fragment's entry; the fixed size is what makes
//! the in-place rewrite possible.

use rustc_hash::FxHashMap;

use lirasm_lir::{Fragment, GuardRecord};

use crate::error::AsmError;
use crate::memory::CodeMemory;

/// Byte size of one exit stub.
const STUB_SIZE: usize = 16;

/// A fragment compiled to executable memory.
pub struct CompiledFragment {
    code: CodeMemory,
    exits: FxHashMap<usize, usize>,
}

impl CompiledFragment {
    /// Entry address of the fragment.
    pub fn entry(&self) -> usize {
        self.code.as_ptr() as usize
    }

    /// Bytes of emitted machine code.
    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// Rewrite the exit stub owned by `rec` so the guard transfers control
    /// to `target_entry` instead of returning through the side exit.
    pub fn patch_exit(
        &mut self,
        rec: &GuardRecord<'_>,
        target_entry: usize,
    ) -> Result<(), AsmError> {
        let key = rec as *const GuardRecord as usize;
        let &off = self.exits.get(&key).ok_or(AsmError::UnknownBranch)?;
        rec.exit.target.set(target_entry);
        let mut stub = Vec::with_capacity(STUB_SIZE);
        stub.push(0xc9); // leave
        stub.push(0x48); // mov rax, imm64
        stub.push(0xb8);
        stub.extend_from_slice(&(target_entry as u64).to_le_bytes());
        stub.push(0xff); // jmp rax
        stub.push(0xe0);
        while stub.len() < STUB_SIZE {
            stub.push(0xcc);
        }
        self.code.rewrite(off, &stub)
    }
}

/// Whether this build carries an emitter for the host.
pub fn host_supported() -> bool {
    cfg!(target_arch = "x86_64")
}

/// Compile a fragment to native code.
pub fn compile(frag: &Fragment<'_>) -> Result<CompiledFragment, AsmError> {
    #[cfg(target_arch = "x86_64")]
    {
        x64::compile(frag)
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = frag;
        Err(AsmError::UnsupportedHost(std::env::consts::ARCH))
    }
}

#[cfg(target_arch = "x86_64")]
mod x64 {
    use super::*;
    use lirasm_lir::{Ins, InsKind, InsRef, Opcode, Ty};

    /// Frames larger than this report `StackFull`.
    const MAX_FRAME: i32 = 1 << 20;

    fn ins_addr(ins: InsRef<'_>) -> usize {
        ins as *const Ins as usize
    }

    /// Home-slot layout for one fragment's frame. Displacements are
    /// negative offsets from `rbp`.
    struct FrameLayout {
        slots: FxHashMap<usize, i32>,
        areas: FxHashMap<usize, i32>,
        size: i32,
    }

    fn align16(v: i32) -> i32 {
        (v + 15) & !15
    }

    /// Walk the stream backwards and give every value-producing node a
    /// home slot; `allocp` additionally reserves its area.
    fn layout(frag: &Fragment<'_>) -> Result<FrameLayout, AsmError> {
        let mut slots = FxHashMap::default();
        let mut areas = FxHashMap::default();
        let mut next: i32 = 0;
        for ins in frag.buffer.iter_rev() {
            let op = ins.opcode();
            if let InsKind::Alloc(size) = *ins.kind() {
                if size as i64 > MAX_FRAME as i64 {
                    return Err(AsmError::StackFull);
                }
                next = align16(next) + align16(size as i32);
                areas.insert(ins_addr(ins), -next);
            }
            let produces = ins.result_ty() != Ty::Void
                && !matches!(op, Opcode::Start | Opcode::Label);
            if produces {
                if ins.result_ty() == Ty::F4 {
                    next = align16(next) + 16;
                } else {
                    next += 8;
                }
                slots.insert(ins_addr(ins), -next);
            }
            if next > MAX_FRAME {
                return Err(AsmError::StackFull);
            }
        }
        Ok(FrameLayout {
            slots,
            areas,
            size: align16(next),
        })
    }

    const RAX: u8 = 0;
    const RCX: u8 = 1;
    const RDX: u8 = 2;

    const XMM0: u8 = 0;
    const XMM1: u8 = 1;

    /// System V integer argument registers, in order.
    const INT_ARG_REGS: [u8; 6] = [7, 6, 2, 1, 8, 9]; // rdi rsi rdx rcx r8 r9
    const MAX_FP_ARGS: usize = 8; // xmm0..xmm7

    /// Raw x86-64 byte emitter.
    struct Asm {
        buf: Vec<u8>,
    }

    impl Asm {
        fn new() -> Self {
            Self { buf: Vec::new() }
        }

        fn pos(&self) -> usize {
            self.buf.len()
        }

        fn byte(&mut self, b: u8) {
            self.buf.push(b);
        }

        fn bytes(&mut self, bs: &[u8]) {
            self.buf.extend_from_slice(bs);
        }

        fn imm32(&mut self, v: i32) {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }

        fn imm64(&mut self, v: u64) {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }

        /// ModRM for `[rbp + disp32]`.
        fn rbp_modrm(&mut self, reg: u8, disp: i32) {
            self.byte(0x85 | ((reg & 7) << 3));
            self.imm32(disp);
        }

        /// ModRM for `[rax + disp32]`.
        fn rax_modrm(&mut self, reg: u8, disp: i32) {
            self.byte(0x80 | ((reg & 7) << 3));
            self.imm32(disp);
        }

        /// ModRM for register-register forms.
        fn reg_modrm(&mut self, reg: u8, rm: u8) {
            self.byte(0xc0 | ((reg & 7) << 3) | (rm & 7));
        }

        /// `mov r32, [rbp + disp]`
        fn mov_r32_slot(&mut self, reg: u8, disp: i32) {
            if reg >= 8 {
                self.byte(0x44);
            }
            self.byte(0x8b);
            self.rbp_modrm(reg, disp);
        }

        /// `mov [rbp + disp], r32`
        fn mov_slot_r32(&mut self, disp: i32, reg: u8) {
            if reg >= 8 {
                self.byte(0x44);
            }
            self.byte(0x89);
            self.rbp_modrm(reg, disp);
        }

        /// `mov r64, [rbp + disp]`
        fn mov_r64_slot(&mut self, reg: u8, disp: i32) {
            self.byte(0x48 | if reg >= 8 { 0x04 } else { 0 });
            self.byte(0x8b);
            self.rbp_modrm(reg, disp);
        }

        /// `mov [rbp + disp], r64`
        fn mov_slot_r64(&mut self, disp: i32, reg: u8) {
            self.byte(0x48 | if reg >= 8 { 0x04 } else { 0 });
            self.byte(0x89);
            self.rbp_modrm(reg, disp);
        }

        /// `mov r64, imm64`
        fn mov_r64_imm(&mut self, reg: u8, v: u64) {
            self.byte(0x48 | if reg >= 8 { 0x01 } else { 0 });
            self.byte(0xb8 | (reg & 7));
            self.imm64(v);
        }

        /// `mov dword [rbp + disp], imm32`
        fn mov_slot_imm32(&mut self, disp: i32, v: i32) {
            self.byte(0xc7);
            self.rbp_modrm(0, disp);
            self.imm32(v);
        }

        /// SSE op with an optional mandatory prefix, `xmm <- [rbp + disp]`
        /// style addressing.
        fn sse_slot(&mut self, prefix: Option<u8>, op: u8, xmm: u8, disp: i32) {
            if let Some(p) = prefix {
                self.byte(p);
            }
            self.byte(0x0f);
            self.byte(op);
            self.rbp_modrm(xmm, disp);
        }

        /// SSE op, `xmm <- [rax + disp]` addressing.
        fn sse_rax(&mut self, prefix: Option<u8>, op: u8, xmm: u8, disp: i32) {
            if let Some(p) = prefix {
                self.byte(p);
            }
            self.byte(0x0f);
            self.byte(op);
            self.rax_modrm(xmm, disp);
        }

        /// SSE op on two registers.
        fn sse_reg(&mut self, prefix: Option<u8>, op: u8, a: u8, b: u8) {
            if let Some(p) = prefix {
                self.byte(p);
            }
            self.byte(0x0f);
            self.byte(op);
            self.reg_modrm(a, b);
        }

        /// `setcc al; movzx eax, al`
        fn setcc_eax(&mut self, cc: u8) {
            self.bytes(&[0x0f, cc, 0xc0]);
            self.bytes(&[0x0f, 0xb6, 0xc0]);
        }

        /// Emit a rel32 placeholder and return its position.
        fn rel32_placeholder(&mut self) -> usize {
            let pos = self.pos();
            self.imm32(0);
            pos
        }

        fn patch_rel32(&mut self, pos: usize, target: usize) -> Result<(), AsmError> {
            let rel = target as i64 - (pos as i64 + 4);
            if rel < i32::MIN as i64 || rel > i32::MAX as i64 {
                return Err(AsmError::BranchTooFar);
            }
            self.buf[pos..pos + 4].copy_from_slice(&(rel as i32).to_le_bytes());
            Ok(())
        }
    }

    struct Emitter<'a> {
        asm: Asm,
        frame: FrameLayout,
        labels: FxHashMap<usize, usize>,
        label_fixups: Vec<(usize, usize)>,
        stub_fixups: Vec<(usize, usize)>,
        stubs: Vec<&'a GuardRecord<'a>>,
    }

    pub(super) fn compile(frag: &Fragment<'_>) -> Result<CompiledFragment, AsmError> {
        let frame = layout(frag)?;
        let mut order: Vec<InsRef> = frag.buffer.iter_rev().collect();
        order.reverse();

        let mut e = Emitter {
            asm: Asm::new(),
            frame,
            labels: FxHashMap::default(),
            label_fixups: Vec::new(),
            stub_fixups: Vec::new(),
            stubs: Vec::new(),
        };

        // Prologue.
        e.asm.byte(0x55); // push rbp
        e.asm.bytes(&[0x48, 0x89, 0xe5]); // mov rbp, rsp
        e.asm.bytes(&[0x48, 0x81, 0xec]); // sub rsp, imm32
        e.asm.imm32(e.frame.size);

        for &ins in &order {
            e.emit_ins(ins)?;
        }

        // Exit stubs.
        let mut stub_offs = Vec::with_capacity(e.stubs.len());
        let mut exits = FxHashMap::default();
        for rec in &e.stubs {
            let off = e.asm.pos();
            stub_offs.push(off);
            e.asm.byte(0xc9); // leave
            e.asm.bytes(&[0x48, 0xb8]); // mov rax, imm64
            e.asm
                .imm64(rec.exit as *const lirasm_lir::SideExit as u64);
            e.asm.byte(0xc3); // ret
            while e.asm.pos() - off < STUB_SIZE {
                e.asm.byte(0xcc);
            }
            exits.insert(*rec as *const GuardRecord as usize, off);
        }

        // Resolve branches.
        for (pos, target) in core::mem::take(&mut e.label_fixups) {
            let Some(&t) = e.labels.get(&target) else {
                return Err(AsmError::UnknownBranch);
            };
            e.asm.patch_rel32(pos, t)?;
        }
        for (pos, idx) in core::mem::take(&mut e.stub_fixups) {
            e.asm.patch_rel32(pos, stub_offs[idx])?;
        }

        log::debug!(
            "fragment '{}': {} LIR nodes, {} bytes of code, frame {} bytes",
            frag.name,
            frag.buffer.len(),
            e.asm.buf.len(),
            e.frame.size
        );

        let code = CodeMemory::from_code(&e.asm.buf)?;
        Ok(CompiledFragment { code, exits })
    }

    impl<'a> Emitter<'a> {
        fn slot(&self, ins: InsRef<'_>) -> i32 {
            *self
                .frame
                .slots
                .get(&ins_addr(ins))
                .expect("operand has no home slot")
        }

        /// Load an integer-class operand into `reg` with its natural width.
        fn load_int(&mut self, reg: u8, ins: InsRef<'_>) {
            let disp = self.slot(ins);
            match ins.result_ty() {
                Ty::I32 => self.asm.mov_r32_slot(reg, disp),
                Ty::I64 | Ty::Ptr => self.asm.mov_r64_slot(reg, disp),
                ty => panic!("integer load of {ty} operand"),
            }
        }

        fn store_result32(&mut self, ins: InsRef<'_>, reg: u8) {
            let disp = self.slot(ins);
            self.asm.mov_slot_r32(disp, reg);
        }

        fn store_result64(&mut self, ins: InsRef<'_>, reg: u8) {
            let disp = self.slot(ins);
            self.asm.mov_slot_r64(disp, reg);
        }

        fn guard_jump(&mut self, jcc: Option<u8>, rec: &'a GuardRecord<'a>) {
            let idx = self.stubs.len();
            self.stubs.push(rec);
            match jcc {
                Some(cc) => self.asm.bytes(&[0x0f, cc]),
                None => self.asm.byte(0xe9),
            }
            let pos = self.asm.rel32_placeholder();
            self.stub_fixups.push((pos, idx));
        }

        fn label_jump(
            &mut self,
            jcc: Option<u8>,
            target: Option<InsRef<'a>>,
        ) -> Result<(), AsmError> {
            let Some(target) = target else {
                return Err(AsmError::UnknownBranch);
            };
            match jcc {
                Some(cc) => self.asm.bytes(&[0x0f, cc]),
                None => self.asm.byte(0xe9),
            }
            let pos = self.asm.rel32_placeholder();
            self.label_fixups.push((pos, ins_addr(target)));
            Ok(())
        }

        fn op1(&self, ins: InsRef<'a>) -> InsRef<'a> {
            match *ins.kind() {
                InsKind::Op1(a) => a,
                _ => panic!("expected unary payload"),
            }
        }

        fn op2(&self, ins: InsRef<'a>) -> (InsRef<'a>, InsRef<'a>) {
            match *ins.kind() {
                InsKind::Op2(a, b) => (a, b),
                _ => panic!("expected binary payload"),
            }
        }

        fn emit_ins(&mut self, ins: InsRef<'a>) -> Result<(), AsmError> {
            use Opcode::*;
            let op = ins.opcode();
            match op {
                Start | Param => {}
                Label => {
                    self.labels.insert(ins_addr(ins), self.asm.pos());
                }

                Immi => {
                    let v = ins.imm_i().expect("immi payload");
                    let disp = self.slot(ins);
                    self.asm.mov_slot_imm32(disp, v);
                }
                Immq => {
                    let v = ins.imm_q().expect("immq payload");
                    self.asm.mov_r64_imm(RAX, v as u64);
                    self.store_result64(ins, RAX);
                }
                Immf => {
                    let v = ins.imm_f().expect("immf payload");
                    let disp = self.slot(ins);
                    self.asm.mov_slot_imm32(disp, v.to_bits() as i32);
                }
                Immd => {
                    let v = ins.imm_d().expect("immd payload");
                    self.asm.mov_r64_imm(RAX, v.to_bits());
                    self.store_result64(ins, RAX);
                }

                Addi | Subi | Muli | Andi | Ori | Xori => {
                    let (a, b) = self.op2(ins);
                    self.load_int(RAX, a);
                    self.load_int(RCX, b);
                    match op {
                        Addi => self.asm.bytes(&[0x01, 0xc8]),
                        Subi => self.asm.bytes(&[0x29, 0xc8]),
                        Muli => self.asm.bytes(&[0x0f, 0xaf, 0xc1]),
                        Andi => self.asm.bytes(&[0x21, 0xc8]),
                        Ori => self.asm.bytes(&[0x09, 0xc8]),
                        Xori => self.asm.bytes(&[0x31, 0xc8]),
                        _ => unreachable!(),
                    }
                    self.store_result32(ins, RAX);
                }
                Divi | Modi => {
                    let (a, b) = self.op2(ins);
                    self.load_int(RAX, a);
                    self.load_int(RCX, b);
                    self.asm.byte(0x99); // cdq
                    self.asm.bytes(&[0xf7, 0xf9]); // idiv ecx
                    self.store_result32(ins, if op == Divi { RAX } else { RDX });
                }
                Lshi | Rshi | Rshui => {
                    let (a, b) = self.op2(ins);
                    self.load_int(RAX, a);
                    self.load_int(RCX, b);
                    match op {
                        Lshi => self.asm.bytes(&[0xd3, 0xe0]), // shl eax, cl
                        Rshi => self.asm.bytes(&[0xd3, 0xf8]), // sar eax, cl
                        Rshui => self.asm.bytes(&[0xd3, 0xe8]), // shr eax, cl
                        _ => unreachable!(),
                    }
                    self.store_result32(ins, RAX);
                }
                Noti | Negi => {
                    let a = self.op1(ins);
                    self.load_int(RAX, a);
                    self.asm
                        .bytes(&[0xf7, if op == Noti { 0xd0 } else { 0xd8 }]);
                    self.store_result32(ins, RAX);
                }
                Eqi | Lti | Gti | Lei | Gei | Ltui | Gtui | Leui | Geui => {
                    let (a, b) = self.op2(ins);
                    self.load_int(RAX, a);
                    self.load_int(RCX, b);
                    self.asm.bytes(&[0x39, 0xc8]); // cmp eax, ecx
                    self.asm.setcc_eax(int_cc(op));
                    self.store_result32(ins, RAX);
                }

                Addq | Subq | Andq | Orq | Xorq => {
                    let (a, b) = self.op2(ins);
                    self.load_int(RAX, a);
                    self.load_int(RCX, b);
                    self.asm.byte(0x48);
                    match op {
                        Addq => self.asm.bytes(&[0x01, 0xc8]),
                        Subq => self.asm.bytes(&[0x29, 0xc8]),
                        Andq => self.asm.bytes(&[0x21, 0xc8]),
                        Orq => self.asm.bytes(&[0x09, 0xc8]),
                        Xorq => self.asm.bytes(&[0x31, 0xc8]),
                        _ => unreachable!(),
                    }
                    self.store_result64(ins, RAX);
                }
                Negq => {
                    let a = self.op1(ins);
                    self.load_int(RAX, a);
                    self.asm.bytes(&[0x48, 0xf7, 0xd8]);
                    self.store_result64(ins, RAX);
                }
                Lshq | Rshq | Rshuq => {
                    let (a, b) = self.op2(ins);
                    self.load_int(RAX, a);
                    self.load_int(RCX, b);
                    self.asm.byte(0x48);
                    match op {
                        Lshq => self.asm.bytes(&[0xd3, 0xe0]),
                        Rshq => self.asm.bytes(&[0xd3, 0xf8]),
                        Rshuq => self.asm.bytes(&[0xd3, 0xe8]),
                        _ => unreachable!(),
                    }
                    self.store_result64(ins, RAX);
                }
                Eqq | Ltq | Gtq | Leq | Geq | Ltuq | Gtuq | Leuq | Geuq => {
                    let (a, b) = self.op2(ins);
                    self.load_int(RAX, a);
                    self.load_int(RCX, b);
                    self.asm.bytes(&[0x48, 0x39, 0xc8]); // cmp rax, rcx
                    self.asm.setcc_eax(int_cc(op));
                    self.store_result32(ins, RAX);
                }

                Addd | Subd | Muld | Divd | Addf | Subf | Mulf | Divf | Addf4 | Subf4
                | Mulf4 | Divf4 => {
                    let (a, b) = self.op2(ins);
                    let prefix = fp_prefix(ins.result_ty());
                    let sa = self.slot(a);
                    let sb = self.slot(b);
                    self.asm.sse_slot(prefix, 0x10, XMM0, sa);
                    self.asm.sse_slot(prefix, 0x10, XMM1, sb);
                    let alu = match op {
                        Addd | Addf | Addf4 => 0x58,
                        Subd | Subf | Subf4 => 0x5c,
                        Muld | Mulf | Mulf4 => 0x59,
                        Divd | Divf | Divf4 => 0x5e,
                        _ => unreachable!(),
                    };
                    self.asm.sse_reg(prefix, alu, XMM0, XMM1);
                    let disp = self.slot(ins);
                    self.asm.sse_slot(prefix, 0x11, XMM0, disp);
                }
                Negd => {
                    let a = self.op1(ins);
                    let sa = self.slot(a);
                    self.asm.mov_r64_slot(RAX, sa);
                    self.asm.mov_r64_imm(RCX, 0x8000_0000_0000_0000);
                    self.asm.bytes(&[0x48, 0x31, 0xc8]); // xor rax, rcx
                    self.store_result64(ins, RAX);
                }
                Negf => {
                    let a = self.op1(ins);
                    let sa = self.slot(a);
                    self.asm.mov_r32_slot(RAX, sa);
                    self.asm.byte(0x35); // xor eax, imm32
                    self.asm.imm32(i32::MIN);
                    self.store_result32(ins, RAX);
                }
                Eqd | Ltd | Gtd | Led | Ged | Eqf | Ltf | Gtf | Lef | Gef => {
                    let (a, b) = self.op2(ins);
                    let prefix = fp_prefix(a.result_ty());
                    let ucomis_prefix = match a.result_ty() {
                        Ty::F64 => Some(0x66),
                        _ => None,
                    };
                    let sa = self.slot(a);
                    let sb = self.slot(b);
                    self.asm.sse_slot(prefix, 0x10, XMM0, sa);
                    self.asm.sse_slot(prefix, 0x10, XMM1, sb);
                    match op {
                        // a > b and a >= b compare directly; the unordered
                        // case clears both answers.
                        Gtd | Gtf => {
                            self.asm.sse_reg(ucomis_prefix, 0x2e, XMM0, XMM1);
                            self.asm.setcc_eax(0x97); // seta
                        }
                        Ged | Gef => {
                            self.asm.sse_reg(ucomis_prefix, 0x2e, XMM0, XMM1);
                            self.asm.setcc_eax(0x93); // setae
                        }
                        // a < b and a <= b flip the comparison.
                        Ltd | Ltf => {
                            self.asm.sse_reg(ucomis_prefix, 0x2e, XMM1, XMM0);
                            self.asm.setcc_eax(0x97);
                        }
                        Led | Lef => {
                            self.asm.sse_reg(ucomis_prefix, 0x2e, XMM1, XMM0);
                            self.asm.setcc_eax(0x93);
                        }
                        // Equality must also reject the unordered case.
                        Eqd | Eqf => {
                            self.asm.sse_reg(ucomis_prefix, 0x2e, XMM0, XMM1);
                            self.asm.bytes(&[0x0f, 0x94, 0xc0]); // sete al
                            self.asm.bytes(&[0x0f, 0x9b, 0xc1]); // setnp cl
                            self.asm.bytes(&[0x20, 0xc8]); // and al, cl
                            self.asm.bytes(&[0x0f, 0xb6, 0xc0]); // movzx eax, al
                        }
                        _ => unreachable!(),
                    }
                    self.store_result32(ins, RAX);
                }

                F2f4 => {
                    let a = self.op1(ins);
                    let sa = self.slot(a);
                    self.asm.sse_slot(Some(0xf3), 0x10, XMM0, sa); // movss
                    self.asm.bytes(&[0x0f, 0xc6, 0xc0, 0x00]); // shufps xmm0, xmm0, 0
                    let disp = self.slot(ins);
                    self.asm.sse_slot(None, 0x11, XMM0, disp); // movups
                }
                F4x | F4y | F4z | F4w => {
                    let a = self.op1(ins);
                    let lane = match op {
                        F4x => 0,
                        F4y => 1,
                        F4z => 2,
                        F4w => 3,
                        _ => unreachable!(),
                    };
                    let sa = self.slot(a) + 4 * lane;
                    self.asm.sse_slot(Some(0xf3), 0x10, XMM0, sa);
                    let disp = self.slot(ins);
                    self.asm.sse_slot(Some(0xf3), 0x11, XMM0, disp);
                }

                I2q => {
                    let a = self.op1(ins);
                    self.load_int(RAX, a);
                    self.asm.bytes(&[0x48, 0x63, 0xc0]); // movsxd rax, eax
                    self.store_result64(ins, RAX);
                }
                Ui2uq => {
                    let a = self.op1(ins);
                    // A 32-bit load zero-extends into the full register.
                    self.load_int(RAX, a);
                    self.store_result64(ins, RAX);
                }
                Q2i => {
                    let a = self.op1(ins);
                    self.load_int(RAX, a);
                    self.store_result32(ins, RAX);
                }
                I2d | Ui2d | I2f | Ui2f => {
                    let a = self.op1(ins);
                    self.load_int(RAX, a);
                    let prefix = if matches!(op, I2d | Ui2d) { 0xf2 } else { 0xf3 };
                    self.asm.byte(prefix);
                    if matches!(op, Ui2d | Ui2f) {
                        // Convert from the zero-extended 64-bit value.
                        self.asm.byte(0x48);
                    }
                    self.asm.bytes(&[0x0f, 0x2a, 0xc0]); // cvtsi2s{d,s} xmm0, {e,r}ax
                    let disp = self.slot(ins);
                    let store_prefix = if matches!(op, I2d | Ui2d) { 0xf2 } else { 0xf3 };
                    self.asm.sse_slot(Some(store_prefix), 0x11, XMM0, disp);
                }
                D2i | F2i => {
                    let a = self.op1(ins);
                    let prefix = if op == D2i { 0xf2 } else { 0xf3 };
                    let sa = self.slot(a);
                    self.asm.sse_slot(Some(prefix), 0x10, XMM0, sa);
                    self.asm.byte(prefix);
                    self.asm.bytes(&[0x0f, 0x2c, 0xc0]); // cvtts{d,s}2si eax, xmm0
                    self.store_result32(ins, RAX);
                }
                F2d => {
                    let a = self.op1(ins);
                    let sa = self.slot(a);
                    self.asm.sse_slot(Some(0xf3), 0x10, XMM0, sa);
                    self.asm.bytes(&[0xf3, 0x0f, 0x5a, 0xc0]); // cvtss2sd
                    let disp = self.slot(ins);
                    self.asm.sse_slot(Some(0xf2), 0x11, XMM0, disp);
                }
                D2f => {
                    let a = self.op1(ins);
                    let sa = self.slot(a);
                    self.asm.sse_slot(Some(0xf2), 0x10, XMM0, sa);
                    self.asm.bytes(&[0xf2, 0x0f, 0x5a, 0xc0]); // cvtsd2ss
                    let disp = self.slot(ins);
                    self.asm.sse_slot(Some(0xf3), 0x11, XMM0, disp);
                }

                Ldi | Ldq | Ldf | Ldd | Ldf4 => {
                    let InsKind::Load { base, disp, .. } = *ins.kind() else {
                        unreachable!()
                    };
                    self.load_int(RAX, base);
                    match op {
                        Ldi => {
                            self.asm.byte(0x8b);
                            self.asm.rax_modrm(RAX, disp);
                            self.store_result32(ins, RAX);
                        }
                        Ldq => {
                            self.asm.bytes(&[0x48, 0x8b]);
                            self.asm.rax_modrm(RAX, disp);
                            self.store_result64(ins, RAX);
                        }
                        Ldf | Ldd | Ldf4 => {
                            let prefix = fp_prefix(ins.result_ty());
                            self.asm.sse_rax(prefix, 0x10, XMM0, disp);
                            let dst = self.slot(ins);
                            self.asm.sse_slot(prefix, 0x11, XMM0, dst);
                        }
                        _ => unreachable!(),
                    }
                }
                Sti | Stq | Stf | Std | Stf4 => {
                    let InsKind::Store {
                        val, base, disp, ..
                    } = *ins.kind()
                    else {
                        unreachable!()
                    };
                    self.load_int(RAX, base);
                    match op {
                        Sti => {
                            let sv = self.slot(val);
                            self.asm.mov_r32_slot(RCX, sv);
                            self.asm.byte(0x89);
                            self.asm.rax_modrm(RCX, disp);
                        }
                        Stq => {
                            let sv = self.slot(val);
                            self.asm.mov_r64_slot(RCX, sv);
                            self.asm.bytes(&[0x48, 0x89]);
                            self.asm.rax_modrm(RCX, disp);
                        }
                        Stf | Std | Stf4 => {
                            let prefix = fp_prefix(val.result_ty());
                            let sv = self.slot(val);
                            self.asm.sse_slot(prefix, 0x10, XMM0, sv);
                            self.asm.sse_rax(prefix, 0x11, XMM0, disp);
                        }
                        _ => unreachable!(),
                    }
                }

                Cmovi => {
                    let InsKind::Op3(c, t, f) = *ins.kind() else {
                        unreachable!()
                    };
                    self.load_int(RAX, t);
                    self.load_int(RCX, f);
                    self.load_int(RDX, c);
                    self.asm.bytes(&[0x85, 0xd2]); // test edx, edx
                    self.asm.bytes(&[0x0f, 0x44, 0xc1]); // cmovz eax, ecx
                    self.store_result32(ins, RAX);
                }
                Cmovq => {
                    let InsKind::Op3(c, t, f) = *ins.kind() else {
                        unreachable!()
                    };
                    self.load_int(RAX, t);
                    self.load_int(RCX, f);
                    self.load_int(RDX, c);
                    self.asm.bytes(&[0x85, 0xd2]);
                    self.asm.bytes(&[0x48, 0x0f, 0x44, 0xc1]);
                    self.store_result64(ins, RAX);
                }
                Cmovf | Cmovd => {
                    let InsKind::Op3(c, t, f) = *ins.kind() else {
                        unreachable!()
                    };
                    let prefix = fp_prefix(ins.result_ty());
                    let st = self.slot(t);
                    let sf = self.slot(f);
                    self.asm.sse_slot(prefix, 0x10, XMM0, st);
                    self.asm.sse_slot(prefix, 0x10, XMM1, sf);
                    self.load_int(RAX, c);
                    self.asm.bytes(&[0x85, 0xc0]); // test eax, eax
                    self.asm.bytes(&[0x75, 0x03]); // jne past the move
                    self.asm.bytes(&[0x0f, 0x28, 0xc1]); // movaps xmm0, xmm1
                    let disp = self.slot(ins);
                    self.asm.sse_slot(prefix, 0x11, XMM0, disp);
                }

                J | Jt | Jf => {
                    let InsKind::Branch { cond, target } = ins.kind() else {
                        unreachable!()
                    };
                    match op {
                        J => self.label_jump(None, target.get())?,
                        Jt | Jf => {
                            let c = cond.expect("conditional branch without condition");
                            self.load_int(RAX, c);
                            self.asm.bytes(&[0x85, 0xc0]);
                            let cc = if op == Jt { 0x85 } else { 0x84 };
                            self.label_jump(Some(cc), target.get())?;
                        }
                        _ => unreachable!(),
                    }
                }
                X | Xt | Xf => {
                    let InsKind::Guard { cond, rec } = *ins.kind() else {
                        unreachable!()
                    };
                    match op {
                        X => self.guard_jump(None, rec),
                        Xt | Xf => {
                            let c = cond.expect("conditional guard without condition");
                            self.load_int(RAX, c);
                            self.asm.bytes(&[0x85, 0xc0]);
                            let cc = if op == Xt { 0x85 } else { 0x84 };
                            self.guard_jump(Some(cc), rec);
                        }
                        _ => unreachable!(),
                    }
                }
                Addxovi | Subxovi | Mulxovi => {
                    let InsKind::GuardOv { a, b, rec } = *ins.kind() else {
                        unreachable!()
                    };
                    self.load_int(RAX, a);
                    self.load_int(RCX, b);
                    self.ov_alu(op);
                    self.store_result32(ins, RAX);
                    self.guard_jump(Some(0x80), rec); // jo
                }
                Addjovi | Subjovi | Muljovi => {
                    let InsKind::BranchOv { a, b, target } = ins.kind() else {
                        unreachable!()
                    };
                    self.load_int(RAX, *a);
                    self.load_int(RCX, *b);
                    self.ov_alu(op);
                    self.store_result32(ins, RAX);
                    self.label_jump(Some(0x80), target.get())?;
                }

                Calli | Callq | Callf | Calld | Callv => self.emit_call(ins)?,

                Reti | Retq | Retf | Retd | Retf4 => {
                    let InsKind::Ret(v) = *ins.kind() else {
                        unreachable!()
                    };
                    match op {
                        Reti => self.load_int(RAX, v),
                        Retq => self.load_int(RAX, v),
                        Retf | Retd | Retf4 => {
                            let prefix = fp_prefix(v.result_ty());
                            let sv = self.slot(v);
                            self.asm.sse_slot(prefix, 0x10, XMM0, sv);
                        }
                        _ => unreachable!(),
                    }
                    self.asm.byte(0xc9); // leave
                    self.asm.byte(0xc3); // ret
                }

                Allocp => {
                    let area = *self
                        .frame
                        .areas
                        .get(&ins_addr(ins))
                        .expect("allocp without a reserved area");
                    self.asm.bytes(&[0x48, 0x8d]); // lea rax, [rbp + disp]
                    self.asm.rbp_modrm(RAX, area);
                    self.store_result64(ins, RAX);
                }
            }
            Ok(())
        }

        fn ov_alu(&mut self, op: Opcode) {
            use Opcode::*;
            match op {
                Addxovi | Addjovi => self.asm.bytes(&[0x01, 0xc8]),
                Subxovi | Subjovi => self.asm.bytes(&[0x29, 0xc8]),
                Mulxovi | Muljovi => self.asm.bytes(&[0x0f, 0xaf, 0xc1]),
                _ => unreachable!(),
            }
        }

        fn emit_call(&mut self, ins: InsRef<'a>) -> Result<(), AsmError> {
            let InsKind::Call { info, args } = *ins.kind() else {
                unreachable!()
            };
            let mut next_int = 0usize;
            let mut next_fp = 0usize;
            // Stored reversed; the ABI wants lexical order.
            for arg in args.iter().rev() {
                match arg.result_ty() {
                    Ty::I32 | Ty::I64 | Ty::Ptr => {
                        if next_int == INT_ARG_REGS.len() {
                            return Err(AsmError::TooManyArgs);
                        }
                        let reg = INT_ARG_REGS[next_int];
                        next_int += 1;
                        let disp = self.slot(arg);
                        self.asm.mov_r64_slot(reg, disp);
                    }
                    Ty::F32 | Ty::F64 | Ty::F4 => {
                        if next_fp == MAX_FP_ARGS {
                            return Err(AsmError::TooManyArgs);
                        }
                        let xmm = next_fp as u8;
                        next_fp += 1;
                        let prefix = fp_prefix(arg.result_ty());
                        let disp = self.slot(arg);
                        self.asm.sse_slot(prefix, 0x10, xmm, disp);
                    }
                    Ty::Void => panic!("void call argument"),
                }
            }
            self.asm.mov_r64_imm(RAX, info.addr as u64);
            self.asm.bytes(&[0xff, 0xd0]); // call rax
            match ins.opcode() {
                Opcode::Calli => self.store_result32(ins, RAX),
                Opcode::Callq => self.store_result64(ins, RAX),
                Opcode::Callf => {
                    let disp = self.slot(ins);
                    self.asm.sse_slot(Some(0xf3), 0x11, XMM0, disp);
                }
                Opcode::Calld => {
                    let disp = self.slot(ins);
                    self.asm.sse_slot(Some(0xf2), 0x11, XMM0, disp);
                }
                Opcode::Callv => {}
                _ => unreachable!(),
            }
            Ok(())
        }
    }

    /// Mandatory prefix for the scalar/packed move and ALU forms of a type.
    fn fp_prefix(ty: Ty) -> Option<u8> {
        match ty {
            Ty::F32 => Some(0xf3),
            Ty::F64 => Some(0xf2),
            Ty::F4 => None,
            _ => panic!("not a float type: {ty}"),
        }
    }

    /// setcc opcode byte for the integer comparisons.
    fn int_cc(op: Opcode) -> u8 {
        use Opcode::*;
        match op {
            Eqi | Eqq => 0x94,  // sete
            Lti | Ltq => 0x9c,  // setl
            Gti | Gtq => 0x9f,  // setg
            Lei | Leq => 0x9e,  // setle
            Gei | Geq => 0x9d,  // setge
            Ltui | Ltuq => 0x92, // setb
            Gtui | Gtuq => 0x97, // seta
            Leui | Leuq => 0x96, // setbe
            Geui | Geuq => 0x93, // setae
            _ => panic!("not a comparison: {}", op.name()),
        }
    }
}
