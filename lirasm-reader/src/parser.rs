//! The fragment assembler.
//!
//! Reads statements for one fragment and feeds them through the writer
//! pipeline. The protocol per fragment: emit `start` and the reserved
//! `param` pseudo-instructions, parse statements until `.end` (or EOF for
//! the implicit fragment), resolve the forward-jump worklist against the
//! jump-label map, append a trailing unconditional exit guard, and classify
//! the accumulated return mask.
//!
//! Two label namespaces exist side by side: `name:` bindings are branch
//! targets, scoped to the fragment; `name =` bindings name values and are
//! what `.patch` resolves guard labels against. Duplicates in either are
//! fatal.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use lirasm_lir::{
    build_pipeline, Abi, AccSet, Arena, CallInfo, Fragment, FragmentMap, GuardRecord, InsRef,
    LirBuffer, LirWriter, Opcode, PipelineOpts, RetClass, RetMask, Shape, SideExit, Ty,
    TypeError, MAX_CALL_ARGS, NUM_SAVED_REGS,
};

use crate::builtins::BuiltinTable;
use crate::error::{Location, ParseError, ParseResult};
use crate::lexer::{TokKind, Token, Tokenizer};

/// Assemble one fragment from the token stream.
///
/// With `explicit` set the fragment body must be terminated by `.end`;
/// otherwise it runs to EOF (the implicit `main` fragment). The returned
/// fragment has no entry address yet; that is the native back-end's job.
pub fn assemble_fragment<'a>(
    arena: &'a Arena,
    toks: &mut Tokenizer,
    name: &str,
    frags: &FragmentMap<'a>,
    builtins: &BuiltinTable<'a>,
    opts: PipelineOpts,
    explicit: bool,
) -> ParseResult<Fragment<'a>> {
    let buf = arena.alloc(LirBuffer::new(arena));
    let writer = build_pipeline(buf, opts);
    let mut asm = FragmentAssembler {
        arena,
        frags,
        builtins,
        buf,
        w: writer,
        labels: FxHashMap::default(),
        jump_labels: FxHashMap::default(),
        fwd_jumps: Vec::new(),
        ret_mask: RetMask::new(),
        loc: Location::default(),
    };
    asm.run(toks, explicit)?;
    let ret_class = asm.ret_mask.classify(name);
    log::debug!(
        "assembled fragment '{}': {} nodes, return class {:?}",
        name,
        buf.len(),
        ret_class
    );
    Ok(Fragment {
        name: name.to_string(),
        buffer: buf,
        labels: asm.labels,
        ret_class,
        entry: core::cell::Cell::new(0),
    })
}

struct FragmentAssembler<'a, 'b> {
    arena: &'a Arena,
    frags: &'b FragmentMap<'a>,
    builtins: &'b BuiltinTable<'a>,
    buf: &'a LirBuffer<'a>,
    w: Box<dyn LirWriter<'a> + 'a>,
    labels: FxHashMap<String, InsRef<'a>>,
    jump_labels: FxHashMap<String, InsRef<'a>>,
    fwd_jumps: Vec<(String, InsRef<'a>, Location)>,
    ret_mask: RetMask,
    loc: Location,
}

impl<'a> FragmentAssembler<'a, '_> {
    fn terr(&self, e: TypeError) -> ParseError {
        ParseError {
            location: self.loc,
            message: e.0,
        }
    }

    fn run(&mut self, toks: &mut Tokenizer, explicit: bool) -> ParseResult<()> {
        self.w.ins_start().map_err(|e| self.terr(e))?;
        for i in 0..NUM_SAVED_REGS {
            self.w.ins_param(i).map_err(|e| self.terr(e))?;
        }
        loop {
            let tok = toks.get()?;
            match tok.kind {
                TokKind::Newline => continue,
                TokKind::Eof => {
                    if explicit {
                        return err!(tok.loc(), "missing .end");
                    }
                    break;
                }
                TokKind::Name => {
                    if tok.text == ".end" {
                        if !explicit {
                            return err!(tok.loc(), ".end without .begin");
                        }
                        break;
                    }
                    if tok.text.starts_with('.') {
                        return err!(tok.loc(), "directive '{}' inside fragment body", tok.text);
                    }
                    self.statement(toks, tok)?;
                }
                _ => return err!(tok.loc(), "expected statement, got '{}'", tok.text),
            }
        }
        self.resolve_jumps()?;
        // Trailing unconditional exit so fall-through leaves the fragment
        // through a side exit rather than running off the end.
        let rec = self.new_guard();
        self.w
            .ins_guard(Opcode::X, None, rec)
            .map_err(|e| self.terr(e))?;
        Ok(())
    }

    fn statement(&mut self, toks: &mut Tokenizer, first: Token) -> ParseResult<()> {
        let mut tok_text = first.text.to_string();
        let mut tok_loc = first.loc();
        self.loc = tok_loc;
        self.buf.set_line(first.line);

        // Leading `label:`.
        let p = toks.peek()?;
        if p.kind == TokKind::Punct && p.text == ":" {
            toks.get()?;
            self.bind_jump_label(&tok_text, tok_loc)?;
            let next = toks.get()?;
            match next.kind {
                TokKind::Newline | TokKind::Eof => return Ok(()),
                TokKind::Name => {
                    tok_text = next.text.to_string();
                    tok_loc = next.loc();
                }
                _ => return err!(next.loc(), "expected opcode after label"),
            }
        }

        // Leading `name =`.
        let mut lhs: Option<String> = None;
        let p = toks.peek()?;
        if p.kind == TokKind::Punct && p.text == "=" {
            toks.get()?;
            lhs = Some(tok_text);
            let next = toks.get()?;
            if next.kind != TokKind::Name {
                return err!(next.loc(), "expected opcode after '='");
            }
            tok_text = next.text.to_string();
            tok_loc = next.loc();
        }

        let Some(op) = Opcode::from_name(&tok_text) else {
            return err!(tok_loc, "unknown opcode '{}'", tok_text);
        };
        if op.shape() == Shape::Pseudo {
            return err!(tok_loc, "'{}' cannot be written directly", tok_text);
        }
        let ins = self.emit(toks, op)?;
        if let (Some(name), Some(ins)) = (lhs, ins) {
            self.bind_name(name, ins)?;
        }
        let end = toks.get()?;
        match end.kind {
            TokKind::Newline | TokKind::Eof => Ok(()),
            _ => err!(end.loc(), "expected end of statement, got '{}'", end.text),
        }
    }

    fn emit(&mut self, toks: &mut Tokenizer, op: Opcode) -> ParseResult<Option<InsRef<'a>>> {
        match op.shape() {
            Shape::Un => {
                let a = self.operand(toks)?;
                self.w.ins1(op, a).map(Some).map_err(|e| self.terr(e))
            }
            Shape::Bin => {
                let a = self.operand(toks)?;
                let b = self.operand(toks)?;
                self.w.ins2(op, a, b).map(Some).map_err(|e| self.terr(e))
            }
            Shape::Ter => {
                let a = self.operand(toks)?;
                let b = self.operand(toks)?;
                let c = self.operand(toks)?;
                self.w
                    .ins3(op, a, b, c)
                    .map(Some)
                    .map_err(|e| self.terr(e))
            }
            Shape::Imm => {
                let tok = toks.get()?;
                if tok.kind != TokKind::Number && tok.kind != TokKind::Name {
                    return err!(tok.loc(), "expected literal, got '{}'", tok.text);
                }
                let r = match op {
                    Opcode::Immi => {
                        let v = parse_i32(tok)?;
                        self.w.ins_imm_i(v)
                    }
                    Opcode::Immq => {
                        let v = parse_int(tok)?;
                        self.w.ins_imm_q(v)
                    }
                    Opcode::Immf => {
                        let v = parse_f32(tok)?;
                        self.w.ins_imm_f(v)
                    }
                    Opcode::Immd => {
                        let v = parse_f64(tok)?;
                        self.w.ins_imm_d(v)
                    }
                    _ => unreachable!(),
                };
                r.map(Some).map_err(|e| self.terr(e))
            }
            Shape::Load => {
                let base = self.operand(toks)?;
                let disp = parse_i32(toks.get()?)?;
                self.w
                    .ins_load(op, base, disp, AccSet::ALL)
                    .map(Some)
                    .map_err(|e| self.terr(e))
            }
            Shape::Store => {
                let val = self.operand(toks)?;
                let base = self.operand(toks)?;
                let disp = parse_i32(toks.get()?)?;
                self.w
                    .ins_store(op, val, base, disp, AccSet::ALL)
                    .map(Some)
                    .map_err(|e| self.terr(e))
            }
            Shape::Alloc => {
                let tok = toks.get()?;
                let size = parse_int(tok)?;
                if size <= 0 || size > u32::MAX as i64 {
                    return err!(tok.loc(), "bad allocation size '{}'", tok.text);
                }
                self.w
                    .ins_alloc(size as u32)
                    .map(Some)
                    .map_err(|e| self.terr(e))
            }
            Shape::Branch => {
                let cond = if op.has_condition() {
                    Some(self.operand(toks)?)
                } else {
                    None
                };
                let target_tok = toks.eat(TokKind::Name, None)?;
                let target = target_tok.text.to_string();
                let ins = self.w.ins_branch(op, cond).map_err(|e| self.terr(e))?;
                if let Some(ins) = ins {
                    self.fwd_jumps.push((target, ins, target_tok.loc()));
                }
                Ok(ins)
            }
            Shape::BranchOv => {
                let a = self.operand(toks)?;
                let b = self.operand(toks)?;
                let target_tok = toks.eat(TokKind::Name, None)?;
                let ins = self
                    .w
                    .ins_branch_ov(op, a, b)
                    .map_err(|e| self.terr(e))?;
                self.fwd_jumps
                    .push((target_tok.text.to_string(), ins, target_tok.loc()));
                Ok(Some(ins))
            }
            Shape::Guard => {
                let cond = if op.has_condition() {
                    Some(self.operand(toks)?)
                } else {
                    None
                };
                let rec = self.new_guard();
                self.ret_mask.insert(RetClass::Guard);
                self.w.ins_guard(op, cond, rec).map_err(|e| self.terr(e))
            }
            Shape::GuardOv => {
                let a = self.operand(toks)?;
                let b = self.operand(toks)?;
                let rec = self.new_guard();
                self.ret_mask.insert(RetClass::Guard);
                self.w
                    .ins_guard_ov(op, a, b, rec)
                    .map(Some)
                    .map_err(|e| self.terr(e))
            }
            Shape::Call => self.call(toks, op),
            Shape::Ret => {
                let v = self.operand(toks)?;
                self.ret_mask.insert(RetClass::of_ret(op));
                self.w.ins_ret(op, v).map(Some).map_err(|e| self.terr(e))
            }
            Shape::Pseudo => unreachable!(),
        }
    }

    fn call(&mut self, toks: &mut Tokenizer, op: Opcode) -> ParseResult<Option<InsRef<'a>>> {
        let fname_tok = toks.eat(TokKind::Name, None)?;
        let fname = fname_tok.text.to_string();
        let fname_loc = fname_tok.loc();
        let abi_tok = toks.eat(TokKind::Name, None)?;
        let Some(abi) = Abi::from_name(abi_tok.text) else {
            return err!(abi_tok.loc(), "unknown calling convention '{}'", abi_tok.text);
        };
        let mut args: Vec<InsRef<'a>> = Vec::new();
        loop {
            let p = toks.peek()?;
            match p.kind {
                TokKind::Name => args.push(self.operand(toks)?),
                TokKind::Newline | TokKind::Eof => break,
                _ => return err!(p.loc(), "expected argument name, got '{}'", p.text),
            }
        }
        if args.len() > MAX_CALL_ARGS {
            return err!(
                fname_loc,
                "too many arguments to '{}' ({} > {})",
                fname,
                args.len(),
                MAX_CALL_ARGS
            );
        }
        let info: &'a CallInfo = if let Some(info) = self.builtins.lookup(&fname) {
            if info.abi != abi {
                return err!(
                    abi_tok.loc(),
                    "'{}' is declared {}, called {}",
                    fname,
                    info.abi.name(),
                    abi.name()
                );
            }
            info
        } else if let Some(frag) = self.frags.get(&fname) {
            let entry = frag.entry.get();
            if entry == 0 {
                return err!(fname_loc, "fragment '{}' has not been compiled", fname);
            }
            let mut tys: SmallVec<[Ty; MAX_CALL_ARGS]> = SmallVec::new();
            for a in &args {
                let t = a.result_ty();
                if t == Ty::Void {
                    return err!(fname_loc, "void argument in call to '{}'", fname);
                }
                tys.push(t);
            }
            self.arena.alloc(CallInfo {
                name: fname.clone(),
                addr: entry,
                abi,
                args: tys,
                ret: op.result_ty(),
                is_pure: false,
                store_acc: AccSet::ALL,
            })
        } else {
            return err!(fname_loc, "unknown function '{}'", fname);
        };
        // Arguments go into the node in reverse lexical order.
        let rev: Vec<InsRef<'a>> = args.iter().rev().copied().collect();
        self.w
            .ins_call(op, info, &rev)
            .map(Some)
            .map_err(|e| self.terr(e))
    }

    fn operand(&mut self, toks: &mut Tokenizer) -> ParseResult<InsRef<'a>> {
        let tok = toks.get()?;
        if tok.kind != TokKind::Name {
            return err!(tok.loc(), "expected operand name, got '{}'", tok.text);
        }
        match self.labels.get(tok.text) {
            Some(&ins) => Ok(ins),
            None => err!(tok.loc(), "unknown name '{}'", tok.text),
        }
    }

    fn bind_jump_label(&mut self, name: &str, loc: Location) -> ParseResult<()> {
        if self.jump_labels.contains_key(name) {
            return err!(loc, "duplicate label '{}'", name);
        }
        let ins = self.w.ins_label().map_err(|e| self.terr(e))?;
        self.jump_labels.insert(name.to_string(), ins);
        Ok(())
    }

    fn bind_name(&mut self, name: String, ins: InsRef<'a>) -> ParseResult<()> {
        if self.labels.contains_key(&name) {
            return err!(self.loc, "duplicate name '{}'", name);
        }
        self.labels.insert(name, ins);
        Ok(())
    }

    fn new_guard(&self) -> &'a GuardRecord<'a> {
        let exit = self.arena.alloc(SideExit::new(self.buf.line()));
        self.arena.alloc(GuardRecord { exit })
    }

    fn resolve_jumps(&mut self) -> ParseResult<()> {
        for (name, ins, loc) in core::mem::take(&mut self.fwd_jumps) {
            match self.jump_labels.get(&name) {
                Some(&label) => ins.set_branch_target(label),
                None => return err!(loc, "no label '{}'", name),
            }
        }
        Ok(())
    }
}

fn parse_int(tok: Token) -> ParseResult<i64> {
    let t = tok.text;
    let parsed: Option<i64> = if let Some(h) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        u64::from_str_radix(h, 16).ok().map(|v| v as i64)
    } else if let Some(h) = t.strip_prefix("-0x").or_else(|| t.strip_prefix("-0X")) {
        u64::from_str_radix(h, 16).ok().map(|v| (v as i64).wrapping_neg())
    } else {
        t.parse::<i64>().ok()
    };
    match parsed {
        Some(v) => Ok(v),
        None => err!(tok.loc(), "bad integer literal '{}'", t),
    }
}

fn parse_i32(tok: Token) -> ParseResult<i32> {
    let v = parse_int(tok)?;
    if v < i32::MIN as i64 || v > u32::MAX as i64 {
        return err!(tok.loc(), "integer literal '{}' out of range", tok.text);
    }
    Ok(v as i32)
}

fn parse_f64(tok: Token) -> ParseResult<f64> {
    match tok.text.parse::<f64>() {
        Ok(v) => Ok(v),
        Err(_) => err!(tok.loc(), "bad float literal '{}'", tok.text),
    }
}

fn parse_f32(tok: Token) -> ParseResult<f32> {
    match tok.text.parse::<f32>() {
        Ok(v) => Ok(v),
        Err(_) => err!(tok.loc(), "bad float literal '{}'", tok.text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lirasm_lir::write::dump_buffer;
    use lirasm_lir::InsPtr;

    fn asm<'a>(
        arena: &'a Arena,
        src: &str,
        optimize: bool,
    ) -> ParseResult<Fragment<'a>> {
        let mut toks = Tokenizer::new(src);
        let frags = FragmentMap::default();
        let builtins = BuiltinTable::new(arena);
        assemble_fragment(
            arena,
            &mut toks,
            "main",
            &frags,
            &builtins,
            PipelineOpts {
                optimize,
                ..Default::default()
            },
            false,
        )
    }

    fn ops(frag: &Fragment) -> Vec<Opcode> {
        frag.buffer
            .forward_order()
            .iter()
            .map(|i| i.opcode())
            .filter(|o| !matches!(o, Opcode::Start | Opcode::Param))
            .collect()
    }

    #[test]
    fn integer_add_program() {
        let arena = Arena::new();
        let frag = asm(&arena, "a = immi 2; b = immi 3; r = addi a b; reti r", false).unwrap();
        assert_eq!(
            ops(&frag),
            vec![
                Opcode::Immi,
                Opcode::Immi,
                Opcode::Addi,
                Opcode::Reti,
                Opcode::X
            ]
        );
        assert_eq!(frag.ret_class, RetClass::Int);
    }

    #[test]
    fn cse_is_idempotent_at_the_source_level() {
        let arena = Arena::new();
        let frag = asm(
            &arena,
            "a = immi 2; b = immi 3; y = addi a b; z = addi a b; reti y",
            true,
        )
        .unwrap();
        let y = frag.labels["y"];
        let z = frag.labels["z"];
        assert_eq!(InsPtr(y), InsPtr(z));
        assert_eq!(
            ops(&frag).iter().filter(|&&o| o == Opcode::Addi).count(),
            1
        );
    }

    #[test]
    fn store_suppresses_load_merging() {
        let arena = Arena::new();
        let frag = asm(
            &arena,
            "p = allocp 8; v = immi 1\n\
             l1 = ldi p 0; sti v p 0; l2 = ldi p 0; reti l2",
            true,
        )
        .unwrap();
        assert_ne!(InsPtr(frag.labels["l1"]), InsPtr(frag.labels["l2"]));
    }

    #[test]
    fn loads_merge_when_nothing_intervenes() {
        let arena = Arena::new();
        let frag = asm(
            &arena,
            "p = allocp 8; l1 = ldi p 0; l2 = ldi p 0; reti l2",
            true,
        )
        .unwrap();
        assert_eq!(InsPtr(frag.labels["l1"]), InsPtr(frag.labels["l2"]));
    }

    #[test]
    fn constant_folding_through_the_pipeline() {
        let arena = Arena::new();
        let frag = asm(&arena, "a = immi 3; b = immi 4; r = addi a b; reti r", true).unwrap();
        assert_eq!(frag.labels["r"].imm_i(), Some(7));
        // No addi survives.
        assert!(!ops(&frag).contains(&Opcode::Addi));
    }

    #[test]
    fn duplicate_labels_and_names_are_fatal() {
        let arena = Arena::new();
        assert!(asm(&arena, "l: a = immi 1\nl: reti a", false)
            .unwrap_err()
            .message
            .contains("duplicate label"));
        let arena = Arena::new();
        assert!(asm(&arena, "a = immi 1\na = immi 2", false)
            .unwrap_err()
            .message
            .contains("duplicate name"));
    }

    #[test]
    fn jumps_resolve_or_fail() {
        let arena = Arena::new();
        let frag = asm(
            &arena,
            "a = immi 0; c = eqi a a; jt c L; reti a; L: one = immi 1; reti one",
            false,
        )
        .unwrap();
        for ins in frag.buffer.forward_order() {
            if matches!(ins.opcode(), Opcode::J | Opcode::Jt | Opcode::Jf) {
                assert!(ins.branch_target().is_some());
            }
        }

        let arena = Arena::new();
        assert!(asm(&arena, "a = immi 0; jt a nowhere; reti a", false)
            .unwrap_err()
            .message
            .contains("no label"));

        // Unreferenced labels are allowed.
        let arena = Arena::new();
        assert!(asm(&arena, "unused: a = immi 0; reti a", false).is_ok());
    }

    #[test]
    fn guard_labels_are_visible_for_patching() {
        let arena = Arena::new();
        let frag = asm(
            &arena,
            "a = immi 1; g = xt a; r = immi 2; reti r",
            false,
        )
        .unwrap();
        let guard = frag.labels["g"];
        assert!(guard.guard_record().is_some());
        // Guard seen before the ret: last-written class wins.
        assert_eq!(frag.ret_class, RetClass::Int);
    }

    #[test]
    fn guard_only_fragment_classifies_as_guard() {
        let arena = Arena::new();
        let frag = asm(&arena, "a = immi 1; xt a", false).unwrap();
        assert_eq!(frag.ret_class, RetClass::Guard);
    }

    #[test]
    fn call_errors() {
        let arena = Arena::new();
        assert!(asm(&arena, "r = calli nosuchfn cdecl; reti r", false)
            .unwrap_err()
            .message
            .contains("unknown function"));

        let arena = Arena::new();
        assert!(asm(&arena, "d = immd 1.0; r = calld sin fastcall d; retd r", false)
            .unwrap_err()
            .message
            .contains("declared cdecl"));

        let arena = Arena::new();
        assert!(asm(
            &arena,
            "d = immd 1.0; r = calld sin cdecl d d; retd r",
            false
        )
        .unwrap_err()
        .message
        .contains("takes 1 arguments"));

        let arena = Arena::new();
        assert!(
            asm(&arena, "d = immd 1.0; r = calld sin cdecl d; retd r", false).is_ok()
        );
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        let arena = Arena::new();
        assert!(asm(&arena, "r = frobnicate 1 2", false)
            .unwrap_err()
            .message
            .contains("unknown opcode"));
    }

    #[test]
    fn literals() {
        let arena = Arena::new();
        let frag = asm(
            &arena,
            "a = immi 0x10; b = immi -5; q = immq 0xffffffffffffffff\n\
             f = immf .5; d = immd 1e3; reti a",
            false,
        )
        .unwrap();
        assert_eq!(frag.labels["a"].imm_i(), Some(16));
        assert_eq!(frag.labels["b"].imm_i(), Some(-5));
        assert_eq!(frag.labels["q"].imm_q(), Some(-1));
        assert_eq!(frag.labels["f"].imm_f(), Some(0.5));
        assert_eq!(frag.labels["d"].imm_d(), Some(1000.0));
    }

    #[test]
    fn dump_round_trips() {
        let arena = Arena::new();
        let src = "p = allocp 16; a = immi 2; b = immi 3; r = addi a b\n\
                   sti r p 0; l = ldi p 0; c = eqi r l; jt c done; reti r\n\
                   done: one = immi 1; reti one";
        let frag = asm(&arena, src, false).unwrap();
        let dump = dump_buffer(frag.buffer);
        let cleaned: String = dump
            .lines()
            .filter(|l| *l != "start" && !l.contains("= param "))
            .map(|l| format!("{l}\n"))
            .collect();
        let frag2 = asm(&arena, &cleaned, false).unwrap();
        let o1 = ops(&frag);
        let o2 = ops(&frag2);
        // The reparse appends its own trailing exit after the dumped one.
        assert_eq!(&o2[..o2.len() - 1], &o1[..]);
    }

    #[test]
    fn float4_statements_parse() {
        let arena = Arena::new();
        let frag = asm(
            &arena,
            "p = allocp 16; f = immf 2.5; v = f2f4 f\n\
             stf4 v p 0; w = ldf4 p 0; retf4 w",
            false,
        )
        .unwrap();
        assert_eq!(frag.ret_class, RetClass::Float4);
        assert!(ops(&frag).contains(&Opcode::Stf4));
    }

    #[test]
    fn type_errors_carry_the_line() {
        let arena = Arena::new();
        let err = asm(&arena, "a = immi 1\nb = immd 2.0\nr = addi a b\nreti r", false)
            .unwrap_err();
        assert_eq!(err.location.line_number, 3);
        assert!(err.message.contains("type mismatch"));
    }
}
