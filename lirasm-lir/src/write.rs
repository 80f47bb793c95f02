//! Textual formatting of instruction nodes.
//!
//! The formats here are the same ones the parser accepts, so a dumped
//! instruction can be fed back through the front-end. Value nodes are named
//! `t<id>` and labels `L<id>`; ids are buffer-unique.

use core::fmt::Write;

use crate::ir::{Ins, InsKind, Opcode, Ty};

/// The dump name of a node.
pub fn ins_name(ins: &Ins) -> String {
    if ins.opcode() == Opcode::Label {
        format!("L{}", ins.id())
    } else {
        format!("t{}", ins.id())
    }
}

/// Render one instruction in its parseable textual form.
pub fn format_ins(ins: &Ins) -> String {
    let mut s = String::new();
    if ins.result_ty() != Ty::Void {
        write!(s, "{} = ", ins_name(ins)).unwrap();
    }
    let op = ins.opcode().name();
    match ins.kind() {
        InsKind::Nullary => {
            if ins.opcode() == Opcode::Label {
                s.clear();
                write!(s, "{}:", ins_name(ins)).unwrap();
            } else {
                s.push_str(op);
            }
        }
        InsKind::Param(i) => write!(s, "param {i}").unwrap(),
        InsKind::ImmI(v) => write!(s, "immi {v}").unwrap(),
        InsKind::ImmQ(v) => write!(s, "immq {v}").unwrap(),
        InsKind::ImmF(v) => write!(s, "immf {v:?}").unwrap(),
        InsKind::ImmD(v) => write!(s, "immd {v:?}").unwrap(),
        InsKind::Op1(a) => write!(s, "{op} {}", ins_name(a)).unwrap(),
        InsKind::Op2(a, b) => write!(s, "{op} {} {}", ins_name(a), ins_name(b)).unwrap(),
        InsKind::Op3(a, b, c) => {
            write!(s, "{op} {} {} {}", ins_name(a), ins_name(b), ins_name(c)).unwrap()
        }
        InsKind::Load { base, disp, .. } => {
            write!(s, "{op} {} {disp}", ins_name(base)).unwrap()
        }
        InsKind::Store {
            val, base, disp, ..
        } => write!(s, "{op} {} {} {disp}", ins_name(val), ins_name(base)).unwrap(),
        InsKind::Call { info, args } => {
            write!(s, "{op} {} {}", info.name, info.abi.name()).unwrap();
            // Stored reversed; print lexically.
            for arg in args.iter().rev() {
                write!(s, " {}", ins_name(arg)).unwrap();
            }
        }
        InsKind::Branch { cond, target } => {
            s.push_str(op);
            if let Some(c) = cond {
                write!(s, " {}", ins_name(c)).unwrap();
            }
            match target.get() {
                Some(t) => write!(s, " {}", ins_name(t)).unwrap(),
                None => s.push_str(" ?"),
            }
        }
        InsKind::BranchOv { a, b, target } => {
            write!(s, "{op} {} {}", ins_name(a), ins_name(b)).unwrap();
            match target.get() {
                Some(t) => write!(s, " {}", ins_name(t)).unwrap(),
                None => s.push_str(" ?"),
            }
        }
        InsKind::Guard { cond, .. } => {
            s.push_str(op);
            if let Some(c) = cond {
                write!(s, " {}", ins_name(c)).unwrap();
            }
        }
        InsKind::GuardOv { a, b, .. } => {
            write!(s, "{op} {} {}", ins_name(a), ins_name(b)).unwrap()
        }
        InsKind::Ret(v) => write!(s, "{op} {}", ins_name(v)).unwrap(),
        InsKind::Alloc(size) => write!(s, "{op} {size}").unwrap(),
    }
    s
}

/// Dump a whole buffer in forward order, one instruction per line.
pub fn dump_buffer(buf: &crate::buffer::LirBuffer) -> String {
    let mut out = String::new();
    for ins in buf.forward_order() {
        out.push_str(&format_ins(ins));
        out.push('\n');
    }
    out
}
