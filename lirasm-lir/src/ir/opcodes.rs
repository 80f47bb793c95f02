//! The closed LIR opcode enumeration and its property tables.
//!
//! Every opcode carries a textual name (what the front-end parses and the
//! verbose writer prints), a result type, and a shape that drives operand
//! dispatch in the parser, the validator, and the back-end.

use super::types::Ty;

/// The operand shape of an opcode, used for statement dispatch.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Shape {
    /// Emitted by the assembler itself, not writable in source text
    /// (`start`, `param`, `label`).
    Pseudo,
    /// One inline literal.
    Imm,
    /// One operand.
    Un,
    /// Two operands.
    Bin,
    /// Three operands (conditional moves).
    Ter,
    /// `base, offset` with the offset as a literal.
    Load,
    /// `value, base, offset` with the offset as a literal.
    Store,
    /// `j target`, `jt cond target`, `jf cond target`.
    Branch,
    /// Arithmetic that branches on overflow: `op a b target`.
    BranchOv,
    /// `x`, `xt cond`, `xf cond`.
    Guard,
    /// Arithmetic that exits on overflow: `op a b`.
    GuardOv,
    /// `call func abi arg*`.
    Call,
    /// `ret value`.
    Ret,
    /// `allocp size`.
    Alloc,
}

macro_rules! opcodes {
    ( $( $variant:ident = $name:literal, $ty:ident, $shape:ident; )* ) => {
        /// A LIR opcode.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        pub enum Opcode {
            $( #[allow(missing_docs)] $variant, )*
        }

        impl Opcode {
            /// The textual name of this opcode.
            pub fn name(self) -> &'static str {
                match self {
                    $( Opcode::$variant => $name, )*
                }
            }

            /// Look an opcode up by its textual name.
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( $name => Some(Opcode::$variant), )*
                    _ => None,
                }
            }

            /// The type of the value this opcode produces.
            pub fn result_ty(self) -> Ty {
                match self {
                    $( Opcode::$variant => Ty::$ty, )*
                }
            }

            /// The operand shape of this opcode.
            pub fn shape(self) -> Shape {
                match self {
                    $( Opcode::$variant => Shape::$shape, )*
                }
            }
        }
    };
}

opcodes! {
    // Pseudo-instructions.
    Start = "start", Void, Pseudo;
    Param = "param", Ptr, Pseudo;
    Label = "label", Void, Pseudo;

    // Immediates.
    Immi = "immi", I32, Imm;
    Immq = "immq", I64, Imm;
    Immf = "immf", F32, Imm;
    Immd = "immd", F64, Imm;

    // 32-bit integer arithmetic.
    Addi = "addi", I32, Bin;
    Subi = "subi", I32, Bin;
    Muli = "muli", I32, Bin;
    Divi = "divi", I32, Bin;
    Modi = "modi", I32, Bin;
    Andi = "andi", I32, Bin;
    Ori = "ori", I32, Bin;
    Xori = "xori", I32, Bin;
    Lshi = "lshi", I32, Bin;
    Rshi = "rshi", I32, Bin;
    Rshui = "rshui", I32, Bin;
    Noti = "noti", I32, Un;
    Negi = "negi", I32, Un;

    // 32-bit integer comparisons.
    Eqi = "eqi", I32, Bin;
    Lti = "lti", I32, Bin;
    Gti = "gti", I32, Bin;
    Lei = "lei", I32, Bin;
    Gei = "gei", I32, Bin;
    Ltui = "ltui", I32, Bin;
    Gtui = "gtui", I32, Bin;
    Leui = "leui", I32, Bin;
    Geui = "geui", I32, Bin;

    // Overflow-checked arithmetic: exit through a guard, or branch.
    Addxovi = "addxovi", I32, GuardOv;
    Subxovi = "subxovi", I32, GuardOv;
    Mulxovi = "mulxovi", I32, GuardOv;
    Addjovi = "addjovi", I32, BranchOv;
    Subjovi = "subjovi", I32, BranchOv;
    Muljovi = "muljovi", I32, BranchOv;

    // 64-bit integer arithmetic.
    Addq = "addq", I64, Bin;
    Subq = "subq", I64, Bin;
    Andq = "andq", I64, Bin;
    Orq = "orq", I64, Bin;
    Xorq = "xorq", I64, Bin;
    Lshq = "lshq", I64, Bin;
    Rshq = "rshq", I64, Bin;
    Rshuq = "rshuq", I64, Bin;
    Negq = "negq", I64, Un;

    // 64-bit integer comparisons.
    Eqq = "eqq", I32, Bin;
    Ltq = "ltq", I32, Bin;
    Gtq = "gtq", I32, Bin;
    Leq = "leq", I32, Bin;
    Geq = "geq", I32, Bin;
    Ltuq = "ltuq", I32, Bin;
    Gtuq = "gtuq", I32, Bin;
    Leuq = "leuq", I32, Bin;
    Geuq = "geuq", I32, Bin;

    // Double arithmetic and comparisons.
    Addd = "addd", F64, Bin;
    Subd = "subd", F64, Bin;
    Muld = "muld", F64, Bin;
    Divd = "divd", F64, Bin;
    Negd = "negd", F64, Un;
    Eqd = "eqd", I32, Bin;
    Ltd = "ltd", I32, Bin;
    Gtd = "gtd", I32, Bin;
    Led = "led", I32, Bin;
    Ged = "ged", I32, Bin;

    // Float arithmetic and comparisons.
    Addf = "addf", F32, Bin;
    Subf = "subf", F32, Bin;
    Mulf = "mulf", F32, Bin;
    Divf = "divf", F32, Bin;
    Negf = "negf", F32, Un;
    Eqf = "eqf", I32, Bin;
    Ltf = "ltf", I32, Bin;
    Gtf = "gtf", I32, Bin;
    Lef = "lef", I32, Bin;
    Gef = "gef", I32, Bin;

    // Float4 arithmetic, splat, and component extraction.
    Addf4 = "addf4", F4, Bin;
    Subf4 = "subf4", F4, Bin;
    Mulf4 = "mulf4", F4, Bin;
    Divf4 = "divf4", F4, Bin;
    F2f4 = "f2f4", F4, Un;
    F4x = "f4x", F32, Un;
    F4y = "f4y", F32, Un;
    F4z = "f4z", F32, Un;
    F4w = "f4w", F32, Un;

    // Conversions.
    I2q = "i2q", I64, Un;
    Ui2uq = "ui2uq", I64, Un;
    Q2i = "q2i", I32, Un;
    I2d = "i2d", F64, Un;
    Ui2d = "ui2d", F64, Un;
    I2f = "i2f", F32, Un;
    Ui2f = "ui2f", F32, Un;
    F2d = "f2d", F64, Un;
    D2f = "d2f", F32, Un;
    D2i = "d2i", I32, Un;
    F2i = "f2i", I32, Un;

    // Loads and stores.
    Ldi = "ldi", I32, Load;
    Ldq = "ldq", I64, Load;
    Ldf = "ldf", F32, Load;
    Ldd = "ldd", F64, Load;
    Ldf4 = "ldf4", F4, Load;
    Sti = "sti", Void, Store;
    Stq = "stq", Void, Store;
    Stf = "stf", Void, Store;
    Std = "std", Void, Store;
    Stf4 = "stf4", Void, Store;

    // Conditional moves.
    Cmovi = "cmovi", I32, Ter;
    Cmovq = "cmovq", I64, Ter;
    Cmovf = "cmovf", F32, Ter;
    Cmovd = "cmovd", F64, Ter;

    // Branches, guards, calls, returns, stack allocation.
    J = "j", Void, Branch;
    Jt = "jt", Void, Branch;
    Jf = "jf", Void, Branch;
    X = "x", Void, Guard;
    Xt = "xt", Void, Guard;
    Xf = "xf", Void, Guard;
    Calli = "calli", I32, Call;
    Callq = "callq", I64, Call;
    Callf = "callf", F32, Call;
    Calld = "calld", F64, Call;
    Callv = "callv", Void, Call;
    Reti = "reti", Void, Ret;
    Retq = "retq", Void, Ret;
    Retf = "retf", Void, Ret;
    Retd = "retd", Void, Ret;
    Retf4 = "retf4", Void, Ret;
    Allocp = "allocp", Ptr, Alloc;
}

impl Opcode {
    /// Whether this opcode computes a pure value: same operands, same
    /// result, no side effects. Pure opcodes are fair game for CSE and
    /// folding.
    pub fn is_pure(self) -> bool {
        matches!(self.shape(), Shape::Imm | Shape::Un | Shape::Bin | Shape::Ter)
    }

    /// Whether this branch or guard opcode takes a condition operand.
    pub fn has_condition(self) -> bool {
        matches!(self, Opcode::Jt | Opcode::Jf | Opcode::Xt | Opcode::Xf)
    }

    /// The expected operand type of a unary opcode.
    pub fn unary_operand_ty(self) -> Ty {
        use Opcode::*;
        match self {
            Noti | Negi | I2q | Ui2uq | I2d | Ui2d | I2f | Ui2f => Ty::I32,
            Negq | Q2i => Ty::I64,
            Negd | D2f | D2i => Ty::F64,
            Negf | F2d | F2i | F2f4 => Ty::F32,
            F4x | F4y | F4z | F4w => Ty::F4,
            _ => panic!("{} is not unary", self.name()),
        }
    }

    /// The expected operand types of a binary opcode (including the
    /// overflow-checked forms).
    pub fn binary_operand_tys(self) -> (Ty, Ty) {
        use Opcode::*;
        match self {
            Addi | Subi | Muli | Divi | Modi | Andi | Ori | Xori | Lshi | Rshi | Rshui
            | Eqi | Lti | Gti | Lei | Gei | Ltui | Gtui | Leui | Geui
            | Addxovi | Subxovi | Mulxovi | Addjovi | Subjovi | Muljovi => (Ty::I32, Ty::I32),
            // Shift counts are 32-bit even for 64-bit values.
            Lshq | Rshq | Rshuq => (Ty::I64, Ty::I32),
            Addq | Subq | Andq | Orq | Xorq
            | Eqq | Ltq | Gtq | Leq | Geq | Ltuq | Gtuq | Leuq | Geuq => (Ty::I64, Ty::I64),
            Addd | Subd | Muld | Divd | Eqd | Ltd | Gtd | Led | Ged => (Ty::F64, Ty::F64),
            Addf | Subf | Mulf | Divf | Eqf | Ltf | Gtf | Lef | Gef => (Ty::F32, Ty::F32),
            Addf4 | Subf4 | Mulf4 | Divf4 => (Ty::F4, Ty::F4),
            _ => panic!("{} is not binary", self.name()),
        }
    }

    /// The value type a store opcode writes, or a ret opcode returns.
    pub fn value_ty(self) -> Ty {
        use Opcode::*;
        match self {
            Sti | Reti => Ty::I32,
            Stq | Retq => Ty::I64,
            Stf | Retf => Ty::F32,
            Std | Retd => Ty::F64,
            Stf4 | Retf4 => Ty::F4,
            _ => panic!("{} has no value operand", self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for op in [
            Opcode::Addi,
            Opcode::Immd,
            Opcode::Ldf4,
            Opcode::Addxovi,
            Opcode::Callv,
            Opcode::Retf4,
            Opcode::Allocp,
        ] {
            assert_eq!(Opcode::from_name(op.name()), Some(op));
        }
        assert_eq!(Opcode::from_name("frobnicate"), None);
    }

    #[test]
    fn purity_follows_shape() {
        assert!(Opcode::Addi.is_pure());
        assert!(Opcode::Immq.is_pure());
        assert!(Opcode::Cmovd.is_pure());
        assert!(!Opcode::Ldi.is_pure());
        assert!(!Opcode::Sti.is_pure());
        assert!(!Opcode::Calli.is_pure());
        assert!(!Opcode::Addxovi.is_pure());
        assert!(!Opcode::Allocp.is_pure());
    }

    #[test]
    fn comparison_results_are_int() {
        assert_eq!(Opcode::Eqd.result_ty(), Ty::I32);
        assert_eq!(Opcode::Ltuq.result_ty(), Ty::I32);
        assert_eq!(Opcode::Gef.result_ty(), Ty::I32);
    }
}
