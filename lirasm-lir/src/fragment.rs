//! Fragment records and return-type classification.

use core::cell::Cell;

use rustc_hash::FxHashMap;

use crate::buffer::LirBuffer;
use crate::ir::{InsRef, Opcode};

/// How many `param` pseudo-instructions the assembler emits per fragment,
/// one per callee-saved register reserved by the back-end.
pub const NUM_SAVED_REGS: u32 = 5;

/// The classified return type of a fragment, which selects the entry-point
/// signature it is called through.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RetClass {
    Int,
    Quad,
    Float,
    Double,
    Float4,
    Guard,
}

impl RetClass {
    fn bit(self) -> u8 {
        match self {
            RetClass::Int => 1 << 0,
            RetClass::Quad => 1 << 1,
            RetClass::Float => 1 << 2,
            RetClass::Double => 1 << 3,
            RetClass::Float4 => 1 << 4,
            RetClass::Guard => 1 << 5,
        }
    }

    /// The class a return opcode contributes.
    pub fn of_ret(op: Opcode) -> RetClass {
        match op {
            Opcode::Reti => RetClass::Int,
            Opcode::Retq => RetClass::Quad,
            Opcode::Retf => RetClass::Float,
            Opcode::Retd => RetClass::Double,
            Opcode::Retf4 => RetClass::Float4,
            _ => panic!("{} is not a return", op.name()),
        }
    }
}

/// Accumulates return-type bits as a fragment is parsed. Explicit guards
/// contribute the guard bit; each return opcode contributes its own.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetMask {
    bits: u8,
    last: Option<RetClass>,
}

impl RetMask {
    /// An empty mask.
    pub fn new() -> Self {
        Self::default()
    }

    /// OR a class into the mask.
    pub fn insert(&mut self, class: RetClass) {
        self.bits |= class.bit();
        self.last = Some(class);
    }

    /// Classify the fragment. Warns on a zero or mixed mask; with mixed
    /// bits the last-written class wins.
    pub fn classify(&self, fragment: &str) -> RetClass {
        if self.bits == 0 {
            log::warn!("no return type in fragment '{fragment}'");
            return RetClass::Guard;
        }
        if self.bits.count_ones() > 1 {
            log::warn!("multiple return types in fragment '{fragment}'");
        }
        self.last.expect("non-zero mask with no last class")
    }
}

/// A named compilation unit.
#[derive(Debug)]
pub struct Fragment<'a> {
    /// The fragment's name in the registry.
    pub name: String,
    /// The instruction stream the back-end consumes.
    pub buffer: &'a LirBuffer<'a>,
    /// `name = …` bindings, visible externally for `.patch`.
    pub labels: FxHashMap<String, InsRef<'a>>,
    /// The classified return type.
    pub ret_class: RetClass,
    /// Entry address after native compilation; zero until then.
    pub entry: Cell<usize>,
}

/// The registry of fragments by name.
pub type FragmentMap<'a> = FxHashMap<String, Fragment<'a>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_bit_classifies_cleanly() {
        let mut mask = RetMask::new();
        mask.insert(RetClass::Double);
        assert_eq!(mask.classify("f"), RetClass::Double);
    }

    #[test]
    fn last_written_bit_wins() {
        let mut mask = RetMask::new();
        mask.insert(RetClass::Guard);
        mask.insert(RetClass::Int);
        assert_eq!(mask.classify("f"), RetClass::Int);

        let mut mask = RetMask::new();
        mask.insert(RetClass::Int);
        mask.insert(RetClass::Quad);
        assert_eq!(mask.classify("f"), RetClass::Quad);
    }

    #[test]
    fn empty_mask_is_a_guard_fragment() {
        assert_eq!(RetMask::new().classify("f"), RetClass::Guard);
    }
}
