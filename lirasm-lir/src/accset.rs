//! Coarse alias classes for loads, stores, and call effects.
//!
//! An access set is a small bit set naming the regions of memory an
//! instruction may touch. The CSE filter partitions its load cache by these
//! classes so a store to one class does not invalidate loads from a disjoint
//! class. The partitioning is conservative: two sets that intersect are
//! assumed to alias.

use bitflags::bitflags;

bitflags! {
    /// The alias classes an instruction may read or write.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    pub struct AccSet: u8 {
        /// Memory that is never stored to.
        const READONLY = 1 << 0;
        /// The native stack, including `allocp` areas.
        const STACK = 1 << 1;
        /// The return-address stack of the embedder.
        const RSTACK = 1 << 2;
        /// Anything not covered by another class.
        const OTHER = 1 << 3;
    }
}

impl AccSet {
    /// The maximally conservative set: may touch everything.
    pub const ALL: AccSet = AccSet::all();

    /// The empty set, used for pure calls.
    pub const NONE: AccSet = AccSet::empty();

    /// Whether a store with this set can affect a load tagged `other`.
    pub fn aliases(self, other: AccSet) -> bool {
        !(self & other).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_classes_do_not_alias() {
        assert!(!AccSet::STACK.aliases(AccSet::OTHER));
        assert!(AccSet::ALL.aliases(AccSet::STACK));
        assert!(!AccSet::NONE.aliases(AccSet::ALL));
        assert!((AccSet::STACK | AccSet::OTHER).aliases(AccSet::OTHER));
    }
}
