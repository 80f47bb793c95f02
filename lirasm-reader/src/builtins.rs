//! The built-in function table.
//!
//! A small, immutable set of C-callable targets the front-end knows by
//! name. Each entry carries a full `CallInfo`, so calls to built-ins are
//! validated against a declared signature rather than inferred from the
//! call site the way fragment-to-fragment calls are.

use lirasm_lir::{Abi, AccSet, Arena, CallInfo, Ty};
use rustc_hash::FxHashMap;

extern "C" fn builtin_sin(x: f64) -> f64 {
    x.sin()
}

/// Name → descriptor lookup for the built-ins.
pub struct BuiltinTable<'a> {
    map: FxHashMap<&'static str, &'a CallInfo>,
}

impl<'a> BuiltinTable<'a> {
    /// Build the table, allocating the descriptors into `arena`.
    pub fn new(arena: &'a Arena) -> Self {
        let mut map = FxHashMap::default();
        let mut add = |name: &'static str,
                       addr: usize,
                       args: &[Ty],
                       ret: Ty,
                       is_pure: bool,
                       store_acc: AccSet| {
            let info = arena.alloc(CallInfo {
                name: name.to_string(),
                addr,
                abi: Abi::Cdecl,
                args: args.iter().copied().collect(),
                ret,
                is_pure,
                store_acc,
            });
            map.insert(name, info);
        };
        add(
            "puts",
            libc::puts as usize,
            &[Ty::Ptr],
            Ty::I32,
            false,
            AccSet::ALL,
        );
        add(
            "sin",
            builtin_sin as usize,
            &[Ty::F64],
            Ty::F64,
            true,
            AccSet::NONE,
        );
        add(
            "malloc",
            libc::malloc as usize,
            &[Ty::I64],
            Ty::Ptr,
            false,
            AccSet::ALL,
        );
        add(
            "free",
            libc::free as usize,
            &[Ty::Ptr],
            Ty::Void,
            false,
            AccSet::ALL,
        );
        Self { map }
    }

    /// Look a built-in up by name.
    pub fn lookup(&self, name: &str) -> Option<&'a CallInfo> {
        self.map.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_contents() {
        let arena = Arena::new();
        let table = BuiltinTable::new(&arena);
        let sin = table.lookup("sin").unwrap();
        assert!(sin.is_pure);
        assert_eq!(sin.ret, Ty::F64);
        assert_eq!(sin.arg_count(), 1);
        assert!(table.lookup("puts").is_some());
        assert!(table.lookup("malloc").is_some());
        assert!(table.lookup("free").is_some());
        assert!(table.lookup("exit").is_none());
    }

    #[test]
    fn sin_helper_computes() {
        let arena = Arena::new();
        let table = BuiltinTable::new(&arena);
        let sin = table.lookup("sin").unwrap();
        let f: extern "C" fn(f64) -> f64 = unsafe { core::mem::transmute(sin.addr) };
        assert!((f(0.0)).abs() < 1e-12);
    }
}
