//! End-to-end tests: parse a textual fragment, compile it, run the
//! machine code, and check the value that comes back.
//!
//! Hosts without a native emitter skip these by returning early, so the
//! suite stays green on unsupported architectures.

use core::mem::transmute;

use lirasm_jit::{compile, host_supported, AsmError, CompiledFragment};
use lirasm_lir::{Arena, Fragment, FragmentMap, PipelineOpts, RetClass, SideExit};
use lirasm_reader::{assemble_fragment, BuiltinTable, Tokenizer};

fn build<'a>(
    arena: &'a Arena,
    frags: &FragmentMap<'a>,
    name: &str,
    src: &str,
    optimize: bool,
) -> (Fragment<'a>, CompiledFragment) {
    let builtins = BuiltinTable::new(arena);
    let mut toks = Tokenizer::new(src);
    let frag = assemble_fragment(
        arena,
        &mut toks,
        name,
        frags,
        &builtins,
        PipelineOpts {
            optimize,
            ..Default::default()
        },
        false,
    )
    .expect("parse failed");
    let code = compile(&frag).expect("compile failed");
    frag.entry.set(code.entry());
    (frag, code)
}

fn run_int(src: &str, optimize: bool) -> Option<i32> {
    if !host_supported() {
        return None;
    }
    let arena = Arena::new();
    let frags = FragmentMap::default();
    let (frag, code) = build(&arena, &frags, "main", src, optimize);
    assert_eq!(frag.ret_class, RetClass::Int);
    let f: extern "C" fn() -> i32 = unsafe { transmute(code.entry()) };
    Some(f())
}

fn run_quad(src: &str, optimize: bool) -> Option<i64> {
    if !host_supported() {
        return None;
    }
    let arena = Arena::new();
    let frags = FragmentMap::default();
    let (_, code) = build(&arena, &frags, "main", src, optimize);
    let f: extern "C" fn() -> i64 = unsafe { transmute(code.entry()) };
    Some(f())
}

fn run_double(src: &str, optimize: bool) -> Option<f64> {
    if !host_supported() {
        return None;
    }
    let arena = Arena::new();
    let frags = FragmentMap::default();
    let (_, code) = build(&arena, &frags, "main", src, optimize);
    let f: extern "C" fn() -> f64 = unsafe { transmute(code.entry()) };
    Some(f())
}

fn run_float(src: &str, optimize: bool) -> Option<f32> {
    if !host_supported() {
        return None;
    }
    let arena = Arena::new();
    let frags = FragmentMap::default();
    let (_, code) = build(&arena, &frags, "main", src, optimize);
    let f: extern "C" fn() -> f32 = unsafe { transmute(code.entry()) };
    Some(f())
}

#[cfg(target_arch = "x86_64")]
fn run_float4(src: &str, optimize: bool) -> Option<[f32; 4]> {
    if !host_supported() {
        return None;
    }
    let arena = Arena::new();
    let frags = FragmentMap::default();
    let (_, code) = build(&arena, &frags, "main", src, optimize);
    let f: extern "C" fn() -> core::arch::x86_64::__m128 =
        unsafe { transmute(code.entry()) };
    Some(unsafe { transmute(f()) })
}

#[test]
fn integer_add() {
    for optimize in [false, true] {
        let Some(v) = run_int("a = immi 2; b = immi 3; r = addi a b; reti r", optimize)
        else {
            return;
        };
        assert_eq!(v, 5);
    }
}

#[test]
fn integer_arithmetic_battery() {
    let src = "a = immi 100; b = immi 7\n\
               d = divi a b; m = modi a b\n\
               s = lshi d b; t = rshui s b\n\
               u = xori t m; r = subi u a; reti r";
    // d = 14, m = 2, s = 14 << 7 = 1792, t = 1792 >> 7 = 14,
    // u = 14 ^ 2 = 12, r = 12 - 100 = -88.
    for optimize in [false, true] {
        let Some(v) = run_int(src, optimize) else {
            return;
        };
        assert_eq!(v, -88);
    }
}

#[test]
fn signed_and_unsigned_comparisons() {
    let src = "a = immi -1; b = immi 1\n\
               s = lti a b; u = ltui a b\n\
               two = immi 2; su = muli s two; r = addi su u; reti r";
    // Signed: -1 < 1 is true. Unsigned: 0xffffffff < 1 is false. r = 2.
    let Some(v) = run_int(src, false) else {
        return;
    };
    assert_eq!(v, 2);
}

#[test]
fn branch_and_label() {
    let src = "a = immi 0; c = eqi a a; jt c L; reti a; L: one = immi 1; reti one";
    for optimize in [false, true] {
        let Some(v) = run_int(src, optimize) else {
            return;
        };
        assert_eq!(v, 1);
    }
}

#[test]
fn backward_branch_loops() {
    // Sum 1..=10 with a backward jf loop.
    let src = "p = allocp 8; z = immi 0; n = immi 10; one = immi 1\n\
               sti z p 0\n\
               loop: i = ldi p 0; s = addi i one; sti s p 0\n\
               done = eqi s n; jf done loop\n\
               reti s";
    let Some(v) = run_int(src, false) else {
        return;
    };
    assert_eq!(v, 10);
}

#[test]
fn store_load_round_trip() {
    let src = "p = allocp 16; v = immi 37; sti v p 4; w = ldi p 4; reti w";
    for optimize in [false, true] {
        let Some(v) = run_int(src, optimize) else {
            return;
        };
        assert_eq!(v, 37);
    }
}

#[test]
fn quad_arithmetic() {
    let src = "a = immq 0x100000000; b = immq 1; c = addq a b\n\
               n = immi 4; d = lshq c n; retq d";
    let Some(v) = run_quad(src, false) else {
        return;
    };
    assert_eq!(v, 0x1000000010i64);
}

#[test]
fn double_divide_is_infinite() {
    let src = "a = immd 1.0; b = immd 0.0; r = divd a b; retd r";
    for optimize in [false, true] {
        let Some(v) = run_double(src, optimize) else {
            return;
        };
        assert!(v.is_infinite() && v > 0.0);
    }
}

#[test]
fn double_arithmetic_and_casts() {
    let src = "a = immi 7; d = i2d a; h = immd 0.5; r = muld d h; retd r";
    let Some(v) = run_double(src, false) else {
        return;
    };
    assert_eq!(v, 3.5);
}

#[test]
fn float_arithmetic() {
    let src = "a = immf 1.5; b = immf 2.25; r = addf a b; retf r";
    let Some(v) = run_float(src, false) else {
        return;
    };
    assert_eq!(v, 3.75);
}

#[test]
fn negation_flips_sign_bits() {
    let src = "a = immd 2.5; r = negd a; retd r";
    let Some(v) = run_double(src, false) else {
        return;
    };
    assert_eq!(v, -2.5);

    let src = "a = immi 5; r = negi a; reti r";
    assert_eq!(run_int(src, false), Some(-5));
}

#[test]
fn float_comparisons_reject_nan() {
    // NaN compares false under every ordered predicate.
    let src = "z = immd 0.0; n = divd z z; c = led n n; reti c";
    let Some(v) = run_int(src, false) else {
        return;
    };
    assert_eq!(v, 0);

    let src = "a = immd 1.0; b = immd 1.0; c = eqd a b; reti c";
    assert_eq!(run_int(src, false), Some(1));
}

#[test]
fn cmov_selects() {
    let src = "t = immi 1; a = immi 10; b = immi 20; r = cmovi t a b; reti r";
    let Some(v) = run_int(src, false) else {
        return;
    };
    assert_eq!(v, 10);
    let src = "t = immi 0; a = immi 10; b = immi 20; r = cmovi t a b; reti r";
    let Some(v) = run_int(src, false) else {
        return;
    };
    assert_eq!(v, 20);

    let src = "t = immi 0; a = immd 1.5; b = immd 2.5; r = cmovd t a b; retd r";
    let Some(v) = run_double(src, false) else {
        return;
    };
    assert_eq!(v, 2.5);
}

#[cfg(target_arch = "x86_64")]
#[test]
fn float4_store_load_echo() {
    let src = "p = allocp 16; f = immf 2.5; v = f2f4 f\n\
               stf4 v p 0; w = ldf4 p 0; retf4 w";
    for optimize in [false, true] {
        let Some(v) = run_float4(src, optimize) else {
            return;
        };
        assert_eq!(v, [2.5, 2.5, 2.5, 2.5]);
    }
}

#[test]
fn float4_lanes_and_arithmetic() {
    let src = "a = immf 3.0; v = f2f4 a; w = addf4 v v; x = f4z w; retf x";
    let Some(v) = run_float(src, false) else {
        return;
    };
    assert_eq!(v, 6.0);
}

#[test]
fn guard_exit_reports_its_line() {
    if !host_supported() {
        return;
    }
    let arena = Arena::new();
    let frags = FragmentMap::default();
    let src = "a = immi 1\nxt a\nr = immi 7\nreti r";
    let (frag, code) = build(&arena, &frags, "main", src, false);
    // Guard first, ret later: the ret class wins the signature, but the
    // guard trips at runtime and hands back its side exit.
    assert_eq!(frag.ret_class, RetClass::Int);
    let f: extern "C" fn() -> usize = unsafe { transmute(code.entry()) };
    let exit = unsafe { &*(f() as *const SideExit) };
    assert_eq!(exit.line, 2);
}

#[test]
fn untaken_guard_falls_through() {
    let src = "z = immi 0\nxt z\nr = immi 7\nreti r";
    let Some(v) = run_int(src, false) else {
        return;
    };
    assert_eq!(v, 7);
}

#[test]
fn overflow_guard_trips_only_on_overflow() {
    let src = "a = immi 2147483647; b = immi 1; r = addxovi a b; reti r";
    if !host_supported() {
        return;
    }
    let arena = Arena::new();
    let frags = FragmentMap::default();
    let (_, code) = build(&arena, &frags, "main", src, false);
    let f: extern "C" fn() -> usize = unsafe { transmute(code.entry()) };
    let exit = unsafe { &*(f() as *const SideExit) };
    assert_eq!(exit.line, 1);

    let src = "a = immi 41; b = immi 1; r = addxovi a b; reti r";
    assert_eq!(run_int(src, false), Some(42));
}

#[test]
fn overflow_branch_takes_the_label() {
    let src = "a = immi 2147483647; b = immi 1\n\
               r = addjovi a b ovf; reti r\n\
               ovf: sentinel = immi -1; reti sentinel";
    let Some(v) = run_int(src, false) else {
        return;
    };
    assert_eq!(v, -1);
}

#[test]
fn builtin_call_sin() {
    let src = "z = immd 0.0; r = calld sin cdecl z; retd r";
    let Some(v) = run_double(src, false) else {
        return;
    };
    assert!(v.abs() < 1e-12);
}

#[test]
fn builtin_malloc_free_round_trip() {
    let src = "n = immq 64; p = callq malloc cdecl n\n\
               v = immi 99; sti v p 0; w = ldi p 0\n\
               callv free cdecl p; reti w";
    let Some(v) = run_int(src, false) else {
        return;
    };
    assert_eq!(v, 99);
}

#[test]
fn cross_fragment_call() {
    if !host_supported() {
        return;
    }
    let arena = Arena::new();
    let mut frags = FragmentMap::default();
    // The callee's pages stay alive in `five_code` while main runs.
    let (five, five_code) = build(&arena, &frags, "five", "v = immi 5; reti v", false);
    assert_eq!(five_code.entry(), five.entry.get());
    frags.insert("five".to_string(), five);

    let (_, code) = build(
        &arena,
        &frags,
        "main",
        "r = calli five cdecl; s = addi r r; reti s",
        false,
    );
    let f: extern "C" fn() -> i32 = unsafe { transmute(code.entry()) };
    assert_eq!(f(), 10);
}

#[test]
fn call_argument_order_is_lexical() {
    if !host_supported() {
        return;
    }
    extern "C" fn diff(a: i32, b: i32) -> i32 {
        a - b
    }
    // A user-defined target with two arguments: if the reversed storage
    // order leaked into the ABI, the result would be negated.
    let arena = Arena::new();
    let mut frags = FragmentMap::default();
    let (stub, _stub_code) = build(&arena, &frags, "diff", "v = immi 0; reti v", false);
    stub.entry.set(diff as usize);
    frags.insert("diff".to_string(), stub);

    let (_, code) = build(
        &arena,
        &frags,
        "main",
        "a = immi 30; b = immi 10; r = calli diff cdecl a b; reti r",
        false,
    );
    let f: extern "C" fn() -> i32 = unsafe { transmute(code.entry()) };
    assert_eq!(f(), 20);
}

#[test]
fn patch_redirects_a_guard() {
    if !host_supported() {
        return;
    }
    let arena = Arena::new();
    let mut frags = FragmentMap::default();

    let (b, b_code) = build(&arena, &frags, "B", "v = immi 42; reti v", false);
    let b_entry = b_code.entry();
    frags.insert("B".to_string(), b);

    let src_a = "c = immi 1\ng = xt c\nr = immi 7\nreti r";
    let (a, mut a_code) = build(&arena, &frags, "A", src_a, false);

    // Before patching: the guard returns its side exit.
    let f: extern "C" fn() -> usize = unsafe { transmute(a_code.entry()) };
    let exit = unsafe { &*(f() as *const SideExit) };
    assert_eq!(exit.line, 2);

    // Patch A.g -> B and the same trip now lands in B.
    let rec = a.labels["g"].guard_record().expect("g is a guard");
    a_code.patch_exit(rec, b_entry).unwrap();
    assert_eq!(rec.exit.target.get(), b_entry);
    let f: extern "C" fn() -> i32 = unsafe { transmute(a_code.entry()) };
    assert_eq!(f(), 42);
}

#[test]
fn oversized_frame_is_stack_full() {
    if !host_supported() {
        return;
    }
    let arena = Arena::new();
    let frags = FragmentMap::default();
    let builtins = BuiltinTable::new(&arena);
    let mut toks = Tokenizer::new("p = allocp 2097152; r = immi 0; reti r");
    let frag = assemble_fragment(
        &arena,
        &mut toks,
        "main",
        &frags,
        &builtins,
        PipelineOpts::default(),
        false,
    )
    .unwrap();
    assert!(matches!(compile(&frag), Err(AsmError::StackFull)));
}

#[test]
fn optimized_and_literal_builds_agree() {
    let src = "a = immi 6; b = immi 7; p = allocp 8\n\
               m = muli a b; sti m p 0; l = ldi p 0\n\
               c = gti l a; r = cmovi c l b; reti r";
    let plain = run_int(src, false);
    let opt = run_int(src, true);
    assert_eq!(plain, opt);
    if let Some(v) = plain {
        assert_eq!(v, 42);
    }
}
