//! Random LIR fragment generation for `--random`.
//!
//! Produces a straight-line textual program of roughly the requested
//! instruction count, drawing operands from the values defined so far so
//! every statement is well formed. Division stays out of the pool (a
//! random divisor may fault) and there are no branches, so generated
//! fragments always terminate.

use std::fmt::Write;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const INT_BIN: &[&str] = &[
    "addi", "subi", "muli", "andi", "ori", "xori", "lshi", "rshi", "rshui",
];
const INT_CMP: &[&str] = &["eqi", "lti", "gti", "lei", "gei", "ltui", "gtui", "leui", "geui"];
const DBL_BIN: &[&str] = &["addd", "subd", "muld", "divd"];

pub fn generate(count: usize) -> String {
    let mut rng = StdRng::from_entropy();
    let mut out = String::new();
    let mut next = 0usize;
    let mut name = || {
        next += 1;
        format!("v{next}")
    };

    let mut ints: Vec<String> = Vec::new();
    let mut doubles: Vec<String> = Vec::new();

    // Scratch memory for generated stores and loads.
    out.push_str("buf = allocp 64\n");
    let seed_i = name();
    let _ = writeln!(out, "{seed_i} = immi {}", rng.gen_range(-100..100));
    ints.push(seed_i);
    let seed_d = name();
    let _ = writeln!(out, "{seed_d} = immd {:?}", rng.gen_range(-100.0..100.0));
    doubles.push(seed_d);

    for _ in 0..count {
        let n = name();
        match rng.gen_range(0..10) {
            0 => {
                let _ = writeln!(out, "{n} = immi {}", rng.gen_range(-1000..1000));
                ints.push(n);
            }
            1 => {
                let _ = writeln!(out, "{n} = immd {:?}", rng.gen_range(-1000.0..1000.0));
                doubles.push(n);
            }
            2 | 3 => {
                let op = INT_BIN[rng.gen_range(0..INT_BIN.len())];
                let a = pick(&mut rng, &ints);
                let b = pick(&mut rng, &ints);
                let _ = writeln!(out, "{n} = {op} {a} {b}");
                ints.push(n);
            }
            4 => {
                let op = INT_CMP[rng.gen_range(0..INT_CMP.len())];
                let a = pick(&mut rng, &ints);
                let b = pick(&mut rng, &ints);
                let _ = writeln!(out, "{n} = {op} {a} {b}");
                ints.push(n);
            }
            5 => {
                let op = DBL_BIN[rng.gen_range(0..DBL_BIN.len())];
                let a = pick(&mut rng, &doubles);
                let b = pick(&mut rng, &doubles);
                let _ = writeln!(out, "{n} = {op} {a} {b}");
                doubles.push(n);
            }
            6 => {
                let a = pick(&mut rng, &ints);
                let _ = writeln!(out, "{n} = i2d {a}");
                doubles.push(n);
            }
            7 => {
                let c = pick(&mut rng, &ints);
                let a = pick(&mut rng, &ints);
                let b = pick(&mut rng, &ints);
                let _ = writeln!(out, "{n} = cmovi {c} {a} {b}");
                ints.push(n);
            }
            8 => {
                let v = pick(&mut rng, &ints);
                let off = rng.gen_range(0..16) * 4;
                let _ = writeln!(out, "sti {v} buf {off}");
            }
            _ => {
                let off = rng.gen_range(0..16) * 4;
                let _ = writeln!(out, "{n} = ldi buf {off}");
                ints.push(n);
            }
        }
    }

    let ret = pick(&mut rng, &ints);
    let _ = writeln!(out, "reti {ret}");
    out
}

fn pick<'v>(rng: &mut StdRng, pool: &'v [String]) -> &'v str {
    &pool[rng.gen_range(0..pool.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_fragments_assemble() {
        let arena = lirasm_lir::Arena::new();
        let builtins = lirasm_reader::BuiltinTable::new(&arena);
        let frags = lirasm_lir::FragmentMap::default();
        for n in [0, 1, 50, 200] {
            let src = generate(n);
            let mut toks = lirasm_reader::Tokenizer::new(&src);
            lirasm_reader::assemble_fragment(
                &arena,
                &mut toks,
                "main",
                &frags,
                &builtins,
                lirasm_lir::PipelineOpts {
                    optimize: true,
                    ..Default::default()
                },
                false,
            )
            .expect("random fragment must assemble");
        }
    }
}
