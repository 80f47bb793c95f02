//! The `lirasm` command-line driver.
//!
//! Reads a textual LIR file (or generates a random one), assembles each
//! fragment through the writer pipeline, hands it to the native back-end,
//! and optionally executes the `main` fragment, printing its result in the
//! format its return class dictates. All fatal errors print one line on
//! stderr and exit with code 1.

mod random;

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use rustc_hash::FxHashMap;

use lirasm_jit::CompiledFragment;
use lirasm_lir::{Arena, FragmentMap, PipelineOpts, RetClass, SideExit};
use lirasm_reader::{assemble_fragment, BuiltinTable, TokKind, Tokenizer};

#[derive(Parser)]
#[command(
    name = "lirasm",
    about = "Assemble and run textual LIR through the JIT back-end",
    version
)]
struct Args {
    /// Print each instruction as it is emitted.
    #[arg(short, long)]
    verbose: bool,

    /// Execute the main fragment and print its result.
    #[arg(long)]
    execute: bool,

    /// Run the optimization filters (the default).
    #[arg(long, overrides_with = "no_optimize")]
    optimize: bool,

    /// Emit exactly what the input requests, with no filtering.
    #[arg(long)]
    no_optimize: bool,

    /// Generate and assemble a random fragment of about N instructions.
    #[arg(long, value_name = "N", num_args = 0..=1, default_missing_value = "100")]
    random: Option<usize>,

    /// Recurse N frames of 512 int32s before invoking the fragment.
    #[arg(long, value_name = "N", num_args = 0..=1, default_missing_value = "100")]
    stkskip: Option<u32>,

    /// Print the target architecture and exit.
    #[arg(long)]
    show_arch: bool,

    /// Print the target word size in bits and exit.
    #[arg(long)]
    show_word_size: bool,

    /// Print the target endianness and exit.
    #[arg(long)]
    show_endianness: bool,

    /// Input file.
    file: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help and version are not errors.
            if e.use_stderr() {
                eprintln!("{e}");
                std::process::exit(1);
            }
            print!("{e}");
            return;
        }
    };
    if let Err(e) = run(args) {
        eprintln!("lirasm: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    if args.show_arch {
        println!("{}", target_lexicon::HOST.architecture);
        return Ok(());
    }
    if args.show_word_size {
        let width = target_lexicon::HOST
            .pointer_width()
            .map_err(|_| anyhow!("unknown pointer width"))?;
        println!("{}", width.bits());
        return Ok(());
    }
    if args.show_endianness {
        let endian = target_lexicon::HOST
            .endianness()
            .map_err(|_| anyhow!("unknown endianness"))?;
        match endian {
            target_lexicon::Endianness::Little => println!("little-endian"),
            target_lexicon::Endianness::Big => println!("big-endian"),
        }
        return Ok(());
    }

    let source = match (args.random, &args.file) {
        (Some(_), Some(_)) => bail!("--random and an input file are mutually exclusive"),
        (Some(n), None) => random::generate(n),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read '{}'", path.display()))?,
        (None, None) => bail!("no input file"),
    };

    // Optimization defaults on; the flags override whichever came earlier.
    let optimize = args.optimize || !args.no_optimize;
    let opts = PipelineOpts {
        optimize,
        verbose: args.verbose,
        soft_float: false,
    };

    let arena = Arena::new();
    let builtins = BuiltinTable::new(&arena);
    let mut frags = FragmentMap::default();
    let mut codes: FxHashMap<String, CompiledFragment> = FxHashMap::default();

    assemble_file(&source, &arena, &builtins, &mut frags, &mut codes, opts)?;

    if args.execute {
        let frag = frags
            .get("main")
            .ok_or_else(|| anyhow!("no main fragment to execute"))?;
        let line = execute(frag.entry.get(), frag.ret_class, args.stkskip.unwrap_or(0));
        println!("{line}");
    }
    Ok(())
}

/// Top-level dispatch: either one implicit `main` fragment, or explicit
/// `.begin`/`.end` blocks with `.patch` between them.
fn assemble_file<'a>(
    source: &str,
    arena: &'a Arena,
    builtins: &BuiltinTable<'a>,
    frags: &mut FragmentMap<'a>,
    codes: &mut FxHashMap<String, CompiledFragment>,
    opts: PipelineOpts,
) -> Result<()> {
    let mut toks = Tokenizer::new(source);
    // None until the first meaningful token decides the mode.
    let mut explicit: Option<bool> = None;
    loop {
        let tok = toks.peek()?;
        match tok.kind {
            TokKind::Newline => {
                toks.get()?;
            }
            TokKind::Eof => break,
            TokKind::Name if tok.text == ".begin" => {
                if explicit == Some(false) {
                    bail!("line {}: .begin after implicit code", tok.line);
                }
                explicit = Some(true);
                toks.get()?;
                let name = toks.get_name()?.to_string();
                if frags.contains_key(&name) {
                    bail!("line {}: duplicate fragment '{}'", tok.line, name);
                }
                toks.eat(TokKind::Newline, None)?;
                let frag =
                    assemble_fragment(arena, &mut toks, &name, frags, builtins, opts, true)?;
                let code = lirasm_jit::compile(&frag)?;
                frag.entry.set(code.entry());
                codes.insert(name.clone(), code);
                frags.insert(name, frag);
            }
            TokKind::Name if tok.text == ".patch" => {
                if explicit == Some(false) {
                    bail!("line {}: .patch after implicit code", tok.line);
                }
                explicit = Some(true);
                toks.get()?;
                apply_patch(&mut toks, frags, codes)?;
            }
            _ => {
                if explicit == Some(true) {
                    bail!("line {}: expected .begin or .patch", tok.line);
                }
                explicit = Some(false);
                let frag =
                    assemble_fragment(arena, &mut toks, "main", frags, builtins, opts, false)?;
                let code = lirasm_jit::compile(&frag)?;
                frag.entry.set(code.entry());
                codes.insert("main".to_string(), code);
                frags.insert("main".to_string(), frag);
            }
        }
    }
    Ok(())
}

/// `.patch src.guardLabel -> destFrag`
fn apply_patch(
    toks: &mut Tokenizer,
    frags: &FragmentMap<'_>,
    codes: &mut FxHashMap<String, CompiledFragment>,
) -> Result<()> {
    let target = toks.eat(TokKind::Name, None)?;
    let Some((src_name, label)) = target.text.split_once('.') else {
        bail!("line {}: expected fragment.label in .patch", target.line);
    };
    toks.eat(TokKind::Punct, Some("->"))?;
    let dest_tok = toks.eat(TokKind::Name, None)?;
    let end = toks.get()?;
    if !matches!(end.kind, TokKind::Newline | TokKind::Eof) {
        bail!("line {}: trailing input after .patch", end.line);
    }

    let dest = frags
        .get(dest_tok.text)
        .ok_or_else(|| anyhow!("no fragment '{}'", dest_tok.text))?;
    let src = frags
        .get(src_name)
        .ok_or_else(|| anyhow!("no fragment '{src_name}'"))?;
    let ins = src
        .labels
        .get(label)
        .ok_or_else(|| anyhow!("no label '{label}' in fragment '{src_name}'"))?;
    let rec = ins
        .guard_record()
        .ok_or_else(|| anyhow!("'{label}' in fragment '{src_name}' is not a guard"))?;
    let code = codes
        .get_mut(src_name)
        .ok_or_else(|| anyhow!("fragment '{src_name}' has no code"))?;
    code.patch_exit(rec, dest.entry.get())?;
    log::debug!("patched {src_name}.{label} -> {}", dest_tok.text);
    Ok(())
}

/// Call the entry point with the signature its return class dictates and
/// render the one-line result.
fn execute(entry: usize, class: RetClass, stkskip: u32) -> String {
    let mut run = || invoke(entry, class);
    deep_call(stkskip, &mut run)
}

/// Burn `depth` frames of 512 int32s, then run. Exercises deep-stack
/// behavior of the emitted code.
fn deep_call(depth: u32, run: &mut dyn FnMut() -> String) -> String {
    let mut pad = [0i32; 512];
    // Keep the pad from being optimized away.
    unsafe { core::ptr::write_volatile(pad.as_mut_ptr(), depth as i32) };
    if depth == 0 {
        run()
    } else {
        deep_call(depth - 1, run)
    }
}

fn invoke(entry: usize, class: RetClass) -> String {
    unsafe {
        match class {
            RetClass::Int => {
                let f: extern "C" fn() -> i32 = core::mem::transmute(entry);
                format!("Output is: {}", f())
            }
            RetClass::Quad => {
                let f: extern "C" fn() -> i64 = core::mem::transmute(entry);
                format!("Output is: {}", f())
            }
            RetClass::Float => {
                let f: extern "C" fn() -> f32 = core::mem::transmute(entry);
                format!("Output is: {}", fmt_f64(f() as f64))
            }
            RetClass::Double => {
                let f: extern "C" fn() -> f64 = core::mem::transmute(entry);
                format!("Output is: {}", fmt_f64(f()))
            }
            RetClass::Float4 => {
                #[cfg(target_arch = "x86_64")]
                {
                    let f: extern "C" fn() -> core::arch::x86_64::__m128 =
                        core::mem::transmute(entry);
                    let v: [f32; 4] = core::mem::transmute(f());
                    format!(
                        "Output is: {},{},{},{}",
                        fmt_f64(v[0] as f64),
                        fmt_f64(v[1] as f64),
                        fmt_f64(v[2] as f64),
                        fmt_f64(v[3] as f64)
                    )
                }
                #[cfg(not(target_arch = "x86_64"))]
                {
                    unreachable!("float4 execution requires the x86-64 back-end")
                }
            }
            RetClass::Guard => {
                let f: extern "C" fn() -> *const SideExit = core::mem::transmute(entry);
                let exit = &*f();
                format!("Exited block on line: {}", exit.line)
            }
        }
    }
}

fn fmt_f64(v: f64) -> String {
    if v.is_nan() {
        "NAN".to_string()
    } else if v == f64::INFINITY {
        "INF".to_string()
    } else if v == f64::NEG_INFINITY {
        "-INF".to_string()
    } else {
        format!("{v}")
    }
}
