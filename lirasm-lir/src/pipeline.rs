//! Pipeline composition.
//!
//! Builds the writer chain the parser talks to, bottom-up. The chain the
//! client sees, top to bottom:
//!
//! ```text
//! validate -> [verbose] -> [cse] -> [soft-float] -> [fold] -> [validate] -> buffer
//! ```
//!
//! Bracketed links are optional. With optimization off the chain is just
//! the top validator over the buffer, so the output reflects exactly what
//! the parser requested.

use crate::buffer::LirBuffer;
use crate::cse::CseFilter;
use crate::fold::ExprFilter;
use crate::softfloat::SoftFloatFilter;
use crate::validate::ValidateWriter;
use crate::verbose::VerboseWriter;
use crate::writer::{BufferWriter, LirWriter};

/// Which optional links to include in the chain.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineOpts {
    /// Enable CSE, the expression folder, and the bottom validator.
    pub optimize: bool,
    /// Print each emission.
    pub verbose: bool,
    /// Rewrite double arithmetic into helper calls; only meaningful for
    /// targets without FP hardware.
    pub soft_float: bool,
}

/// Compose the writer chain over `buf`.
pub fn build_pipeline<'a>(
    buf: &'a LirBuffer<'a>,
    opts: PipelineOpts,
) -> Box<dyn LirWriter<'a> + 'a> {
    let mut w: Box<dyn LirWriter<'a> + 'a> = Box::new(BufferWriter::new(buf));
    if opts.optimize {
        // The folder can synthesize nodes the client never asked for, so
        // it gets its own validator underneath.
        w = Box::new(ValidateWriter::new(w));
        w = Box::new(ExprFilter::new(w));
    }
    if opts.soft_float {
        w = Box::new(SoftFloatFilter::new(buf.arena(), w));
    }
    if opts.optimize {
        w = Box::new(CseFilter::new(w));
    }
    if opts.verbose {
        w = Box::new(VerboseWriter::new(w));
    }
    Box::new(ValidateWriter::new(w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::ir::{InsPtr, Opcode};

    #[test]
    fn optimized_chain_folds_and_merges() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = build_pipeline(
            &buf,
            PipelineOpts {
                optimize: true,
                ..Default::default()
            },
        );
        let a = w.ins_imm_i(3).unwrap();
        let b = w.ins_imm_i(4).unwrap();
        let r1 = w.ins2(Opcode::Addi, a, b).unwrap();
        let r2 = w.ins2(Opcode::Addi, a, b).unwrap();
        assert_eq!(r1.imm_i(), Some(7));
        assert_eq!(InsPtr(r1), InsPtr(r2));
        // Exactly three nodes: two source immediates and the folded 7.
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn unoptimized_chain_is_literal() {
        let arena = Arena::new();
        let buf = LirBuffer::new(&arena);
        let mut w = build_pipeline(&buf, PipelineOpts::default());
        let a = w.ins_imm_i(3).unwrap();
        let b = w.ins_imm_i(4).unwrap();
        let r1 = w.ins2(Opcode::Addi, a, b).unwrap();
        let r2 = w.ins2(Opcode::Addi, a, b).unwrap();
        assert_eq!(r1.opcode(), Opcode::Addi);
        assert_ne!(InsPtr(r1), InsPtr(r2));
        assert_eq!(buf.len(), 4);
    }
}
