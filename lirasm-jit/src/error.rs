//! Assembler error reporting.

/// What went wrong while emitting native code. All variants are fatal; the
/// driver aborts the fragment and reports the error.
#[derive(Debug, thiserror::Error)]
pub enum AsmError {
    /// A branch displacement did not fit the encoding.
    #[error("branch out of range")]
    BranchTooFar,
    /// The fragment needs more stack than the back-end allows.
    #[error("stack frame too large")]
    StackFull,
    /// A branch target was still unresolved at emission.
    #[error("branch to unknown label")]
    UnknownBranch,
    /// A call carries more arguments than the back-end passes in registers.
    #[error("too many call arguments for the register convention")]
    TooManyArgs,
    /// This build has no emitter for the host.
    #[error("unsupported host architecture '{0}'")]
    UnsupportedHost(&'static str),
    /// Mapping or protecting executable pages failed.
    #[error("code memory: {0}")]
    Memory(#[from] region::Error),
}
