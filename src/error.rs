//! Error kinds for each compiler phase. Every phase returns a `Result`
//! wrapping a real `thiserror` enum, so the driver can format a single
//! human-readable message without re-deriving what went wrong from nothing.

use thiserror::Error;

/// Failures from the parser.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum ParseError {
    #[error("unmatched '[' at line {line}, column {column}")]
    UnmatchedOpen { line: u32, column: u32 },

    #[error("unmatched ']' at line {line}, column {column}")]
    UnmatchedClose { line: u32, column: u32 },
}

/// Failures from the code emitter.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("loop nesting exceeded the maximum of {max} (need {requested})")]
    TooManyNestedLoops { max: usize, requested: usize },

    #[error("code buffer link failed: {0}")]
    LinkFailed(String),

    #[error("code buffer encode failed: {0}")]
    EncodeFailed(String),
}

/// Failures from OS-level resource acquisition.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("failed to map guarded tape memory: {0}")]
    MemoryMap(#[source] std::io::Error),

    #[error("failed to mprotect guard page: {0}")]
    MemoryProtect(#[source] std::io::Error),

    #[error("failed to install SIGPROF handler: {0}")]
    SignalInstall(#[source] std::io::Error),

    #[error("failed to arm profiling timer: {0}")]
    TimerSetup(#[source] std::io::Error),

    #[error("profiling is not supported on this platform")]
    UnsupportedPlatform,

    #[error("profiling requires a program compiled with debug info (CompileOptions::debug)")]
    MissingDebugMap,
}

/// Top-level error unifying every phase, used by the driver.
#[derive(Debug, Error)]
pub enum BfError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    System(#[from] SystemError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
