//! An optimizing JIT compiler for Brainfuck. The public surface is
//! deliberately small: parse a source string, optionally optimize and/or
//! attach a debug map, compile to native code, and run it against a guarded
//! tape.
//!
//! ```no_run
//! use bf_jit::{CompileOptions, Program};
//!
//! let program = Program::compile("++++++++[>++++++++<-]>+.", &CompileOptions::default())?;
//! let mut output = Vec::new();
//! program.run(&mut std::io::empty(), &mut output)?;
//! assert_eq!(output, b"A");
//! # Ok::<(), bf_jit::BfError>(())
//! ```

pub mod ast;
pub mod basic_block;
pub mod codegen;
pub mod debug_map;
pub mod error;
pub mod jit_io;
pub mod label;
mod interp;
pub mod optimize;
pub mod parser;
pub mod profiler;
pub mod report;
pub mod tape;

use std::io::{Read, Write};

use dynasmrt::{AssemblyOffset, ExecutableBuffer};

pub use crate::codegen::Safety;
pub use crate::error::{BfError, CompileError, ParseError, SystemError};

use crate::ast::Block;
use crate::codegen::{emit, EmitOptions, HostBackend};
use crate::debug_map::DebugMap;
use crate::jit_io::IoContext;
use crate::profiler::Profiler;
use crate::tape::{Tape, DEFAULT_TAPE_OFFSET, DEFAULT_TAPE_SIZE};

/// Options controlling how a `Program` is built and run.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub optimize: bool,
    pub safety: Safety,
    pub debug: bool,
    pub tape_size: usize,
    pub tape_offset: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            optimize: true,
            safety: Safety::Safe,
            debug: false,
            tape_size: DEFAULT_TAPE_SIZE,
            tape_offset: DEFAULT_TAPE_OFFSET,
        }
    }
}

/// A compiled Brainfuck program: an executable buffer, its entry offset, the
/// AST it was compiled from (kept alive for profiling/heat-map reporting),
/// and an optional debug map.
pub struct Program {
    buf: ExecutableBuffer,
    entry: AssemblyOffset,
    ast: Block,
    debug_map: Option<DebugMap>,
    options: CompileOptions,
}

type JitFn = unsafe extern "C" fn(*mut u8, *mut IoContext) -> i64;

/// Wall-clock time spent in each pipeline phase, returned by
/// `Program::compile_timed` for the CLI driver's `--timing` flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimings {
    pub parse_and_rewrite: std::time::Duration,
    pub optimize: std::time::Duration,
    pub emit: std::time::Duration,
}

impl Program {
    /// Parse, optionally optimize, and emit native code for `source`.
    pub fn compile(source: &str, options: &CompileOptions) -> Result<Program, BfError> {
        let (program, _) = Program::compile_timed(source, options)?;
        Ok(program)
    }

    /// Like `compile`, but also returns how long each phase took. Used by
    /// the `--timing` CLI flag; the public API otherwise has no reason to
    /// care about phase boundaries.
    pub fn compile_timed(
        source: &str,
        options: &CompileOptions,
    ) -> Result<(Program, PhaseTimings), BfError> {
        let t0 = std::time::Instant::now();
        let mut ast = parser::parse(source)?;
        basic_block::rewrite(&mut ast);
        let parse_and_rewrite = t0.elapsed();

        let t1 = std::time::Instant::now();
        if options.optimize {
            optimize::optimize(&mut ast);
        }
        let optimize_time = t1.elapsed();

        let t2 = std::time::Instant::now();
        let emit_opts = EmitOptions {
            safety: options.safety,
            debug: options.debug,
        };
        let (buf, entry, debug_map) = emit::<HostBackend>(&ast, &emit_opts)?;
        let emit_time = t2.elapsed();

        Ok((
            Program {
                buf,
                entry,
                ast,
                debug_map,
                options: options.clone(),
            },
            PhaseTimings {
                parse_and_rewrite,
                optimize: optimize_time,
                emit: emit_time,
            },
        ))
    }

    /// The raw bytes of the emitted native code, for `--debug` hex dumps.
    pub fn code_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn debug_map(&self) -> Option<&DebugMap> {
        self.debug_map.as_ref()
    }

    pub fn ast(&self) -> &Block {
        &self.ast
    }

    /// The `[code_start, code_end)` range of the compiled function, used by
    /// the profiler to discard samples landing outside it.
    fn code_range(&self) -> (usize, usize) {
        let start = self.buf.ptr(AssemblyOffset(0)) as usize;
        (start, start + self.buf.len())
    }

    fn entry_fn(&self) -> JitFn {
        let ptr = self.buf.ptr(self.entry);
        // SAFETY: `ptr` was produced by this program's own `emit` call,
        // whose prologue/epilogue establish exactly the `(tape, io_ctx) ->
        // i64` calling convention `JitFn` describes.
        unsafe { std::mem::transmute::<*const u8, JitFn>(ptr) }
    }

    /// Run the compiled program against a fresh tape, reading from `input`
    /// and writing to `output`. `.` writes one byte, `,` reads one byte and
    /// leaves the cell unchanged on EOF.
    pub fn run<R: Read, W: Write>(&self, input: &mut R, output: &mut W) -> Result<(), BfError> {
        let guarded = matches!(self.options.safety, Safety::Safe);
        let tape = Tape::new(self.options.tape_size, guarded)?;
        // SAFETY: `self.options.tape_offset` is within `tape_size` by
        // construction of a sane `CompileOptions`; the driver validates this
        // before calling `compile`/`run` with user-supplied values.
        let tape_ptr = unsafe { tape.cells_ptr().add(self.options.tape_offset) };

        let mut ctx = IoContext::new(input, output);
        let entry = self.entry_fn();

        // SAFETY: `tape_ptr` points into a live `Tape` held until `run`
        // returns; `&mut ctx` outlives the call by construction. The
        // compiled function only ever touches memory within the tape
        // (guarded or not, per `self.options.safety`) and the `IoContext`
        // through the trampolines in `jit_io`.
        unsafe {
            entry(tape_ptr, &mut ctx as *mut IoContext);
        }

        if let Some(err) = ctx.take_error() {
            return Err(BfError::Io(err));
        }
        Ok(())
    }

    /// Like `run`, but installs a sampling profiler for the duration of
    /// execution and returns it afterward so the caller can write folded
    /// stacks or a heat-map dump.
    pub fn run_profiled<R: Read, W: Write>(
        &self,
        input: &mut R,
        output: &mut W,
        rate_hz: u32,
    ) -> Result<Profiler, BfError> {
        let debug_map = self
            .debug_map
            .as_ref()
            .ok_or(SystemError::MissingDebugMap)?;

        let guarded = matches!(self.options.safety, Safety::Safe);
        let tape = Tape::new(self.options.tape_size, guarded)?;
        let tape_ptr = unsafe { tape.cells_ptr().add(self.options.tape_offset) };

        let mut ctx = IoContext::new(input, output);
        let entry = self.entry_fn();
        let code_range = self.code_range();

        // SAFETY: `debug_map`/`self.ast` outlive the profiler (both are
        // owned by `self`, which outlives this call); `stop` runs before
        // this function returns them to the caller for inspection.
        let mut profiler = unsafe { Profiler::start(code_range, debug_map, &self.ast, rate_hz)? };

        unsafe {
            entry(tape_ptr, &mut ctx as *mut IoContext);
        }
        profiler.stop();

        if let Some(err) = ctx.take_error() {
            return Err(BfError::Io(err));
        }
        Ok(profiler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_source(src: &str, input: &[u8]) -> Vec<u8> {
        let program = Program::compile(src, &CompileOptions::default()).unwrap();
        let mut cursor = std::io::Cursor::new(input.to_vec());
        let mut out = Vec::new();
        program.run(&mut cursor, &mut out).unwrap();
        out
    }

    // Six canonical end-to-end scenarios.

    #[test]
    fn scenario_1_prints_a() {
        assert_eq!(run_source("++++++++[>++++++++<-]>+.", b""), b"A");
    }

    #[test]
    fn scenario_2_echoes_input() {
        assert_eq!(run_source(",.", b"Z"), b"Z");
    }

    #[test]
    fn scenario_3_nested_multiplication_prints_tab() {
        assert_eq!(run_source("+++[>+++[>+<-]<-]>>.", b""), vec![9]);
    }

    #[test]
    fn scenario_4_clear_loop_then_set() {
        assert_eq!(run_source("+[-]+.", b""), vec![1]);
    }

    #[test]
    fn scenario_5_copy_loop_sums_two_inputs() {
        assert_eq!(run_source(",>,<[->+<]>.", b"\x03\x04"), vec![7]);
    }

    #[test]
    fn scenario_6_addition_via_copy_loop() {
        assert_eq!(run_source("++>+++<[->+<]>.", b""), vec![5]);
    }

    #[test]
    fn empty_source_runs_and_produces_no_output() {
        assert_eq!(run_source("", b""), Vec::<u8>::new());
    }

    #[test]
    fn all_comment_source_runs_and_produces_no_output() {
        assert_eq!(run_source("this is all just comments", b""), Vec::<u8>::new());
    }

    #[test]
    fn unoptimized_and_optimized_agree_on_scenario_3() {
        let src = "+++[>+++[>+<-]<-]>>.";
        let optimized = Program::compile(src, &CompileOptions::default()).unwrap();
        let unoptimized = Program::compile(
            src,
            &CompileOptions { optimize: false, ..CompileOptions::default() },
        )
        .unwrap();

        let mut out_a = Vec::new();
        optimized.run(&mut std::io::empty(), &mut out_a).unwrap();
        let mut out_b = Vec::new();
        unoptimized.run(&mut std::io::empty(), &mut out_b).unwrap();

        assert_eq!(out_a, out_b);
    }

    #[test]
    fn nesting_at_the_limit_compiles() {
        let src = format!("{}{}", "[".repeat(label::MAX_NESTING), "]".repeat(label::MAX_NESTING));
        assert!(Program::compile(&src, &CompileOptions::default()).is_ok());
    }

    #[test]
    fn nesting_over_the_limit_is_rejected() {
        let depth = label::MAX_NESTING + 1;
        let src = format!("{}{}", "[".repeat(depth), "]".repeat(depth));
        let err = Program::compile(&src, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, BfError::Compile(CompileError::TooManyNestedLoops { .. })));
    }

    // Regression: the loop-label pool used to be sized by max nesting depth
    // rather than total loop count, so two or more sibling loops at the same
    // depth could exhaust it even though nesting never got deep. Neither
    // loop body below is pointer-neutral, so the optimizer can't fold them
    // away and both reach emission as real `Loop` nodes.
    #[test]
    fn sequential_sibling_loops_compile_and_run() {
        assert_eq!(run_source("[>][>]+.", b""), vec![1]);
    }

    #[test]
    fn sequential_sibling_loops_execute_correctly() {
        assert_eq!(run_source("+++[->+>]+++[->+>]<.", b""), vec![1]);
    }

    #[test]
    fn unoptimized_and_optimized_agree_on_sequential_sibling_loops() {
        let src = "+++[->+>]+++[->+>]<.";
        let optimized = Program::compile(src, &CompileOptions::default()).unwrap();
        let unoptimized = Program::compile(
            src,
            &CompileOptions { optimize: false, ..CompileOptions::default() },
        )
        .unwrap();

        let mut out_a = Vec::new();
        optimized.run(&mut std::io::empty(), &mut out_a).unwrap();
        let mut out_b = Vec::new();
        unoptimized.run(&mut std::io::empty(), &mut out_b).unwrap();

        assert_eq!(out_a, out_b);
    }
}
