//! Reference CLI driver. Everything interesting lives in the `bf_jit`
//! library; this binary wires its public API to argv, a source file, and
//! stdio, and formats the one error message a failing run produces.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;

use bf_jit::{profiler, report, BfError, CompileOptions, Program, Safety};

/// An optimizing JIT compiler for Brainfuck.
#[derive(Parser, Debug)]
#[command(name = "bf-jit", version, about)]
struct Args {
    /// Path to the Brainfuck source file.
    source: PathBuf,

    /// Dump the optimized AST and emitted machine code to stderr.
    #[arg(long)]
    debug: bool,

    /// Disable the peephole and basic-block optimizer.
    #[arg(long)]
    no_optimize: bool,

    /// Print per-phase and execution timings to stderr.
    #[arg(long)]
    timing: bool,

    /// Skip tape guard pages; out-of-range access is undefined behavior.
    #[arg(long = "unsafe")]
    unsafe_mode: bool,

    /// Write folded-stack sampling-profiler output to this file.
    #[arg(long, value_name = "FILE")]
    profile: Option<PathBuf>,

    /// Tape size in bytes.
    #[arg(long, default_value_t = bf_jit::tape::DEFAULT_TAPE_SIZE)]
    memory: usize,

    /// Initial pointer offset from the tape base.
    #[arg(long = "memory-offset", default_value_t = bf_jit::tape::DEFAULT_TAPE_OFFSET)]
    memory_offset: usize,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(err) = run(args) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let source = fs::read_to_string(&args.source)
        .with_context(|| format!("reading source file {}", args.source.display()))?;

    let options = CompileOptions {
        optimize: !args.no_optimize,
        safety: if args.unsafe_mode { Safety::Unsafe } else { Safety::Safe },
        debug: args.debug || args.profile.is_some(),
        tape_size: args.memory,
        tape_offset: args.memory_offset,
    };

    let (program, timings) = Program::compile_timed(&source, &options)
        .with_context(|| format!("compiling {}", args.source.display()))?;

    if args.timing {
        eprintln!("parse+rewrite: {:?}", timings.parse_and_rewrite);
        eprintln!("optimize:      {:?}", timings.optimize);
        eprintln!("emit:          {:?}", timings.emit);
    }

    if args.debug {
        eprintln!("=== optimized AST ===");
        report::dump_ast(program.ast(), &mut io::stderr())?;
        eprintln!("=== machine code ({} bytes) ===", program.code_bytes().len());
        dump_hex(program.code_bytes(), &mut io::stderr())?;
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut input = stdin.lock();
    let mut output = stdout.lock();

    let exec_start = Instant::now();

    if let Some(profile_path) = &args.profile {
        run_profiled(&program, &mut input, &mut output, profile_path)?;
    } else {
        program.run(&mut input, &mut output).context("running compiled program")?;
    }

    if args.timing {
        eprintln!("execute:       {:?}", exec_start.elapsed());
    }

    if args.debug && args.profile.is_some() {
        eprintln!("=== heat map ===");
        report::write_heat_tree(program.ast(), &mut io::stderr())?;
    }

    Ok(())
}

/// Run `program` under the sampling profiler and write folded stacks to
/// `profile_path`. If the profiler fails to install (unsupported platform,
/// signal/timer setup failure), that's not fatal: log a warning and fall
/// back to an unprofiled run. This is safe here because
/// `Program::run_profiled` only reaches the point of actually executing the
/// compiled code *after* the profiler has been installed — a `SystemError`
/// always means stdin/stdout were never touched.
fn run_profiled<R: io::Read, W: Write>(
    program: &Program,
    input: &mut R,
    output: &mut W,
    profile_path: &PathBuf,
) -> anyhow::Result<()> {
    match program.run_profiled(input, output, profiler::DEFAULT_SAMPLE_RATE_HZ) {
        Ok(prof) => {
            log::info!("collected {} profiling samples", prof.total_samples());
            let mut file = fs::File::create(profile_path)
                .with_context(|| format!("creating profile output {}", profile_path.display()))?;
            profiler::write_folded_stacks(program.ast(), &mut file)
                .with_context(|| format!("writing folded stacks to {}", profile_path.display()))?;
            Ok(())
        }
        Err(BfError::System(e)) => {
            log::warn!("profiling unavailable ({e}); running without it");
            program.run(input, output).context("running compiled program")?;
            Ok(())
        }
        Err(e) => Err(e).context("running profiled program"),
    }
}

/// A classic offset/hex/nothing-fancy dump, good enough for eyeballing
/// `--debug` output; its exact column layout isn't a tested contract.
fn dump_hex<W: Write>(bytes: &[u8], out: &mut W) -> io::Result<()> {
    for (i, chunk) in bytes.chunks(16).enumerate() {
        write!(out, "{:08x}  ", i * 16)?;
        for b in chunk {
            write!(out, "{b:02x} ")?;
        }
        writeln!(out)?;
    }
    Ok(())
}
