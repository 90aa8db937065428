//! The code emitter: walks the optimized AST and emits native instructions
//! into a code buffer, owning label allocation and loop matching.
//! Architecture-specific lowering lives in `x86_64`/`aarch64`; this module
//! holds the `Backend` capability trait and the architecture-agnostic AST
//! walk that drives it.

pub mod aarch64;
pub mod x86_64;

use dynasmrt::{AssemblyOffset, DynamicLabel, ExecutableBuffer};

use crate::ast::{AstNode, Block, Node};
use crate::debug_map::DebugMap;
use crate::error::CompileError;
use crate::label::{count_loops, loop_label_capacity, max_nesting_depth, MAX_NESTING};

/// Whether the emitted program trusts the tape's guard pages as its only
/// safety net (default) or is told the tape may have none. This flag does
/// not change the instructions this module emits (no code here ever
/// branches on it) — it only tells the driver whether to allocate a guarded
/// or bare `Tape` (see `tape.rs`). It is threaded through anyway so the
/// emitted `Program` can record which mode compiled it, for `--debug` dumps.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Safety {
    Safe,
    Unsafe,
}

/// A capability set an architecture backend must provide. Every method
/// emits zero or more instructions into the backend's internal assembler.
pub trait Backend: Sized {
    /// Construct a fresh backend with `loop_capacity` loop labels and
    /// `misc_capacity` miscellaneous (branch/debug) labels preallocated.
    fn new(loop_capacity: usize, misc_capacity: usize) -> Result<Self, CompileError>;

    fn offset(&mut self) -> AssemblyOffset;
    fn new_label(&mut self) -> Result<DynamicLabel, CompileError>;
    fn bind(&mut self, label: DynamicLabel);

    fn prologue(&mut self);
    fn epilogue(&mut self);

    fn move_ptr(&mut self, n: i64);
    fn add_val(&mut self, amount: u8, offset: i64);
    fn set_const(&mut self, value: u8, offset: i64);
    fn output(&mut self, offset: i64);
    /// Emit a call to the input trampoline and, if it didn't return EOF,
    /// store the byte at `offset`. `eof_skip` is bound immediately after by
    /// the caller; `input` only needs to branch to it.
    fn input(&mut self, offset: i64, eof_skip: DynamicLabel);
    fn copy(&mut self, src: i64, dst: i64);
    fn mul(&mut self, factor: u8, src: i64, dst: i64);

    /// `if *ptr == 0 goto end`
    fn loop_test_zero(&mut self, end: DynamicLabel);
    /// `if *ptr != 0 goto start`
    fn loop_test_nonzero(&mut self, start: DynamicLabel);

    /// Consume the backend, producing the final executable buffer and the
    /// offset its entry point (the prologue) starts at.
    fn finalize(self, entry: AssemblyOffset) -> Result<(ExecutableBuffer, AssemblyOffset), CompileError>;
}

/// Everything `emit` needs besides the AST itself.
pub struct EmitOptions {
    pub safety: Safety,
    pub debug: bool,
}

/// Emit `block` with backend `B`, returning the linked/encoded buffer, the
/// offset of its entry point, and (if `opts.debug`) the populated debug map.
pub fn emit<B: Backend>(
    block: &Block,
    opts: &EmitOptions,
) -> Result<(ExecutableBuffer, AssemblyOffset, Option<DebugMap>), CompileError> {
    let nesting = max_nesting_depth(block);
    if nesting > MAX_NESTING {
        return Err(CompileError::TooManyNestedLoops {
            max: MAX_NESTING,
            requested: nesting,
        });
    }

    let loop_capacity = loop_label_capacity(count_loops(block).max(1));
    let input_count = count_inputs(block);
    let node_count = if opts.debug { AstNode::count_nodes(block) } else { 0 };
    // one misc label per Input (its EOF-skip branch) plus one per debug node
    // in case a future node kind needs a branch of its own during emission.
    let misc_capacity = input_count + node_count + 1;

    let mut backend = B::new(loop_capacity, misc_capacity)?;
    let mut debug_map = if opts.debug { Some(DebugMap::new()) } else { None };

    let entry = backend.offset();
    backend.prologue();
    walk(&mut backend, block, &mut debug_map)?;
    backend.epilogue();

    if let Some(map) = debug_map.as_mut() {
        map.finalize();
    }

    let (buf, start) = backend.finalize(entry)?;
    Ok((buf, start, debug_map))
}

fn count_inputs(block: &Block) -> usize {
    block
        .iter()
        .map(|n| match &n.node {
            Node::Input { .. } => 1,
            Node::Loop(body) => count_inputs(body),
            _ => 0,
        })
        .sum()
}

fn walk<B: Backend>(
    backend: &mut B,
    block: &Block,
    debug_map: &mut Option<DebugMap>,
) -> Result<(), CompileError> {
    for node in block {
        if let Some(map) = debug_map.as_mut() {
            let offset = backend.offset();
            map.push(
                offset,
                node.type_name(),
                node.loc.line,
                node.loc.column,
                describe(&node.node),
            );
        }

        match &node.node {
            Node::Move(n) => backend.move_ptr(*n),
            Node::Add { amount, offset } => backend.add_val(*amount, *offset),
            Node::Set { value, offset } => backend.set_const(*value, *offset),
            Node::Output { offset } => backend.output(*offset),
            Node::Input { offset } => {
                let skip = backend.new_label()?;
                backend.input(*offset, skip);
                backend.bind(skip);
            }
            Node::Copy { src, dst } => backend.copy(*src, *dst),
            Node::Mul { factor, src, dst } => backend.mul(*factor, *src, *dst),
            Node::Loop(body) => {
                let start = backend.new_label()?;
                let end = backend.new_label()?;
                backend.loop_test_zero(end);
                backend.bind(start);
                walk(backend, body, debug_map)?;
                backend.loop_test_nonzero(start);
                backend.bind(end);
            }
        }
    }
    Ok(())
}

/// Render a node's payload for `--debug` dumps and the debug map's
/// `node_data` field.
pub(crate) fn describe(node: &Node) -> String {
    match node {
        Node::Move(n) => format!("MOVE({n})"),
        Node::Add { amount, offset } => format!("ADD({amount}, off={offset})"),
        Node::Set { value, offset } => format!("SET({value}, off={offset})"),
        Node::Output { offset } => format!("OUTPUT(off={offset})"),
        Node::Input { offset } => format!("INPUT(off={offset})"),
        Node::Loop(_) => "LOOP".to_string(),
        Node::Copy { src, dst } => format!("COPY(src={src}, dst={dst})"),
        Node::Mul { factor, src, dst } => format!("MUL({factor}, src={src}, dst={dst})"),
    }
}

#[cfg(target_arch = "x86_64")]
pub type HostBackend = x86_64::X86Backend;

#[cfg(target_arch = "aarch64")]
pub type HostBackend = aarch64::Aarch64Backend;
