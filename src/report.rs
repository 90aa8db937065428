//! Human-facing dumps that aren't part of the compiler pipeline proper:
//! the `--debug` optimized-AST tree and the profiler's colored heat-map
//! tree view. Folded-stack output itself lives in `profiler.rs` as the
//! primary profiler artifact; this module is the CLI-only decoration on
//! top.

use std::io::{self, Write};

use colored::{Color, Colorize};

use crate::ast::{Block, Node};
use crate::codegen::describe;
use crate::profiler::{classify_heat, Heat};

/// Print `block` as an indented tree to `out`, one line per node, annotated
/// with the same `node_data` rendering the debug map uses. Used by
/// `--debug` to show the AST *after* optimization.
pub fn dump_ast<W: Write>(block: &Block, out: &mut W) -> io::Result<()> {
    dump_ast_indented(block, out, 0)
}

fn dump_ast_indented<W: Write>(block: &Block, out: &mut W, depth: usize) -> io::Result<()> {
    let pad = "  ".repeat(depth);
    for n in block {
        match &n.node {
            Node::Loop(body) => {
                writeln!(out, "{pad}LOOP @{}:{}", n.loc.line, n.loc.column)?;
                dump_ast_indented(body, out, depth + 1)?;
            }
            other => {
                writeln!(out, "{pad}{} @{}:{}", describe(other), n.loc.line, n.loc.column)?;
            }
        }
    }
    Ok(())
}

/// Print `block` as an indented tree, each non-`Loop` node prefixed with a
/// colored HOT/WARM/COOL/LOW tag scaled against the maximum sample count
/// anywhere in the tree. `Loop` nodes carry no direct samples of their own
/// (profiling attributes samples to the node whose location was resolved,
/// never to the enclosing loop header) so they're printed uncolored, as
/// pure structure.
pub fn write_heat_tree<W: Write>(block: &Block, out: &mut W) -> io::Result<()> {
    let max = max_samples(block);
    write_heat_tree_indented(block, out, 0, max)
}

fn max_samples(block: &Block) -> u64 {
    block
        .iter()
        .map(|n| match &n.node {
            Node::Loop(body) => max_samples(body),
            _ => n.profile_samples.get(),
        })
        .max()
        .unwrap_or(0)
}

fn write_heat_tree_indented<W: Write>(
    block: &Block,
    out: &mut W,
    depth: usize,
    max: u64,
) -> io::Result<()> {
    let pad = "  ".repeat(depth);
    for n in block {
        match &n.node {
            Node::Loop(body) => {
                writeln!(out, "{pad}LOOP @{}:{}", n.loc.line, n.loc.column)?;
                write_heat_tree_indented(body, out, depth + 1, max)?;
            }
            other => {
                let samples = n.profile_samples.get();
                let heat = classify_heat(samples, max);
                let tag = heat_tag(heat);
                writeln!(
                    out,
                    "{pad}{} {} @{}:{} ({samples} samples)",
                    tag,
                    describe(other),
                    n.loc.line,
                    n.loc.column,
                )?;
            }
        }
    }
    Ok(())
}

fn heat_tag(heat: Heat) -> colored::ColoredString {
    match heat {
        Heat::Hot => "[HOT]".color(Color::Red).bold(),
        Heat::Warm => "[WARM]".color(Color::Yellow),
        Heat::Cool => "[COOL]".color(Color::Cyan),
        Heat::Low => "[LOW]".color(Color::BrightBlack),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn dump_ast_renders_one_line_per_node() {
        let block = parse("+>.").unwrap();
        let mut out = Vec::new();
        dump_ast(&block, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn dump_ast_indents_loop_bodies() {
        let block = parse("+[-]").unwrap();
        let mut out = Vec::new();
        dump_ast(&block, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let loop_line = text.lines().find(|l| l.contains("LOOP")).unwrap();
        let body_line = text.lines().find(|l| l.contains("SET")).unwrap();
        assert!(!loop_line.starts_with(' '));
        assert!(body_line.starts_with("  "));
    }

    #[test]
    fn heat_tree_marks_the_busiest_node_hot() {
        let block = parse("+.").unwrap();
        block[0].profile_samples.set(10);
        block[1].profile_samples.set(1);
        let mut out = Vec::new();
        write_heat_tree(&block, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let add_line = text.lines().find(|l| l.contains("ADD")).unwrap();
        assert!(add_line.contains("HOT"));
    }
}
