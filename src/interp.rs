//! A safe, non-JIT tree-walking evaluator over the same `Node` tree the
//! optimizer and code emitter consume. Serves as the test oracle that proves
//! optimized output matches unoptimized output without needing a second,
//! independent implementation. `pub(crate)`: never a second execution mode
//! exposed to the CLI.

use std::io::{Read, Write};

use crate::ast::{Block, Node};

/// Run `block` against an in-memory tape of `tape_len` cells, starting the
/// pointer at `origin` within it. Mirrors the JIT's calling convention
/// closely enough to serve as its oracle, without any of the machine code.
pub(crate) fn run<R: Read, W: Write>(
    block: &Block,
    tape_len: usize,
    origin: usize,
    input: &mut R,
    output: &mut W,
) -> std::io::Result<Vec<u8>> {
    let mut tape = vec![0u8; tape_len];
    let mut ptr = origin as i64;
    exec_block(block, &mut tape, &mut ptr, input, output)?;
    Ok(tape)
}

fn exec_block<R: Read, W: Write>(
    block: &Block,
    tape: &mut [u8],
    ptr: &mut i64,
    input: &mut R,
    output: &mut W,
) -> std::io::Result<()> {
    for n in block {
        match &n.node {
            Node::Move(offset) => *ptr += offset,
            Node::Add { amount, offset } => {
                let idx = cell_index(*ptr, *offset);
                tape[idx] = tape[idx].wrapping_add(*amount);
            }
            Node::Set { value, offset } => {
                let idx = cell_index(*ptr, *offset);
                tape[idx] = *value;
            }
            Node::Output { offset } => {
                let idx = cell_index(*ptr, *offset);
                output.write_all(&[tape[idx]])?;
            }
            Node::Input { offset } => {
                let idx = cell_index(*ptr, *offset);
                let mut byte = [0u8; 1];
                // EOF leaves the cell unchanged.
                if input.read(&mut byte)? == 1 {
                    tape[idx] = byte[0];
                }
            }
            Node::Loop(body) => {
                while tape[cell_index(*ptr, 0)] != 0 {
                    exec_block(body, tape, ptr, input, output)?;
                }
            }
            Node::Copy { src, dst } => {
                let s = tape[cell_index(*ptr, *src)];
                let d = cell_index(*ptr, *dst);
                tape[d] = tape[d].wrapping_add(s);
            }
            Node::Mul { factor, src, dst } => {
                let s = tape[cell_index(*ptr, *src)];
                let d = cell_index(*ptr, *dst);
                tape[d] = tape[d].wrapping_add(factor.wrapping_mul(s));
            }
        }
    }
    Ok(())
}

fn cell_index(ptr: i64, offset: i64) -> usize {
    (ptr + offset) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic_block;
    use crate::optimize;
    use crate::parser::parse;
    use std::io::Cursor;

    fn eval(src: &str, input: &str) -> String {
        let mut block = parse(src).unwrap();
        let mut cursor = Cursor::new(input.as_bytes().to_vec());
        let mut out = Vec::new();
        run(&block, 4096, 2048, &mut cursor, &mut out).unwrap();
        let _ = &mut block; // keep unoptimized path distinct from optimized below
        String::from_utf8(out).unwrap()
    }

    fn eval_optimized(src: &str, input: &str) -> String {
        let mut block = parse(src).unwrap();
        basic_block::rewrite(&mut block);
        optimize::optimize(&mut block);
        let mut cursor = Cursor::new(input.as_bytes().to_vec());
        let mut out = Vec::new();
        run(&block, 4096, 2048, &mut cursor, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn scenario_one_prints_a() {
        assert_eq!(eval("++++++++[>++++++++<-]>+.", ""), "A");
        assert_eq!(eval_optimized("++++++++[>++++++++<-]>+.", ""), "A");
    }

    #[test]
    fn scenario_two_echoes_input() {
        assert_eq!(eval(",.", "Z"), "Z");
        assert_eq!(eval_optimized(",.", "Z"), "Z");
    }

    #[test]
    fn eof_leaves_cell_unchanged() {
        assert_eq!(eval("+,.", ""), "\x01");
        assert_eq!(eval_optimized("+,.", ""), "\x01");
    }

    #[test]
    fn optimized_and_unoptimized_agree_on_multiplication_loop() {
        let src = "+++[>+++[>+<-]<-]>>.";
        assert_eq!(eval(src, ""), eval_optimized(src, ""));
        assert_eq!(eval(src, "").as_bytes(), &[9]);
    }

    // Loop-free generator: guaranteed to terminate, so these properties can
    // run the real optimizer/basic-block pipeline without risking a runaway
    // BF program (a raw `while cell != 0` loop can easily never terminate
    // under random mutation; a loop-free body can't).
    fn loop_free_bf_source() -> impl proptest::strategy::Strategy<Value = String> {
        use proptest::strategy::Strategy;

        proptest::collection::vec(
            proptest::sample::select(vec!['+', '-', '>', '<', '.', ',']),
            0..40,
        )
        .prop_map(|v| v.into_iter().collect::<String>())
    }

    proptest::proptest! {
        // Optimized output must equal unoptimized output for any input.
        // Checked here against the tree-walking oracle on both sides, since
        // the actual JIT can't run in this harness; canonical loop shapes
        // (clear/copy/multiplication) are covered separately by the fixed
        // scenario tests above.
        #[test]
        fn optimized_and_unoptimized_agree_on_loop_free_programs(src in loop_free_bf_source()) {
            let out_plain = eval(&src, "");
            let out_optimized = eval_optimized(&src, "");
            proptest::prop_assert_eq!(out_plain, out_optimized);
        }

        // Cell-value arithmetic wraps mod 256 at every ADD/SET/MUL/COPY site.
        #[test]
        fn plus_minus_sequence_wraps_mod_256(pluses in 0u32..600, minuses in 0u32..600) {
            let src = format!("{}{}.", "+".repeat(pluses as usize), "-".repeat(minuses as usize));
            let expected = (pluses as i64 - minuses as i64).rem_euclid(256) as u8;
            let out = eval(&src, "");
            proptest::prop_assert_eq!(out.as_bytes()[0], expected);
        }
    }
}
