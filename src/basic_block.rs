//! Basic-block rewriter: coalesces pointer motion within each straight-line
//! segment into offsetted ops, leaving at most one trailing `Move` per
//! segment.
//!
//! A segment is a maximal run of non-`Loop` siblings; `Loop` nodes are
//! boundaries because a loop's iteration count is not known statically, so
//! the pointer displacement after it can't be folded into a compile-time
//! offset.

use crate::ast::{Block, Node};

/// Rewrite `block` in place, recursing into every loop body first.
///
/// Invariant established on return: within `block` (and within every nested
/// loop body, recursively), at most one `Move` remains per straight-line
/// segment, and it is the last node of that segment.
pub fn rewrite(block: &mut Block) {
    let mut offset: i64 = 0;
    let mut out = Block::with_capacity(block.len());

    for mut item in block.drain(..) {
        match &mut item.node {
            Node::Move(n) => {
                offset += *n;
            }
            Node::Loop(body) => {
                rewrite(body);
                flush(&mut out, offset, item.loc);
                offset = 0;
                out.push(item);
            }
            Node::Add { offset: off, .. }
            | Node::Set { offset: off, .. }
            | Node::Output { offset: off }
            | Node::Input { offset: off } => {
                *off += offset;
                out.push(item);
            }
            Node::Copy { src, dst } => {
                *src += offset;
                *dst += offset;
                out.push(item);
            }
            Node::Mul { src, dst, .. } => {
                *src += offset;
                *dst += offset;
                out.push(item);
            }
        }
    }

    flush(&mut out, offset, out.last().map(|n| n.loc).unwrap_or_default());

    *block = out;
}

fn flush(out: &mut Block, offset: i64, loc: crate::ast::Location) {
    if offset != 0 {
        out.push(crate::ast::AstNode::new(Node::Move(offset), loc));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn net_move(block: &Block) -> i64 {
        block
            .iter()
            .map(|n| match n.node {
                Node::Move(n) => n,
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn straight_line_collapses_to_offsets_and_trailing_move() {
        let mut block = parse(">>+<<.").unwrap();
        let original_net: i64 = block
            .iter()
            .map(|n| match n.node {
                Node::Move(n) => n,
                _ => 0,
            })
            .sum();

        rewrite(&mut block);

        // at most one Move, and it's the last node
        let move_count = block
            .iter()
            .filter(|n| matches!(n.node, Node::Move(_)))
            .count();
        assert!(move_count <= 1);
        if move_count == 1 {
            assert!(matches!(block.last().unwrap().node, Node::Move(_)));
        }
        assert_eq!(net_move(&block), original_net);
    }

    #[test]
    fn op_offsets_reflect_position_in_segment() {
        let mut block = parse(">+<").unwrap();
        rewrite(&mut block);
        // the '+' at offset +1 should have been rewritten in place
        let add = block.iter().find(|n| matches!(n.node, Node::Add { .. }));
        match add.unwrap().node {
            Node::Add { offset, .. } => assert_eq!(offset, 1),
            _ => unreachable!(),
        }
    }

    #[test]
    fn loop_boundaries_reset_offset_tracking() {
        let mut block = parse(">[>+<-]>.").unwrap();
        rewrite(&mut block);
        // there should be a Move(1) before the loop and a Move(1) after it,
        // not a single Move(2) spanning the loop.
        let moves: Vec<i64> = block
            .iter()
            .filter_map(|n| match n.node {
                Node::Move(n) => Some(n),
                _ => None,
            })
            .collect();
        assert_eq!(moves, vec![1, 1]);
    }

    fn assert_segment_invariant(block: &Block) {
        let move_count = block.iter().filter(|n| matches!(n.node, Node::Move(_))).count();
        assert!(move_count <= 1, "segment has {move_count} moves");
        if move_count == 1 {
            assert!(matches!(block.last().unwrap().node, Node::Move(_)));
        }
        for n in block {
            if let Node::Loop(body) = &n.node {
                assert_segment_invariant(body);
            }
        }
    }

    fn balanced_bf_source() -> impl proptest::strategy::Strategy<Value = String> {
        use proptest::strategy::Strategy;

        let leaf = proptest::collection::vec(
            proptest::sample::select(vec!['+', '-', '>', '<', '.', ',']),
            0..6,
        )
        .prop_map(|v| v.into_iter().collect::<String>());

        leaf.prop_recursive(3, 40, 6, |inner| {
            proptest::collection::vec(
                proptest::prop_oneof![inner.clone(), inner.clone().prop_map(|s| format!("[{s}]"))],
                0..4,
            )
            .prop_map(|v| v.concat())
        })
    }

    proptest::proptest! {
        #[test]
        fn basic_block_invariant_holds_at_every_nesting_level(src in balanced_bf_source()) {
            let mut block = parse(&src).unwrap();
            rewrite(&mut block);
            assert_segment_invariant(&block);
        }
    }
}
