//! Peephole optimizer: seven ordered rewrites, applied to a fixed point in a
//! repeat-until-no-change loop.
//!
//! Expects to run after `basic_block::rewrite`, so `Add`/`Set`/`Output`/
//! `Input` already carry their final offsets and a straight-line segment has
//! at most one trailing `Move`.

use crate::ast::{AstNode, Block, Node};

/// Optimize `block` in place to a fixed point: keep re-running the seven
/// rewrites until a full pass makes no further change.
pub fn optimize(block: &mut Block) {
    while optimize_once(block) {}
}

fn optimize_once(block: &mut Block) -> bool {
    let mut changed = false;

    changed |= run_length_merge(block);
    changed |= copy_loop_prerecursion(block);

    for item in block.iter_mut() {
        if let Node::Loop(body) = &mut item.node {
            changed |= optimize_once(body);
        }
    }

    changed |= clear_loop(block);
    changed |= multiplication_loop(block);
    changed |= offset_add_collapse(block);
    changed |= set_add_fuse(block);

    changed
}

/// Step 1: merge adjacent `Add`s at the same offset and adjacent `Move`s,
/// wrapping/summing as they combine. A merge that lands on `amount: 0` or
/// `Move(0)` is a no-op and is dropped, which is what lets three or more
/// ops in a row collapse in one pass rather than needing re-invocation.
fn run_length_merge(block: &mut Block) -> bool {
    let mut changed = false;
    let mut out = Block::with_capacity(block.len());

    for item in block.drain(..) {
        if let Some(last) = out.last_mut() {
            let merged = match (&mut last.node, &item.node) {
                (Node::Add { amount: a, offset: oa }, Node::Add { amount: b, offset: ob })
                    if *oa == *ob =>
                {
                    *a = a.wrapping_add(*b);
                    true
                }
                (Node::Move(a), Node::Move(b)) => {
                    *a += b;
                    true
                }
                _ => false,
            };
            if merged {
                changed = true;
                continue;
            }
        }
        out.push(item);
    }

    let before = out.len();
    out.retain(|n| !matches!(n.node, Node::Move(0) | Node::Add { amount: 0, .. }));
    changed |= out.len() != before;

    *block = out;
    changed
}

/// The exact two-offset shape of `[>+<-]` / `[-<+>]` after basic-block
/// rewrite has folded the intervening `Move`s into offsets: one `Add` at
/// offset 0 decrementing by 1 (the loop counter) and one `Add` at a nonzero
/// offset incrementing by 1 (the copy target), in either order.
fn match_copy_loop_shape(body: &Block) -> Option<i64> {
    if body.len() != 2 {
        return None;
    }
    match (&body[0].node, &body[1].node) {
        (Node::Add { amount: 1, offset: o }, Node::Add { amount: 255, offset: 0 })
        | (Node::Add { amount: 255, offset: 0 }, Node::Add { amount: 1, offset: o })
            if *o != 0 =>
        {
            Some(*o)
        }
        _ => None,
    }
}

/// Step 2: copy-loop, detected before the loop body is recursively
/// optimized so the raw two-op shape is still visible. Subsumed in the
/// general case by `multiplication_loop` (step 5), but spec'd as its own
/// early pass.
fn copy_loop_prerecursion(block: &mut Block) -> bool {
    let mut changed = false;
    let mut out = Block::with_capacity(block.len());

    for item in block.drain(..) {
        if let Node::Loop(body) = &item.node {
            if let Some(dst) = match_copy_loop_shape(body) {
                let loc = item.loc;
                out.push(AstNode::new(Node::Copy { src: 0, dst }, loc));
                out.push(AstNode::new(Node::Set { value: 0, offset: 0 }, loc));
                changed = true;
                continue;
            }
        }
        out.push(item);
    }

    *block = out;
    changed
}

/// Step 4: `[-]` clears the cell to 0 regardless of its starting value.
fn clear_loop(block: &mut Block) -> bool {
    let mut changed = false;
    for item in block.iter_mut() {
        if let Node::Loop(body) = &item.node {
            if body.len() == 1 && matches!(body[0].node, Node::Add { amount: 255, offset: 0 }) {
                item.node = Node::Set { value: 0, offset: 0 };
                changed = true;
            }
        }
    }
    changed
}

/// Returns `(offset, amount)` for every non-counter `Add` in `body`, in
/// order, if `body` is pointer-neutral and contains exactly one counter
/// decrement (`Add { amount: 255, offset: 0 }`) plus only other `Add`s.
/// Any other node kind (including a residual `Move`, meaning the body isn't
/// pointer-neutral) disqualifies the loop.
fn match_multiplication_loop_shape(body: &Block) -> Option<Vec<(i64, u8)>> {
    let mut has_counter = false;
    let mut targets = Vec::new();

    for n in body {
        match n.node {
            Node::Add { amount, offset: 0 } => {
                if has_counter || amount != 255 {
                    return None;
                }
                has_counter = true;
            }
            Node::Add { amount, offset } => targets.push((offset, amount)),
            _ => return None,
        }
    }

    if has_counter {
        Some(targets)
    } else {
        None
    }
}

/// Step 5: the general case of step 2 — any number of targets, any
/// multiplier. A target with multiplier 1 becomes `Copy`, anything else
/// becomes `Mul`; a target whose merged amount wrapped to 0 contributes no
/// instruction at all (adding 0 is a no-op) but doesn't disqualify the loop.
fn multiplication_loop(block: &mut Block) -> bool {
    let mut changed = false;
    let mut out = Block::with_capacity(block.len());

    for item in block.drain(..) {
        if let Node::Loop(body) = &item.node {
            if let Some(targets) = match_multiplication_loop_shape(body) {
                let loc = item.loc;
                for (offset, amount) in targets {
                    match amount {
                        0 => {}
                        1 => out.push(AstNode::new(Node::Copy { src: 0, dst: offset }, loc)),
                        factor => {
                            out.push(AstNode::new(Node::Mul { factor, src: 0, dst: offset }, loc))
                        }
                    }
                }
                out.push(AstNode::new(Node::Set { value: 0, offset: 0 }, loc));
                changed = true;
                continue;
            }
        }
        out.push(item);
    }

    *block = out;
    changed
}

/// Step 6: `Move(o); Add(v, 0); Move(-o)` collapses to `Add(v, o)`. A safety
/// net for shapes that reach the optimizer with explicit `Move`s still
/// present (e.g. inside a loop body before this pass has had a chance to
/// fold them via basic-block rewriting of a freshly spliced sequence).
fn offset_add_collapse(block: &mut Block) -> bool {
    let mut changed = false;
    let mut i = 0;

    while i + 2 < block.len() {
        let shape = match (&block[i].node, &block[i + 1].node, &block[i + 2].node) {
            (Node::Move(o1), Node::Add { amount, offset: 0 }, Node::Move(o2))
                if *o1 != 0 && *o2 == -*o1 =>
            {
                Some((*o1, *amount))
            }
            _ => None,
        };

        if let Some((offset, amount)) = shape {
            let loc = block[i + 1].loc;
            block.splice(i..i + 3, std::iter::once(AstNode::new(Node::Add { amount, offset }, loc)));
            changed = true;
        } else {
            i += 1;
        }
    }

    changed
}

/// Step 7: `Set(v, o); Add(a, o)` fuses to `Set(v.wrapping_add(a), o)` — the
/// add's starting value is always `v`, so there's no need to read the cell.
fn set_add_fuse(block: &mut Block) -> bool {
    let mut changed = false;
    let mut i = 0;

    while i + 1 < block.len() {
        let fused = match (&block[i].node, &block[i + 1].node) {
            (Node::Set { value, offset: so }, Node::Add { amount, offset: ao }) if so == ao => {
                Some(value.wrapping_add(*amount))
            }
            _ => None,
        };

        if let Some(value) = fused {
            if let Node::Set { value: v, .. } = &mut block[i].node {
                *v = value;
            }
            block.remove(i + 1);
            changed = true;
        } else {
            i += 1;
        }
    }

    changed
}
