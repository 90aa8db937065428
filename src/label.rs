//! Label allocation for the code emitter.
//!
//! Each `Loop` consumes two labels (start, end) from a flat pool reserved up
//! front, sized to the total number of `Loop` nodes in the program, plus one
//! more per AST node for debug labels when a debug map is attached. The whole
//! pool is allocated before emission starts and handed out from it in order,
//! by each backend calling `LabelPool::new_from` with its own assembler's
//! `new_dynamic_label`.

use dynasmrt::DynamicLabel;

use crate::error::CompileError;

/// Maximum loop nesting depth a program may use.
pub const MAX_NESTING: usize = 1000;

/// A preallocated pool of `DynamicLabel`s, handed out in order.
pub struct LabelPool {
    labels: Vec<DynamicLabel>,
    next: usize,
}

impl LabelPool {
    /// Build a pool of `capacity` labels by calling `alloc` (typically
    /// `|| assembler.new_dynamic_label()`) once per slot.
    pub fn new_from<F: FnMut() -> DynamicLabel>(capacity: usize, mut alloc: F) -> Self {
        let labels = (0..capacity).map(|_| alloc()).collect();
        LabelPool { labels, next: 0 }
    }

    /// Take the next label from the pool, or `TooManyNestedLoops` if the
    /// reserved capacity is exhausted.
    pub fn take(&mut self) -> Result<DynamicLabel, CompileError> {
        let label = self.labels.get(self.next).copied().ok_or_else(|| {
            CompileError::TooManyNestedLoops {
                max: self.labels.len(),
                requested: self.next + 1,
            }
        })?;
        self.next += 1;
        Ok(label)
    }

    pub fn remaining(&self) -> usize {
        self.labels.len() - self.next
    }
}

/// The number of loop labels to reserve for a program containing `count`
/// `Loop` nodes in total (two labels, start and end, per loop).
pub fn loop_label_capacity(count: usize) -> usize {
    count * 2
}

/// Walk `block` to find the deepest loop nesting it contains, used to reject
/// programs over `MAX_NESTING` before emission starts.
pub fn max_nesting_depth(block: &[crate::ast::AstNode]) -> usize {
    block
        .iter()
        .map(|n| match &n.node {
            crate::ast::Node::Loop(body) => 1 + max_nesting_depth(body),
            _ => 0,
        })
        .max()
        .unwrap_or(0)
}

/// Count every `Loop` node in `block`, at any depth, siblings included. Used
/// to size the loop-label pool before emission: a program with many
/// sequential loops needs just as many labels as one equally deep but
/// single-threaded, even though its nesting depth is much smaller.
pub fn count_loops(block: &[crate::ast::AstNode]) -> usize {
    block
        .iter()
        .map(|n| match &n.node {
            crate::ast::Node::Loop(body) => 1 + count_loops(body),
            _ => 0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_label_capacity_is_two_per_loop() {
        assert_eq!(loop_label_capacity(MAX_NESTING), MAX_NESTING * 2);
    }

    #[test]
    fn max_nesting_depth_counts_levels_not_siblings() {
        use crate::parser::parse;
        let block = parse("+[+][+[+]]").unwrap();
        assert_eq!(max_nesting_depth(&block), 2);
    }

    #[test]
    fn count_loops_counts_every_loop_node_not_just_the_deepest_chain() {
        use crate::parser::parse;
        let block = parse("+[+][+[+]]").unwrap();
        assert_eq!(count_loops(&block), 3);
    }
}
