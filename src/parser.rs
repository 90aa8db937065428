//! A tokenizer over the eight meaningful characters with 1-based line/column
//! tracking.

use crate::ast::{AstNode, Block, Location, Node};
use crate::error::ParseError;

/// Parse raw Brainfuck source into a `Block`.
///
/// Every character outside `{ > < + - . , [ ] }` is a comment and ignored.
/// `]` with no matching `[` is `ParseError::UnmatchedClose`; unterminated
/// `[` at end of input is `ParseError::UnmatchedOpen`.
pub fn parse(source: &str) -> Result<Block, ParseError> {
    let mut stack: Vec<(Block, Location)> = Vec::new();
    let mut top: Block = Vec::new();

    let mut line: u32 = 1;
    let mut column: u32 = 1;

    for ch in source.chars() {
        let loc = Location { line, column };

        match ch {
            '>' => top.push(AstNode::new(Node::Move(1), loc)),
            '<' => top.push(AstNode::new(Node::Move(-1), loc)),
            '+' => top.push(AstNode::new(Node::Add { amount: 1, offset: 0 }, loc)),
            '-' => top.push(AstNode::new(Node::Add { amount: 0u8.wrapping_sub(1), offset: 0 }, loc)),
            '.' => top.push(AstNode::new(Node::Output { offset: 0 }, loc)),
            ',' => top.push(AstNode::new(Node::Input { offset: 0 }, loc)),
            '[' => {
                stack.push((top, loc));
                top = Vec::new();
            }
            ']' => {
                let (mut parent, start_loc) = stack.pop().ok_or(ParseError::UnmatchedClose {
                    line,
                    column,
                })?;
                parent.push(AstNode::new(Node::Loop(top), start_loc));
                top = parent;
            }
            _ => {}
        }

        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }

    if let Some((_, start_loc)) = stack.last() {
        return Err(ParseError::UnmatchedOpen {
            line: start_loc.line,
            column: start_loc.column,
        });
    }

    Ok(top)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Node;

    #[test]
    fn ignores_comments() {
        let block = parse("hello + world").unwrap();
        assert_eq!(block.len(), 1);
        assert!(matches!(block[0].node, Node::Add { amount: 1, offset: 0 }));
    }

    #[test]
    fn minus_wraps_to_255() {
        let block = parse("-").unwrap();
        assert!(matches!(block[0].node, Node::Add { amount: 255, offset: 0 }));
    }

    #[test]
    fn empty_source_is_empty_block() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("this is all comments").unwrap().is_empty());
    }

    #[test]
    fn nested_loops_parse() {
        let block = parse("+[>+[-]<-]").unwrap();
        assert_eq!(block.len(), 2);
        assert!(matches!(block[1].node, Node::Loop(_)));
        if let Node::Loop(body) = &block[1].node {
            assert_eq!(body.len(), 3);
            assert!(matches!(body[1].node, Node::Loop(_)));
        }
    }

    #[test]
    fn unmatched_close_is_an_error() {
        assert!(matches!(
            parse("]"),
            Err(ParseError::UnmatchedClose { line: 1, column: 1 })
        ));
    }

    #[test]
    fn unmatched_open_is_an_error() {
        assert!(matches!(
            parse("[[]"),
            Err(ParseError::UnmatchedOpen { line: 1, column: 1 })
        ));
    }

    #[test]
    fn tracks_line_and_column_across_newlines() {
        let block = parse("+\n+").unwrap();
        assert_eq!(block[0].loc, Location { line: 1, column: 1 });
        assert_eq!(block[1].loc, Location { line: 2, column: 1 });
    }
}
