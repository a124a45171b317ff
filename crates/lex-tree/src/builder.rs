//! Fills a [`Tree`] from a flattened lex event stream, replaying each
//! [`StackOp`] as a context push/pop in lockstep with the lexer.

use lex_error::Result;
use lex_lexer::{LexedItem, LexerState, LexStream, StackOp};
use lex_rule::TokenPiece;

use crate::{NodeId, Tree};

/// Drives a [`LexStream`] to completion, building the [`Tree`] it
/// describes.
pub struct TreeBuilder {
    tree: Tree,
    stack: Vec<NodeId>,
}

impl TreeBuilder {
    /// Parse `text` from the given lexer state, building a whole tree.
    pub fn build(text: &str, state: LexerState) -> Result<Tree> {
        Self::build_from_stream(LexStream::new(text, state))
    }

    fn build_from_stream(mut stream: LexStream<'_>) -> Result<Tree> {
        let root_lexicon = stream.state().top().clone();
        let tree = Tree::new(root_lexicon);
        let root = tree.root();
        let mut builder = TreeBuilder { tree, stack: vec![root] };
        while let Some(item) = stream.next() {
            builder.apply(item?);
        }
        builder.finish()
    }

    fn top(&self) -> NodeId {
        self.stack.last().copied().unwrap_or_else(|| self.tree.root())
    }

    fn apply(&mut self, item: LexedItem) {
        match item {
            LexedItem::Token(piece) => {
                self.push_piece(piece);
            }
            LexedItem::Group(pieces) => {
                let triples: Vec<_> = pieces.into_iter().map(|p| (p.start, p.end, p.action)).collect();
                self.tree.push_group(self.top(), &triples);
            }
            LexedItem::StackOp(StackOp::Push(lexicon)) => {
                let context = self.tree.push_child_context(self.top(), lexicon);
                self.stack.push(context);
            }
            LexedItem::StackOp(StackOp::Pop) => {
                if self.stack.len() > 1 {
                    if let Some(leaving) = self.stack.pop() {
                        self.tree.pop(leaving);
                    }
                }
            }
        }
    }

    fn push_piece(&mut self, piece: TokenPiece) {
        self.tree.push_token(self.top(), piece.start, piece.end, piece.action);
    }

    fn finish(mut self) -> Result<Tree> {
        let top = self.top();
        self.tree.unwind(top);
        Ok(self.tree)
    }
}
