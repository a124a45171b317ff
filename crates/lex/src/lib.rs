//! Incremental, pattern-based text lexer.
//!
//! Text plus a root lexicon goes in; a persistent [`tree::Tree`] of tokens
//! and nested contexts comes out. Edits are applied with
//! [`Document::modify`], which re-lexes only the text an edit actually
//! touched and splices the untouched tail back onto the result. A
//! [`Transformer`] walks the finished tree bottom-up, turning it into a
//! language-specific value.
//!
//! This crate is a thin facade: it re-exports the pieces built up across
//! the workspace's lower-level crates (regex/word-list optimization,
//! rule and action types, the lexicon engine, the lexer state machine,
//! the tree and its incremental updater, and the transformer) so that a
//! caller depends on one crate instead of nine.

#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

pub use lex_action::Action;
pub use lex_error::{LexError, Result};
pub use lex_incremental::{Document, ModifyStats};
pub use lex_lexer::{EngineLimits, LexStream, LexedItem, LexerState, StackOp};
pub use lex_lexicon::{Lexicon, LexiconArg, RulesFn};
pub use lex_rule::{
    by_match, by_text, bygroups, if_group, if_member_of, resolve_items, resolve_one, DynamicRule,
    LexEvent, LexiconRef, Pattern, Rule, RuleAction, RuleHead, RuleItem, TargetItem, TokenPiece,
};
pub use lex_transform::{Event, EventBus, Item, TransformFn, Transformer};
pub use lex_tree::{NodeId, Tree, TreeBuilder};

/// Rule DSL: a word-list pattern, optionally wrapped in a fixed prefix and
/// suffix (e.g. a keyword list anchored to word boundaries).
pub fn words(words: impl IntoIterator<Item = impl Into<String>>) -> Pattern {
    Pattern::words(words)
}

/// Rule DSL: a word-list pattern with an explicit prefix/suffix, as
/// `words`, but without relying on the caller to concatenate regex
/// fragments by hand.
pub fn words_with_affixes(
    words: impl IntoIterator<Item = impl Into<String>>,
    prefix: impl Into<String>,
    suffix: impl Into<String>,
) -> Pattern {
    Pattern::words_with_affixes(words, prefix, suffix)
}

/// Rule DSL: a character-class pattern.
pub fn char_class(chars: impl IntoIterator<Item = char>) -> Pattern {
    Pattern::char_class(chars)
}

/// Rule DSL: the negated form of [`char_class`].
pub fn negated_char_class(chars: impl IntoIterator<Item = char>) -> Pattern {
    Pattern::negated_char_class(chars)
}

/// Rule DSL: the `DEFAULT_ACTION` sentinel rule, filling the gaps between
/// a lexicon's other matches.
pub fn default_action(action: RuleAction) -> Rule {
    Rule::default_action(action)
}

/// Rule DSL: the `DEFAULT_TARGET` sentinel rule, taken when nothing else
/// matches at the current position.
pub fn default_target(target: Vec<RuleItem<TargetItem>>) -> Rule {
    Rule::default_target(target)
}

/// Build a document from `root_lexicon` and `text`, transform it in one
/// pass, and discard the intermediate tree. For callers that only need
/// the transformed value and never plan to edit the text afterwards.
pub fn transform_text<V: Clone>(
    root_lexicon: std::sync::Arc<dyn LexiconRef>,
    text: impl Into<String>,
    transformer: &Transformer<V>,
) -> Result<Option<V>> {
    let document = Document::with_text(root_lexicon, text)?;
    Ok(transformer.transform_tree(document.tree()))
}
