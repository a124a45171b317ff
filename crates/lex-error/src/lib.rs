//! Shared error types for lexicon compilation, lexing and incremental update.
//!
//! Every fallible operation in the lexer/tree/incremental-update pipeline
//! reports through [`LexError`]. Nothing at this layer is retried; callers
//! decide how to recover (the incremental updater's own "fall back to a
//! full re-lex" path is not modeled as an error, see `lex-incremental`).

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, LexError>;

/// Errors surfaced by lexicon compilation, lexing, and tree building.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LexError {
    /// A lexicon's rule function yielded both `DEFAULT_ACTION` and
    /// `DEFAULT_TARGET` (or some other structurally invalid combination).
    #[error("lexicon '{lexicon}' has an invalid rule set: {detail}")]
    InvalidRule { lexicon: String, detail: String },

    /// A rule's pattern failed to compile as a regular expression.
    #[error("pattern {pattern:?} in lexicon '{lexicon}' failed to compile: {reason}")]
    PatternCompile { lexicon: String, pattern: String, reason: String },

    /// A default-target lexicon made no progress (zero-width match loop).
    #[error("lexicon '{lexicon}' made no progress at position {pos}")]
    NoProgress { lexicon: String, pos: usize },

    /// The lexicon stack would exceed the configured push-depth limit.
    #[error("lexicon stack exceeded the configured depth limit ({limit}) at position {pos}")]
    StackOverflow { limit: usize, pos: usize },

    /// A text position or byte range was outside the bounds of the document.
    #[error("position {pos} is out of bounds for a document of length {len}")]
    OutOfBounds { pos: usize, len: usize },
}
