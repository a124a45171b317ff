//! The lexicon-stack state machine: turns one lexicon's `parse()` plus
//! push/pop/jump targets into a single flat stream over a whole
//! document, per the loop described for the original state machine:
//! ask the top lexicon to parse, apply whatever target it yields, and
//! continue from the new top at the same position.

#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

use std::collections::VecDeque;
use std::sync::Arc;

use lex_error::{LexError, Result};
pub use lex_rule::{LexEvent, TokenPiece};
use lex_rule::{LexiconRef, TargetItem};

/// Resource limits the state machine enforces on top of a lexicon's own
/// rules; these guard against pathological (or adversarial) grammars
/// rather than model anything the rules themselves express.
#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    /// Refuse to push past this many lexicons on the stack.
    pub max_stack_depth: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        EngineLimits { max_stack_depth: 1024 }
    }
}

/// One step of how the lexicon stack changed while producing a target's
/// effect; replayed by a tree builder to open or close contexts in
/// lockstep with the lexer.
#[derive(Debug, Clone)]
pub enum StackOp {
    Push(Arc<dyn LexiconRef>),
    Pop,
}

/// The non-empty stack of active lexicons driving one parse. The root
/// is held separately from the rest so that "never pop below root" is
/// a structural invariant rather than a runtime check.
pub struct LexerState {
    root: Arc<dyn LexiconRef>,
    rest: Vec<Arc<dyn LexiconRef>>,
    limits: EngineLimits,
}

impl LexerState {
    pub fn new(root: Arc<dyn LexiconRef>) -> Self {
        Self::with_limits(root, EngineLimits::default())
    }

    pub fn with_limits(root: Arc<dyn LexiconRef>, limits: EngineLimits) -> Self {
        LexerState { root, rest: Vec::new(), limits }
    }

    /// Rebuild a state from a previously captured ancestor stack (the
    /// incremental updater's resume point). `ancestors` excludes the
    /// root, bottom-to-top, exactly as returned by [`LexerState::stack`].
    pub fn from_ancestors(root: Arc<dyn LexiconRef>, ancestors: Vec<Arc<dyn LexiconRef>>, limits: EngineLimits) -> Self {
        LexerState { root, rest: ancestors, limits }
    }

    /// The currently active lexicon.
    pub fn top(&self) -> &Arc<dyn LexiconRef> {
        self.rest.last().unwrap_or(&self.root)
    }

    /// The full stack, root first.
    pub fn stack(&self) -> Vec<Arc<dyn LexiconRef>> {
        std::iter::once(Arc::clone(&self.root)).chain(self.rest.iter().cloned()).collect()
    }

    pub fn depth(&self) -> usize {
        1 + self.rest.len()
    }

    /// Two stacks "match" when they hold the same sequence of lexicons
    /// by identity, ignoring derivative arguments — the reconvergence
    /// test an incremental re-lex uses to decide whether a splice point
    /// is safe.
    pub fn state_matches(&self, other: &LexerState) -> bool {
        let a = self.stack();
        let b = other.stack();
        a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| x.ref_eq(y.as_ref()))
    }

    /// Apply one event's target, mutating the stack and returning the
    /// ordered sequence of pushes/pops a tree builder should replay.
    pub fn apply_target(&mut self, items: &[TargetItem], pos: usize) -> Result<Vec<StackOp>> {
        let mut ops = Vec::new();
        for item in items {
            match item {
                TargetItem::Delta(n) if *n < 0 => {
                    let mut remaining = n.unsigned_abs() as usize;
                    while remaining > 0 && !self.rest.is_empty() {
                        self.rest.pop();
                        ops.push(StackOp::Pop);
                        remaining -= 1;
                    }
                }
                TargetItem::Delta(n) if *n > 0 => {
                    let current = Arc::clone(self.top());
                    for _ in 0..*n {
                        self.push(Arc::clone(&current), pos, &mut ops)?;
                    }
                }
                TargetItem::Delta(_) => {}
                TargetItem::Push(lexicon) => {
                    self.push(Arc::clone(lexicon), pos, &mut ops)?;
                }
            }
        }
        Ok(ops)
    }

    fn push(&mut self, lexicon: Arc<dyn LexiconRef>, pos: usize, ops: &mut Vec<StackOp>) -> Result<()> {
        if self.depth() >= self.limits.max_stack_depth {
            return Err(LexError::StackOverflow { limit: self.limits.max_stack_depth, pos });
        }
        self.rest.push(Arc::clone(&lexicon));
        ops.push(StackOp::Push(lexicon));
        Ok(())
    }
}

/// One item of the flattened lex stream: a single token, a group of
/// tokens sharing one match (subgroup dispatch), or a stack transition
/// to replay against a parallel tree/context stack.
#[derive(Debug, Clone)]
pub enum LexedItem {
    Token(TokenPiece),
    Group(Vec<TokenPiece>),
    StackOp(StackOp),
}

/// Drives [`LexerState`] over a whole document, yielding one flat
/// stream of [`LexedItem`]s. Each call to the top lexicon's `parse`
/// returns a batch of events (ending at the first target or at the end
/// of the text); this iterator unpacks that batch, applies any target
/// it carries, and re-queries the new top lexicon from the same
/// position, exactly as prescribed for the event loop.
pub struct LexStream<'t> {
    text: &'t str,
    pos: usize,
    state: LexerState,
    buffer: VecDeque<LexedItem>,
    done: bool,
}

impl<'t> LexStream<'t> {
    pub fn new(text: &'t str, state: LexerState) -> Self {
        LexStream::from_pos(text, 0, state)
    }

    /// Start the stream at an arbitrary position (the incremental
    /// updater resumes mid-document this way).
    pub fn from_pos(text: &'t str, pos: usize, state: LexerState) -> Self {
        LexStream { text, pos, state, buffer: VecDeque::new(), done: false }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn state(&self) -> &LexerState {
        &self.state
    }

    fn fill(&mut self) -> Result<()> {
        if !self.buffer.is_empty() || self.done {
            return Ok(());
        }
        let top = Arc::clone(self.state.top());
        let events = top.parse(self.text, self.pos)?;
        if events.is_empty() {
            self.done = true;
            return Ok(());
        }
        for event in events {
            match event.pieces.len() {
                0 => {}
                1 => {
                    let piece = event.pieces[0].clone();
                    self.pos = piece.end;
                    self.buffer.push_back(LexedItem::Token(piece));
                }
                _ => {
                    if let Some(last) = event.pieces.last() {
                        self.pos = last.end;
                    }
                    self.buffer.push_back(LexedItem::Group(event.pieces));
                }
            }
            if let Some(target) = &event.target {
                let ops = self.state.apply_target(target, self.pos)?;
                self.buffer.extend(ops.into_iter().map(LexedItem::StackOp));
            }
        }
        Ok(())
    }
}

impl Iterator for LexStream<'_> {
    type Item = Result<LexedItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if self.done {
                return None;
            }
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
