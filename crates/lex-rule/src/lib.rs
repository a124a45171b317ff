//! Patterns, rules and dynamic rule items used to define a lexicon.
//!
//! A [`Rule`] pairs a [`Pattern`] with a [`RuleAction`] and a target
//! (a sequence of [`TargetItem`]s describing how the lexicon stack
//! changes after the match). Both the action and the target may be
//! resolved dynamically against the winning match, via [`RuleItem`]s
//! that expand into a concrete list of leaves once the text and
//! capture groups are known.

#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

use std::collections::HashSet;
use std::sync::Arc;

use lex_action::Action;
use lex_error::Result;

/// One token's span and action within a lex event. For an ordinary match
/// this is the whole match; for a subgroup-dispatch match, one event
/// carries several pieces, one per trailing capture group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPiece {
    pub start: usize,
    pub end: usize,
    pub action: Action,
}

/// One emission from a lexicon's `parse`: zero or more token pieces
/// (more than one only for subgroup dispatch), and an optional target
/// describing how the lexicon stack should change afterwards.
#[derive(Debug, Clone, Default)]
pub struct LexEvent {
    pub pieces: Vec<TokenPiece>,
    pub target: Option<Vec<TargetItem>>,
}

impl LexEvent {
    pub fn has_target(&self) -> bool {
        self.target.is_some()
    }
}

/// Something a rule's target may push: an opaque, parseable handle to a
/// lexicon.
///
/// `lex-lexicon` implements this for its own `Lexicon` type. The trait
/// lives here, one layer below, so a rule's target can reference a
/// lexicon before that lexicon (which is itself built *from* rules)
/// exists as a concrete type — the same knot the two mutually
/// referential Python classes tie, resolved here via a trait object
/// instead of a reference cycle. Because `parse` lives on the trait
/// itself, a [`TargetItem::Push`] payload is fully self-sufficient: the
/// lexer state machine never needs to downcast it back to a concrete
/// type.
pub trait LexiconRef: std::fmt::Debug + Send + Sync {
    /// The lexicon's name, used in error messages and transform dispatch.
    fn name(&self) -> &str;

    /// A stable identity value shared by a lexicon and all of its
    /// derivatives (a derivative's identity is its base's).
    fn identity(&self) -> usize;

    /// Identity comparison that ignores a derivative's argument: a
    /// derivative lexicon compares equal to its base.
    fn ref_eq(&self, other: &dyn LexiconRef) -> bool {
        self.identity() == other.identity()
    }

    /// Parse from `pos`, returning every event up to and including the
    /// first one carrying a target, or through the rest of `text` if
    /// none does.
    fn parse(&self, text: &str, pos: usize) -> Result<Vec<LexEvent>>;
}

/// A regular-expression source, or a higher-level builder for one.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// A pattern that is already a regular expression.
    Regex(String),
    /// A plain literal string, matched without regex metacharacter
    /// interpretation (escaped internally when built into the master
    /// regex).
    Literal(String),
    /// An optimized alternation built from a word list.
    Words {
        words: Vec<String>,
        prefix: String,
        suffix: String,
    },
    /// A character class (or its negation).
    CharClass { chars: Vec<char>, positive: bool },
}

impl Pattern {
    pub fn regex(source: impl Into<String>) -> Self {
        Pattern::Regex(source.into())
    }

    pub fn literal(text: impl Into<String>) -> Self {
        Pattern::Literal(text.into())
    }

    pub fn words(words: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Pattern::Words { words: words.into_iter().map(Into::into).collect(), prefix: String::new(), suffix: String::new() }
    }

    pub fn words_with_affixes(
        words: impl IntoIterator<Item = impl Into<String>>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        Pattern::Words {
            words: words.into_iter().map(Into::into).collect(),
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn char_class(chars: impl IntoIterator<Item = char>) -> Self {
        Pattern::CharClass { chars: chars.into_iter().collect(), positive: true }
    }

    pub fn negated_char_class(chars: impl IntoIterator<Item = char>) -> Self {
        Pattern::CharClass { chars: chars.into_iter().collect(), positive: false }
    }

    /// Render this pattern to a regular-expression source string.
    pub fn source(&self) -> String {
        match self {
            Pattern::Regex(s) => s.clone(),
            Pattern::Literal(s) => lex_regex::escape(s),
            Pattern::Words { words, prefix, suffix } => {
                let expr = lex_regex::words2regexp(words);
                if prefix.is_empty() && suffix.is_empty() {
                    expr
                } else {
                    format!("{prefix}(?:{expr}){suffix}")
                }
            }
            Pattern::CharClass { chars, positive } => {
                let negate = if *positive { "" } else { "^" };
                format!("[{negate}{}]", lex_regex::make_charclass(chars))
            }
        }
    }
}

/// One element of an action or target list: either a fixed leaf value,
/// or a predicate that picks one of several branches once the match is
/// known. A chosen branch is itself a list of items, so resolution
/// recurses until every item is [`RuleItem::Fixed`].
pub enum RuleItem<L> {
    Fixed(L),
    Dynamic(Arc<dyn DynamicRule<L>>),
}

impl<L> Clone for RuleItem<L>
where
    L: Clone,
{
    fn clone(&self) -> Self {
        match self {
            RuleItem::Fixed(l) => RuleItem::Fixed(l.clone()),
            RuleItem::Dynamic(d) => RuleItem::Dynamic(Arc::clone(d)),
        }
    }
}

impl<L: std::fmt::Debug> std::fmt::Debug for RuleItem<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleItem::Fixed(l) => f.debug_tuple("Fixed").field(l).finish(),
            RuleItem::Dynamic(_) => f.debug_tuple("Dynamic").finish(),
        }
    }
}

/// A rule item whose branch is chosen once the winning match is known.
pub trait DynamicRule<L>: Send + Sync {
    /// Pick and return the branch (itself a list of items, possibly
    /// still dynamic) for this match.
    fn evaluate(&self, text: &str, captures: &regex::Captures<'_>) -> Vec<RuleItem<L>>;
}

struct Predicate<L> {
    compute: Arc<dyn Fn(&str, &regex::Captures<'_>) -> usize + Send + Sync>,
    branches: Vec<Vec<RuleItem<L>>>,
}

impl<L: Clone + Send + Sync> DynamicRule<L> for Predicate<L> {
    fn evaluate(&self, text: &str, captures: &regex::Captures<'_>) -> Vec<RuleItem<L>> {
        let index = (self.compute)(text, captures).min(self.branches.len().saturating_sub(1));
        self.branches[index].clone()
    }
}

/// Build a dynamic item whose branch is chosen by a predicate over the
/// matched text (the "by-text" rule item).
pub fn by_text<L: Clone + Send + Sync + 'static>(
    predicate: impl Fn(&str) -> usize + Send + Sync + 'static,
    branches: Vec<Vec<RuleItem<L>>>,
) -> RuleItem<L> {
    let compute = Arc::new(move |text: &str, _: &regex::Captures<'_>| predicate(text));
    RuleItem::Dynamic(Arc::new(Predicate { compute, branches }))
}

/// Build a dynamic item whose branch is chosen by a predicate over the
/// live match object (the "by-match" rule item).
pub fn by_match<L: Clone + Send + Sync + 'static>(
    predicate: impl Fn(&regex::Captures<'_>) -> usize + Send + Sync + 'static,
    branches: Vec<Vec<RuleItem<L>>>,
) -> RuleItem<L> {
    let compute = Arc::new(move |_: &str, captures: &regex::Captures<'_>| predicate(captures));
    RuleItem::Dynamic(Arc::new(Predicate { compute, branches }))
}

/// Build a dynamic item that picks `if_member` when the matched text is
/// in `words`, else `if_not_member` (the "if-member-of" rule item).
pub fn if_member_of<L: Clone + Send + Sync + 'static>(
    words: impl IntoIterator<Item = impl Into<String>>,
    if_member: Vec<RuleItem<L>>,
    if_not_member: Vec<RuleItem<L>>,
) -> RuleItem<L> {
    let set: HashSet<String> = words.into_iter().map(Into::into).collect();
    by_text(move |text| if set.contains(text) { 0 } else { 1 }, vec![if_member, if_not_member])
}

/// Build a dynamic item that picks a branch by which of `group_names`
/// actually participated in the match (the "if-group" rule item). The
/// last branch is used as a fallback if none of the named groups matched.
pub fn if_group<L: Clone + Send + Sync + 'static>(
    group_names: Vec<String>,
    mut branches: Vec<Vec<RuleItem<L>>>,
) -> RuleItem<L> {
    let fallback = branches.len().saturating_sub(1);
    branches.truncate(group_names.len() + 1);
    by_match(
        move |captures| {
            group_names
                .iter()
                .position(|name| captures.name(name).is_some())
                .unwrap_or(fallback)
        },
        branches,
    )
}

/// Recursively flatten a list of rule items against a live match,
/// resolving every [`RuleItem::Dynamic`] branch until only fixed
/// leaves remain.
pub fn resolve_items<L: Clone + Send + Sync>(
    items: &[RuleItem<L>],
    text: &str,
    captures: &regex::Captures<'_>,
) -> Vec<L> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            RuleItem::Fixed(l) => out.push(l.clone()),
            RuleItem::Dynamic(rule) => {
                let branch = rule.evaluate(text, captures);
                out.extend(resolve_items(&branch, text, captures));
            }
        }
    }
    out
}

/// Resolve a single rule item (a singular action slot) to exactly one
/// leaf value, recursing through dynamic branches.
pub fn resolve_one<L: Clone + Send + Sync>(
    item: &RuleItem<L>,
    text: &str,
    captures: &regex::Captures<'_>,
) -> Option<L> {
    resolve_items(std::slice::from_ref(item), text, captures).into_iter().next()
}

/// The action a rule attaches to its match.
pub enum RuleAction {
    /// A single token, whose action may itself be resolved dynamically.
    Single(RuleItem<Action>),
    /// Multiple tokens, one per trailing capture group after the
    /// winning group (the "by-group" multi-action dispatch, i.e.
    /// `bygroups`).
    Subgroup(Vec<RuleItem<Action>>),
}

/// Build a [`RuleAction::Subgroup`] from a plain list of actions, one
/// per trailing capture group.
pub fn bygroups(actions: impl IntoIterator<Item = Action>) -> RuleAction {
    RuleAction::Subgroup(actions.into_iter().map(RuleItem::Fixed).collect())
}

/// One item of a rule's target: how the lexicon stack changes after a
/// match.
#[derive(Clone)]
pub enum TargetItem {
    /// Negative: pop that many lexicons (never below the root).
    /// Positive: push that many copies of the *current* lexicon.
    /// Zero is a no-op and never produced by the DSL helpers.
    Delta(i32),
    /// Push a specific lexicon.
    Push(Arc<dyn LexiconRef>),
}

impl std::fmt::Debug for TargetItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetItem::Delta(n) => write!(f, "Delta({n})"),
            TargetItem::Push(l) => write!(f, "Push({})", l.name()),
        }
    }
}

/// What a rule's pattern slot holds: a real pattern, or one of the two
/// sentinels that mark a lexicon's fallback rule.
pub enum RuleHead {
    Pattern(Pattern),
    /// Marks the rule supplying the lexicon's default action (used to
    /// fill gaps between matches). Carries no target.
    DefaultAction,
    /// Marks the rule supplying the lexicon's default target (used
    /// when nothing else matches at the current position). Carries no
    /// action.
    DefaultTarget,
}

/// A single rule: `(pattern, action, target...)`, or one of its two
/// default variants.
pub struct Rule {
    pub head: RuleHead,
    pub action: Option<RuleAction>,
    pub target: Vec<RuleItem<TargetItem>>,
}

impl Rule {
    /// An ordinary pattern rule.
    pub fn new(pattern: Pattern, action: RuleAction, target: Vec<RuleItem<TargetItem>>) -> Self {
        Rule { head: RuleHead::Pattern(pattern), action: Some(action), target }
    }

    /// A pattern rule with no target (stays in the same lexicon).
    pub fn matching(pattern: Pattern, action: RuleAction) -> Self {
        Rule { head: RuleHead::Pattern(pattern), action: Some(action), target: Vec::new() }
    }

    /// The `DEFAULT_ACTION` sentinel rule: fills gaps between matches.
    pub fn default_action(action: RuleAction) -> Self {
        Rule { head: RuleHead::DefaultAction, action: Some(action), target: Vec::new() }
    }

    /// The `DEFAULT_TARGET` sentinel rule: transitions when nothing
    /// else matches at the current position.
    pub fn default_target(target: Vec<RuleItem<TargetItem>>) -> Self {
        Rule { head: RuleHead::DefaultTarget, action: None, target }
    }
}
