//! The compiled lexicon engine: one named lexicon's rule set, compiled
//! lazily into a master regex (or a literal fast path), plus cached
//! parameterized derivatives.
//!
//! Ported from `Lexicon`/`LexiconDescriptor`/`get_instance_attributes`
//! of the original Python lexicon module, following the fuller,
//! derivative-aware evolution of that module. A lexicon whose rules
//! reference itself (direct recursion, the common case for e.g. a
//! bracket-matching lexicon) is built with [`Lexicon::new_cyclic`],
//! which hands the rule-building closure a [`Weak`] handle to upgrade
//! once construction completes — the idiomatic Rust substitute for the
//! ordinary reference cycle a garbage-collected language allows here.

#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

mod compile;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

pub use lex_rule::{LexEvent, TokenPiece};
use lex_error::Result;
use lex_rule::{LexiconRef, Rule};

use compile::CompiledLexicon;

/// The hashable argument a derivative lexicon is parameterized by (the
/// opening quote of a string, the marker word of a here-document, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LexiconArg {
    Char(char),
    Str(String),
    Int(i64),
}

/// The rules-generating function of a lexicon, re-run (and re-compiled)
/// once per distinct derivative argument. Receives the derivative's
/// argument, or `None` for the base lexicon.
pub type RulesFn = Arc<dyn Fn(Option<&LexiconArg>) -> Vec<Rule> + Send + Sync>;

/// A named, lazily-compiled rule set, optionally specialized by a
/// [`LexiconArg`].
pub struct Lexicon {
    name: String,
    arg: Option<LexiconArg>,
    /// Set only on a derivative; points back to its base for identity
    /// comparison (`equals()` in the original).
    base: Option<Arc<Lexicon>>,
    rules_fn: RulesFn,
    derived: Mutex<HashMap<LexiconArg, Arc<Lexicon>>>,
    compiled: OnceLock<CompiledLexicon>,
}

impl std::fmt::Debug for Lexicon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lexicon").field("name", &self.name).field("arg", &self.arg).finish()
    }
}

impl Lexicon {
    /// Build a lexicon whose rules never need to reference the lexicon
    /// being built (no direct recursion).
    pub fn new(name: impl Into<String>, rules_fn: RulesFn) -> Arc<Lexicon> {
        Arc::new(Lexicon {
            name: name.into(),
            arg: None,
            base: None,
            rules_fn,
            derived: Mutex::new(HashMap::new()),
            compiled: OnceLock::new(),
        })
    }

    /// Build a lexicon whose rules may push/pop *this same lexicon*,
    /// directly or through a chain of siblings. `build` receives a
    /// [`Weak`] reference that resolves once the lexicon is fully
    /// constructed (by the time any rule actually runs, it always has).
    pub fn new_cyclic(name: impl Into<String>, build: impl FnOnce(&Weak<Lexicon>) -> RulesFn) -> Arc<Lexicon> {
        let name = name.into();
        Arc::new_cyclic(|weak| {
            let rules_fn = build(weak);
            Lexicon { name, arg: None, base: None, rules_fn, derived: Mutex::new(HashMap::new()), compiled: OnceLock::new() }
        })
    }

    /// The `Language.lexicon`-style dotted name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The argument this derivative was parameterized with, if any.
    pub fn arg(&self) -> Option<&LexiconArg> {
        self.arg.as_ref()
    }

    /// Return the derivative of this lexicon parameterized by `arg`,
    /// creating and caching it on first use. Calling this on a lexicon
    /// that is *already* a derivative returns it unchanged (derivatives
    /// cannot be derived further).
    pub fn derive(self: &Arc<Self>, arg: LexiconArg) -> Arc<Lexicon> {
        if self.arg.is_some() {
            return Arc::clone(self);
        }
        {
            let derived = self.derived.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(existing) = derived.get(&arg) {
                return Arc::clone(existing);
            }
        }
        let mut derived = self.derived.lock().unwrap_or_else(|p| p.into_inner());
        derived
            .entry(arg.clone())
            .or_insert_with(|| {
                Arc::new(Lexicon {
                    name: self.name.clone(),
                    arg: Some(arg),
                    base: Some(Arc::clone(self)),
                    rules_fn: Arc::clone(&self.rules_fn),
                    derived: Mutex::new(HashMap::new()),
                    compiled: OnceLock::new(),
                })
            })
            .clone()
    }

    fn compiled(&self) -> Result<&CompiledLexicon> {
        if let Some(c) = self.compiled.get() {
            return Ok(c);
        }
        let rules = (self.rules_fn)(self.arg.as_ref());
        let compiled = CompiledLexicon::compile(&self.name, rules)?;
        Ok(self.compiled.get_or_init(|| compiled))
    }

    /// Parse from `pos`, returning every event up to and including the
    /// first one carrying a target, or through the rest of `text` if
    /// none does. Compilation happens lazily on first call and is
    /// memoized for the lifetime of this lexicon (or derivative).
    pub fn parse(&self, text: &str, pos: usize) -> Result<Vec<LexEvent>> {
        tracing::trace!(lexicon = %self.name, pos, "parsing");
        self.compiled()?.parse(&self.name, text, pos)
    }
}

impl LexiconRef for Lexicon {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> usize {
        match &self.base {
            Some(base) => Arc::as_ptr(base) as usize,
            None => self as *const Lexicon as usize,
        }
    }

    fn parse(&self, text: &str, pos: usize) -> Result<Vec<LexEvent>> {
        self.parse(text, pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lex_action::Action;
    use lex_rule::{Pattern, Rule, RuleAction, RuleItem};

    fn number_lexicon() -> Arc<Lexicon> {
        Lexicon::new(
            "Test.number",
            Arc::new(|_arg: Option<&LexiconArg>| {
                vec![Rule::matching(
                    Pattern::regex(r"\d+"),
                    RuleAction::Single(RuleItem::Fixed(Action::new("Number"))),
                )]
            }),
        )
    }

    #[test]
    fn parses_a_single_token() {
        let lex = number_lexicon();
        let events = lex.parse("123", 0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pieces.len(), 1);
        assert_eq!(events[0].pieces[0].start, 0);
        assert_eq!(events[0].pieces[0].end, 3);
    }

    #[test]
    fn derivative_shares_identity_with_base() {
        let base = number_lexicon();
        let derived = base.derive(LexiconArg::Char('"'));
        assert_eq!(LexiconRef::identity(&*base), LexiconRef::identity(&*derived));
        let derived_again = base.derive(LexiconArg::Char('"'));
        assert!(Arc::ptr_eq(&derived, &derived_again));
    }

    #[test]
    fn recursive_lexicon_can_push_itself() {
        let lex = Lexicon::new_cyclic("Test.brackets", |weak| {
            let weak = weak.clone();
            Arc::new(move |_arg: Option<&LexiconArg>| {
                let this = weak.upgrade().expect("lexicon still alive while parsing");
                vec![
                    Rule::new(
                        Pattern::literal("("),
                        RuleAction::Single(RuleItem::Fixed(Action::new("Delimiter"))),
                        vec![RuleItem::Fixed(lex_rule::TargetItem::Push(this.clone()))],
                    ),
                    Rule::new(
                        Pattern::literal(")"),
                        RuleAction::Single(RuleItem::Fixed(Action::new("Delimiter"))),
                        vec![RuleItem::Fixed(lex_rule::TargetItem::Delta(-1))],
                    ),
                ]
            })
        });
        let events = lex.parse("(", 0).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].has_target());
    }
}
