//! Interned, hierarchical token actions (e.g. `Comment`, `String.Escape`).
//!
//! An [`Action`] is an opaque handle into a global interning table keyed by
//! the dotted name. The core never interprets the name itself; it only
//! exposes the dot-separated ancestor chain (`String.Escape` → `String`)
//! so downstream consumers (themers, transformers) can match on any level
//! of the hierarchy.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

#[derive(Default)]
struct Interner {
    names: Vec<String>,
    lookup: HashMap<String, u32>,
}

fn interner() -> &'static Mutex<Interner> {
    static INTERNER: OnceLock<Mutex<Interner>> = OnceLock::new();
    INTERNER.get_or_init(|| Mutex::new(Interner::default()))
}

/// An interned, hierarchical action tag attached to a token.
///
/// Two `Action`s are equal iff they were interned from the same dotted
/// name. Cloning/copying an `Action` is a cheap handle copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Action(u32);

impl Action {
    /// Intern `name` (a dotted hierarchy such as `"String.Escape"`),
    /// returning the handle for it. Interning the same name twice
    /// returns the same handle.
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        let mut interner = interner().lock().unwrap_or_else(|p| p.into_inner());
        if let Some(&id) = interner.lookup.get(name) {
            return Action(id);
        }
        let id = interner.names.len() as u32;
        interner.names.push(name.to_string());
        interner.lookup.insert(name.to_string(), id);
        Action(id)
    }

    /// The full dotted name this action was interned with.
    pub fn name(&self) -> String {
        let interner = interner().lock().unwrap_or_else(|p| p.into_inner());
        interner.names[self.0 as usize].clone()
    }

    /// Return the ancestor chain from most specific (self) to least
    /// specific (the top-level component), as a tuple-of-ancestors view.
    ///
    /// `Action::new("String.Escape").ancestors()` yields
    /// `[String.Escape, String]`.
    pub fn ancestors(&self) -> Vec<Action> {
        let name = self.name();
        let parts: Vec<&str> = name.split('.').collect();
        let mut out = Vec::with_capacity(parts.len());
        for end in (1..=parts.len()).rev() {
            out.push(Action::new(parts[..end].join(".")));
        }
        out
    }

    /// Return true if `self` equals `other` or is a (possibly indirect)
    /// hierarchical descendant of it, e.g. `String.Escape` is a
    /// descendant of `String`.
    pub fn is_a(&self, other: Action) -> bool {
        self.ancestors().contains(&other)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let a = Action::new("Comment");
        let b = Action::new("Comment");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_names_are_distinct() {
        assert_ne!(Action::new("Keyword"), Action::new("Name.Variable"));
    }

    #[test]
    fn ancestors_walk_the_dotted_chain() {
        let escape = Action::new("String.Escape");
        let names: Vec<String> = escape.ancestors().iter().map(Action::name).collect();
        assert_eq!(names, vec!["String.Escape".to_string(), "String".to_string()]);
    }

    #[test]
    fn is_a_matches_ancestors_and_self() {
        let escape = Action::new("String.Escape");
        let string = Action::new("String");
        let keyword = Action::new("Keyword");
        assert!(escape.is_a(string));
        assert!(escape.is_a(escape));
        assert!(!escape.is_a(keyword));
    }
}
