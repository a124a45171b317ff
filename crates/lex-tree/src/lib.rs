//! The tree a lex event stream is built into: tokens and nested
//! contexts, addressed by index into one arena instead of the parent
//! `Rc`/`Weak` object graph the original tree module uses.
//!
//! A [`Tree`] owns every [`Token`]/[`Context`] node it ever allocates in
//! one `Vec`, addressed by [`NodeId`]. Structural edits (splicing a
//! saved tail back in during an incremental re-lex, for instance) are
//! index rewrites rather than object moves, which is what lets
//! `lex-incremental` detach and reattach whole subtrees cheaply.

#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

mod builder;

use std::sync::Arc;

pub use builder::TreeBuilder;
use lex_action::Action;
use lex_rule::LexiconRef;

/// An index into a [`Tree`]'s arena. Stable for the lifetime of the
/// tree: nodes are never compacted, only unlinked from their parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

enum NodeKind {
    Token {
        pos: usize,
        end: usize,
        action: Action,
        /// Set when this token was one of several produced by a single
        /// subgroup-dispatch match; shared by every member of the group.
        group: Option<u32>,
    },
    Context {
        lexicon: Arc<dyn LexiconRef>,
        children: Vec<NodeId>,
    },
}

struct Node {
    parent: Option<NodeId>,
    kind: NodeKind,
}

/// An arena of tokens and contexts, rooted at a single context created
/// for the root lexicon.
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
    next_group: u32,
}

impl Tree {
    /// Create a tree with an empty root context.
    pub fn new(root_lexicon: Arc<dyn LexiconRef>) -> Self {
        let mut tree = Tree { nodes: Vec::new(), root: NodeId(0), next_group: 0 };
        let root = tree.alloc(Node { parent: None, kind: NodeKind::Context { lexicon: root_lexicon, children: Vec::new() } });
        tree.root = root;
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        self.parent(id).is_none()
    }

    pub fn is_token(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::Token { .. })
    }

    pub fn is_context(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::Context { .. })
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.node(id).kind {
            NodeKind::Context { children, .. } => children,
            NodeKind::Token { .. } => &[],
        }
    }

    pub fn is_empty_context(&self, id: NodeId) -> bool {
        self.children(id).is_empty()
    }

    pub fn lexicon(&self, id: NodeId) -> Option<&Arc<dyn LexiconRef>> {
        match &self.node(id).kind {
            NodeKind::Context { lexicon, .. } => Some(lexicon),
            NodeKind::Token { .. } => None,
        }
    }

    pub fn token_span(&self, id: NodeId) -> Option<(usize, usize)> {
        match self.node(id).kind {
            NodeKind::Token { pos, end, .. } => Some((pos, end)),
            NodeKind::Context { .. } => None,
        }
    }

    pub fn token_action(&self, id: NodeId) -> Option<Action> {
        match self.node(id).kind {
            NodeKind::Token { action, .. } => Some(action),
            NodeKind::Context { .. } => None,
        }
    }

    pub fn token_group(&self, id: NodeId) -> Option<u32> {
        match self.node(id).kind {
            NodeKind::Token { group, .. } => group,
            NodeKind::Context { .. } => None,
        }
    }

    /// The first member of this token's group, or the token itself if
    /// it is not part of a group.
    pub fn group_head(&self, id: NodeId) -> NodeId {
        let Some(group) = self.token_group(id) else { return id };
        let Some(parent) = self.parent(id) else { return id };
        self.children(parent)
            .iter()
            .copied()
            .find(|&sibling| self.token_group(sibling) == Some(group))
            .unwrap_or(id)
    }

    fn child_index(&self, parent: NodeId, child: NodeId) -> Option<usize> {
        self.children(parent).iter().position(|&c| c == child)
    }

    pub fn is_first(&self, id: NodeId) -> bool {
        match self.parent(id) {
            Some(parent) => self.children(parent).first() == Some(&id),
            None => true,
        }
    }

    pub fn is_last(&self, id: NodeId) -> bool {
        match self.parent(id) {
            Some(parent) => self.children(parent).last() == Some(&id),
            None => true,
        }
    }

    pub fn left_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let idx = self.child_index(parent, id)?;
        idx.checked_sub(1).map(|i| self.children(parent)[i])
    }

    pub fn right_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let idx = self.child_index(parent, id)?;
        self.children(parent).get(idx + 1).copied()
    }

    /// Ancestor contexts, nearest first, ending at (and including) the
    /// root.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors { tree: self, current: self.parent(id) }
    }

    /// All tokens under `id` (or `id` itself if it is already a token),
    /// in document order.
    pub fn tokens(&self, id: NodeId) -> Tokens<'_> {
        Tokens { tree: self, stack: vec![id] }
    }

    /// All tokens under `id`, in reverse document order.
    pub fn tokens_rev(&self, id: NodeId) -> TokensRev<'_> {
        TokensRev { tree: self, stack: vec![id] }
    }

    pub fn first_token(&self, id: NodeId) -> Option<NodeId> {
        self.tokens(id).next()
    }

    pub fn last_token(&self, id: NodeId) -> Option<NodeId> {
        self.tokens_rev(id).next()
    }

    /// Every token from `id` onward, crossing out of and into contexts
    /// (descending into following contexts, ascending out of the
    /// current one), in document order.
    pub fn forward(&self, id: NodeId) -> Forward<'_> {
        Forward { tree: self, node: Some(id) }
    }

    /// The symmetric counterpart of [`Tree::forward`].
    pub fn backward(&self, id: NodeId) -> Backward<'_> {
        Backward { tree: self, node: Some(id) }
    }

    /// The token at (or nearest at-or-after) `pos` within `context`,
    /// found by bisecting each context's children on their end
    /// position, descending into sub-contexts as needed.
    pub fn find_token(&self, context: NodeId, pos: usize) -> Option<NodeId> {
        let children = self.children(context);
        if children.is_empty() {
            return None;
        }
        let ends: Vec<usize> = children
            .iter()
            .map(|&c| if self.is_context(c) { self.last_token(c).and_then(|t| self.token_span(t)).map(|(_, e)| e).unwrap_or(0) } else { self.token_span(c).map(|(_, e)| e).unwrap_or(0) })
            .collect();
        let idx = ends.partition_point(|&e| e < pos + 1);
        if idx < children.len() {
            let child = children[idx];
            if self.is_context(child) {
                return self.find_token(child, pos);
            }
            return Some(child);
        }
        self.last_token(context)
    }

    /// The first token completely at or after `pos`.
    pub fn find_token_after(&self, context: NodeId, pos: usize) -> Option<NodeId> {
        let children = self.children(context);
        let starts: Vec<usize> = children
            .iter()
            .map(|&c| if self.is_context(c) { self.first_token(c).and_then(|t| self.token_span(t)).map(|(p, _)| p).unwrap_or(0) } else { self.token_span(c).map(|(p, _)| p).unwrap_or(0) })
            .collect();
        let idx = starts.partition_point(|&s| s < pos);
        if idx < children.len() {
            let child = children[idx];
            if self.is_context(child) {
                return self.find_token_after(child, pos);
            }
            return Some(child);
        }
        None
    }

    /// The last token completely before `pos`.
    pub fn find_token_before(&self, context: NodeId, pos: usize) -> Option<NodeId> {
        let children = self.children(context);
        let ends: Vec<usize> = children
            .iter()
            .map(|&c| if self.is_context(c) { self.last_token(c).and_then(|t| self.token_span(t)).map(|(_, e)| e).unwrap_or(0) } else { self.token_span(c).map(|(_, e)| e).unwrap_or(0) })
            .collect();
        let idx = ends.partition_point(|&e| e <= pos);
        if idx == 0 {
            return None;
        }
        let child = children[idx - 1];
        if self.is_context(child) {
            return self.find_token_before(child, pos);
        }
        Some(child)
    }

    /// True if `a` and `b` have the same sequence of lexicons along
    /// their ancestor chain up to and including the root — the
    /// reconvergence test an incremental re-lex uses to decide a
    /// splice point is safe. Equivalent to the original's "zip the two
    /// ancestor chains and require both to run out of parents together",
    /// expressed here as an explicit equal-length-and-pairwise check.
    pub fn state_matches(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return true;
        }
        let chain_a: Vec<NodeId> = self.ancestors(a).collect();
        let chain_b: Vec<NodeId> = self.ancestors(b).collect();
        if chain_a.len() != chain_b.len() {
            return false;
        }
        chain_a.iter().zip(&chain_b).all(|(&x, &y)| match (self.lexicon(x), self.lexicon(y)) {
            (Some(lx), Some(ly)) => lx.ref_eq(ly.as_ref()),
            _ => false,
        })
    }

    // -- mutation primitives, used by `TreeBuilder` and `lex-incremental` --

    pub fn push_token(&mut self, parent: NodeId, pos: usize, end: usize, action: Action) -> NodeId {
        let id = self.alloc(Node { parent: Some(parent), kind: NodeKind::Token { pos, end, action, group: None } });
        self.push_child(parent, id);
        id
    }

    /// Push several tokens from one subgroup-dispatch match, all
    /// sharing a fresh group id.
    pub fn push_group(&mut self, parent: NodeId, pieces: &[(usize, usize, Action)]) -> Vec<NodeId> {
        let group = self.next_group;
        self.next_group += 1;
        pieces
            .iter()
            .map(|&(pos, end, action)| {
                let id = self.alloc(Node { parent: Some(parent), kind: NodeKind::Token { pos, end, action, group: Some(group) } });
                self.push_child(parent, id);
                id
            })
            .collect()
    }

    pub fn push_child_context(&mut self, parent: NodeId, lexicon: Arc<dyn LexiconRef>) -> NodeId {
        let id = self.alloc(Node { parent: Some(parent), kind: NodeKind::Context { lexicon, children: Vec::new() } });
        self.push_child(parent, id);
        id
    }

    fn push_child(&mut self, parent: NodeId, child: NodeId) {
        if let NodeKind::Context { children, .. } = &mut self.node_mut(parent).kind {
            children.push(child);
        }
    }

    /// Remove `child` from `parent`'s children, if present.
    fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        if let NodeKind::Context { children, .. } = &mut self.node_mut(parent).kind {
            children.retain(|&c| c != child);
        }
    }

    /// If `context` is empty, unlink it from its parent; return the
    /// parent to continue from (the parent if unlinked, else `context`
    /// unchanged).
    fn close_if_empty(&mut self, context: NodeId) -> NodeId {
        if !self.is_empty_context(context) {
            return context;
        }
        match self.parent(context) {
            Some(parent) => {
                self.remove_child(parent, context);
                parent
            }
            None => context,
        }
    }

    /// Recursively close empty contexts starting at `context`, walking
    /// up to a non-empty ancestor (or the root).
    pub fn unwind(&mut self, mut context: NodeId) {
        loop {
            let Some(parent) = self.parent(context) else { break };
            if self.is_empty_context(context) {
                self.remove_child(parent, context);
            }
            context = parent;
        }
    }

    /// Move to the target context after a push (`n > 0` or an explicit
    /// lexicon reference) or pop (`n < 0`, closing emptied contexts on
    /// the way, never above the root).
    pub fn pop(&mut self, context: NodeId) -> NodeId {
        match self.parent(context) {
            Some(_) => self.close_if_empty(context),
            None => context,
        }
    }

    /// Detach `parent`'s children from `from_index` onward, returning
    /// them with their `parent` link cleared to `None`. Used to split
    /// off a tail subtree ahead of a splice.
    pub fn detach_from(&mut self, parent: NodeId, from_index: usize) -> Vec<NodeId> {
        let removed = if let NodeKind::Context { children, .. } = &mut self.node_mut(parent).kind {
            children.split_off(from_index)
        } else {
            Vec::new()
        };
        for &id in &removed {
            self.node_mut(id).parent = None;
        }
        removed
    }

    /// Reparent `child` (and, implicitly, everything below it) onto
    /// `new_parent`'s children list, appending it.
    pub fn reparent(&mut self, new_parent: NodeId, child: NodeId) {
        self.node_mut(child).parent = Some(new_parent);
        self.push_child(new_parent, child);
    }

    /// Remove every child of `context` (used when there is no reusable
    /// head and the whole context is being rebuilt from scratch).
    pub fn clear_children(&mut self, context: NodeId) -> Vec<NodeId> {
        let removed = if let NodeKind::Context { children, .. } = &mut self.node_mut(context).kind {
            std::mem::take(children)
        } else {
            Vec::new()
        };
        for &id in &removed {
            self.node_mut(id).parent = None;
        }
        removed
    }

    /// Shift a token's position by `offset` (used when splicing a
    /// reused tail after a size-changing edit).
    pub fn shift_token(&mut self, id: NodeId, offset: isize) {
        if let NodeKind::Token { pos, end, .. } = &mut self.node_mut(id).kind {
            *pos = pos.saturating_add_signed(offset);
            *end = end.saturating_add_signed(offset);
        }
    }

    /// Remove `token`, and everything to its right at every ancestor
    /// level, from the live tree (the remaining, now-truncated
    /// ancestor contexts stay where they are).
    pub fn cut_right(&mut self, token: NodeId) {
        let Some(first_parent) = self.parent(token) else { return };
        if let Some(idx) = self.child_index(first_parent, token) {
            self.detach_from(first_parent, idx);
        }
        let mut node = first_parent;
        loop {
            let Some(parent) = self.parent(node) else { break };
            if let Some(idx) = self.child_index(parent, node) {
                self.detach_from(parent, idx + 1);
            }
            node = parent;
        }
    }

    /// Detach `token` and everything to its right, at every ancestor
    /// level up to the root, into a standalone tree of fresh contexts
    /// mirroring the same lexicons nesting. The truncated originals stay
    /// live (still attached to their own parents); only the new tail
    /// tree is returned, parentless, ready to be spliced back in once a
    /// reconvergence point is found.
    pub fn split_right(&mut self, token: NodeId) -> NodeId {
        let Some(deepest_parent) = self.parent(token) else { return token };
        let idx = self.child_index(deepest_parent, token).unwrap_or(0);
        let detached = self.detach_from(deepest_parent, idx);
        let Some(lexicon) = self.lexicon(deepest_parent).map(Arc::clone) else { return token };
        let mut tail = self.alloc(Node { parent: None, kind: NodeKind::Context { lexicon, children: Vec::new() } });
        for child in detached {
            self.reparent(tail, child);
        }
        let mut node = deepest_parent;
        loop {
            let Some(parent) = self.parent(node) else { break };
            let idx = match self.child_index(parent, node) {
                Some(idx) => idx,
                None => break,
            };
            let detached = self.detach_from(parent, idx + 1);
            let Some(lexicon) = self.lexicon(parent).map(Arc::clone) else { break };
            let copy = self.alloc(Node { parent: None, kind: NodeKind::Context { lexicon, children: Vec::new() } });
            self.reparent(copy, tail);
            for child in detached {
                self.reparent(copy, child);
            }
            tail = copy;
            node = parent;
        }
        tail
    }
}

/// Iterator over a context's descendant tokens, document order.
pub struct Tokens<'a> {
    tree: &'a Tree,
    stack: Vec<NodeId>,
}

impl Iterator for Tokens<'_> {
    type Item = NodeId;
    fn next(&mut self) -> Option<NodeId> {
        while let Some(id) = self.stack.pop() {
            if self.tree.is_token(id) {
                return Some(id);
            }
            for &child in self.tree.children(id).iter().rev() {
                self.stack.push(child);
            }
        }
        None
    }
}

/// Iterator over a context's descendant tokens, reverse document order.
pub struct TokensRev<'a> {
    tree: &'a Tree,
    stack: Vec<NodeId>,
}

impl Iterator for TokensRev<'_> {
    type Item = NodeId;
    fn next(&mut self) -> Option<NodeId> {
        while let Some(id) = self.stack.pop() {
            if self.tree.is_token(id) {
                return Some(id);
            }
            for &child in self.tree.children(id) {
                self.stack.push(child);
            }
        }
        None
    }
}

/// Iterator over ancestor contexts, nearest first.
pub struct Ancestors<'a> {
    tree: &'a Tree,
    current: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;
    fn next(&mut self) -> Option<NodeId> {
        let id = self.current?;
        self.current = self.tree.parent(id);
        Some(id)
    }
}

/// Iterator over every following token, climbing out of contexts and
/// descending into later ones as needed.
pub struct Forward<'a> {
    tree: &'a Tree,
    node: Option<NodeId>,
}

impl Iterator for Forward<'_> {
    type Item = NodeId;
    fn next(&mut self) -> Option<NodeId> {
        loop {
            let current = self.node?;
            if self.tree.parent(current).is_none() {
                self.node = None;
                return None;
            }
            if let Some(sibling) = self.tree.right_sibling(current) {
                let result = if self.tree.is_token(sibling) { sibling } else { self.tree.first_token(sibling)? };
                self.node = Some(result);
                return Some(result);
            }
            self.node = self.tree.parent(current);
        }
    }
}

/// The symmetric counterpart of [`Forward`].
pub struct Backward<'a> {
    tree: &'a Tree,
    node: Option<NodeId>,
}

impl Iterator for Backward<'_> {
    type Item = NodeId;
    fn next(&mut self) -> Option<NodeId> {
        loop {
            let current = self.node?;
            if self.tree.parent(current).is_none() {
                self.node = None;
                return None;
            }
            if let Some(sibling) = self.tree.left_sibling(current) {
                let result = if self.tree.is_token(sibling) { sibling } else { self.tree.last_token(sibling)? };
                self.node = Some(result);
                return Some(result);
            }
            self.node = self.tree.parent(current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lex_error::Result;

    #[derive(Debug)]
    struct Mock(&'static str);
    impl LexiconRef for Mock {
        fn name(&self) -> &str {
            self.0
        }
        fn identity(&self) -> usize {
            self as *const Mock as usize
        }
        fn parse(&self, _text: &str, _pos: usize) -> Result<Vec<lex_rule::LexEvent>> {
            Ok(Vec::new())
        }
    }
    fn lex(name: &'static str) -> Arc<dyn LexiconRef> {
        Arc::new(Mock(name))
    }

    #[test]
    fn push_token_and_find_token_roundtrip() {
        let mut tree = Tree::new(lex("root"));
        let root = tree.root();
        tree.push_token(root, 0, 3, Action::new("A"));
        tree.push_token(root, 3, 6, Action::new("B"));
        let found = tree.find_token(root, 4).expect("token at pos 4");
        assert_eq!(tree.token_span(found), Some((3, 6)));
    }

    #[test]
    fn nested_context_unwinds_when_empty() {
        let mut tree = Tree::new(lex("root"));
        let root = tree.root();
        let child = tree.push_child_context(root, lex("child"));
        tree.unwind(child);
        assert!(tree.children(root).is_empty());
    }

    #[test]
    fn nested_context_survives_when_nonempty() {
        let mut tree = Tree::new(lex("root"));
        let root = tree.root();
        let child = tree.push_child_context(root, lex("child"));
        tree.push_token(child, 0, 1, Action::new("A"));
        tree.unwind(child);
        assert_eq!(tree.children(root).len(), 1);
    }

    #[test]
    fn forward_crosses_context_boundaries() {
        let mut tree = Tree::new(lex("root"));
        let root = tree.root();
        let a = tree.push_token(root, 0, 1, Action::new("A"));
        let child = tree.push_child_context(root, lex("child"));
        let b = tree.push_token(child, 1, 2, Action::new("B"));
        let c = tree.push_token(root, 2, 3, Action::new("C"));
        let forward: Vec<NodeId> = tree.forward(a).collect();
        assert_eq!(forward, vec![b, c]);
    }

    #[test]
    fn group_head_finds_first_member() {
        let mut tree = Tree::new(lex("root"));
        let root = tree.root();
        let pieces = [(0, 1, Action::new("Key")), (1, 2, Action::new("Value"))];
        let group = tree.push_group(root, &pieces);
        assert_eq!(tree.group_head(group[1]), group[0]);
    }

    #[test]
    fn cut_right_removes_token_and_later_siblings() {
        let mut tree = Tree::new(lex("root"));
        let root = tree.root();
        tree.push_token(root, 0, 1, Action::new("A"));
        let b = tree.push_token(root, 1, 2, Action::new("B"));
        tree.push_token(root, 2, 3, Action::new("C"));
        tree.cut_right(b);
        assert_eq!(tree.children(root).len(), 1);
    }

    #[test]
    fn split_right_preserves_nesting_and_truncates_original() {
        let mut tree = Tree::new(lex("root"));
        let root = tree.root();
        tree.push_token(root, 0, 1, Action::new("A"));
        let child = tree.push_child_context(root, lex("child"));
        let b = tree.push_token(child, 1, 2, Action::new("B"));
        let c = tree.push_token(child, 2, 3, Action::new("C"));
        let tail_root = tree.split_right(b);

        assert!(tree.is_root(tail_root));
        assert!(tree.lexicon(tail_root).is_some());
        let tail_tokens: Vec<NodeId> = tree.tokens(tail_root).collect();
        assert_eq!(tail_tokens, vec![b, c]);
        assert!(tree.is_empty_context(child));
    }

    #[test]
    fn state_matches_compares_ancestor_lexicons() {
        let mut tree = Tree::new(lex("root"));
        let root = tree.root();
        let a = tree.push_child_context(root, lex("string"));
        let b = tree.push_child_context(root, lex("string"));
        let ta = tree.push_token(a, 0, 1, Action::new("A"));
        let tb = tree.push_token(b, 0, 1, Action::new("A"));
        assert!(!tree.state_matches(ta, tb));
        assert!(tree.state_matches(ta, ta));
    }
}
