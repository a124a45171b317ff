//! A document wrapper that re-lexes only the text a splice actually
//! invalidated, reusing whatever tail content still starts in a
//! matching lexicon. Ported from `Document._modify`: back the resume
//! point up to a safe boundary, carve the unaffected tail off into its
//! own standalone tree, reparse from the resume point, and splice the
//! tail back in the moment the new parse reconverges with it.

#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

use std::sync::Arc;

use lex_action::Action;
use lex_error::{LexError, Result};
use lex_lexer::{EngineLimits, LexStream, LexedItem, LexerState, StackOp};
use lex_rule::LexiconRef;
use lex_tree::{NodeId, Tree, TreeBuilder};

/// How far back a reparse was forced to go, and how much of the old
/// tree survived it, for callers that want to limit re-highlighting or
/// re-analysis to the touched range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifyStats {
    pub nodes_reused: usize,
    pub nodes_reparsed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModifiedRange {
    Full,
    None,
    Range(usize, usize),
}

/// One token's length, action and text, snapshotted before an edit so
/// the reparse can tell whether it reproduced the same token exactly.
type TokenSnapshot = (usize, Action, String);

/// How many tokens a reconvergence search is allowed to walk past
/// before giving up on the remaining tail positions as too stale to be
/// worth bisecting against.
const TAIL_PRUNE_THRESHOLD: usize = 10;

/// How far back `locate_resume_point` walks from the token before
/// `start` when there's no preceding newline to anchor on.
const RESUME_BACKUP_TOKENS: usize = 10;

/// A piece of text paired with the token tree its root lexicon produces,
/// kept in sync incrementally as edits come in.
pub struct Document {
    text: String,
    root_lexicon: Arc<dyn LexiconRef>,
    tree: Tree,
    limits: EngineLimits,
    modified_range: ModifiedRange,
}

impl Document {
    /// An empty document rooted at `root_lexicon`.
    pub fn new(root_lexicon: Arc<dyn LexiconRef>) -> Result<Self> {
        Self::with_text(root_lexicon, String::new())
    }

    pub fn with_text(root_lexicon: Arc<dyn LexiconRef>, text: impl Into<String>) -> Result<Self> {
        Self::with_limits(root_lexicon, text, EngineLimits::default())
    }

    pub fn with_limits(root_lexicon: Arc<dyn LexiconRef>, text: impl Into<String>, limits: EngineLimits) -> Result<Self> {
        let text = text.into();
        let tree = TreeBuilder::build(&text, LexerState::with_limits(Arc::clone(&root_lexicon), limits))?;
        Ok(Document { text, root_lexicon, tree, limits, modified_range: ModifiedRange::Full })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn root_lexicon(&self) -> &Arc<dyn LexiconRef> {
        &self.root_lexicon
    }

    /// The byte range re-tokenized by the last [`Document::modify`] or
    /// [`Document::set_text`] call; `(0, 0)` if nothing changed.
    pub fn modified_range(&self) -> (usize, usize) {
        match self.modified_range {
            ModifiedRange::Full => (0, self.text.len()),
            ModifiedRange::None => (0, 0),
            ModifiedRange::Range(start, end) => (start, end),
        }
    }

    /// Replace the whole document, discarding the old tree entirely.
    pub fn set_text(&mut self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        if text == self.text {
            self.modified_range = ModifiedRange::None;
            return Ok(());
        }
        self.text = text;
        self.tokenize_full()
    }

    fn tokenize_full(&mut self) -> Result<()> {
        self.tree = TreeBuilder::build(&self.text, LexerState::with_limits(Arc::clone(&self.root_lexicon), self.limits))?;
        self.modified_range = ModifiedRange::Full;
        Ok(())
    }

    /// Replace `text[start..end]` with `replacement`, re-lexing only the
    /// touched region and reattaching whatever unaffected tail content
    /// still starts in a matching lexicon.
    pub fn modify(&mut self, start: usize, end: usize, replacement: &str) -> Result<ModifyStats> {
        let len = self.text.len();
        if start > len || end > len {
            return Err(LexError::OutOfBounds { pos: start.max(end), len });
        }
        if start > end {
            self.modified_range = ModifiedRange::None;
            return Ok(ModifyStats::default());
        }

        let no_change = (start == end && replacement.is_empty())
            || (replacement.len() == end - start && &self.text[start..end] == replacement);
        if no_change {
            self.modified_range = ModifiedRange::None;
            return Ok(ModifyStats::default());
        }

        tracing::debug!(start, end, replacement_len = replacement.len(), "modifying document");
        let offset = replacement.len() as isize - (end - start) as isize;
        let root = self.tree.root();

        let head = start > 0;
        let start_token = if head { self.locate_resume_point(start) } else { None };
        let head = head && start_token.is_some();

        let mut tail = end < len;
        let end_token = if tail { self.tree.find_token_after(root, end) } else { None };
        if end_token.is_none() {
            tail = false;
        }

        if !head && !tail {
            self.text = splice_text(&self.text, start, end, replacement);
            self.tokenize_full()?;
            let reparsed = self.tree.tokens(self.tree.root()).count();
            tracing::debug!(reparsed, "no reusable head or tail, full re-tokenize");
            return Ok(ModifyStats { nodes_reused: 0, nodes_reparsed: reparsed });
        }

        let start_tokens = self.snapshot_start_tokens(start_token, start);
        self.text = splice_text(&self.text, start, end, replacement);

        let (mut tail_tokens, mut tail_positions) = match (tail, end_token) {
            (true, Some(tok)) => self.carve_tail(tok, offset),
            _ => (Vec::new(), Vec::new()),
        };
        let mut tail = tail && !tail_tokens.is_empty();

        let (mut context, resume_pos) = if let Some(token) = start_token {
            let ctx = self.tree.parent(token).unwrap_or(root);
            let token_pos = self.tree.token_span(token).map(|(p, _)| p).unwrap_or(0);
            if !tail || Some(token) != end_token {
                self.tree.cut_right(token);
            }
            (ctx, token_pos)
        } else {
            self.tree.clear_children(root);
            (root, 0)
        };

        let ancestors = self.ancestor_lexicons(context);
        if ancestors.is_empty() {
            self.tokenize_full()?;
            let reparsed = self.tree.tokens(self.tree.root()).count();
            return Ok(ModifyStats { nodes_reused: 0, nodes_reparsed: reparsed });
        }
        let state = LexerState::from_ancestors(ancestors[0].clone(), ancestors[1..].to_vec(), self.limits);
        let mut stream = LexStream::from_pos(&self.text, resume_pos, state);

        let tail_floor = (end as isize + offset).max(0) as usize;
        let mut pos = resume_pos;
        let mut reused = 0usize;
        let mut reparsed = 0usize;

        while let Some(item) = stream.next() {
            match item? {
                LexedItem::Token(piece) => {
                    if tail && piece.start >= tail_floor {
                        if let Some(n) = self.try_splice(&mut tail_tokens, &mut tail_positions, context, piece.start, offset) {
                            reused += n;
                            pos = piece.start;
                            break;
                        }
                    }
                    reparsed += 1;
                    self.tree.push_token(context, piece.start, piece.end, piece.action);
                    pos = piece.end;
                }
                LexedItem::Group(pieces) => {
                    let event_start = pieces.first().map(|p| p.start).unwrap_or(pos);
                    if tail && event_start >= tail_floor {
                        if let Some(n) = self.try_splice(&mut tail_tokens, &mut tail_positions, context, event_start, offset) {
                            reused += n;
                            pos = event_start;
                            break;
                        }
                    }
                    reparsed += pieces.len();
                    let triples: Vec<_> = pieces.iter().map(|p| (p.start, p.end, p.action)).collect();
                    self.tree.push_group(context, &triples);
                    if let Some(last) = pieces.last() {
                        pos = last.end;
                    }
                }
                LexedItem::StackOp(StackOp::Push(lexicon)) => {
                    context = self.tree.push_child_context(context, lexicon);
                }
                LexedItem::StackOp(StackOp::Pop) => {
                    context = self.tree.pop(context);
                }
            }
            if tail_positions.is_empty() {
                tail = false;
            }
        }

        self.tree.unwind(context);

        let end_parse = pos;
        let start_parse = self.shrink_start(head, resume_pos, start, &start_tokens);

        tracing::debug!(reused, reparsed, start_parse, end_parse, "modify complete");
        self.modified_range = ModifiedRange::Range(start_parse, end_parse.max(start_parse));
        Ok(ModifyStats { nodes_reused: reused, nodes_reparsed: reparsed })
    }

    /// Back the resume point up to the last newline before `start` (or,
    /// failing that, up to ten tokens further back), then snap to the
    /// first member of a token group if it lands inside one.
    fn locate_resume_point(&self, start: usize) -> Option<NodeId> {
        let root = self.tree.root();
        let token = match self.text[..start].rfind('\n') {
            Some(i) => self.tree.find_token(root, i + 1),
            None => {
                let first = self.tree.find_token_before(root, start)?;
                let mut walked = first;
                for _ in 0..RESUME_BACKUP_TOKENS {
                    match self.tree.backward(walked).next() {
                        Some(earlier) => walked = earlier,
                        None => break,
                    }
                }
                Some(walked)
            }
        };
        token.map(|t| self.tree.group_head(t))
    }

    /// Snapshot the head tokens about to be discarded (length, action,
    /// text), so the reparse can later detect an unchanged prefix.
    fn snapshot_start_tokens(&self, start_token: Option<NodeId>, start: usize) -> Vec<TokenSnapshot> {
        let Some(token) = start_token else { return Vec::new() };
        let mut out = Vec::new();
        if let Some((p, e)) = self.tree.token_span(token) {
            let action = self.tree.token_action(token).unwrap_or_else(|| Action::new(""));
            out.push((e - p, action, self.text[p..e].to_string()));
        }
        for t in self.tree.forward(token) {
            let Some((p, e)) = self.tree.token_span(t) else { continue };
            let action = self.tree.token_action(t).unwrap_or_else(|| Action::new(""));
            out.push((e - p, action, self.text[p..e].to_string()));
            if e > start {
                break;
            }
        }
        out
    }

    /// Split the reusable tail off into a standalone tree and record,
    /// for each group-head token in it, the new-document position it
    /// would occupy once shifted by `offset`.
    fn carve_tail(&mut self, end_token: NodeId, offset: isize) -> (Vec<NodeId>, Vec<usize>) {
        let splice_root = self.tree.split_right(end_token);
        let mut tokens = Vec::new();
        for t in self.tree.tokens(splice_root) {
            if self.tree.group_head(t) == t {
                tokens.push(t);
            }
        }
        let positions = tokens
            .iter()
            .map(|&t| {
                let (p, _) = self.tree.token_span(t).unwrap_or((0, 0));
                (p as isize + offset).max(0) as usize
            })
            .collect();
        (tokens, positions)
    }

    /// If `event_start` exactly matches a remembered tail position and
    /// the live lexicon stack at `context` reconverges with the tail
    /// token's own, splice the remaining tail in and return how many
    /// tokens were reused. Otherwise prune stale tail entries once the
    /// search has walked far enough past them to not be worth keeping.
    fn try_splice(&mut self, tail_tokens: &mut Vec<NodeId>, tail_positions: &mut Vec<usize>, context: NodeId, event_start: usize, offset: isize) -> Option<usize> {
        match tail_positions.binary_search(&event_start) {
            Ok(idx) => {
                if self.chain_matches(context, tail_tokens[idx]) {
                    self.splice_tail(context, tail_tokens[idx], offset);
                    return Some(tail_tokens.len() - idx);
                }
                if idx > TAIL_PRUNE_THRESHOLD {
                    tail_positions.drain(..idx);
                    tail_tokens.drain(..idx);
                }
                None
            }
            Err(idx) => {
                if idx >= tail_positions.len() {
                    tail_positions.clear();
                    tail_tokens.clear();
                } else if idx > TAIL_PRUNE_THRESHOLD {
                    tail_positions.drain(..idx);
                    tail_tokens.drain(..idx);
                }
                None
            }
        }
    }

    /// True if `live_context`'s own lexicon stack (innermost first) is
    /// identical to the stack `tail_token` used to sit under.
    fn chain_matches(&self, live_context: NodeId, tail_token: NodeId) -> bool {
        let live: Vec<&Arc<dyn LexiconRef>> =
            std::iter::once(live_context).chain(self.tree.ancestors(live_context)).filter_map(|id| self.tree.lexicon(id)).collect();
        let tail: Vec<&Arc<dyn LexiconRef>> = self.tree.ancestors(tail_token).filter_map(|id| self.tree.lexicon(id)).collect();
        live.len() == tail.len() && live.iter().zip(&tail).all(|(a, b)| a.ref_eq(b.as_ref()))
    }

    /// Reattach `tail_token` and everything after it, at every ancestor
    /// level of the standalone tail tree, onto `live_context` and its
    /// own corresponding ancestors, shifting every reused token's
    /// position by `offset` along the way. The tail's own intermediate
    /// containers (built by `split_right` purely to mirror the original
    /// nesting) are left behind unreferenced once their content has
    /// moved; only `live_context`'s existing ancestor chain survives as
    /// the new containers.
    fn splice_tail(&mut self, live_context: NodeId, tail_token: NodeId, offset: isize) {
        let mut tail_node = tail_token;
        let mut live_node = live_context;
        let mut first = true;
        loop {
            let Some(tail_parent) = self.tree.parent(tail_node) else { break };
            let children = self.tree.children(tail_parent);
            let from_idx = match children.iter().position(|&c| c == tail_node) {
                Some(idx) if first => idx,
                Some(idx) => idx + 1,
                None => children.len(),
            };
            let moved = self.tree.detach_from(tail_parent, from_idx);
            if offset != 0 {
                let tokens: Vec<NodeId> = moved.iter().flat_map(|&m| self.tree.tokens(m).collect::<Vec<_>>()).collect();
                for t in tokens {
                    self.tree.shift_token(t, offset);
                }
            }
            for m in moved {
                self.tree.reparent(live_node, m);
            }
            tail_node = tail_parent;
            first = false;
            match self.tree.parent(live_node) {
                Some(lp) => live_node = lp,
                None => break,
            }
        }
    }

    /// The full chain of lexicons from the root down to (and including)
    /// `context`, root-first — what a resumed [`LexerState`] needs.
    fn ancestor_lexicons(&self, context: NodeId) -> Vec<Arc<dyn LexiconRef>> {
        let mut chain: Vec<Arc<dyn LexiconRef>> =
            std::iter::once(context).chain(self.tree.ancestors(context)).filter_map(|id| self.tree.lexicon(id).cloned()).collect();
        chain.reverse();
        chain
    }

    /// Compare the freshly produced tokens starting at `resume_pos`
    /// against the head tokens snapshotted before the edit, advancing
    /// `start_parse` past every token that reproduced exactly. Shrinks
    /// the reported modified range when the edit's own prefix turned
    /// out not to change anything observable.
    fn shrink_start(&self, head: bool, resume_pos: usize, start: usize, start_tokens: &[TokenSnapshot]) -> usize {
        let _ = start;
        if !head {
            return resume_pos;
        }
        let mut start_parse = resume_pos;
        let Some(mut cursor) = self.tree.find_token_after(self.tree.root(), resume_pos) else {
            return start_parse;
        };
        for (old_len, old_action, old_text) in start_tokens {
            let Some((p, e)) = self.tree.token_span(cursor) else { break };
            let action = self.tree.token_action(cursor).unwrap_or_else(|| Action::new(""));
            if e - p != *old_len || action != *old_action || &self.text[p..e] != old_text {
                break;
            }
            start_parse = e;
            match self.tree.forward(cursor).next() {
                Some(next) => cursor = next,
                None => break,
            }
        }
        start_parse
    }
}

fn splice_text(text: &str, start: usize, end: usize, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len() - (end - start) + replacement.len());
    out.push_str(&text[..start]);
    out.push_str(replacement);
    out.push_str(&text[end..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lex_lexicon::{Lexicon, LexiconArg};
    use lex_rule::{Pattern, Rule, RuleAction, RuleItem, TargetItem};

    fn word_lexicon() -> Arc<Lexicon> {
        Lexicon::new(
            "Test.words",
            Arc::new(|_arg: Option<&LexiconArg>| {
                vec![
                    Rule::matching(Pattern::regex(r"\s+"), RuleAction::Single(RuleItem::Fixed(Action::new("Whitespace")))),
                    Rule::matching(Pattern::regex(r"[a-zA-Z]+"), RuleAction::Single(RuleItem::Fixed(Action::new("Word")))),
                    Rule::matching(Pattern::regex(r"[0-9]+"), RuleAction::Single(RuleItem::Fixed(Action::new("Number")))),
                ]
            }),
        )
    }

    fn string_lexicon() -> Arc<Lexicon> {
        Lexicon::new_cyclic("Test.strings", |weak| {
            let weak = weak.clone();
            Arc::new(move |_arg: Option<&LexiconArg>| {
                let this = weak.upgrade().expect("lexicon still alive while parsing");
                vec![
                    Rule::new(
                        Pattern::literal("\""),
                        RuleAction::Single(RuleItem::Fixed(Action::new("String.Start"))),
                        vec![RuleItem::Fixed(TargetItem::Push(this.clone()))],
                    ),
                    Rule::new(
                        Pattern::literal("\""),
                        RuleAction::Single(RuleItem::Fixed(Action::new("String.End"))),
                        vec![RuleItem::Fixed(TargetItem::Delta(-1))],
                    ),
                    Rule::matching(Pattern::regex(r"[^\"]+"), RuleAction::Single(RuleItem::Fixed(Action::new("String.Content")))),
                ]
            })
        })
    }

    fn word_count(doc: &Document) -> usize {
        doc.tree().tokens(doc.tree().root()).count()
    }

    fn token_sequence(doc: &Document) -> Vec<(usize, usize, Action)> {
        doc.tree()
            .tokens(doc.tree().root())
            .map(|t| {
                let (pos, end) = doc.tree().token_span(t).expect("token has a span");
                let action = doc.tree().token_action(t).expect("token has an action");
                (pos, end, action)
            })
            .collect()
    }

    fn assert_matches_full_relex(doc: &Document) {
        let relexed = Document::with_text(Arc::clone(doc.root_lexicon()), doc.text().to_string()).expect("full relex builds");
        assert_eq!(token_sequence(doc), token_sequence(&relexed));
    }

    #[test]
    fn pure_insertion_reuses_a_tail() {
        let root: Arc<dyn LexiconRef> = word_lexicon();
        let mut doc = Document::with_text(root, "alpha beta gamma").expect("build");
        let before = word_count(&doc);
        let stats = doc.modify(6, 6, "x ").expect("modify");
        assert_eq!(doc.text(), "alpha x beta gamma");
        assert_eq!(word_count(&doc), before + 2);
        assert!(stats.nodes_reused > 0, "expected the 'gamma' tail to be reused");
    }

    #[test]
    fn malformed_range_with_start_after_end_is_a_no_op() {
        let root: Arc<dyn LexiconRef> = word_lexicon();
        let mut doc = Document::with_text(root, "alpha beta").expect("build");
        let stats = doc.modify(5, 2, "x").expect("modify");
        assert_eq!(stats, ModifyStats::default());
        assert_eq!(doc.text(), "alpha beta");
        assert_eq!(doc.modified_range(), (0, 0));
    }

    #[test]
    fn no_op_edit_reports_nothing_changed() {
        let root: Arc<dyn LexiconRef> = word_lexicon();
        let mut doc = Document::with_text(root, "alpha beta").expect("build");
        let stats = doc.modify(5, 5, "").expect("modify");
        assert_eq!(stats, ModifyStats::default());
        assert_eq!(doc.modified_range(), (0, 0));
    }

    #[test]
    fn edit_changing_active_lexicon_forces_a_wider_relex() {
        let root: Arc<dyn LexiconRef> = string_lexicon();
        let mut doc = Document::with_text(root, "\"abc\"").expect("build");
        // Inserting a quote in the middle of the string content changes
        // how everything from there on tokenizes: no reusable tail.
        let stats = doc.modify(2, 2, "\"").expect("modify");
        assert_eq!(doc.text(), "\"a\"bc\"");
        assert!(stats.nodes_reparsed > 0);
    }

    #[test]
    fn deletion_within_existing_text_keeps_tree_consistent() {
        let root: Arc<dyn LexiconRef> = word_lexicon();
        let mut doc = Document::with_text(root, "one two three four").expect("build");
        doc.modify(4, 8, "").expect("modify");
        assert_eq!(doc.text(), "one  three four");
        let tokens: Vec<_> = doc.tree().tokens(doc.tree().root()).collect();
        assert!(!tokens.is_empty());
    }

    #[test]
    fn modify_matches_a_full_relex_of_the_resulting_text() {
        let root: Arc<dyn LexiconRef> = word_lexicon();
        let mut doc = Document::with_text(root, "alpha beta gamma").expect("build");
        doc.modify(6, 6, "x ").expect("insertion");
        assert_matches_full_relex(&doc);

        let root: Arc<dyn LexiconRef> = word_lexicon();
        let mut doc = Document::with_text(root, "one two three four").expect("build");
        doc.modify(4, 8, "").expect("deletion");
        assert_matches_full_relex(&doc);

        let root: Arc<dyn LexiconRef> = string_lexicon();
        let mut doc = Document::with_text(root, "\"abc\"").expect("build");
        doc.modify(2, 2, "\"").expect("lexicon-changing edit");
        assert_matches_full_relex(&doc);
    }

    #[test]
    fn set_text_replaces_whole_document() {
        let root: Arc<dyn LexiconRef> = word_lexicon();
        let mut doc = Document::with_text(root, "one two").expect("build");
        doc.set_text("three four five").expect("set_text");
        assert_eq!(doc.text(), "three four five");
        assert_eq!(doc.modified_range(), (0, doc.text().len()));
    }
}
