//! Evaluate a token tree (or a raw lex event stream) bottom-up, calling
//! a language's handler for each context with its children already
//! reduced to values. Ported from `transform_tree`'s walk, generalized
//! from one fixed `Transformer` class with Python-method-lookup-by-name
//! into a handler table keyed by `(language, lexicon name)`, since Rust
//! has no runtime `getattr`.

#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use lex_action::Action;
use lex_error::Result;
use lex_lexer::{LexStream, LexedItem, LexerState, StackOp};
use lex_rule::LexiconRef;
use lex_tree::{NodeId, Tree};

/// One element a handler sees: either a token inline, or a sub-context
/// already reduced to its value (`None` if no handler was registered
/// for that context's lexicon — the original's "silently no-op").
#[derive(Debug, Clone)]
pub enum Item<V> {
    Token { pos: usize, end: usize, action: Action },
    Child { name: String, value: Option<V> },
}

/// A context-transform handler: receives the ordered items of one
/// context, returns the value that context reduces to.
pub type TransformFn<V> = Arc<dyn Fn(&[Item<V>]) -> V + Send + Sync>;

/// Notifications emitted strictly after a transform's tree mutation (or
/// stream walk) completes.
#[derive(Debug, Clone)]
pub enum Event<V> {
    Started,
    Updated { result: V },
    Finished,
}

type Observer<V> = Arc<dyn Fn(&Event<V>) + Send + Sync>;

/// A small synchronous observer list, notified in subscription order.
pub struct EventBus<V> {
    observers: Vec<Observer<V>>,
}

impl<V> Default for EventBus<V> {
    fn default() -> Self {
        EventBus { observers: Vec::new() }
    }
}

impl<V> EventBus<V> {
    pub fn subscribe(&mut self, observer: Observer<V>) {
        self.observers.push(observer);
    }

    fn emit(&self, event: &Event<V>) {
        for observer in &self.observers {
            observer(event);
        }
    }
}

/// Signals that [`Transformer::interrupt`] fired mid-walk; the partial
/// result is discarded rather than returned.
struct Interrupted;

/// Evaluates a tree (or stream) bottom-up, dispatching each context to
/// the handler registered for its lexicon's `(language, bare name)`.
/// Tree-mode results are cached per [`NodeId`] so re-transforming after
/// a small edit only re-evaluates contexts that actually changed.
pub struct Transformer<V> {
    handlers: HashMap<(String, String), TransformFn<V>>,
    cache: Mutex<HashMap<NodeId, V>>,
    interrupted: AtomicBool,
    bus: Mutex<EventBus<V>>,
}

impl<V: Clone> Default for Transformer<V> {
    fn default() -> Self {
        Transformer { handlers: HashMap::new(), cache: Mutex::new(HashMap::new()), interrupted: AtomicBool::new(false), bus: Mutex::new(EventBus::default()) }
    }
}

impl<V: Clone> Transformer<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `language`'s `lexicon_name` context.
    pub fn add_transform(&mut self, language: impl Into<String>, lexicon_name: impl Into<String>, handler: TransformFn<V>) {
        self.handlers.insert((language.into(), lexicon_name.into()), handler);
    }

    pub fn subscribe(&self, observer: Observer<V>) {
        self.bus.lock().unwrap_or_else(|p| p.into_inner()).subscribe(observer);
    }

    /// Request the in-progress walk stop at the next context boundary.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
    }

    /// Drop every cached per-context result (tree mode only); callers do
    /// this after a structural edit invalidates cached nodes they can't
    /// individually name.
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    fn emit(&self, event: Event<V>) {
        self.bus.lock().unwrap_or_else(|p| p.into_inner()).emit(&event);
    }

    fn handler_for(&self, lexicon: &Arc<dyn LexiconRef>) -> Option<&TransformFn<V>> {
        let (language, bare) = split_lexicon_name(lexicon.name());
        self.handlers.get(&(language.to_string(), bare.to_string()))
    }

    /// Evaluate the whole tree, bottom-up, caching each context's result.
    pub fn transform_tree(&self, tree: &Tree) -> Option<V> {
        self.interrupted.store(false, Ordering::Relaxed);
        self.emit(Event::Started);
        let result = match self.eval_context(tree, tree.root()) {
            Ok(value) => value,
            Err(Interrupted) => None,
        };
        if let Some(result) = &result {
            self.emit(Event::Updated { result: result.clone() });
        }
        self.emit(Event::Finished);
        result
    }

    fn eval_context(&self, tree: &Tree, context: NodeId) -> std::result::Result<Option<V>, Interrupted> {
        if self.interrupted.load(Ordering::Relaxed) {
            tracing::debug!(?context, "transform interrupted");
            return Err(Interrupted);
        }
        {
            let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(value) = cache.get(&context) {
                tracing::trace!(?context, "context cache hit");
                return Ok(Some(value.clone()));
            }
        }
        let mut items = Vec::new();
        for &child in tree.children(context) {
            if tree.is_token(child) {
                if let (Some((pos, end)), Some(action)) = (tree.token_span(child), tree.token_action(child)) {
                    items.push(Item::Token { pos, end, action });
                }
            } else {
                let value = self.eval_context(tree, child)?;
                let name = tree.lexicon(child).map(|l| l.name().to_string()).unwrap_or_default();
                items.push(Item::Child { name, value });
            }
        }
        let Some(lexicon) = tree.lexicon(context) else { return Ok(None) };
        tracing::trace!(?context, lexicon = %lexicon.name(), "evaluating context");
        let result = self.handler_for(lexicon).map(|handler| handler(&items));
        if let Some(value) = &result {
            self.cache.lock().unwrap_or_else(|p| p.into_inner()).insert(context, value.clone());
        }
        Ok(result)
    }

    /// Evaluate straight from a lex event stream, without ever building
    /// a [`Tree`] — for throwaway evaluation (decoding a literal to a
    /// value, say) where keeping the parsed structure around afterward
    /// is wasted work.
    pub fn transform_stream(&self, text: &str, state: LexerState) -> Result<Option<V>> {
        self.interrupted.store(false, Ordering::Relaxed);
        self.emit(Event::Started);
        let root_lexicon = Arc::clone(state.top());
        let mut stream = LexStream::new(text, state);
        let mut frames: Vec<(Arc<dyn LexiconRef>, Vec<Item<V>>)> = vec![(root_lexicon, Vec::new())];

        while let Some(item) = stream.next() {
            match item? {
                LexedItem::Token(piece) => {
                    if let Some((_, items)) = frames.last_mut() {
                        items.push(Item::Token { pos: piece.start, end: piece.end, action: piece.action });
                    }
                }
                LexedItem::Group(pieces) => {
                    if let Some((_, items)) = frames.last_mut() {
                        for piece in pieces {
                            items.push(Item::Token { pos: piece.start, end: piece.end, action: piece.action });
                        }
                    }
                }
                LexedItem::StackOp(StackOp::Push(lexicon)) => {
                    tracing::trace!(lexicon = %lexicon.name(), "stream push");
                    frames.push((lexicon, Vec::new()));
                }
                LexedItem::StackOp(StackOp::Pop) => {
                    if frames.len() > 1 {
                        if let Some(frame) = frames.pop() {
                            self.reduce_frame(frame, &mut frames);
                        }
                    }
                }
            }
            if self.interrupted.load(Ordering::Relaxed) {
                break;
            }
        }

        let mut result = None;
        while let Some(frame) = frames.pop() {
            if frames.is_empty() {
                result = self.handler_for(&frame.0).map(|handler| handler(&frame.1));
            } else {
                self.reduce_frame(frame, &mut frames);
            }
        }

        if let Some(result) = &result {
            self.emit(Event::Updated { result: result.clone() });
        }
        self.emit(Event::Finished);
        Ok(result)
    }

    fn reduce_frame(&self, frame: (Arc<dyn LexiconRef>, Vec<Item<V>>), frames: &mut [(Arc<dyn LexiconRef>, Vec<Item<V>>)]) {
        let (lexicon, items) = frame;
        let value = self.handler_for(&lexicon).map(|handler| handler(&items));
        if let Some((_, parent_items)) = frames.last_mut() {
            parent_items.push(Item::Child { name: lexicon.name().to_string(), value });
        }
    }
}

fn split_lexicon_name(full: &str) -> (&str, &str) {
    match full.split_once('.') {
        Some((language, rest)) => (language, rest),
        None => ("", full),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lex_lexicon::{Lexicon, LexiconArg};
    use lex_tree::TreeBuilder;
    use lex_rule::{Pattern, Rule, RuleAction, RuleItem};

    fn number_list_lexicon() -> Arc<Lexicon> {
        Lexicon::new(
            "Numbers.list",
            Arc::new(|_arg: Option<&LexiconArg>| {
                vec![
                    Rule::matching(Pattern::regex(r"\s+"), RuleAction::Single(RuleItem::Fixed(Action::new("Whitespace")))),
                    Rule::matching(Pattern::regex(r"[0-9]+"), RuleAction::Single(RuleItem::Fixed(Action::new("Number")))),
                ]
            }),
        )
    }

    fn sum_transformer() -> Transformer<i64> {
        let mut t = Transformer::new();
        t.add_transform(
            "Numbers",
            "list",
            Arc::new(|items: &[Item<i64>]| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Item::Token { action, .. } if *action == Action::new("Number") => Some(1i64),
                        _ => None,
                    })
                    .sum::<i64>()
            }),
        );
        t
    }

    #[test]
    fn transform_tree_counts_numbers() {
        let root: Arc<dyn LexiconRef> = number_list_lexicon();
        let tree = TreeBuilder::build("12 34 56", LexerState::new(root)).expect("build");
        let transformer = sum_transformer();
        assert_eq!(transformer.transform_tree(&tree), Some(3));
    }

    #[test]
    fn transform_tree_caches_per_context() {
        let root: Arc<dyn LexiconRef> = number_list_lexicon();
        let tree = TreeBuilder::build("1 2", LexerState::new(root)).expect("build");
        let transformer = sum_transformer();
        let first = transformer.transform_tree(&tree);
        let second = transformer.transform_tree(&tree);
        assert_eq!(first, second);
    }

    #[test]
    fn missing_handler_yields_none_without_aborting() {
        let root: Arc<dyn LexiconRef> = number_list_lexicon();
        let tree = TreeBuilder::build("1 2", LexerState::new(root)).expect("build");
        let transformer: Transformer<i64> = Transformer::new();
        assert_eq!(transformer.transform_tree(&tree), None);
    }

    #[test]
    fn transform_stream_matches_tree_result() {
        let root: Arc<dyn LexiconRef> = number_list_lexicon();
        let transformer = sum_transformer();
        let result = transformer.transform_stream("7 8 9", LexerState::new(Arc::clone(&root))).expect("transform");
        assert_eq!(result, Some(3));
    }

    #[test]
    fn interrupt_stops_the_walk_early() {
        let root: Arc<dyn LexiconRef> = number_list_lexicon();
        let tree = TreeBuilder::build("1 2 3", LexerState::new(root)).expect("build");
        let transformer = sum_transformer();
        transformer.interrupt();
        assert_eq!(transformer.transform_tree(&tree), None);
    }

    #[test]
    fn event_bus_reports_started_and_finished() {
        let root: Arc<dyn LexiconRef> = number_list_lexicon();
        let tree = TreeBuilder::build("1", LexerState::new(root)).expect("build");
        let transformer = sum_transformer();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        transformer.subscribe(Arc::new(move |event: &Event<i64>| {
            let label = match event {
                Event::Started => "started",
                Event::Updated { .. } => "updated",
                Event::Finished => "finished",
            };
            log_clone.lock().unwrap_or_else(|p| p.into_inner()).push(label);
        }));
        transformer.transform_tree(&tree);
        let log = log.lock().unwrap_or_else(|p| p.into_inner());
        assert_eq!(&*log, &["started", "updated", "finished"]);
    }
}
