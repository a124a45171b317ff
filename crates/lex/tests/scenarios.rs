//! End-to-end scenarios exercising the facade as a whole caller would:
//! build a lexicon from the Rule DSL, lex it into a tree, query and
//! transform that tree, and push an edit through `Document::modify`.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use pretty_assertions::assert_eq;

use lex::{
    bygroups, by_match, char_class, default_target, Action, Document, Item, Lexicon, LexiconArg,
    LexiconRef, Pattern, Rule, RuleAction, RuleItem, TargetItem, Transformer,
};

fn json_string_lexicon() -> Arc<Lexicon> {
    Lexicon::new(
        "Json.string",
        Arc::new(|_arg: Option<&LexiconArg>| {
            vec![
                Rule::new(
                    Pattern::literal("\""),
                    RuleAction::Single(RuleItem::Fixed(Action::new("Delimiter"))),
                    vec![RuleItem::Fixed(TargetItem::Delta(-1))],
                ),
                Rule::matching(
                    Pattern::regex(r#"[^"]+"#),
                    RuleAction::Single(RuleItem::Fixed(Action::new("String.Content"))),
                ),
            ]
        }),
    )
}

fn json_value_lexicon() -> Arc<Lexicon> {
    let string_lexicon: Arc<dyn LexiconRef> = json_string_lexicon();
    Lexicon::new_cyclic("Json.value", move |weak| {
        let weak = weak.clone();
        let string_lexicon = Arc::clone(&string_lexicon);
        Arc::new(move |_arg: Option<&LexiconArg>| {
            let this = weak.upgrade().expect("lexicon still alive while parsing");
            vec![
                Rule::new(
                    Pattern::literal("["),
                    RuleAction::Single(RuleItem::Fixed(Action::new("Delimiter"))),
                    vec![RuleItem::Fixed(TargetItem::Push(this.clone()))],
                ),
                Rule::new(
                    Pattern::literal("]"),
                    RuleAction::Single(RuleItem::Fixed(Action::new("Delimiter"))),
                    vec![RuleItem::Fixed(TargetItem::Delta(-1))],
                ),
                Rule::matching(Pattern::literal(","), RuleAction::Single(RuleItem::Fixed(Action::new("Delimiter")))),
                Rule::matching(
                    Pattern::regex(r"true|false|null"),
                    RuleAction::Single(RuleItem::Fixed(Action::new("Name.Constant"))),
                ),
                Rule::matching(Pattern::regex(r"-?[0-9]+"), RuleAction::Single(RuleItem::Fixed(Action::new("Number")))),
                Rule::new(
                    Pattern::literal("\""),
                    RuleAction::Single(RuleItem::Fixed(Action::new("Delimiter"))),
                    vec![RuleItem::Fixed(TargetItem::Push(Arc::clone(&string_lexicon)))],
                ),
            ]
        })
    })
}

/// Reconstructs each context's source text by concatenating its
/// children's spans (tokens) or already-reduced values (sub-contexts).
/// Used to check a transform faithfully round-trips the original text.
fn reconstruct_handler(text: &'static str) -> Arc<dyn Fn(&[Item<String>]) -> String + Send + Sync> {
    Arc::new(move |items: &[Item<String>]| {
        let mut out = String::new();
        for item in items {
            match item {
                Item::Token { pos, end, .. } => out.push_str(&text[*pos..*end]),
                Item::Child { value, .. } => out.push_str(value.as_deref().unwrap_or("")),
            }
        }
        out
    })
}

#[test]
fn json_literal_produces_the_expected_token_shape() {
    let root: Arc<dyn LexiconRef> = json_value_lexicon();
    let text = r#"[1,true,"x"]"#;
    let document = Document::with_text(root, text).expect("document builds");
    let tree = document.tree();
    let root_id = tree.root();

    let open = tree.find_token(root_id, 0).expect("token at 0");
    assert_eq!(tree.token_action(open), Some(Action::new("Delimiter")));
    assert_eq!(tree.token_span(open), Some((0, 1)));

    let number = tree.find_token(root_id, 1).expect("token at 1");
    assert_eq!(tree.token_action(number), Some(Action::new("Number")));
    assert_eq!(tree.token_span(number), Some((1, 2)));

    let constant = tree.find_token(root_id, 3).expect("token at 3");
    assert_eq!(tree.token_action(constant), Some(Action::new("Name.Constant")));
    assert_eq!(tree.token_span(constant), Some((3, 7)));

    let string_content = tree.find_token(root_id, 9).expect("token at 9");
    assert_eq!(tree.token_action(string_content), Some(Action::new("String.Content")));
    assert_eq!(tree.token_span(string_content), Some((9, 10)));

    let close = tree.find_token(root_id, 11).expect("token at 11");
    assert_eq!(tree.token_action(close), Some(Action::new("Delimiter")));
    assert_eq!(tree.token_span(close), Some((11, 12)));
}

#[test]
fn transforming_the_json_literal_round_trips_the_source_text() {
    let root: Arc<dyn LexiconRef> = json_value_lexicon();
    let text = r#"[1,true,"x"]"#;
    let document = Document::with_text(root, text).expect("document builds");

    let mut transformer: Transformer<String> = Transformer::new();
    transformer.add_transform("Json", "value", reconstruct_handler(text));
    transformer.add_transform("Json", "string", reconstruct_handler(text));

    let rebuilt = transformer.transform_tree(document.tree()).expect("transform produces a value");
    assert_eq!(rebuilt, text);
}

#[test]
fn group_match_produces_two_adjacent_tokens_sharing_one_group() {
    let root: Arc<dyn LexiconRef> = Lexicon::new(
        "Group.line",
        Arc::new(|_arg: Option<&LexiconArg>| {
            vec![Rule::matching(
                Pattern::regex(r"(\bvar\b)\s+(\w+)"),
                bygroups([Action::new("Keyword"), Action::new("Name.Variable")]),
            )]
        }),
    );
    let document = Document::with_text(root, "var foo").expect("document builds");
    let tree = document.tree();
    let root_id = tree.root();

    let keyword = tree.find_token(root_id, 0).expect("token at 0");
    assert_eq!(tree.token_action(keyword), Some(Action::new("Keyword")));
    assert_eq!(tree.token_span(keyword), Some((0, 3)));

    let variable = tree.find_token(root_id, 4).expect("token at 4");
    assert_eq!(tree.token_action(variable), Some(Action::new("Name.Variable")));
    assert_eq!(tree.token_span(variable), Some((4, 7)));

    let group = tree.token_group(keyword).expect("keyword is part of a group");
    assert_eq!(tree.token_group(variable), Some(group));
    assert_eq!(tree.group_head(variable), keyword);
}

fn json_container_lexicon() -> Arc<Lexicon> {
    let atom: Arc<dyn LexiconRef> = Lexicon::new(
        "Json.atom",
        Arc::new(|_arg: Option<&LexiconArg>| {
            vec![
                Rule::new(
                    Pattern::regex(r#""[^"]*""#),
                    RuleAction::Single(RuleItem::Fixed(Action::new("String"))),
                    vec![RuleItem::Fixed(TargetItem::Delta(-1))],
                ),
                Rule::new(
                    Pattern::regex(r"[0-9]+"),
                    RuleAction::Single(RuleItem::Fixed(Action::new("Number"))),
                    vec![RuleItem::Fixed(TargetItem::Delta(-1))],
                ),
            ]
        }),
    );
    Lexicon::new(
        "Json.container",
        Arc::new(move |_arg: Option<&LexiconArg>| {
            vec![
                Rule::matching(Pattern::literal("{"), RuleAction::Single(RuleItem::Fixed(Action::new("Delimiter")))),
                Rule::matching(Pattern::literal("}"), RuleAction::Single(RuleItem::Fixed(Action::new("Delimiter")))),
                Rule::matching(Pattern::literal(":"), RuleAction::Single(RuleItem::Fixed(Action::new("Delimiter")))),
                Rule::matching(Pattern::literal(","), RuleAction::Single(RuleItem::Fixed(Action::new("Delimiter")))),
                Rule::matching(
                    Pattern::char_class([' ', '\t', '\n']),
                    RuleAction::Single(RuleItem::Fixed(Action::new("Whitespace"))),
                ),
                default_target(vec![RuleItem::Fixed(TargetItem::Push(Arc::clone(&atom)))]),
            ]
        }),
    )
}

#[test]
fn default_target_fallback_alternates_key_and_value_contexts() {
    let root: Arc<dyn LexiconRef> = json_container_lexicon();
    let document = Document::with_text(root, "{ \"k\" : 1 }").expect("document builds");
    let tree = document.tree();
    let root_id = tree.root();

    let open = tree.find_token(root_id, 0).expect("token at 0");
    assert_eq!(tree.token_action(open), Some(Action::new("Delimiter")));

    let key = tree.find_token(root_id, 2).expect("key token");
    assert_eq!(tree.token_action(key), Some(Action::new("String")));
    assert_eq!(tree.token_span(key), Some((2, 5)));
    assert!(tree.is_context(tree.parent(key).expect("key has a parent context")));

    let colon = tree.find_token(root_id, 6).expect("colon token");
    assert_eq!(tree.token_action(colon), Some(Action::new("Delimiter")));

    let value = tree.find_token(root_id, 8).expect("value token");
    assert_eq!(tree.token_action(value), Some(Action::new("Number")));
    assert_eq!(tree.token_span(value), Some((8, 9)));

    // key and value were lexed in two distinct pushed contexts, not one.
    assert_ne!(tree.parent(key), tree.parent(value));

    let close = tree.find_token(root_id, 10).expect("closing brace");
    assert_eq!(tree.token_action(close), Some(Action::new("Delimiter")));
}

#[test]
fn incremental_edit_preserves_the_tail_after_the_edit() {
    let root: Arc<dyn LexiconRef> = json_container_lexicon();
    let text = r#"{"a":1, "b":2}"#;
    let mut document = Document::with_text(root, text).expect("document builds");

    // insert a digit right after the "1", extending it to "10".
    document.modify(6, 6, "0").expect("modify");
    assert_eq!(document.text(), r#"{"a":10, "b":2}"#);

    let tree = document.tree();
    let root_id = tree.root();
    let (ms, me) = document.modified_range();
    assert!(ms <= 6 && me >= 6, "modified range must cover the edit point, got ({ms}, {me})");

    // the "b" key and its value must have shifted by exactly +1 and kept
    // their action and text unchanged.
    let shifted_value = tree.find_token(root_id, 13).expect("shifted value token");
    assert_eq!(tree.token_action(shifted_value), Some(Action::new("Number")));
    assert_eq!(tree.token_span(shifted_value), Some((13, 14)));
    assert_eq!(&document.text()[13..14], "2");
}

#[test]
fn parameterized_string_lexicon_only_terminates_on_its_own_quote() {
    let base: Arc<Lexicon> = Lexicon::new(
        "Quoted.string",
        Arc::new(|arg: Option<&LexiconArg>| {
            let quote = match arg {
                Some(LexiconArg::Char(c)) => *c,
                _ => '"',
            };
            vec![
                Rule::new(
                    Pattern::literal(quote.to_string()),
                    RuleAction::Single(RuleItem::Fixed(Action::new("String.End"))),
                    vec![RuleItem::Fixed(TargetItem::Delta(-1))],
                ),
                Rule::matching(
                    Pattern::negated_char_class([quote]),
                    RuleAction::Single(RuleItem::Fixed(Action::new("String.Content"))),
                ),
            ]
        }),
    );
    let double: Arc<dyn LexiconRef> = base.derive(LexiconArg::Char('"'));
    let single: Arc<dyn LexiconRef> = base.derive(LexiconArg::Char('\''));

    let entry: Arc<dyn LexiconRef> = Lexicon::new(
        "Quoted.entry",
        Arc::new(move |_arg: Option<&LexiconArg>| {
            vec![
                Rule::new(
                    Pattern::literal("\""),
                    RuleAction::Single(RuleItem::Fixed(Action::new("String.Start"))),
                    vec![RuleItem::Fixed(TargetItem::Push(Arc::clone(&double)))],
                ),
                Rule::new(
                    Pattern::literal("'"),
                    RuleAction::Single(RuleItem::Fixed(Action::new("String.Start"))),
                    vec![RuleItem::Fixed(TargetItem::Push(Arc::clone(&single)))],
                ),
            ]
        }),
    );

    let text = "\"a'b\"";
    let document = Document::with_text(entry, text).expect("document builds");
    let tree = document.tree();
    let root_id = tree.root();

    let start = tree.find_token(root_id, 0).expect("opening quote");
    assert_eq!(tree.token_action(start), Some(Action::new("String.Start")));

    // the apostrophe at position 2 must be absorbed into one content
    // token, not split off as its own delimiter.
    let content = tree.find_token(root_id, 1).expect("content token");
    assert_eq!(tree.token_action(content), Some(Action::new("String.Content")));
    assert_eq!(tree.token_span(content), Some((1, 4)));
    assert_eq!(&document.text()[1..4], "a'b");

    let end = tree.find_token(root_id, 4).expect("closing quote");
    assert_eq!(tree.token_action(end), Some(Action::new("String.End")));
    assert_eq!(tree.token_span(end), Some((4, 5)));
}

#[test]
fn by_match_dynamic_rule_item_dispatches_on_capture_group_presence() {
    let re = regex::Regex::new(r"(?P<kw>var)|(?P<name>\w+)").expect("valid regex");
    let item: RuleItem<&'static str> = by_match(
        |captures| if captures.name("kw").is_some() { 0 } else { 1 },
        vec![vec![RuleItem::Fixed("keyword")], vec![RuleItem::Fixed("identifier")]],
    );
    let caps = re.captures("var").expect("match");
    assert_eq!(lex::resolve_one(&item, "var", &caps), Some("keyword"));
    let caps2 = re.captures("x").expect("match");
    assert_eq!(lex::resolve_one(&item, "x", &caps2), Some("identifier"));
}

#[test]
fn char_class_helper_matches_only_its_members() {
    let pattern = char_class(['a', 'b', 'c']);
    let re = regex::Regex::new(&format!("^{}$", pattern.source())).expect("valid regex");
    assert!(re.is_match("b"));
    assert!(!re.is_match("d"));
}
