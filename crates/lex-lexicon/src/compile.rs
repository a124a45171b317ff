//! Compilation of a lexicon's rules into a master regex (or a literal
//! fast path) plus the three parse-mode closures described in
//! `Lexicon::get_instance_attributes` of the original Python lexicon
//! module: skip mode, default-action mode and default-target mode.

use regex::Regex;

use lex_action::Action;
use lex_error::{LexError, Result};
use lex_rule::{LexEvent, Rule, RuleAction, RuleHead, RuleItem, TargetItem, TokenPiece};

/// A rule bound to its place in the master regex (or the sole rule of
/// a literal/empty lexicon).
struct BoundRule {
    action: RuleAction,
    target: Vec<RuleItem<TargetItem>>,
    /// Absolute capture-group index of this rule's own wrapper group
    /// (`g_<i>`) in the master regex; subgroup dispatch reads the
    /// rule's own inner groups at `base_capture_index + 1 + k`.
    base_capture_index: usize,
}

enum Engine {
    /// No real patterns at all.
    Empty,
    /// Exactly one rule whose pattern is a plain literal and whose
    /// action/target have no match-dependent items, so plain substring
    /// search replaces the regex engine.
    Literal { needle: String, action: ResolvedAction, target: Vec<TargetItem> },
    /// The general case: one master regex with one named group per rule.
    Regex { regex: Regex, rules: Vec<BoundRule>, group_names: Vec<String> },
}

#[derive(Clone)]
enum ResolvedAction {
    Single(Action),
    Subgroup(Vec<Action>),
}

/// A compiled lexicon: ready to `parse(text, pos)`.
pub struct CompiledLexicon {
    engine: Engine,
    default_action: Option<Action>,
    default_target: Option<Vec<TargetItem>>,
}

fn fixed_items<L: Clone>(items: &[RuleItem<L>]) -> Option<Vec<L>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            RuleItem::Fixed(l) => out.push(l.clone()),
            RuleItem::Dynamic(_) => return None,
        }
    }
    Some(out)
}

fn is_fully_fixed_action(action: &RuleAction) -> Option<ResolvedAction> {
    match action {
        RuleAction::Single(item) => match item {
            RuleItem::Fixed(a) => Some(ResolvedAction::Single(*a)),
            RuleItem::Dynamic(_) => None,
        },
        RuleAction::Subgroup(items) => fixed_items(items).map(ResolvedAction::Subgroup),
    }
}

impl CompiledLexicon {
    pub fn compile(name: &str, rules: Vec<Rule>) -> Result<CompiledLexicon> {
        let mut default_action: Option<Action> = None;
        let mut default_target: Option<Vec<TargetItem>> = None;
        let mut patterns: Vec<String> = Vec::new();
        let mut bound: Vec<(RuleAction, Vec<RuleItem<TargetItem>>)> = Vec::new();

        for rule in rules {
            match rule.head {
                RuleHead::DefaultAction => {
                    let action = rule.action.ok_or_else(|| LexError::InvalidRule {
                        lexicon: name.to_string(),
                        detail: "DEFAULT_ACTION rule carries no action".to_string(),
                    })?;
                    let resolved = is_fully_fixed_action(&action).ok_or_else(|| LexError::InvalidRule {
                        lexicon: name.to_string(),
                        detail: "a default action cannot be resolved dynamically (no match is available)".to_string(),
                    })?;
                    default_action = Some(match resolved {
                        ResolvedAction::Single(a) => a,
                        ResolvedAction::Subgroup(_) => {
                            return Err(LexError::InvalidRule {
                                lexicon: name.to_string(),
                                detail: "a default action must be a single action, not a subgroup dispatch".to_string(),
                            })
                        }
                    });
                }
                RuleHead::DefaultTarget => {
                    let resolved = fixed_items(&rule.target).ok_or_else(|| LexError::InvalidRule {
                        lexicon: name.to_string(),
                        detail: "a default target cannot be resolved dynamically (no match is available)".to_string(),
                    })?;
                    default_target = Some(resolved);
                }
                RuleHead::Pattern(pattern) => {
                    let Some(action) = rule.action else {
                        continue;
                    };
                    let source = pattern.source();
                    if patterns.iter().any(|p| *p == source) {
                        // an identical pattern was already registered; the
                        // first rule to claim a pattern wins, matching the
                        // compiled-lexicon's de-duplication behavior.
                        continue;
                    }
                    patterns.push(source);
                    bound.push((action, rule.target));
                }
            }
        }

        if default_action.is_some() && default_target.is_some() {
            return Err(LexError::InvalidRule {
                lexicon: name.to_string(),
                detail: "a lexicon cannot have both a default action and a default target".to_string(),
            });
        }

        if patterns.is_empty() {
            return Ok(CompiledLexicon { engine: Engine::Empty, default_action, default_target });
        }

        if patterns.len() == 1 {
            let (action, target) = &bound[0];
            if let (Some(resolved_action), Some(resolved_target)) =
                (is_fully_fixed_action(action), fixed_items(target))
            {
                if let ResolvedAction::Single(_) = resolved_action {
                    if let Some(needle) = lex_regex::to_string(&patterns[0]) {
                        return Ok(CompiledLexicon {
                            engine: Engine::Literal { needle, action: resolved_action, target: resolved_target },
                            default_action,
                            default_target,
                        });
                    }
                }
            }
        }

        let group_names: Vec<String> = (0..patterns.len()).map(|i| format!("g_{i}")).collect();
        let combined = patterns
            .iter()
            .zip(&group_names)
            .map(|(p, g)| format!("(?P<{g}>{p})"))
            .collect::<Vec<_>>()
            .join("|");
        let regex = Regex::new(&combined).map_err(|e| LexError::PatternCompile {
            lexicon: name.to_string(),
            pattern: combined.clone(),
            reason: e.to_string(),
        })?;

        let mut base_capture_index = vec![0usize; patterns.len()];
        for (i, name_i) in group_names.iter().enumerate() {
            let idx = regex
                .capture_names()
                .position(|n| n == Some(name_i.as_str()))
                .ok_or_else(|| LexError::PatternCompile {
                    lexicon: name.to_string(),
                    pattern: combined.clone(),
                    reason: format!("named group {name_i} not found after compilation"),
                })?;
            base_capture_index[i] = idx;
        }

        let rules = bound
            .into_iter()
            .zip(base_capture_index)
            .map(|((action, target), base_capture_index)| BoundRule { action, target, base_capture_index })
            .collect();

        Ok(CompiledLexicon { engine: Engine::Regex { regex, rules, group_names }, default_action, default_target })
    }

    /// Parse from `pos`, returning every event up to and including the
    /// first one that carries a target, or to the end of the text if
    /// none does.
    pub fn parse(&self, lexicon_name: &str, text: &str, pos: usize) -> Result<Vec<LexEvent>> {
        match &self.engine {
            Engine::Empty => Ok(self.parse_empty(text, pos)),
            Engine::Literal { needle, action, target } => {
                self.parse_literal(lexicon_name, text, pos, needle, action, target)
            }
            Engine::Regex { regex, rules, group_names } => {
                self.parse_regex(lexicon_name, text, pos, regex, rules, group_names)
            }
        }
    }

    fn parse_empty(&self, text: &str, pos: usize) -> Vec<LexEvent> {
        if let Some(action) = self.default_action {
            if pos < text.len() {
                return vec![gap_event(pos, text.len(), action)];
            }
        } else if let Some(target) = &self.default_target {
            if pos < text.len() {
                return vec![LexEvent { pieces: Vec::new(), target: Some(target.clone()) }];
            }
        }
        Vec::new()
    }

    fn parse_literal(
        &self,
        lexicon_name: &str,
        text: &str,
        mut pos: usize,
        needle: &str,
        action: &ResolvedAction,
        target: &[TargetItem],
    ) -> Result<Vec<LexEvent>> {
        let ResolvedAction::Single(action) = action else {
            return Err(LexError::InvalidRule {
                lexicon: lexicon_name.to_string(),
                detail: "literal fast path only supports a single action".to_string(),
            });
        };
        let mut events = Vec::new();
        let emit_target = if target.is_empty() { None } else { Some(target.to_vec()) };
        let len = needle.len();
        if len == 0 {
            return Err(LexError::NoProgress { lexicon: lexicon_name.to_string(), pos });
        }
        if self.default_target.is_some() {
            while text[pos..].starts_with(needle) {
                let event = LexEvent {
                    pieces: vec![TokenPiece { start: pos, end: pos + len, action: *action }],
                    target: emit_target.clone(),
                };
                let has_target = event.has_target();
                events.push(event);
                pos += len;
                if has_target {
                    return Ok(events);
                }
            }
            if pos < text.len() {
                if let Some(target) = &self.default_target {
                    events.push(LexEvent { pieces: Vec::new(), target: Some(target.clone()) });
                }
            }
            return Ok(events);
        }
        loop {
            match text[pos..].find(needle) {
                None => {
                    if let Some(default_action) = self.default_action {
                        if pos < text.len() {
                            events.push(gap_event(pos, text.len(), default_action));
                        }
                    }
                    break;
                }
                Some(rel) => {
                    let start = pos + rel;
                    if start > pos {
                        if let Some(default_action) = self.default_action {
                            events.push(gap_event(pos, start, default_action));
                        }
                    }
                    let event = LexEvent {
                        pieces: vec![TokenPiece { start, end: start + len, action: *action }],
                        target: emit_target.clone(),
                    };
                    let has_target = event.has_target();
                    events.push(event);
                    pos = start + len;
                    if has_target {
                        break;
                    }
                }
            }
        }
        Ok(events)
    }

    #[allow(clippy::too_many_arguments)]
    fn parse_regex(
        &self,
        lexicon_name: &str,
        text: &str,
        mut pos: usize,
        regex: &Regex,
        rules: &[BoundRule],
        group_names: &[String],
    ) -> Result<Vec<LexEvent>> {
        let mut events = Vec::new();
        if self.default_target.is_some() {
            loop {
                match regex.captures_at(text, pos) {
                    Some(caps) if caps.get(0).is_some_and(|m| m.start() == pos) => {
                        let m0 = caps.get(0).ok_or_else(|| LexError::OutOfBounds { pos, len: text.len() })?;
                        if m0.end() == pos {
                            return Err(LexError::NoProgress { lexicon: lexicon_name.to_string(), pos });
                        }
                        let event = build_event(&caps, rules, group_names, lexicon_name)?;
                        let has_target = event.has_target();
                        events.push(event);
                        pos = m0.end();
                        if has_target {
                            break;
                        }
                        if pos >= text.len() {
                            break;
                        }
                    }
                    _ => {
                        if pos < text.len() {
                            if let Some(target) = &self.default_target {
                                events.push(LexEvent { pieces: Vec::new(), target: Some(target.clone()) });
                            }
                        }
                        break;
                    }
                }
            }
            return Ok(events);
        }

        loop {
            match regex.captures_at(text, pos) {
                None => {
                    if let Some(default_action) = self.default_action {
                        if pos < text.len() {
                            events.push(gap_event(pos, text.len(), default_action));
                        }
                    }
                    break;
                }
                Some(caps) => {
                    let m0 = caps.get(0).ok_or_else(|| LexError::OutOfBounds { pos, len: text.len() })?;
                    if m0.start() > pos {
                        if let Some(default_action) = self.default_action {
                            events.push(gap_event(pos, m0.start(), default_action));
                        }
                    }
                    let event = build_event(&caps, rules, group_names, lexicon_name)?;
                    let has_target = event.has_target();
                    events.push(event);
                    pos = if m0.end() > m0.start() { m0.end() } else { advance_one_char(text, m0.end()) };
                    if has_target {
                        break;
                    }
                    if pos >= text.len() {
                        break;
                    }
                }
            }
        }
        Ok(events)
    }
}

fn advance_one_char(text: &str, pos: usize) -> usize {
    match text[pos..].chars().next() {
        Some(c) => pos + c.len_utf8(),
        None => pos + 1,
    }
}

fn gap_event(start: usize, end: usize, action: Action) -> LexEvent {
    LexEvent { pieces: vec![TokenPiece { start, end, action }], target: None }
}

fn build_event(
    caps: &regex::Captures<'_>,
    rules: &[BoundRule],
    group_names: &[String],
    lexicon_name: &str,
) -> Result<LexEvent> {
    let winner = group_names
        .iter()
        .position(|name| caps.name(name).is_some())
        .ok_or_else(|| LexError::InvalidRule {
            lexicon: lexicon_name.to_string(),
            detail: "no rule's wrapper group participated in a successful match".to_string(),
        })?;
    let rule = &rules[winner];
    let whole = caps.get(0).ok_or_else(|| LexError::InvalidRule {
        lexicon: lexicon_name.to_string(),
        detail: "match had no overall span".to_string(),
    })?;
    let matched_text = whole.as_str();

    let pieces = match &rule.action {
        RuleAction::Single(item) => {
            let action = lex_rule::resolve_one(item, matched_text, caps).ok_or_else(|| LexError::InvalidRule {
                lexicon: lexicon_name.to_string(),
                detail: "a dynamic action resolved to no value".to_string(),
            })?;
            vec![TokenPiece { start: whole.start(), end: whole.end(), action }]
        }
        RuleAction::Subgroup(items) => {
            let mut pieces = Vec::with_capacity(items.len());
            for (k, item) in items.iter().enumerate() {
                let absolute = rule.base_capture_index + 1 + k;
                let Some(group_match) = caps.get(absolute) else { continue };
                let action = lex_rule::resolve_one(item, group_match.as_str(), caps).ok_or_else(|| {
                    LexError::InvalidRule {
                        lexicon: lexicon_name.to_string(),
                        detail: "a dynamic subgroup action resolved to no value".to_string(),
                    }
                })?;
                pieces.push(TokenPiece { start: group_match.start(), end: group_match.end(), action });
            }
            pieces
        }
    };

    let target_items = lex_rule::resolve_items(&rule.target, matched_text, caps);
    let target = if target_items.is_empty() { None } else { Some(target_items) };
    Ok(LexEvent { pieces, target })
}
