//! Word-list → regular-expression optimizer, char-class builder and the
//! literal-pattern fast-path test used by the lexicon compiler.
//!
//! Ported from `parce.regex` (`words2regexp`, `make_trie`,
//! `trie_to_regexp_tuple`, `build_regexp`, `make_charclass`,
//! `common_suffix`, `to_string`). The trie-factoring stage is a
//! faithful-but-simplified reimplementation: rather than Python's
//! frozenset algebra over trie nodes, each trie node memoizes the regex
//! fragment of its subtree and groups sibling edges that produce an
//! identical fragment, which gives the same two properties the original
//! relies on (shared-suffix factoring and single-character alternation
//! collapsing into a character class) without needing a dynamically
//! typed tuple/frozenset value to represent partially-built regexes.
//!
//! Correctness (every word in the input list `fullmatch`es the emitted
//! pattern, and nothing shorter/longer not in the list does) is the
//! invariant that must hold; compactness is best-effort.

#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

use std::collections::BTreeMap;

/// Build an optimized regular expression that matches exactly the words
/// in `words` (fullmatch semantics — callers are expected to anchor the
/// produced fragment themselves, e.g. by embedding it in a larger
/// alternation of named capture groups).
pub fn words2regexp<S: AsRef<str>>(words: &[S]) -> String {
    let words: Vec<String> = words.iter().map(|w| w.as_ref().to_string()).collect();
    if words.is_empty() {
        // an alternation that can never match
        return "(?!)".to_string();
    }
    let (words, suffix) = common_suffix(&words);
    let trie = make_trie(&words, false);
    let body = node_to_regex(&trie);
    if suffix.is_empty() {
        body
    } else {
        format!("{body}{}", escape(&suffix))
    }
}

/// Return `(words_with_common_suffix_removed, suffix)`.
///
/// If there is no common suffix, `words` is returned unchanged and
/// `suffix` is empty.
pub fn common_suffix(words: &[String]) -> (Vec<String>, String) {
    if words.len() < 2 {
        return (words.to_vec(), String::new());
    }
    let mut suffix_chars: Vec<char> = Vec::new();
    let reversed: Vec<Vec<char>> = words.iter().map(|w| w.chars().rev().collect()).collect();
    let min_len = reversed.iter().map(|w| w.len()).min().unwrap_or(0);
    for i in 0..min_len {
        let c = reversed[0][i];
        if reversed.iter().all(|w| w[i] == c) {
            suffix_chars.push(c);
        } else {
            break;
        }
    }
    if suffix_chars.is_empty() {
        return (words.to_vec(), String::new());
    }
    let suffix: String = suffix_chars.into_iter().rev().collect();
    let cut = suffix.chars().count();
    let trimmed = words
        .iter()
        .map(|w| {
            let n = w.chars().count();
            w.chars().take(n - cut).collect()
        })
        .collect();
    (trimmed, suffix)
}

/// A radix-trie node over `char`s. `end` marks that a word ends here;
/// `children` are ordered by first insertion (irrelevant to correctness,
/// kept for deterministic output).
#[derive(Debug, Clone, Default)]
struct TrieNode {
    end: bool,
    children: Vec<(String, TrieNode)>,
}

/// Build a dict-based radix trie from `words`. If `reverse`, the trie is
/// built from the end of each word backwards (used when factoring a
/// common suffix inside one alternation branch).
fn make_trie(words: &[String], reverse: bool) -> TrieNode {
    let mut root = TrieNode::default();
    for w in words {
        let chars: Vec<char> = if reverse {
            w.chars().rev().collect()
        } else {
            w.chars().collect()
        };
        let mut node = &mut root;
        for c in chars {
            let key = c.to_string();
            let idx = match node.children.iter().position(|(k, _)| *k == key) {
                Some(i) => i,
                None => {
                    node.children.push((key, TrieNode::default()));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[idx].1;
        }
        node.end = true;
    }
    merge_chains(&mut root);
    root
}

/// Collapse chains of single-child, non-terminal nodes into one compound
/// edge label (`make_trie`'s `merge` helper).
fn merge_chains(node: &mut TrieNode) {
    for (label, child) in node.children.iter_mut() {
        merge_chains(child);
        while !child.end && child.children.len() == 1 {
            let Some((sub_label, sub_child)) = child.children.pop() else { break };
            label.push_str(&sub_label);
            *child = sub_child;
        }
    }
}

/// Escape a literal string for use inside a regular expression.
pub fn escape(s: &str) -> String {
    regex::escape(s)
}

/// Convert a trie into a regex fragment matching exactly the words it encodes.
fn node_to_regex(node: &TrieNode) -> String {
    if node.children.is_empty() {
        return String::new();
    }
    // group sibling edges by the regex fragment of their continuation,
    // so identical continuations (including empty ones) are factored
    // into a single alternative.
    let mut by_fragment: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    for (label, child) in &node.children {
        let fragment = node_to_regex(child);
        let key = if child.end { format!("$end${fragment}") } else { fragment.clone() };
        if !by_fragment.contains_key(&key) {
            order.push(key.clone());
        }
        by_fragment.entry(key).or_default().push(label.clone());
    }

    let mut alternatives: Vec<String> = Vec::new();
    for key in &order {
        let labels = &by_fragment[key];
        let is_end = key.starts_with("$end$");
        let fragment = if is_end { &key["$end$".len()..] } else { key.as_str() };
        let chars_only = labels.iter().all(|l| l.chars().count() == 1);
        let head = if labels.len() > 1 && chars_only {
            let chars: Vec<char> = labels.iter().filter_map(|l| l.chars().next()).collect();
            format!("[{}]", make_charclass(&chars))
        } else if labels.len() == 1 {
            escape(&labels[0])
        } else {
            let mut escaped: Vec<String> = labels.iter().map(|l| escape(l)).collect();
            escaped.sort();
            format!("(?:{})", escaped.join("|"))
        };
        let tail = if is_end && !fragment.is_empty() {
            format!("(?:{fragment})?")
        } else {
            fragment.to_string()
        };
        alternatives.push(format!("{head}{tail}"));
    }
    if alternatives.len() == 1 {
        alternatives.into_iter().next().unwrap_or_default()
    } else {
        format!("(?:{})", alternatives.join("|"))
    }
}

/// Turn a set of characters into a `[a-z]`-style character class body
/// (without the surrounding brackets), collapsing adjacent code points
/// into ranges and escaping regex metacharacters.
pub fn make_charclass(chars: &[char]) -> String {
    let mut codes: Vec<u32> = chars.iter().map(|&c| c as u32).collect();
    codes.sort_unstable();
    codes.dedup();
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for c in codes {
        if let Some(last) = ranges.last_mut() {
            if last.1 + 1 == c {
                last.1 = c;
                continue;
            }
        }
        ranges.push((c, c));
    }
    let mut out = String::new();
    for (a, b) in ranges {
        let ca = char::from_u32(a).unwrap_or('\u{FFFD}');
        let cb = char::from_u32(b).unwrap_or('\u{FFFD}');
        if a == b {
            out.push_str(&escape_in_class(ca));
        } else if b == a + 1 {
            out.push_str(&escape_in_class(ca));
            out.push_str(&escape_in_class(cb));
        } else {
            out.push_str(&escape_in_class(ca));
            out.push('-');
            out.push_str(&escape_in_class(cb));
        }
    }
    out
}

fn escape_in_class(c: char) -> String {
    if matches!(c, ']' | '\\' | '^' | '-') {
        format!("\\{c}")
    } else {
        c.to_string()
    }
}

/// If `expr` is equivalent to a plain literal string (no unescaped regex
/// metacharacters), return that string so callers can use `str::find`
/// instead of a regex search. Otherwise return `None`.
pub fn to_string(expr: &str) -> Option<String> {
    // bail out early if there are unescaped metacharacters
    let mut chars = expr.chars().peekable();
    let mut stripped = String::new();
    while let Some(c) = chars.next() {
        if c == '\\' {
            // an escaped pair (e.g. `\?`) is removed entirely: the
            // backslash neutralizes the following char, whatever it is
            chars.next();
        } else {
            stripped.push(c);
        }
    }
    if stripped.chars().any(|c| "^$|.()[]{}+*?".contains(c)) {
        return None;
    }

    let mut result = String::new();
    let bytes: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c != '\\' {
            result.push(c);
            i += 1;
            continue;
        }
        i += 1;
        let esc = *bytes.get(i)?;
        match esc {
            'x' => {
                let hex: String = bytes.get(i + 1..i + 3)?.iter().collect();
                let code = u32::from_str_radix(&hex, 16).ok()?;
                result.push(char::from_u32(code)?);
                i += 3;
            }
            'u' => {
                let hex: String = bytes.get(i + 1..i + 5)?.iter().collect();
                let code = u32::from_str_radix(&hex, 16).ok()?;
                result.push(char::from_u32(code)?);
                i += 5;
            }
            'U' => {
                let hex: String = bytes.get(i + 1..i + 9)?.iter().collect();
                let code = u32::from_str_radix(&hex, 16).ok()?;
                result.push(char::from_u32(code)?);
                i += 9;
            }
            'a' => {
                result.push('\u{7}');
                i += 1;
            }
            'f' => {
                result.push('\u{c}');
                i += 1;
            }
            'n' => {
                result.push('\n');
                i += 1;
            }
            'r' => {
                result.push('\r');
                i += 1;
            }
            't' => {
                result.push('\t');
                i += 1;
            }
            'v' => {
                result.push('\u{b}');
                i += 1;
            }
            '^' | '$' | '|' | '.' | '(' | ')' | '[' | ']' | '{' | '}' | '+' | '*' | '?' | '\\' => {
                result.push(esc);
                i += 1;
            }
            _ => return None,
        }
    }
    let pattern = format!("^(?:{expr})$");
    let re = regex::Regex::new(&pattern).ok()?;
    if re.is_match(&result) {
        Some(result)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fullmatch(pattern: &str, s: &str) -> bool {
        let anchored = format!("^(?:{pattern})$");
        match regex::Regex::new(&anchored) {
            Ok(re) => re.is_match(s),
            Err(_) => false,
        }
    }

    #[test]
    fn matches_every_word() {
        let words = ["cat", "car", "cart", "dog", "do"];
        let pattern = words2regexp(&words);
        for w in &words {
            assert!(fullmatch(&pattern, w), "pattern {pattern:?} should match {w:?}");
        }
    }

    #[test]
    fn rejects_non_member_strings() {
        let words = ["cat", "car", "cart"];
        let pattern = words2regexp(&words);
        for bad in ["ca", "carts", "dog", ""] {
            assert!(!fullmatch(&pattern, bad), "pattern {pattern:?} should not match {bad:?}");
        }
    }

    #[test]
    fn single_word() {
        let pattern = words2regexp(&["hello"]);
        assert!(fullmatch(&pattern, "hello"));
        assert!(!fullmatch(&pattern, "hell"));
    }

    #[test]
    fn common_suffix_detected() {
        let (stripped, suffix) = common_suffix(&["running".into(), "jumping".into()]);
        assert_eq!(suffix, "ing");
        assert_eq!(stripped, vec!["runn".to_string(), "jump".to_string()]);
    }

    #[test]
    fn charclass_collapses_ranges() {
        let chars: Vec<char> = "abcdf".chars().collect();
        assert_eq!(make_charclass(&chars), "a-df");
    }

    #[test]
    fn to_string_detects_plain_literal() {
        assert_eq!(to_string("foo").as_deref(), Some("foo"));
        assert_eq!(to_string(r"\n").as_deref(), Some("\n"));
        assert_eq!(to_string("fo.o"), None);
        assert_eq!(to_string(r"\("), Some("(".to_string()));
        assert_eq!(to_string(r"\?"), Some("?".to_string()));
    }

    proptest! {
        #[test]
        fn optimized_regex_fullmatches_every_input_word(
            words in proptest::collection::vec("[a-z]{1,6}", 1..12)
        ) {
            let mut unique: Vec<String> = words;
            unique.sort();
            unique.dedup();
            let pattern = words2regexp(&unique);
            for w in &unique {
                prop_assert!(fullmatch(&pattern, w));
            }
        }

        #[test]
        fn optimized_regex_rejects_perturbations_not_in_the_word_list(
            words in proptest::collection::vec("[a-z]{1,6}", 1..12),
            index in 0usize..12,
            perturbation in 0u8..3,
            extra in "[a-z]"
        ) {
            let mut unique: Vec<String> = words;
            unique.sort();
            unique.dedup();
            prop_assume!(!unique.is_empty());
            let base = unique[index % unique.len()].clone();

            let perturbed = if perturbation == 0 && base.len() > 1 {
                base[..base.len() - 1].to_string()
            } else if perturbation == 1 {
                format!("{base}{extra}")
            } else {
                let mut chars: Vec<char> = base.chars().collect();
                if chars.is_empty() {
                    extra.clone()
                } else {
                    chars[0] = extra.chars().next().unwrap_or('z');
                    chars.into_iter().collect()
                }
            };

            let pattern = words2regexp(&unique);
            if !unique.contains(&perturbed) {
                prop_assert!(!fullmatch(&pattern, &perturbed));
            }
        }
    }
}
