//! Query compiler: user-facing search syntax to a structured query tree.
//!
//! Supported syntax:
//!
//! | Input | Meaning |
//! |-------|---------|
//! | `health food` | every word must match (default, AND) |
//! | `health OR food` | either side may match |
//! | `"health food"` | exact phrase |
//! | `"health food" OR nutrition` | phrase or term |
//!
//! `OR` is case-insensitive. Quoted text is never split, so `"salt OR
//! pepper"` is a single phrase. An unterminated quote is kept as ordinary
//! text, stray quote included.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// How a [`QueryNode::WeightedMatch`] treats its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Every word must appear somewhere in the weighted field set. Empty
    /// text matches nothing.
    And,
    /// The exact word sequence must appear in at least one field.
    Phrase,
}

/// Compiled query tree consumed by the index client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QueryNode {
    MatchAll,
    WeightedMatch { text: String, mode: MatchMode },
    Or(Vec<QueryNode>),
}

impl QueryNode {
    pub fn and(text: impl Into<String>) -> Self {
        QueryNode::WeightedMatch {
            text: text.into(),
            mode: MatchMode::And,
        }
    }

    pub fn phrase(text: impl Into<String>) -> Self {
        QueryNode::WeightedMatch {
            text: text.into(),
            mode: MatchMode::Phrase,
        }
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, QueryNode::MatchAll)
    }
}

/// A searchable field and its relevance boost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldWeight {
    pub field: &'static str,
    pub boost: f64,
}

/// Fields every clause searches, highest priority first. Identical for
/// AND and phrase clauses.
pub const SEARCH_FIELDS: [FieldWeight; 6] = [
    FieldWeight { field: "title", boost: 5.0 },
    FieldWeight { field: "description", boost: 3.0 },
    FieldWeight { field: "publisher", boost: 3.0 },
    FieldWeight { field: "keyword", boost: 2.0 },
    FieldWeight { field: "theme", boost: 1.0 },
    FieldWeight { field: "identifier", boost: 1.0 },
];

static PHRASE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("valid regex"));
static LEADING_OR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*OR(?:\s+|$)").expect("valid regex"));
static TRAILING_OR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|\s+)OR\s*$").expect("valid regex"));
static OR_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+OR\s+").expect("valid regex"));

/// Compile a raw query string into a [`QueryNode`].
///
/// Empty or whitespace-only input yields [`QueryNode::MatchAll`]. Text with
/// no phrases and no `OR` becomes a single AND match, which is the
/// behaviour plain keyword searches have always had.
pub fn compile(raw: &str) -> QueryNode {
    let query = raw.trim();
    if query.is_empty() {
        return QueryNode::MatchAll;
    }

    let phrases: Vec<&str> = PHRASE
        .captures_iter(query)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    let without_phrases = PHRASE.replace_all(query, "");
    let remaining = LEADING_OR.replace(without_phrases.trim(), "");
    let remaining = TRAILING_OR.replace(remaining.trim(), "");
    let remaining = remaining.trim();

    if phrases.is_empty() && !OR_SPLIT.is_match(remaining) {
        if remaining.is_empty() {
            return QueryNode::MatchAll;
        }
        return QueryNode::and(remaining);
    }

    let mut clauses: Vec<QueryNode> = phrases.into_iter().map(QueryNode::phrase).collect();
    clauses.extend(
        OR_SPLIT
            .split(remaining)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(QueryNode::and),
    );

    match clauses.len() {
        0 => QueryNode::MatchAll,
        1 => clauses.remove(0),
        _ => QueryNode::Or(clauses),
    }
}

/// [`compile`] for callers holding an optional query (e.g. an absent
/// request parameter).
pub fn compile_optional(raw: Option<&str>) -> QueryNode {
    raw.map(compile).unwrap_or(QueryNode::MatchAll)
}
