//! Compiled label matchers and the matcher-expression grammar (spec §4.2, §6).

mod parser;

pub use parser::parse_matchers;

use crate::error::{MatcherError, MatcherResult};
use crate::types::LabelSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Equal,
    NotEqual,
    MatchRegex,
    NotMatchRegex,
}

impl Op {
    pub fn is_regex(&self) -> bool {
        matches!(self, Op::MatchRegex | Op::NotMatchRegex)
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, Op::NotEqual | Op::NotMatchRegex)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Equal => "=",
            Op::NotEqual => "!=",
            Op::MatchRegex => "=~",
            Op::NotMatchRegex => "!~",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Op {
    type Err = MatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" => Ok(Op::Equal),
            "!=" => Ok(Op::NotEqual),
            "=~" => Ok(Op::MatchRegex),
            "!~" => Ok(Op::NotMatchRegex),
            other => Err(MatcherError::ParseError {
                start: 0,
                end: other.len(),
                text: other.to_string(),
                reason: "invalid operator".to_string(),
            }),
        }
    }
}

/// A single `name op value` predicate over a label set (spec §3 "Matcher").
///
/// Regex matchers are anchored as `^(?:pattern)$` at construction time so
/// that implementations agree on match semantics regardless of which regex
/// engine backs them (spec §9 "Regex anchoring").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matcher {
    pub name: String,
    pub value: String,
    pub op: Op,
    #[serde(skip)]
    regex: Option<Regex>,
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value && self.op == other.op
    }
}
impl Eq for Matcher {}

impl Matcher {
    pub fn new(name: impl Into<String>, op: Op, value: impl Into<String>) -> MatcherResult<Self> {
        let name = name.into();
        let value = value.into();
        validate_label_name(&name)?;
        let regex = if op.is_regex() {
            let anchored = format!("^(?:{value})$");
            let re = Regex::new(&anchored)
                .map_err(|e| MatcherError::InvalidRegex(value.clone(), e.to_string()))?;
            Some(re)
        } else {
            None
        };
        Ok(Matcher { name, value, op, regex })
    }

    /// Matches iff the referenced label's value (empty string if absent)
    /// satisfies `op value` (spec §3 "Matcher").
    pub fn matches(&self, labels: &LabelSet) -> bool {
        let actual = labels.get(self.name.as_str()).map(String::as_str).unwrap_or("");
        match self.op {
            Op::Equal => actual == self.value,
            Op::NotEqual => actual != self.value,
            Op::MatchRegex => self.regex.as_ref().expect("regex compiled at construction").is_match(actual),
            Op::NotMatchRegex => !self.regex.as_ref().expect("regex compiled at construction").is_match(actual),
        }
    }

    /// Renders the matcher back to its canonical textual form; the inverse of
    /// [`parse_matchers`] (spec §8 "Matcher grammar round-trip").
    pub fn render(&self) -> String {
        format!("{}{}{}", self.name, self.op, quote(&self.value))
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn validate_label_name(name: &str) -> MatcherResult<()> {
    let mut chars = name.chars();
    let first = chars.next().ok_or_else(|| MatcherError::InvalidLabelName(name.to_string()))?;
    if !(first.is_ascii_alphabetic() || first == '_' || first == ':') {
        return Err(MatcherError::InvalidLabelName(name.to_string()));
    }
    for c in chars {
        if !(c.is_ascii_alphanumeric() || c == '_' || c == ':') {
            return Err(MatcherError::InvalidLabelName(name.to_string()));
        }
    }
    Ok(())
}

/// An ordered set of matchers evaluated as a conjunction (spec §3 "Silence":
/// "matches an alert iff every matcher matches").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matchers(pub Vec<Matcher>);

impl Matchers {
    pub fn new(matchers: Vec<Matcher>) -> Self {
        Matchers(matchers)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Matcher> {
        self.0.iter()
    }

    /// Matches iff every contained matcher matches the label set
    /// (O(#matchers x cost-per-matcher), spec §4.2).
    pub fn matches(&self, labels: &LabelSet) -> bool {
        self.0.iter().all(|m| m.matches(labels))
    }
}

impl fmt::Display for Matchers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, m) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{m}")?;
        }
        write!(f, "}}")
    }
}
