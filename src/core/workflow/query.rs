//! Dependency path expressions evaluated over a step index.
//!
//! The grammar is a small JSONPath subset: `[$[.]] field ( .field | [*] | [n] )*`, where a
//! field is a stage name or `*`. A field selects a stage's entry list; a bracket selects
//! entries of that list; a field after a sub-workflow entry descends into it.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::index::{StageEntry, StepIndex};
use std::fmt;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("empty path expression")]
    Empty,
    #[error("unexpected character '{found}' at offset {offset} in '{expr}'")]
    Unexpected {
        expr: String,
        offset: usize,
        found: char,
    },
    #[error("unterminated selector in '{0}'")]
    Unterminated(String),
    #[error("invalid index selector '{selector}' in '{expr}'")]
    InvalidIndex { expr: String, selector: String },
    #[error("path expression '{0}' must start with a stage name")]
    MissingStage(String),
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        AppError::new(ErrorCategory::ConfigurationError, err.to_string()).with_code("RF-QUERY-001")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Selector {
    Field(String),
    AnyField,
    Index(usize),
    AnyIndex,
}

/// Element of a resolved match path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathElement {
    Field(String),
    Index(usize),
}

/// Parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    source: String,
    selectors: Vec<Selector>,
}

/// Value found at a match: a whole stage list or a single entry of one.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchValue {
    List(Vec<StageEntry>),
    Entry(StageEntry),
}

impl MatchValue {
    pub fn entries(&self) -> Vec<&StageEntry> {
        match self {
            MatchValue::List(entries) => entries.iter().collect(),
            MatchValue::Entry(entry) => vec![entry],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub path: Vec<PathElement>,
    pub value: MatchValue,
}

impl QueryMatch {
    pub fn path_string(&self) -> String {
        let mut out = String::new();
        for element in &self.path {
            match element {
                PathElement::Field(name) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(name);
                }
                PathElement::Index(index) => out.push_str(&format!("[{}]", index)),
            }
        }
        out
    }
}

#[derive(Clone, Copy)]
enum Cursor<'a> {
    Index(&'a StepIndex),
    List(&'a [StageEntry]),
    Entry(&'a StageEntry),
}

impl PathExpr {
    pub fn parse(expr: &str) -> Result<Self, QueryError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(QueryError::Empty);
        }
        let chars: Vec<char> = trimmed.chars().collect();
        let mut pos = 0;
        if chars[0] == '$' {
            pos = 1;
            if pos < chars.len() && chars[pos] == '.' {
                pos += 1;
            }
        }
        let mut selectors = Vec::new();
        let mut expect_field = true;
        while pos < chars.len() {
            let c = chars[pos];
            if expect_field {
                if c == '*' {
                    selectors.push(Selector::AnyField);
                    pos += 1;
                } else if is_ident_char(c) {
                    let start = pos;
                    while pos < chars.len() && is_ident_char(chars[pos]) {
                        pos += 1;
                    }
                    selectors.push(Selector::Field(chars[start..pos].iter().collect()));
                } else {
                    return Err(QueryError::Unexpected {
                        expr: trimmed.to_string(),
                        offset: pos,
                        found: c,
                    });
                }
                expect_field = false;
                continue;
            }
            match c {
                '.' => {
                    expect_field = true;
                    pos += 1;
                }
                '[' => {
                    let close = chars[pos..]
                        .iter()
                        .position(|&ch| ch == ']')
                        .map(|offset| pos + offset)
                        .ok_or_else(|| QueryError::Unterminated(trimmed.to_string()))?;
                    let inner: String = chars[pos + 1..close].iter().collect();
                    let inner = inner.trim();
                    if inner == "*" {
                        selectors.push(Selector::AnyIndex);
                    } else {
                        let index = inner.parse::<usize>().map_err(|_| QueryError::InvalidIndex {
                            expr: trimmed.to_string(),
                            selector: inner.to_string(),
                        })?;
                        selectors.push(Selector::Index(index));
                    }
                    pos = close + 1;
                }
                other => {
                    return Err(QueryError::Unexpected {
                        expr: trimmed.to_string(),
                        offset: pos,
                        found: other,
                    })
                }
            }
        }
        if expect_field {
            // Trailing '.' or a bare '$'.
            return Err(if selectors.is_empty() {
                QueryError::MissingStage(trimmed.to_string())
            } else {
                QueryError::Unexpected {
                    expr: trimmed.to_string(),
                    offset: chars.len() - 1,
                    found: '.',
                }
            });
        }
        Ok(Self {
            source: trimmed.to_string(),
            selectors,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a step index, returning matches in document order.
    pub fn evaluate(&self, index: &StepIndex) -> Vec<QueryMatch> {
        let mut current: Vec<(Vec<PathElement>, Cursor<'_>)> = vec![(Vec::new(), Cursor::Index(index))];
        for selector in &self.selectors {
            let mut next = Vec::new();
            for (path, cursor) in current {
                step(selector, &path, cursor, &mut next);
            }
            current = next;
        }
        current
            .into_iter()
            .filter_map(|(path, cursor)| match cursor {
                Cursor::List(entries) => Some(QueryMatch {
                    path,
                    value: MatchValue::List(entries.to_vec()),
                }),
                Cursor::Entry(entry) => Some(QueryMatch {
                    path,
                    value: MatchValue::Entry(entry.clone()),
                }),
                Cursor::Index(_) => None,
            })
            .collect()
    }
}

fn step<'a>(
    selector: &Selector,
    path: &[PathElement],
    cursor: Cursor<'a>,
    out: &mut Vec<(Vec<PathElement>, Cursor<'a>)>,
) {
    let stages = match cursor {
        Cursor::Index(index) => Some(index),
        Cursor::Entry(StageEntry::Scope(sub)) => Some(&sub.index),
        _ => None,
    };
    match (selector, stages, cursor) {
        (Selector::Field(name), Some(index), _) => {
            if let Some(entries) = index.stages.get(name) {
                out.push((extend(path, PathElement::Field(name.clone())), Cursor::List(entries)));
            }
        }
        (Selector::AnyField, Some(index), _) => {
            for (name, entries) in &index.stages {
                out.push((extend(path, PathElement::Field(name.clone())), Cursor::List(entries)));
            }
        }
        (Selector::Index(i), _, Cursor::List(entries)) => {
            if let Some(entry) = entries.get(*i) {
                out.push((extend(path, PathElement::Index(*i)), Cursor::Entry(entry)));
            }
        }
        (Selector::AnyIndex, _, Cursor::List(entries)) => {
            for (i, entry) in entries.iter().enumerate() {
                out.push((extend(path, PathElement::Index(i)), Cursor::Entry(entry)));
            }
        }
        _ => {}
    }
}

fn extend(path: &[PathElement], element: PathElement) -> Vec<PathElement> {
    let mut next = path.to_vec();
    next.push(element);
    next
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::str::FromStr for PathExpr {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathExpr::parse(s)
    }
}
