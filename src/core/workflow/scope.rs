use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a scope path: a stage name or the index of a sub-workflow under it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Stage(String),
    Index(usize),
}

impl Segment {
    /// Key under which this segment is stored in the bookkeeping tree.
    pub fn key(&self) -> String {
        match self {
            Segment::Stage(name) => name.clone(),
            Segment::Index(index) => index.to_string(),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Stage(name) => write!(f, "{}", name.replace('~', "~0").replace('/', "~1")),
            Segment::Index(index) => write!(f, "{}", index),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("scope path must be empty or start with '/': {0}")]
    MissingLeadingSlash(String),
    #[error("scope path contains an empty segment: {0}")]
    EmptySegment(String),
    #[error("invalid escape sequence in scope segment: {0}")]
    InvalidEscape(String),
}

impl From<ScopeError> for AppError {
    fn from(err: ScopeError) -> Self {
        AppError::new(ErrorCategory::ValidationError, err.to_string()).with_code("RF-SCOPE-001")
    }
}

/// Hierarchical address into the step index and bookkeeping trees.
///
/// Rendered as a JSON pointer: the root scope is `""`, the first sub-workflow expanded
/// by stage `map` is `"/map/0"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Scope {
    segments: Vec<Segment>,
}

impl Scope {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn parse(text: &str) -> Result<Self, ScopeError> {
        if text.is_empty() {
            return Ok(Self::root());
        }
        let rest = text
            .strip_prefix('/')
            .ok_or_else(|| ScopeError::MissingLeadingSlash(text.to_string()))?;
        let mut segments = Vec::new();
        for raw in rest.split('/') {
            if raw.is_empty() {
                return Err(ScopeError::EmptySegment(text.to_string()));
            }
            if raw.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(index) = raw.parse::<usize>() {
                    segments.push(Segment::Index(index));
                    continue;
                }
            }
            segments.push(Segment::Stage(unescape(raw)?));
        }
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Concatenate a relative offset onto this scope.
    pub fn join(&self, relative: &Scope) -> Scope {
        let mut segments = self.segments.clone();
        segments.extend(relative.segments.iter().cloned());
        Scope { segments }
    }

    /// Scope of the `index`-th sub-workflow expanded under `stage`.
    pub fn child(&self, stage: &str, index: usize) -> Scope {
        let mut segments = self.segments.clone();
        segments.push(Segment::Stage(stage.to_string()));
        segments.push(Segment::Index(index));
        Scope { segments }
    }

    pub fn starts_with(&self, prefix: &Scope) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Every sub-workflow scope on the way to this one, outermost first, including itself.
    pub fn ancestors(&self) -> Vec<Scope> {
        (1..=self.segments.len() / 2)
            .map(|pairs| Scope {
                segments: self.segments[..pairs * 2].to_vec(),
            })
            .collect()
    }
}

fn unescape(raw: &str) -> Result<String, ScopeError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return Err(ScopeError::InvalidEscape(raw.to_string())),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Scope {
    type Error = ScopeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Scope::parse(&value)
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

impl std::str::FromStr for Scope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::parse(s)
    }
}
