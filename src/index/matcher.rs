//! Label matchers and their resolution to postings

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::index::error::{IndexError, IndexResult};
use crate::index::postings::{intersect, merge, BoxPostings, WithoutPostings};
use crate::index::reader::IndexReader;
use crate::index::types::ShardAnnotation;

/// Narrow "does this value satisfy the predicate" contract used to select
/// label values.
pub trait ValuePredicate {
    fn matches(&self, value: &str) -> bool;
}

impl<F> ValuePredicate for F
where
    F: Fn(&str) -> bool,
{
    fn matches(&self, value: &str) -> bool {
        self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

impl MatchType {
    fn operator(&self) -> &'static str {
        match self {
            MatchType::Equal => "=",
            MatchType::NotEqual => "!=",
            MatchType::Regex => "=~",
            MatchType::NotRegex => "!~",
        }
    }
}

/// Selects series by the value of one label. A missing label reads as the
/// empty string.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub kind: MatchType,
    pub name: String,
    pub value: String,
    re: Option<Regex>,
}

impl Matcher {
    pub fn new(kind: MatchType, name: impl Into<String>, value: impl Into<String>) -> IndexResult<Self> {
        let value = value.into();
        let re = match kind {
            MatchType::Regex | MatchType::NotRegex => {
                let anchored = format!("^(?:{})$", value);
                let re = Regex::new(&anchored).map_err(|e| {
                    IndexError::InvalidArgument(format!("invalid regex {:?}: {}", value, e))
                })?;
                Some(re)
            }
            MatchType::Equal | MatchType::NotEqual => None,
        };
        Ok(Self {
            kind,
            name: name.into(),
            value,
            re,
        })
    }

    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: MatchType::Equal,
            name: name.into(),
            value: value.into(),
            re: None,
        }
    }

    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: MatchType::NotEqual,
            name: name.into(),
            value: value.into(),
            re: None,
        }
    }

    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> IndexResult<Self> {
        Self::new(MatchType::Regex, name, pattern)
    }

    pub fn not_regex(name: impl Into<String>, pattern: impl Into<String>) -> IndexResult<Self> {
        Self::new(MatchType::NotRegex, name, pattern)
    }

    pub fn matches(&self, value: &str) -> bool {
        match (self.kind, &self.re) {
            (MatchType::Equal, _) => value == self.value,
            (MatchType::NotEqual, _) => value != self.value,
            (MatchType::Regex, Some(re)) => re.is_match(value),
            (MatchType::NotRegex, Some(re)) => !re.is_match(value),
            (MatchType::Regex | MatchType::NotRegex, None) => false,
        }
    }
}

impl ValuePredicate for Matcher {
    fn matches(&self, value: &str) -> bool {
        Matcher::matches(self, value)
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.kind.operator(), self.value)
    }
}

impl FromStr for Matcher {
    type Err = IndexError;

    /// Parse `name=value`, `name!=value`, `name=~re` or `name!~re`. Values
    /// may be wrapped in double quotes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(pos) = s.find(['=', '!']) else {
            return Err(IndexError::InvalidArgument(format!("invalid matcher {:?}", s)));
        };
        let name = s[..pos].trim();
        let rest = &s[pos..];
        let (kind, value) = if let Some(v) = rest.strip_prefix("=~") {
            (MatchType::Regex, v)
        } else if let Some(v) = rest.strip_prefix("!~") {
            (MatchType::NotRegex, v)
        } else if let Some(v) = rest.strip_prefix("!=") {
            (MatchType::NotEqual, v)
        } else if let Some(v) = rest.strip_prefix('=') {
            (MatchType::Equal, v)
        } else {
            return Err(IndexError::InvalidArgument(format!("invalid matcher {:?}", s)));
        };
        if name.is_empty() {
            return Err(IndexError::InvalidArgument(format!("matcher {:?} has no label name", s)));
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        Matcher::new(kind, name, value)
    }
}

/// Postings of the series selected by all of `matchers`, optionally limited
/// to one shard.
///
/// Matchers that reject the empty string select the series carrying a
/// matching value and are intersected. Matchers that accept it also select
/// series without the label, so they subtract the series whose value they
/// reject instead. With no selecting matcher the base is every series.
pub fn postings_for_matchers(
    reader: &IndexReader,
    shard: Option<&ShardAnnotation>,
    matchers: &[Matcher],
) -> IndexResult<BoxPostings> {
    let mut its = Vec::new();
    let mut removals = Vec::new();

    for m in matchers {
        if m.matches("") {
            let inverse = |v: &str| !m.matches(v);
            removals.push(reader.postings_matching(&m.name, None, &inverse)?);
        } else if m.kind == MatchType::Equal {
            its.push(reader.postings(&m.name, None, &[m.value.as_str()])?);
        } else {
            its.push(reader.postings_matching(&m.name, None, m)?);
        }
    }

    if its.is_empty() {
        its.push(reader.all_postings(None)?);
    }
    let mut result = intersect(its);
    if !removals.is_empty() {
        result = Box::new(WithoutPostings::new(result, merge(removals)));
    }
    match shard {
        Some(shard) => reader.shard_postings(result, shard),
        None => Ok(result),
    }
}
