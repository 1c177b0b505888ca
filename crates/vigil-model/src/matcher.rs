//! Label predicates used by routes, inhibition rules, and silences.
//!
//! A [`Matcher`] is evaluated against a [`LabelSet`] by a plain interpreter;
//! there is no runtime attribute dispatch. Regex matchers are compiled and
//! anchored at construction, so evaluation is infallible.

use std::fmt;

use regex::Regex;

use crate::error::{ModelError, Result};
use crate::labels::LabelSet;

/// A predicate over a single label.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// The label exists and equals the value exactly.
    Equals {
        /// Label name.
        name: String,
        /// Required value.
        value: String,
    },
    /// The label exists and its whole value matches the pattern.
    Regex {
        /// Label name.
        name: String,
        /// The original (unanchored) pattern text.
        pattern: String,
        /// Compiled, anchored form of `pattern`.
        regex: Regex,
    },
    /// The label exists, with any value.
    Exists {
        /// Label name.
        name: String,
    },
}

impl Matcher {
    /// Creates an equality matcher.
    #[must_use]
    pub fn equals(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Creates a regex matcher. The pattern is anchored to the full value.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidMatcher`] if the pattern does not compile.
    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let pattern = pattern.into();
        let regex =
            Regex::new(&format!("^(?:{pattern})$")).map_err(|e| ModelError::InvalidMatcher {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self::Regex {
            name,
            pattern,
            regex,
        })
    }

    /// Creates an existence matcher.
    #[must_use]
    pub fn exists(name: impl Into<String>) -> Self {
        Self::Exists { name: name.into() }
    }

    /// Returns the label name this matcher applies to.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Equals { name, .. } | Self::Regex { name, .. } | Self::Exists { name } => name,
        }
    }

    /// Evaluates the matcher against a label set.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> bool {
        match self {
            Self::Equals { name, value } => labels.get(name) == Some(value.as_str()),
            Self::Regex { name, regex, .. } => {
                labels.get(name).is_some_and(|v| regex.is_match(v))
            }
            Self::Exists { name } => labels.contains(name),
        }
    }
}

// Regex does not implement PartialEq; compare matchers by their textual form.
impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Equals { name: a, value: av },
                Self::Equals { name: b, value: bv },
            ) => a == b && av == bv,
            (
                Self::Regex {
                    name: a,
                    pattern: ap,
                    ..
                },
                Self::Regex {
                    name: b,
                    pattern: bp,
                    ..
                },
            ) => a == b && ap == bp,
            (Self::Exists { name: a }, Self::Exists { name: b }) => a == b,
            _ => false,
        }
    }
}

impl Eq for Matcher {}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals { name, value } => write!(f, "{name}=\"{value}\""),
            Self::Regex { name, pattern, .. } => write!(f, "{name}=~\"{pattern}\""),
            Self::Exists { name } => write!(f, "{name}!=\"\""),
        }
    }
}
