//! Username normalization and validation.
//!
//! Every identifier is normalized once (trimmed, leading `@` removed,
//! lowercased) and checked against a small charset/length policy before any
//! platform sees it. [`Username::leet_analysis`] flags leet spellings and
//! derives their normalized forms and variants.

mod leet;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use leet::LeetAnalysis;

/// Charset and length policy applied to raw usernames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsernamePolicy {
    pub min_length: usize,
    pub max_length: usize,
    /// Non-alphanumeric ASCII characters accepted inside a username.
    pub separators: String,
}

impl Default for UsernamePolicy {
    fn default() -> Self {
        Self {
            min_length: 1,
            max_length: 64,
            separators: "._-".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsernameError {
    #[error("username is empty")]
    Empty,
    #[error("username length {len} outside {min}..={max}")]
    Length { len: usize, min: usize, max: usize },
    #[error("username contains unsupported character {0:?}")]
    InvalidChar(char),
    #[error("username cannot start or end with {0:?}")]
    EdgeSeparator(char),
}

/// A normalized, validated username. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    pub fn parse(raw: &str, policy: &UsernamePolicy) -> Result<Self, UsernameError> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix('@').unwrap_or(trimmed);
        let normalized = trimmed.to_ascii_lowercase();

        if normalized.is_empty() {
            return Err(UsernameError::Empty);
        }

        if let Some(invalid) = normalized
            .chars()
            .find(|ch| !ch.is_ascii_alphanumeric() && !policy.separators.contains(*ch))
        {
            return Err(UsernameError::InvalidChar(invalid));
        }

        let len = normalized.len();
        if len < policy.min_length || len > policy.max_length {
            return Err(UsernameError::Length {
                len,
                min: policy.min_length,
                max: policy.max_length,
            });
        }

        for edge in [normalized.chars().next(), normalized.chars().last()]
            .into_iter()
            .flatten()
        {
            if policy.separators.contains(edge) {
                return Err(UsernameError::EdgeSeparator(edge));
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters; usernames are ASCII so this equals the byte length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
