//! Partition tokens
//!
//! Tokens are opaque to the engine. The only ordering they carry is the
//! position at which the partition spec declared them.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Raw value of a partition token as the document source understands it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenValue {
    Number(i64),
    Text(String),
}

impl fmt::Display for TokenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for TokenValue {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for TokenValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for TokenValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// A partition token with its declaration ordinal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionToken {
    ordinal: usize,
    value: TokenValue,
}

impl PartitionToken {
    pub fn new(ordinal: usize, value: impl Into<TokenValue>) -> Self {
        Self {
            ordinal,
            value: value.into(),
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn value(&self) -> &TokenValue {
        &self.value
    }

    /// Whether a caller-supplied selector names this token
    pub fn matches(&self, selector: &str) -> bool {
        self.value.to_string() == selector
    }
}

impl Ord for PartitionToken {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordinal
            .cmp(&other.ordinal)
            .then_with(|| self.value.to_string().cmp(&other.value.to_string()))
    }
}

impl PartialOrd for PartitionToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PartitionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

/// Display helper for the implicit single partition
pub fn describe(token: Option<&PartitionToken>) -> String {
    token.map_or_else(|| "<all>".to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_follows_declaration_not_value() {
        let zeta = PartitionToken::new(0, "zeta");
        let alpha = PartitionToken::new(1, "alpha");
        let ten = PartitionToken::new(2, 10_i64);
        let two = PartitionToken::new(3, 2_i64);

        let mut tokens = vec![two.clone(), alpha.clone(), ten.clone(), zeta.clone()];
        tokens.sort();
        assert_eq!(tokens, vec![zeta, alpha, ten, two]);
    }

    #[test]
    fn test_matches_selector() {
        assert!(PartitionToken::new(0, 7_i64).matches("7"));
        assert!(PartitionToken::new(0, "eu").matches("eu"));
        assert!(!PartitionToken::new(0, "eu").matches("us"));
        assert_eq!(describe(None), "<all>");
    }
}
