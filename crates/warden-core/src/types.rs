//! Core ambient types for Warden
//!
//! Small shared value types used across the kernel, validator pipeline, and
//! transaction manager: timestamps and numeric comparisons.

use serde::{Deserialize, Serialize};

/// Timestamp type alias
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Create a timestamp for the current moment
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Unix timestamp (seconds), the form facts on the wire carry.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Built-in comparison operators usable in rule bodies (`X < Y`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl Comparison {
    /// Parse a comparison operator token from logic source text.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "=" | "==" => Some(Comparison::Equal),
            "!=" => Some(Comparison::NotEqual),
            "<" => Some(Comparison::LessThan),
            "<=" => Some(Comparison::LessThanOrEqual),
            ">" => Some(Comparison::GreaterThan),
            ">=" => Some(Comparison::GreaterThanOrEqual),
            _ => None,
        }
    }

    /// Evaluate on two ground floats (integers are widened by the caller).
    pub fn evaluate(&self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Equal => (left - right).abs() < f64::EPSILON,
            Comparison::NotEqual => (left - right).abs() >= f64::EPSILON,
            Comparison::LessThan => left < right,
            Comparison::LessThanOrEqual => left <= right,
            Comparison::GreaterThan => left > right,
            Comparison::GreaterThanOrEqual => left >= right,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_tokens() {
        assert_eq!(Comparison::from_token("<"), Some(Comparison::LessThan));
        assert_eq!(Comparison::from_token("bogus"), None);
    }

    #[test]
    fn test_comparison_evaluate() {
        assert!(Comparison::LessThan.evaluate(1.0, 2.0));
        assert!(!Comparison::GreaterThan.evaluate(1.0, 2.0));
        assert!(Comparison::Equal.evaluate(3.0, 3.0));
    }
}
