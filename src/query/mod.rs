//! Record predicates used by the match engine.
//!
//! The match engine only needs a yes/no answer per record, expressed by the
//! [`Predicate`] trait.  Closures implement it directly; [`Query`] is a small
//! declarative predicate (a conjunction of key/operator/value conditions)
//! for callers that do not want to write their own.
//!
//! A *set* of predicates is OR'd: a record matches the set if any predicate
//! matches it, and an empty set matches every record.

use std::cmp::Ordering;

use crate::record::LogRecord;

/// Decides whether a single record matches.
pub trait Predicate {
    /// Returns `true` if `record` satisfies this predicate.
    fn matches(&self, record: &LogRecord) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&LogRecord) -> bool,
{
    fn matches(&self, record: &LogRecord) -> bool {
        self(record)
    }
}

/// OR semantics over a predicate set.  An empty set matches everything.
pub fn matches_any<P: Predicate>(predicates: &[P], record: &LogRecord) -> bool {
    predicates.is_empty() || predicates.iter().any(|p| p.matches(record))
}

/// Comparison applied by a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// The key is present (value ignored).
    Exists,
    /// The key is absent (value ignored).
    Absent,
    /// Some value equals the operand.
    Equal,
    /// No value equals the operand.
    NotEqual,
    /// Some value starts with the operand.
    Prefix,
    /// Some value ends with the operand.
    Suffix,
    /// Some value contains the operand.
    Contains,
    /// Some value orders before the operand.
    Less,
    /// Some value orders before or equal to the operand.
    LessOrEqual,
    /// Some value orders after the operand.
    Greater,
    /// Some value orders after or equal to the operand.
    GreaterOrEqual,
}

/// A single `key <op> value` test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Key to test.
    pub key: String,
    /// Comparison.
    pub op: Op,
    /// Right-hand operand.
    pub value: String,
}

impl Condition {
    fn holds(&self, record: &LogRecord) -> bool {
        let mut values = record.get_all(&self.key);
        match self.op {
            Op::Exists => values.next().is_some(),
            Op::Absent => values.next().is_none(),
            Op::NotEqual => values.all(|v| v != self.value),
            Op::Equal => values.any(|v| v == self.value),
            Op::Prefix => values.any(|v| v.starts_with(self.value.as_str())),
            Op::Suffix => values.any(|v| v.ends_with(self.value.as_str())),
            Op::Contains => values.any(|v| v.contains(self.value.as_str())),
            Op::Less => values.any(|v| compare(v, &self.value) == Ordering::Less),
            Op::LessOrEqual => values.any(|v| compare(v, &self.value) != Ordering::Greater),
            Op::Greater => values.any(|v| compare(v, &self.value) == Ordering::Greater),
            Op::GreaterOrEqual => values.any(|v| compare(v, &self.value) != Ordering::Less),
        }
    }
}

/// Numeric comparison when both sides are integers, byte-wise otherwise.
fn compare(lhs: &str, rhs: &str) -> Ordering {
    match (lhs.parse::<i64>(), rhs.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => lhs.cmp(rhs),
    }
}

/// A conjunction of [`Condition`]s.  An empty query matches every record.
///
/// ```rust
/// use asldb::{LogRecord, Op, Predicate, Query, keys};
///
/// let query = Query::new()
///     .with(keys::SENDER, Op::Equal, "sshd")
///     .with(keys::LEVEL, Op::LessOrEqual, "3");
///
/// let record = LogRecord::new()
///     .with(keys::SENDER, "sshd")
///     .with(keys::LEVEL, "2");
/// assert!(query.matches(&record));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    conditions: Vec<Condition>,
}

impl Query {
    /// Creates a query that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition.
    pub fn with(mut self, key: impl Into<String>, op: Op, value: impl Into<String>) -> Self {
        self.conditions.push(Condition {
            key: key.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// The conditions of this query.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

impl Predicate for Query {
    fn matches(&self, record: &LogRecord) -> bool {
        self.conditions.iter().all(|c| c.holds(record))
    }
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::keys;

    fn sample() -> LogRecord {
        LogRecord::new()
            .with(keys::SENDER, "sshd")
            .with(keys::LEVEL, "5")
            .with(keys::MESSAGE, "Accepted publickey for root")
            .with("Tag", "auth")
            .with("Tag", "net")
    }

    #[test]
    fn empty_query_matches_all() {
        assert!(Query::new().matches(&sample()));
        assert!(Query::new().matches(&LogRecord::new()));
    }

    #[test]
    fn string_operators() {
        let r = sample();
        assert!(Query::new().with(keys::SENDER, Op::Equal, "sshd").matches(&r));
        assert!(!Query::new().with(keys::SENDER, Op::Equal, "ssh").matches(&r));
        assert!(Query::new().with(keys::MESSAGE, Op::Prefix, "Accepted").matches(&r));
        assert!(Query::new().with(keys::MESSAGE, Op::Suffix, "root").matches(&r));
        assert!(Query::new().with(keys::MESSAGE, Op::Contains, "publickey").matches(&r));
        assert!(Query::new().with(keys::HOST, Op::Absent, "").matches(&r));
        assert!(Query::new().with(keys::SENDER, Op::Exists, "").matches(&r));
    }

    #[test]
    fn numeric_comparison_is_not_lexicographic() {
        let r = sample();
        // "5" < "10" numerically, although "5" > "10" byte-wise.
        assert!(Query::new().with(keys::LEVEL, Op::Less, "10").matches(&r));
        assert!(Query::new().with(keys::LEVEL, Op::GreaterOrEqual, "5").matches(&r));
        assert!(!Query::new().with(keys::LEVEL, Op::Greater, "5").matches(&r));
    }

    #[test]
    fn multi_valued_keys() {
        let r = sample();
        assert!(Query::new().with("Tag", Op::Equal, "net").matches(&r));
        assert!(!Query::new().with("Tag", Op::NotEqual, "net").matches(&r));
        assert!(Query::new().with("Tag", Op::NotEqual, "disk").matches(&r));
    }

    #[test]
    fn conjunction_and_disjunction() {
        let r = sample();
        let both = Query::new()
            .with(keys::SENDER, Op::Equal, "sshd")
            .with("Tag", Op::Equal, "disk");
        assert!(!both.matches(&r));

        let set = [both, Query::new().with("Tag", Op::Equal, "auth")];
        assert!(matches_any(&set, &r));

        let none: [Query; 0] = [];
        assert!(matches_any(&none, &r));
    }

    #[test]
    fn closures_are_predicates() {
        let is_sshd = |r: &LogRecord| r.get(keys::SENDER) == Some("sshd");
        assert!(matches_any(&[is_sshd], &sample()));
    }
}
