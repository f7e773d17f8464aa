//! Generic log record: an ordered multimap of string keys to string values.
//!
//! [`LogRecord`] is the currency type passed into [`Store::append`] and
//! returned by every read path.  Keys may repeat; insertion order is kept.
//! The store recognises a fixed set of well-known keys (see [`keys`]) and
//! maps them onto fixed header fields, everything else travels as a
//! free-form key/value pair.
//!
//! [`Store::append`]: crate::Store::append

/// Well-known keys recognised by the record codec.
pub mod keys {
    /// Seconds since the UNIX epoch.
    pub const TIME: &str = "Time";
    /// Nanosecond part of the timestamp.
    pub const TIME_NANOSEC: &str = "TimeNanoSec";
    /// Originating host.
    pub const HOST: &str = "Host";
    /// Sending program.
    pub const SENDER: &str = "Sender";
    /// Facility the message was logged under.
    pub const FACILITY: &str = "Facility";
    /// Sending process id.
    pub const PID: &str = "PID";
    /// Sending user id.
    pub const UID: &str = "UID";
    /// Sending group id.
    pub const GID: &str = "GID";
    /// Priority level (0 = emergency … 7 = debug).
    pub const LEVEL: &str = "Level";
    /// Message text.
    pub const MESSAGE: &str = "Message";
    /// User allowed to read the record.
    pub const READ_UID: &str = "ReadUID";
    /// Group allowed to read the record.
    pub const READ_GID: &str = "ReadGID";
    /// Store-assigned record identifier.
    pub const MSG_ID: &str = "ASLMessageID";
    /// Session identifier.
    pub const SESSION: &str = "Session";
    /// Process id of the process the message refers to.
    pub const REF_PID: &str = "RefPID";
    /// Name of the process the message refers to.
    pub const REF_PROC: &str = "RefProc";
}

/// A structured log record.
///
/// ```rust
/// use asldb::{LogRecord, keys};
///
/// let record = LogRecord::new()
///     .with(keys::SENDER, "kernel")
///     .with(keys::MESSAGE, "hello")
///     .with("Tag", "a")
///     .with("Tag", "b");
///
/// assert_eq!(record.get(keys::MESSAGE), Some("hello"));
/// assert_eq!(record.get_all("Tag").collect::<Vec<_>>(), ["a", "b"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecord {
    pairs: Vec<(String, String)>,
}

impl LogRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// Appends a key/value pair, keeping any existing values for `key`.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// Returns the first value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value stored under `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if at least one value is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    /// Iterates over all pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of key/value pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns `true` if the record has no pairs.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// The store-assigned identifier, if the record carries one.
    pub fn id(&self) -> Option<u64> {
        self.get(keys::MSG_ID)?.parse().ok()
    }

    /// The message text, if present.
    pub fn message(&self) -> Option<&str> {
        self.get(keys::MESSAGE)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LogRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multimap_keeps_order_and_duplicates() {
        let record: LogRecord = [("A", "1"), ("B", "2"), ("A", "3")].into_iter().collect();

        assert_eq!(record.len(), 3);
        assert_eq!(record.get("A"), Some("1"));
        assert_eq!(record.get_all("A").collect::<Vec<_>>(), ["1", "3"]);
        assert_eq!(
            record.iter().collect::<Vec<_>>(),
            [("A", "1"), ("B", "2"), ("A", "3")]
        );
    }

    #[test]
    fn value_outlives_the_lookup_key() {
        let record = LogRecord::new().with("Volume", "/Volumes/Archive");
        let value = {
            let key = String::from("Volume");
            record.get(&key)
        };
        assert_eq!(value, Some("/Volumes/Archive"));
    }

    #[test]
    fn missing_key() {
        let record = LogRecord::new().with(keys::HOST, "box");
        assert!(record.get(keys::SENDER).is_none());
        assert!(!record.contains_key(keys::SENDER));
        assert!(record.contains_key(keys::HOST));
        assert!(!record.is_empty());
    }

    #[test]
    fn id_parses_message_id() {
        let record = LogRecord::new().with(keys::MSG_ID, "42");
        assert_eq!(record.id(), Some(42));

        let bad = LogRecord::new().with(keys::MSG_ID, "forty-two");
        assert_eq!(bad.id(), None);
    }
}
