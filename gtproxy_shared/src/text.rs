//! Text-line codec.
//!
//! The game exchanges newline-separated records of the form
//! `key|value|value|...`. Keys are not unique; ordering is significant and
//! preserved. Lookups and `set` operate on the first matching record.

use std::fmt;

/// Default field delimiter.
pub const DELIMITER: char = '|';

/// An ordered sequence of `(key, values)` records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextParse {
    entries: Vec<(String, Vec<String>)>,
    delimiter: char,
}

/// Splits one line into tokens. A leading empty token (line starting with
/// the delimiter) is dropped; interior empty tokens are preserved.
fn tokenize(line: &str, delimiter: char) -> Vec<String> {
    let mut tokens: Vec<String> = line.split(delimiter).map(str::to_string).collect();
    if tokens.first().is_some_and(String::is_empty) {
        tokens.remove(0);
    }
    tokens
}

impl TextParse {
    pub fn new() -> Self {
        Self::with_delimiter(DELIMITER)
    }

    pub fn with_delimiter(delimiter: char) -> Self {
        Self {
            entries: Vec::new(),
            delimiter,
        }
    }

    /// Parses a buffer of newline-separated records. Lines that tokenize to
    /// fewer than two tokens (including empty lines) are discarded.
    pub fn parse(input: &str) -> Self {
        Self::parse_with_delimiter(input, DELIMITER)
    }

    pub fn parse_with_delimiter(input: &str, delimiter: char) -> Self {
        let mut doc = Self::with_delimiter(delimiter);
        for line in input.split('\n') {
            let mut tokens = tokenize(line, delimiter);
            if tokens.len() < 2 {
                continue;
            }
            let key = tokens.remove(0);
            doc.entries.push((key, tokens));
        }
        doc
    }

    /// Returns the value at `index` of the first record matching `key`, or
    /// the empty string.
    pub fn get(&self, key: &str, index: usize) -> &str {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, values)| values.get(index))
            .map_or("", String::as_str)
    }

    /// Parses the first value of `key` as a base-10 integer, falling back to
    /// `default` when the key is absent or unparsable.
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key, 0).trim().parse().unwrap_or(default)
    }

    /// Replaces the value-list of the first record matching `key`, or
    /// appends a new record.
    pub fn set<S: Into<String>>(&mut self, key: &str, values: Vec<S>) {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = values,
            None => self.entries.push((key.to_string(), values)),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Removes the first record matching `key`. Returns whether a record
    /// was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Removes every record matching `key`.
    pub fn remove_all(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Ordered enumeration of `(key, values)` records.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl fmt::Display for TextParse {
    /// Emits records joined by `\n` with no trailing newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, values)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            f.write_str(key)?;
            for value in values {
                write!(f, "{}{}", self.delimiter, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_discards_short_lines() {
        let doc = TextParse::parse("server|1.2.3.4\n\nnosuchvalue\nport|17091");
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.get("server", 0), "1.2.3.4");
        assert_eq!(doc.get("port", 0), "17091");
    }

    #[test]
    fn leading_empty_token_dropped_interior_kept() {
        let doc = TextParse::parse("|text|hello\na||b");
        assert_eq!(doc.get("text", 0), "hello");
        assert_eq!(doc.get("a", 0), "");
        assert_eq!(doc.get("a", 1), "b");
    }

    #[test]
    fn get_first_match_wins() {
        let doc = TextParse::parse("k|one\nk|two");
        assert_eq!(doc.get("k", 0), "one");
        assert_eq!(doc.get("missing", 0), "");
        assert_eq!(doc.get("k", 5), "");
    }

    #[test]
    fn get_int_fallback() {
        let doc = TextParse::parse("port|17091\nname|growtopia");
        assert_eq!(doc.get_int("port", -1), 17091);
        assert_eq!(doc.get_int("name", -1), -1);
        assert_eq!(doc.get_int("missing", 7), 7);
    }

    #[test]
    fn set_replaces_first_or_appends() {
        let mut doc = TextParse::parse("server|1.2.3.4\nserver|5.6.7.8");
        doc.set("server", vec!["127.0.0.1"]);
        assert_eq!(doc.get("server", 0), "127.0.0.1");
        assert_eq!(doc.to_string(), "server|127.0.0.1\nserver|5.6.7.8");

        doc.set("type2", vec!["1"]);
        assert_eq!(doc.to_string(), "server|127.0.0.1\nserver|5.6.7.8\ntype2|1");
    }

    #[test]
    fn remove_and_contains() {
        let mut doc = TextParse::parse("maint|msg\nmaint|again\nport|1");
        assert!(doc.contains("maint"));
        assert!(doc.remove("maint"));
        assert!(doc.contains("maint"));
        doc.remove_all("maint");
        assert!(!doc.contains("maint"));
        assert!(!doc.remove("maint"));
    }

    #[test]
    fn emit_no_trailing_newline() {
        let doc = TextParse::parse("a|1\nb|2|3\n");
        assert_eq!(doc.to_string(), "a|1\nb|2|3");
    }
}
