//! Case-insensitive header multimap.
//!
//! Reads return the first entry whose name matches, ignoring ASCII case.
//! [`Headers::set`] replaces every existing entry with that name, so the last
//! write wins. [`Headers::append`] keeps earlier entries and adds another one.
//!
//! # Examples
//!
//! ```
//! use sockets_transport::model::Headers;
//!
//! let mut headers = Headers::new();
//! headers.append("Accept", "text/plain");
//! headers.append("accept", "application/json");
//! assert_eq!(headers.get("ACCEPT"), Some("text/plain"));
//!
//! headers.set("Accept", "*/*");
//! assert_eq!(headers.get_all("accept").count(), 1);
//! assert_eq!(headers.get("accept"), Some("*/*"));
//! ```

/// Well-known header names used by the transport.
pub mod names {
    /// `Host`
    pub const HOST: &str = "Host";
    /// `Content-Length`
    pub const CONTENT_LENGTH: &str = "Content-Length";
    /// `Connection`
    pub const CONNECTION: &str = "Connection";
    /// `Transfer-Encoding`
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
    /// `Content-Type`
    pub const CONTENT_TYPE: &str = "Content-Type";
}

/// Ordered multimap of header names to values with case-insensitive lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Headers {
            entries: Vec::new(),
        }
    }

    /// Builder form of [`Headers::set`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Set `name` to `value`, replacing any entries with the same name.
    ///
    /// The new value keeps the position of the first replaced entry.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self.position(&name) {
            Some(first) => {
                self.entries[first].1 = value;
                let mut index = 0;
                self.entries.retain(|(existing, _)| {
                    let keep = index <= first || !existing.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Add an entry without touching existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// Every value stored under `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether any entry is stored under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove every entry stored under `name`. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        before != self.entries.len()
    }

    /// Iterate over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ignores_case() {
        let headers = Headers::new().with("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert!(headers.contains("CONTENT-TYPE"));
    }

    #[test]
    fn test_first_match_wins_on_read() {
        let headers: Headers = vec![("X-Id", "1"), ("x-id", "2")].into_iter().collect();
        assert_eq!(headers.get("X-ID"), Some("1"));
        assert_eq!(headers.get_all("x-id").collect::<Vec<_>>(), vec!["1", "2"]);
    }

    #[test]
    fn test_set_replaces_all_duplicates() {
        let mut headers: Headers = vec![("A", "1"), ("B", "x"), ("a", "2")].into_iter().collect();
        headers.set("a", "3");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec![("A", "3"), ("B", "x")]);
    }

    #[test]
    fn test_remove() {
        let mut headers = Headers::new().with("Host", "example.com");
        assert!(headers.remove("host"));
        assert!(!headers.remove("host"));
        assert!(headers.is_empty());
    }
}
