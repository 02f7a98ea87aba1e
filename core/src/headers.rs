//! Protocol header multimap.
//!
//! Header names are case-insensitive and keep the spelling and position of
//! their first insertion. Almost every header carries a single value, so the
//! values of one name live inline in a [`SmallVec`].

use smallvec::{SmallVec, smallvec};

/// Values stored for one header name.
pub type HeaderValues = SmallVec<[String; 1]>;

/// Ordered, case-insensitive header multimap.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, HeaderValues)>,
}

impl Headers {
    /// Create an empty header map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }

    /// Add a value for `name`, keeping any values already present.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(index) => self.entries[index].1.push(value.into()),
            None => self.entries.push((name, smallvec![value.into()])),
        }
    }

    /// Set `name` to exactly one value, discarding all previous values.
    pub fn replace(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(index) => self.entries[index].1 = smallvec![value.into()],
            None => self.entries.push((name, smallvec![value.into()])),
        }
    }

    /// First value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .and_then(|index| self.entries[index].1.first())
            .map(String::as_str)
    }

    /// All values for `name`, in insertion order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.position(name)
            .map(|index| self.entries[index].1.as_slice())
            .unwrap_or_default()
    }

    /// Remove `name`, returning its values.
    pub fn remove(&mut self, name: &str) -> Option<HeaderValues> {
        self.position(name)
            .map(|index| self.entries.remove(index).1)
    }

    /// Whether `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Number of distinct header names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no header is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, values)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
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
    fn test_names_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert!(headers.contains("CONTENT-TYPE"));
    }

    #[test]
    fn test_replace_drops_every_previous_value() {
        let mut headers: Headers = [("foo", "bar"), ("foo", "bar2")].into_iter().collect();
        assert_eq!(headers.get_all("foo").len(), 2);

        headers.replace("FOO", "bar3");

        assert_eq!(headers.get_all("foo"), ["bar3".to_string()]);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_replace_inserts_missing_name() {
        let mut headers = Headers::new();
        headers.replace("x-trace", "abc");
        assert_eq!(headers.get("x-trace"), Some("abc"));
    }

    #[test]
    fn test_iteration_keeps_first_insertion_order() {
        let headers: Headers = [("b", "1"), ("a", "2"), ("B", "3")].into_iter().collect();
        let names: Vec<&str> = headers.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_remove() {
        let mut headers: Headers = [("a", "1")].into_iter().collect();
        assert_eq!(headers.remove("A").map(|v| v.len()), Some(1));
        assert!(headers.is_empty());
        assert!(headers.remove("a").is_none());
        assert!(headers.get_all("a").is_empty());
    }
}
