//! Case-insensitive HTTP header map used by the WebSocket upgrade
//! parser (spec.md §9 "Case-insensitive header map").

use std::collections::HashMap;

/// A small header map keyed on lowercased header names. Preserves the
/// original value casing; only the key lookup is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: HashMap<String, String>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    /// True if `name` is present and its value equals `expected`,
    /// case-insensitively, as a full-string compare.
    pub fn eq_ignore_ascii_case(&self, name: &str, expected: &str) -> bool {
        self.get(name)
            .map(|v| v.eq_ignore_ascii_case(expected))
            .unwrap_or(false)
    }

    /// True if `name` is present and one of its comma-separated tokens
    /// equals `token`, case-insensitively (used for the `Connection`
    /// header, which may read `keep-alive, Upgrade`).
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        match self.get(name) {
            Some(value) => value
                .split(',')
                .map(|t| t.trim())
                .any(|t| t.eq_ignore_ascii_case(token)),
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut h = HeaderMap::new();
        h.insert("Upgrade", "websocket");
        assert_eq!(h.get("upgrade"), Some("websocket"));
        assert_eq!(h.get("UPGRADE"), Some("websocket"));
    }

    #[test]
    fn connection_token_search() {
        let mut h = HeaderMap::new();
        h.insert("Connection", "keep-alive, Upgrade");
        assert!(h.contains_token("Connection", "upgrade"));
        assert!(!h.contains_token("Connection", "close"));
    }

    #[test]
    fn full_string_compare_for_origin() {
        let mut h = HeaderMap::new();
        h.insert("Origin", "https://example.com");
        assert!(h.eq_ignore_ascii_case("Origin", "https://EXAMPLE.com"));
        assert!(!h.eq_ignore_ascii_case("Origin", "https://example.com:8080"));
    }
}
