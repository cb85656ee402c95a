//! Read-only credential set shared by every source.
//!
//! Maps a source name to one or more opaque secrets. When several secrets
//! are configured for one source, a random one is picked per request so
//! that quota is spread across accounts.

use std::collections::HashMap;
use std::fmt;

use rand::seq::SliceRandom;

/// Source name → secrets.
///
/// The [`Debug`] implementation redacts every secret.
#[derive(Clone, Default)]
pub struct Keys {
    entries: HashMap<String, Vec<String>>,
}

impl Keys {
    /// An empty credential set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret for `source`. Blank secrets are ignored.
    #[must_use]
    pub fn with(mut self, source: impl Into<String>, secret: impl Into<String>) -> Self {
        self.insert(source, secret);
        self
    }

    /// Add a secret for `source`. Blank secrets are ignored.
    pub fn insert(&mut self, source: impl Into<String>, secret: impl Into<String>) {
        let secret = secret.into();
        let secret = secret.trim();
        if secret.is_empty() {
            return;
        }
        self.entries
            .entry(source.into())
            .or_default()
            .push(secret.to_owned());
    }

    /// One secret for `source`, chosen at random among those configured.
    pub fn get(&self, source: &str) -> Option<&str> {
        let mut rng = rand::thread_rng();
        self.entries
            .get(source)
            .and_then(|secrets| secrets.choose(&mut rng))
            .map(String::as_str)
    }

    /// Whether at least one secret is configured for `source`.
    pub fn has(&self, source: &str) -> bool {
        self.entries.get(source).is_some_and(|s| !s.is_empty())
    }

    /// Whether no secrets are configured at all.
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(Vec::is_empty)
    }

    /// Names of sources that have at least one secret, sorted.
    pub fn sources(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .entries
            .iter()
            .filter(|(_, secrets)| !secrets.is_empty())
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for name in self.sources() {
            let count = self.entries.get(name).map_or(0, Vec::len);
            map.entry(&name, &format_args!("[REDACTED; {count}]"));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_by_default() {
        let keys = Keys::new();
        assert!(keys.is_empty());
        assert!(!keys.has("shodan"));
        assert!(keys.get("shodan").is_none());
    }

    #[test]
    fn blank_secrets_are_ignored() {
        let keys = Keys::new().with("shodan", "   ");
        assert!(keys.is_empty());
    }

    #[test]
    fn get_picks_one_of_the_configured_secrets() {
        let keys = Keys::new().with("fofa", "a@b.c:one").with("fofa", "a@b.c:two");
        for _ in 0..20 {
            let secret = keys.get("fofa").expect("configured");
            assert!(secret == "a@b.c:one" || secret == "a@b.c:two");
        }
    }

    #[test]
    fn sources_are_sorted() {
        let keys = Keys::new().with("shodan", "k1").with("fofa", "k2");
        assert_eq!(keys.sources(), vec!["fofa", "shodan"]);
    }

    #[test]
    fn debug_redacts_secrets() {
        let keys = Keys::new().with("shodan", "super-secret");
        let debug = format!("{keys:?}");
        assert!(debug.contains("shodan"));
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("super-secret"));
    }
}
