//! Key/value replies returned by daemon commands.

use serde_json::{Map, Value};

/// A command reply: the `key: value` lines MPD sent before `OK`, in order.
///
/// MPD repeats keys for list-style replies (e.g. one `file` per queue entry),
/// so the raw pairs are kept and callers choose how to fold them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonReply {
    pairs: Vec<(String, String)>,
}

impl DaemonReply {
    /// Creates a reply from already-split pairs.
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    /// Parses one response line into a pair.
    ///
    /// The key ends at the first `": "`. Keys may themselves contain a colon
    /// (`playlist` answers `0:file: some/path.flac`).
    pub(crate) fn parse_line(line: &str) -> Option<(String, String)> {
        let (key, value) = line.split_once(": ")?;
        Some((key.to_string(), value.to_string()))
    }

    /// Appends a pair.
    pub(crate) fn push(&mut self, key: String, value: String) {
        self.pairs.push((key, value));
    }

    /// Returns the first value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value for `key`, in reply order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Folds the reply into a flat JSON object.
    ///
    /// Later duplicates overwrite earlier ones, which is what the browser
    /// client expects for `status`, `currentsong` and `playlist`.
    #[must_use]
    pub fn to_json_object(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for (k, v) in &self.pairs {
            map.insert(k.clone(), Value::String(v.clone()));
        }
        map
    }
}
