//! Fragment reassembly for the undelimited multi-root stream.
//!
//! The device never nests one root element inside another and never
//! abbreviates end tags, so exact matching of root start/end tags against a
//! fixed alphabet is enough to find fragment boundaries. Anything seen while no
//! fragment is open is discarded, which covers attaching to the stream in the
//! middle of a fragment and roots outside the alphabet.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::token::{tokenize_line, Token, TokenError};

/// Ordered field-name to field-value map of one fragment.
///
/// Keys keep their first insertion position; assigning an existing key
/// replaces its value (last write wins).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: IndexMap<String, String>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Assign `value` to `key`, returning the value it replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl fmt::Display for FieldMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (key, value)) in self.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for FieldMap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// One complete top-level element as recovered from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RawFragment {
    /// Root tag that opened and closed the fragment.
    pub tag: String,
    pub fields: FieldMap,
}

#[derive(Debug)]
struct InFlight {
    root: String,
    fields: FieldMap,
    key: Option<String>,
}

/// Result of feeding one line to the [`Reassembler`].
#[derive(Debug, Default)]
pub struct LineOutcome {
    /// Fragments completed by this line, in stream order.
    pub fragments: Vec<RawFragment>,
    /// Set when the tokenizer could not consume the whole line.
    pub error: Option<TokenError>,
}

/// Stateful fragment detector; at most one fragment is in flight.
#[derive(Debug)]
pub struct Reassembler {
    roots: HashSet<String>,
    current: Option<InFlight>,
}

impl Reassembler {
    /// Create a reassembler recognising `roots` as fragment boundaries.
    pub fn new<I, S>(roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            current: None,
        }
    }

    /// Whether `name` belongs to the boundary alphabet.
    pub fn is_root(&self, name: &str) -> bool {
        self.roots.contains(name)
    }

    /// Root tag of the fragment currently being assembled.
    pub fn in_flight(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.root.as_str())
    }

    /// Drop any partially assembled fragment.
    pub fn reset(&mut self) {
        if let Some(partial) = self.current.take() {
            debug!(root = %partial.root, fields = partial.fields.len(), "discarding partial fragment");
        }
    }

    /// Apply a single token, returning the fragment it completes, if any.
    pub fn feed_token(&mut self, token: Token) -> Option<RawFragment> {
        match token {
            Token::Start(name) => {
                if let Some(current) = self.current.as_mut() {
                    current.key = Some(name);
                } else if self.roots.contains(&name) {
                    debug!(root = %name, "fragment opened");
                    self.current = Some(InFlight {
                        root: name,
                        fields: FieldMap::new(),
                        key: None,
                    });
                } else {
                    trace!(tag = %name, "skipping tag outside any fragment");
                }
                None
            }
            Token::Text(text) => {
                match self.current.as_mut() {
                    Some(InFlight {
                        fields,
                        key: Some(key),
                        ..
                    }) => {
                        fields.insert(key.clone(), text);
                    }
                    _ => trace!(len = text.len(), "skipping stray text"),
                }
                None
            }
            Token::End(name) => match self.current.take() {
                Some(current) if current.root == name => {
                    debug!(root = %name, fields = current.fields.len(), "fragment closed");
                    Some(RawFragment {
                        tag: current.root,
                        fields: current.fields,
                    })
                }
                Some(mut current) => {
                    current.key = None;
                    self.current = Some(current);
                    None
                }
                None => {
                    trace!(tag = %name, "skipping end tag outside any fragment");
                    None
                }
            },
        }
    }

    /// Tokenize `line` and apply every token it yields.
    ///
    /// Tokens preceding a tokenizer error are still applied; the rest of the
    /// line is lost.
    pub fn feed_line(&mut self, line: &[u8]) -> LineOutcome {
        let tokens = tokenize_line(line);
        let fragments = tokens
            .tokens
            .into_iter()
            .filter_map(|token| self.feed_token(token))
            .collect();
        LineOutcome {
            fragments,
            error: tokens.error,
        }
    }

    /// Lazily turn a sequence of lines into completed fragments.
    ///
    /// Tokenizer errors are skipped; use [`Reassembler::feed_line`] to observe them.
    pub fn fragments<I>(&mut self, lines: I) -> Fragments<'_, I::IntoIter>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        Fragments {
            reassembler: self,
            lines: lines.into_iter(),
            ready: VecDeque::new(),
        }
    }
}

/// Iterator returned by [`Reassembler::fragments`].
pub struct Fragments<'a, I> {
    reassembler: &'a mut Reassembler,
    lines: I,
    ready: VecDeque<RawFragment>,
}

impl<I> Iterator for Fragments<'_, I>
where
    I: Iterator,
    I::Item: AsRef<[u8]>,
{
    type Item = RawFragment;

    fn next(&mut self) -> Option<RawFragment> {
        loop {
            if let Some(fragment) = self.ready.pop_front() {
                return Some(fragment);
            }
            let line = self.lines.next()?;
            let outcome = self.reassembler.feed_line(line.as_ref());
            self.ready.extend(outcome.fragments);
        }
    }
}
