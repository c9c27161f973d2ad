//! Ordered multi-value headers carried by messages and status frames.

/// Prefix line of a serialized header block.
pub const HEADER_VERSION_LINE: &str = "NATS/1.0\r\n";

/// Ordered header map allowing repeated keys.
///
/// Insertion order is preserved so the serialized length matches what the
/// broker put on the wire.
///
/// # Examples
///
/// ```
/// use pullwire::frame::Headers;
///
/// let headers = Headers::new().with("foo", "bar");
/// assert_eq!(headers.get_first("foo"), Some("bar"));
/// assert_eq!(headers.wire_len(), 21);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header map.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Append a value, keeping any existing values for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Builder-style variant of [`Headers::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// First value recorded for `key`, matched case-sensitively.
    #[must_use]
    pub fn get_first(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Length of the serialized header block.
    ///
    /// An empty map serializes to nothing; otherwise the block is the version
    /// line, one `key:value\r\n` line per entry and a terminating `\r\n`.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        if self.entries.is_empty() {
            return 0;
        }
        let lines: usize = self
            .entries
            .iter()
            .map(|(k, v)| k.len() + 1 + v.len() + 2)
            .sum();
        HEADER_VERSION_LINE.len() + lines + 2
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
