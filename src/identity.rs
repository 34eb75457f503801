//! Canonical request keys.
//!
//! A key must not depend on the order in which the caller happened to list
//! things, so every collection is de-duplicated and sorted before joining.
//! Multi-field keys are composed as `name:value` segments separated by `/`:
//!
//! ```text
//! stageId:S1/signalDetections:A;B;C
//! ```

use crate::types::RequestKey;

/// Separator between elements of one segment.
pub const ELEMENT_SEPARATOR: &str = ";";

/// Separator between segments.
pub const SEGMENT_SEPARATOR: &str = "/";

/// Returns the unique elements of `items`, sorted.
pub fn uniq_sort_strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = items.into_iter().map(|s| s.as_ref().to_string()).collect();
    out.sort();
    out.dedup();
    out
}

/// Builds a [`RequestKey`] from named segments.
///
/// # Example
///
/// ```rust
/// use fetchgate::KeyBuilder;
///
/// let key = KeyBuilder::new()
///     .field("stageId", "S1")
///     .set("signalDetections", ["B", "A"])
///     .build();
/// assert_eq!(key.as_str(), "stageId:S1/signalDetections:A;B");
/// ```
#[derive(Debug, Default, Clone)]
pub struct KeyBuilder {
    segments: Vec<String>,
}

impl KeyBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a single-valued segment.
    pub fn field(mut self, name: &str, value: impl AsRef<str>) -> Self {
        self.segments.push(format!("{}:{}", name, value.as_ref()));
        self
    }

    /// Appends a set-valued segment; order and duplicates are ignored.
    pub fn set<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = uniq_sort_strings(values).join(ELEMENT_SEPARATOR);
        self.segments.push(format!("{}:{}", name, joined));
        self
    }

    /// Finishes the key.
    pub fn build(self) -> RequestKey {
        RequestKey::new(self.segments.join(SEGMENT_SEPARATOR))
    }
}

/// The key of a bare set of strings: sorted, de-duplicated, `;`-joined.
pub fn set_key<I, S>(values: I) -> RequestKey
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    RequestKey::new(uniq_sort_strings(values).join(ELEMENT_SEPARATOR))
}
