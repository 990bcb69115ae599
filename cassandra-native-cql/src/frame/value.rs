//! Bound values passed alongside a prepared statement.

use bytes::Bytes;

/// Values already serialized by the caller, in bind-marker order.
///
/// `None` denotes a CQL `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializedValues {
    values: Vec<Option<Bytes>>,
}

impl SerializedValues {
    /// An empty value list.
    pub const EMPTY: &'static SerializedValues = &SerializedValues { values: Vec::new() };

    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one value.
    pub fn add_value(&mut self, value: Option<Bytes>) {
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&Bytes>> {
        self.values.iter().map(Option::as_ref)
    }
}

impl FromIterator<Option<Bytes>> for SerializedValues {
    fn from_iter<I: IntoIterator<Item = Option<Bytes>>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
