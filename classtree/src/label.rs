// label.rs - Branch target identities
//
// A label is an identity, not a name: two labels are equal only when they are
// the same object. A registry scoped to one decode maps the textual ids found
// in a document to those identities, so every reference to "L3" within that
// decode lands on the same target.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An opaque branch target
#[derive(Clone)]
pub struct Label(Arc<str>);

impl Label {
    /// Create a fresh identity; it is distinct from every other label even if
    /// the id text matches
    pub fn new(id: &str) -> Self {
        Label(Arc::from(id))
    }

    /// Textual id used when the label is written out
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Label {}

impl Hash for Label {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const u8).hash(state);
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label({})", self.0)
    }
}

/// Maps label ids to identities for the duration of one decode
#[derive(Debug, Default)]
pub struct LabelRegistry {
    labels: HashMap<String, Label>,
}

impl LabelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the identity for `id`, creating it on first use
    pub fn resolve(&mut self, id: &str) -> Label {
        self.labels
            .entry(id.to_string())
            .or_insert_with(|| Label::new(id))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_id_same_identity() {
        let mut registry = LabelRegistry::new();
        let a = registry.resolve("L1");
        let b = registry.resolve("L1");
        let c = registry.resolve("L2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registries_are_independent() {
        let a = LabelRegistry::new().resolve("L1");
        let b = LabelRegistry::new().resolve("L1");
        assert_ne!(a, b);
        assert_eq!(a.id(), b.id());
    }
}
