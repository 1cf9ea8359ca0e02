//! Dimension labels attached to measurements.
//!
//! Tag sets are kept normalised: sorted by name with a single value per name.
//! Two sets built from the same pairs in a different order compare equal and
//! render identically.

use std::fmt;

/// A name/value label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Shorthand for [`Tag::new`].
pub fn tag(name: impl Into<String>, value: impl Into<String>) -> Tag {
    Tag::new(name, value)
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Sort by name and keep the last value seen for each name.
pub fn normalize(tags: &[Tag]) -> Vec<Tag> {
    let mut out: Vec<Tag> = Vec::with_capacity(tags.len());
    for t in tags {
        match out.binary_search_by(|probe| probe.name.cmp(&t.name)) {
            Ok(i) => out[i].value = t.value.clone(),
            Err(i) => out.insert(i, t.clone()),
        }
    }
    out
}

/// Overlay `overrides` on `base`: same name overwrites, new names are added.
pub fn merge(base: &[Tag], overrides: &[Tag]) -> Vec<Tag> {
    let mut all = Vec::with_capacity(base.len() + overrides.len());
    all.extend_from_slice(base);
    all.extend_from_slice(overrides);
    normalize(&all)
}
