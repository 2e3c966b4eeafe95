//! Part bookkeeping for a multipart session.
//!
//! Parts may arrive in any order. Completion needs them strictly ascending
//! by part number, with one entry per number.

use std::collections::BTreeMap;

use crate::models::multipart::CompletedPart;

/// Accumulated `(part_number, etag)` pairs for one session.
///
/// Re-uploading a part number replaces the earlier etag, so the list never
/// holds two entries for the same number.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartList {
    parts: BTreeMap<u32, String>,
}

impl PartList {
    /// Record a part. Returns the etag it replaced, if any.
    pub fn insert(&mut self, part_number: u32, etag: impl Into<String>) -> Option<String> {
        self.parts.insert(part_number, etag.into())
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn etag(&self, part_number: u32) -> Option<&str> {
        self.parts.get(&part_number).map(String::as_str)
    }

    /// Parts in strictly increasing part-number order, ready for assembly.
    pub fn ordered(&self) -> Vec<CompletedPart> {
        self.parts
            .iter()
            .map(|(part_number, etag)| CompletedPart {
                part_number: *part_number,
                etag: etag.clone(),
            })
            .collect()
    }
}

/// Check that a part list is acceptable to hand to a store's completion
/// primitive: at least one part, numbers positive and strictly increasing.
pub fn is_strictly_ascending(parts: &[CompletedPart]) -> bool {
    !parts.is_empty()
        && parts[0].part_number > 0
        && parts
            .windows(2)
            .all(|pair| pair[0].part_number < pair[1].part_number)
}
