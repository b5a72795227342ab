//! Release-label extraction (spec §1 "Label extractor: reads a `release`
//! label from the build recipe").
//!
//! The upstream build recipe (e.g. a Dockerfile/Containerfile) is out of
//! scope to parse here; callers supply the already-extracted label map
//! (spec treats this as a simple external collaborator, not a trait).

use std::collections::HashMap;

/// Read the `release` label out of a label map, if present.
pub fn get_release_label(labels: &HashMap<String, String>) -> Option<&str> {
    labels.get("release").map(String::as_str)
}
