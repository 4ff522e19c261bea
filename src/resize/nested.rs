//! Nested label strings and topic trails.

use crate::clustering::{ClusterLabels, label_col};

pub const TOPIC_MIX_SEPARATOR: &str = " > ";

#[must_use]
pub fn nested_col(k: usize) -> String {
    format!("{}_nested", label_col(k))
}

/// `[depth][row]` hyphen-joined labels from the root depth down to each depth.
///
/// Every label is zero-padded to four digits so lexical order follows the
/// tree.
#[must_use]
pub fn nested_labels(labels: &ClusterLabels) -> Vec<Vec<String>> {
    let mut out: Vec<Vec<String>> = Vec::with_capacity(labels.depths.len());
    for (d, depth) in labels.depths.iter().enumerate() {
        let column = depth
            .labels
            .iter()
            .enumerate()
            .map(|(row, label)| match d {
                0 => format!("{label:04}"),
                _ => format!("{}-{label:04}", out[d - 1][row]),
            })
            .collect();
        out.push(column);
    }
    out
}

/// Majority topics from depth `start` (0-based) through `until`, with
/// consecutive repeats collapsed.
#[must_use]
pub fn topic_mix(
    labels: &ClusterLabels,
    topic_col: &str,
    row: usize,
    start: usize,
    until: usize,
) -> Option<String> {
    let start = start.min(until);
    let mut trail: Vec<&str> = Vec::new();
    for depth in labels.depths.get(start..=until)? {
        let Some(topic) = depth.majority.get(topic_col).and_then(|v| v[row].as_deref()) else {
            continue;
        };
        if trail.last() != Some(&topic) {
            trail.push(topic);
        }
    }
    (!trail.is_empty()).then(|| trail.join(TOPIC_MIX_SEPARATOR))
}
