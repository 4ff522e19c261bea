//! "Elbow" k proposals from the acceleration of the last merge distances.

use serde::{Deserialize, Serialize};

use crate::store::{Column, StoreError, Table};

/// `(lo, hi]` ranges of k to propose a value for.
pub const DEFAULT_K_INTERVALS: [(usize, usize); 9] = [
    (10, 20),
    (20, 40),
    (40, 50),
    (50, 60),
    (60, 70),
    (70, 80),
    (80, 100),
    (100, 250),
    (250, 500),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KProposal {
    pub interval: (usize, usize),
    pub k: usize,
    pub acceleration: f64,
}

/// Second difference of the last `last_n` distances, reversed so that
/// index `i` scores `k = i + 2`.
#[must_use]
pub fn reversed_acceleration(distances: &[f64], last_n: usize) -> Vec<f64> {
    let start = distances.len().saturating_sub(last_n);
    let last = &distances[start..];
    let mut acceleration: Vec<f64> = last
        .windows(3)
        .map(|w| w[2] - 2.0 * w[1] + w[0])
        .collect();
    acceleration.reverse();
    acceleration
}

/// Best k inside each interval; intervals with no scorable k are skipped.
/// The first maximum wins on ties.
#[must_use]
pub fn propose_k(distances: &[f64], last_n: usize, intervals: &[(usize, usize)]) -> Vec<KProposal> {
    let acceleration = reversed_acceleration(distances, last_n);
    intervals
        .iter()
        .filter_map(|&(lo, hi)| {
            let mut best: Option<KProposal> = None;
            for (i, &value) in acceleration.iter().enumerate() {
                let k = i + 2;
                if k <= lo || k > hi {
                    continue;
                }
                if best.is_none_or(|b| value > b.acceleration) {
                    best = Some(KProposal {
                        interval: (lo, hi),
                        k,
                        acceleration: value,
                    });
                }
            }
            best
        })
        .collect()
}

/// # Errors
/// Table assembly fails.
pub fn proposals_to_table(proposals: &[KProposal]) -> Result<Table, StoreError> {
    let int = |f: fn(&KProposal) -> usize| {
        Column::Int64(proposals.iter().map(|p| i64::try_from(f(p)).ok()).collect())
    };
    Table::new()
        .with_column(
            "interval",
            Column::Utf8(
                proposals
                    .iter()
                    .map(|p| Some(format!("({}, {}]", p.interval.0, p.interval.1)))
                    .collect(),
            ),
        )?
        .with_column("interval_lo", int(|p| p.interval.0))?
        .with_column("interval_hi", int(|p| p.interval.1))?
        .with_column("k", int(|p| p.k))?
        .with_column(
            "acceleration",
            Column::Float64(proposals.iter().map(|p| Some(p.acceleration)).collect()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISTANCES: [f64; 7] = [1.0, 1.0, 1.0, 2.0, 5.0, 10.0, 20.0];

    #[test]
    fn acceleration_is_reversed_second_difference() {
        assert_eq!(reversed_acceleration(&DISTANCES, 500), vec![5.0, 2.0, 2.0, 1.0, 0.0]);
        assert_eq!(reversed_acceleration(&DISTANCES, 4), vec![5.0, 2.0]);
    }

    #[test]
    fn proposes_three_in_small_interval() {
        let proposals = propose_k(&DISTANCES, 500, &[(2, 6)]);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].k, 3);
    }

    #[test]
    fn empty_intervals_are_skipped() {
        assert!(propose_k(&DISTANCES, 500, &DEFAULT_K_INTERVALS).is_empty());
    }
}
