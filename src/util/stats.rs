//! Small numeric helpers shared by the loader and the aggregator.

/// Median of the finite values; `None` when there are none.
#[must_use]
pub fn median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(f64::total_cmp);
    let mid = finite.len() / 2;
    if finite.len() % 2 == 0 {
        Some((finite[mid - 1] + finite[mid]) / 2.0)
    } else {
        Some(finite[mid])
    }
}

/// Replaces missing or non-finite values with the median of the rest.
///
/// When nothing is finite, every value becomes `0.0`.
#[must_use]
pub fn impute_median(values: &[Option<f64>]) -> Vec<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let fill = median(&present).unwrap_or(0.0);
    values
        .iter()
        .map(|value| match value {
            Some(v) if v.is_finite() => *v,
            _ => fill,
        })
        .collect()
}

/// `ln(2 + w)`, damping very large weights.
#[must_use]
pub fn log_damped(weight: f64) -> f64 {
    (2.0 + weight).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_handles_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn impute_fills_nulls_with_median() {
        let filled = impute_median(&[Some(10.0), None, Some(30.0), Some(f64::NAN)]);
        assert_eq!(filled, vec![10.0, 20.0, 30.0, 20.0]);
    }
}
