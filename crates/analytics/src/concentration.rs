use std::collections::BTreeMap;

/// Incoming-edge count per node.
///
/// Every node that appears on either end of an edge gets an entry, so sources
/// with no incoming edges count as zero-weight peers in the distribution.
pub fn in_degree<K>(edges: impl IntoIterator<Item = (K, K)>) -> BTreeMap<K, u64>
where
    K: Ord,
{
    let mut degrees = BTreeMap::new();
    for (from, to) in edges {
        degrees.entry(from).or_insert(0);
        *degrees.entry(to).or_insert(0) += 1;
    }
    degrees
}

/// Gini coefficient of a non-negative distribution.
///
/// Values are sorted ascending and fed to
/// `G = 2·Σ(i·x_i) / (n·Σx_i) − (n+1)/n` (1-based `i`). The result is clamped
/// to `[0, 1]`; an empty or all-zero distribution yields 0.
pub fn gini(values: &[u64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let total: u128 = sorted.iter().map(|x| u128::from(*x)).sum();
    if total == 0 {
        return 0.0;
    }

    let weighted: u128 = sorted
        .iter()
        .enumerate()
        .map(|(i, x)| (i as u128 + 1) * u128::from(*x))
        .sum();

    let n = n as f64;
    let g = (2.0 * weighted as f64) / (n * total as f64) - (n + 1.0) / n;
    g.clamp(0.0, 1.0)
}

pub fn max_in_degree<K>(degrees: &BTreeMap<K, u64>) -> u64 {
    degrees.values().copied().max().unwrap_or(0)
}

/// Node with the highest in-degree; ties go to the smallest key.
pub fn top_recipient<K>(degrees: &BTreeMap<K, u64>) -> Option<&K> {
    let mut best: Option<(&K, u64)> = None;
    for (key, degree) in degrees {
        match best {
            Some((_, d)) if d >= *degree => {}
            _ => best = Some((key, *degree)),
        }
    }
    best.filter(|(_, d)| *d > 0).map(|(k, _)| k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reference_distribution() {
        let g = gini(&[5, 10, 50, 3]);
        assert!((g - 0.536_764_7).abs() < 1e-6, "gini was {g}");
    }

    #[test]
    fn empty_and_zero_distributions_are_equal() {
        assert_eq!(gini(&[]), 0.0);
        assert_eq!(gini(&[0, 0, 0]), 0.0);
        assert_eq!(gini(&[7]), 0.0);
    }

    #[test]
    fn in_degree_counts_sources_as_zero() {
        let degrees = in_degree([("a", "b"), ("c", "b"), ("b", "d")]);
        assert_eq!(degrees.get("a"), Some(&0));
        assert_eq!(degrees.get("b"), Some(&2));
        assert_eq!(degrees.get("c"), Some(&0));
        assert_eq!(degrees.get("d"), Some(&1));
        assert_eq!(max_in_degree(&degrees), 2);
        assert_eq!(top_recipient(&degrees), Some(&"b"));
    }

    #[test]
    fn top_recipient_breaks_ties_by_key() {
        let degrees: BTreeMap<&str, u64> = [("x", 3), ("a", 3), ("m", 1)].into_iter().collect();
        assert_eq!(top_recipient(&degrees), Some(&"a"));

        let idle: BTreeMap<&str, u64> = [("a", 0)].into_iter().collect();
        assert_eq!(top_recipient(&idle), None);
    }

    #[test]
    fn single_hub_approaches_one() {
        let mut small = vec![0u64; 9];
        small.push(100);
        let mut large = vec![0u64; 999];
        large.push(100);

        let g_small = gini(&small);
        let g_large = gini(&large);
        assert!((g_small - 0.9).abs() < 1e-9);
        assert!(g_large > g_small);
        assert!(g_large > 0.998);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn gini_is_bounded(values in prop::collection::vec(0u64..10_000, 0..200)) {
            let g = gini(&values);
            prop_assert!((0.0..=1.0).contains(&g));
        }

        #[test]
        fn equal_distribution_is_zero(value in 0u64..1_000_000, n in 1usize..200) {
            let g = gini(&vec![value; n]);
            prop_assert!(g.abs() < 1e-9);
        }

        #[test]
        fn order_does_not_matter(mut values in prop::collection::vec(0u64..1_000, 1..50)) {
            let g = gini(&values);
            values.reverse();
            prop_assert_eq!(g, gini(&values));
        }
    }
}
