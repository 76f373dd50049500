//! Weighted random sampling over a candidate slice
//!
//! Uses cumulative-weight binary search (`WeightedIndex`) so one draw is
//! `O(log n)` and the long-run frequency of each item converges to its
//! share of the total weight.

use rand::{
    Rng,
    distr::{Distribution, weighted::WeightedIndex},
    seq::IndexedRandom,
};

/// Pick one item with probability proportional to `weight(item) + bias`
///
/// Falls back to a uniform draw when every effective weight is zero or the
/// sum overflows. Returns `None` only for an empty slice.
pub fn pick<'a, T, R, F>(items: &'a [T], bias: u64, weight: F, rng: &mut R) -> Option<&'a T>
where
    R: Rng + ?Sized,
    F: Fn(&T) -> u64,
{
    if items.is_empty() {
        return None;
    }

    let weights = items.iter().map(|item| weight(item).saturating_add(bias));

    match WeightedIndex::new(weights) {
        Ok(dist) => items.get(dist.sample(rng)),
        Err(_) => items.choose(rng),
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn empty_slice_yields_none() {
        let mut rng = StdRng::seed_from_u64(1);
        let items: [u64; 0] = [];
        assert!(pick(&items, 10, |w| *w, &mut rng).is_none());
    }

    #[test]
    fn zero_weights_without_bias_fall_back_to_uniform() {
        let mut rng = StdRng::seed_from_u64(7);
        let items = [0_u64, 0, 0];
        let mut seen = [0_u32; 3];

        for _ in 0..3_000 {
            let picked = pick(&items, 0, |w| *w, &mut rng).unwrap();
            let index = items.iter().position(|i| std::ptr::eq(i, picked)).unwrap();
            seen[index] += 1;
        }

        assert!(seen.iter().all(|count| *count > 800), "{seen:?}");
    }

    #[test]
    fn frequency_converges_to_biased_weight_share() {
        let mut rng = StdRng::seed_from_u64(42);
        // Effective weights with bias 10: 10, 40, 100
        let items = [0_u64, 30, 90];
        let mut seen = [0_u32; 3];
        let draws = 150_000;

        for _ in 0..draws {
            let picked = pick(&items, 10, |w| *w, &mut rng).unwrap();
            let index = items.iter().position(|i| std::ptr::eq(i, picked)).unwrap();
            seen[index] += 1;
        }

        let expected = [10.0 / 150.0, 40.0 / 150.0, 100.0 / 150.0];
        for (count, share) in seen.iter().zip(expected) {
            let observed = f64::from(*count) / f64::from(draws);
            assert!((observed - share).abs() < 0.01, "observed {observed}, expected {share}");
        }
    }

    #[test]
    fn zero_weight_channel_is_not_starved() {
        let mut rng = StdRng::seed_from_u64(3);
        let items = [0_u64, 1_000];

        let hits = (0..20_000)
            .filter(|_| *pick(&items, 10, |w| *w, &mut rng).unwrap() == 0)
            .count();

        assert!(hits > 0);
    }
}
