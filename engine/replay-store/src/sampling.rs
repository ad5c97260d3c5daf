//! Pure sampling helpers shared by the SQLite queries.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use rand::Rng;

/// Split of a mixed batch: `(recent, random)` with
/// `recent = round(batch_size * recent_ratio)`.
pub fn mixed_counts(batch_size: usize, recent_ratio: f64) -> (usize, usize) {
    let ratio = recent_ratio.clamp(0.0, 1.0);
    let recent = ((batch_size as f64) * ratio).round() as usize;
    let recent = recent.min(batch_size);
    (recent, batch_size - recent)
}

struct Keyed<T> {
    key: f64,
    item: T,
}

impl<T> PartialEq for Keyed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key.total_cmp(&other.key) == Ordering::Equal
    }
}

impl<T> Eq for Keyed<T> {}

impl<T> PartialOrd for Keyed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Keyed<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.total_cmp(&other.key)
    }
}

/// Bounded top-k reservoir keyed by Efraimidis-Spirakis keys.
struct Reservoir<T> {
    k: usize,
    heap: BinaryHeap<Reverse<Keyed<T>>>,
}

impl<T> Reservoir<T> {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    fn offer(&mut self, key: f64, item: T) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(Reverse(Keyed { key, item }));
        } else if let Some(Reverse(min)) = self.heap.peek() {
            if key > min.key {
                self.heap.pop();
                self.heap.push(Reverse(Keyed { key, item }));
            }
        }
    }

    fn into_sorted(self) -> Vec<T> {
        let mut entries: Vec<Keyed<T>> = self.heap.into_iter().map(|Reverse(k)| k).collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|k| k.item).collect()
    }
}

/// Draw up to `k` items without replacement, each with probability
/// proportional to `priority^(1/temperature)`.
///
/// Streams once over `items` keeping at most `2k` entries, so memory does not
/// grow with the input. Items with zero weight are used only to fill the
/// batch once every positive-weight item is taken; when the total weight is
/// zero the draw is uniform.
pub fn weighted_sample_without_replacement<T, I, R>(
    items: I,
    k: usize,
    temperature: f64,
    rng: &mut R,
) -> Vec<T>
where
    I: IntoIterator<Item = (T, f64)>,
    R: Rng + ?Sized,
{
    let exponent = 1.0 / temperature.max(1e-3);
    let mut weighted = Reservoir::new(k);
    let mut uniform = Reservoir::new(k);
    let mut total_weight = 0.0f64;

    for (item, priority) in items {
        let weight = priority.max(0.0).powf(exponent);
        // ln(u) / w orders the same as u^(1/w) without underflow.
        let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
        if weight.is_finite() && weight > 0.0 {
            total_weight += weight;
            weighted.offer(u.ln() / weight, item);
        } else {
            uniform.offer(u.ln(), item);
        }
    }

    if total_weight <= 0.0 {
        return uniform.into_sorted();
    }
    let mut picked = weighted.into_sorted();
    if picked.len() < k {
        let missing = k - picked.len();
        picked.extend(uniform.into_sorted().into_iter().take(missing));
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::collections::HashSet;

    #[test]
    fn test_mixed_counts() {
        assert_eq!(mixed_counts(50, 0.8), (40, 10));
        assert_eq!(mixed_counts(32, 0.8), (26, 6));
        assert_eq!(mixed_counts(10, 0.0), (0, 10));
        assert_eq!(mixed_counts(10, 1.5), (10, 0));
        assert_eq!(mixed_counts(0, 0.8), (0, 0));
    }

    #[test]
    fn test_no_replacement_and_bounded() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let items = (0..100).map(|i| (i, 1.0 + i as f64));
        let picked = weighted_sample_without_replacement(items, 20, 1.0, &mut rng);
        assert_eq!(picked.len(), 20);
        let unique: HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn test_fewer_items_than_k() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let picked = weighted_sample_without_replacement(vec![(1, 1.0), (2, 0.0)], 5, 0.8, &mut rng);
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn test_all_zero_priority_is_uniform() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let mut hits = [0usize; 4];
        for _ in 0..4000 {
            let items = (0..4).map(|i| (i, 0.0));
            for i in weighted_sample_without_replacement(items, 1, 1.0, &mut rng) {
                hits[i] += 1;
            }
        }
        for count in hits {
            assert!((800..1200).contains(&count), "uneven draw: {:?}", hits);
        }
    }

    #[test]
    fn test_high_priority_dominates_and_temperature_flattens() {
        let draw = |temperature: f64, seed: u64| {
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            let mut heavy = 0;
            for _ in 0..2000 {
                let items = vec![(0, 4.0), (1, 1.0), (2, 1.0), (3, 1.0), (4, 1.0)];
                if weighted_sample_without_replacement(items, 1, temperature, &mut rng)[0] == 0 {
                    heavy += 1;
                }
            }
            heavy
        };
        let sharp = draw(0.5, 11);
        let neutral = draw(1.0, 12);
        let flat = draw(4.0, 13);
        // Expected shares: 16/20 = 0.8, 4/8 = 0.5, sqrt(2)/(sqrt(2)+4) ~ 0.26
        assert!(sharp > neutral, "sharp {} neutral {}", sharp, neutral);
        assert!(neutral > flat, "neutral {} flat {}", neutral, flat);
        assert!(flat > 2000 / 5 - 150);
    }

    #[test]
    fn test_zero_weight_items_fill_after_positive() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let items = vec![(0, 0.0), (1, 2.0), (2, 0.0)];
        let picked = weighted_sample_without_replacement(items, 2, 1.0, &mut rng);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0], 1);
    }
}
