//! Randomized arrangement that keeps same-vendor tickets apart.
//!
//! Indices are grouped by vendor tag, each group is shuffled, and then the
//! result is built one slot at a time by picking uniformly among the vendors
//! that differ from the previous slot and whose placement still leaves an
//! arrangement without adjacent repeats. When a single vendor holds more
//! than half of the remaining items no such vendor exists, and the
//! placement falls back to interleaving the dominant vendor as far as
//! possible before accepting repeats.

use std::collections::HashMap;
use std::hash::Hash;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::warn;

/// Result of [`arrange_non_adjacent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arrangement {
    /// Input indices in their new order. Position `i` (0-based) holds the
    /// index of the item ranked `i + 1`.
    pub order: Vec<usize>,
    /// True when the placement produced an inconsistent result and the order
    /// was replaced by a plain uniform shuffle.
    pub recovered: bool,
}

impl Arrangement {
    /// 1-indexed positions keyed by original index.
    pub fn positions(&self) -> Vec<(usize, u32)> {
        self.order
            .iter()
            .enumerate()
            .map(|(rank, &idx)| (idx, rank as u32 + 1))
            .collect()
    }
}

/// Arrange `tags` so that, where possible, no two consecutive entries share
/// a tag. Always returns a permutation of `0..tags.len()`.
pub fn arrange_non_adjacent<T, R>(tags: &[T], rng: &mut R) -> Arrangement
where
    T: Eq + Hash,
    R: Rng + ?Sized,
{
    let mut groups = group_indices(tags);
    for group in &mut groups {
        group.shuffle(rng);
    }

    let order = place(groups, tags.len(), rng);

    if order.len() != tags.len() {
        warn!(
            expected = tags.len(),
            placed = order.len(),
            "Non-adjacent placement lost items, falling back to uniform shuffle"
        );
        let mut order: Vec<usize> = (0..tags.len()).collect();
        order.shuffle(rng);
        return Arrangement {
            order,
            recovered: true,
        };
    }

    Arrangement {
        order,
        recovered: false,
    }
}

/// Number of consecutive pairs in `order` that share a tag.
pub fn adjacent_repeats<T: Eq>(tags: &[T], order: &[usize]) -> usize {
    order
        .windows(2)
        .filter(|pair| tags[pair[0]] == tags[pair[1]])
        .count()
}

/// Group indices by tag, groups in order of first appearance.
fn group_indices<T: Eq + Hash>(tags: &[T]) -> Vec<Vec<usize>> {
    let mut slot_of: HashMap<&T, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for (idx, tag) in tags.iter().enumerate() {
        let slot = *slot_of.entry(tag).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(idx);
    }

    groups
}

fn place<R: Rng + ?Sized>(mut groups: Vec<Vec<usize>>, total: usize, rng: &mut R) -> Vec<usize> {
    let mut order = Vec::with_capacity(total);
    let mut remaining: usize = groups.iter().map(Vec::len).sum();
    let mut prev: Option<usize> = None;

    while remaining > 0 {
        let candidates: Vec<usize> = (0..groups.len())
            .filter(|&g| {
                !groups[g].is_empty() && Some(g) != prev && stays_feasible(&groups, remaining, g)
            })
            .collect();

        let chosen = match candidates.choose(rng) {
            Some(&g) => g,
            None => match fallback_group(&groups, prev, rng) {
                Some(g) => g,
                None => break,
            },
        };

        match groups[chosen].pop() {
            Some(idx) => order.push(idx),
            None => break,
        }
        remaining -= 1;
        prev = Some(chosen);
    }

    order
}

/// Whether placing one item of `chosen` next leaves the rest arrangeable
/// with no adjacent repeats.
///
/// With `n` items left and the previous slot holding `p`, a repeat-free
/// arrangement exists iff `p` has at most `floor(n / 2)` items and every
/// other group at most `ceil(n / 2)`.
fn stays_feasible(groups: &[Vec<usize>], remaining: usize, chosen: usize) -> bool {
    let left = remaining - 1;
    groups.iter().enumerate().all(|(g, items)| {
        if g == chosen {
            items.len() - 1 <= left / 2
        } else {
            items.len() <= left.div_ceil(2)
        }
    })
}

/// Best-effort pick once no repeat-free continuation exists: the largest
/// group other than the previous one, otherwise the previous group itself.
fn fallback_group<R: Rng + ?Sized>(
    groups: &[Vec<usize>],
    prev: Option<usize>,
    rng: &mut R,
) -> Option<usize> {
    let largest = (0..groups.len())
        .filter(|&g| Some(g) != prev)
        .map(|g| groups[g].len())
        .max()
        .unwrap_or(0);

    if largest > 0 {
        let ties: Vec<usize> = (0..groups.len())
            .filter(|&g| Some(g) != prev && groups[g].len() == largest)
            .collect();
        return ties.choose(rng).copied();
    }

    prev.filter(|&g| !groups[g].is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn tags_from(weights: &[usize]) -> Vec<usize> {
        weights
            .iter()
            .enumerate()
            .flat_map(|(vendor, &w)| std::iter::repeat(vendor).take(w))
            .collect()
    }

    fn assert_permutation(order: &[usize], len: usize) {
        assert_eq!(order.len(), len);
        let unique: HashSet<usize> = order.iter().copied().collect();
        assert_eq!(unique.len(), len);
        assert!(order.iter().all(|&i| i < len));
    }

    #[test]
    fn test_empty_input() {
        let mut rng = StdRng::seed_from_u64(1);
        let tags: Vec<&str> = Vec::new();
        let arrangement = arrange_non_adjacent(&tags, &mut rng);
        assert!(arrangement.order.is_empty());
        assert!(!arrangement.recovered);
    }

    #[test]
    fn test_balanced_two_vendors_alternate() {
        let mut rng = StdRng::seed_from_u64(2);
        let tags = tags_from(&[5, 5]);
        let arrangement = arrange_non_adjacent(&tags, &mut rng);

        assert_permutation(&arrangement.order, 10);
        assert_eq!(adjacent_repeats(&tags, &arrangement.order), 0);
    }

    #[test]
    fn test_single_vendor_repeats_without_error() {
        let mut rng = StdRng::seed_from_u64(3);
        let tags = tags_from(&[10]);
        let arrangement = arrange_non_adjacent(&tags, &mut rng);

        assert_permutation(&arrangement.order, 10);
        assert!(!arrangement.recovered);
        assert_eq!(adjacent_repeats(&tags, &arrangement.order), 9);
    }

    #[test]
    fn test_dominant_vendor_interleaves_as_far_as_possible() {
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let tags = tags_from(&[7, 2]);
            let arrangement = arrange_non_adjacent(&tags, &mut rng);

            assert_permutation(&arrangement.order, 9);
            assert!(!arrangement.recovered);
            // 7 items need 6 separators; only 2 exist.
            assert_eq!(adjacent_repeats(&tags, &arrangement.order), 4);
        }
    }

    #[test]
    fn test_no_repeats_when_no_vendor_exceeds_half() {
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..500 {
            let vendors = rng.gen_range(2..7);
            let mut weights: Vec<usize> = (0..vendors).map(|_| rng.gen_range(0..=10)).collect();
            let total: usize = weights.iter().sum();
            if total == 0 {
                continue;
            }
            let max = *weights.iter().max().unwrap();
            if max > total.div_ceil(2) {
                // Trim the dominant vendor down to the boundary.
                let idx = weights.iter().position(|&w| w == max).unwrap();
                let others = total - max;
                weights[idx] = others + 1;
            }

            let tags = tags_from(&weights);
            let arrangement = arrange_non_adjacent(&tags, &mut rng);

            assert_permutation(&arrangement.order, tags.len());
            assert!(!arrangement.recovered);
            assert_eq!(
                adjacent_repeats(&tags, &arrangement.order),
                0,
                "weights {:?} produced adjacent repeats",
                weights
            );
        }
    }

    #[test]
    fn test_always_a_permutation() {
        let mut rng = StdRng::seed_from_u64(99);

        for _ in 0..500 {
            let vendors = rng.gen_range(1..6);
            let weights: Vec<usize> = (0..vendors).map(|_| rng.gen_range(0..=10)).collect();
            let tags = tags_from(&weights);

            let arrangement = arrange_non_adjacent(&tags, &mut rng);
            assert_permutation(&arrangement.order, tags.len());
            assert!(!arrangement.recovered);
        }
    }

    #[test]
    fn test_string_tags() {
        let mut rng = StdRng::seed_from_u64(5);
        let tags = vec!["a", "a", "a", "b", "b", "c"];
        let arrangement = arrange_non_adjacent(&tags, &mut rng);

        assert_permutation(&arrangement.order, 6);
        assert_eq!(adjacent_repeats(&tags, &arrangement.order), 0);
    }

    #[test]
    fn test_output_varies_between_runs() {
        let tags = tags_from(&[3, 3, 3]);
        let mut seen = HashSet::new();
        let mut first_vendor_counts = [0usize; 3];

        for seed in 0..300 {
            let mut rng = StdRng::seed_from_u64(seed);
            let arrangement = arrange_non_adjacent(&tags, &mut rng);
            first_vendor_counts[tags[arrangement.order[0]]] += 1;
            seen.insert(arrangement.order);
        }

        assert!(seen.len() > 50, "only {} distinct orders", seen.len());
        for count in first_vendor_counts {
            assert!(count > 50, "first slot skewed: {:?}", first_vendor_counts);
        }
    }

    #[test]
    fn test_items_within_a_vendor_are_shuffled() {
        let tags = vec!["a", "a", "a", "a"];
        let mut first_items = HashSet::new();

        for seed in 0..100 {
            let mut rng = StdRng::seed_from_u64(seed);
            let arrangement = arrange_non_adjacent(&tags, &mut rng);
            first_items.insert(arrangement.order[0]);
        }

        assert_eq!(first_items.len(), 4);
    }

    #[test]
    fn test_positions_are_one_indexed() {
        let arrangement = Arrangement {
            order: vec![2, 0, 1],
            recovered: false,
        };
        assert_eq!(arrangement.positions(), vec![(2, 1), (0, 2), (1, 3)]);
    }

    #[test]
    fn test_adjacent_repeats() {
        let tags = vec!["a", "a", "b"];
        assert_eq!(adjacent_repeats(&tags, &[0, 1, 2]), 1);
        assert_eq!(adjacent_repeats(&tags, &[0, 2, 1]), 0);
    }

    #[test]
    fn test_stays_feasible() {
        // a:2 b:1, nothing placed yet
        let groups = vec![vec![0, 1], vec![2]];
        assert!(stays_feasible(&groups, 3, 0));
        assert!(!stays_feasible(&groups, 3, 1));
    }
}
