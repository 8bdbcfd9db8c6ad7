//! Channel allocation between the copies of two connected steps.

/// `(source copy, target copy)` pairs that get their own channel for a hop
/// from a step with `sources` copies to one with `targets` copies.
///
/// A partitioned hop always needs every pair so any source copy can reach
/// the copy owning a partition. Otherwise: 1→1 one channel, 1→m and n→1
/// fan out or in, n→n pairs copy i with copy i, and n→m connects all pairs.
#[must_use]
pub fn copy_pairs(sources: u32, targets: u32, partitioned: bool) -> Vec<(u32, u32)> {
    let all_pairs = || -> Vec<(u32, u32)> {
        (0..sources)
            .flat_map(|s| (0..targets).map(move |t| (s, t)))
            .collect()
    };
    if partitioned {
        return all_pairs();
    }
    match (sources, targets) {
        (1, _) => (0..targets).map(|t| (0, t)).collect(),
        (_, 1) => (0..sources).map(|s| (s, 0)).collect(),
        (n, m) if n == m => (0..n).map(|i| (i, i)).collect(),
        _ => all_pairs(),
    }
}

/// Display name of the channel between two copies.
#[must_use]
pub fn channel_name(from: &str, from_copy: u32, to: &str, to_copy: u32) -> String {
    format!("{from}.{from_copy} - {to}.{to_copy}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_to_one() {
        assert_eq!(copy_pairs(1, 1, false), vec![(0, 0)]);
    }

    #[test]
    fn fan_out_and_fan_in() {
        assert_eq!(copy_pairs(1, 3, false), vec![(0, 0), (0, 1), (0, 2)]);
        assert_eq!(copy_pairs(2, 1, false), vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn equal_copies_pair_up() {
        assert_eq!(copy_pairs(3, 3, false), vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn uneven_copies_connect_everything() {
        assert_eq!(copy_pairs(2, 3, false).len(), 6);
    }

    #[test]
    fn partitioned_hop_connects_everything() {
        assert_eq!(copy_pairs(2, 2, true), vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn names_follow_copy_numbers() {
        assert_eq!(channel_name("a", 0, "b", 2), "a.0 - b.2");
    }
}
