//! Sorting parallel arrays by a key array.

use std::cmp::Ordering;

/// Stable permutation that orders `keys` by `cmp`: position `i` of the
/// result is the original index of the `i`-th smallest key.
pub fn sort_permutation_by<K, F>(keys: &[K], mut cmp: F) -> Vec<usize>
where
    F: FnMut(&K, &K) -> Ordering,
{
    let mut perm: Vec<usize> = (0..keys.len()).collect();
    perm.sort_by(|&a, &b| cmp(&keys[a], &keys[b]));
    perm
}

/// Gather `values` through `perm`.
pub fn apply_permutation<T: Clone>(perm: &[usize], values: &[T]) -> Vec<T> {
    perm.iter().map(|&i| values[i].clone()).collect()
}

/// Sort `keys` descending and reorder `values` alongside. Equal keys keep
/// their relative order.
pub fn sort_desc_with<K: Ord + Clone, T: Clone>(keys: &mut Vec<K>, values: &mut Vec<T>) {
    debug_assert_eq!(keys.len(), values.len());
    let perm = sort_permutation_by(keys, |a, b| b.cmp(a));
    *keys = apply_permutation(&perm, keys);
    *values = apply_permutation(&perm, values);
}
