#![allow(dead_code)]
use std::ops::Range;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tapcomm::prelude::*;

/// Block column partition: rank `r` owns `r * per_rank .. (r + 1) * per_rank`.
pub fn col_starts(num_procs: usize, per_rank: usize) -> Vec<usize> {
    (0..=num_procs).map(|p| p * per_rank).collect()
}

pub fn owned_range(rank: usize, per_rank: usize) -> Range<usize> {
    rank * per_rank..(rank + 1) * per_rank
}

/// Value stored for global column `col`; exact in `f64`.
pub fn value_of(col: usize) -> f64 {
    col as f64 * 0.5 + 1.0
}

pub fn owned_values(rank: usize, per_rank: usize) -> Vec<f64> {
    owned_range(rank, per_rank).map(value_of).collect()
}

pub fn expected_values(deps: &OffProcColumns) -> Vec<f64> {
    deps.cols().iter().map(|&c| value_of(c)).collect()
}

/// Every non-owned column is needed with probability `density`, listed in a
/// shuffled order so dependency order differs from owner order.
pub fn random_deps(
    rank: usize,
    num_procs: usize,
    per_rank: usize,
    density: f64,
    seed: u64,
) -> OffProcColumns {
    let mut rng = SmallRng::seed_from_u64(seed ^ (rank as u64).wrapping_mul(0x9E37_79B9));
    let owned = owned_range(rank, per_rank);
    let mut cols: Vec<usize> = (0..num_procs * per_rank)
        .filter(|c| !owned.contains(c))
        .filter(|_| rng.gen_bool(density))
        .collect();
    for i in (1..cols.len()).rev() {
        let j = rng.gen_range(0..=i);
        cols.swap(i, j);
    }
    OffProcColumns::from_col_starts(cols, &col_starts(num_procs, per_rank))
        .expect("generated columns are in range")
}

/// Config with cutoffs low enough that small tests get several replicas.
pub fn eager_config(ppn: usize, ordering: RankOrdering) -> TapConfig {
    TapConfig::default()
        .with_ppn(ppn)
        .with_ordering(ordering)
        .with_cutoffs(4, 2)
        .with_ideal_n_comm(2)
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
