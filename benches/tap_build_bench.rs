use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use tapcomm::prelude::*;

const PER_RANK: usize = 64;

// Banded dependencies plus a few random long-range columns per rank.
fn deps_for(rank: usize, n: usize, seed: u64) -> OffProcColumns {
    let mut rng = SmallRng::seed_from_u64(seed + rank as u64);
    let global = n * PER_RANK;
    let lo = rank * PER_RANK;
    let hi = lo + PER_RANK;
    let mut cols: Vec<usize> = (lo.saturating_sub(16)..lo).chain(hi..(hi + 16).min(global)).collect();
    for _ in 0..24 {
        let c = rng.gen_range(0..global);
        if !(lo..hi).contains(&c) && !cols.contains(&c) {
            cols.push(c);
        }
    }
    let starts: Vec<usize> = (0..=n).map(|p| p * PER_RANK).collect();
    OffProcColumns::from_col_starts(cols, &starts).unwrap()
}

fn bench_build_and_exchange(c: &mut Criterion) {
    let mut group = c.benchmark_group("tap");

    for &(n, ppn) in &[(8, 4), (16, 4), (16, 8)] {
        for variant in [TapVariant::ThreeStep, TapVariant::TwoStep] {
            let cfg = TapConfig::default()
                .with_ppn(ppn)
                .with_cutoffs(32, 8)
                .with_variant(variant);

            group.bench_with_input(
                BenchmarkId::new(format!("tap_{variant}_build_exchange"), format!("n{n}_ppn{ppn}")),
                &cfg,
                |b, cfg| {
                    b.iter(|| {
                        run_world(n, |comm| {
                            let me = comm.rank();
                            let deps = deps_for(me, n, 42);
                            let owned = me * PER_RANK..(me + 1) * PER_RANK;
                            let values: Vec<f64> = owned.clone().map(|c| c as f64).collect();
                            let tap = TapComm::build(&comm, cfg, &deps, owned).unwrap();
                            tap.communicate(&comm, &values).unwrap()
                        })
                    });
                },
            );
        }

        group.bench_with_input(
            BenchmarkId::new("direct_build_exchange", format!("n{n}_ppn{ppn}")),
            &n,
            |b, &n| {
                b.iter(|| {
                    run_world(n, |comm| {
                        let me = comm.rank();
                        let deps = deps_for(me, n, 42);
                        let owned = me * PER_RANK..(me + 1) * PER_RANK;
                        let values: Vec<f64> = owned.clone().map(|c| c as f64).collect();
                        let direct = ParComm::build(&comm, &deps, owned, CommTag::new(0x300)).unwrap();
                        direct.communicate(&comm, &values).unwrap()
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_build_and_exchange);
criterion_main!(benches);
