mod util;
use util::*;

use serial_test::serial;
use tapcomm::prelude::*;

const PER_RANK: usize = 3;

/// Two nodes of four (block placement). Node 0 needs three columns of rank 5
/// (15, 16, 17) and two of rank 7 (21, 22): rank 0 needs 21, 15 and 16,
/// rank 2 needs 22, 16 and 17. Rank 0 also needs column 3 from rank 1 on its
/// own node.
fn two_node_deps(rank: usize) -> OffProcColumns {
    let cols = match rank {
        0 => vec![21, 3, 15, 16],
        2 => vec![22, 16, 17],
        _ => vec![],
    };
    OffProcColumns::from_col_starts(cols, &col_starts(8, PER_RANK)).unwrap()
}

#[test]
#[serial]
fn two_nodes_with_replicas() {
    // node-wide traffic from node 1 is 6 columns; 6 / 3 gives two replicas
    let cfg = TapConfig::default()
        .with_ppn(4)
        .with_cutoffs(3, 1)
        .with_ideal_n_comm(2);
    let out = run_world(8, |comm| {
        let me = comm.rank();
        let deps = two_node_deps(me);
        let tap = TapComm::build(&comm, &cfg, &deps, owned_range(me, PER_RANK)).unwrap();
        let direct =
            ParComm::build(&comm, &deps, owned_range(me, PER_RANK), CommTag::new(0x100)).unwrap();
        // every needed remote element is 1.0 in the first pass
        let ones = vec![1.0f64; PER_RANK];
        let via_tap = tap.communicate(&comm, &ones).unwrap();
        assert_eq!(via_tap, direct.communicate(&comm, &ones).unwrap());
        assert_eq!(via_tap, vec![1.0; deps.len()]);
        let got = tap
            .communicate(&comm, &owned_values(me, PER_RANK))
            .unwrap();
        assert_eq!(got, expected_values(&deps), "rank {me}");
        (
            tap.recv_nodes().to_vec(),
            tap.replicas().to_vec(),
            tap.global_send_procs().to_vec(),
            tap.global_recv_procs().to_vec(),
            tap.global().recv_data.clone(),
            tap.local_l().recv_data.num_msgs(),
            tap.node_plan().traffic().to_vec(),
        )
    });

    // node 0 aggregates 3 + 2 distinct columns from node 1 over two replicas
    for (rank, (nodes, replicas, .., traffic)) in out.iter().enumerate().take(4) {
        assert_eq!(nodes, &vec![1], "rank {rank}");
        assert_eq!(replicas, &vec![2], "rank {rank}");
        assert_eq!(traffic, &vec![6], "rank {rank}");
    }
    for (nodes, ..) in &out[4..] {
        assert!(nodes.is_empty());
    }
    // exactly local ranks 0 and 1 of node 0 receive from node 1, paired with
    // local ranks 0 and 1 there
    assert_eq!(out[0].3, vec![4]);
    assert_eq!(out[1].3, vec![5]);
    assert!(out[2].3.is_empty() && out[3].3.is_empty());
    assert_eq!(out[4].2, vec![0]);
    assert_eq!(out[5].2, vec![1]);

    // off-node columns alternate between the two replicas in dependency
    // order: rank 0 routes 21, 16 via rank 0 and 15 via rank 1; rank 2 routes
    // 22, 17 via rank 0 and 16 via rank 1
    assert_eq!(out[0].4.indices(), &[16, 17, 21, 22]);
    assert_eq!(out[1].4.indices(), &[15, 16]);
    let distinct: std::collections::BTreeSet<usize> = out[0]
        .4
        .indices()
        .iter()
        .chain(out[1].4.indices())
        .copied()
        .collect();
    assert_eq!(distinct.into_iter().collect::<Vec<_>>(), vec![15, 16, 17, 21, 22]);
    assert_eq!(out[0].5, 1);
}

#[test]
#[serial]
fn agrees_with_direct_exchange() {
    let cases = [
        (8, 4, RankOrdering::Block),
        (8, 2, RankOrdering::Cyclic),
        (12, 3, RankOrdering::Alternating),
        (6, 1, RankOrdering::Block),
        (4, 4, RankOrdering::Cyclic),
    ];
    for (seed, &(n, ppn, ordering)) in cases.iter().enumerate() {
        let cfg = eager_config(ppn, ordering);
        let per_rank = 3;
        run_world(n, |comm| {
            let me = comm.rank();
            let deps = random_deps(me, n, per_rank, 0.3, seed as u64);
            let owned = owned_range(me, per_rank);
            let values = owned_values(me, per_rank);

            let tap = TapComm::build(&comm, &cfg, &deps, owned.clone()).unwrap();
            let direct = ParComm::build(&comm, &deps, owned, CommTag::new(0x100)).unwrap();
            let via_tap = tap.communicate(&comm, &values).unwrap();
            let via_direct = direct.communicate(&comm, &values).unwrap();
            assert_eq!(via_tap, via_direct, "{ordering} ppn {ppn} rank {me}");
            assert_eq!(via_tap, expected_values(&deps));
        });
    }
}

#[test]
#[serial]
fn integer_payloads_and_empty_dependencies() {
    let cfg = eager_config(2, RankOrdering::Block);
    run_world(4, |comm| {
        let me = comm.rank();
        // only rank 3 needs anything
        let deps = if me == 3 {
            OffProcColumns::from_col_starts(vec![0, 5, 2], &col_starts(4, 2)).unwrap()
        } else {
            OffProcColumns::default()
        };
        let tap = TapComm::build(&comm, &cfg, &deps, owned_range(me, 2)).unwrap();
        let values: Vec<u32> = owned_range(me, 2).map(|c| c as u32 * 7).collect();
        let got = tap.communicate(&comm, &values).unwrap();
        if me == 3 {
            assert_eq!(got, vec![0, 35, 14]);
        } else {
            assert!(got.is_empty());
        }
    });
}

#[test]
#[serial]
fn wrong_value_length_is_rejected() {
    let cfg = TapConfig::default().with_ppn(1);
    run_world(2, |comm| {
        let deps = OffProcColumns::default();
        let tap = TapComm::build(&comm, &cfg, &deps, 0..2).unwrap();
        let err = tap.communicate(&comm, &[1.0f64]).unwrap_err();
        assert_eq!(
            err,
            TapError::LengthMismatch {
                what: "owned values",
                expected: 2,
                got: 1
            }
        );
    });
}

#[test]
#[serial]
fn ppn_must_divide_world() {
    let cfg = TapConfig::default().with_ppn(4);
    run_world(6, |comm| {
        let err = TapComm::build(&comm, &cfg, &OffProcColumns::default(), 0..0).unwrap_err();
        assert!(matches!(err, TapError::InvalidConfig(_)));
    });
}

#[test]
#[serial]
fn recv_nodes_are_the_union_of_node_mates_needs() {
    use std::collections::BTreeSet;

    for (seed, (n, ppn, ordering)) in [
        (12, 3, RankOrdering::Block),
        (12, 2, RankOrdering::Alternating),
        (16, 4, RankOrdering::Cyclic),
    ]
    .into_iter()
    .enumerate()
    {
        let cfg = eager_config(ppn, ordering);
        let out = run_world(n, |comm| {
            let me = comm.rank();
            let deps = random_deps(me, n, 2, 0.15, seed as u64 + 40);
            let tap = TapComm::build(&comm, &cfg, &deps, owned_range(me, 2)).unwrap();
            let topo = *tap.topology();
            let needed: BTreeSet<usize> = deps
                .owners()
                .iter()
                .map(|&o| topo.to_node(o))
                .filter(|&node| node != topo.node())
                .collect();
            let off_node = deps
                .owners()
                .iter()
                .filter(|&&o| topo.to_node(o) != topo.node())
                .count();
            (
                topo.node(),
                needed,
                off_node,
                tap.recv_nodes().to_vec(),
                tap.node_plan().traffic().to_vec(),
            )
        });

        let num_nodes = n / ppn;
        let mut spanned_several = false;
        for node in 0..num_nodes {
            let mates: Vec<_> = out.iter().filter(|o| o.0 == node).collect();
            assert_eq!(mates.len(), ppn);
            let union: BTreeSet<usize> = mates.iter().flat_map(|o| o.1.iter().copied()).collect();
            let total: usize = mates.iter().map(|o| o.2).sum();
            spanned_several |= union.len() > 1;
            for (_, _, _, recv_nodes, traffic) in &mates {
                let plan: BTreeSet<usize> = recv_nodes.iter().copied().collect();
                assert_eq!(plan.len(), recv_nodes.len());
                assert_eq!(plan, union, "{ordering} node {node}");
                assert!(traffic.iter().all(|&t| t > 0));
                assert_eq!(traffic.iter().sum::<usize>(), total);
                assert!(traffic.windows(2).all(|w| w[0] >= w[1]));
            }
        }
        assert!(spanned_several, "{ordering}: every node needed a single remote node");
    }
}

#[test]
#[serial]
fn transpose_sums_contributions_at_the_owner() {
    let per_rank = 3;
    for (seed, variant) in [TapVariant::ThreeStep, TapVariant::TwoStep]
        .into_iter()
        .enumerate()
    {
        for (n, ppn, ordering) in [(8, 4, RankOrdering::Block), (12, 3, RankOrdering::Cyclic)] {
            let cfg = eager_config(ppn, ordering).with_variant(variant);
            run_world(n, |comm| {
                let me = comm.rank();
                let density = 0.3;
                let deps = random_deps(me, n, per_rank, density, seed as u64 + 7);
                let tap = TapComm::build(&comm, &cfg, &deps, owned_range(me, per_rank)).unwrap();
                let direct = ParComm::build(
                    &comm,
                    &deps,
                    owned_range(me, per_rank),
                    CommTag::new(0x100),
                )
                .unwrap();

                // rank r contributes 100 * r + col to every column it reads
                let contrib = |rank: usize, col: usize| (100 * rank + col) as f64;
                let mine: Vec<f64> = deps.cols().iter().map(|&c| contrib(me, c)).collect();
                let via_tap = tap.communicate_t(&comm, &mine).unwrap();
                assert_eq!(via_tap, direct.communicate_t(&comm, &mine).unwrap());

                let want: Vec<f64> = owned_range(me, per_rank)
                    .map(|col| {
                        (0..n)
                            .filter(|&r| {
                                random_deps(r, n, per_rank, density, seed as u64 + 7)
                                    .cols()
                                    .contains(&col)
                            })
                            .map(|r| contrib(r, col))
                            .sum()
                    })
                    .collect();
                assert_eq!(via_tap, want, "{variant} {ordering} rank {me}");
            });
        }
    }
}

#[test]
#[serial]
fn block_values_travel_per_column() {
    const K: usize = 3;
    let cfg = eager_config(3, RankOrdering::Alternating);
    run_world(9, |comm| {
        let me = comm.rank();
        let deps = random_deps(me, 9, 2, 0.4, 21);
        let tap = TapComm::build(&comm, &cfg, &deps, owned_range(me, 2)).unwrap();
        let direct = ParComm::build(&comm, &deps, owned_range(me, 2), CommTag::new(0x100)).unwrap();

        // vector v holds (v + 1) * value_of(col)
        let values: Vec<f64> = owned_range(me, 2)
            .flat_map(|c| (0..K).map(move |v| (v + 1) as f64 * value_of(c)))
            .collect();
        let got = tap.communicate_block(&comm, &values, K).unwrap();
        assert_eq!(got, direct.communicate_block(&comm, &values, K).unwrap());
        let want: Vec<f64> = deps
            .cols()
            .iter()
            .flat_map(|&c| (0..K).map(move |v| (v + 1) as f64 * value_of(c)))
            .collect();
        assert_eq!(got, want);

        // each block column matches a single-vector exchange
        for v in 0..K {
            let single: Vec<f64> = values.iter().skip(v).step_by(K).copied().collect();
            let one = tap.communicate(&comm, &single).unwrap();
            let column: Vec<f64> = got.iter().skip(v).step_by(K).copied().collect();
            assert_eq!(one, column);
        }

        // transposed blocks sum per vector
        let back = tap.communicate_t_block(&comm, &got, K).unwrap();
        assert_eq!(back, direct.communicate_t_block(&comm, &got, K).unwrap());
        assert_eq!(back.len(), 2 * K);

        assert!(matches!(
            tap.communicate_block(&comm, &values[1..], K),
            Err(TapError::LengthMismatch { .. })
        ));
    });
}

#[test]
#[serial]
fn two_step_variant_skips_the_gather_phase() {
    let cases = [
        (8, 4, RankOrdering::Block),
        (12, 3, RankOrdering::Alternating),
        (8, 2, RankOrdering::Cyclic),
    ];
    for (seed, &(n, ppn, ordering)) in cases.iter().enumerate() {
        let cfg = eager_config(ppn, ordering).with_variant(TapVariant::TwoStep);
        run_world(n, |comm| {
            let me = comm.rank();
            let deps = random_deps(me, n, 3, 0.35, seed as u64 + 90);
            let owned = owned_range(me, 3);
            let tap = TapComm::build(&comm, &cfg, &deps, owned.clone()).unwrap();
            let direct = ParComm::build(&comm, &deps, owned, CommTag::new(0x100)).unwrap();
            assert_eq!(tap.variant(), TapVariant::TwoStep);

            let values = owned_values(me, 3);
            let got = tap.communicate(&comm, &values).unwrap();
            assert_eq!(got, direct.communicate(&comm, &values).unwrap());
            assert_eq!(got, expected_values(&deps), "{ordering} rank {me}");

            // owners talk to the rank with their own local index
            let topo = *tap.topology();
            assert!(tap.local_s().send_data.is_empty() && tap.local_s().recv_data.is_empty());
            for &p in tap.global_send_procs().iter().chain(tap.global_recv_procs()) {
                assert_ne!(topo.to_node(p), topo.node());
                assert_eq!(topo.to_local(p), topo.local_rank());
            }
        });
    }
}
