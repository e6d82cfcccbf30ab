use proptest::prelude::*;
use tapcomm::algs::tap::node_plan::{NodeAggregationPlan, replica_counts};
use tapcomm::config::TapConfig;

proptest! {
    #[test]
    fn replicas_stay_within_one_and_ppn(
        mut traffic in proptest::collection::vec(0usize..20_000, 0..12),
        ppn in 1usize..17,
        ideal in 1usize..20,
        rendezvous in 1usize..600,
        extra in 0usize..9000,
    ) {
        traffic.sort_unstable_by(|a, b| b.cmp(a));
        let cfg = TapConfig::default()
            .with_cutoffs(rendezvous + extra, rendezvous)
            .with_ideal_n_comm(ideal);
        let r = replica_counts(&traffic, ppn, &cfg);
        prop_assert_eq!(r.len(), traffic.len());
        prop_assert!(r.iter().all(|&n| (1..=ppn).contains(&n)));
    }

    #[test]
    fn plan_is_sorted_by_traffic(
        traffic in proptest::collection::vec(0usize..1000, 0..10),
    ) {
        let nodes: Vec<usize> = (0..traffic.len()).collect();
        let plan = NodeAggregationPlan::new(nodes, traffic.clone(), 4, &TapConfig::default()).unwrap();
        prop_assert!(plan.traffic().windows(2).all(|w| w[0] >= w[1]));
        // ties keep ascending node ids
        for (w, t) in plan.nodes().windows(2).zip(plan.traffic().windows(2)) {
            if t[0] == t[1] {
                prop_assert!(w[0] < w[1]);
            }
        }
        let mut again = plan.nodes().to_vec();
        again.sort_unstable();
        prop_assert_eq!(again, (0..traffic.len()).collect::<Vec<_>>());
    }
}
