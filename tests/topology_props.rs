use proptest::prelude::*;
use tapcomm::config::RankOrdering;
use tapcomm::topology::ProcessTopology;

fn ordering() -> impl Strategy<Value = RankOrdering> {
    prop_oneof![
        Just(RankOrdering::Cyclic),
        Just(RankOrdering::Block),
        Just(RankOrdering::Alternating),
    ]
}

proptest! {
    #[test]
    fn node_and_local_rank_invert(ppn in 1usize..9, nodes in 1usize..9, ord in ordering()) {
        let n = ppn * nodes;
        let topo = ProcessTopology::with_ordering(0, n, ppn, ord).unwrap();
        let mut seen = vec![false; n];
        for p in 0..n {
            let (node, local) = (topo.to_node(p), topo.to_local(p));
            prop_assert!(node < nodes && local < ppn);
            prop_assert_eq!(topo.to_global(node, local), p);
            prop_assert!(!seen[p]);
            seen[p] = true;
        }
    }

    #[test]
    fn every_node_holds_ppn_ranks(ppn in 1usize..7, nodes in 1usize..7, ord in ordering()) {
        let n = ppn * nodes;
        let topo = ProcessTopology::with_ordering(0, n, ppn, ord).unwrap();
        let mut per_node = vec![0usize; nodes];
        for p in 0..n {
            per_node[topo.to_node(p)] += 1;
        }
        prop_assert!(per_node.iter().all(|&c| c == ppn));
    }
}

#[test]
fn alternating_snakes_across_nodes() {
    // 3 nodes x 2: row 0 runs forward, row 1 backward
    let topo = ProcessTopology::with_ordering(4, 6, 2, RankOrdering::Alternating).unwrap();
    let nodes: Vec<usize> = (0..6).map(|p| topo.to_node(p)).collect();
    assert_eq!(nodes, vec![0, 1, 2, 2, 1, 0]);
    assert_eq!(topo.node(), 1);
    assert_eq!(topo.local_rank(), 1);
    assert_eq!(topo.to_global(0, 1), 5);
}

#[test]
fn unknown_legacy_code_fails() {
    assert!(ProcessTopology::from_code(1, 4, 2, 7).is_err());
    let t = ProcessTopology::from_code(1, 4, 2, 0).unwrap();
    assert_eq!(t.ordering(), RankOrdering::Cyclic);
}
