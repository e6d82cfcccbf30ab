//! Deciding which remote nodes a node talks to, and with how many ranks.
//!
//! Every rank on a node contributes the set of remote nodes it needs columns
//! from and how many columns it needs from each. The node-wide union, ordered
//! by descending aggregate traffic, becomes the node's receive plan. Busy
//! remote nodes get several replicas so their traffic is spread over more
//! than one local rank.

use crate::algs::communicator::Communicator;
use crate::algs::permute::sort_desc_with;
use crate::algs::tap::partition::OffNodeColumns;
use crate::config::TapConfig;
use crate::tap_error::TapError;
use crate::topology::{NodeSet, ProcessTopology};

/// Remote nodes this node receives from, heaviest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeAggregationPlan {
    nodes: Vec<usize>,
    traffic: Vec<usize>,
    replicas: Vec<usize>,
}

impl NodeAggregationPlan {
    /// Build from node ids and their node-wide traffic, in any order.
    pub fn new(
        mut nodes: Vec<usize>,
        mut traffic: Vec<usize>,
        ppn: usize,
        cfg: &TapConfig,
    ) -> Result<Self, TapError> {
        if nodes.len() != traffic.len() {
            return Err(TapError::LengthMismatch {
                what: "node traffic",
                expected: nodes.len(),
                got: traffic.len(),
            });
        }
        sort_desc_with(&mut traffic, &mut nodes);
        let replicas = replica_counts(&traffic, ppn, cfg);
        Ok(Self {
            nodes,
            traffic,
            replicas,
        })
    }

    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    /// Columns the whole node needs from each remote node.
    pub fn traffic(&self) -> &[usize] {
        &self.traffic
    }

    pub fn replicas(&self) -> &[usize] {
        &self.replicas
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total number of (node, replica) slots.
    pub fn num_slots(&self) -> usize {
        self.replicas.iter().sum()
    }

    /// `(plan index, node)` of every slot, in slot order. Slot `s` is served
    /// by local rank `s % ppn`.
    pub fn slots(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.nodes
            .iter()
            .zip(&self.replicas)
            .enumerate()
            .flat_map(|(i, (&node, &r))| std::iter::repeat_n((i, node), r))
    }

    /// Local rank that serves the first replica of each planned node.
    pub fn first_local_procs(&self, ppn: usize) -> Vec<usize> {
        let mut ctr = 0;
        self.replicas
            .iter()
            .map(|&r| {
                let p = ctr % ppn;
                ctr += r;
                p
            })
            .collect()
    }
}

/// Replica counts for nodes already sorted by descending traffic.
///
/// Above the eager cutoff a node gets `traffic / eager` replicas, or
/// `ideal_n_comm` when that would reach `ppn`. Above the rendezvous cutoff,
/// and only while there are fewer remote nodes than `ppn`, it gets
/// `traffic / rendezvous` replicas capped at `ppn`. The scan stops at the
/// first node below both cutoffs; it and everything after get one replica.
pub fn replica_counts(traffic_desc: &[usize], ppn: usize, cfg: &TapConfig) -> Vec<usize> {
    let mut out = vec![1; traffic_desc.len()];
    let n_nodes = traffic_desc.len();
    for (slot, &size) in out.iter_mut().zip(traffic_desc) {
        let n = if size > cfg.eager_cutoff {
            let n = size / cfg.eager_cutoff.max(1);
            if n >= ppn {
                cfg.ideal_n_comm.min(ppn)
            } else {
                n
            }
        } else if size > cfg.rendezvous_cutoff && n_nodes < ppn {
            (size / cfg.rendezvous_cutoff.max(1)).min(ppn)
        } else {
            break;
        };
        *slot = n.max(1);
    }
    out
}

/// Collective over `local_comm`: agree on the node's receive plan.
pub fn gather_off_node_nodes<C: Communicator>(
    local_comm: &C,
    topo: &ProcessTopology,
    off_node: &OffNodeColumns,
    cfg: &TapConfig,
) -> Result<NodeAggregationPlan, TapError> {
    let num_nodes = topo.num_nodes();
    let mut mine = NodeSet::new(num_nodes);
    let mut node_sizes = vec![0usize; num_nodes];
    for &node in &off_node.nodes {
        mine.insert(node);
        node_sizes[node] += 1;
    }

    // 1) union of every local rank's remote nodes
    let words = local_comm.all_reduce_bor(mine.words())?;
    let recv_nodes: Vec<usize> = NodeSet::from_words(num_nodes, words).iter().collect();

    // 2) node-wide column count per remote node
    let mine_sizes: Vec<usize> = recv_nodes.iter().map(|&n| node_sizes[n]).collect();
    let traffic = local_comm.all_reduce_sum(&mine_sizes)?;

    let plan = NodeAggregationPlan::new(recv_nodes, traffic, topo.ppn(), cfg)?;
    log::debug!(
        "node {}: receives from nodes {:?} with replicas {:?}",
        topo.node(),
        plan.nodes(),
        plan.replicas()
    );
    Ok(plan)
}
