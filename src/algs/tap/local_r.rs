//! Intra-node redistribution of received inter-node data (the R phase).
//!
//! Every off-node column is assigned to one local rank that will receive it
//! from the remote node. Columns from one remote node go round-robin over the
//! local ranks serving that node's replica slots, starting at the slot of the
//! node's first replica and wrapping at `ppn`.
//!
//! In the two-step variant a column owned by local rank `p` of a remote node
//! is received by local rank `p` of this node.

use hashbrown::HashMap;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::index_exchange::{count_incoming, exchange_index_lists};
use crate::algs::tap::node_plan::NodeAggregationPlan;
use crate::algs::tap::partition::OffNodeColumns;
use crate::data::schedule::ParSchedule;
use crate::tap_error::TapError;
use crate::topology::ProcessTopology;

/// Local R schedule plus the origin of every send index, aligned with
/// `schedule.send_data.indices()`: the owning node in the three-step variant,
/// the owning world rank in the two-step one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalR {
    pub schedule: ParSchedule,
    pub origins: Vec<usize>,
}

/// Collective over `local_comm`.
///
/// Receive indices are positions in the off-node column list. Send indices
/// are global columns until remapped.
pub fn form_local_r<C: Communicator>(
    local_comm: &C,
    off_node: &OffNodeColumns,
    plan: &NodeAggregationPlan,
    tag: CommTag,
) -> Result<LocalR, TapError> {
    let ppn = local_comm.size();
    let node_to_idx: HashMap<usize, usize> = plan
        .nodes()
        .iter()
        .enumerate()
        .map(|(i, &n)| (n, i))
        .collect();
    let first_proc = plan.first_local_procs(ppn);
    let mut next = vec![0usize; plan.len()];

    // assign each column to its receiving local rank
    let mut by_proc: Vec<Vec<usize>> = vec![Vec::new(); ppn];
    for (pos, &node) in off_node.nodes.iter().enumerate() {
        let idx = *node_to_idx.get(&node).ok_or(TapError::MissingIndex {
            index: node,
            buffer: "node plan",
        })?;
        let proc = (first_proc[idx] + next[idx]) % ppn;
        next[idx] = (next[idx] + 1) % plan.replicas()[idx];
        by_proc[proc].push(pos);
    }

    ship_requests(local_comm, off_node, &by_proc, &off_node.nodes, tag)
}

/// Two-step R phase. Collective over `local_comm`; indices as in
/// [`form_local_r`].
pub fn form_simple_local_r<C: Communicator>(
    local_comm: &C,
    topo: &ProcessTopology,
    off_node: &OffNodeColumns,
    tag: CommTag,
) -> Result<LocalR, TapError> {
    let mut by_proc: Vec<Vec<usize>> = vec![Vec::new(); local_comm.size()];
    for (pos, &owner) in off_node.procs.iter().enumerate() {
        by_proc[topo.to_local(owner)].push(pos);
    }
    ship_requests(local_comm, off_node, &by_proc, &off_node.procs, tag)
}

/// Receive side from `by_proc`; each request carries the columns followed by
/// their `origins`.
fn ship_requests<C: Communicator>(
    local_comm: &C,
    off_node: &OffNodeColumns,
    by_proc: &[Vec<usize>],
    origins: &[usize],
    tag: CommTag,
) -> Result<LocalR, TapError> {
    let ppn = local_comm.size();
    let mut schedule = ParSchedule::new();
    let mut outgoing = Vec::new();
    let mut flags = vec![0usize; ppn];
    for (proc, positions) in by_proc.iter().enumerate() {
        if positions.is_empty() {
            continue;
        }
        schedule.recv_data.add_msg(proc, positions);
        flags[proc] = 1;
        let mut payload: Vec<usize> = positions.iter().map(|&p| off_node.cols[p]).collect();
        payload.extend(positions.iter().map(|&p| origins[p]));
        outgoing.push((proc, payload));
    }

    // ship requests and learn what we will receive for others
    let n_incoming = count_incoming(local_comm, &flags)?;
    let incoming = exchange_index_lists(local_comm, &outgoing, n_incoming, tag)?;

    let mut own_origins = Vec::new();
    for (src, payload) in incoming {
        if payload.len() % 2 != 0 {
            return Err(TapError::comm(src, "local R request has odd length"));
        }
        let (cols, from) = payload.split_at(payload.len() / 2);
        schedule.send_data.add_msg(src, cols);
        own_origins.extend_from_slice(from);
    }
    log::debug!(
        "local rank {}: R phase recv {} msgs, send {} msgs",
        local_comm.rank(),
        schedule.recv_data.num_msgs(),
        schedule.send_data.num_msgs()
    );
    Ok(LocalR {
        schedule,
        origins: own_origins,
    })
}
