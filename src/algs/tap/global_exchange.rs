//! Inter-node schedule (the global phase).
//!
//! A rank that redistributes data for its node (the R phase send side) needs
//! those columns from the remote ranks that confirmed it in partner
//! discovery. It asks each of them for the sorted, unique columns originating
//! on that partner's node. Every pair of partners exchanges exactly one list,
//! possibly empty, so the owner side never waits on a message that is not
//! coming.
//!
//! In the two-step variant the forwarding rank asks the owners directly;
//! owners learn how many requests to expect through a sum reduction.

use hashbrown::HashMap;
use itertools::Itertools;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::index_exchange::{
    count_incoming, exchange_index_lists, exchange_index_lists_with,
};
use crate::algs::tap::global_procs::GlobalProcs;
use crate::algs::tap::local_r::LocalR;
use crate::data::schedule::ParSchedule;
use crate::tap_error::TapError;
use crate::topology::ProcessTopology;

/// Collective over `world`. Indices of the result are global columns.
pub fn form_global_par_comm<C: Communicator>(
    world: &C,
    topo: &ProcessTopology,
    procs: &GlobalProcs,
    local_r: &LocalR,
    tag: CommTag,
) -> Result<ParSchedule, TapError> {
    let node_to_recv: HashMap<usize, usize> = procs
        .recv_procs
        .iter()
        .enumerate()
        .map(|(i, &p)| (topo.to_node(p), i))
        .collect();

    // 1) bucket the columns we forward by the partner on their origin node
    let send_cols = local_r.schedule.send_data.indices();
    if send_cols.len() != local_r.origins.len() {
        return Err(TapError::LengthMismatch {
            what: "R phase origin nodes",
            expected: send_cols.len(),
            got: local_r.origins.len(),
        });
    }
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); procs.recv_procs.len()];
    for (&col, &node) in send_cols.iter().zip(&local_r.origins) {
        let i = *node_to_recv.get(&node).ok_or(TapError::MissingIndex {
            index: node,
            buffer: "global partners",
        })?;
        buckets[i].push(col);
    }

    // 2) one request per partner, even when empty
    let mut schedule = ParSchedule::new();
    let mut outgoing = Vec::with_capacity(buckets.len());
    for (&proc, bucket) in procs.recv_procs.iter().zip(buckets) {
        let cols: Vec<usize> = bucket.into_iter().sorted_unstable().dedup().collect();
        if !cols.is_empty() {
            schedule.recv_data.add_msg(proc, &cols);
        }
        outgoing.push((proc, cols));
    }

    // 3) each partner we serve tells us what to send
    let requests = exchange_index_lists_with(world, &outgoing, &procs.send_procs, tag)?;
    for (&proc, cols) in procs.send_procs.iter().zip(requests) {
        if !cols.is_empty() {
            schedule.send_data.add_msg(proc, &cols);
        }
    }
    log::debug!(
        "rank {}: global phase recv {} values, send {} values",
        world.rank(),
        schedule.recv_data.size_msgs(),
        schedule.send_data.size_msgs()
    );
    Ok(schedule)
}

/// Two-step global phase. Collective over `world`; `local_r.origins` holds
/// owning world ranks. Indices of the result are global columns.
pub fn form_simple_global_par_comm<C: Communicator>(
    world: &C,
    local_r: &LocalR,
    tag: CommTag,
) -> Result<ParSchedule, TapError> {
    let send_cols = local_r.schedule.send_data.indices();
    if send_cols.len() != local_r.origins.len() {
        return Err(TapError::LengthMismatch {
            what: "R phase owners",
            expected: send_cols.len(),
            got: local_r.origins.len(),
        });
    }

    // 1) one sorted, unique request per owner
    let mut schedule = ParSchedule::new();
    let mut outgoing = Vec::new();
    let mut flags = vec![0usize; world.size()];
    let pairs = local_r
        .origins
        .iter()
        .copied()
        .zip(send_cols.iter().copied())
        .sorted_unstable()
        .dedup();
    for (owner, group) in &pairs.chunk_by(|&(owner, _)| owner) {
        if owner >= world.size() {
            return Err(TapError::RankOutOfRange {
                rank: owner,
                size: world.size(),
            });
        }
        let cols: Vec<usize> = group.map(|(_, col)| col).collect();
        schedule.recv_data.add_msg(owner, &cols);
        flags[owner] = 1;
        outgoing.push((owner, cols));
    }

    // 2) owners collect the requests addressed to them
    let n_incoming = count_incoming(world, &flags)?;
    for (src, cols) in exchange_index_lists(world, &outgoing, n_incoming, tag)? {
        schedule.send_data.add_msg(src, &cols);
    }
    log::debug!(
        "rank {}: two-step global phase recv {} values, send {} values",
        world.rank(),
        schedule.recv_data.size_msgs(),
        schedule.send_data.size_msgs()
    );
    Ok(schedule)
}
