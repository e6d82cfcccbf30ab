//! Discovering inter-node partners.
//!
//! Each (node, replica) slot of the node plan is served by one local rank,
//! which announces itself to the rank with the same local index on the
//! remote node. Announcements are synchronous-mode sends drained through a
//! non-blocking barrier, so no rank needs to know in advance how many will
//! arrive. The remote node then spreads its announcers round-robin over its
//! local ranks, and each chosen rank confirms back to the announcer.
//!
//! Afterwards `send_procs` lists the remote ranks this rank sends inter-node
//! data to, and `recv_procs` the remote ranks it receives from.

use crate::algs::communicator::{CommTag, Communicator, Source, Wait, test_all, wait_all};
use crate::algs::tap::node_plan::NodeAggregationPlan;
use crate::algs::wire;
use crate::tap_error::TapError;
use crate::topology::ProcessTopology;

/// Inter-node partners of the calling rank, each list ascending.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlobalProcs {
    pub send_procs: Vec<usize>,
    pub recv_procs: Vec<usize>,
}

/// Collective over `world` and `local_comm`.
pub fn find_global_comm_procs<C: Communicator>(
    world: &C,
    local_comm: &C,
    topo: &ProcessTopology,
    plan: &NodeAggregationPlan,
    token_tag: CommTag,
    confirm_tag: CommTag,
) -> Result<GlobalProcs, TapError> {
    let ppn = local_comm.size();
    let local_rank = local_comm.rank();

    // 1) remote nodes whose slots this rank serves
    let my_nodes: Vec<usize> = plan
        .slots()
        .enumerate()
        .filter(|(slot, _)| slot % ppn == local_rank)
        .map(|(_, (_, node))| node)
        .collect();

    // 2) announce to the same local index on each remote node, draining
    //    announcements addressed to us until everyone's were matched
    let payload = wire::encode_indices(&[topo.node()]);
    let mut tokens = Vec::with_capacity(my_nodes.len());
    let mut maybe_err = None;
    for &node in &my_nodes {
        match world.issend(topo.to_global(node, local_rank), token_tag, &payload) {
            Ok(h) => tokens.push(h),
            Err(e) => {
                maybe_err = Some(e);
                break;
            }
        }
    }
    let mut announcers = Vec::new();
    if maybe_err.is_none() {
        maybe_err = drain_announcements(world, &mut tokens, token_tag, &mut announcers).err();
    }
    if let Some(e) = maybe_err {
        // a token is released only once its receiver matched it
        let _ = wait_all(tokens);
        return Err(e);
    }
    announcers.sort_unstable();

    // 3) spread the node's announcers over local ranks
    let gathered = local_comm.all_gather_usize(&announcers)?;
    let node_announcers: Vec<usize> = gathered.into_iter().flatten().collect();
    let send_procs: Vec<usize> = node_announcers
        .iter()
        .copied()
        .skip(local_rank)
        .step_by(ppn)
        .collect();

    // 4) confirm back, and collect one confirmation per announcement
    let mut confirms = Vec::with_capacity(send_procs.len());
    let ack = wire::encode_indices(&[world.rank()]);
    for &proc in &send_procs {
        confirms.push(world.isend(proc, confirm_tag, &ack)?);
    }
    let mut recv_procs = Vec::with_capacity(my_nodes.len());
    let mut maybe_err = None;
    for _ in 0..my_nodes.len() {
        match world
            .probe(Source::Any, confirm_tag)
            .and_then(|st| world.recv(st.source, confirm_tag).map(|_| st.source))
        {
            Ok(src) => recv_procs.push(src),
            Err(e) => {
                maybe_err = Some(e);
                break;
            }
        }
    }
    let drained = wait_all(confirms);
    if let Some(e) = maybe_err {
        return Err(e);
    }
    drained?;

    let mut send_procs = send_procs;
    send_procs.sort_unstable();
    recv_procs.sort_unstable();
    log::debug!(
        "rank {}: global send procs {:?}, recv procs {:?}",
        world.rank(),
        send_procs,
        recv_procs
    );
    Ok(GlobalProcs {
        send_procs,
        recv_procs,
    })
}

/// Receive announcements until every own token was matched and every rank
/// reached the barrier that follows. A token is matched only by a receive, so
/// once the barrier completes no announcement is left in flight. On error the
/// barrier is still completed; the caller completes the tokens.
fn drain_announcements<C: Communicator>(
    world: &C,
    tokens: &mut [C::SendHandle],
    tag: CommTag,
    announcers: &mut Vec<usize>,
) -> Result<(), TapError> {
    while !test_all(tokens)? {
        recv_pending(world, tag, announcers)?;
        std::thread::yield_now();
    }
    let mut barrier = world.ibarrier()?;
    while !barrier.test()? {
        if let Err(e) = recv_pending(world, tag, announcers) {
            let _ = barrier.wait();
            return Err(e);
        }
        std::thread::yield_now();
    }
    Ok(())
}

fn recv_pending<C: Communicator>(
    world: &C,
    tag: CommTag,
    announcers: &mut Vec<usize>,
) -> Result<(), TapError> {
    while let Some(st) = world.iprobe(Source::Any, tag)? {
        let bytes = world.recv(st.source, tag)?;
        let from_node = wire::decode_indices(st.source, &bytes)?;
        log::trace!(
            "rank {} announced by {} from node {:?}",
            world.rank(),
            st.source,
            from_node
        );
        announcers.push(st.source);
    }
    Ok(())
}
