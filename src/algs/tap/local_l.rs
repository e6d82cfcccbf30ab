//! Fully intra-node dependencies (the L phase).

use itertools::Itertools;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::index_exchange::{count_incoming, exchange_index_lists};
use crate::algs::tap::partition::OnNodeColumns;
use crate::data::schedule::ParSchedule;
use crate::tap_error::TapError;

/// Collective over `local_comm`.
///
/// Each owning local rank forms one message. Receive indices are positions
/// in the on-node column list; send indices are global columns until
/// remapped.
pub fn form_local_l<C: Communicator>(
    local_comm: &C,
    on_node: &OnNodeColumns,
    tag: CommTag,
) -> Result<ParSchedule, TapError> {
    let ppn = local_comm.size();
    let mut schedule = ParSchedule::new();
    let mut outgoing = Vec::new();
    let mut flags = vec![0usize; ppn];

    // on-node columns arrive grouped by owner
    let mut start = 0;
    for (count, &proc) in on_node.local_procs.iter().dedup_with_count() {
        if flags[proc] != 0 {
            return Err(TapError::InvalidConfig(format!(
                "on-node columns of local rank {proc} are not contiguous"
            )));
        }
        flags[proc] = 1;
        schedule.recv_data.add_msg_len(proc, count);
        outgoing.push((proc, on_node.cols[start..start + count].to_vec()));
        start += count;
    }

    let n_incoming = count_incoming(local_comm, &flags)?;
    for (src, cols) in exchange_index_lists(local_comm, &outgoing, n_incoming, tag)? {
        schedule.send_data.add_msg(src, &cols);
    }
    log::debug!(
        "local rank {}: L phase recv {} values, send {} values",
        local_comm.rank(),
        schedule.recv_data.size_msgs(),
        schedule.send_data.size_msgs()
    );
    Ok(schedule)
}
