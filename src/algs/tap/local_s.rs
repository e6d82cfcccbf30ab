//! Intra-node gathering of data bound for other nodes (the S phase).
//!
//! A rank that sends inter-node data rarely owns all of it. Before the global
//! phase it collects the columns from their owners on its own node. Owners
//! are found from the node's owned-column starts, which must ascend with
//! local rank.

use itertools::Itertools;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::index_exchange::{count_incoming, exchange_index_lists};
use crate::data::schedule::ParSchedule;
use crate::tap_error::TapError;

/// Collective over `local_comm`. Indices of the result are global columns.
pub fn form_local_s<C: Communicator>(
    local_comm: &C,
    global: &ParSchedule,
    first_local_col: usize,
    tag: CommTag,
) -> Result<ParSchedule, TapError> {
    let ppn = local_comm.size();

    // 1) first owned column of every local rank
    let starts: Vec<usize> = local_comm
        .all_gather_usize(&[first_local_col])?
        .into_iter()
        .enumerate()
        .map(|(p, v)| match v.as_slice() {
            [s] => Ok(*s),
            _ => Err(TapError::comm(p, "expected one column start")),
        })
        .collect::<Result<_, _>>()?;
    if !starts.windows(2).all(|w| w[0] <= w[1]) {
        return Err(TapError::InvalidConfig(format!(
            "owned column starts {starts:?} do not ascend with local rank"
        )));
    }

    // 2) owner of each column we forward; global messages are sorted so the
    //    owner only moves forward within one message
    let mut by_proc: Vec<Vec<usize>> = vec![Vec::new(); ppn];
    for msg in global.send_data.iter() {
        let mut proc = 0;
        for &col in msg.indices {
            while proc + 1 < ppn && col >= starts[proc + 1] {
                proc += 1;
            }
            by_proc[proc].push(col);
        }
    }

    let mut schedule = ParSchedule::new();
    let mut outgoing = Vec::new();
    let mut flags = vec![0usize; ppn];
    for (proc, cols) in by_proc.into_iter().enumerate() {
        if cols.is_empty() {
            continue;
        }
        let cols: Vec<usize> = cols.into_iter().sorted_unstable().dedup().collect();
        schedule.recv_data.add_msg(proc, &cols);
        flags[proc] = 1;
        outgoing.push((proc, cols));
    }

    // 3) owners learn which of their columns to send
    let n_incoming = count_incoming(local_comm, &flags)?;
    for (src, cols) in exchange_index_lists(local_comm, &outgoing, n_incoming, tag)? {
        schedule.send_data.add_msg(src, &cols);
    }
    log::debug!(
        "local rank {}: S phase recv {} msgs, send {} msgs",
        local_comm.rank(),
        schedule.recv_data.num_msgs(),
        schedule.send_data.num_msgs()
    );
    Ok(schedule)
}
