//! Index-list traffic used while building schedules.
//!
//! Construction phases ship lists of global indices between ranks. Some
//! phases know their senders in advance; others only know how many messages
//! will arrive, learned through a sum reduction of 0/1 destination flags.
//! Every helper drains its send handles before returning, even on error, and
//! returns incoming lists ordered by source rank so schedules do not depend on
//! arrival order.

use crate::algs::communicator::{CommTag, Communicator, Source, wait_all};
use crate::algs::wire;
use crate::tap_error::TapError;

/// Number of messages this rank will receive, given 0/1 flags marking which
/// ranks of `comm` it sends to. Collective over `comm`.
pub fn count_incoming<C: Communicator>(comm: &C, dest_flags: &[usize]) -> Result<usize, TapError> {
    if dest_flags.len() != comm.size() {
        return Err(TapError::LengthMismatch {
            what: "destination flags",
            expected: comm.size(),
            got: dest_flags.len(),
        });
    }
    let totals = comm.all_reduce_sum(dest_flags)?;
    Ok(totals[comm.rank()])
}

/// Send each `(peer, list)` and receive `n_incoming` lists from any source.
pub fn exchange_index_lists<C: Communicator>(
    comm: &C,
    outgoing: &[(usize, Vec<usize>)],
    n_incoming: usize,
    tag: CommTag,
) -> Result<Vec<(usize, Vec<usize>)>, TapError> {
    // 1) post all sends
    let mut pending = Vec::with_capacity(outgoing.len());
    let mut maybe_err = None;
    for (peer, list) in outgoing {
        match comm.isend(*peer, tag, &wire::encode_indices(list)) {
            Ok(h) => pending.push(h),
            Err(e) => {
                maybe_err = Some(e);
                break;
            }
        }
    }

    // 2) receive whatever is addressed to us, in probe order
    let mut incoming = Vec::with_capacity(n_incoming);
    if maybe_err.is_none() {
        for _ in 0..n_incoming {
            match recv_any(comm, tag) {
                Ok(msg) => incoming.push(msg),
                Err(e) => {
                    maybe_err = Some(e);
                    break;
                }
            }
        }
    }

    // 3) always drain sends
    let drained = wait_all(pending);
    if let Some(err) = maybe_err {
        return Err(err);
    }
    drained?;

    incoming.sort_by_key(|(src, _)| *src);
    Ok(incoming)
}

/// Send each `(peer, list)` and receive exactly one list from every rank in
/// `sources`, returned in the order of `sources`.
pub fn exchange_index_lists_with<C: Communicator>(
    comm: &C,
    outgoing: &[(usize, Vec<usize>)],
    sources: &[usize],
    tag: CommTag,
) -> Result<Vec<Vec<usize>>, TapError> {
    let mut pending = Vec::with_capacity(outgoing.len());
    let mut maybe_err = None;
    for (peer, list) in outgoing {
        match comm.isend(*peer, tag, &wire::encode_indices(list)) {
            Ok(h) => pending.push(h),
            Err(e) => {
                maybe_err = Some(e);
                break;
            }
        }
    }

    let mut incoming = Vec::with_capacity(sources.len());
    if maybe_err.is_none() {
        for &src in sources {
            match comm
                .recv(src, tag)
                .and_then(|bytes| wire::decode_indices(src, &bytes))
            {
                Ok(list) => incoming.push(list),
                Err(e) => {
                    maybe_err = Some(e);
                    break;
                }
            }
        }
    }

    let drained = wait_all(pending);
    if let Some(err) = maybe_err {
        return Err(err);
    }
    drained?;
    Ok(incoming)
}

fn recv_any<C: Communicator>(comm: &C, tag: CommTag) -> Result<(usize, Vec<usize>), TapError> {
    let status = comm.probe(Source::Any, tag)?;
    let bytes = comm.recv(status.source, tag)?;
    log::trace!(
        "rank {} got {} bytes from {} on tag {}",
        comm.rank(),
        bytes.len(),
        status.source,
        tag.as_u16()
    );
    Ok((status.source, wire::decode_indices(status.source, &bytes)?))
}
