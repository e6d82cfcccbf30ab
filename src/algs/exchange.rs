//! Executing one phase of a finalized schedule.
//!
//! Values are gathered from the phase's source buffer at the send indices,
//! shipped as raw `Pod` bytes, and written into a fresh receive buffer in
//! message order. The receive buffer has exactly `recv_data.size_msgs()`
//! entries; entry `k` belongs to position `k` of the flattened receive
//! indices.
//!
//! Every index carries `block` consecutive values (`src[i * block..][..block]`),
//! so several vectors travel in the same messages.
//!
//! [`exchange_values_t`] runs a phase backwards: receive positions send, send
//! indices receive, and every arriving value is added into its slot.

use bytemuck::Pod;
use num_traits::Zero;

use crate::algs::communicator::{CommTag, Communicator, wait_all};
use crate::algs::wire;
use crate::data::schedule::{CommData, ParSchedule};
use crate::tap_error::TapError;

/// Run one phase: send `src[send indices]`, receive into a new buffer.
pub fn exchange_values<C, T>(
    comm: &C,
    schedule: &ParSchedule,
    tag: CommTag,
    src: &[T],
    block: usize,
) -> Result<Vec<T>, TapError>
where
    C: Communicator,
    T: Pod + Zero,
{
    let mut out = vec![T::zero(); schedule.recv_data.size_msgs() * block];
    let indptr = schedule.recv_data.indptr();
    run_phase(
        comm,
        &schedule.send_data,
        &schedule.recv_data,
        tag,
        block,
        |_, indices| gather(src, indices, block, "send source"),
        |i, vals| {
            out[indptr[i] * block..indptr[i + 1] * block].copy_from_slice(vals);
            Ok(())
        },
    )?;
    Ok(out)
}

/// Run one phase backwards. `src` is laid out like the forward receive
/// buffer; the result has `n_out` indices and holds the sum of everything
/// addressed to each.
pub fn exchange_values_t<C, T>(
    comm: &C,
    schedule: &ParSchedule,
    tag: CommTag,
    src: &[T],
    block: usize,
    n_out: usize,
) -> Result<Vec<T>, TapError>
where
    C: Communicator,
    T: Pod + Zero,
{
    let expected = schedule.recv_data.size_msgs() * block;
    if src.len() != expected {
        return Err(TapError::LengthMismatch {
            what: "transpose source",
            expected,
            got: src.len(),
        });
    }
    let recv_indptr = schedule.recv_data.indptr();
    let send_data = &schedule.send_data;
    let mut out = vec![T::zero(); n_out * block];
    run_phase(
        comm,
        &schedule.recv_data,
        send_data,
        tag,
        block,
        |i, _| Ok(src[recv_indptr[i] * block..recv_indptr[i + 1] * block].to_vec()),
        |i, vals| {
            for (&idx, chunk) in send_data.msg(i).indices.iter().zip(vals.chunks_exact(block)) {
                let slot = out
                    .get_mut(idx * block..(idx + 1) * block)
                    .ok_or(TapError::MissingIndex {
                        index: idx,
                        buffer: "transpose target",
                    })?;
                for (o, &v) in slot.iter_mut().zip(chunk) {
                    *o = *o + v;
                }
            }
            Ok(())
        },
    )?;
    Ok(out)
}

fn gather<T: Pod>(
    src: &[T],
    indices: &[usize],
    block: usize,
    buffer: &'static str,
) -> Result<Vec<T>, TapError> {
    let mut packed = Vec::with_capacity(indices.len() * block);
    for &i in indices {
        let vals = src
            .get(i * block..(i + 1) * block)
            .ok_or(TapError::MissingIndex { index: i, buffer })?;
        packed.extend_from_slice(vals);
    }
    Ok(packed)
}

/// Post one send per message of `outgoing`, receive one message of
/// `len * block` values per entry of `incoming` in order, then drain the
/// sends.
fn run_phase<C, T>(
    comm: &C,
    outgoing: &CommData,
    incoming: &CommData,
    tag: CommTag,
    block: usize,
    mut pack: impl FnMut(usize, &[usize]) -> Result<Vec<T>, TapError>,
    mut unpack: impl FnMut(usize, &[T]) -> Result<(), TapError>,
) -> Result<(), TapError>
where
    C: Communicator,
    T: Pod,
{
    // 1) pack and post sends
    let mut pending = Vec::with_capacity(outgoing.num_msgs());
    let mut maybe_err = None;
    for (i, msg) in outgoing.iter().enumerate() {
        let posted = pack(i, msg.indices)
            .and_then(|vals| comm.isend(msg.proc, tag, wire::value_bytes(&vals)));
        match posted {
            Ok(h) => pending.push(h),
            Err(e) => {
                maybe_err = Some(e);
                break;
            }
        }
    }

    // 2) receive each message and hand it over
    if maybe_err.is_none() {
        for (i, msg) in incoming.iter().enumerate() {
            let got = comm
                .recv(msg.proc, tag)
                .and_then(|bytes| wire::decode_values::<T>(msg.proc, &bytes, msg.len() * block))
                .and_then(|vals| unpack(i, &vals));
            if let Err(e) = got {
                maybe_err = Some(e);
                break;
            }
        }
    }

    // 3) always drain sends
    let drained = wait_all(pending);
    if let Some(err) = maybe_err {
        return Err(err);
    }
    drained
}
